// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

/*! I/O helpers: content digests, compression, and data resolution. */

use {
    crate::error::{AthenaError, Result},
    async_compression::futures::bufread::{BzDecoder, GzipDecoder},
    async_trait::async_trait,
    digest::DynDigest,
    futures::{AsyncBufRead, AsyncRead},
    md5::Md5,
    pin_project::pin_project,
    sha2::Sha256,
    std::{
        fmt::Formatter,
        io::Read,
        path::Path,
        pin::Pin,
        task::{Context, Poll},
    },
};

/// Checksum flavor used by archive metadata.
#[derive(Clone, Copy, Debug, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub enum ChecksumType {
    Md5,
    Sha256,
}

impl ChecksumType {
    /// Name of the control field holding this checksum flavor.
    pub fn field_name(&self) -> &'static str {
        match self {
            Self::Md5 => "MD5Sum",
            Self::Sha256 => "SHA256",
        }
    }

    /// Obtain a new hasher for this checksum flavor.
    pub fn new_hasher(&self) -> Box<dyn DynDigest + Send> {
        match self {
            Self::Md5 => Box::<Md5>::default(),
            Self::Sha256 => Box::<Sha256>::default(),
        }
    }
}

/// Represents a content digest.
#[derive(Clone, Eq, PartialEq)]
pub enum ContentDigest {
    Md5(Vec<u8>),
    Sha256(Vec<u8>),
}

impl std::fmt::Debug for ContentDigest {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Md5(data) => write!(f, "Md5({})", hex::encode(data)),
            Self::Sha256(data) => write!(f, "Sha256({})", hex::encode(data)),
        }
    }
}

impl ContentDigest {
    /// Create a new MD5 instance by parsing a hex digest.
    pub fn md5_hex(digest: &str) -> Result<Self> {
        Self::from_hex_digest(ChecksumType::Md5, digest)
    }

    /// Create a new SHA-256 instance by parsing a hex digest.
    pub fn sha256_hex(digest: &str) -> Result<Self> {
        Self::from_hex_digest(ChecksumType::Sha256, digest)
    }

    /// Obtain an instance by parsing a hex string as a [ChecksumType].
    pub fn from_hex_digest(checksum: ChecksumType, digest: &str) -> Result<Self> {
        let digest = hex::decode(digest)
            .map_err(|e| AthenaError::DigestBadHex(digest.to_string(), e))?;

        Ok(match checksum {
            ChecksumType::Md5 => Self::Md5(digest),
            ChecksumType::Sha256 => Self::Sha256(digest),
        })
    }

    /// The [ChecksumType] of this digest.
    pub fn checksum_type(&self) -> ChecksumType {
        match self {
            Self::Md5(_) => ChecksumType::Md5,
            Self::Sha256(_) => ChecksumType::Sha256,
        }
    }

    /// The raw digest bytes.
    pub fn digest_bytes(&self) -> &[u8] {
        match self {
            Self::Md5(x) => x,
            Self::Sha256(x) => x,
        }
    }

    /// The hex encoded digest.
    pub fn digest_hex(&self) -> String {
        hex::encode(self.digest_bytes())
    }
}

/// Compression format of transported index files.
#[derive(Clone, Copy, Debug, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub enum Compression {
    /// No compression (no extension).
    None,

    /// Gzip compression (.gz extension).
    Gzip,

    /// Bzip2 compression (.bz2 extension).
    Bzip2,
}

impl Compression {
    /// Filename extension for files compressed in this format.
    pub fn extension(&self) -> &'static str {
        match self {
            Self::None => "",
            Self::Gzip => ".gz",
            Self::Bzip2 => ".bz2",
        }
    }

    /// Retrieval preference order for compressed index variants.
    pub fn default_preferred_order() -> impl Iterator<Item = Compression> {
        [Self::Gzip, Self::Bzip2].into_iter()
    }
}

/// Wrap a reader with transparent decompression.
pub fn read_decompressed(
    stream: Pin<Box<dyn AsyncBufRead + Send>>,
    compression: Compression,
) -> Pin<Box<dyn AsyncRead + Send>> {
    match compression {
        Compression::None => Box::pin(stream),
        Compression::Gzip => Box::pin(GzipDecoder::new(stream)),
        Compression::Bzip2 => Box::pin(BzDecoder::new(stream)),
    }
}

/// Compute the hex MD5 digest of a local file, if it exists.
///
/// Returns `Ok(None)` when the path does not refer to a regular file.
pub fn md5_path(path: &Path) -> Result<Option<String>> {
    if !path.is_file() {
        return Ok(None);
    }

    let mut f = std::fs::File::open(path)?;
    let mut hasher = ChecksumType::Md5.new_hasher();
    let mut buf = [0u8; 65536];

    loop {
        let count = f.read(&mut buf)?;

        if count == 0 {
            break;
        }

        hasher.update(&buf[0..count]);
    }

    Ok(Some(hex::encode(hasher.finalize_reset())))
}

/// An [AsyncRead] adapter computing a [ContentDigest] as data is read.
#[pin_project]
pub struct DigestingReader<R> {
    hasher: Box<dyn DynDigest + Send>,
    checksum: ChecksumType,
    #[pin]
    source: R,
    bytes_read: u64,
}

impl<R> DigestingReader<R> {
    /// Construct a new instance from a source reader.
    pub fn new(source: R, checksum: ChecksumType) -> Self {
        Self {
            hasher: checksum.new_hasher(),
            checksum,
            source,
            bytes_read: 0,
        }
    }

    /// Finish the stream, resolving the digest over all bytes read.
    pub fn finish(mut self) -> (R, ContentDigest, u64) {
        let digest = self.hasher.finalize_reset().to_vec();

        let digest = match self.checksum {
            ChecksumType::Md5 => ContentDigest::Md5(digest),
            ChecksumType::Sha256 => ContentDigest::Sha256(digest),
        };

        (self.source, digest, self.bytes_read)
    }
}

impl<R> AsyncRead for DigestingReader<R>
where
    R: AsyncRead + Unpin,
{
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut [u8],
    ) -> Poll<std::io::Result<usize>> {
        let mut this = self.project();

        match this.source.as_mut().poll_read(cx, buf) {
            Poll::Ready(Ok(size)) => {
                if size > 0 {
                    this.hasher.update(&buf[0..size]);
                    *this.bytes_read += size as u64;
                }

                Poll::Ready(Ok(size))
            }
            res => res,
        }
    }
}

/// Generic mechanism for obtaining content at a relative path.
///
/// Implementations bind to the root of an upstream archive. The fetcher and
/// the index store are written against this trait so tests can substitute a
/// filesystem-backed resolver for the HTTP client.
#[async_trait]
pub trait DataResolver: Sync {
    /// Get the raw content of a relative path as an async reader.
    async fn get_path(&self, path: &str) -> Result<Pin<Box<dyn AsyncRead + Send>>>;

    /// Probe a relative path, returning its size in bytes if known.
    async fn get_path_metadata(&self, path: &str) -> Result<Option<u64>>;

    /// Get the content of a relative path with decompression applied.
    async fn get_path_decoded(
        &self,
        path: &str,
        compression: Compression,
    ) -> Result<Pin<Box<dyn AsyncRead + Send>>> {
        Ok(read_decompressed(
            Box::pin(futures::io::BufReader::new(self.get_path(path).await?)),
            compression,
        ))
    }
}

#[cfg(test)]
mod test {
    use {super::*, futures::AsyncReadExt};

    #[test]
    fn content_digest_hex() -> Result<()> {
        let digest = ContentDigest::md5_hex("d41d8cd98f00b204e9800998ecf8427e")?;
        assert_eq!(digest.checksum_type(), ChecksumType::Md5);
        assert_eq!(digest.digest_hex(), "d41d8cd98f00b204e9800998ecf8427e");

        assert!(ContentDigest::md5_hex("not hex").is_err());

        Ok(())
    }

    #[test]
    fn md5_path_missing_file() -> Result<()> {
        assert!(md5_path(Path::new("/nonexistent/surely/missing"))?.is_none());

        Ok(())
    }

    #[tokio::test]
    async fn digesting_reader_md5() -> Result<()> {
        let data = b"hello world".to_vec();
        let mut reader =
            DigestingReader::new(futures::io::Cursor::new(data), ChecksumType::Md5);

        let mut out = Vec::new();
        reader.read_to_end(&mut out).await?;

        let (_, digest, size) = reader.finish();
        assert_eq!(size, 11);
        assert_eq!(digest.digest_hex(), "5eb63bbbe01eeed093cb22bb8f5acdc3");

        Ok(())
    }
}

// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

/*! Upstream archive index ingestion.

The [IndexStore] drives the index protocol against an upstream archive:

1. Download `dists/<codename>/InRelease` (falling back to `Release`) and
   parse its `MD5Sum` table.
2. For each wanted control file, skip the download when a cached
   decompressed copy already carries the release-stated digest.
3. Otherwise fetch a compressed variant (`.gz`, then `.bz2`), decompress,
   verify the digest, and persist the decompressed copy under the cache
   directory.
4. Split each control file into Deb822 paragraphs.

Transport is abstracted behind [ArchiveClient] so HTTP archives and local
mirrors are interchangeable.
*/

use {
    crate::{
        control::{ControlParagraph, ControlParagraphReader},
        error::{AthenaError, Result},
        io::{md5_path, read_decompressed, ChecksumType, Compression, DataResolver, DigestingReader},
    },
    futures::AsyncReadExt,
    std::{
        io::BufRead,
        path::{Path, PathBuf},
    },
    url::Url,
};

pub mod filesystem;
#[cfg(feature = "http")]
pub mod http;
pub mod release;

use release::{ReleaseFile, ReleaseFileEntry};

/// An archive transport bound to a base URL.
pub trait ArchiveClient: DataResolver + Send + Sync {
    /// The URL this client is bound to.
    fn url(&self) -> Result<Url>;
}

/// Derive a cache filename from a URI.
///
/// The scheme is dropped and path separators become underscores, so cached
/// control files for different distributions never collide.
pub fn uri_to_filename(uri: &str) -> String {
    let uri = uri.split_once("://").map(|(_, rest)| rest).unwrap_or(uri);

    uri.trim_matches('/').replace('/', "_")
}

/// The parsed index data for one archive distribution.
pub struct ArchiveIndices {
    /// The parsed `[In]Release` file.
    pub release: ReleaseFile<'static>,

    /// All binary package paragraphs across the requested sections.
    pub packages: Vec<ControlParagraph<'static>>,

    /// All source package paragraphs across the requested sections.
    pub sources: Vec<ControlParagraph<'static>>,
}

/// Acquires and caches the control files of an upstream distribution.
pub struct IndexStore {
    client: Box<dyn ArchiveClient>,
    cache_dir: PathBuf,
    codename: String,
    architecture: String,
    sections: Vec<String>,
}

impl IndexStore {
    /// Construct an instance.
    ///
    /// `sections` holds the archive sections to ingest (at minimum
    /// `main`).
    pub fn new(
        client: Box<dyn ArchiveClient>,
        cache_dir: impl AsRef<Path>,
        codename: impl ToString,
        architecture: impl ToString,
        sections: Vec<String>,
    ) -> Self {
        Self {
            client,
            cache_dir: cache_dir.as_ref().to_path_buf(),
            codename: codename.to_string(),
            architecture: architecture.to_string(),
            sections,
        }
    }

    /// Run the full index protocol, returning parsed paragraphs.
    pub async fn acquire_indices(&self) -> Result<ArchiveIndices> {
        let release = self.fetch_release().await?;

        log::info!(
            "using release file: origin={} codename={} version={} date={}",
            release.origin().unwrap_or("?"),
            release.codename().unwrap_or("?"),
            release.version().unwrap_or("?"),
            release.date().unwrap_or("?"),
        );

        let mut packages = Vec::new();
        let mut sources = Vec::new();

        for section in &self.sections {
            let binary_path = format!("{}/binary-{}/Packages", section, self.architecture);
            packages.extend(self.acquire_control_file(&release, &binary_path).await?);

            let source_path = format!("{}/source/Sources", section);
            sources.extend(self.acquire_control_file(&release, &source_path).await?);
        }

        Ok(ArchiveIndices {
            release,
            packages,
            sources,
        })
    }

    /// Fetch and parse the distribution's release file.
    ///
    /// `InRelease` is preferred; `Release` is the fallback for archives
    /// without inline signatures.
    pub async fn fetch_release(&self) -> Result<ReleaseFile<'static>> {
        let mut last_err = None;

        for name in ["InRelease", "Release"] {
            let relative = format!("dists/{}/{}", self.codename, name);

            let mut reader = match self.client.get_path(&relative).await {
                Ok(reader) => reader,
                Err(e) => {
                    last_err = Some(e);
                    continue;
                }
            };

            let mut data = Vec::new();
            reader.read_to_end(&mut data).await?;

            // Keep a copy for inspection alongside the control files.
            let local = self.local_cache_path(&relative)?;
            if let Some(parent) = local.parent() {
                std::fs::create_dir_all(parent)?;
            }
            std::fs::write(&local, &data)?;

            return ReleaseFile::from_reader(std::io::Cursor::new(data));
        }

        Err(last_err.expect("loop should have recorded an error"))
    }

    /// Materialize one control file and split it into paragraphs.
    ///
    /// `relative` is the distribution-relative path of the uncompressed
    /// file, which must appear in the release `MD5Sum` table.
    async fn acquire_control_file(
        &self,
        release: &ReleaseFile<'static>,
        relative: &str,
    ) -> Result<Vec<ControlParagraph<'static>>> {
        let entry = release.find_md5_entry(relative)?;

        let dist_relative = format!("dists/{}/{}", self.codename, relative);
        let local = self.local_cache_path(&dist_relative)?;

        if md5_path(&local)? == Some(entry.digest.digest_hex()) {
            log::debug!("cached control file is current: {}", local.display());
        } else {
            self.download_control_file(&dist_relative, &entry, &local)
                .await?;
        }

        let f = std::fs::File::open(&local)
            .map_err(|e| AthenaError::ArchiveIoPath(format!("{}", local.display()), e))?;

        self.split_records(std::io::BufReader::new(f))
    }

    /// Download a compressed control file variant and persist the
    /// decompressed copy, verifying its digest against the release entry.
    async fn download_control_file(
        &self,
        dist_relative: &str,
        entry: &ReleaseFileEntry,
        local: &Path,
    ) -> Result<()> {
        let mut last_err = None;

        for compression in Compression::default_preferred_order() {
            let remote = format!("{}{}", dist_relative, compression.extension());

            let stream = match self.client.get_path(&remote).await {
                Ok(stream) => stream,
                Err(e) => {
                    last_err = Some(e);
                    continue;
                }
            };

            log::info!("downloading {}", remote);

            let decoded = read_decompressed(
                Box::pin(futures::io::BufReader::new(stream)),
                compression,
            );
            let mut reader = DigestingReader::new(decoded, ChecksumType::Md5);

            if let Some(parent) = local.parent() {
                std::fs::create_dir_all(parent)?;
            }

            let out = std::fs::File::create(local)
                .map_err(|e| AthenaError::ArchiveIoPath(format!("{}", local.display()), e))?;
            let mut writer = futures::io::AllowStdIo::new(out);

            futures::io::copy(&mut reader, &mut writer).await?;

            let (_, digest, _) = reader.finish();

            return if digest == entry.digest {
                Ok(())
            } else {
                Err(AthenaError::ArchiveDigestMismatch {
                    path: remote,
                    expected: entry.digest.digest_hex(),
                    got: digest.digest_hex(),
                })
            };
        }

        Err(last_err.expect("loop should have recorded an error"))
    }

    fn split_records<R: BufRead>(&self, reader: R) -> Result<Vec<ControlParagraph<'static>>> {
        ControlParagraphReader::new(reader).collect()
    }

    fn local_cache_path(&self, relative: &str) -> Result<PathBuf> {
        let url = self.client.url()?.join(relative)?;

        Ok(self.cache_dir.join(uri_to_filename(url.as_str())))
    }
}

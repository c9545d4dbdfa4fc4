// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

/*! `Release` file primitives.

`Release` files (or `InRelease` when wrapped in a PGP cleartext signature)
are the top-level manifest of an archive distribution: repository metadata
plus a checksum table over the *indices* files (`Packages`, `Sources`, ...)
underneath it.

Signature *verification* is an external collaborator's concern; the
cleartext armor of an `InRelease` file is stripped here without checking
it so the embedded paragraph can be parsed.
*/

use {
    crate::{
        control::{ControlParagraph, ControlParagraphReader},
        error::{AthenaError, Result},
        io::{ChecksumType, ContentDigest},
    },
    std::{io::BufRead, str::FromStr},
};

const CLEARSIGN_BEGIN: &str = "-----BEGIN PGP SIGNED MESSAGE-----";
const SIGNATURE_BEGIN: &str = "-----BEGIN PGP SIGNATURE-----";

/// An entry for an indices file listed in a `Release` file.
///
/// Instances correspond to one line in the `MD5Sum` table.
#[derive(Clone, Debug, PartialEq)]
pub struct ReleaseFileEntry {
    /// The path to this file, relative to the distribution directory.
    pub path: String,

    /// The content digest of this file.
    pub digest: ContentDigest,

    /// The size of the file in bytes.
    pub size: u64,
}

/// A parsed `Release` or `InRelease` file.
pub struct ReleaseFile<'a> {
    paragraph: ControlParagraph<'a>,
}

impl<'a> AsRef<ControlParagraph<'a>> for ReleaseFile<'a> {
    fn as_ref(&self) -> &ControlParagraph<'a> {
        &self.paragraph
    }
}

impl ReleaseFile<'static> {
    /// Construct an instance by reading release file data.
    ///
    /// Accepts both plain `Release` content and clearsigned `InRelease`
    /// content. The file must contain exactly one paragraph.
    pub fn from_reader<R: BufRead>(reader: R) -> Result<Self> {
        let mut in_signed_headers = false;
        let mut in_signature = false;
        let mut body = String::new();

        for line in reader.lines() {
            let line = line?;

            if body.is_empty() && line.trim() == CLEARSIGN_BEGIN {
                in_signed_headers = true;
                continue;
            }

            if in_signed_headers {
                // Armor headers (e.g. `Hash: SHA256`) run until a blank line.
                if line.trim().is_empty() {
                    in_signed_headers = false;
                }
                continue;
            }

            if line.trim() == SIGNATURE_BEGIN {
                in_signature = true;
            }

            if in_signature {
                continue;
            }

            // Dash-escaped lines inside the signed body.
            let line = line.strip_prefix("- ").unwrap_or(&line);

            body.push_str(line);
            body.push('\n');
        }

        let paragraphs = ControlParagraphReader::new(std::io::Cursor::new(body))
            .collect::<Result<Vec<_>>>()?;

        if paragraphs.len() != 1 {
            return Err(AthenaError::ReleaseControlParagraphMismatch(
                paragraphs.len(),
            ));
        }

        Ok(Self {
            paragraph: paragraphs
                .into_iter()
                .next()
                .expect("validated paragraph count above"),
        })
    }
}

impl<'a> ReleaseFile<'a> {
    /// The `Origin` field.
    pub fn origin(&self) -> Option<&str> {
        self.paragraph.field_str("Origin")
    }

    /// The `Codename` field.
    pub fn codename(&self) -> Option<&str> {
        self.paragraph.field_str("Codename")
    }

    /// The `Version` field.
    pub fn version(&self) -> Option<&str> {
        self.paragraph.field_str("Version")
    }

    /// The `Date` field, as its raw string.
    pub fn date(&self) -> Option<&str> {
        self.paragraph.field_str("Date")
    }

    /// The `Architectures` field, as words.
    pub fn architectures(&self) -> Option<impl Iterator<Item = &str> + '_> {
        self.paragraph.iter_field_words("Architectures")
    }

    /// The `Components` field, as words.
    pub fn components(&self) -> Option<impl Iterator<Item = &str> + '_> {
        self.paragraph.iter_field_words("Components")
    }

    /// Iterate over entries in the `MD5Sum` table.
    pub fn iter_md5_entries(
        &self,
    ) -> Result<impl Iterator<Item = Result<ReleaseFileEntry>> + '_> {
        let lines = self
            .paragraph
            .iter_field_lines(ChecksumType::Md5.field_name())
            .ok_or_else(|| {
                AthenaError::ControlRequiredFieldMissing(
                    ChecksumType::Md5.field_name().to_string(),
                )
            })?;

        Ok(lines.filter(|line| !line.is_empty()).map(|line| {
            // Lines are of the form: <digest> <size> <path>
            let mut parts = line.split_ascii_whitespace();

            let digest = parts.next().ok_or(AthenaError::ReleaseMissingDigest)?;
            let size = parts.next().ok_or(AthenaError::ReleaseMissingSize)?;
            let path = parts.next().ok_or(AthenaError::ReleaseMissingPath)?;

            if parts.next().is_some() {
                return Err(AthenaError::ReleasePathWithSpaces(line.to_string()));
            }

            Ok(ReleaseFileEntry {
                path: path.to_string(),
                digest: ContentDigest::md5_hex(digest)?,
                size: u64::from_str(size)?,
            })
        }))
    }

    /// Find the `MD5Sum` entry for an exact path.
    ///
    /// Errors if the path is absent or listed more than once.
    pub fn find_md5_entry(&self, path: &str) -> Result<ReleaseFileEntry> {
        let mut found = None;

        for entry in self.iter_md5_entries()? {
            let entry = entry?;

            if entry.path == path {
                if found.is_some() {
                    return Err(AthenaError::ArchiveIndexEntryDuplicated(path.to_string()));
                }

                found = Some(entry);
            }
        }

        found.ok_or_else(|| AthenaError::ArchiveIndexEntryNotFound(path.to_string()))
    }
}

#[cfg(test)]
mod test {
    use {super::*, indoc::indoc};

    const RELEASE: &str = indoc! {"
        Origin: Debian
        Codename: bullseye
        Version: 11.1
        Date: Sat, 09 Oct 2021 09:34:56 UTC
        Architectures: all amd64 arm64
        Components: main contrib non-free
        MD5Sum:
         7fdf4db15250af5368cc52a91e8edbce   738242 contrib/Contents-all
         d0a0325a97c42fd5f66a8c3e29bcea64  1124322 main/binary-amd64/Packages.gz
         e3830f6fc5a946b5a5b46e8277e1d86f    80488 main/source/Sources.gz
    "};

    #[test]
    fn parse_plain_release() -> Result<()> {
        let release = ReleaseFile::from_reader(std::io::Cursor::new(RELEASE))?;

        assert_eq!(release.origin(), Some("Debian"));
        assert_eq!(release.codename(), Some("bullseye"));
        assert_eq!(release.version(), Some("11.1"));
        assert_eq!(
            release.architectures().unwrap().collect::<Vec<_>>(),
            vec!["all", "amd64", "arm64"]
        );

        let entries = release
            .iter_md5_entries()?
            .collect::<Result<Vec<_>>>()?;
        assert_eq!(entries.len(), 3);
        assert_eq!(entries[1].path, "main/binary-amd64/Packages.gz");
        assert_eq!(entries[1].size, 1124322);

        Ok(())
    }

    #[test]
    fn parse_clearsigned_inrelease() -> Result<()> {
        let signed = format!(
            indoc! {"
                -----BEGIN PGP SIGNED MESSAGE-----
                Hash: SHA256

                {}
                -----BEGIN PGP SIGNATURE-----

                iQIzBAEBCAAdFiEEfakesignaturefakesignaturefakesign
                -----END PGP SIGNATURE-----
            "},
            RELEASE.trim_end()
        );

        let release = ReleaseFile::from_reader(std::io::Cursor::new(signed))?;

        assert_eq!(release.codename(), Some("bullseye"));
        assert_eq!(release.iter_md5_entries()?.count(), 3);

        Ok(())
    }

    #[test]
    fn find_entry_semantics() -> Result<()> {
        let release = ReleaseFile::from_reader(std::io::Cursor::new(RELEASE))?;

        let entry = release.find_md5_entry("main/source/Sources.gz")?;
        assert_eq!(entry.digest.digest_hex(), "e3830f6fc5a946b5a5b46e8277e1d86f");

        assert!(matches!(
            release.find_md5_entry("main/missing/Packages"),
            Err(AthenaError::ArchiveIndexEntryNotFound(_))
        ));

        let duplicated = format!(
            "{} d0a0325a97c42fd5f66a8c3e29bcea64  1124322 main/binary-amd64/Packages.gz\n",
            RELEASE
        );
        let release = ReleaseFile::from_reader(std::io::Cursor::new(duplicated))?;
        assert!(matches!(
            release.find_md5_entry("main/binary-amd64/Packages.gz"),
            Err(AthenaError::ArchiveIndexEntryDuplicated(_))
        ));

        Ok(())
    }
}

// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

/*! Deb archive well-formedness.

A `.deb` file is an `ar` archive (magic `!<arch>\n`) whose entry set must
contain `debian-binary` plus `control.tar.<c>` and `data.tar.<c>` for a
supported compression `<c>`. The predicate here walks every entry,
requiring each declared content length to be fully readable, so any
truncation or header corruption is rejected.

A repository artifact passing this predicate is honored across runs; one
failing it is treated as not built.
*/

use {
    crate::error::{AthenaError, Result},
    std::path::Path,
};

/// Compression extensions permitted on `control.tar` / `data.tar` members.
const MEMBER_COMPRESSIONS: &[&str] = &["xz", "gz", "bz2", "zst", "lzma"];

/// Validate that a file is a well-formed deb archive.
pub fn validate_deb(path: &Path) -> Result<()> {
    let error = |message: String| AthenaError::Artifact(format!("{}: {}", path.display(), message));

    let f = std::fs::File::open(path).map_err(|e| error(format!("{}", e)))?;
    let mut archive = ar::Archive::new(std::io::BufReader::new(f));

    let mut names = Vec::new();

    while let Some(entry) = archive.next_entry() {
        let mut entry = entry.map_err(|e| error(format!("bad archive entry: {}", e)))?;

        let name = String::from_utf8_lossy(entry.header().identifier()).to_string();
        let declared = entry.header().size();

        let readable = std::io::copy(&mut entry, &mut std::io::sink())
            .map_err(|e| error(format!("unreadable entry {}: {}", name, e)))?;

        if readable != declared {
            return Err(error(format!(
                "entry {} truncated: declared {} bytes, read {}",
                name, declared, readable
            )));
        }

        names.push(name);
    }

    if !names.iter().any(|n| n == "debian-binary") {
        return Err(error("missing debian-binary member".to_string()));
    }

    for member in ["control.tar", "data.tar"] {
        let found = names.iter().any(|name| {
            name.rsplit_once('.')
                .map(|(stem, ext)| stem == member && MEMBER_COMPRESSIONS.contains(&ext))
                .unwrap_or(false)
        });

        if !found {
            return Err(error(format!(
                "missing compressed {} member",
                member
            )));
        }
    }

    Ok(())
}

/// Whether a file passes the deb well-formedness predicate.
pub fn is_wellformed_deb(path: &Path) -> bool {
    validate_deb(path).is_ok()
}

#[cfg(test)]
mod test {
    use {super::*, crate::testutil::write_minimal_deb};

    #[test]
    fn accepts_minimal_deb() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("mawk_1.3.4-1_amd64.deb");

        write_minimal_deb(&path)?;

        validate_deb(&path)?;
        assert!(is_wellformed_deb(&path));

        Ok(())
    }

    #[test]
    fn rejects_truncated_content() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("truncated.deb");

        write_minimal_deb(&path)?;

        // Drop the final byte of the last member's content.
        let data = std::fs::read(&path)?;
        std::fs::write(&path, &data[..data.len() - 1])?;

        assert!(!is_wellformed_deb(&path));

        Ok(())
    }

    #[test]
    fn rejects_renamed_debian_binary() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("renamed.deb");

        write_minimal_deb(&path)?;

        // Patch the member name in place: `debian-binary` → `foo-binary`.
        let mut data = std::fs::read(&path)?;
        let offset = data
            .windows(13)
            .position(|w| w == b"debian-binary")
            .expect("member name should be present");
        data[offset..offset + 13].copy_from_slice(b"foo-binary   ");
        std::fs::write(&path, data)?;

        assert!(!is_wellformed_deb(&path));

        Ok(())
    }

    #[test]
    fn rejects_corrupted_size_field() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("badsize.deb");

        write_minimal_deb(&path)?;

        // The size field occupies bytes 48..58 of an entry header. The
        // first entry header starts right after the 8-byte magic.
        let mut data = std::fs::read(&path)?;
        data[8 + 48] = b'x';
        std::fs::write(&path, data)?;

        assert!(!is_wellformed_deb(&path));

        Ok(())
    }

    #[test]
    fn rejects_wrong_magic() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("notar.deb");

        std::fs::write(&path, b"!<arch>X not really an archive")?;

        assert!(!is_wellformed_deb(&path));

        Ok(())
    }

    #[test]
    fn rejects_uncompressed_members() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("plain.deb");

        let f = std::fs::File::create(&path)?;
        let mut builder = ar::Builder::new(f);

        for (name, content) in [
            ("debian-binary", b"2.0\n".as_slice()),
            ("control.tar", b"control".as_slice()),
            ("data.tar", b"data".as_slice()),
        ] {
            let header = ar::Header::new(name.as_bytes().to_vec(), content.len() as u64);
            builder.append(&header, content)?;
        }

        drop(builder);

        assert!(!is_wellformed_deb(&path));

        Ok(())
    }

    #[test]
    fn predicate_round_trips() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("stable.deb");

        write_minimal_deb(&path)?;

        // Accepting once implies accepting again on re-read.
        assert!(is_wellformed_deb(&path));
        assert!(is_wellformed_deb(&path));

        Ok(())
    }
}

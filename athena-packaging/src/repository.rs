// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

/*! The local artifact repository.

A flat directory of `.deb`/`.udeb` files. Membership is a directory
listing; insertion is an atomic rename so concurrent readers never
observe a torn artifact; integrity is the deb well-formedness predicate.
*/

use {
    crate::{
        deb::is_wellformed_deb,
        error::{AthenaError, Result},
    },
    std::path::{Path, PathBuf},
};

/// A flat directory of built artifacts, shared across builds.
#[derive(Clone, Debug)]
pub struct LocalRepository {
    root: PathBuf,
}

impl LocalRepository {
    /// Construct an instance over a root directory, creating it if
    /// missing.
    pub fn new(root: impl AsRef<Path>) -> Result<Self> {
        let root = root.as_ref().to_path_buf();

        std::fs::create_dir_all(&root)
            .map_err(|e| AthenaError::RepositoryIoPath(format!("{}", root.display()), e))?;

        Ok(Self { root })
    }

    /// The repository directory.
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Absolute path of an artifact filename.
    pub fn artifact_path(&self, filename: &str) -> PathBuf {
        self.root.join(filename)
    }

    /// Enumerate artifact filenames, sorted.
    pub fn artifact_names(&self) -> Result<Vec<String>> {
        let mut names = Vec::new();

        let entries = std::fs::read_dir(&self.root)
            .map_err(|e| AthenaError::RepositoryIoPath(format!("{}", self.root.display()), e))?;

        for entry in entries {
            let entry =
                entry.map_err(|e| AthenaError::RepositoryIoPath(format!("{}", self.root.display()), e))?;

            if entry.path().is_file() {
                names.push(entry.file_name().to_string_lossy().to_string());
            }
        }

        names.sort();

        Ok(names)
    }

    /// Whether an artifact file is present.
    pub fn contains(&self, filename: &str) -> bool {
        self.artifact_path(filename).is_file()
    }

    /// Whether an artifact is present and passes the deb predicate.
    pub fn is_valid_artifact(&self, filename: &str) -> bool {
        let path = self.artifact_path(filename);

        path.is_file() && is_wellformed_deb(&path)
    }

    /// Whether every named artifact is present and valid.
    pub fn contains_all_valid<'a>(&self, names: impl IntoIterator<Item = &'a str>) -> bool {
        names.into_iter().all(|name| self.is_valid_artifact(name))
    }

    /// Add an artifact by staged copy and atomic rename.
    ///
    /// Readers probing the repository concurrently observe either no file
    /// or the complete file.
    pub fn add_artifact(&self, source: &Path) -> Result<PathBuf> {
        let filename = source
            .file_name()
            .ok_or_else(|| {
                AthenaError::RepositoryIoPath(
                    format!("{}", source.display()),
                    std::io::Error::new(std::io::ErrorKind::InvalidInput, "no filename"),
                )
            })?
            .to_string_lossy()
            .to_string();

        let mut staged = tempfile::NamedTempFile::new_in(&self.root)
            .map_err(|e| AthenaError::RepositoryIoPath(format!("{}", self.root.display()), e))?;

        let mut input = std::fs::File::open(source)
            .map_err(|e| AthenaError::RepositoryIoPath(format!("{}", source.display()), e))?;

        std::io::copy(&mut input, staged.as_file_mut())
            .map_err(|e| AthenaError::RepositoryIoPath(filename.clone(), e))?;

        let dest = self.artifact_path(&filename);

        staged
            .persist(&dest)
            .map_err(|e| AthenaError::RepositoryIoPath(filename, e.error))?;

        Ok(dest)
    }

    /// Remove named artifacts that fail the deb predicate.
    ///
    /// Used after a cancelled or failed build: partial outputs stay only
    /// if they are valid. Returns the removed filenames.
    pub fn prune_invalid<'a>(
        &self,
        names: impl IntoIterator<Item = &'a str>,
    ) -> Result<Vec<String>> {
        let mut removed = Vec::new();

        for name in names {
            let path = self.artifact_path(name);

            if path.is_file() && !is_wellformed_deb(&path) {
                std::fs::remove_file(&path)
                    .map_err(|e| AthenaError::RepositoryIoPath(name.to_string(), e))?;

                removed.push(name.to_string());
            }
        }

        Ok(removed)
    }
}

#[cfg(test)]
mod test {
    use {super::*, crate::testutil::write_minimal_deb};

    #[test]
    fn membership_and_validity() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let repo = LocalRepository::new(dir.path().join("repo"))?;

        assert!(repo.artifact_names()?.is_empty());
        assert!(!repo.contains("mawk_1.3.4-1_amd64.deb"));

        write_minimal_deb(&repo.artifact_path("mawk_1.3.4-1_amd64.deb"))?;
        std::fs::write(repo.artifact_path("junk_1.0_amd64.deb"), "not a deb")?;

        assert_eq!(
            repo.artifact_names()?,
            vec!["junk_1.0_amd64.deb", "mawk_1.3.4-1_amd64.deb"]
        );

        assert!(repo.is_valid_artifact("mawk_1.3.4-1_amd64.deb"));
        assert!(!repo.is_valid_artifact("junk_1.0_amd64.deb"));

        assert!(repo.contains_all_valid(["mawk_1.3.4-1_amd64.deb"]));
        assert!(!repo.contains_all_valid(["mawk_1.3.4-1_amd64.deb", "junk_1.0_amd64.deb"]));

        Ok(())
    }

    #[test]
    fn add_artifact_atomic_rename() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let repo = LocalRepository::new(dir.path().join("repo"))?;

        let staged = dir.path().join("incoming_1.0_amd64.deb");
        write_minimal_deb(&staged)?;

        let dest = repo.add_artifact(&staged)?;

        assert_eq!(dest, repo.artifact_path("incoming_1.0_amd64.deb"));
        assert!(repo.is_valid_artifact("incoming_1.0_amd64.deb"));

        // The source copy survives.
        assert!(staged.is_file());

        Ok(())
    }

    #[test]
    fn prune_removes_only_invalid() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let repo = LocalRepository::new(dir.path().join("repo"))?;

        write_minimal_deb(&repo.artifact_path("good_1.0_amd64.deb"))?;
        std::fs::write(repo.artifact_path("partial_1.0_amd64.deb"), "torn")?;

        let removed =
            repo.prune_invalid(["good_1.0_amd64.deb", "partial_1.0_amd64.deb", "absent.deb"])?;

        assert_eq!(removed, vec!["partial_1.0_amd64.deb"]);
        assert!(repo.contains("good_1.0_amd64.deb"));
        assert!(!repo.contains("partial_1.0_amd64.deb"));

        Ok(())
    }
}

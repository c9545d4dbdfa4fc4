// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

/*! Filesystem-backed archive access.

Serves the same interface as the HTTP client from a local directory tree.
Used for mirrors on disk and throughout the test suite.
*/

use {
    crate::{
        archive::ArchiveClient,
        error::{AthenaError, Result},
        io::DataResolver,
    },
    async_trait::async_trait,
    futures::AsyncRead,
    std::{
        path::{Path, PathBuf},
        pin::Pin,
    },
    url::Url,
};

/// An archive reader bound to a local directory.
#[derive(Clone, Debug)]
pub struct FilesystemArchiveClient {
    root_dir: PathBuf,
}

impl FilesystemArchiveClient {
    /// Construct a new instance bound to the root directory specified.
    ///
    /// No validation of the passed path is performed.
    pub fn new(path: impl AsRef<Path>) -> Self {
        Self {
            root_dir: path.as_ref().to_path_buf(),
        }
    }
}

#[async_trait]
impl DataResolver for FilesystemArchiveClient {
    async fn get_path(&self, path: &str) -> Result<Pin<Box<dyn AsyncRead + Send>>> {
        let path = self.root_dir.join(path);

        let f = std::fs::File::open(&path)
            .map_err(|e| AthenaError::ArchiveIoPath(format!("{}", path.display()), e))?;

        Ok(Box::pin(futures::io::AllowStdIo::new(f)))
    }

    async fn get_path_metadata(&self, path: &str) -> Result<Option<u64>> {
        let path = self.root_dir.join(path);

        match std::fs::metadata(&path) {
            Ok(metadata) => Ok(Some(metadata.len())),
            Err(e) => Err(AthenaError::ArchiveIoPath(
                format!("{}", path.display()),
                e,
            )),
        }
    }
}

impl ArchiveClient for FilesystemArchiveClient {
    fn url(&self) -> Result<Url> {
        Url::from_directory_path(&self.root_dir).map_err(|_| {
            AthenaError::ArchiveIoPath(
                format!("{}", self.root_dir.display()),
                std::io::Error::new(
                    std::io::ErrorKind::Other,
                    "error converting filesystem path to URL",
                ),
            )
        })
    }
}

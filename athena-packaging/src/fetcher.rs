// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

/*! Source file fetching.

Downloads the build plan's file manifest into the download directory.
Files whose local copy already carries the expected MD5 digest are
skipped, which makes a rerun over a completed plan transfer zero bytes.
Transport failures mark the file as failed and the fetcher proceeds;
rerunning the tool is the retry.
*/

use {
    crate::{
        cancel::CancelFlag,
        error::Result,
        io::{md5_path, ChecksumType, DataResolver},
        planner::FileManifestEntry,
    },
    futures::{AsyncReadExt, StreamExt},
    std::{collections::BTreeMap, io::Write, path::PathBuf},
};

/// Progress events emitted while fetching.
///
/// The sink must be non-blocking; slow consumers should drop events.
#[derive(Clone, Debug)]
pub enum FetchEvent {
    /// Fetching begins: total file count and aggregate byte size.
    PlanBegin { files: usize, total_bytes: u64 },

    /// A file's local copy was already valid.
    FileSkipped { filename: String, size: u64 },

    /// A download is starting.
    FileBegin { filename: String, size: u64 },

    /// A chunk of a file was written.
    Progress { bytes: u64 },

    /// A file finished downloading and validated.
    FileComplete { filename: String },

    /// A file failed to download or validate.
    FileFailed { filename: String, message: String },
}

/// Non-blocking observer of [FetchEvent]s.
pub type FetchEventSink = dyn Fn(FetchEvent) + Send + Sync;

/// Outcome summary of a fetch run.
#[derive(Debug, Default)]
pub struct FetchReport {
    /// Files downloaded and validated this run.
    pub downloaded: Vec<String>,

    /// Files whose local copies were already valid.
    pub skipped: Vec<String>,

    /// Files that are still invalid after this run, with reasons.
    pub failed: Vec<(String, String)>,
}

impl FetchReport {
    /// Whether every manifest file is now locally valid.
    pub fn is_complete(&self) -> bool {
        self.failed.is_empty()
    }
}

enum FileOutcome {
    Downloaded,
    Skipped,
    Failed(String),
}

/// Downloads source files from an upstream archive.
pub struct SourceFetcher<'a> {
    resolver: &'a (dyn DataResolver + Sync),
    download_dir: PathBuf,
    concurrency: usize,
    cancel: CancelFlag,
}

impl<'a> SourceFetcher<'a> {
    pub fn new(
        resolver: &'a (dyn DataResolver + Sync),
        download_dir: impl Into<PathBuf>,
        concurrency: usize,
    ) -> Self {
        Self {
            resolver,
            download_dir: download_dir.into(),
            concurrency: concurrency.max(1),
            cancel: CancelFlag::new(),
        }
    }

    /// Use a shared cancellation flag.
    pub fn with_cancel(mut self, cancel: CancelFlag) -> Self {
        self.cancel = cancel;
        self
    }

    /// Fetch every file in a manifest, honoring the MD5 skip gate.
    pub async fn fetch_manifest(
        &self,
        manifest: &BTreeMap<String, FileManifestEntry>,
        events: Option<&FetchEventSink>,
    ) -> Result<FetchReport> {
        std::fs::create_dir_all(&self.download_dir)?;

        let emit = |event: FetchEvent| {
            if let Some(sink) = events {
                sink(event);
            }
        };

        emit(FetchEvent::PlanBegin {
            files: manifest.len(),
            total_bytes: manifest.values().map(|e| e.size).sum(),
        });

        let tasks = manifest.iter().map(|(filename, entry)| async {
            if self.cancel.is_cancelled() {
                return (
                    filename.clone(),
                    FileOutcome::Failed("cancelled".to_string()),
                );
            }

            let outcome = self.fetch_file(filename, entry, &emit).await;

            (filename.clone(), outcome)
        });

        let outcomes = futures::stream::iter(tasks)
            .buffer_unordered(self.concurrency)
            .collect::<Vec<_>>()
            .await;

        let mut report = FetchReport::default();

        for (filename, outcome) in outcomes {
            match outcome {
                FileOutcome::Downloaded => report.downloaded.push(filename),
                FileOutcome::Skipped => report.skipped.push(filename),
                FileOutcome::Failed(message) => {
                    log::warn!("fetch failed for {}: {}", filename, message);
                    report.failed.push((filename, message));
                }
            }
        }

        report.downloaded.sort();
        report.skipped.sort();
        report.failed.sort();

        log::info!(
            "fetch complete: {} downloaded, {} skipped, {} failed",
            report.downloaded.len(),
            report.skipped.len(),
            report.failed.len(),
        );

        Ok(report)
    }

    async fn fetch_file(
        &self,
        filename: &str,
        entry: &FileManifestEntry,
        emit: &(dyn Fn(FetchEvent) + Sync),
    ) -> FileOutcome {
        let local = self.download_dir.join(filename);

        match md5_path(&local) {
            Ok(Some(digest)) if digest == entry.md5 => {
                emit(FetchEvent::FileSkipped {
                    filename: filename.to_string(),
                    size: entry.size,
                });

                return FileOutcome::Skipped;
            }
            Ok(_) => {}
            Err(e) => return FileOutcome::Failed(format!("local digest check: {}", e)),
        }

        // Probe before streaming so availability problems surface as a
        // failure for this file rather than a torn download.
        let size = match self.resolver.get_path_metadata(&entry.path).await {
            Ok(size) => size.unwrap_or(entry.size),
            Err(e) => return FileOutcome::Failed(format!("{}", e)),
        };

        emit(FetchEvent::FileBegin {
            filename: filename.to_string(),
            size,
        });

        match self.download_file(&local, entry, emit).await {
            Ok(()) => {
                emit(FetchEvent::FileComplete {
                    filename: filename.to_string(),
                });

                FileOutcome::Downloaded
            }
            Err(message) => {
                emit(FetchEvent::FileFailed {
                    filename: filename.to_string(),
                    message: message.clone(),
                });

                FileOutcome::Failed(message)
            }
        }
    }

    async fn download_file(
        &self,
        local: &std::path::Path,
        entry: &FileManifestEntry,
        emit: &(dyn Fn(FetchEvent) + Sync),
    ) -> std::result::Result<(), String> {
        let mut reader = self
            .resolver
            .get_path(&entry.path)
            .await
            .map_err(|e| format!("{}", e))?;

        let mut out = std::fs::File::create(local).map_err(|e| format!("{}", e))?;
        let mut hasher = ChecksumType::Md5.new_hasher();
        let mut buf = [0u8; 8192];

        loop {
            let count = reader.read(&mut buf).await.map_err(|e| format!("{}", e))?;

            if count == 0 {
                break;
            }

            hasher.update(&buf[0..count]);
            out.write_all(&buf[0..count]).map_err(|e| format!("{}", e))?;

            emit(FetchEvent::Progress {
                bytes: count as u64,
            });
        }

        let digest = hex::encode(hasher.finalize_reset());

        if digest == entry.md5 {
            Ok(())
        } else {
            Err(format!(
                "digest mismatch: expected {}, got {}",
                entry.md5, digest
            ))
        }
    }
}

#[cfg(test)]
mod test {
    use {
        super::*,
        crate::archive::filesystem::FilesystemArchiveClient,
        digest::Digest,
        std::sync::{
            atomic::{AtomicU64, Ordering},
            Arc,
        },
    };

    fn manifest_entry(path: &str, data: &[u8]) -> FileManifestEntry {
        FileManifestEntry {
            path: path.to_string(),
            size: data.len() as u64,
            md5: hex::encode(md5::Md5::digest(data)),
        }
    }

    fn fixture() -> (tempfile::TempDir, BTreeMap<String, FileManifestEntry>) {
        let root = tempfile::tempdir().unwrap();
        let pool = root.path().join("pool/main/m/mawk");
        std::fs::create_dir_all(&pool).unwrap();

        let mut manifest = BTreeMap::new();

        for (name, data) in [
            ("mawk_1.3.4.orig.tar.gz", b"orig tarball".as_slice()),
            ("mawk_1.3.4-1.dsc", b"dsc contents".as_slice()),
        ] {
            std::fs::write(pool.join(name), data).unwrap();
            manifest.insert(
                name.to_string(),
                manifest_entry(&format!("pool/main/m/mawk/{}", name), data),
            );
        }

        (root, manifest)
    }

    #[tokio::test]
    async fn fetch_downloads_and_validates() -> Result<()> {
        let (root, manifest) = fixture();
        let download = tempfile::tempdir()?;

        let client = FilesystemArchiveClient::new(root.path());
        let fetcher = SourceFetcher::new(&client, download.path(), 2);

        let bytes = Arc::new(AtomicU64::new(0));
        let bytes_clone = bytes.clone();
        let report = fetcher
            .fetch_manifest(
                &manifest,
                Some(&move |event| {
                    if let FetchEvent::Progress { bytes: b } = event {
                        bytes_clone.fetch_add(b, Ordering::SeqCst);
                    }
                }),
            )
            .await?;

        assert_eq!(report.downloaded.len(), 2);
        assert!(report.is_complete());
        assert_eq!(bytes.load(Ordering::SeqCst), 12 + 12);

        assert!(download.path().join("mawk_1.3.4-1.dsc").is_file());

        Ok(())
    }

    #[tokio::test]
    async fn fetch_is_idempotent() -> Result<()> {
        let (root, manifest) = fixture();
        let download = tempfile::tempdir()?;

        let client = FilesystemArchiveClient::new(root.path());
        let fetcher = SourceFetcher::new(&client, download.path(), 2);

        let report = fetcher.fetch_manifest(&manifest, None).await?;
        assert_eq!(report.downloaded.len(), 2);

        // Remove the upstream copies entirely: a second run must not
        // touch the transport at all.
        std::fs::remove_dir_all(root.path().join("pool"))?;

        let report = fetcher.fetch_manifest(&manifest, None).await?;
        assert_eq!(report.downloaded.len(), 0);
        assert_eq!(report.skipped.len(), 2);
        assert!(report.is_complete());

        Ok(())
    }

    #[tokio::test]
    async fn transport_failure_is_per_file() -> Result<()> {
        let (root, mut manifest) = fixture();
        let download = tempfile::tempdir()?;

        manifest.insert(
            "missing.tar.gz".to_string(),
            manifest_entry("pool/main/m/mawk/missing.tar.gz", b"never uploaded"),
        );

        let client = FilesystemArchiveClient::new(root.path());
        let fetcher = SourceFetcher::new(&client, download.path(), 2);

        let report = fetcher.fetch_manifest(&manifest, None).await?;

        assert_eq!(report.downloaded.len(), 2);
        assert_eq!(report.failed.len(), 1);
        assert_eq!(report.failed[0].0, "missing.tar.gz");
        assert!(!report.is_complete());

        Ok(())
    }

    #[tokio::test]
    async fn corrupted_local_copy_is_redownloaded() -> Result<()> {
        let (root, manifest) = fixture();
        let download = tempfile::tempdir()?;

        std::fs::write(download.path().join("mawk_1.3.4-1.dsc"), "tampered")?;

        let client = FilesystemArchiveClient::new(root.path());
        let fetcher = SourceFetcher::new(&client, download.path(), 1);

        let report = fetcher.fetch_manifest(&manifest, None).await?;
        assert!(report.downloaded.contains(&"mawk_1.3.4-1.dsc".to_string()));

        assert_eq!(
            std::fs::read_to_string(download.path().join("mawk_1.3.4-1.dsc"))?,
            "dsc contents"
        );

        Ok(())
    }

    #[tokio::test]
    async fn cancellation_stops_new_downloads() -> Result<()> {
        let (root, manifest) = fixture();
        let download = tempfile::tempdir()?;

        let cancel = CancelFlag::new();
        cancel.cancel();

        let client = FilesystemArchiveClient::new(root.path());
        let fetcher = SourceFetcher::new(&client, download.path(), 2).with_cancel(cancel);

        let report = fetcher.fetch_manifest(&manifest, None).await?;

        assert!(report.downloaded.is_empty());
        assert_eq!(report.failed.len(), 2);

        Ok(())
    }
}

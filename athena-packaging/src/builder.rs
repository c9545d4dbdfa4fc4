// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

/*! The build executor.

Drives isolated per-source builds against the shared artifact repository.
Each build launches a container from the pre-built builder image with
three bind mounts (sources, repository, patches) and runs the
distribution build tool inside it. A source is considered already built
iff every artifact it produces is present in the repository and passes
the deb well-formedness predicate.

Builds are mutually independent; a bounded number run in parallel. A
non-zero build exit is recorded and the next source proceeds, while
container driver errors abort the run.
*/

use {
    crate::{
        cancel::CancelFlag,
        container::{ContainerDriver, ContainerMount, ContainerSpec},
        error::Result,
        io::md5_path,
        repository::LocalRepository,
        source_package::SourcePackage,
    },
    futures::StreamExt,
    std::{collections::HashSet, path::PathBuf, sync::Arc},
};

/// Image tag of the build container.
pub const BUILD_IMAGE_TAG: &str = "athenalinux:build";

/// Result of attempting one source build.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum BuildOutcome {
    /// The build ran and all artifacts validated.
    Built,

    /// Every artifact was already present and valid.
    AlreadyBuilt,

    /// The source is on the skip list; nothing was launched.
    Skipped,

    /// Source files are missing or invalid locally; nothing was launched.
    MissingFiles(Vec<String>),

    /// The container exited non-zero.
    Failed { exit_code: i64 },

    /// The build exited zero but artifacts failed validation.
    ArtifactsInvalid(Vec<String>),

    /// Cancellation preempted the build.
    Cancelled,
}

impl BuildOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Built | Self::AlreadyBuilt)
    }
}

/// Aggregate outcome of a build phase.
#[derive(Debug, Default)]
pub struct BuildReport {
    pub built: Vec<String>,
    pub already_built: Vec<String>,
    pub skipped: Vec<String>,
    pub failed: Vec<(String, String)>,
    pub cancelled: bool,
}

impl BuildReport {
    fn record(&mut self, name: &str, outcome: BuildOutcome) {
        match outcome {
            BuildOutcome::Built => self.built.push(name.to_string()),
            BuildOutcome::AlreadyBuilt => self.already_built.push(name.to_string()),
            BuildOutcome::Skipped => self.skipped.push(name.to_string()),
            BuildOutcome::MissingFiles(files) => self
                .failed
                .push((name.to_string(), format!("missing files: {}", files.join(", ")))),
            BuildOutcome::Failed { exit_code } => self
                .failed
                .push((name.to_string(), format!("build exited {}", exit_code))),
            BuildOutcome::ArtifactsInvalid(files) => self.failed.push((
                name.to_string(),
                format!("invalid artifacts: {}", files.join(", ")),
            )),
            BuildOutcome::Cancelled => {
                self.cancelled = true;
            }
        }
    }
}

/// Executes containerized builds for a plan's sources.
pub struct PackageBuilder<'a> {
    driver: &'a dyn ContainerDriver,
    repository: &'a LocalRepository,

    source_dir: PathBuf,
    patch_dir: PathBuf,
    log_dir: PathBuf,
    config_dir: PathBuf,

    architecture: String,

    skip_sources: HashSet<String>,
    skip_tests: HashSet<String>,

    concurrency: usize,
    cancel: CancelFlag,
}

impl<'a> PackageBuilder<'a> {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        driver: &'a dyn ContainerDriver,
        repository: &'a LocalRepository,
        source_dir: impl Into<PathBuf>,
        patch_dir: impl Into<PathBuf>,
        log_dir: impl Into<PathBuf>,
        config_dir: impl Into<PathBuf>,
        architecture: impl ToString,
    ) -> Self {
        Self {
            driver,
            repository,
            source_dir: source_dir.into(),
            patch_dir: patch_dir.into(),
            log_dir: log_dir.into(),
            config_dir: config_dir.into(),
            architecture: architecture.to_string(),
            skip_sources: HashSet::new(),
            skip_tests: HashSet::new(),
            concurrency: 1,
            cancel: CancelFlag::new(),
        }
    }

    /// Sources to short-circuit as known bad.
    pub fn skip_sources(mut self, sources: HashSet<String>) -> Self {
        self.skip_sources = sources;
        self
    }

    /// Sources whose test suites are disabled during the build.
    pub fn skip_tests(mut self, sources: HashSet<String>) -> Self {
        self.skip_tests = sources;
        self
    }

    /// Maximum number of concurrent builds.
    pub fn concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = concurrency.max(1);
        self
    }

    /// Use a shared cancellation flag.
    pub fn with_cancel(mut self, cancel: CancelFlag) -> Self {
        self.cancel = cancel;
        self
    }

    /// Ensure the builder image exists, building it from the Dockerfile
    /// in the config directory when missing.
    pub async fn ensure_image(&self) -> Result<()> {
        if self.driver.image_exists(BUILD_IMAGE_TAG).await? {
            log::info!("using build image {}", BUILD_IMAGE_TAG);
        } else {
            log::info!("build image not found, building {}", BUILD_IMAGE_TAG);

            self.driver
                .build_image(&self.config_dir, BUILD_IMAGE_TAG)
                .await?;
        }

        Ok(())
    }

    /// Whether every artifact of a source is present and valid.
    pub fn check_build(&self, source: &SourcePackage) -> bool {
        !source.artifacts().is_empty()
            && self
                .repository
                .contains_all_valid(source.artifacts().iter().map(|a| a.as_str()))
    }

    /// Patch filenames for a source, in application order.
    pub fn patch_list(&self, source: &SourcePackage) -> Result<Vec<String>> {
        let dir = self.versioned_patch_dir(source);

        if !dir.is_dir() {
            return Ok(Vec::new());
        }

        let mut patches = Vec::new();

        for entry in std::fs::read_dir(&dir)? {
            let entry = entry?;
            let name = entry.file_name().to_string_lossy().to_string();

            if name.ends_with(".patch") {
                patches.push(name);
            }
        }

        patches.sort();

        Ok(patches)
    }

    fn versioned_patch_dir(&self, source: &SourcePackage) -> PathBuf {
        self.patch_dir
            .join("source")
            .join(source.name())
            .join(source.version_str())
    }

    /// The directory to mount at `/patch`: the source-specific patch
    /// directory, or the shared empty directory when no patches exist.
    fn mounted_patch_dir(&self, source: &SourcePackage) -> Result<PathBuf> {
        let dir = self.versioned_patch_dir(source);

        if dir.is_dir() {
            return Ok(dir);
        }

        let empty = self.patch_dir.join("empty");
        std::fs::create_dir_all(&empty)?;

        Ok(empty)
    }

    /// Source files absent from the source directory or failing their
    /// MD5 digests.
    fn missing_files(&self, source: &SourcePackage) -> Result<Vec<String>> {
        let mut missing = Vec::new();

        for file in source.files() {
            let local = self.source_dir.join(&file.filename);

            match md5_path(&local)? {
                Some(digest) if digest == file.digest.digest_hex() => {}
                _ => missing.push(file.filename.clone()),
            }
        }

        Ok(missing)
    }

    /// The shell pipeline run inside the build container.
    fn build_command(&self, source: &SourcePackage, dsc: &str, patches: &[String]) -> String {
        let mut depends = source
            .build_depends()
            .iter()
            .map(|a| a.name().to_string())
            .collect::<Vec<_>>();

        // Alternative groups install their first alternative.
        for dependency in source.alternative_build_depends() {
            if let Some(atom) = dependency.atoms().first() {
                depends.push(atom.name().to_string());
            }
        }

        let depends = depends.join(" ");
        let prefix = source.name();

        let patch_step = if patches.is_empty() {
            String::new()
        } else {
            format!(
                "for PATCH in {}; do patch -p1 < /patch/\"$PATCH\"; done; ",
                patches.join(" ")
            )
        };

        let nocheck = if self.skip_tests.contains(source.name()) {
            "DEB_BUILD_OPTIONS=\"nocheck\" "
        } else {
            ""
        };

        format!(
            "set -e; set -o errexit; set -o nounset; set -o pipefail; \
             sudo apt -y install {depends}; \
             cd /home/athena; cp /source/{prefix}* .; \
             dpkg-source -x {dsc} {prefix}; \
             cd {prefix}; \
             {patch_step}\
             dpkg-checkbuilddeps; {nocheck}dpkg-buildpackage -a {arch} -us -uc; cd ..; \
             cp *.deb /repo/ 2>/dev/null || true; cp *.udeb /repo/ 2>/dev/null || true ;",
            depends = depends,
            prefix = prefix,
            dsc = dsc,
            patch_step = patch_step,
            nocheck = nocheck,
            arch = self.architecture,
        )
    }

    /// Build every source, a bounded number at a time.
    ///
    /// Individual build failures are recorded and the remaining sources
    /// proceed. Container driver errors abort.
    pub async fn build_all(&self, sources: &[Arc<SourcePackage>]) -> Result<BuildReport> {
        self.ensure_image().await?;

        std::fs::create_dir_all(&self.log_dir)?;

        let tasks = sources.iter().map(|source| async {
            let outcome = self.build_source(source).await;

            (source.name().to_string(), outcome)
        });

        let mut stream = futures::stream::iter(tasks).buffer_unordered(self.concurrency);

        let mut report = BuildReport::default();

        while let Some((name, outcome)) = stream.next().await {
            let outcome = outcome?;

            log::info!("build of {}: {:?}", name, outcome);
            report.record(&name, outcome);
        }

        Ok(report)
    }

    /// Attempt to build one source.
    pub async fn build_source(&self, source: &SourcePackage) -> Result<BuildOutcome> {
        if self.skip_sources.contains(source.name()) {
            log::info!("{} is on the skip list", source.name());
            return Ok(BuildOutcome::Skipped);
        }

        if self.check_build(source) {
            return Ok(BuildOutcome::AlreadyBuilt);
        }

        let missing = self.missing_files(source)?;
        if !missing.is_empty() {
            return Ok(BuildOutcome::MissingFiles(missing));
        }

        if self.cancel.is_cancelled() {
            return Ok(BuildOutcome::Cancelled);
        }

        let dsc = match source.dsc_file() {
            Some(dsc) => dsc.to_string(),
            None => {
                log::warn!("no .dsc file for {}", source.name());
                return Ok(BuildOutcome::MissingFiles(vec![format!(
                    "{}.dsc",
                    source.name()
                )]));
            }
        };

        let patches = self.patch_list(source)?;

        let spec = ContainerSpec {
            image: BUILD_IMAGE_TAG.to_string(),
            command: vec![
                "/bin/bash".to_string(),
                "-c".to_string(),
                self.build_command(source, &dsc, &patches),
            ],
            mounts: vec![
                ContainerMount {
                    host: self.source_dir.clone(),
                    container: "/source".to_string(),
                },
                ContainerMount {
                    host: self.repository.root().to_path_buf(),
                    container: "/repo".to_string(),
                },
                ContainerMount {
                    host: self.mounted_patch_dir(source)?,
                    container: "/patch".to_string(),
                },
            ],
        };

        let container_id = self.driver.run(&spec).await?;
        let log_file = self.log_dir.join(source.name());

        let exit_code = {
            let lifecycle = async {
                self.driver.stream_logs(&container_id, &log_file).await?;
                self.driver.wait(&container_id).await
            };

            tokio::select! {
                exit = lifecycle => Some(exit?),
                _ = self.cancel.cancelled() => None,
            }
        };

        self.driver.stop(&container_id).await?;
        self.driver.remove(&container_id).await?;

        let exit_code = match exit_code {
            Some(exit_code) => exit_code,
            None => {
                // Keep only valid partial outputs.
                self.repository
                    .prune_invalid(source.artifacts().iter().map(|a| a.as_str()))?;

                return Ok(BuildOutcome::Cancelled);
            }
        };

        if exit_code != 0 {
            self.repository
                .prune_invalid(source.artifacts().iter().map(|a| a.as_str()))?;

            return Ok(BuildOutcome::Failed { exit_code });
        }

        let invalid = source
            .artifacts()
            .iter()
            .filter(|a| !self.repository.is_valid_artifact(a))
            .cloned()
            .collect::<Vec<_>>();

        if invalid.is_empty() {
            Ok(BuildOutcome::Built)
        } else {
            // Treated as not built so a rerun rebuilds the source.
            self.repository
                .prune_invalid(source.artifacts().iter().map(|a| a.as_str()))?;

            Ok(BuildOutcome::ArtifactsInvalid(invalid))
        }
    }
}

// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

/*! Build configuration.

Loads the INI-style `build.conf` and the plaintext seed list. All
directory paths are resolved relative to the working directory and
created up front so later phases never race on directory existence.
*/

use {
    crate::cli::{Result, ToolError},
    configparser::ini::Ini,
    std::path::{Path, PathBuf},
};

/// Parsed and validated build configuration.
#[derive(Clone, Debug)]
pub struct BuildConfig {
    /// Target architecture (e.g. `amd64`).
    pub arch: String,

    /// Codename of the distribution being built.
    pub build_codename: String,

    /// Version of the distribution being built.
    pub build_version: String,

    /// Upstream host and path, without scheme.
    pub baseurl: String,

    /// Upstream archive id (e.g. `debian`).
    pub baseid: String,

    /// Upstream distribution codename.
    pub basecodename: String,

    /// Upstream distribution version.
    pub baseversion: String,

    /// Sources whose test suites are disabled during builds.
    pub skip_tests: Vec<String>,

    /// Known-bad sources to skip entirely.
    pub skip_sources: Vec<String>,

    pub working_dir: PathBuf,

    pub dir_download: PathBuf,
    pub dir_log: PathBuf,
    pub dir_cache: PathBuf,
    pub dir_temp: PathBuf,
    pub dir_source: PathBuf,
    pub dir_repo: PathBuf,
    pub dir_config: PathBuf,
    pub dir_image: PathBuf,
    pub dir_chroot: PathBuf,
    pub dir_patch: PathBuf,

    /// `<dir_log>/build`, per-source build logs.
    pub dir_build_log: PathBuf,
}

impl BuildConfig {
    /// Load and validate a configuration file.
    pub fn load(working_dir: &Path, config_path: &Path) -> Result<Self> {
        let mut ini = Ini::new();

        ini.load(config_path).map_err(|e| {
            ToolError::Config(format!(
                "cannot read {}: {}",
                config_path.display(),
                e
            ))
        })?;

        let get = |section: &str, key: &str| -> Result<String> {
            ini.get(section, key).ok_or_else(|| {
                ToolError::Config(format!("missing config key [{}] {}", section, key))
            })
        };

        let list = |section: &str, key: &str| -> Vec<String> {
            ini.get(section, key)
                .map(|value| {
                    value
                        .split(',')
                        .map(|s| s.trim().to_string())
                        .filter(|s| !s.is_empty())
                        .collect()
                })
                .unwrap_or_default()
        };

        let dir = |key: &str| -> Result<PathBuf> {
            Ok(working_dir.join(get("directories", key)?))
        };

        let config = Self {
            arch: get("build", "arch")?,
            build_codename: get("build", "codename")?,
            build_version: get("build", "version")?,

            baseurl: get("base", "baseurl")?,
            baseid: get("base", "baseid")?,
            basecodename: get("base", "basecodename")?,
            baseversion: get("base", "baseversion")?,

            skip_tests: list("source", "skiptest"),
            skip_sources: list("source", "skip"),

            working_dir: working_dir.to_path_buf(),

            dir_download: dir("download")?,
            dir_log: dir("log")?,
            dir_cache: dir("cache")?,
            dir_temp: dir("temp")?,
            dir_source: dir("source")?,
            dir_repo: dir("repo")?,
            dir_config: dir("config")?,
            dir_image: dir("image")?,
            dir_chroot: dir("chroot")?,
            dir_patch: dir("patch")?,

            dir_build_log: working_dir.join(get("directories", "log")?).join("build"),
        };

        config.create_directories()?;

        Ok(config)
    }

    /// Create every configured directory, erroring when unwritable.
    fn create_directories(&self) -> Result<()> {
        let dirs = [
            &self.dir_download,
            &self.dir_log,
            &self.dir_cache,
            &self.dir_temp,
            &self.dir_source,
            &self.dir_repo,
            &self.dir_config,
            &self.dir_image,
            &self.dir_chroot,
            &self.dir_patch,
            &self.dir_build_log,
        ];

        for dir in dirs {
            std::fs::create_dir_all(dir).map_err(|e| {
                ToolError::Config(format!("cannot create directory {}: {}", dir.display(), e))
            })?;
        }

        // Patch layout: per-source patches plus the shared empty
        // directory mounted when a source has none.
        for sub in ["source", "empty"] {
            let dir = self.dir_patch.join(sub);

            std::fs::create_dir_all(&dir).map_err(|e| {
                ToolError::Config(format!("cannot create directory {}: {}", dir.display(), e))
            })?;
        }

        Ok(())
    }

    /// The archive base URL: scheme + host/path + archive id.
    pub fn archive_url(&self) -> String {
        let base = if self.baseurl.contains("://") {
            self.baseurl.clone()
        } else {
            format!("http://{}", self.baseurl)
        };

        format!("{}/{}/", base.trim_end_matches('/'), self.baseid)
    }
}

/// Read a package seed list: one name per line, `#` comments and blank
/// lines ignored.
pub fn read_seed_list(path: &Path) -> Result<Vec<String>> {
    let contents = std::fs::read_to_string(path)
        .map_err(|e| ToolError::Config(format!("cannot read {}: {}", path.display(), e)))?;

    Ok(contents
        .lines()
        .map(|line| line.trim())
        .filter(|line| !line.is_empty() && !line.starts_with('#'))
        .map(|line| line.to_string())
        .collect())
}

#[cfg(test)]
mod test {
    use super::*;

    const CONFIG: &str = "\
[Build]
ARCH = amd64
CODENAME = athena
VERSION = 1.0

[Base]
baseurl = deb.debian.org
BASEID = debian
BASECODENAME = bookworm
BASEVERSION = 12

[Source]
SkipTest = systemd, glibc
Skip = mutter

[Directories]
Download = download
Log = log
Cache = cache
Temp = temp
Source = source
Repo = repo
Config = config
Image = image
Chroot = chroot
Patch = patch
";

    fn load_fixture() -> (tempfile::TempDir, BuildConfig) {
        let work = tempfile::tempdir().unwrap();
        let config_path = work.path().join("build.conf");
        std::fs::write(&config_path, CONFIG).unwrap();

        let config = BuildConfig::load(work.path(), &config_path).unwrap();

        (work, config)
    }

    #[test]
    fn loads_all_sections() {
        let (_work, config) = load_fixture();

        assert_eq!(config.arch, "amd64");
        assert_eq!(config.build_codename, "athena");
        assert_eq!(config.basecodename, "bookworm");
        assert_eq!(config.skip_tests, vec!["systemd", "glibc"]);
        assert_eq!(config.skip_sources, vec!["mutter"]);
        assert_eq!(
            config.archive_url(),
            "http://deb.debian.org/debian/".to_string()
        );
    }

    #[test]
    fn creates_directories() {
        let (work, config) = load_fixture();

        assert!(config.dir_repo.is_dir());
        assert!(config.dir_build_log.is_dir());
        assert!(config.dir_patch.join("empty").is_dir());
        assert!(work.path().join("cache").is_dir());
    }

    #[test]
    fn missing_key_is_config_error() {
        let work = tempfile::tempdir().unwrap();
        let config_path = work.path().join("build.conf");
        std::fs::write(&config_path, "[Build]\nARCH = amd64\n").unwrap();

        match BuildConfig::load(work.path(), &config_path) {
            Err(ToolError::Config(message)) => {
                assert!(message.contains("codename"));
            }
            other => panic!("unexpected result: {:?}", other.map(|_| ())),
        }
    }

    #[test]
    fn seed_list_skips_comments() {
        let work = tempfile::tempdir().unwrap();
        let path = work.path().join("pkg.list");
        std::fs::write(&path, "# seeds\nbash\n\n  coreutils  \n# tail\n").unwrap();

        assert_eq!(read_seed_list(&path).unwrap(), vec!["bash", "coreutils"]);
    }
}

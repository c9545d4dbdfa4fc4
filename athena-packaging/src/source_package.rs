// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

/*! Typed source package records.

A [SourcePackage] is the parsed view of one paragraph from a `Sources`
index: the distribution files that make up the source, the build
relations, and the binary artifacts a build of it is expected to produce.
*/

use {
    crate::{
        architecture::arch_matches,
        control::ControlParagraph,
        dependency::{parse_src_depends, Dependency, DependencyList, PackageAtom},
        error::{AthenaError, Result},
        io::{ChecksumType, ContentDigest},
        package_version::PackageVersion,
    },
    std::str::FromStr,
};

/// A single file in a source package's distribution set.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct SourceFileEntry {
    /// The filename, relative to the source's directory.
    pub filename: String,

    /// The size of the file in bytes.
    pub size: u64,

    /// The content digest of the file.
    pub digest: ContentDigest,
}

/// A parsed source package record.
#[derive(Clone, Debug)]
pub struct SourcePackage {
    paragraph: ControlParagraph<'static>,

    name: String,
    version: PackageVersion,
    version_str: String,
    directory: String,
    architectures: Vec<String>,

    files: Vec<SourceFileEntry>,
    checksums_sha256: Vec<SourceFileEntry>,

    build_depends: Vec<PackageAtom>,
    alt_build_depends: Vec<Dependency>,
    build_conflicts: DependencyList,

    artifacts: Vec<String>,
}

impl SourcePackage {
    /// Construct an instance from a control paragraph.
    ///
    /// Validates the minimum required fields (`Package`, `Version`,
    /// `Files`, `Directory`) and derives the produced-artifact list for
    /// the target architecture.
    pub fn from_paragraph(
        paragraph: ControlParagraph<'static>,
        target_arch: &str,
    ) -> Result<Self> {
        let name = paragraph.required_field_str("Package")?.to_string();
        let version_str = paragraph.required_field_str("Version")?.to_string();
        let version = PackageVersion::parse(&version_str)?;
        let directory = paragraph.required_field_str("Directory")?.to_string();

        let architectures = paragraph
            .iter_field_words("Architecture")
            .map(|words| words.map(|w| w.to_string()).collect())
            .unwrap_or_default();

        let files = Self::parse_file_entries(&paragraph, "Files", ChecksumType::Md5)?
            .ok_or_else(|| AthenaError::ControlRequiredFieldMissing("Files".to_string()))?;

        let checksums_sha256 =
            Self::parse_file_entries(&paragraph, "Checksums-Sha256", ChecksumType::Sha256)?
                .unwrap_or_default();

        let mut build_depends = Vec::new();
        let mut alt_build_depends = Vec::new();

        for field in ["Build-Depends", "Build-Depends-Indep", "Build-Depends-Arch"] {
            if let Some(v) = paragraph.field_str(field) {
                let parsed = parse_src_depends(v, target_arch)?;

                for atom in parsed.iter_firm() {
                    if !build_depends.contains(atom) {
                        build_depends.push(atom.clone());
                    }
                }

                for dep in parsed.iter_alternatives() {
                    if !alt_build_depends.contains(dep) {
                        alt_build_depends.push(dep.clone());
                    }
                }
            }
        }

        let build_conflicts = match paragraph.field_str("Build-Conflicts") {
            Some(v) => parse_src_depends(v, target_arch)?,
            None => DependencyList::default(),
        };

        let artifacts = Self::derive_artifacts(&paragraph, &version_str, target_arch)?;

        Ok(Self {
            paragraph,
            name,
            version,
            version_str,
            directory,
            architectures,
            files,
            checksums_sha256,
            build_depends,
            alt_build_depends,
            build_conflicts,
            artifacts,
        })
    }

    fn parse_file_entries(
        paragraph: &ControlParagraph<'static>,
        field: &str,
        checksum: ChecksumType,
    ) -> Result<Option<Vec<SourceFileEntry>>> {
        let lines = match paragraph.iter_field_lines(field) {
            Some(lines) => lines,
            None => return Ok(None),
        };

        let mut entries = Vec::new();

        for line in lines {
            if line.is_empty() {
                continue;
            }

            // Lines are of the form: <digest> <size> <filename>
            let mut parts = line.split_ascii_whitespace();

            let digest = parts.next().ok_or(AthenaError::ReleaseMissingDigest)?;
            let size = parts.next().ok_or(AthenaError::ReleaseMissingSize)?;
            let filename = parts.next().ok_or(AthenaError::ReleaseMissingPath)?;

            if parts.next().is_some() {
                return Err(AthenaError::ReleasePathWithSpaces(line.to_string()));
            }

            entries.push(SourceFileEntry {
                filename: filename.to_string(),
                size: u64::from_str(size)?,
                digest: ContentDigest::from_hex_digest(checksum, digest)?,
            });
        }

        Ok(Some(entries))
    }

    /// Derive the binary artifact filenames a build will deposit.
    ///
    /// Uses the `Package-List` field, restricted to entries compatible with
    /// the target architecture; architecture-independent entries build as
    /// `all`. Older records without `Package-List` fall back to the
    /// `Binary` name list as `.deb` files for the target.
    fn derive_artifacts(
        paragraph: &ControlParagraph<'static>,
        version_str: &str,
        target_arch: &str,
    ) -> Result<Vec<String>> {
        let mut artifacts = Vec::new();

        if let Some(lines) = paragraph.iter_field_lines("Package-List") {
            for line in lines {
                if line.is_empty() {
                    continue;
                }

                let mut words = line.split_ascii_whitespace();

                let name = words
                    .next()
                    .ok_or(AthenaError::ControlPackageListMissingField("name"))?;
                let package_type = words
                    .next()
                    .ok_or(AthenaError::ControlPackageListMissingField("type"))?;

                // Section, priority, and the arch= annotation are absent
                // from older records; entries without an annotation build
                // for the target.
                let arch_spec = words
                    .find_map(|w| w.strip_prefix("arch="))
                    .unwrap_or(target_arch);

                let arch = Self::artifact_architecture(arch_spec, target_arch);

                let arch = match arch {
                    Some(arch) => arch,
                    None => continue,
                };

                artifacts.push(format!(
                    "{}_{}_{}.{}",
                    name, version_str, arch, package_type
                ));
            }
        } else if let Some(names) = paragraph.iter_field_comma_delimited("Binary") {
            for name in names {
                if !name.is_empty() {
                    artifacts.push(format!("{}_{}_{}.deb", name, version_str, target_arch));
                }
            }
        }

        Ok(artifacts)
    }

    /// The architecture component of an artifact filename, or [None] when
    /// the entry does not build for the target.
    fn artifact_architecture<'a>(arch_spec: &str, target_arch: &'a str) -> Option<&'a str> {
        let entries = arch_spec.split(',').map(|a| a.trim());

        let mut all = false;

        for entry in entries {
            if entry == "all" {
                all = true;
            } else if arch_matches(entry, target_arch) {
                return Some(target_arch);
            }
        }

        if all {
            Some("all")
        } else {
            None
        }
    }

    /// Whether any of the record's architectures matches the target.
    pub fn is_for_architecture(&self, target_arch: &str) -> bool {
        self.architectures
            .iter()
            .any(|a| arch_matches(a, target_arch))
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn version(&self) -> &PackageVersion {
        &self.version
    }

    pub fn version_str(&self) -> &str {
        &self.version_str
    }

    /// The archive directory holding the distribution files.
    pub fn directory(&self) -> &str {
        &self.directory
    }

    pub fn architectures(&self) -> &[String] {
        &self.architectures
    }

    /// The distribution files, with MD5 digests.
    pub fn files(&self) -> &[SourceFileEntry] {
        &self.files
    }

    /// The distribution files, with SHA-256 digests, when published.
    pub fn checksums_sha256(&self) -> &[SourceFileEntry] {
        &self.checksums_sha256
    }

    /// The `.dsc` file of this source, if present in the file list.
    pub fn dsc_file(&self) -> Option<&str> {
        self.files
            .iter()
            .map(|f| f.filename.as_str())
            .find(|f| f.ends_with(".dsc"))
    }

    /// Total download size of the distribution files.
    pub fn download_size(&self) -> u64 {
        self.files.iter().map(|f| f.size).sum()
    }

    /// Firm build dependencies across all Build-Depends flavors.
    pub fn build_depends(&self) -> &[PackageAtom] {
        &self.build_depends
    }

    /// Alternative build dependency groups.
    pub fn alternative_build_depends(&self) -> &[Dependency] {
        &self.alt_build_depends
    }

    pub fn build_conflicts(&self) -> &DependencyList {
        &self.build_conflicts
    }

    /// Filenames of the `.deb`/`.udeb` artifacts a build produces.
    pub fn artifacts(&self) -> &[String] {
        &self.artifacts
    }

    /// The raw control paragraph, for diagnostics.
    pub fn paragraph(&self) -> &ControlParagraph<'static> {
        &self.paragraph
    }
}

#[cfg(test)]
mod test {
    use {super::*, crate::control::ControlFile, indoc::indoc};

    const ARCH: &str = "amd64";

    fn parse_one(s: &str) -> Result<SourcePackage> {
        let control = ControlFile::parse_str(s)?;
        let paragraph = control.into_paragraphs().next().unwrap();

        SourcePackage::from_paragraph(paragraph, ARCH)
    }

    const MAWK_SOURCE: &str = indoc! {"
        Package: mawk
        Version: 1.3.4.20200120-3.1
        Architecture: any
        Directory: pool/main/m/mawk
        Build-Depends: debhelper-compat (= 13), byacc, libselinux1-dev [linux-any]
        Build-Conflicts: byacc2
        Package-List:
         mawk deb interpreters required arch=any
         mawk-doc deb doc optional arch=all
         mawk-cross deb interpreters optional arch=arm64
        Files:
         a3f5fc6e3c84fd1b299485ed1ba0e8d2 77434 mawk_1.3.4.20200120.orig.tar.gz
         d6fcaa4ad0bb1b733d1c5ea0dca9c176 33968 mawk_1.3.4.20200120-3.1.debian.tar.xz
         49cc147a18987e0a05e465d8b006f8e9 2172 mawk_1.3.4.20200120-3.1.dsc
        Checksums-Sha256:
         db19e2e9cc20dc6ce657726e0d9048999ae4be9dd4e92107a7b864f2e4b17aeb 77434 mawk_1.3.4.20200120.orig.tar.gz
         49c7b75b3035bfbe98c7454b500009d57f6a90014e863e5f64d65b41bdec1f64 33968 mawk_1.3.4.20200120-3.1.debian.tar.xz
         f8a7b4a7e83ba52bdcbd3cc5a09ee6fcbf1d6f4286aa43778b93e0a75f1dd2fb 2172 mawk_1.3.4.20200120-3.1.dsc
    "};

    #[test]
    fn parse_full_record() -> Result<()> {
        let src = parse_one(MAWK_SOURCE)?;

        assert_eq!(src.name(), "mawk");
        assert_eq!(src.version_str(), "1.3.4.20200120-3.1");
        assert_eq!(src.directory(), "pool/main/m/mawk");
        assert!(src.is_for_architecture(ARCH));

        assert_eq!(src.files().len(), 3);
        assert_eq!(src.checksums_sha256().len(), 3);
        assert_eq!(src.download_size(), 77434 + 33968 + 2172);
        assert_eq!(src.dsc_file(), Some("mawk_1.3.4.20200120-3.1.dsc"));

        let build_deps = src
            .build_depends()
            .iter()
            .map(|a| a.name())
            .collect::<Vec<_>>();
        assert_eq!(build_deps, vec!["debhelper-compat", "byacc", "libselinux1-dev"]);
        assert_eq!(src.build_conflicts().iter().count(), 1);

        Ok(())
    }

    #[test]
    fn artifact_derivation_filters_architectures() -> Result<()> {
        let src = parse_one(MAWK_SOURCE)?;

        // arm64-only entries are excluded; arch=all builds as `all`.
        assert_eq!(
            src.artifacts(),
            &[
                "mawk_1.3.4.20200120-3.1_amd64.deb",
                "mawk-doc_1.3.4.20200120-3.1_all.deb",
            ]
        );

        Ok(())
    }

    #[test]
    fn binary_field_fallback() -> Result<()> {
        let src = parse_one(indoc! {"
            Package: legacy
            Version: 0.9-1
            Architecture: any
            Binary: legacy, legacy-utils
            Directory: pool/main/l/legacy
            Files:
             d41d8cd98f00b204e9800998ecf8427e 100 legacy_0.9-1.dsc
        "})?;

        assert_eq!(
            src.artifacts(),
            &["legacy_0.9-1_amd64.deb", "legacy-utils_0.9-1_amd64.deb"]
        );

        Ok(())
    }

    #[test]
    fn missing_directory_is_error() {
        assert!(parse_one(indoc! {"
            Package: broken
            Version: 1.0
            Files:
             d41d8cd98f00b204e9800998ecf8427e 100 broken_1.0.dsc
        "})
        .is_err());
    }

    #[test]
    fn udeb_artifacts() -> Result<()> {
        let src = parse_one(indoc! {"
            Package: libzstd
            Version: 1.4.8+dfsg-3
            Architecture: any
            Directory: pool/main/libz/libzstd
            Package-List:
             libzstd1 deb libs optional arch=any
             libzstd1-udeb udeb debian-installer optional arch=any
            Files:
             943bed8b8d98a50c8d8a101b12693bb4 1331996 libzstd_1.4.8+dfsg.orig.tar.xz
        "})?;

        assert_eq!(
            src.artifacts(),
            &[
                "libzstd1_1.4.8+dfsg-3_amd64.deb",
                "libzstd1-udeb_1.4.8+dfsg-3_amd64.udeb",
            ]
        );

        Ok(())
    }
}

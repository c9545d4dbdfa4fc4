// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

/*! Source build planning.

Maps a binary closure onto source packages: which sources must be built,
which files must be downloaded to build them, and which binary packages
the builds will need installed as build dependencies.
*/

use {
    crate::{cache::PackageCache, resolver::ResolutionSet, source_package::SourcePackage},
    serde::Serialize,
    std::{
        collections::{BTreeMap, BTreeSet},
        sync::Arc,
    },
};

/// One downloadable file in the build plan.
#[derive(Clone, Debug, Eq, PartialEq, Serialize)]
pub struct FileManifestEntry {
    /// Path of the file relative to the archive root.
    pub path: String,

    /// Expected size in bytes.
    pub size: u64,

    /// Expected hex MD5 digest.
    pub md5: String,
}

/// A binary selection whose source package could not be located.
#[derive(Clone, Debug)]
pub struct UnresolvedSource {
    /// The wanted source package name.
    pub name: String,

    /// The wanted source version.
    pub version: String,

    /// Versions of the same source name that do exist upstream.
    pub alternates: Vec<String>,
}

/// The ordered plan for building the closure from source.
#[derive(Default)]
pub struct BuildPlan {
    sources: Vec<Arc<SourcePackage>>,

    /// `filename → entry` for every file to download.
    manifest: BTreeMap<String, FileManifestEntry>,

    total_size: u64,

    /// Binary package names the builds require installed.
    build_depends: BTreeSet<String>,

    unresolved: Vec<UnresolvedSource>,
}

impl BuildPlan {
    /// The sources to build, ordered by name.
    pub fn sources(&self) -> &[Arc<SourcePackage>] {
        &self.sources
    }

    /// The file download manifest.
    pub fn manifest(&self) -> &BTreeMap<String, FileManifestEntry> {
        &self.manifest
    }

    /// Aggregate download size in bytes.
    pub fn total_size(&self) -> u64 {
        self.total_size
    }

    /// Union of build dependency names across all sources.
    pub fn build_depends(&self) -> &BTreeSet<String> {
        &self.build_depends
    }

    /// Selections whose sources were not found.
    pub fn unresolved_sources(&self) -> &[UnresolvedSource] {
        &self.unresolved
    }
}

/// Compute the build plan for a resolved closure.
///
/// A source matches a selection iff its name equals the selection's
/// source name and its version compares equal to the selection's source
/// version. Mismatches are recorded as unresolved along with the
/// versions that do exist.
pub fn plan_sources(cache: &PackageCache, resolution: &ResolutionSet) -> BuildPlan {
    let mut plan = BuildPlan::default();
    let mut wanted = BTreeMap::new();

    for package in resolution.iter_selected_packages() {
        wanted
            .entry(package.source_name().to_string())
            .or_insert_with(|| package.source_version().to_string());
    }

    for (name, version) in wanted {
        let candidates = cache.source_packages(&name);

        let matched = candidates.iter().find(|source| {
            crate::package_version::PackageVersion::parse(&version)
                .map(|v| source.version().cmp(&v) == std::cmp::Ordering::Equal)
                .unwrap_or(source.version_str() == version)
        });

        let source = match matched {
            Some(source) => source,
            None => {
                plan.unresolved.push(UnresolvedSource {
                    name,
                    version,
                    alternates: candidates
                        .iter()
                        .map(|s| s.version_str().to_string())
                        .collect(),
                });
                continue;
            }
        };

        for file in source.files() {
            let entry = FileManifestEntry {
                path: format!("{}/{}", source.directory(), file.filename),
                size: file.size,
                md5: file.digest.digest_hex(),
            };

            if plan.manifest.insert(file.filename.clone(), entry).is_none() {
                plan.total_size += file.size;
            }
        }

        for atom in source.build_depends() {
            plan.build_depends.insert(atom.name().to_string());
        }

        // Alternative groups contribute their first atom, matching what
        // the build script will install.
        for dependency in source.alternative_build_depends() {
            if let Some(atom) = dependency.atoms().first() {
                plan.build_depends.insert(atom.name().to_string());
            }
        }

        plan.sources.push(source.clone());
    }

    log::info!(
        "build plan: {} sources, {} files, {} bytes, {} unresolved sources",
        plan.sources.len(),
        plan.manifest.len(),
        plan.total_size,
        plan.unresolved.len(),
    );

    plan
}

#[cfg(test)]
mod test {
    use {
        super::*,
        crate::{
            control::ControlFile,
            resolver::{NonInteractivePrompter, Resolver},
        },
        indoc::indoc,
    };

    const ARCH: &str = "amd64";

    const PACKAGES: &str = indoc! {"
        Package: mawk
        Version: 1.3.4-1
        Architecture: amd64
        Depends: libmawk

        Package: libmawk
        Version: 1.3.4-1
        Architecture: amd64
        Source: mawk (1.3.4-1)

        Package: orphan
        Version: 9.9-1
        Architecture: amd64
    "};

    const SOURCES: &str = indoc! {"
        Package: mawk
        Version: 1.3.4-1
        Architecture: any
        Directory: pool/main/m/mawk
        Build-Depends: debhelper-compat (= 13), byacc | bison
        Files:
         11111111111111111111111111111111 100 mawk_1.3.4.orig.tar.gz
         22222222222222222222222222222222 50 mawk_1.3.4-1.dsc

        Package: orphan
        Version: 8.0-1
        Architecture: any
        Directory: pool/main/o/orphan
        Files:
         33333333333333333333333333333333 10 orphan_8.0-1.dsc
    "};

    fn plan() -> BuildPlan {
        let packages = ControlFile::parse_str(PACKAGES)
            .unwrap()
            .into_paragraphs()
            .collect();
        let sources = ControlFile::parse_str(SOURCES)
            .unwrap()
            .into_paragraphs()
            .collect();

        let cache = PackageCache::from_paragraphs(packages, sources, ARCH);
        let resolution =
            Resolver::new(&cache, &NonInteractivePrompter).resolve(["mawk", "orphan"]);

        plan_sources(&cache, &resolution)
    }

    #[test]
    fn sources_cover_all_selections() {
        let plan = plan();

        // Both binaries from the mawk source consolidate to one entry.
        assert_eq!(plan.sources().len(), 1);
        assert_eq!(plan.sources()[0].name(), "mawk");

        // The version-mismatched orphan source is unresolved, with the
        // upstream version recorded as an alternate.
        assert_eq!(plan.unresolved_sources().len(), 1);
        assert_eq!(plan.unresolved_sources()[0].name, "orphan");
        assert_eq!(plan.unresolved_sources()[0].version, "9.9-1");
        assert_eq!(plan.unresolved_sources()[0].alternates, vec!["8.0-1"]);
    }

    #[test]
    fn manifest_and_totals() {
        let plan = plan();

        assert_eq!(plan.manifest().len(), 2);
        assert_eq!(plan.total_size(), 150);

        let entry = plan.manifest().get("mawk_1.3.4.orig.tar.gz").unwrap();
        assert_eq!(entry.path, "pool/main/m/mawk/mawk_1.3.4.orig.tar.gz");
        assert_eq!(entry.size, 100);
        assert_eq!(entry.md5, "11111111111111111111111111111111");
    }

    #[test]
    fn build_depends_union() {
        let plan = plan();

        let depends = plan
            .build_depends()
            .iter()
            .map(|s| s.as_str())
            .collect::<Vec<_>>();

        // Firm deps plus the first atom of each alternative group.
        assert_eq!(depends, vec!["byacc", "debhelper-compat"]);
    }

    #[test]
    fn plan_source_names_superset_of_selection_sources() {
        let packages = ControlFile::parse_str(PACKAGES)
            .unwrap()
            .into_paragraphs()
            .collect();
        let sources = ControlFile::parse_str(SOURCES)
            .unwrap()
            .into_paragraphs()
            .collect();

        let cache = PackageCache::from_paragraphs(packages, sources, ARCH);
        let resolution =
            Resolver::new(&cache, &NonInteractivePrompter).resolve(["mawk", "orphan"]);
        let plan = plan_sources(&cache, &resolution);

        let planned = plan
            .sources()
            .iter()
            .map(|s| s.name().to_string())
            .chain(plan.unresolved_sources().iter().map(|u| u.name.clone()))
            .collect::<std::collections::BTreeSet<_>>();

        for package in resolution.iter_selected_packages() {
            assert!(planned.contains(package.source_name()));
        }
    }
}

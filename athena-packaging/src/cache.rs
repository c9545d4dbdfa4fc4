// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

/*! The package cache.

Indexes the parsed archive records three ways: binary packages by name
(multiple versions per name), virtual names by provider
(`name → version → providers`), and source packages by name. Construction
also harvests the `required` / `important` priority seed lists used for
distribution bootstrap.

The cache is immutable once constructed and is shared by reference with
the resolver and planner.
*/

use {
    crate::{
        archive::ArchiveIndices,
        binary_package::{BinaryPackage, Priority},
        control::ControlParagraph,
        source_package::SourcePackage,
    },
    std::{
        collections::{BTreeMap, HashMap},
        sync::Arc,
    },
};

/// Immutable indices over the upstream archive's records.
pub struct PackageCache {
    target_arch: String,

    packages: HashMap<String, Vec<Arc<BinaryPackage>>>,

    /// Virtual package index: provided name → provided version → names of
    /// providing packages. The empty version string means an unversioned
    /// `Provides`.
    provides: HashMap<String, BTreeMap<String, Vec<String>>>,

    sources: HashMap<String, Vec<Arc<SourcePackage>>>,

    required: Vec<String>,
    important: Vec<String>,
}

impl PackageCache {
    /// Build the cache from acquired archive indices.
    pub fn from_indices(indices: ArchiveIndices, target_arch: &str) -> Self {
        Self::from_paragraphs(indices.packages, indices.sources, target_arch)
    }

    /// Build the cache from raw control paragraphs.
    ///
    /// Records that fail validation are skipped with a warning; records
    /// for foreign architectures are skipped silently.
    pub fn from_paragraphs(
        package_paragraphs: Vec<ControlParagraph<'static>>,
        source_paragraphs: Vec<ControlParagraph<'static>>,
        target_arch: &str,
    ) -> Self {
        let mut cache = Self {
            target_arch: target_arch.to_string(),
            packages: HashMap::new(),
            provides: HashMap::new(),
            sources: HashMap::new(),
            required: Vec::new(),
            important: Vec::new(),
        };

        for paragraph in package_paragraphs {
            if paragraph.is_empty() {
                continue;
            }

            let package = match BinaryPackage::from_paragraph(paragraph, target_arch) {
                Ok(package) => package,
                Err(e) => {
                    log::warn!("skipping invalid binary package record: {}", e);
                    continue;
                }
            };

            if !package.is_for_architecture(target_arch) {
                continue;
            }

            let name = package.name().to_string();

            for provided in package.provides() {
                let version = provided
                    .constraint()
                    .map(|c| c.version().to_string())
                    .unwrap_or_default();

                cache
                    .provides
                    .entry(provided.name().to_string())
                    .or_default()
                    .entry(version)
                    .or_default()
                    .push(name.clone());
            }

            match package.priority() {
                Some(Priority::Required) => cache.required.push(name.clone()),
                Some(Priority::Important) => cache.important.push(name.clone()),
                _ => {}
            }

            cache
                .packages
                .entry(name)
                .or_default()
                .push(Arc::new(package));
        }

        for paragraph in source_paragraphs {
            if paragraph.is_empty() {
                continue;
            }

            let source = match SourcePackage::from_paragraph(paragraph, target_arch) {
                Ok(source) => source,
                Err(e) => {
                    log::warn!("skipping invalid source package record: {}", e);
                    continue;
                }
            };

            if !source.is_for_architecture(target_arch) {
                continue;
            }

            cache
                .sources
                .entry(source.name().to_string())
                .or_default()
                .push(Arc::new(source));
        }

        retain_latest_gcc(&mut cache.required);

        log::info!(
            "cache built: {} binary names, {} virtual names, {} source names",
            cache.packages.len(),
            cache.provides.len(),
            cache.sources.len(),
        );
        log::info!(
            "priority harvest: {} required, {} important",
            cache.required.len(),
            cache.important.len(),
        );

        cache
    }

    /// The architecture this cache was built for.
    pub fn target_arch(&self) -> &str {
        &self.target_arch
    }

    /// All binary package records with the given name.
    pub fn binary_packages(&self, name: &str) -> &[Arc<BinaryPackage>] {
        self.packages.get(name).map(|v| v.as_slice()).unwrap_or(&[])
    }

    /// The virtual package index entry for a provided name.
    pub fn providers(&self, name: &str) -> Option<&BTreeMap<String, Vec<String>>> {
        self.provides.get(name)
    }

    /// Distinct names of packages providing the given name, ordered.
    pub fn provider_names(&self, name: &str) -> Vec<String> {
        let mut names = Vec::new();

        if let Some(by_version) = self.provides.get(name) {
            for providers in by_version.values() {
                for provider in providers {
                    if !names.contains(provider) {
                        names.push(provider.clone());
                    }
                }
            }
        }

        names.sort();
        names
    }

    /// All source package records with the given name.
    pub fn source_packages(&self, name: &str) -> &[Arc<SourcePackage>] {
        self.sources.get(name).map(|v| v.as_slice()).unwrap_or(&[])
    }

    /// Names of packages with priority `required`.
    ///
    /// When several `gcc-N` family packages are required, only the latest
    /// numeric version family is retained.
    pub fn required_seeds(&self) -> &[String] {
        &self.required
    }

    /// Names of packages with priority `important`.
    pub fn important_seeds(&self) -> &[String] {
        &self.important
    }

    /// Number of distinct binary package names.
    pub fn binary_name_count(&self) -> usize {
        self.packages.len()
    }

    /// Number of distinct source package names.
    pub fn source_name_count(&self) -> usize {
        self.sources.len()
    }
}

/// Numeric version component of a `gcc-N[...]` package name.
fn gcc_numeric_version(name: &str) -> Option<Vec<u64>> {
    let suffix = name.strip_prefix("gcc-")?;
    let version = suffix.split('-').next()?;

    version
        .split('.')
        .map(|part| part.parse::<u64>().ok())
        .collect()
}

/// Drop all but the latest `gcc-N` family from a seed list.
fn retain_latest_gcc(seeds: &mut Vec<String>) {
    let latest = seeds
        .iter()
        .filter_map(|name| gcc_numeric_version(name))
        .max();

    let latest = match latest {
        Some(latest) => latest,
        None => return,
    };

    seeds.retain(|name| match gcc_numeric_version(name) {
        Some(version) => version == latest,
        None => true,
    });
}

#[cfg(test)]
mod test {
    use {super::*, crate::control::ControlFile, indoc::indoc};

    const ARCH: &str = "amd64";

    const PACKAGES: &str = indoc! {"
        Package: mawk
        Version: 1.3.4-1
        Architecture: amd64
        Priority: required
        Provides: awk

        Package: gawk
        Version: 1:5.1.0-1
        Architecture: amd64
        Provides: awk

        Package: gcc-9-base
        Version: 9.3.0-22
        Architecture: amd64
        Priority: required

        Package: gcc-10-base
        Version: 10.2.1-6
        Architecture: amd64
        Priority: required

        Package: foreign-only
        Version: 1.0
        Architecture: s390x

        Package: busybox
        Version: 1.30.1-6
        Architecture: amd64
        Priority: important

        Package: broken-record
        Architecture: amd64
    "};

    const SOURCES: &str = indoc! {"
        Package: mawk
        Version: 1.3.4-1
        Architecture: any
        Directory: pool/main/m/mawk
        Files:
         d41d8cd98f00b204e9800998ecf8427e 0 mawk_1.3.4-1.dsc

        Package: alpha-only
        Version: 1.0
        Architecture: alpha
        Directory: pool/main/a/alpha-only
        Files:
         d41d8cd98f00b204e9800998ecf8427e 0 alpha-only_1.0.dsc
    "};

    fn build_cache() -> PackageCache {
        let packages = ControlFile::parse_str(PACKAGES)
            .unwrap()
            .into_paragraphs()
            .collect();
        let sources = ControlFile::parse_str(SOURCES)
            .unwrap()
            .into_paragraphs()
            .collect();

        PackageCache::from_paragraphs(packages, sources, ARCH)
    }

    #[test]
    fn indices() {
        let cache = build_cache();

        assert_eq!(cache.binary_packages("mawk").len(), 1);
        assert_eq!(cache.binary_packages("no-such-package").len(), 0);

        // Invalid and foreign-architecture records are skipped.
        assert_eq!(cache.binary_packages("broken-record").len(), 0);
        assert_eq!(cache.binary_packages("foreign-only").len(), 0);

        assert_eq!(cache.provider_names("awk"), vec!["gawk", "mawk"]);
        assert!(cache.providers("mawk").is_none());

        assert_eq!(cache.source_packages("mawk").len(), 1);
        assert_eq!(cache.source_packages("alpha-only").len(), 0);
    }

    #[test]
    fn priority_harvest_with_gcc_policy() {
        let cache = build_cache();

        // gcc-9-base is dropped in favor of gcc-10-base.
        assert_eq!(
            cache.required_seeds(),
            &["mawk".to_string(), "gcc-10-base".to_string()]
        );
        assert_eq!(cache.important_seeds(), &["busybox".to_string()]);
    }

    #[test]
    fn versioned_provides_index() {
        let packages = ControlFile::parse_str(indoc! {"
            Package: node-acorn
            Version: 8.0.5+ds-1
            Architecture: amd64
            Provides: acorn (= 8.0.5), node-acorn-bigint (= 1.0.0)
        "})
        .unwrap()
        .into_paragraphs()
        .collect();

        let cache = PackageCache::from_paragraphs(packages, Vec::new(), ARCH);

        let by_version = cache.providers("acorn").unwrap();
        assert_eq!(
            by_version.get("8.0.5").map(|v| v.as_slice()),
            Some(&["node-acorn".to_string()][..])
        );

        assert!(cache.providers("node-acorn-bigint").is_some());
    }

    #[test]
    fn construction_is_deterministic() {
        let a = build_cache();
        let b = build_cache();

        let names = |c: &PackageCache| {
            let mut names = c.packages.keys().cloned().collect::<Vec<_>>();
            names.sort();
            names
        };

        assert_eq!(names(&a), names(&b));
        assert_eq!(a.provider_names("awk"), b.provider_names("awk"));
        assert_eq!(a.required_seeds(), b.required_seeds());
        assert_eq!(a.important_seeds(), b.important_seeds());
    }
}

// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

/*! Typed binary package records.

A [BinaryPackage] is the parsed, validated view of one paragraph from a
`Packages` index. The raw paragraph is retained for diagnostics, but all
resolution-relevant fields are parsed up front so later phases never touch
control syntax.
*/

use {
    crate::{
        architecture::arch_matches,
        control::ControlParagraph,
        dependency::{parse_depends, Dependency, DependencyList, PackageAtom},
        error::{AthenaError, Result},
        io::ContentDigest,
        package_version::PackageVersion,
    },
    once_cell::sync::Lazy,
    regex::Regex,
    std::str::FromStr,
};

/// Package priority classes.
#[derive(
    Clone,
    Copy,
    Debug,
    Eq,
    Hash,
    Ord,
    PartialEq,
    PartialOrd,
    strum_macros::Display,
    strum_macros::EnumString,
)]
#[strum(serialize_all = "lowercase")]
pub enum Priority {
    Required,
    Important,
    Standard,
    Optional,
    Extra,
}

/// `Source: name (version)` with both parts optional after the name.
static SOURCE_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^(\S+)(?:\s+\((\S+)\))?$").expect("static regex should parse"));

/// A parsed binary package record.
#[derive(Clone, Debug)]
pub struct BinaryPackage {
    paragraph: ControlParagraph<'static>,

    name: String,
    version: PackageVersion,
    version_str: String,
    architecture: String,

    source_name: String,
    source_version: String,

    priority: Option<Priority>,

    provides: Vec<PackageAtom>,

    depends: Vec<PackageAtom>,
    alt_depends: Vec<Dependency>,
    recommends: Vec<PackageAtom>,
    alt_recommends: Vec<Dependency>,

    breaks: DependencyList,
    conflicts: DependencyList,

    filename: String,
    size: u64,
    md5: Option<ContentDigest>,
}

impl BinaryPackage {
    /// Construct an instance from a control paragraph.
    ///
    /// Validates the minimum required fields (`Package`, `Version`,
    /// `Architecture`) and parses all relation fields against the target
    /// architecture.
    pub fn from_paragraph(
        paragraph: ControlParagraph<'static>,
        target_arch: &str,
    ) -> Result<Self> {
        let name = paragraph.required_field_str("Package")?.to_string();
        let version_str = paragraph.required_field_str("Version")?.to_string();
        let version = PackageVersion::parse(&version_str)?;
        let architecture = paragraph.required_field_str("Architecture")?.to_string();

        // Source name and version default to the binary identity.
        let mut source_name = name.clone();
        let mut source_version = version_str.clone();

        if let Some(source) = paragraph.field_str("Source") {
            if !source.is_empty() {
                let captures = SOURCE_RE.captures(source).ok_or_else(|| {
                    AthenaError::ControlParseError(format!("malformed Source field: {}", source))
                })?;

                source_name = captures[1].to_string();
                if let Some(v) = captures.get(2) {
                    source_version = v.as_str().to_string();
                }
            }
        }

        let priority = paragraph
            .field_str("Priority")
            .and_then(|v| Priority::from_str(v).ok());

        let provides = match paragraph.field_str("Provides") {
            Some(v) => parse_depends(v, target_arch)?
                .iter()
                .filter_map(|d| d.firm_atom().cloned())
                .collect(),
            None => Vec::new(),
        };

        // Depends and Pre-Depends contribute to the same closure.
        let mut depends = Vec::new();
        let mut alt_depends = Vec::new();

        for field in ["Depends", "Pre-Depends"] {
            if let Some(v) = paragraph.field_str(field) {
                let parsed = parse_depends(v, target_arch)?;

                // The same atom commonly appears in both fields.
                for atom in parsed.iter_firm() {
                    if !depends.contains(atom) {
                        depends.push(atom.clone());
                    }
                }

                for dep in parsed.iter_alternatives() {
                    if !alt_depends.contains(dep) {
                        alt_depends.push(dep.clone());
                    }
                }
            }
        }

        let mut recommends = Vec::new();
        let mut alt_recommends = Vec::new();

        if let Some(v) = paragraph.field_str("Recommends") {
            let parsed = parse_depends(v, target_arch)?;

            recommends.extend(parsed.iter_firm().cloned());
            alt_recommends.extend(parsed.iter_alternatives().cloned());
        }

        let breaks = match paragraph.field_str("Breaks") {
            Some(v) => parse_depends(v, target_arch)?,
            None => DependencyList::default(),
        };
        let conflicts = match paragraph.field_str("Conflicts") {
            Some(v) => parse_depends(v, target_arch)?,
            None => DependencyList::default(),
        };

        let filename = paragraph
            .field_str("Filename")
            .unwrap_or_default()
            .to_string();
        let size = match paragraph.field_u64("Size") {
            Some(v) => v?,
            None => 0,
        };
        let md5 = match paragraph.field_str("MD5sum") {
            Some(v) => Some(ContentDigest::md5_hex(v)?),
            None => None,
        };

        Ok(Self {
            paragraph,
            name,
            version,
            version_str,
            architecture,
            source_name,
            source_version,
            priority,
            provides,
            depends,
            alt_depends,
            recommends,
            alt_recommends,
            breaks,
            conflicts,
            filename,
            size,
            md5,
        })
    }

    /// Whether this record is installable on the target architecture.
    pub fn is_for_architecture(&self, target_arch: &str) -> bool {
        arch_matches(&self.architecture, target_arch)
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

    pub fn architecture(&self) -> &str {
        &self.architecture
    }

    /// The source package name this binary was built from.
    pub fn source_name(&self) -> &str {
        &self.source_name
    }

    /// The source package version this binary was built from.
    pub fn source_version(&self) -> &str {
        &self.source_version
    }

    pub fn priority(&self) -> Option<Priority> {
        self.priority
    }

    /// Names this package virtually satisfies.
    pub fn provides(&self) -> &[PackageAtom] {
        &self.provides
    }

    /// Whether this package provides the given name.
    pub fn provides_name(&self, name: &str) -> bool {
        self.provides.iter().any(|a| a.name() == name)
    }

    /// Firm dependencies (Depends ∪ Pre-Depends).
    pub fn firm_depends(&self) -> &[PackageAtom] {
        &self.depends
    }

    /// Alternative dependency groups (Depends ∪ Pre-Depends).
    pub fn alternative_depends(&self) -> &[Dependency] {
        &self.alt_depends
    }

    /// Firm recommendations.
    pub fn firm_recommends(&self) -> &[PackageAtom] {
        &self.recommends
    }

    /// Alternative recommendation groups.
    pub fn alternative_recommends(&self) -> &[Dependency] {
        &self.alt_recommends
    }

    pub fn breaks(&self) -> &DependencyList {
        &self.breaks
    }

    pub fn conflicts(&self) -> &DependencyList {
        &self.conflicts
    }

    /// Relative path of the `.deb` within the archive.
    pub fn filename(&self) -> &str {
        &self.filename
    }

    pub fn size(&self) -> u64 {
        self.size
    }

    pub fn md5(&self) -> Option<&ContentDigest> {
        self.md5.as_ref()
    }

    /// The raw control paragraph, for diagnostics.
    pub fn paragraph(&self) -> &ControlParagraph<'static> {
        &self.paragraph
    }
}

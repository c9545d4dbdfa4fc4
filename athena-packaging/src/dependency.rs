// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

/*! Package relation expressions.

Relation fields (`Depends`, `Pre-Depends`, `Provides`, `Breaks`,
`Conflicts`, `Build-Depends`, ...) hold a comma-separated list of
dependencies, each of which is a `|`-separated list of alternatives. An
individual alternative has the shape

```text
name(:arch)? ( (op version) )? ( [arch-list] )? ( <profile-list> )*
```

Architecture qualifiers (`:any`, `:amd64`) are stripped and treated as "no
architecture constraint". Architecture restriction lists are evaluated
against the target architecture and filtered atoms are dropped. Build
profile lists are dropped entirely.
*/

use {
    crate::{
        architecture::arch_matches,
        error::{AthenaError, Result},
        package_version::{ConstraintOp, PackageVersion, VersionConstraint},
    },
    std::fmt::{Display, Formatter},
};

/// A single package alternative within a dependency.
#[derive(Clone, Debug, Eq, Hash, PartialEq)]
pub struct PackageAtom {
    name: String,
    arch_qualifier: Option<String>,
    constraint: Option<VersionConstraint>,
}

impl PackageAtom {
    /// The package name this atom refers to.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The stripped `:arch` qualifier, retained for display only.
    pub fn arch_qualifier(&self) -> Option<&str> {
        self.arch_qualifier.as_deref()
    }

    /// The version constraint, if any.
    pub fn constraint(&self) -> Option<&VersionConstraint> {
        self.constraint.as_ref()
    }
}

impl Display for PackageAtom {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.name)?;

        if let Some(constraint) = &self.constraint {
            write!(f, " ({})", constraint)?;
        }

        Ok(())
    }
}

/// One dependency: a disjunction of package alternatives.
///
/// A disjunction of length 1 is a *firm* dependency; longer disjunctions
/// are *alternatives* whose choice is deferred to policy.
#[derive(Clone, Debug, Eq, Hash, PartialEq)]
pub struct Dependency {
    alternatives: Vec<PackageAtom>,
}

impl Dependency {
    /// Whether this dependency has exactly one way to satisfy it.
    pub fn is_firm(&self) -> bool {
        self.alternatives.len() == 1
    }

    /// The atoms making up the disjunction.
    pub fn atoms(&self) -> &[PackageAtom] {
        &self.alternatives
    }

    /// The sole atom of a firm dependency.
    pub fn firm_atom(&self) -> Option<&PackageAtom> {
        if self.is_firm() {
            self.alternatives.first()
        } else {
            None
        }
    }
}

impl Display for Dependency {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        let mut first = true;

        for atom in &self.alternatives {
            if !first {
                write!(f, " | ")?;
            }
            write!(f, "{}", atom)?;
            first = false;
        }

        Ok(())
    }
}

/// A parsed relation field: a conjunction of dependencies.
#[derive(Clone, Debug, Default, Eq, Hash, PartialEq)]
pub struct DependencyList {
    dependencies: Vec<Dependency>,
}

impl DependencyList {
    /// Whether no dependencies remain after parsing and filtering.
    pub fn is_empty(&self) -> bool {
        self.dependencies.is_empty()
    }

    /// Iterate over all dependencies.
    pub fn iter(&self) -> impl Iterator<Item = &Dependency> {
        self.dependencies.iter()
    }

    /// Iterate over firm dependencies only.
    pub fn iter_firm(&self) -> impl Iterator<Item = &PackageAtom> {
        self.dependencies.iter().filter_map(|d| d.firm_atom())
    }

    /// Iterate over alternative (multi-atom) dependencies only.
    pub fn iter_alternatives(&self) -> impl Iterator<Item = &Dependency> {
        self.dependencies.iter().filter(|d| !d.is_firm())
    }
}

impl Display for DependencyList {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        let mut first = true;

        for dep in &self.dependencies {
            if !first {
                write!(f, ", ")?;
            }
            write!(f, "{}", dep)?;
            first = false;
        }

        Ok(())
    }
}

/// Parse a binary package relation field.
pub fn parse_depends(s: &str, target_arch: &str) -> Result<DependencyList> {
    parse_relations(s, target_arch)
}

/// Parse a source package build relation field.
///
/// The grammar is identical to binary relations; architecture restriction
/// lists are common here and are filtered against the target.
pub fn parse_src_depends(s: &str, target_arch: &str) -> Result<DependencyList> {
    parse_relations(s, target_arch)
}

fn parse_relations(s: &str, target_arch: &str) -> Result<DependencyList> {
    let mut dependencies = Vec::new();

    for conjunct in s.split(',') {
        let conjunct = conjunct.trim();

        if conjunct.is_empty() {
            continue;
        }

        let mut alternatives = Vec::new();

        for alternative in conjunct.split('|') {
            let alternative = alternative.trim();

            if alternative.is_empty() {
                return Err(AthenaError::DependencyParse(conjunct.to_string()));
            }

            if let Some(atom) = parse_atom(alternative, target_arch)? {
                alternatives.push(atom);
            }
        }

        // Every alternative was restricted away from this architecture.
        if alternatives.is_empty() {
            continue;
        }

        dependencies.push(Dependency { alternatives });
    }

    Ok(DependencyList { dependencies })
}

/// Parse a single alternative.
///
/// Returns `Ok(None)` when an architecture restriction list excludes the
/// atom on the target architecture.
fn parse_atom(s: &str, target_arch: &str) -> Result<Option<PackageAtom>> {
    let err = || AthenaError::DependencyParse(s.to_string());

    let mut rest = s;

    let name_end = rest
        .find(|c: char| c.is_ascii_whitespace() || c == '(' || c == '[' || c == '<')
        .unwrap_or(rest.len());
    let (raw_name, tail) = rest.split_at(name_end);
    rest = tail.trim_start();

    if raw_name.is_empty() {
        return Err(err());
    }

    // An `:arch` qualifier means "no architecture constraint" here.
    let (name, arch_qualifier) = match raw_name.split_once(':') {
        Some((name, qualifier)) => (name, Some(qualifier.to_string())),
        None => (raw_name, None),
    };

    if name.is_empty() {
        return Err(err());
    }

    let mut constraint = None;
    if let Some(tail) = rest.strip_prefix('(') {
        let (inner, tail) = tail.split_once(')').ok_or_else(err)?;
        rest = tail.trim_start();

        let inner = inner.trim();
        let op_end = inner
            .find(|c: char| !matches!(c, '<' | '>' | '='))
            .unwrap_or(inner.len());
        let (op, version) = inner.split_at(op_end);
        let version = version.trim();

        if version.is_empty() {
            return Err(err());
        }

        let op = if op.is_empty() {
            ConstraintOp::Equal
        } else {
            ConstraintOp::parse(op).map_err(|_| err())?
        };

        let version = PackageVersion::parse(version).map_err(|_| err())?;

        constraint = Some(VersionConstraint::new(op, version));
    }

    if let Some(tail) = rest.strip_prefix('[') {
        let (inner, tail) = tail.split_once(']').ok_or_else(err)?;
        rest = tail.trim_start();

        if !arch_restriction_applies(inner, target_arch) {
            return Ok(None);
        }
    }

    // Build profile groups are dropped.
    while let Some(tail) = rest.strip_prefix('<') {
        let (_, tail) = tail.split_once('>').ok_or_else(err)?;
        rest = tail.trim_start();
    }

    if !rest.is_empty() {
        return Err(err());
    }

    Ok(Some(PackageAtom {
        name: name.to_string(),
        arch_qualifier,
        constraint,
    }))
}

/// Evaluate an architecture restriction list against the target.
///
/// Positive lists retain the atom when any entry matches. Negated lists
/// (`!arch` entries) retain the atom when no negated entry matches.
fn arch_restriction_applies(list: &str, target_arch: &str) -> bool {
    let entries = list.split_ascii_whitespace().collect::<Vec<_>>();

    if entries.is_empty() {
        return true;
    }

    if entries.iter().all(|e| e.starts_with('!')) {
        !entries
            .iter()
            .any(|e| arch_matches(e.trim_start_matches('!'), target_arch))
    } else {
        entries
            .iter()
            .filter(|e| !e.starts_with('!'))
            .any(|e| arch_matches(e, target_arch))
    }
}

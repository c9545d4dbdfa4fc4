// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

/*! Transitive dependency resolution.

The resolver computes the closure of a seed set over the firm-depends
relation. It is deliberately not a SAT solver: selection is greedy with
constraint checking after the fact, and anything requiring policy
(alternative groups, ambiguous providers) is deferred or surfaced rather
than auto-decided.

Package graphs cycle freely (libc6 ↔ gcc-base is the classic), so the
closure is a name-keyed map guarded by "already selected", not a tree.
*/

use {
    crate::{
        binary_package::BinaryPackage,
        cache::PackageCache,
        dependency::Dependency,
        error::{AthenaError, Result},
        package_version::VersionConstraint,
    },
    std::{
        collections::{BTreeMap, BTreeSet},
        fmt::{Display, Formatter},
        sync::Arc,
    },
};

/// A capability for asking the operator to pick between options.
///
/// The orchestrator supplies an interactive implementation; tests use a
/// deterministic oracle; CI uses [NonInteractivePrompter] so any prompt
/// is an error.
pub trait Prompter: Sync {
    /// Choose one of `options`, returning its index.
    fn choose(&self, question: &str, options: &[String]) -> Result<usize>;
}

/// A prompter that fails on any question, enforcing non-interactive mode.
pub struct NonInteractivePrompter;

impl Prompter for NonInteractivePrompter {
    fn choose(&self, question: &str, options: &[String]) -> Result<usize> {
        Err(AthenaError::ResolutionAmbiguous {
            question: question.to_string(),
            options: options.to_vec(),
        })
    }
}

/// A selected version failing its accumulated constraints.
#[derive(Clone, Debug)]
pub struct ConstraintViolation {
    /// The resolution entry name.
    pub name: String,
    /// The selected version.
    pub version: String,
    /// The violated constraint.
    pub constraint: String,
}

impl Display for ConstraintViolation {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{} {} does not satisfy ({})",
            self.name, self.version, self.constraint
        )
    }
}

/// The relation kind that produced a [RelationConflict].
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum RelationKind {
    Breaks,
    Conflicts,
}

impl Display for RelationKind {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            Self::Breaks => "Breaks",
            Self::Conflicts => "Conflicts",
        })
    }
}

/// A `Breaks`/`Conflicts` declaration matching the final selection.
#[derive(Clone, Debug)]
pub struct RelationConflict {
    /// The package declaring the relation.
    pub package: String,
    pub kind: RelationKind,
    /// The relation atom, as written.
    pub atom: String,
    /// The selected version of the conflicting package.
    pub selected_version: String,
}

impl Display for RelationConflict {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{} {}: {} (selected {})",
            self.package, self.kind, self.atom, self.selected_version
        )
    }
}

/// The computed closure over a seed set.
///
/// Maps names to selected packages. A name resolved through `Provides`
/// maps to its provider, and the provider also appears under its own
/// name.
#[derive(Default)]
pub struct ResolutionSet {
    entries: BTreeMap<String, Arc<BinaryPackage>>,
    constraints: BTreeMap<String, Vec<VersionConstraint>>,
    unresolved: BTreeSet<String>,
    deferred_alternatives: Vec<(String, Dependency)>,
}

impl ResolutionSet {
    /// Whether a name has a selection.
    pub fn is_selected(&self, name: &str) -> bool {
        self.entries.contains_key(name)
    }

    /// The selection for a name, if any.
    pub fn get(&self, name: &str) -> Option<&Arc<BinaryPackage>> {
        self.entries.get(name)
    }

    /// Iterate over all `(name, selection)` entries.
    pub fn iter_entries(&self) -> impl Iterator<Item = (&String, &Arc<BinaryPackage>)> {
        self.entries.iter()
    }

    /// Iterate over distinct selected packages.
    ///
    /// Entries created for virtual names alias their provider; each
    /// package is yielded once, under its own name.
    pub fn iter_selected_packages(&self) -> impl Iterator<Item = &Arc<BinaryPackage>> {
        self.entries
            .iter()
            .filter(|(name, package)| name.as_str() == package.name())
            .map(|(_, package)| package)
    }

    /// Names for which no candidate could be selected.
    pub fn unresolved(&self) -> &BTreeSet<String> {
        &self.unresolved
    }

    /// Accumulated inbound constraints for a name.
    pub fn constraints_for(&self, name: &str) -> &[VersionConstraint] {
        self.constraints
            .get(name)
            .map(|v| v.as_slice())
            .unwrap_or(&[])
    }

    /// Number of distinct selected packages.
    pub fn package_count(&self) -> usize {
        self.iter_selected_packages().count()
    }

    /// Verify every selection against its accumulated constraints.
    ///
    /// Violations are reported, never unwound; resolution proceeds on the
    /// selected versions regardless.
    pub fn verify_constraints(&self) -> Vec<ConstraintViolation> {
        let mut violations = Vec::new();

        for (name, constraints) in &self.constraints {
            let package = match self.entries.get(name) {
                Some(package) => package,
                None => continue,
            };

            for constraint in constraints {
                if !constraint.satisfied_by(package.version()) {
                    violations.push(ConstraintViolation {
                        name: name.clone(),
                        version: package.version_str().to_string(),
                        constraint: constraint.to_string(),
                    });
                }
            }
        }

        violations
    }

    /// Alternative groups not satisfied by any selection.
    ///
    /// A group is satisfied iff at least one atom's name is selected.
    /// Unsatisfied groups are reported; no alternative is auto-picked,
    /// since that choice is user policy.
    pub fn unsatisfied_alternatives(&self) -> Vec<(String, Dependency)> {
        self.deferred_alternatives
            .iter()
            .filter(|(_, dependency)| {
                !dependency
                    .atoms()
                    .iter()
                    .any(|atom| self.entries.contains_key(atom.name()))
            })
            .cloned()
            .collect()
    }

    /// `Breaks`/`Conflicts` declarations matching the final selection.
    pub fn relation_conflicts(&self) -> Vec<RelationConflict> {
        let mut conflicts = Vec::new();

        for package in self.iter_selected_packages() {
            let relations = [
                (RelationKind::Breaks, package.breaks()),
                (RelationKind::Conflicts, package.conflicts()),
            ];

            for (kind, list) in relations {
                for dependency in list.iter() {
                    for atom in dependency.atoms() {
                        let victim = match self.entries.get(atom.name()) {
                            Some(victim) => victim,
                            None => continue,
                        };

                        // Self-conflicts are routine and meaningless here.
                        if victim.name() == package.name() {
                            continue;
                        }

                        let applies = match atom.constraint() {
                            Some(constraint) => constraint.satisfied_by(victim.version()),
                            None => true,
                        };

                        if applies {
                            conflicts.push(RelationConflict {
                                package: package.name().to_string(),
                                kind,
                                atom: atom.to_string(),
                                selected_version: victim.version_str().to_string(),
                            });
                        }
                    }
                }
            }
        }

        conflicts
    }
}

/// Computes dependency closures against a [PackageCache].
pub struct Resolver<'a> {
    cache: &'a PackageCache,
    prompter: &'a dyn Prompter,
    follow_recommends: bool,
}

impl<'a> Resolver<'a> {
    pub fn new(cache: &'a PackageCache, prompter: &'a dyn Prompter) -> Self {
        Self {
            cache,
            prompter,
            follow_recommends: false,
        }
    }

    /// Also follow `Recommends` relations when computing the closure.
    pub fn follow_recommends(mut self, follow: bool) -> Self {
        self.follow_recommends = follow;
        self
    }

    /// Compute the closure for a seed set.
    pub fn resolve<S: AsRef<str>>(&self, seeds: impl IntoIterator<Item = S>) -> ResolutionSet {
        let mut set = ResolutionSet::default();

        for seed in seeds {
            self.resolve_name(&mut set, seed.as_ref());
        }

        log::info!(
            "resolved {} packages, {} unresolved",
            set.package_count(),
            set.unresolved().len(),
        );

        set
    }

    /// Depth-first closure from one name.
    fn resolve_name(&self, set: &mut ResolutionSet, name: &str) {
        let mut stack = vec![name.to_string()];

        while let Some(name) = stack.pop() {
            if set.entries.contains_key(&name) || set.unresolved.contains(&name) {
                continue;
            }

            let package = match self.choose(&name) {
                Some(package) => package,
                None => {
                    log::warn!("no candidate selected for {}", name);
                    set.unresolved.insert(name);
                    continue;
                }
            };

            // Record the selection under the requested name, the
            // package's own name, and every name it provides.
            set.entries.insert(name.clone(), package.clone());
            set.entries
                .entry(package.name().to_string())
                .or_insert_with(|| package.clone());

            for provided in package.provides() {
                set.entries
                    .entry(provided.name().to_string())
                    .or_insert_with(|| package.clone());
            }

            let mut firm = package.firm_depends().to_vec();
            let mut alternatives = package.alternative_depends().to_vec();

            if self.follow_recommends {
                firm.extend(package.firm_recommends().iter().cloned());
                alternatives.extend(package.alternative_recommends().iter().cloned());
            }

            for atom in firm {
                if let Some(constraint) = atom.constraint() {
                    set.constraints
                        .entry(atom.name().to_string())
                        .or_default()
                        .push(constraint.clone());
                }

                stack.push(atom.name().to_string());
            }

            for dependency in alternatives {
                set.deferred_alternatives
                    .push((package.name().to_string(), dependency));
            }
        }
    }

    /// Candidate selection for one name.
    fn choose(&self, name: &str) -> Option<Arc<BinaryPackage>> {
        let direct = self.cache.binary_packages(name);

        if !direct.is_empty() {
            return self.choose_version(name, direct);
        }

        let providers = self.cache.provider_names(name);

        match providers.len() {
            0 => None,
            1 => {
                let provider = &providers[0];
                log::info!("Selecting {} for {}", provider, name);

                self.choose_version(provider, self.cache.binary_packages(provider))
            }
            _ => {
                let chosen = match self.prompter.choose(
                    &format!("Multiple provides for {}, select package", name),
                    &providers,
                ) {
                    Ok(index) => &providers[index],
                    Err(e) => {
                        log::warn!("cannot pick a provider for {}: {}", name, e);
                        return None;
                    }
                };

                log::info!("Selecting {} for {}", chosen, name);

                self.choose_version(chosen, self.cache.binary_packages(chosen))
            }
        }
    }

    /// Pick among multiple versions of the same name.
    ///
    /// The maximum version wins; a tie surfaces a prompt with the
    /// versions as options.
    fn choose_version(
        &self,
        name: &str,
        candidates: &[Arc<BinaryPackage>],
    ) -> Option<Arc<BinaryPackage>> {
        match candidates.len() {
            0 => None,
            1 => Some(candidates[0].clone()),
            _ => {
                let best = candidates
                    .iter()
                    .max_by(|a, b| a.version().cmp(b.version()))
                    .expect("candidates should be non-empty");

                let ties = candidates
                    .iter()
                    .filter(|c| c.version().cmp(best.version()) == std::cmp::Ordering::Equal)
                    .count();

                if ties == 1 {
                    log::debug!(
                        "selected {} {} among {} candidates",
                        name,
                        best.version_str(),
                        candidates.len()
                    );

                    return Some(best.clone());
                }

                let options = candidates
                    .iter()
                    .map(|c| c.version_str().to_string())
                    .collect::<Vec<_>>();

                match self.prompter.choose(
                    &format!("Multiple packages for {}, select version", name),
                    &options,
                ) {
                    Ok(index) => Some(candidates[index].clone()),
                    Err(e) => {
                        log::warn!("cannot pick a version for {}: {}", name, e);
                        None
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod test {
    use {super::*, crate::control::ControlFile, indoc::indoc, std::sync::Mutex};

    const ARCH: &str = "amd64";

    /// Deterministic prompter answering with a scripted option label.
    struct OraclePrompter {
        answers: Mutex<Vec<String>>,
    }

    impl OraclePrompter {
        fn new(answers: &[&str]) -> Self {
            Self {
                answers: Mutex::new(answers.iter().rev().map(|s| s.to_string()).collect()),
            }
        }
    }

    impl Prompter for OraclePrompter {
        fn choose(&self, question: &str, options: &[String]) -> Result<usize> {
            let answer = self
                .answers
                .lock()
                .unwrap()
                .pop()
                .ok_or_else(|| AthenaError::PromptUnavailable(question.to_string()))?;

            Ok(options
                .iter()
                .position(|o| o == &answer)
                .expect("scripted answer should be among options"))
        }
    }

    fn cache_from(packages: &str) -> PackageCache {
        let paragraphs = ControlFile::parse_str(packages)
            .unwrap()
            .into_paragraphs()
            .collect();

        PackageCache::from_paragraphs(paragraphs, Vec::new(), ARCH)
    }

    #[test]
    fn virtual_provider_selection() {
        let cache = cache_from(indoc! {"
            Package: mawk
            Version: 1.3.4-1
            Architecture: amd64
            Provides: awk
        "});

        let set = Resolver::new(&cache, &NonInteractivePrompter).resolve(["awk"]);

        assert_eq!(set.get("awk").unwrap().name(), "mawk");
        assert_eq!(set.get("mawk").unwrap().name(), "mawk");
        assert_eq!(set.package_count(), 1);
        assert!(set.unresolved().is_empty());
    }

    #[test]
    fn version_constraint_satisfaction() {
        let cache = cache_from(indoc! {"
            Package: a
            Version: 1.0
            Architecture: amd64
            Depends: b (>= 2.0)

            Package: b
            Version: 1.9
            Architecture: amd64

            Package: b
            Version: 2.1
            Architecture: amd64
        "});

        let set = Resolver::new(&cache, &NonInteractivePrompter).resolve(["a"]);

        assert_eq!(set.get("b").unwrap().version_str(), "2.1");
        assert!(set.verify_constraints().is_empty());
    }

    #[test]
    fn alternative_satisfied_by_prior_selection() {
        let cache = cache_from(indoc! {"
            Package: x
            Version: 1.0
            Architecture: amd64
            Depends: y | z

            Package: y
            Version: 1.0
            Architecture: amd64

            Package: z
            Version: 1.0
            Architecture: amd64
        "});

        // The prompter would panic the test if consulted.
        let set = Resolver::new(&cache, &NonInteractivePrompter).resolve(["x", "z"]);

        assert!(set.is_selected("x"));
        assert!(set.is_selected("z"));
        assert!(!set.is_selected("y"));
        assert!(set.unsatisfied_alternatives().is_empty());
    }

    #[test]
    fn unsatisfied_alternative_is_reported() {
        let cache = cache_from(indoc! {"
            Package: x
            Version: 1.0
            Architecture: amd64
            Depends: y | z
        "});

        let set = Resolver::new(&cache, &NonInteractivePrompter).resolve(["x"]);

        let unsatisfied = set.unsatisfied_alternatives();
        assert_eq!(unsatisfied.len(), 1);
        assert_eq!(unsatisfied[0].0, "x");
    }

    #[test]
    fn ambiguous_providers_prompt() {
        let packages = indoc! {"
            Package: mawk
            Version: 1.3.4-1
            Architecture: amd64
            Provides: awk

            Package: gawk
            Version: 1:5.1.0-1
            Architecture: amd64
            Provides: awk
        "};

        // Interactive: the scripted oracle picks gawk.
        let cache = cache_from(packages);
        let oracle = OraclePrompter::new(&["gawk"]);
        let set = Resolver::new(&cache, &oracle).resolve(["awk"]);
        assert_eq!(set.get("awk").unwrap().name(), "gawk");

        // Non-interactive: the ambiguity is an unresolved name.
        let set = Resolver::new(&cache, &NonInteractivePrompter).resolve(["awk"]);
        assert!(set.unresolved().contains("awk"));
    }

    #[test]
    fn version_tie_prompts() {
        let cache = cache_from(indoc! {"
            Package: dup
            Version: 1.0
            Architecture: amd64

            Package: dup
            Version: 1.0
            Architecture: all
        "});

        let oracle = OraclePrompter::new(&["1.0"]);
        let set = Resolver::new(&cache, &oracle).resolve(["dup"]);

        assert!(set.is_selected("dup"));
    }

    #[test]
    fn closure_includes_all_firm_depends() {
        let cache = cache_from(indoc! {"
            Package: top
            Version: 1.0
            Architecture: amd64
            Depends: middle, missing-leaf

            Package: middle
            Version: 1.0
            Architecture: amd64
            Depends: bottom (>= 0.5)
            Pre-Depends: top

            Package: bottom
            Version: 1.0
            Architecture: amd64
        "});

        let set = Resolver::new(&cache, &NonInteractivePrompter).resolve(["top"]);

        // Every firm dependency of every selection must appear.
        for package in set.iter_selected_packages() {
            for atom in package.firm_depends() {
                assert!(
                    set.is_selected(atom.name()) || set.unresolved().contains(atom.name()),
                    "dependency {} of {} missing from set",
                    atom.name(),
                    package.name()
                );
            }
        }

        assert!(set.unresolved().contains("missing-leaf"));
        assert_eq!(set.constraints_for("bottom").len(), 1);
    }

    #[test]
    fn cyclic_dependencies_terminate() {
        let cache = cache_from(indoc! {"
            Package: libc6
            Version: 2.33-1
            Architecture: amd64
            Depends: gcc-base

            Package: gcc-base
            Version: 10.2-1
            Architecture: amd64
            Depends: libc6
        "});

        let set = Resolver::new(&cache, &NonInteractivePrompter).resolve(["libc6"]);

        assert_eq!(set.package_count(), 2);
    }

    #[test]
    fn constraint_violation_reported_not_unwound() {
        let cache = cache_from(indoc! {"
            Package: a
            Version: 1.0
            Architecture: amd64
            Depends: b (>= 2.0)

            Package: b
            Version: 1.9
            Architecture: amd64
        "});

        let set = Resolver::new(&cache, &NonInteractivePrompter).resolve(["a"]);

        // The only candidate is kept despite violating the constraint.
        assert_eq!(set.get("b").unwrap().version_str(), "1.9");

        let violations = set.verify_constraints();
        assert_eq!(violations.len(), 1);
        assert_eq!(violations[0].name, "b");
    }

    #[test]
    fn breaks_surface_as_warnings() {
        let cache = cache_from(indoc! {"
            Package: new-tool
            Version: 2.0
            Architecture: amd64
            Breaks: old-tool (<< 1.5)
            Depends: old-tool

            Package: old-tool
            Version: 1.0
            Architecture: amd64
        "});

        let set = Resolver::new(&cache, &NonInteractivePrompter).resolve(["new-tool"]);

        let conflicts = set.relation_conflicts();
        assert_eq!(conflicts.len(), 1);
        assert_eq!(conflicts[0].kind, RelationKind::Breaks);
        assert_eq!(conflicts[0].package, "new-tool");
    }

    #[test]
    fn recommends_followed_when_enabled() {
        let packages = indoc! {"
            Package: app
            Version: 1.0
            Architecture: amd64
            Recommends: extra

            Package: extra
            Version: 1.0
            Architecture: amd64
        "};

        let cache = cache_from(packages);

        let set = Resolver::new(&cache, &NonInteractivePrompter).resolve(["app"]);
        assert!(!set.is_selected("extra"));

        let set = Resolver::new(&cache, &NonInteractivePrompter)
            .follow_recommends(true)
            .resolve(["app"]);
        assert!(set.is_selected("extra"));
    }
}

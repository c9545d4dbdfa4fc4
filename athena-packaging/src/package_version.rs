// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

/*! Debian package version string handling.

Versions have the form `[epoch:]upstream_version[-debian_revision]` and a
custom ordering defined at
<https://www.debian.org/doc/debian-policy/ch-controlfields.html#version>.
This module also implements the relational operators used by package
relation expressions (`=`, `<<`, `<=`, `>=`, `>>`).
*/

use {
    std::{
        cmp::Ordering,
        fmt::{Display, Formatter},
        num::ParseIntError,
        str::FromStr,
    },
    thiserror::Error,
};

#[derive(Clone, Debug, Error)]
pub enum VersionError {
    #[error("error parsing string to integer: {0}")]
    ParseInt(#[from] ParseIntError),

    #[error("the epoch component has non-digit characters: {0}")]
    EpochNonNumeric(String),

    #[error("upstream_version component has illegal character: {0}")]
    UpstreamVersionIllegalChar(String),

    #[error("debian_revision component has illegal character: {0}")]
    DebianRevisionIllegalChar(String),

    #[error("unknown version relation operator: {0}")]
    UnknownOperator(String),
}

pub type Result<T> = std::result::Result<T, VersionError>;

/// A parsed Debian package version.
#[derive(Clone, Debug, Eq, Hash, PartialEq)]
pub struct PackageVersion {
    epoch: Option<u32>,
    upstream_version: String,
    debian_revision: Option<String>,
}

impl PackageVersion {
    /// Construct an instance by parsing a version string.
    pub fn parse(s: &str) -> Result<Self> {
        // Epoch precedes the first colon; the debian revision follows the
        // last hyphen.
        let (epoch, remainder) = match s.split_once(':') {
            Some((epoch, rest)) => (Some(epoch), rest),
            None => (None, s),
        };

        let (upstream, debian) = match remainder.rsplit_once('-') {
            Some((upstream, debian)) => (upstream, Some(debian)),
            None => (remainder, None),
        };

        let epoch = if let Some(epoch) = epoch {
            if !epoch.chars().all(|c| c.is_ascii_digit()) {
                return Err(VersionError::EpochNonNumeric(s.to_string()));
            }

            Some(u32::from_str(epoch)?)
        } else {
            None
        };

        // upstream_version allows alphanumerics plus . + ~ and, when a
        // debian revision is present, hyphens.
        if !upstream.chars().all(|c| match c {
            c if c.is_ascii_alphanumeric() => true,
            '.' | '+' | '~' => true,
            '-' => debian.is_some(),
            _ => false,
        }) {
            return Err(VersionError::UpstreamVersionIllegalChar(s.to_string()));
        }

        let debian_revision = if let Some(debian) = debian {
            if !debian.chars().all(|c| match c {
                c if c.is_ascii_alphanumeric() => true,
                '+' | '.' | '~' => true,
                _ => false,
            }) {
                return Err(VersionError::DebianRevisionIllegalChar(s.to_string()));
            }

            Some(debian.to_string())
        } else {
            None
        };

        Ok(Self {
            epoch,
            upstream_version: upstream.to_string(),
            debian_revision,
        })
    }

    /// The explicit `epoch` component, if present.
    pub fn epoch(&self) -> Option<u32> {
        self.epoch
    }

    /// The `epoch` component, defaulting to `0` when absent.
    pub fn epoch_assumed(&self) -> u32 {
        self.epoch.unwrap_or(0)
    }

    /// The `upstream_version` component.
    pub fn upstream_version(&self) -> &str {
        &self.upstream_version
    }

    /// The `debian_revision` component, if present.
    pub fn debian_revision(&self) -> Option<&str> {
        self.debian_revision.as_deref()
    }
}

impl Display for PackageVersion {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        if let Some(epoch) = self.epoch {
            write!(f, "{}:", epoch)?;
        }

        write!(f, "{}", self.upstream_version)?;

        if let Some(revision) = &self.debian_revision {
            write!(f, "-{}", revision)?;
        }

        Ok(())
    }
}

impl FromStr for PackageVersion {
    type Err = VersionError;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

/// Sort weight of a character in the modified lexical ordering.
///
/// Tilde sorts before everything, including the end of a component. Letters
/// sort before non-letters.
fn char_weight(c: Option<char>) -> i32 {
    match c {
        None => 0,
        Some('~') => -1,
        Some(c) if c.is_ascii_alphabetic() => c as i32,
        Some(c) => c as i32 + 256,
    }
}

fn lexical_compare(a: &str, b: &str) -> Ordering {
    let mut a_chars = a.chars();
    let mut b_chars = b.chars();

    loop {
        let a_char = a_chars.next();
        let b_char = b_chars.next();

        if a_char.is_none() && b_char.is_none() {
            return Ordering::Equal;
        }

        match char_weight(a_char).cmp(&char_weight(b_char)) {
            Ordering::Equal => {}
            res => {
                return res;
            }
        }
    }
}

fn split_leading_nondigits(s: &str) -> (&str, &str) {
    let pos = s
        .char_indices()
        .find(|(_, c)| c.is_ascii_digit())
        .map(|(i, _)| i)
        .unwrap_or(s.len());

    s.split_at(pos)
}

fn split_leading_digits(s: &str) -> (u64, &str) {
    let pos = s
        .char_indices()
        .find(|(_, c)| !c.is_ascii_digit())
        .map(|(i, _)| i)
        .unwrap_or(s.len());

    let (digits, rest) = s.split_at(pos);

    // An empty digit run counts as zero.
    let numeric = if digits.is_empty() {
        0
    } else {
        u64::from_str(digits).expect("run of ASCII digits should parse")
    };

    (numeric, rest)
}

/// Compare one version component (upstream or revision) using Debian rules.
///
/// Alternates between comparing runs of non-digits (modified lexical order)
/// and runs of digits (numeric order) until a difference is found or both
/// inputs are exhausted.
fn compare_component(a: &str, b: &str) -> Ordering {
    let mut a_rest = a;
    let mut b_rest = b;

    loop {
        let (a_prefix, a_tail) = split_leading_nondigits(a_rest);
        let (b_prefix, b_tail) = split_leading_nondigits(b_rest);

        match lexical_compare(a_prefix, b_prefix) {
            Ordering::Equal => {}
            res => {
                return res;
            }
        }

        let (a_numeric, a_tail) = split_leading_digits(a_tail);
        let (b_numeric, b_tail) = split_leading_digits(b_tail);

        match a_numeric.cmp(&b_numeric) {
            Ordering::Equal => {}
            res => {
                return res;
            }
        }

        if a_tail.is_empty() && b_tail.is_empty() {
            return Ordering::Equal;
        }

        a_rest = a_tail;
        b_rest = b_tail;
    }
}

impl PartialOrd for PackageVersion {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for PackageVersion {
    fn cmp(&self, other: &Self) -> Ordering {
        // Epoch numerically, then upstream, then revision. A missing
        // revision is equivalent to `0`.
        self.epoch_assumed()
            .cmp(&other.epoch_assumed())
            .then_with(|| compare_component(&self.upstream_version, &other.upstream_version))
            .then_with(|| {
                compare_component(
                    self.debian_revision.as_deref().unwrap_or("0"),
                    other.debian_revision.as_deref().unwrap_or("0"),
                )
            })
    }
}

/// A relational operator in a version constraint.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub enum ConstraintOp {
    Equal,
    StrictlyEarlier,
    EarlierOrEqual,
    LaterOrEqual,
    StrictlyLater,
}

impl ConstraintOp {
    /// Parse an operator token.
    ///
    /// The single-character forms `<` and `>` are legacy spellings of
    /// `<=` and `>=`.
    pub fn parse(s: &str) -> Result<Self> {
        match s {
            "=" => Ok(Self::Equal),
            "<<" => Ok(Self::StrictlyEarlier),
            "<=" | "<" => Ok(Self::EarlierOrEqual),
            ">=" | ">" => Ok(Self::LaterOrEqual),
            ">>" => Ok(Self::StrictlyLater),
            _ => Err(VersionError::UnknownOperator(s.to_string())),
        }
    }
}

impl Display for ConstraintOp {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            Self::Equal => "=",
            Self::StrictlyEarlier => "<<",
            Self::EarlierOrEqual => "<=",
            Self::LaterOrEqual => ">=",
            Self::StrictlyLater => ">>",
        })
    }
}

/// A version constraint: an operator and a reference version.
#[derive(Clone, Debug, Eq, Hash, PartialEq)]
pub struct VersionConstraint {
    op: ConstraintOp,
    version: PackageVersion,
}

impl VersionConstraint {
    pub fn new(op: ConstraintOp, version: PackageVersion) -> Self {
        Self { op, version }
    }

    pub fn op(&self) -> ConstraintOp {
        self.op
    }

    pub fn version(&self) -> &PackageVersion {
        &self.version
    }

    /// Whether a candidate version satisfies this constraint.
    pub fn satisfied_by(&self, candidate: &PackageVersion) -> bool {
        let ordering = candidate.cmp(&self.version);

        match self.op {
            ConstraintOp::Equal => ordering == Ordering::Equal,
            ConstraintOp::StrictlyEarlier => ordering == Ordering::Less,
            ConstraintOp::EarlierOrEqual => ordering != Ordering::Greater,
            ConstraintOp::LaterOrEqual => ordering != Ordering::Less,
            ConstraintOp::StrictlyLater => ordering == Ordering::Greater,
        }
    }
}

impl Display for VersionConstraint {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} {}", self.op, self.version)
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn parse() -> Result<()> {
        assert_eq!(
            PackageVersion::parse("1:4.7.0+dfsg1-2")?,
            PackageVersion {
                epoch: Some(1),
                upstream_version: "4.7.0+dfsg1".into(),
                debian_revision: Some("2".into()),
            }
        );
        assert_eq!(
            PackageVersion::parse("3.3.2.final~github")?,
            PackageVersion {
                epoch: None,
                upstream_version: "3.3.2.final~github".into(),
                debian_revision: None,
            }
        );
        assert_eq!(
            PackageVersion::parse("0.18.0+dfsg-2+b1")?,
            PackageVersion {
                epoch: None,
                upstream_version: "0.18.0+dfsg".into(),
                debian_revision: Some("2+b1".into()),
            }
        );

        assert!(PackageVersion::parse("a:1.0").is_err());
        assert!(PackageVersion::parse("1.0_1").is_err());

        Ok(())
    }

    #[test]
    fn format_round_trip() -> Result<()> {
        for s in ["1:4.7.0+dfsg1-2", "3.3.2.final~github", "0.18.0+dfsg-2+b1"] {
            assert_eq!(format!("{}", PackageVersion::parse(s)?), s);
        }

        Ok(())
    }

    #[test]
    fn tilde_sorts_before_everything() {
        assert_eq!(
            compare_component("1.0~beta1~svn1245", "1.0~beta1"),
            Ordering::Less
        );
        assert_eq!(compare_component("1.0~beta1", "1.0"), Ordering::Less);
        assert_eq!(lexical_compare("~~", "~~a"), Ordering::Less);
        assert_eq!(lexical_compare("~~a", "~"), Ordering::Less);
        assert_eq!(lexical_compare("~", ""), Ordering::Less);
        assert_eq!(lexical_compare("", "a"), Ordering::Less);
    }

    #[test]
    fn compare_versions() -> Result<()> {
        let earlier = PackageVersion::parse("1.9-1")?;
        let later = PackageVersion::parse("2.1-1")?;
        assert!(earlier < later);

        // Epoch dominates.
        assert!(PackageVersion::parse("1:1.0")? > PackageVersion::parse("9.9")?);

        // Numeric runs compare numerically, not lexically.
        assert!(PackageVersion::parse("1.10")? > PackageVersion::parse("1.9")?);

        // Missing revision behaves as zero.
        assert_eq!(
            PackageVersion::parse("1.0")?.cmp(&PackageVersion::parse("1.0-0")?),
            Ordering::Equal
        );

        Ok(())
    }

    #[test]
    fn constraint_ops() -> Result<()> {
        let v21 = PackageVersion::parse("2.1")?;
        let v20 = PackageVersion::parse("2.0")?;

        let at_least_20 = VersionConstraint::new(ConstraintOp::LaterOrEqual, v20.clone());
        assert!(at_least_20.satisfied_by(&v21));
        assert!(at_least_20.satisfied_by(&v20));

        let before_20 = VersionConstraint::new(ConstraintOp::StrictlyEarlier, v20.clone());
        assert!(!before_20.satisfied_by(&v21));
        assert!(!before_20.satisfied_by(&v20));
        assert!(before_20.satisfied_by(&PackageVersion::parse("1.9")?));

        assert_eq!(ConstraintOp::parse(">")?, ConstraintOp::LaterOrEqual);
        assert_eq!(ConstraintOp::parse("<")?, ConstraintOp::EarlierOrEqual);
        assert!(ConstraintOp::parse("==").is_err());

        assert_eq!(
            format!(
                "{}",
                VersionConstraint::new(ConstraintOp::StrictlyLater, v21)
            ),
            ">> 2.1"
        );

        Ok(())
    }
}

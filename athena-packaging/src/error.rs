// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

/*! Error handling. */

use {crate::package_version::VersionError, thiserror::Error};

/// Primary crate error type.
#[derive(Debug, Error)]
pub enum AthenaError {
    #[error("I/O error: {0:?}")]
    Io(#[from] std::io::Error),

    #[error("URL error: {0:?}")]
    Url(#[from] url::ParseError),

    #[error("hex parsing error of {0}: {1:?}")]
    DigestBadHex(String, hex::FromHexError),

    #[error("integer parsing error: {0:?}")]
    ParseInt(#[from] std::num::ParseIntError),

    #[cfg(feature = "http")]
    #[error("HTTP error: {0:?}")]
    Http(#[from] reqwest::Error),

    #[error("version error: {0}")]
    Version(#[from] VersionError),

    #[error("control file parse error: {0}")]
    ControlParseError(String),

    #[error("required control field missing: {0}")]
    ControlRequiredFieldMissing(String),

    #[error("package list entry is missing the {0} field")]
    ControlPackageListMissingField(&'static str),

    #[error("failed to parse dependency expression: {0}")]
    DependencyParse(String),

    #[error("expected 1 paragraph in release file; got {0}")]
    ReleaseControlParagraphMismatch(usize),

    #[error("digest missing from index entry")]
    ReleaseMissingDigest,

    #[error("size missing from index entry")]
    ReleaseMissingSize,

    #[error("path missing from index entry")]
    ReleaseMissingPath,

    #[error("index entry path unexpectedly has spaces: {0}")]
    ReleasePathWithSpaces(String),

    #[error("release file does not describe control file: {0}")]
    ArchiveIndexEntryNotFound(String),

    #[error("release file describes multiple entries for: {0}")]
    ArchiveIndexEntryDuplicated(String),

    #[error("digest mismatch for {path}: expected {expected}, got {got}")]
    ArchiveDigestMismatch {
        path: String,
        expected: String,
        got: String,
    },

    #[error("archive I/O error on path {0}: {1:?}")]
    ArchiveIoPath(String, std::io::Error),

    #[error("{question}; options: {options:?}")]
    ResolutionAmbiguous {
        question: String,
        options: Vec<String>,
    },

    #[error("interactive prompt unavailable: {0}")]
    PromptUnavailable(String),

    #[error("artifact is not a well-formed deb archive: {0}")]
    Artifact(String),

    #[error("container driver error: {0}")]
    Container(String),

    #[error("repository I/O error on path {0}: {1:?}")]
    RepositoryIoPath(String, std::io::Error),
}

/// Result wrapper for this crate.
pub type Result<T> = std::result::Result<T, AthenaError>;

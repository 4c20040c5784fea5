// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

use thiserror::Error;

/// Unified error type for IPA re-signing.
#[derive(Debug, Error)]
pub enum ResignError {
    #[error("error fetching source archive: {0}")]
    Fetch(#[from] reqwest::Error),

    #[error("error analyzing source archive: {0}")]
    Analysis(#[from] ipa_archive::ArchiveError),

    #[error("unknown identifier: {0}")]
    UnknownIdentifier(String),

    #[error("bundle id and app name could not be resolved; supply them explicitly")]
    MissingMetadata,

    #[error("credential password must not be empty")]
    MissingCredentialPassword,

    #[error("storage error: {0}")]
    Storage(#[from] std::io::Error),

    #[error("failed to launch signing tool {0}: {1}")]
    SignerLaunch(String, std::io::Error),

    #[error("signing tool reported failure")]
    SigningFailed {
        /// Combined stdout/stderr of the signing tool, verbatim.
        output: String,
    },

    #[error("signing tool reported success but produced no output archive")]
    SigningOutputMissing,

    #[error("invalid artifact name: {0}")]
    InvalidArtifactName(String),

    #[error("duplicate identifier in analysis index: {0}")]
    DuplicateIdentifier(String),

    #[error("error serializing manifest plist: {0}")]
    ManifestSerialize(plist::Error),
}

/// Result type for this crate.
pub type Result<T> = std::result::Result<T, ResignError>;

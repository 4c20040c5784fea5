// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Re-sign iOS application archives with an external signing tool.
//!
//! This crate implements the service core behind `ipa-resign-server`: it
//! fetches `.ipa` archives from URLs into per-identifier working
//! directories, extracts their declared metadata (via the `ipa-archive`
//! crate), deduplicates repeated analysis through an in-memory index,
//! invokes an external signing tool against uploaded credentials, and
//! produces over-the-air installation manifests.
//!
//! The pieces:
//!
//! * [storage::ArtifactStore] — directory-per-identifier layout on disk,
//!   with a closed allow-list of artifact filenames.
//! * [index::AnalysisIndex] — concurrency-safe cache of analysis results,
//!   keyed by identifier and deduplicated by origin URL.
//! * [signer::Signer] — injected capability wrapping the external tool,
//!   substitutable in tests.
//! * [service::ResignService] — the orchestrator tying the above together
//!   behind `analyze` and `resign` entry points.
//!
//! The core is synchronous; the HTTP boundary bridges onto it with blocking
//! tasks.

pub mod error;
pub mod fetch;
pub mod index;
pub mod manifest;
pub mod service;
pub mod signer;
pub mod storage;

pub use {
    error::{ResignError, Result},
    index::{AnalysisIndex, AnalysisRecord},
    service::{AnalyzeOutcome, ResignOutcome, ResignRequest, ResignService, ResignSource},
    signer::{SignRequest, Signer, ZsignSigner},
    storage::{ArtifactName, ArtifactStore},
};

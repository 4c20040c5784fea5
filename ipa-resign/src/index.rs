// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! In-memory index of analyzed source archives.

use {
    crate::error::{ResignError, Result},
    std::{
        sync::{RwLock, RwLockReadGuard, RwLockWriteGuard},
        time::SystemTime,
    },
};

/// What is known about one analyzed source archive.
///
/// Records are immutable once inserted. They are only ever replaced
/// wholesale, never updated in place.
#[derive(Clone, Debug)]
pub struct AnalysisRecord {
    /// Opaque unique token naming the working directory.
    pub identifier: String,

    /// URL the archive was fetched from. Empty when the archive was supplied
    /// without a remembered origin.
    pub origin: String,

    /// Extracted or caller-supplied bundle identifier.
    pub bundle_id: String,

    /// Extracted or caller-supplied application name.
    pub app_name: String,

    /// When the record was first created.
    pub created_at: SystemTime,
}

impl AnalysisRecord {
    pub fn new(
        identifier: impl ToString,
        origin: impl ToString,
        bundle_id: impl ToString,
        app_name: impl ToString,
    ) -> Self {
        Self {
            identifier: identifier.to_string(),
            origin: origin.to_string(),
            bundle_id: bundle_id.to_string(),
            app_name: app_name.to_string(),
            created_at: SystemTime::now(),
        }
    }
}

/// Concurrency-safe collection of [AnalysisRecord].
///
/// This is a cache, not a source of truth: the artifact store's directory
/// layout decides whether an identifier is usable. Reads proceed in parallel;
/// inserts take the write lock. Callers must perform downloads, archive
/// parsing, and subprocess work before touching the index so no I/O ever
/// happens under the lock. The index grows for the life of the process; there
/// is no eviction.
#[derive(Debug, Default)]
pub struct AnalysisIndex {
    records: RwLock<Vec<AnalysisRecord>>,
}

impl AnalysisIndex {
    pub fn new() -> Self {
        Self::default()
    }

    /// Find the first record ever stored for an origin URL.
    ///
    /// Insertion order breaks ties, so repeated analysis of the same URL is
    /// idempotent from the caller's perspective even if a first-time race
    /// produced more than one record for the origin.
    pub fn find_by_origin(&self, origin: &str) -> Option<AnalysisRecord> {
        self.read()
            .iter()
            .find(|record| record.origin == origin)
            .cloned()
    }

    /// Find the record for an identifier.
    pub fn find_by_identifier(&self, identifier: &str) -> Option<AnalysisRecord> {
        self.read()
            .iter()
            .find(|record| record.identifier == identifier)
            .cloned()
    }

    /// Insert a new record.
    ///
    /// Identifiers are allocated fresh for every record, so an existing
    /// identifier indicates an internal-consistency defect and is surfaced
    /// rather than silently ignored.
    pub fn insert(&self, record: AnalysisRecord) -> Result<()> {
        let mut records = self.write();

        if records.iter().any(|r| r.identifier == record.identifier) {
            return Err(ResignError::DuplicateIdentifier(record.identifier));
        }

        records.push(record);

        Ok(())
    }

    pub fn len(&self) -> usize {
        self.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.read().is_empty()
    }

    // A poisoned lock means a panic while holding it. The only write is a
    // single push, which cannot leave the Vec inconsistent, so recovering
    // the guard is sound.
    fn read(&self) -> RwLockReadGuard<'_, Vec<AnalysisRecord>> {
        self.records.read().unwrap_or_else(|e| e.into_inner())
    }

    fn write(&self) -> RwLockWriteGuard<'_, Vec<AnalysisRecord>> {
        self.records.write().unwrap_or_else(|e| e.into_inner())
    }
}

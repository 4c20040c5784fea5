// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Read metadata out of iOS application archives.
//!
//! An `.ipa` file is a zip archive holding an application bundle under a
//! `Payload/` directory. The bundle carries an `Info.plist` describing the
//! application. This crate locates that plist inside the archive and decodes
//! the handful of fields needed to identify the application, without
//! extracting or modifying the archive.

use {
    std::{
        io::{Cursor, Read, Seek},
        path::Path,
    },
    thiserror::Error,
};

/// The `Info.plist` key holding the canonical application identifier.
pub const BUNDLE_IDENTIFIER_KEY: &str = "CFBundleIdentifier";

/// The `Info.plist` key holding the user-facing application name.
pub const BUNDLE_DISPLAY_NAME_KEY: &str = "CFBundleDisplayName";

/// The `Info.plist` key holding the internal application name.
pub const BUNDLE_NAME_KEY: &str = "CFBundleName";

/// Name used when the archive declares no usable application name.
pub const UNKNOWN_APP_NAME: &str = "Unknown App";

/// Error type for IPA archive reading.
#[derive(Debug, Error)]
pub enum ArchiveError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("zip archive error: {0}")]
    Zip(#[from] zip::result::ZipError),

    #[error("error parsing Info.plist: {0}")]
    PlistParse(plist::Error),

    #[error("no *.app/Info.plist entry in archive")]
    InfoPlistNotFound,

    #[error("Info.plist is not a dictionary")]
    InfoPlistNotDictionary,

    #[error("CFBundleIdentifier missing or not a string")]
    BundleIdentifierMissing,
}

/// Result type for this crate.
pub type Result<T> = std::result::Result<T, ArchiveError>;

/// Identifying metadata extracted from an application archive.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct AppMetadata {
    /// Canonical unique name of the application (`CFBundleIdentifier`).
    pub bundle_id: String,

    /// Human-readable application name.
    ///
    /// Resolved from `CFBundleDisplayName`, falling back to `CFBundleName`,
    /// falling back to [UNKNOWN_APP_NAME]. Never empty.
    pub app_name: String,
}

impl AppMetadata {
    /// Extract metadata from an `.ipa` archive on the filesystem.
    pub fn from_ipa(path: impl AsRef<Path>) -> Result<Self> {
        let fh = std::fs::File::open(path.as_ref())?;

        Self::from_reader(fh)
    }

    /// Extract metadata from a seekable reader holding an `.ipa` archive.
    ///
    /// Scans the archive's entry listing for the application bundle's
    /// `Info.plist` and decodes it. Both XML and binary plist serializations
    /// are handled.
    pub fn from_reader(reader: impl Read + Seek) -> Result<Self> {
        let mut archive = zip::ZipArchive::new(reader)?;

        // The plist lives at Payload/<name>.app/Info.plist. Frameworks and
        // nested bundles use different directory suffixes, so matching on
        // `.app/Info.plist` finds the application bundle's copy.
        let plist_name = archive
            .file_names()
            .find(|name| name.ends_with(".app/Info.plist"))
            .map(|name| name.to_string())
            .ok_or(ArchiveError::InfoPlistNotFound)?;

        log::debug!("reading {} from archive", plist_name);

        let mut entry = archive.by_name(&plist_name)?;
        let mut plist_data = Vec::with_capacity(entry.size() as usize);
        entry.read_to_end(&mut plist_data)?;

        Self::from_info_plist(&plist_data)
    }

    /// Extract metadata from raw `Info.plist` data.
    pub fn from_info_plist(data: &[u8]) -> Result<Self> {
        let value = plist::Value::from_reader(Cursor::new(data))
            .map_err(ArchiveError::PlistParse)?;
        let dict = value
            .into_dictionary()
            .ok_or(ArchiveError::InfoPlistNotDictionary)?;

        let bundle_id = dict
            .get(BUNDLE_IDENTIFIER_KEY)
            .and_then(|v| v.as_string())
            .ok_or(ArchiveError::BundleIdentifierMissing)?
            .to_string();

        let app_name = dict
            .get(BUNDLE_DISPLAY_NAME_KEY)
            .and_then(|v| v.as_string())
            .or_else(|| dict.get(BUNDLE_NAME_KEY).and_then(|v| v.as_string()))
            .unwrap_or(UNKNOWN_APP_NAME)
            .to_string();

        Ok(Self {
            bundle_id,
            app_name,
        })
    }
}

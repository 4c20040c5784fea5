// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Directory-per-identifier artifact storage.

use {
    crate::error::{ResignError, Result},
    std::path::{Path, PathBuf},
};

/// Well-known artifacts inside a working directory.
///
/// This enum is the complete set of filenames the store will compose paths
/// for. Caller-supplied filenames outside this set never reach the
/// filesystem, which rules out path traversal through the download endpoint.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ArtifactName {
    /// The archive as fetched from its origin.
    SourceIpa,

    /// The re-signed archive produced by the signing tool.
    ResignedIpa,

    /// The over-the-air installation manifest.
    Manifest,

    /// The uploaded signing credential (PKCS#12).
    Credential,

    /// The uploaded provisioning profile.
    Profile,
}

impl ArtifactName {
    /// The fixed on-disk filename of this artifact.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::SourceIpa => "source.ipa",
            Self::ResignedIpa => "resigned.ipa",
            Self::Manifest => "manifest.plist",
            Self::Credential => "cert.p12",
            Self::Profile => "profile.mobileprovision",
        }
    }

    /// Resolve a caller-supplied filename against the allow-list.
    pub fn from_filename(filename: &str) -> Result<Self> {
        match filename {
            "source.ipa" => Ok(Self::SourceIpa),
            "resigned.ipa" => Ok(Self::ResignedIpa),
            "manifest.plist" => Ok(Self::Manifest),
            "cert.p12" => Ok(Self::Credential),
            "profile.mobileprovision" => Ok(Self::Profile),
            _ => Err(ResignError::InvalidArtifactName(filename.to_string())),
        }
    }

    /// MIME type to serve this artifact with.
    pub fn content_type(&self) -> &'static str {
        match self {
            Self::SourceIpa | Self::ResignedIpa | Self::Credential | Self::Profile => {
                "application/octet-stream"
            }
            Self::Manifest => "application/xml",
        }
    }

    /// Whether downloads of this artifact should carry an attachment
    /// disposition instead of being rendered inline.
    pub fn is_attachment(&self) -> bool {
        matches!(self, Self::SourceIpa | Self::ResignedIpa)
    }
}

impl std::fmt::Display for ArtifactName {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Filesystem store holding one working directory per identifier.
///
/// The store has no in-memory state: directory existence is the ground truth
/// for whether an identifier is usable.
#[derive(Clone, Debug)]
pub struct ArtifactStore {
    root: PathBuf,
}

impl ArtifactStore {
    /// Construct a store rooted at the given directory, creating it if needed.
    pub fn new(root: impl AsRef<Path>) -> Result<Self> {
        let root = root.as_ref().to_path_buf();
        create_dir_0755(&root)?;

        Ok(Self { root })
    }

    /// The root directory of this store.
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Allocate a fresh identifier and create its working directory.
    pub fn allocate(&self) -> Result<String> {
        let identifier = uuid::Uuid::new_v4().to_string();
        create_dir_0755(&self.resolve(&identifier))?;

        log::debug!("allocated working directory for {}", identifier);

        Ok(identifier)
    }

    /// The working directory for an identifier.
    ///
    /// Pure path composition; existence is not checked.
    pub fn resolve(&self, identifier: &str) -> PathBuf {
        self.root.join(identifier)
    }

    /// The path of a named artifact inside an identifier's directory.
    pub fn path_for(&self, identifier: &str, artifact: ArtifactName) -> PathBuf {
        self.resolve(identifier).join(artifact.as_str())
    }

    /// Best-effort recursive removal of an identifier's directory.
    ///
    /// Used to roll back identifiers whose source archive never
    /// materialized. Failure is logged, not propagated, since rollback
    /// already happens on an error path.
    pub fn remove(&self, identifier: &str) {
        let dir = self.resolve(identifier);

        if let Err(err) = std::fs::remove_dir_all(&dir) {
            log::warn!("unable to remove working directory for {}: {}", identifier, err);
        }
    }
}

fn create_dir_0755(path: &Path) -> std::io::Result<()> {
    let mut builder = std::fs::DirBuilder::new();
    builder.recursive(true);
    builder.create(path)?;

    // DirBuilder modes are subject to the process umask; set the
    // permissions explicitly so the layout is serveable regardless.
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o755))?;
    }

    Ok(())
}

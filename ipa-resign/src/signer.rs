// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Invocation of the external signing tool.

use {
    crate::error::{ResignError, Result},
    std::{
        ffi::OsString,
        path::{Path, PathBuf},
        process::Command,
    },
};

/// Compression level passed to the signing tool for the output archive.
pub const COMPRESSION_LEVEL: &str = "9";

/// One signing operation, fully resolved.
#[derive(Debug)]
pub struct SignRequest<'a> {
    /// Path to the signing credential (PKCS#12).
    pub credential: &'a Path,

    /// Path to the provisioning profile.
    pub profile: &'a Path,

    /// Password unlocking the credential. Never empty.
    pub password: &'a str,

    /// Bundle identifier to sign under. Never empty.
    pub bundle_id: &'a str,

    /// Application name to sign under. Never empty.
    pub app_name: &'a str,

    /// Where the signed archive must be written.
    pub output: &'a Path,

    /// The source archive to re-sign.
    pub source: &'a Path,
}

/// Capability to re-sign an archive.
///
/// The production implementation spawns an external tool. Tests substitute a
/// fake so orchestration logic is exercised without any real signing.
pub trait Signer: Send + Sync {
    /// Perform one signing operation.
    ///
    /// Success means the tool reported success; callers still verify that
    /// the declared output file exists.
    fn sign(&self, request: &SignRequest<'_>) -> Result<()>;
}

/// [Signer] backed by the `zsign` command-line tool.
#[derive(Clone, Debug)]
pub struct ZsignSigner {
    program: PathBuf,
}

impl Default for ZsignSigner {
    fn default() -> Self {
        Self::new("zsign")
    }
}

impl ZsignSigner {
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
        }
    }

    /// The tool's argument list. Ordering is part of the tool's contract.
    fn arguments(request: &SignRequest<'_>) -> Vec<OsString> {
        vec![
            "-k".into(),
            request.credential.into(),
            "-m".into(),
            request.profile.into(),
            "-p".into(),
            request.password.into(),
            "-b".into(),
            request.bundle_id.into(),
            "-n".into(),
            request.app_name.into(),
            "-o".into(),
            request.output.into(),
            "-z".into(),
            COMPRESSION_LEVEL.into(),
            request.source.into(),
        ]
    }
}

impl Signer for ZsignSigner {
    fn sign(&self, request: &SignRequest<'_>) -> Result<()> {
        log::info!(
            "signing {} as {} ({})",
            request.source.display(),
            request.bundle_id,
            request.app_name
        );

        let output = Command::new(&self.program)
            .args(Self::arguments(request))
            .output()
            .map_err(|e| {
                ResignError::SignerLaunch(self.program.display().to_string(), e)
            })?;

        let mut combined = String::from_utf8_lossy(&output.stdout).into_owned();
        combined.push_str(&String::from_utf8_lossy(&output.stderr));

        if !output.status.success() {
            log::warn!("signing tool exited with {}", output.status);

            return Err(ResignError::SigningFailed { output: combined });
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn argument_order_is_fixed() {
        let request = SignRequest {
            credential: Path::new("/w/cert.p12"),
            profile: Path::new("/w/profile.mobileprovision"),
            password: "secret",
            bundle_id: "com.example.app",
            app_name: "Example",
            output: Path::new("/w/resigned.ipa"),
            source: Path::new("/w/source.ipa"),
        };

        let args = ZsignSigner::arguments(&request);
        let args = args.iter().map(|a| a.to_str().unwrap()).collect::<Vec<_>>();

        assert_eq!(
            args,
            vec![
                "-k",
                "/w/cert.p12",
                "-m",
                "/w/profile.mobileprovision",
                "-p",
                "secret",
                "-b",
                "com.example.app",
                "-n",
                "Example",
                "-o",
                "/w/resigned.ipa",
                "-z",
                "9",
                "/w/source.ipa",
            ]
        );
    }

    #[test]
    fn missing_program_is_launch_error() {
        let signer = ZsignSigner::new("/nonexistent/zsign-for-tests");
        let request = SignRequest {
            credential: Path::new("cert.p12"),
            profile: Path::new("profile.mobileprovision"),
            password: "secret",
            bundle_id: "com.example.app",
            app_name: "Example",
            output: Path::new("resigned.ipa"),
            source: Path::new("source.ipa"),
        };

        assert!(matches!(
            signer.sign(&request),
            Err(ResignError::SignerLaunch(_, _))
        ));
    }
}

// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! End-to-end orchestration of analysis and re-signing.
//!
//! [ResignService] owns the artifact store, the analysis index, and the
//! signer capability. Requests resolve an identity (a fresh URL or a
//! previously issued identifier), work inside that identifier's directory,
//! and hand back download locators. An identifier conceptually moves through
//! `unborn -> allocated -> source-present -> signed -> manifest-ready`;
//! failures before `source-present` roll it back to `unborn`, later failures
//! leave the partial directory for the caller to retry against.

use {
    crate::{
        error::{ResignError, Result},
        fetch,
        index::{AnalysisIndex, AnalysisRecord},
        manifest,
        signer::{SignRequest, Signer},
        storage::{ArtifactName, ArtifactStore},
    },
    ipa_archive::AppMetadata,
    std::path::PathBuf,
};

/// Result of analyzing a source archive.
#[derive(Clone, Debug)]
pub struct AnalyzeOutcome {
    pub identifier: String,
    pub bundle_id: String,
    pub app_name: String,

    /// Locator for retrieving the stored source archive.
    pub source_url: String,

    /// Whether the origin URL had already been analyzed.
    pub cached: bool,
}

/// How a re-sign request names its source archive.
#[derive(Clone, Debug)]
pub enum ResignSource {
    /// A previously issued identifier whose source archive is reused.
    Identifier(String),

    /// A fresh URL to fetch the archive from.
    Url(String),
}

/// One re-sign request, as delivered by the boundary layer.
#[derive(Debug)]
pub struct ResignRequest {
    pub source: ResignSource,

    /// Raw bytes of the uploaded signing credential.
    pub credential: Vec<u8>,

    /// Raw bytes of the uploaded provisioning profile.
    pub profile: Vec<u8>,

    /// Password unlocking the credential.
    pub password: String,

    /// Caller override for the bundle identifier. Empty strings are treated
    /// as absent.
    pub bundle_id: Option<String>,

    /// Caller override for the application name.
    pub app_name: Option<String>,
}

/// Result of a completed re-sign.
#[derive(Clone, Debug)]
pub struct ResignOutcome {
    pub identifier: String,
    pub bundle_id: String,
    pub app_name: String,
    pub manifest_url: String,
    pub source_url: String,
    pub resigned_url: String,
}

/// Coordinates analysis and signing against shared store and index state.
pub struct ResignService {
    store: ArtifactStore,
    index: AnalysisIndex,
    signer: Box<dyn Signer>,
    base_url: String,
}

impl ResignService {
    /// Construct a service.
    ///
    /// `base_url` is the externally visible prefix for download locators; a
    /// trailing `/` is stripped so locator composition is uniform.
    pub fn new(store: ArtifactStore, signer: Box<dyn Signer>, base_url: impl ToString) -> Self {
        let base_url = base_url.to_string().trim_end_matches('/').to_string();

        Self {
            store,
            index: AnalysisIndex::new(),
            signer,
            base_url,
        }
    }

    /// The analysis index backing this service.
    pub fn index(&self) -> &AnalysisIndex {
        &self.index
    }

    /// Analyze the archive at an origin URL.
    ///
    /// A cache hit by origin answers without network or disk work. Otherwise
    /// the archive is fetched into a freshly allocated working directory and
    /// its metadata extracted. Failure to fetch or extract removes the
    /// directory again so a failed analysis leaves no trace.
    pub fn analyze(&self, origin_url: &str) -> Result<AnalyzeOutcome> {
        if let Some(record) = self.index.find_by_origin(origin_url) {
            log::info!("analysis cache hit for {}: {}", origin_url, record.identifier);

            return Ok(AnalyzeOutcome {
                source_url: self.download_url(&record.identifier, ArtifactName::SourceIpa),
                identifier: record.identifier,
                bundle_id: record.bundle_id,
                app_name: record.app_name,
                cached: true,
            });
        }

        let identifier = self.store.allocate()?;
        let source_path = self.store.path_for(&identifier, ArtifactName::SourceIpa);

        if let Err(err) = fetch::download_file(origin_url, &source_path) {
            self.store.remove(&identifier);

            return Err(err);
        }

        let metadata = match AppMetadata::from_ipa(&source_path) {
            Ok(metadata) => metadata,
            Err(err) => {
                self.store.remove(&identifier);

                return Err(err.into());
            }
        };

        self.index.insert(AnalysisRecord::new(
            &identifier,
            origin_url,
            &metadata.bundle_id,
            &metadata.app_name,
        ))?;

        log::info!(
            "analyzed {} as {} ({}): {}",
            origin_url,
            metadata.bundle_id,
            metadata.app_name,
            identifier
        );

        Ok(AnalyzeOutcome {
            source_url: self.download_url(&identifier, ArtifactName::SourceIpa),
            identifier,
            bundle_id: metadata.bundle_id,
            app_name: metadata.app_name,
            cached: false,
        })
    }

    /// Re-sign a source archive with uploaded credentials.
    pub fn resign(&self, request: ResignRequest) -> Result<ResignOutcome> {
        let (identifier, known_bundle_id, known_app_name) = match &request.source {
            ResignSource::Identifier(identifier) => {
                let record = self
                    .index
                    .find_by_identifier(identifier)
                    .ok_or_else(|| ResignError::UnknownIdentifier(identifier.clone()))?;

                // The index is a cache; the directory is ground truth.
                if !self.store.resolve(identifier).is_dir() {
                    return Err(ResignError::UnknownIdentifier(identifier.clone()));
                }

                (record.identifier, record.bundle_id, record.app_name)
            }
            ResignSource::Url(origin_url) => self.prepare_from_url(origin_url, &request)?,
        };

        let bundle_id = override_or(&request.bundle_id, &known_bundle_id);
        let app_name = override_or(&request.app_name, &known_app_name);

        // The signer must never run with an empty identity or name.
        if bundle_id.is_empty() || app_name.is_empty() {
            return Err(ResignError::MissingMetadata);
        }

        let credential_path = self.store.path_for(&identifier, ArtifactName::Credential);
        let profile_path = self.store.path_for(&identifier, ArtifactName::Profile);
        std::fs::write(&credential_path, &request.credential)?;
        std::fs::write(&profile_path, &request.profile)?;

        if request.password.is_empty() {
            return Err(ResignError::MissingCredentialPassword);
        }

        let source_path = self.store.path_for(&identifier, ArtifactName::SourceIpa);
        let output_path = self.store.path_for(&identifier, ArtifactName::ResignedIpa);

        self.signer.sign(&SignRequest {
            credential: &credential_path,
            profile: &profile_path,
            password: &request.password,
            bundle_id,
            app_name,
            output: &output_path,
            source: &source_path,
        })?;

        if !output_path.is_file() {
            return Err(ResignError::SigningOutputMissing);
        }

        let resigned_url = self.download_url(&identifier, ArtifactName::ResignedIpa);

        let manifest_data = manifest::install_manifest(&resigned_url, bundle_id, app_name)?;
        std::fs::write(
            self.store.path_for(&identifier, ArtifactName::Manifest),
            manifest_data,
        )?;

        log::info!("re-signed {} as {} ({})", identifier, bundle_id, app_name);

        Ok(ResignOutcome {
            manifest_url: self.download_url(&identifier, ArtifactName::Manifest),
            source_url: self.download_url(&identifier, ArtifactName::SourceIpa),
            resigned_url,
            bundle_id: bundle_id.to_string(),
            app_name: app_name.to_string(),
            identifier,
        })
    }

    /// Filesystem path for serving a stored artifact.
    ///
    /// The filename is validated against the artifact allow-list before any
    /// path is composed, so nothing outside a working directory can be
    /// addressed. Existence is the caller's concern.
    pub fn artifact_path(&self, identifier: &str, filename: &str) -> Result<(ArtifactName, PathBuf)> {
        let artifact = ArtifactName::from_filename(filename)?;

        Ok((artifact, self.store.path_for(identifier, artifact)))
    }

    /// Allocate and populate a working directory for a URL-sourced re-sign.
    ///
    /// Unlike [Self::analyze], metadata extraction is best effort here: the
    /// caller may supply the identity explicitly, and the required-fields
    /// check happens after override resolution.
    fn prepare_from_url(
        &self,
        origin_url: &str,
        request: &ResignRequest,
    ) -> Result<(String, String, String)> {
        let identifier = self.store.allocate()?;
        let source_path = self.store.path_for(&identifier, ArtifactName::SourceIpa);

        if let Err(err) = fetch::download_file(origin_url, &source_path) {
            self.store.remove(&identifier);

            return Err(err);
        }

        let (bundle_id, app_name) = match AppMetadata::from_ipa(&source_path) {
            Ok(metadata) => (metadata.bundle_id, metadata.app_name),
            Err(err) => {
                log::warn!("metadata extraction failed for {}: {}", origin_url, err);

                (String::new(), String::new())
            }
        };

        let bundle_id = override_or(&request.bundle_id, &bundle_id).to_string();
        let app_name = override_or(&request.app_name, &app_name).to_string();

        self.index.insert(AnalysisRecord::new(
            &identifier,
            origin_url,
            &bundle_id,
            &app_name,
        ))?;

        Ok((identifier, bundle_id, app_name))
    }

    fn download_url(&self, identifier: &str, artifact: ArtifactName) -> String {
        format!("{}/download/{}/{}", self.base_url, identifier, artifact)
    }
}

fn override_or<'a>(value: &'a Option<String>, fallback: &'a str) -> &'a str {
    match value.as_deref() {
        Some(v) if !v.is_empty() => v,
        _ => fallback,
    }
}

#[cfg(test)]
mod tests {
    use {
        super::*,
        crate::testutil,
        std::sync::{
            atomic::{AtomicUsize, Ordering},
            Arc, Mutex,
        },
    };

    /// What the fake signer should do when invoked.
    enum FakeBehavior {
        /// Exit successfully and write the declared output file.
        WriteOutput,

        /// Exit successfully without writing anything.
        SucceedSilently,

        /// Report failure with the given combined output.
        Fail(&'static str),
    }

    /// Arguments captured from one [Signer::sign] invocation.
    #[derive(Clone, Debug)]
    struct RecordedCall {
        credential: PathBuf,
        profile: PathBuf,
        password: String,
        bundle_id: String,
        app_name: String,
        output: PathBuf,
        source: PathBuf,
    }

    struct FakeSigner {
        behavior: FakeBehavior,
        invocations: AtomicUsize,
        calls: Mutex<Vec<RecordedCall>>,
    }

    impl FakeSigner {
        fn new(behavior: FakeBehavior) -> Arc<Self> {
            Arc::new(Self {
                behavior,
                invocations: AtomicUsize::new(0),
                calls: Mutex::new(vec![]),
            })
        }

        fn invocations(&self) -> usize {
            self.invocations.load(Ordering::SeqCst)
        }

        fn last_call(&self) -> RecordedCall {
            self.calls.lock().unwrap().last().unwrap().clone()
        }
    }

    impl Signer for Arc<FakeSigner> {
        fn sign(&self, request: &SignRequest<'_>) -> Result<()> {
            self.invocations.fetch_add(1, Ordering::SeqCst);
            self.calls.lock().unwrap().push(RecordedCall {
                credential: request.credential.to_path_buf(),
                profile: request.profile.to_path_buf(),
                password: request.password.to_string(),
                bundle_id: request.bundle_id.to_string(),
                app_name: request.app_name.to_string(),
                output: request.output.to_path_buf(),
                source: request.source.to_path_buf(),
            });

            match &self.behavior {
                FakeBehavior::WriteOutput => {
                    std::fs::write(request.output, b"signed ipa")?;

                    Ok(())
                }
                FakeBehavior::SucceedSilently => Ok(()),
                FakeBehavior::Fail(output) => Err(ResignError::SigningFailed {
                    output: output.to_string(),
                }),
            }
        }
    }

    fn service_with(
        signer: Arc<FakeSigner>,
    ) -> (ResignService, tempfile::TempDir) {
        let temp_dir = tempfile::tempdir().unwrap();
        let store = ArtifactStore::new(temp_dir.path()).unwrap();
        let service = ResignService::new(store, Box::new(signer), "http://host/");

        (service, temp_dir)
    }

    fn resign_request(source: ResignSource) -> ResignRequest {
        ResignRequest {
            source,
            credential: b"credential bytes".to_vec(),
            profile: b"profile bytes".to_vec(),
            password: "secret".to_string(),
            bundle_id: None,
            app_name: None,
        }
    }

    #[test]
    fn analyze_extracts_and_caches() -> Result<()> {
        let ipa = testutil::sample_ipa("com.example.app", None, Some("ExampleApp"));
        let url = testutil::serve(testutil::http_ok(&ipa), 1);

        let signer = FakeSigner::new(FakeBehavior::WriteOutput);
        let (service, _temp_dir) = service_with(signer);

        let first = service.analyze(&url)?;
        assert_eq!(first.bundle_id, "com.example.app");
        assert_eq!(first.app_name, "ExampleApp");
        assert!(!first.cached);
        assert_eq!(
            first.source_url,
            format!("http://host/download/{}/source.ipa", first.identifier)
        );

        // The fixture serves exactly one response, so a second download
        // would fail. The cache must answer instead.
        let second = service.analyze(&url)?;
        assert!(second.cached);
        assert_eq!(second.identifier, first.identifier);
        assert_eq!(service.index().len(), 1);

        Ok(())
    }

    #[test]
    fn analyze_rolls_back_on_fetch_failure() {
        let url = testutil::serve(
            b"HTTP/1.1 500 Internal Server Error\r\nContent-Length: 0\r\nConnection: close\r\n\r\n"
                .to_vec(),
            1,
        );

        let signer = FakeSigner::new(FakeBehavior::WriteOutput);
        let (service, temp_dir) = service_with(signer);

        assert!(matches!(service.analyze(&url), Err(ResignError::Fetch(_))));
        assert!(service.index().is_empty());
        assert_eq!(std::fs::read_dir(temp_dir.path()).unwrap().count(), 0);
    }

    #[test]
    fn analyze_rolls_back_on_bad_archive() {
        let url = testutil::serve(testutil::http_ok(b"this is not a zip"), 1);

        let signer = FakeSigner::new(FakeBehavior::WriteOutput);
        let (service, temp_dir) = service_with(signer);

        assert!(matches!(
            service.analyze(&url),
            Err(ResignError::Analysis(_))
        ));
        assert!(service.index().is_empty());
        assert_eq!(std::fs::read_dir(temp_dir.path()).unwrap().count(), 0);
    }

    #[test]
    fn concurrent_analyze_converges() {
        let ipa = testutil::sample_ipa("com.example.app", Some("Example"), None);
        let url = testutil::serve(testutil::http_ok(&ipa), 8);

        let signer = FakeSigner::new(FakeBehavior::WriteOutput);
        let (service, _temp_dir) = service_with(signer);
        let service = Arc::new(service);

        let handles = (0..8)
            .map(|_| {
                let service = service.clone();
                let url = url.clone();

                std::thread::spawn(move || service.analyze(&url))
            })
            .collect::<Vec<_>>();

        for handle in handles {
            assert!(handle.join().unwrap().is_ok());
        }

        // Racers may have produced extra records; lookups converge on one.
        let winner = service.index().find_by_origin(&url).unwrap();
        let settled = service.analyze(&url).unwrap();
        assert!(settled.cached);
        assert_eq!(settled.identifier, winner.identifier);
    }

    #[test]
    fn resign_existing_identifier() -> Result<()> {
        let ipa = testutil::sample_ipa("com.example.app", Some("Example"), None);
        let url = testutil::serve(testutil::http_ok(&ipa), 1);

        let signer = FakeSigner::new(FakeBehavior::WriteOutput);
        let (service, _temp_dir) = service_with(signer.clone());

        let analyzed = service.analyze(&url)?;
        let outcome = service.resign(resign_request(ResignSource::Identifier(
            analyzed.identifier.clone(),
        )))?;

        assert_eq!(outcome.identifier, analyzed.identifier);
        assert_eq!(outcome.bundle_id, "com.example.app");
        assert_eq!(outcome.app_name, "Example");
        assert_eq!(
            outcome.manifest_url,
            format!("http://host/download/{}/manifest.plist", outcome.identifier)
        );
        assert_eq!(
            outcome.resigned_url,
            format!("http://host/download/{}/resigned.ipa", outcome.identifier)
        );

        assert_eq!(signer.invocations(), 1);
        let call = signer.last_call();
        assert_eq!(call.password, "secret");
        assert_eq!(call.bundle_id, "com.example.app");
        assert_eq!(call.app_name, "Example");
        assert_eq!(std::fs::read(&call.credential)?, b"credential bytes");
        assert_eq!(std::fs::read(&call.profile)?, b"profile bytes");
        assert!(call.source.ends_with("source.ipa"));
        assert!(call.output.ends_with("resigned.ipa"));

        // Manifest was persisted and points at the signed archive.
        let (_, manifest_path) =
            service.artifact_path(&outcome.identifier, "manifest.plist")?;
        let manifest = plist::Value::from_reader(std::io::Cursor::new(
            std::fs::read(manifest_path)?,
        ))
        .unwrap();
        let items = manifest
            .into_dictionary()
            .unwrap()
            .remove("items")
            .unwrap();
        assert_eq!(items.as_array().unwrap().len(), 1);

        Ok(())
    }

    #[test]
    fn resign_unknown_identifier() {
        let signer = FakeSigner::new(FakeBehavior::WriteOutput);
        let (service, _temp_dir) = service_with(signer.clone());

        assert!(matches!(
            service.resign(resign_request(ResignSource::Identifier("nope".to_string()))),
            Err(ResignError::UnknownIdentifier(_))
        ));
        assert_eq!(signer.invocations(), 0);
    }

    #[test]
    fn resign_identifier_without_directory() -> Result<()> {
        let ipa = testutil::sample_ipa("com.example.app", Some("Example"), None);
        let url = testutil::serve(testutil::http_ok(&ipa), 1);

        let signer = FakeSigner::new(FakeBehavior::WriteOutput);
        let (service, _temp_dir) = service_with(signer);

        let analyzed = service.analyze(&url)?;

        // Index entry survives, but the directory is the ground truth.
        std::fs::remove_dir_all(
            service
                .artifact_path(&analyzed.identifier, "source.ipa")?
                .1
                .parent()
                .unwrap(),
        )?;

        assert!(matches!(
            service.resign(resign_request(ResignSource::Identifier(
                analyzed.identifier
            ))),
            Err(ResignError::UnknownIdentifier(_))
        ));

        Ok(())
    }

    #[test]
    fn resign_fresh_url_with_overrides() -> Result<()> {
        // Archive with no Info.plist at all; identity comes from overrides.
        let ipa = testutil::zip_with_entry("Payload/Example.app/binary", b"junk");
        let url = testutil::serve(testutil::http_ok(&ipa), 1);

        let signer = FakeSigner::new(FakeBehavior::WriteOutput);
        let (service, _temp_dir) = service_with(signer.clone());

        let mut request = resign_request(ResignSource::Url(url.clone()));
        request.bundle_id = Some("com.override.app".to_string());
        request.app_name = Some("Override".to_string());

        let outcome = service.resign(request)?;
        assert_eq!(outcome.bundle_id, "com.override.app");
        assert_eq!(outcome.app_name, "Override");

        let call = signer.last_call();
        assert_eq!(call.bundle_id, "com.override.app");
        assert_eq!(call.app_name, "Override");

        // The resolved identity was recorded for later reuse by identifier.
        let record = service.index().find_by_origin(&url).unwrap();
        assert_eq!(record.identifier, outcome.identifier);
        assert_eq!(record.bundle_id, "com.override.app");

        Ok(())
    }

    #[test]
    fn resign_fresh_url_without_identity_fails_before_signer() {
        let ipa = testutil::zip_with_entry("Payload/Example.app/binary", b"junk");
        let url = testutil::serve(testutil::http_ok(&ipa), 1);

        let signer = FakeSigner::new(FakeBehavior::WriteOutput);
        let (service, _temp_dir) = service_with(signer.clone());

        assert!(matches!(
            service.resign(resign_request(ResignSource::Url(url))),
            Err(ResignError::MissingMetadata)
        ));
        assert_eq!(signer.invocations(), 0);
    }

    #[test]
    fn resign_fresh_url_rolls_back_on_fetch_failure() {
        let url = testutil::serve(
            b"HTTP/1.1 404 Not Found\r\nContent-Length: 0\r\nConnection: close\r\n\r\n".to_vec(),
            1,
        );

        let signer = FakeSigner::new(FakeBehavior::WriteOutput);
        let (service, temp_dir) = service_with(signer);

        assert!(matches!(
            service.resign(resign_request(ResignSource::Url(url))),
            Err(ResignError::Fetch(_))
        ));
        assert!(service.index().is_empty());
        assert_eq!(std::fs::read_dir(temp_dir.path()).unwrap().count(), 0);
    }

    #[test]
    fn empty_password_rejected_before_signer_runs() -> Result<()> {
        let ipa = testutil::sample_ipa("com.example.app", Some("Example"), None);
        let url = testutil::serve(testutil::http_ok(&ipa), 1);

        let signer = FakeSigner::new(FakeBehavior::WriteOutput);
        let (service, _temp_dir) = service_with(signer.clone());

        let analyzed = service.analyze(&url)?;
        let mut request = resign_request(ResignSource::Identifier(analyzed.identifier));
        request.password = String::new();

        assert!(matches!(
            service.resign(request),
            Err(ResignError::MissingCredentialPassword)
        ));
        assert_eq!(signer.invocations(), 0);

        Ok(())
    }

    #[test]
    fn signer_failure_carries_output() -> Result<()> {
        let ipa = testutil::sample_ipa("com.example.app", Some("Example"), None);
        let url = testutil::serve(testutil::http_ok(&ipa), 1);

        let signer = FakeSigner::new(FakeBehavior::Fail("bad provisioning profile"));
        let (service, _temp_dir) = service_with(signer);

        let analyzed = service.analyze(&url)?;
        match service.resign(resign_request(ResignSource::Identifier(analyzed.identifier))) {
            Err(ResignError::SigningFailed { output }) => {
                assert_eq!(output, "bad provisioning profile");
            }
            other => panic!("unexpected result: {:?}", other.map(|_| ())),
        }

        Ok(())
    }

    #[test]
    fn missing_output_detected() -> Result<()> {
        let ipa = testutil::sample_ipa("com.example.app", Some("Example"), None);
        let url = testutil::serve(testutil::http_ok(&ipa), 1);

        let signer = FakeSigner::new(FakeBehavior::SucceedSilently);
        let (service, _temp_dir) = service_with(signer);

        let analyzed = service.analyze(&url)?;

        assert!(matches!(
            service.resign(resign_request(ResignSource::Identifier(analyzed.identifier))),
            Err(ResignError::SigningOutputMissing)
        ));

        Ok(())
    }

    #[test]
    fn artifact_path_rejects_unlisted_names() {
        let signer = FakeSigner::new(FakeBehavior::WriteOutput);
        let (service, _temp_dir) = service_with(signer);

        assert!(matches!(
            service.artifact_path("abc", "../../../etc/passwd"),
            Err(ResignError::InvalidArtifactName(_))
        ));
    }
}

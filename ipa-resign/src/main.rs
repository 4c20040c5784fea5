// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! HTTP boundary for the re-signing service.
//!
//! Routes deliver validated form/multipart input to [ResignService] and
//! serialize its outcomes as JSON. The core is blocking, so every call into
//! it runs under `spawn_blocking`; one hung signing subprocess therefore
//! stalls only its own request.

use {
    axum::{
        extract::{DefaultBodyLimit, Multipart, Path, State},
        http::{header, HeaderMap, HeaderValue, StatusCode},
        response::{IntoResponse, Response},
        routing::{get, post},
        Form, Json, Router,
    },
    clap::Parser,
    ipa_resign::{
        ArtifactStore, ResignError, ResignRequest, ResignService, ResignSource, ZsignSigner,
    },
    serde::Deserialize,
    serde_json::json,
    std::{path::PathBuf, sync::Arc},
    tower_http::cors::CorsLayer,
};

/// Upper bound on request bodies (uploaded credentials and profiles).
const MAX_UPLOAD_BYTES: usize = 64 * 1024 * 1024;

/// Re-sign iOS application archives over HTTP.
#[derive(Parser)]
#[command(name = "ipa-resign-server", version)]
struct Args {
    /// Base URL for generated download links.
    #[arg(long, env = "BASE_URL")]
    base_url: Option<String>,

    /// Port to listen on.
    #[arg(long, env = "PORT", default_value_t = 8080)]
    port: u16,

    /// Root directory for per-identifier working directories.
    #[arg(long, env = "OUTPUT_DIR", default_value = "./output")]
    output_dir: PathBuf,

    /// Path to the external signing tool.
    #[arg(long, env = "SIGNER", default_value = "zsign")]
    signer: PathBuf,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let args = Args::parse();

    let base_url = args.base_url.clone().unwrap_or_else(|| {
        log::warn!("BASE_URL not set; deriving download links from the listen port");

        format!("http://localhost:{}", args.port)
    });
    log::info!("using base URL {}", base_url);

    let store = ArtifactStore::new(&args.output_dir)?;
    let service = Arc::new(ResignService::new(
        store,
        Box::new(ZsignSigner::new(&args.signer)),
        base_url,
    ));

    let app = router(service);

    let listener = tokio::net::TcpListener::bind(("0.0.0.0", args.port)).await?;
    log::info!("listening on {}", listener.local_addr()?);

    axum::serve(listener, app).await?;

    Ok(())
}

fn router(service: Arc<ResignService>) -> Router {
    Router::new()
        .route("/analyze", post(analyze))
        .route("/resign", post(resign))
        .route("/download/:uuid/:filename", get(download))
        .layer(DefaultBodyLimit::max(MAX_UPLOAD_BYTES))
        .layer(CorsLayer::permissive())
        .with_state(service)
}

#[derive(Deserialize)]
struct AnalyzeForm {
    #[serde(default)]
    ipa_url: String,
}

async fn analyze(
    State(service): State<Arc<ResignService>>,
    Form(form): Form<AnalyzeForm>,
) -> Response {
    if form.ipa_url.is_empty() {
        return error_body(StatusCode::BAD_REQUEST, "Missing ipa_url parameter");
    }

    let result = tokio::task::spawn_blocking(move || service.analyze(&form.ipa_url)).await;

    match result {
        Ok(Ok(outcome)) => Json(json!({
            "uuid": outcome.identifier,
            "bundle_id": outcome.bundle_id,
            "app_name": outcome.app_name,
            "source_url": outcome.source_url,
            "analyzed": true,
        }))
        .into_response(),
        Ok(Err(err)) => error_response(err),
        Err(err) => task_failure(err),
    }
}

async fn resign(State(service): State<Arc<ResignService>>, mut multipart: Multipart) -> Response {
    let mut ipa_uuid = String::new();
    let mut ipa_url = String::new();
    let mut password = String::new();
    let mut bundle_id = None;
    let mut app_name = None;
    let mut credential = None;
    let mut profile = None;

    loop {
        let field = match multipart.next_field().await {
            Ok(Some(field)) => field,
            Ok(None) => break,
            Err(err) => {
                return error_body(
                    StatusCode::BAD_REQUEST,
                    &format!("invalid multipart payload: {}", err),
                );
            }
        };

        let Some(name) = field.name().map(|s| s.to_string()) else {
            continue;
        };

        match name.as_str() {
            "p12" => match field.bytes().await {
                Ok(data) => credential = Some(data.to_vec()),
                Err(err) => {
                    return error_body(
                        StatusCode::BAD_REQUEST,
                        &format!("error reading p12 upload: {}", err),
                    );
                }
            },
            "mobileprovision" => match field.bytes().await {
                Ok(data) => profile = Some(data.to_vec()),
                Err(err) => {
                    return error_body(
                        StatusCode::BAD_REQUEST,
                        &format!("error reading mobileprovision upload: {}", err),
                    );
                }
            },
            "ipa_uuid" | "ipa_url" | "p12_password" | "bundle_id" | "app_name" => {
                let value = match field.text().await {
                    Ok(value) => value,
                    Err(err) => {
                        return error_body(
                            StatusCode::BAD_REQUEST,
                            &format!("error reading {} field: {}", name, err),
                        );
                    }
                };

                match name.as_str() {
                    "ipa_uuid" => ipa_uuid = value,
                    "ipa_url" => ipa_url = value,
                    "p12_password" => password = value,
                    "bundle_id" => bundle_id = Some(value),
                    _ => app_name = Some(value),
                }
            }
            _ => {}
        }
    }

    let source = if !ipa_uuid.is_empty() {
        ResignSource::Identifier(ipa_uuid)
    } else if !ipa_url.is_empty() {
        ResignSource::Url(ipa_url)
    } else {
        return error_body(
            StatusCode::BAD_REQUEST,
            "Either ipa_url or ipa_uuid must be provided",
        );
    };

    let Some(credential) = credential else {
        return error_body(StatusCode::BAD_REQUEST, "Missing p12 file");
    };
    let Some(profile) = profile else {
        return error_body(StatusCode::BAD_REQUEST, "Missing mobileprovision file");
    };

    let request = ResignRequest {
        source,
        credential,
        profile,
        password,
        bundle_id,
        app_name,
    };

    let result = tokio::task::spawn_blocking(move || service.resign(request)).await;

    match result {
        Ok(Ok(outcome)) => Json(json!({
            "uuid": outcome.identifier,
            "plist_url": outcome.manifest_url,
            "source_url": outcome.source_url,
            "ipa_url": outcome.resigned_url,
            "bundle_id": outcome.bundle_id,
            "app_name": outcome.app_name,
        }))
        .into_response(),
        Ok(Err(err)) => error_response(err),
        Err(err) => task_failure(err),
    }
}

async fn download(
    State(service): State<Arc<ResignService>>,
    Path((uuid, filename)): Path<(String, String)>,
) -> Response {
    // Allow-list check happens before any filesystem access.
    let (artifact, path) = match service.artifact_path(&uuid, &filename) {
        Ok(v) => v,
        Err(err) => return error_response(err),
    };

    match tokio::fs::read(&path).await {
        Ok(data) => {
            let mut headers = HeaderMap::new();
            headers.insert(
                header::CONTENT_TYPE,
                HeaderValue::from_static(artifact.content_type()),
            );
            if artifact.is_attachment() {
                headers.insert(
                    header::CONTENT_DISPOSITION,
                    HeaderValue::from_str(&format!("attachment; filename={}", artifact))
                        .unwrap_or_else(|_| HeaderValue::from_static("attachment")),
                );
            }

            (headers, data).into_response()
        }
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
            error_body(StatusCode::NOT_FOUND, "File not found")
        }
        Err(err) => {
            log::error!("error reading artifact {}/{}: {}", uuid, artifact, err);

            error_body(StatusCode::INTERNAL_SERVER_ERROR, "unable to read artifact")
        }
    }
}

/// Map a core error to a structured failure response.
///
/// Caller mistakes map to 400, everything else to 500. Signing failures
/// carry the tool's combined output verbatim for diagnostics; nothing else
/// echoes internal detail.
fn error_response(err: ResignError) -> Response {
    let status = match &err {
        ResignError::UnknownIdentifier(_)
        | ResignError::MissingMetadata
        | ResignError::MissingCredentialPassword
        | ResignError::InvalidArtifactName(_) => StatusCode::BAD_REQUEST,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    };

    if status.is_server_error() {
        log::error!("request failed: {}", err);
    }

    let body = match &err {
        ResignError::SigningFailed { output } => json!({
            "error": "Signing failed",
            "output": output,
        }),
        ResignError::SignerLaunch(_, _) => json!({"error": "signing tool unavailable"}),
        _ => json!({"error": err.to_string()}),
    };

    (status, Json(body)).into_response()
}

fn error_body(status: StatusCode, message: &str) -> Response {
    (status, Json(json!({"error": message}))).into_response()
}

fn task_failure(err: tokio::task::JoinError) -> Response {
    log::error!("worker task failed: {}", err);

    error_body(StatusCode::INTERNAL_SERVER_ERROR, "internal error")
}

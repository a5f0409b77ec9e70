//! HTTP API for payment verification

use axum::{
    body::Bytes,
    extract::{DefaultBodyLimit, Host, Multipart, Path, Query, State},
    handler::HandlerWithoutStateExt,
    http::{StatusCode, Uri},
    response::{
        sse::{Event, KeepAlive, Sse},
        IntoResponse, Redirect,
    },
    routing::{get, post},
    BoxError, Json, Router,
};
use axum_server::tls_rustls::RustlsConfig;
use serde::Deserialize;
use std::convert::Infallible;
use std::net::SocketAddr;
use std::time::Duration;
use tokio_stream::wrappers::BroadcastStream;
use tokio_stream::StreamExt;
use tower_http::cors::CorsLayer;
use tower_http::services::ServeDir;
use tracing::{debug, error, info, warn};

use super::auth::{RequireAdmin, SharedAdminRegistry};
use crate::config::AppConfig;
use crate::error::{Result, VerifyError};
use crate::logging::{LogEntry, SharedLogBuffer};
use crate::managers::verification_manager::MAX_SCREENSHOT_BYTES;
use crate::managers::{
    ApproveRequest, PageParams, PendingPage, SharedVerificationManager, StatusView,
    SubmitReceipt, SubmitRequest,
};
use crate::state::{ConfirmedRegistration, PendingVerification, RegistrationData};

/// Room for the form fields next to the screenshot
const MULTIPART_OVERHEAD: usize = 256 * 1024;

/// Shared state for web handlers
#[derive(Clone)]
pub struct AppState {
    pub verification_manager: SharedVerificationManager,
    pub admins: SharedAdminRegistry,
    pub log_buffer: SharedLogBuffer,
}

/// Ports configuration for HTTP to HTTPS redirect
#[derive(Clone, Copy)]
struct Ports {
    http: u16,
    https: u16,
}

pub fn build_router(state: AppState, upload_dir: &str) -> Router {
    Router::new()
        .route("/", get(health))
        .route("/verify/upload", post(upload_screenshot))
        .route("/verify/status/:id", get(verification_status))
        .route("/verify/pending", get(pending_verifications))
        .route("/verify/record/:id", get(verification_record))
        .route("/verify/approve/:id", post(approve_verification))
        .route("/verify/reject/:id", post(reject_verification))
        .route("/admin/logs", get(recent_logs))
        .route("/admin/logs/stream", get(logs_stream))
        .nest_service("/uploads", ServeDir::new(upload_dir))
        .layer(DefaultBodyLimit::max(MAX_SCREENSHOT_BYTES + MULTIPART_OVERHEAD))
        .layer(CorsLayer::permissive())
        .with_state(state)
}

/// Serve the API over HTTPS when certificates are present, plain HTTP otherwise
pub async fn start_web_server(config: &AppConfig, state: AppState) -> anyhow::Result<()> {
    let app = build_router(state, &config.upload_path);

    if !config.tls_enabled() {
        let addr = SocketAddr::from(([0, 0, 0, 0], config.http_port));
        let listener = tokio::net::TcpListener::bind(addr).await?;
        info!("Web server listening on http://{}", addr);
        info!("Public base URL: {}", config.base_url);
        axum::serve(listener, app).await?;
        return Ok(());
    }

    info!("Loading TLS certificates:");
    info!("  Certificate: {}", config.cert_path.display());
    info!("  Private key: {}", config.key_path.display());

    let tls_config = RustlsConfig::from_pem_file(&config.cert_path, &config.key_path)
        .await
        .map_err(|e| anyhow::anyhow!(
            "Failed to load TLS certificates: {}\n  Certificate: {}\n  Private key: {}\n\nHint: The private key must be in PKCS#8 PEM format.",
            e, config.cert_path.display(), config.key_path.display()
        ))?;

    tokio::spawn(redirect_http_to_https(Ports {
        http: config.http_port,
        https: config.https_port,
    }));

    let https_addr = SocketAddr::from(([0, 0, 0, 0], config.https_port));
    info!("Web server listening on https://{}", https_addr);
    info!("HTTP redirect server on http://0.0.0.0:{}", config.http_port);

    axum_server::bind_rustls(https_addr, tls_config)
        .serve(app.into_make_service())
        .await?;

    Ok(())
}

/// Redirect all HTTP requests to HTTPS
async fn redirect_http_to_https(ports: Ports) {
    fn make_https(host: &str, uri: Uri, https_port: u16) -> std::result::Result<Uri, BoxError> {
        let mut parts = uri.into_parts();
        parts.scheme = Some(axum::http::uri::Scheme::HTTPS);

        if parts.path_and_query.is_none() {
            parts.path_and_query = Some("/".parse()?);
        }

        let authority: axum::http::uri::Authority = host.parse()?;
        let bare_host = authority.host();

        // Only add port if it's not the default HTTPS port
        if https_port == 443 {
            parts.authority = Some(bare_host.parse()?);
        } else {
            parts.authority = Some(format!("{bare_host}:{https_port}").parse()?);
        }

        Ok(Uri::from_parts(parts)?)
    }

    let redirect = move |Host(host): Host, uri: Uri| async move {
        match make_https(&host, uri, ports.https) {
            Ok(uri) => Ok(Redirect::permanent(&uri.to_string())),
            Err(error) => {
                warn!(%error, "Failed to convert URI to HTTPS");
                Err(StatusCode::BAD_REQUEST)
            }
        }
    };

    let addr = SocketAddr::from(([0, 0, 0, 0], ports.http));
    let listener = match tokio::net::TcpListener::bind(addr).await {
        Ok(l) => l,
        Err(e) => {
            error!("Failed to bind HTTP redirect server on port {}: {}", ports.http, e);
            return;
        }
    };

    if let Err(e) = axum::serve(listener, redirect.into_make_service()).await {
        error!("HTTP redirect server error: {}", e);
    }
}

/// Health check endpoint
async fn health() -> &'static str {
    "Payment Verification Server Running"
}

/// POST /verify/upload - multipart screenshot + registration form
async fn upload_screenshot(
    State(state): State<AppState>,
    mut multipart: Multipart,
) -> Result<(StatusCode, Json<SubmitReceipt>)> {
    let mut screenshot: Option<(Vec<u8>, String)> = None;
    let mut registration_data: Option<RegistrationData> = None;
    let mut participant_name = None;
    let mut event_id = None;

    while let Some(field) = multipart.next_field().await.map_err(malformed)? {
        let name = field.name().unwrap_or_default().to_string();
        match name.as_str() {
            "screenshot" => {
                let content_type = field
                    .content_type()
                    .unwrap_or("application/octet-stream")
                    .to_string();
                let bytes = field.bytes().await.map_err(malformed)?;
                screenshot = Some((bytes.to_vec(), content_type));
            }
            "registrationData" => {
                let text = field.text().await.map_err(malformed)?;
                let data = serde_json::from_str(&text).map_err(|e| {
                    VerifyError::validation(format!("registrationData is not valid JSON: {}", e))
                })?;
                registration_data = Some(data);
            }
            "participantName" => participant_name = Some(field.text().await.map_err(malformed)?),
            "eventId" => event_id = Some(field.text().await.map_err(malformed)?),
            other => debug!("Ignoring multipart field '{}'", other),
        }
    }

    let (bytes, content_type) =
        screenshot.ok_or_else(|| VerifyError::validation("A payment screenshot is required"))?;
    let registration_data = registration_data
        .ok_or_else(|| VerifyError::validation("registrationData is required"))?;

    let receipt = state
        .verification_manager
        .submit(SubmitRequest {
            participant_name: participant_name.unwrap_or_default(),
            event_id: event_id.unwrap_or_default(),
            registration_data,
            screenshot: bytes,
            content_type,
        })
        .await?;

    Ok((StatusCode::ACCEPTED, Json(receipt)))
}

fn malformed(e: axum::extract::multipart::MultipartError) -> VerifyError {
    if e.status() == StatusCode::PAYLOAD_TOO_LARGE {
        return VerifyError::PayloadTooLarge {
            message: format!("screenshot may be at most {} bytes", MAX_SCREENSHOT_BYTES),
        };
    }
    VerifyError::validation(format!("Malformed multipart body: {}", e))
}

/// GET /verify/status/:id - polled by the participant's browser
async fn verification_status(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<StatusView>> {
    Ok(Json(state.verification_manager.poll_status(&id).await?))
}

/// GET /verify/pending?page&limit - admin review queue
async fn pending_verifications(
    State(state): State<AppState>,
    RequireAdmin(_admin): RequireAdmin,
    Query(params): Query<PageParams>,
) -> Json<PendingPage> {
    Json(state.verification_manager.list_pending(&params).await)
}

/// GET /verify/record/:id - full record for review
async fn verification_record(
    State(state): State<AppState>,
    RequireAdmin(_admin): RequireAdmin,
    Path(id): Path<String>,
) -> Result<Json<PendingVerification>> {
    Ok(Json(state.verification_manager.get_record(&id).await?))
}

/// POST /verify/approve/:id - optional `{transactionId, amount}` body
async fn approve_verification(
    State(state): State<AppState>,
    RequireAdmin(admin): RequireAdmin,
    Path(id): Path<String>,
    body: Bytes,
) -> Result<Json<ConfirmedRegistration>> {
    let request: ApproveRequest = if body.iter().all(u8::is_ascii_whitespace) {
        ApproveRequest::default()
    } else {
        serde_json::from_slice(&body).map_err(|e| {
            VerifyError::validation(format!("Invalid approval body: {}", e))
        })?
    };

    let registration = state
        .verification_manager
        .approve(&id, request, &admin)
        .await?;
    Ok(Json(registration))
}

/// POST /verify/reject/:id
async fn reject_verification(
    State(state): State<AppState>,
    RequireAdmin(admin): RequireAdmin,
    Path(id): Path<String>,
) -> Result<Json<PendingVerification>> {
    Ok(Json(state.verification_manager.reject(&id, &admin).await?))
}

#[derive(Deserialize)]
struct LogsParams {
    count: Option<usize>,
    record_id: Option<String>,
}

/// GET /admin/logs - recent captured log lines
async fn recent_logs(
    State(state): State<AppState>,
    RequireAdmin(_admin): RequireAdmin,
    Query(params): Query<LogsParams>,
) -> Json<Vec<LogEntry>> {
    let entries = match params.record_id {
        Some(record_id) => state.log_buffer.for_record(&record_id),
        None => state.log_buffer.get_recent(params.count.unwrap_or(200)),
    };
    Json(entries)
}

/// GET /admin/logs/stream - live log lines over SSE
async fn logs_stream(
    State(state): State<AppState>,
    RequireAdmin(_admin): RequireAdmin,
) -> impl IntoResponse {
    let rx = state.log_buffer.subscribe();
    let stream = BroadcastStream::new(rx).filter_map(|result| match result {
        Ok(entry) => Some(Ok::<_, Infallible>(Event::default().data(entry.to_json()))),
        Err(_) => None, // Skip lagged messages
    });

    Sse::new(stream).keep_alive(
        KeepAlive::new()
            .interval(Duration::from_secs(15))
            .text("ping"),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::testing::{
        adapters, MemoryBlobStore, RecordingNotifier, StaticTextExtractor,
    };
    use crate::config::{EventCatalog, EventConfig};
    use crate::logging::create_log_buffer;
    use crate::managers::create_shared_verification_manager;
    use crate::state::{create_shared_database, Database};
    use crate::web::auth::create_admin_registry;
    use axum::body::Body;
    use axum::http::{header, Request};
    use std::sync::Arc;
    use tower::ServiceExt;

    const BOUNDARY: &str = "fest-verify-boundary";

    fn app() -> Router {
        let events = Arc::new(EventCatalog::new(vec![EventConfig {
            id: "fest".to_string(),
            name: "Tech Fest".to_string(),
            registration_deadline: chrono::Utc::now() + chrono::Duration::days(7),
            whatsapp_link: Some("https://chat.whatsapp.com/fest".to_string()),
            fee: None,
        }]));

        let manager = create_shared_verification_manager(
            create_shared_database(Database::new()),
            None,
            events,
            adapters(
                Arc::new(MemoryBlobStore::new()),
                Arc::new(StaticTextExtractor(
                    "UPI Ref: ABCDEF123456 Amount: Rs 1,250.00 to user@upi".to_string(),
                )),
                Arc::new(RecordingNotifier::default()),
            ),
        );

        build_router(
            AppState {
                verification_manager: manager,
                admins: create_admin_registry("treasurer:s3cret"),
                log_buffer: create_log_buffer(100),
            },
            "uploads",
        )
    }

    fn multipart_body(include_screenshot: bool) -> Vec<u8> {
        multipart_body_with(include_screenshot.then_some("PNGDATA"))
    }

    fn multipart_body_with(screenshot: Option<&str>) -> Vec<u8> {
        let mut body = String::new();
        for (name, value) in [
            ("participantName", "Asha"),
            ("eventId", "fest"),
            ("registrationData", r#"{"teamName":"Null Pointers","members":[{"name":"Asha"}]}"#),
        ] {
            body.push_str(&format!(
                "--{BOUNDARY}\r\nContent-Disposition: form-data; name=\"{name}\"\r\n\r\n{value}\r\n"
            ));
        }
        if let Some(data) = screenshot {
            body.push_str(&format!(
                "--{BOUNDARY}\r\nContent-Disposition: form-data; name=\"screenshot\"; filename=\"pay.png\"\r\nContent-Type: image/png\r\n\r\n{data}\r\n"
            ));
        }
        body.push_str(&format!("--{BOUNDARY}--\r\n"));
        body.into_bytes()
    }

    fn upload_request(include_screenshot: bool) -> Request<Body> {
        Request::builder()
            .method("POST")
            .uri("/verify/upload")
            .header(
                header::CONTENT_TYPE,
                format!("multipart/form-data; boundary={BOUNDARY}"),
            )
            .body(Body::from(multipart_body(include_screenshot)))
            .unwrap()
    }

    async fn json_body(response: axum::response::Response) -> serde_json::Value {
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    fn admin_post(uri: &str, body: &'static str) -> Request<Body> {
        Request::builder()
            .method("POST")
            .uri(uri)
            .header(header::AUTHORIZATION, "Bearer s3cret")
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(body))
            .unwrap()
    }

    #[tokio::test]
    async fn test_upload_then_approve_flow() {
        let app = app();

        let response = app.clone().oneshot(upload_request(true)).await.unwrap();
        assert_eq!(response.status(), StatusCode::ACCEPTED);
        let receipt = json_body(response).await;
        assert_eq!(receipt["status"], "PENDING");
        assert_eq!(receipt["transactionId"], "ABCDEF123456");
        assert_eq!(receipt["upiId"], "user@upi");
        let id = receipt["id"].as_str().unwrap().to_string();

        let response = app
            .clone()
            .oneshot(admin_post(&format!("/verify/approve/{id}"), ""))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let registration = json_body(response).await;
        assert_eq!(registration["verified"], true);

        let response = app
            .clone()
            .oneshot(
                Request::get(format!("/verify/status/{id}"))
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        let status = json_body(response).await;
        assert_eq!(status["status"], "VERIFIED");
        assert_eq!(status["whatsappLink"], "https://chat.whatsapp.com/fest");

        let response = app
            .oneshot(admin_post(&format!("/verify/reject/{id}"), ""))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::CONFLICT);
    }

    #[tokio::test]
    async fn test_upload_without_screenshot_is_bad_request() {
        let response = app().oneshot(upload_request(false)).await.unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_oversized_screenshot_is_payload_too_large() {
        let huge = "A".repeat(MAX_SCREENSHOT_BYTES + MULTIPART_OVERHEAD);
        let request = Request::builder()
            .method("POST")
            .uri("/verify/upload")
            .header(
                header::CONTENT_TYPE,
                format!("multipart/form-data; boundary={BOUNDARY}"),
            )
            .body(Body::from(multipart_body_with(Some(&huge))))
            .unwrap();

        let response = app().oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::PAYLOAD_TOO_LARGE);
        let body = json_body(response).await;
        assert!(body["error"].as_str().unwrap().contains("at most"));
    }

    #[tokio::test]
    async fn test_admin_routes_require_token() {
        let app = app();

        let response = app
            .clone()
            .oneshot(Request::get("/verify/pending").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

        let response = app
            .clone()
            .oneshot(
                Request::post("/verify/reject/whatever")
                    .header(header::AUTHORIZATION, "Bearer wrong")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

        let response = app
            .oneshot(
                Request::get("/verify/pending?page=1&limit=5")
                    .header(header::AUTHORIZATION, "Bearer s3cret")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let page = json_body(response).await;
        assert_eq!(page["limit"], 5);
        assert_eq!(page["total"], 0);
    }

    #[tokio::test]
    async fn test_unknown_status_is_not_found() {
        let response = app()
            .oneshot(
                Request::get("/verify/status/nope")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
        let body = json_body(response).await;
        assert!(body["error"].as_str().unwrap().contains("nope"));
    }

    #[tokio::test]
    async fn test_approve_with_override_body() {
        let app = app();
        let receipt = json_body(app.clone().oneshot(upload_request(true)).await.unwrap()).await;
        let id = receipt["id"].as_str().unwrap().to_string();

        let response = app
            .oneshot(admin_post(
                &format!("/verify/approve/{id}"),
                r#"{"transactionId": "309876543210", "amount": 900}"#,
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let registration = json_body(response).await;
        assert_eq!(registration["transactionId"], "309876543210");
        assert_eq!(registration["amount"], 900.0);
    }
}

//! HTTP surface.
//!
//! | Method | Path | Handler |
//! |--------|------|---------|
//! | GET | `/health` | liveness |
//! | POST | `/webhook/{token}` | webhook intake |
//! | POST | `/api/setup` | create setup |
//! | GET | `/api/setups` | list active setups |
//! | GET | `/api/setup/{id}` | read one setup, with connection state |
//! | PATCH | `/api/setup/{id}` | update non-secret fields |
//! | DELETE | `/api/setup/{id}` | soft-delete |
//!
//! Every setup response carries non-secret fields only.

use crate::config::RelayConfig;
use crate::dispatch::{DispatchOutcome, InboundEvent, WebhookDispatcher};
use crate::models::{
    GITHUB_EVENT_HEADER, GITLAB_EVENT_HEADER, NewSetup, PublicSetupInfo, SetupId, SetupUpdate,
};
use crate::registry::{ConnectionRegistry, ConnectionState};
use crate::storage::{CredentialStore, run_blocking};
use crate::{Error, Result};
use axum::body::Bytes;
use axum::extract::{DefaultBodyLimit, Path, State};
use axum::http::{HeaderMap, StatusCode, header};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::Serialize;
use serde_json::{Value, json};
use std::sync::Arc;
use tower_http::set_header::SetResponseHeaderLayer;
use tower_http::trace::TraceLayer;

/// Largest accepted webhook body; GitHub caps payloads at 25 MB.
const MAX_WEBHOOK_BODY: usize = 25 * 1024 * 1024;

/// Shared handler state.
#[derive(Clone)]
pub struct AppState {
    store: Arc<dyn CredentialStore>,
    registry: Arc<ConnectionRegistry>,
    dispatcher: Arc<WebhookDispatcher>,
    config: Arc<RelayConfig>,
}

impl std::fmt::Debug for AppState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AppState").finish_non_exhaustive()
    }
}

impl AppState {
    /// Wires the store and registry into a dispatcher.
    #[must_use]
    pub fn new(
        store: Arc<dyn CredentialStore>,
        registry: Arc<ConnectionRegistry>,
        config: Arc<RelayConfig>,
    ) -> Self {
        let dispatcher = Arc::new(WebhookDispatcher::new(
            Arc::clone(&store),
            Arc::clone(&registry),
            config.timeouts.send,
        ));
        Self {
            store,
            registry,
            dispatcher,
            config,
        }
    }
}

#[derive(Serialize)]
struct ApiErrorBody {
    error: &'static str,
    message: String,
}

type ApiErrorReply = (StatusCode, Json<ApiErrorBody>);

type ApiResult<T> = std::result::Result<T, ApiErrorReply>;

fn map_error(err: Error) -> ApiErrorReply {
    let (status, code) = match &err {
        Error::Validation(_) => (StatusCode::BAD_REQUEST, "validation"),
        Error::NotFound(_) => (StatusCode::NOT_FOUND, "not_found"),
        Error::MalformedPayload { .. } => (StatusCode::BAD_REQUEST, "malformed_payload"),
        Error::Storage { .. }
        | Error::Connection { .. }
        | Error::ChannelRejected { .. }
        | Error::Config(_) => {
            (StatusCode::INTERNAL_SERVER_ERROR, "internal")
        },
    };

    let message = if status.is_server_error() {
        tracing::error!(error = %err, "Request failed");
        "internal server error".to_string()
    } else {
        err.to_string()
    };

    (
        status,
        Json(ApiErrorBody {
            error: code,
            message,
        }),
    )
}

fn not_found(what: &str) -> ApiErrorReply {
    map_error(Error::NotFound(what.to_string()))
}

/// Builds the application router.
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route(
            "/webhook/{token}",
            post(webhook).layer(DefaultBodyLimit::max(MAX_WEBHOOK_BODY)),
        )
        .route("/api/setup", post(create_setup))
        .route("/api/setups", get(list_setups))
        .route(
            "/api/setup/{id}",
            get(get_setup).patch(update_setup).delete(disable_setup),
        )
        .layer(SetResponseHeaderLayer::overriding(
            header::X_CONTENT_TYPE_OPTIONS,
            header::HeaderValue::from_static("nosniff"),
        ))
        .layer(SetResponseHeaderLayer::overriding(
            header::CACHE_CONTROL,
            header::HeaderValue::from_static("no-store"),
        ))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Binds `config.bind_addr` and serves until Ctrl-C.
///
/// # Errors
///
/// Returns [`Error::Config`] if the address cannot be bound, or
/// [`Error::Connection`] if the server fails.
pub async fn serve(state: AppState) -> Result<()> {
    let addr = state.config.bind_addr.clone();
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .map_err(|e| Error::Config(format!("cannot bind {addr}: {e}")))?;
    tracing::info!(addr = %addr, "HTTP server listening");

    axum::serve(listener, router(state))
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
            tracing::info!("Shutdown signal received");
        })
        .await
        .map_err(|e| Error::connection("serve", e))
}

fn header_str<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers.get(name).and_then(|v| v.to_str().ok())
}

async fn health() -> Json<Value> {
    Json(json!({ "ok": true }))
}

async fn webhook(
    Path(token): Path<String>,
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> ApiResult<Json<Value>> {
    let event = InboundEvent::from_request(
        header_str(&headers, GITHUB_EVENT_HEADER),
        header_str(&headers, GITLAB_EVENT_HEADER),
        header_str(&headers, header::CONTENT_TYPE.as_str()),
        &body,
    );

    match state.dispatcher.dispatch(&token, event).await {
        Ok(DispatchOutcome::NotFound) => Err(not_found("webhook")),
        Ok(DispatchOutcome::Ignored) => Ok(Json(json!({ "ok": true, "sent": 0 }))),
        Ok(DispatchOutcome::Delivered { sent }) => Ok(Json(json!({ "ok": true, "sent": sent }))),
        Err(e) => Err(map_error(e)),
    }
}

#[derive(Serialize)]
struct CreatedSetup {
    success: bool,
    setup: PublicSetupInfo,
    delivery_token: String,
    webhook_url: String,
    content_type: &'static str,
}

fn request_base(headers: &HeaderMap) -> String {
    let scheme = header_str(headers, "x-forwarded-proto").unwrap_or("http");
    let host = header_str(headers, header::HOST.as_str()).unwrap_or("localhost");
    format!("{scheme}://{host}")
}

async fn create_setup(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> ApiResult<(StatusCode, Json<CreatedSetup>)> {
    let request: NewSetup = serde_json::from_slice(&body)
        .map_err(|e| map_error(Error::Validation(format!("invalid JSON body: {e}"))))?;

    let info = run_blocking(&state.store, move |store| store.create(request))
        .await
        .map_err(map_error)?;
    tracing::info!(setup_id = %info.id, repo = %info.repo, "Setup created");

    spawn_connect(&state, info.id.clone());

    let webhook_url = state
        .config
        .webhook_url(&request_base(&headers), info.delivery_token.as_str());
    Ok((
        StatusCode::CREATED,
        Json(CreatedSetup {
            success: true,
            delivery_token: info.delivery_token.to_string(),
            webhook_url,
            content_type: "application/json",
            setup: info,
        }),
    ))
}

/// Connects a freshly created tenant in the background.
fn spawn_connect(state: &AppState, id: SetupId) {
    let store = Arc::clone(&state.store);
    let registry = Arc::clone(&state.registry);
    tokio::spawn(async move {
        let lookup = id.clone();
        match run_blocking(&store, move |s| s.get_by_id(&lookup)).await {
            Ok(Some(setup)) => {
                if let Err(e) = registry.get_or_create(&setup).await {
                    tracing::warn!(setup_id = %id, error = %e, "Initial connection failed");
                }
            },
            Ok(None) => {},
            Err(e) => tracing::warn!(setup_id = %id, error = %e, "Initial connection lookup failed"),
        }
    });
}

async fn list_setups(State(state): State<AppState>) -> ApiResult<Json<Value>> {
    let setups = run_blocking(&state.store, |store| store.list_active())
        .await
        .map_err(map_error)?;
    Ok(Json(json!({ "count": setups.len(), "setups": setups })))
}

#[derive(Serialize)]
struct SetupDetail {
    #[serde(flatten)]
    setup: PublicSetupInfo,
    connection: ConnectionState,
}

async fn get_setup(
    Path(id): Path<String>,
    State(state): State<AppState>,
) -> ApiResult<Json<SetupDetail>> {
    let id = SetupId::new(id);
    let lookup = id.clone();
    let setup = run_blocking(&state.store, move |store| store.get_by_id(&lookup))
        .await
        .map_err(map_error)?
        .ok_or_else(|| not_found("setup"))?;

    Ok(Json(SetupDetail {
        setup: setup.public_info(),
        connection: state.registry.state(&id),
    }))
}

async fn update_setup(
    Path(id): Path<String>,
    State(state): State<AppState>,
    body: Bytes,
) -> ApiResult<Json<Value>> {
    let body: Value = serde_json::from_slice(&body)
        .map_err(|e| map_error(Error::Validation(format!("invalid JSON body: {e}"))))?;
    let update = SetupUpdate::from_json(&body).map_err(map_error)?;
    if update.is_empty() {
        return Err(map_error(Error::Validation(
            "no updatable fields supplied".to_string(),
        )));
    }

    let id = SetupId::new(id);
    let target = id.clone();
    let updated = run_blocking(&state.store, move |store| {
        store.update_non_secret(&target, &update)
    })
    .await
    .map_err(map_error)?;

    if !updated {
        return Err(not_found("setup"));
    }
    tracing::info!(setup_id = %id, "Setup updated");
    Ok(Json(json!({ "success": true })))
}

async fn disable_setup(
    Path(id): Path<String>,
    State(state): State<AppState>,
) -> ApiResult<Json<Value>> {
    let id = SetupId::new(id);
    let target = id.clone();
    let disabled = run_blocking(&state.store, move |store| store.disable(&target))
        .await
        .map_err(map_error)?;

    if !disabled {
        return Err(not_found("setup"));
    }
    state.registry.remove(&id).await;
    tracing::info!(setup_id = %id, "Setup disabled");
    Ok(Json(json!({ "success": true })))
}

use std::net::SocketAddr;
use std::sync::Arc;

use axum::Json;
use axum::Router;
use axum::body::Bytes;
use axum::extract::Path;
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::response::Response;
use axum::routing::get;
use axum::routing::post;
use serde::Deserialize;
use serde::Serialize;
use serde::de::DeserializeOwned;
use tokio::net::TcpListener;
use tower::ServiceBuilder;
use tower_http::trace::TraceLayer;

use crate::alarm::PanelError;
use crate::alarm::PanelHandle;
use crate::alarm::PanelStatus;
use crate::alarm::Registry;
use crate::alarm::RegistryError;
use crate::config::ConfigUpdate;

/// Response for the /v1/ping endpoint
#[derive(Serialize)]
struct PingResponse {
    status: String,
}

/// Response for the /v1/info endpoint
#[derive(Serialize)]
struct InfoResponse {
    version: String,
    hostname: String,
    panels: usize,
}

#[derive(Serialize)]
struct ErrorResponse {
    error: String,
}

/// Optional body of a disarm request
#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct DisarmRequest {
    #[serde(default)]
    code: Option<String>,
}

/// Shared application state
#[derive(Clone)]
struct AppState {
    version: &'static str,
    registry: Arc<Registry>,
}

#[derive(Debug, thiserror::Error)]
enum ApiError {
    #[error(transparent)]
    Registry(#[from] RegistryError),

    #[error("Invalid request body: {0}")]
    BadRequest(String),
}

impl From<PanelError> for ApiError {
    fn from(e: PanelError) -> Self {
        ApiError::Registry(e.into())
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match &self {
            ApiError::Registry(RegistryError::NotFound(_)) => StatusCode::NOT_FOUND,
            ApiError::Registry(RegistryError::Panel(_)) => StatusCode::SERVICE_UNAVAILABLE,
            ApiError::BadRequest(_) => StatusCode::BAD_REQUEST,
        };
        tracing::debug!("Request failed with {}: {}", status, self);
        (
            status,
            Json(ErrorResponse {
                error: self.to_string(),
            }),
        )
            .into_response()
    }
}

/// Handler for GET /v1/ping
#[tracing::instrument]
async fn ping() -> impl IntoResponse {
    tracing::debug!("Handling /v1/ping request");
    (
        StatusCode::OK,
        Json(PingResponse {
            status: "ok".to_string(),
        }),
    )
}

/// Handler for GET /v1/info
#[tracing::instrument(skip(state))]
async fn info(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    tracing::debug!("Handling /v1/info request");

    let hostname = hostname::get()
        .ok()
        .and_then(|h| h.into_string().ok())
        .unwrap_or_else(|| "unknown".to_string());

    (
        StatusCode::OK,
        Json(InfoResponse {
            version: state.version.to_string(),
            hostname,
            panels: state.registry.list().len(),
        }),
    )
}

/// Handler for GET /v1/panels
#[tracing::instrument(skip(state))]
async fn list_panels(State(state): State<Arc<AppState>>) -> Json<Vec<PanelStatus>> {
    Json(
        state
            .registry
            .statuses()
            .iter()
            .map(|status| PanelStatus::clone(status))
            .collect(),
    )
}

/// Handler for GET /v1/panels/:entity_id
#[tracing::instrument(skip(state))]
async fn get_panel(
    State(state): State<Arc<AppState>>,
    Path(entity_id): Path<String>,
) -> Result<Json<PanelStatus>, ApiError> {
    let panel = state.registry.get(&entity_id)?;
    Ok(Json(PanelStatus::clone(&panel.status())))
}

/// Decode a JSON body; a blank body decodes as `T::default()`.
fn parse_body<T: DeserializeOwned + Default>(body: &Bytes) -> Result<T, ApiError> {
    if body.iter().all(u8::is_ascii_whitespace) {
        return Ok(T::default());
    }
    serde_json::from_slice(body).map_err(|e| ApiError::BadRequest(e.to_string()))
}

/// Run an action on a panel; the panel applies it asynchronously.
fn accept(
    state: &AppState,
    entity_id: &str,
    action: impl FnOnce(&PanelHandle) -> Result<(), PanelError>,
) -> Result<StatusCode, ApiError> {
    let panel = state.registry.get(entity_id)?;
    action(&panel)?;
    Ok(StatusCode::ACCEPTED)
}

#[tracing::instrument(skip(state))]
async fn arm_home(
    State(state): State<Arc<AppState>>,
    Path(entity_id): Path<String>,
) -> Result<StatusCode, ApiError> {
    accept(&state, &entity_id, PanelHandle::arm_home)
}

#[tracing::instrument(skip(state))]
async fn arm_away(
    State(state): State<Arc<AppState>>,
    Path(entity_id): Path<String>,
) -> Result<StatusCode, ApiError> {
    accept(&state, &entity_id, PanelHandle::arm_away)
}

#[tracing::instrument(skip(state))]
async fn trigger(
    State(state): State<Arc<AppState>>,
    Path(entity_id): Path<String>,
) -> Result<StatusCode, ApiError> {
    accept(&state, &entity_id, PanelHandle::trigger)
}

/// Handler for POST /v1/panels/:entity_id/disarm; the body is optional
#[tracing::instrument(skip(state, body))]
async fn disarm(
    State(state): State<Arc<AppState>>,
    Path(entity_id): Path<String>,
    body: Bytes,
) -> Result<StatusCode, ApiError> {
    let request: DisarmRequest = parse_body(&body)?;
    accept(&state, &entity_id, |panel| panel.disarm(request.code))
}

/// Handler for POST /v1/panels/:entity_id/config
#[tracing::instrument(skip(state, body))]
async fn set_config(
    State(state): State<Arc<AppState>>,
    Path(entity_id): Path<String>,
    body: Bytes,
) -> Result<StatusCode, ApiError> {
    let update: ConfigUpdate = parse_body(&body)?;
    state.registry.set_config(&entity_id, update)?;
    Ok(StatusCode::ACCEPTED)
}

/// Create the API router with all endpoints
fn create_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/v1/ping", get(ping))
        .route("/v1/info", get(info))
        .route("/v1/panels", get(list_panels))
        .route("/v1/panels/:entity_id", get(get_panel))
        .route("/v1/panels/:entity_id/arm_home", post(arm_home))
        .route("/v1/panels/:entity_id/arm_away", post(arm_away))
        .route("/v1/panels/:entity_id/trigger", post(trigger))
        .route("/v1/panels/:entity_id/disarm", post(disarm))
        .route("/v1/panels/:entity_id/config", post(set_config))
        .layer(ServiceBuilder::new().layer(TraceLayer::new_for_http()))
        .with_state(state)
}

/// Router over the given panels
pub fn router(registry: Arc<Registry>) -> Router {
    create_router(Arc::new(AppState {
        version: env!("CARGO_PKG_VERSION"),
        registry,
    }))
}

/// Start the HTTP API server
///
/// This function will bind to the specified address and serve the API endpoints.
/// It will run until the provided shutdown signal is triggered.
///
/// # Arguments
/// * `listen` - The IP address to listen on (e.g., "127.0.0.1")
/// * `port` - The port to listen on (e.g., 8565)
/// * `registry` - The running panels to expose
/// * `shutdown_rx` - A oneshot receiver that will trigger graceful shutdown
pub async fn serve(
    listen: &str,
    port: u16,
    registry: Arc<Registry>,
    shutdown_rx: tokio::sync::oneshot::Receiver<()>,
) -> anyhow::Result<()> {
    let app = router(registry);

    let addr: SocketAddr = format!("{}:{}", listen, port).parse()?;
    tracing::info!("Starting HTTP API server on {}", addr);

    let listener = TcpListener::bind(addr).await?;

    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            shutdown_rx.await.ok();
            tracing::info!("HTTP API server shutting down gracefully");
        })
        .await?;

    Ok(())
}

use axum::{
    body::Bytes,
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, put},
    Json, Router,
};
use metrics_exporter_prometheus::PrometheusHandle;
use polaris_core::{
    InstanceStatus, LeaseConfig, Registry, RegistryConfig, RegistryError, RegistryOverview,
    ServiceInstance,
};
use serde::{Deserialize, Serialize};
use std::{collections::HashMap, net::SocketAddr, sync::Arc, time::Duration};
use tokio::sync::watch;
use tower_http::trace::TraceLayer;
use utoipa::{OpenApi, ToSchema};
use utoipa_swagger_ui::SwaggerUi;

#[derive(Clone)]
pub struct AppState {
    pub registry: Arc<Registry>,
}

/// Process configuration, read from the environment (a `.env` file is
/// honored by the binary via dotenvy).
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub bind: SocketAddr,
    pub registry: RegistryConfig,
}

impl ServerConfig {
    pub fn from_env() -> Self {
        let bind = std::env::var("POLARIS_BIND")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or_else(|| SocketAddr::from(([127, 0, 0, 1], 8761)));

        let defaults = RegistryConfig::default();
        let registry = RegistryConfig {
            lease: LeaseConfig {
                duration_secs: env_u64("POLARIS_LEASE_DURATION_SECS", defaults.lease.duration_secs),
                eviction_threshold_secs: env_u64(
                    "POLARIS_EVICTION_THRESHOLD_SECS",
                    defaults.lease.eviction_threshold_secs,
                ),
            },
            sweep_interval_secs: env_u64(
                "POLARIS_SWEEP_INTERVAL_SECS",
                defaults.sweep_interval_secs,
            ),
            monitor_window_secs: env_u64(
                "POLARIS_MONITOR_WINDOW_SECS",
                defaults.monitor_window_secs,
            ),
            renewal_percent_threshold: env_f64(
                "POLARIS_RENEWAL_THRESHOLD",
                defaults.renewal_percent_threshold,
            ),
            self_preservation_enabled: env_bool(
                "POLARIS_SELF_PRESERVATION",
                defaults.self_preservation_enabled,
            ),
        };
        Self { bind, registry }
    }
}

fn env_u64(key: &str, default: u64) -> u64 {
    match std::env::var(key) {
        Ok(raw) => raw.parse().unwrap_or_else(|_| {
            tracing::warn!("ignoring unparseable {key}={raw}");
            default
        }),
        Err(_) => default,
    }
}

fn env_f64(key: &str, default: f64) -> f64 {
    match std::env::var(key) {
        Ok(raw) => raw.parse().unwrap_or_else(|_| {
            tracing::warn!("ignoring unparseable {key}={raw}");
            default
        }),
        Err(_) => default,
    }
}

fn env_bool(key: &str, default: bool) -> bool {
    match std::env::var(key) {
        Ok(raw) => raw.parse().unwrap_or_else(|_| {
            tracing::warn!("ignoring unparseable {key}={raw}");
            default
        }),
        Err(_) => default,
    }
}

#[derive(OpenApi)]
#[openapi(
    paths(
        register_or_renew,
        cancel,
        set_status,
        query_service,
        query_all,
        registry_status,
        health_check,
    ),
    components(
        schemas(
            RegisterRequest,
            StatusUpdate,
            polaris_core::instance::ServiceInstance,
            polaris_core::status::InstanceStatus,
            polaris_core::lease::LeaseConfig,
            polaris_core::monitor::PreservationState,
            polaris_core::facade::RegistryOverview,
        )
    )
)]
pub struct ApiDoc;

pub fn app(registry: Arc<Registry>, metrics: PrometheusHandle) -> Router {
    let state = AppState { registry };
    Router::new()
        .merge(SwaggerUi::new("/swagger-ui").url("/api-docs/openapi.json", ApiDoc::openapi()))
        .route("/health", get(health_check))
        .route("/status", get(registry_status))
        .route(
            "/metrics",
            get(move || {
                let rendered = metrics.render();
                async move { rendered }
            }),
        )
        .route("/apps", get(query_all))
        .route("/apps/:service", get(query_service))
        .route(
            "/apps/:service/:instance",
            put(register_or_renew).delete(cancel),
        )
        .route("/apps/:service/:instance/status", put(set_status))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Runs the eviction sweeper until `shutdown` flips. One cycle that evicts
/// nothing, or whose outcome is suppressed, is normal operation; the loop
/// itself never exits on its own.
pub fn spawn_sweeper(
    registry: Arc<Registry>,
    mut shutdown: watch::Receiver<bool>,
) -> tokio::task::JoinHandle<()> {
    let period = Duration::from_secs(registry.config().sweep_interval_secs);
    tokio::spawn(async move {
        tracing::info!("eviction sweeper started, interval {:?}", period);
        let mut interval = tokio::time::interval(period);
        loop {
            tokio::select! {
                _ = interval.tick() => {
                    let outcome = registry.sweep();
                    if outcome.suppressed {
                        tracing::warn!(
                            "self-preservation active, skipping eviction this cycle"
                        );
                    } else if outcome.evicted > 0 {
                        tracing::info!(evicted = outcome.evicted, "evicted expired leases");
                        metrics::counter!("polaris_evictions_total")
                            .increment(outcome.evicted as u64);
                    }
                    let overview = registry.overview();
                    metrics::gauge!("polaris_leases").set(overview.instances as f64);
                }
                _ = shutdown.changed() => {
                    tracing::info!("eviction sweeper stopping");
                    break;
                }
            }
        }
    })
}

fn error_response(err: RegistryError) -> Response {
    let status = match &err {
        RegistryError::Validation(_) => StatusCode::BAD_REQUEST,
        RegistryError::NotFound { .. } => StatusCode::NOT_FOUND,
        RegistryError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
    };
    (status, err.to_string()).into_response()
}

#[derive(Serialize, Deserialize, ToSchema)]
pub struct RegisterRequest {
    #[schema(example = "10.0.0.1:8080")]
    pub address: String,
    pub status: Option<InstanceStatus>,
    #[serde(default)]
    pub metadata: HashMap<String, String>,
    /// Per-lease timing override; the registry default applies when absent.
    pub lease: Option<LeaseConfig>,
}

/// Registration and heartbeat share this route: a JSON body (re)registers
/// the instance, an empty body renews its lease.
#[utoipa::path(
    put,
    path = "/apps/{service}/{instance}",
    request_body = RegisterRequest,
    responses(
        (status = 204, description = "Instance registered"),
        (status = 200, description = "Lease renewed (empty body heartbeat)"),
        (status = 400, description = "Invalid payload"),
        (status = 404, description = "Heartbeat for unknown lease, re-register")
    ),
    params(
        ("service" = String, Path, description = "Service name"),
        ("instance" = String, Path, description = "Instance id")
    )
)]
async fn register_or_renew(
    State(state): State<AppState>,
    Path((service, instance_id)): Path<(String, String)>,
    body: Bytes,
) -> Response {
    if body.is_empty() {
        return match state.registry.renew(&service, &instance_id) {
            Ok(()) => {
                metrics::counter!("polaris_renewals_total").increment(1);
                StatusCode::OK.into_response()
            }
            Err(err) => error_response(err),
        };
    }

    let payload: RegisterRequest = match serde_json::from_slice(&body) {
        Ok(p) => p,
        Err(err) => {
            return (StatusCode::BAD_REQUEST, format!("invalid payload: {err}")).into_response();
        }
    };

    let mut instance = ServiceInstance::new(service, instance_id, payload.address);
    instance.status = payload.status.unwrap_or_default();
    instance.metadata = payload.metadata;

    match state.registry.register(instance, payload.lease) {
        Ok(lease) => {
            metrics::counter!("polaris_registrations_total").increment(1);
            tracing::info!(
                service = %lease.instance.service_name,
                instance = %lease.instance.instance_id,
                "registered instance"
            );
            StatusCode::NO_CONTENT.into_response()
        }
        Err(err) => error_response(err),
    }
}

#[utoipa::path(
    delete,
    path = "/apps/{service}/{instance}",
    responses(
        (status = 200, description = "Lease cancelled"),
        (status = 404, description = "No such lease")
    ),
    params(
        ("service" = String, Path, description = "Service name"),
        ("instance" = String, Path, description = "Instance id")
    )
)]
async fn cancel(
    State(state): State<AppState>,
    Path((service, instance_id)): Path<(String, String)>,
) -> Response {
    match state.registry.cancel(&service, &instance_id) {
        Ok(()) => {
            tracing::info!(service = %service, instance = %instance_id, "cancelled lease");
            StatusCode::OK.into_response()
        }
        Err(err) => error_response(err),
    }
}

#[derive(Serialize, Deserialize, ToSchema)]
pub struct StatusUpdate {
    pub status: InstanceStatus,
}

#[utoipa::path(
    put,
    path = "/apps/{service}/{instance}/status",
    request_body = StatusUpdate,
    responses(
        (status = 200, description = "Status updated"),
        (status = 404, description = "No such lease")
    ),
    params(
        ("service" = String, Path, description = "Service name"),
        ("instance" = String, Path, description = "Instance id")
    )
)]
async fn set_status(
    State(state): State<AppState>,
    Path((service, instance_id)): Path<(String, String)>,
    Json(payload): Json<StatusUpdate>,
) -> Response {
    match state.registry.set_status(&service, &instance_id, payload.status) {
        Ok(()) => StatusCode::OK.into_response(),
        Err(err) => error_response(err),
    }
}

#[utoipa::path(
    get,
    path = "/apps/{service}",
    responses(
        (status = 200, description = "Live instances", body = Vec<ServiceInstance>),
        (status = 404, description = "No instances for this service")
    ),
    params(("service" = String, Path, description = "Service name"))
)]
async fn query_service(
    State(state): State<AppState>,
    Path(service): Path<String>,
) -> Response {
    let instances = state.registry.query(&service);
    if instances.is_empty() {
        return (StatusCode::NOT_FOUND, "service not found").into_response();
    }
    (StatusCode::OK, Json(instances)).into_response()
}

#[utoipa::path(
    get,
    path = "/apps",
    responses((status = 200, description = "Full registry snapshot"))
)]
async fn query_all(State(state): State<AppState>) -> Response {
    (StatusCode::OK, Json(state.registry.query_all())).into_response()
}

#[utoipa::path(
    get,
    path = "/status",
    responses((status = 200, description = "Registry overview", body = RegistryOverview))
)]
async fn registry_status(State(state): State<AppState>) -> Response {
    (StatusCode::OK, Json(state.registry.overview())).into_response()
}

#[utoipa::path(
    get,
    path = "/health",
    responses((status = 200, description = "OK"))
)]
async fn health_check() -> Response {
    (StatusCode::OK, Json(serde_json::json!({ "status": "UP" }))).into_response()
}

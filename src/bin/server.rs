//! liqshield HTTP Server
//!
//! Runs the monitor and execution services in-process and exposes read-only
//! engine state plus operator controls for the dispatcher.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
    routing::{delete, get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use tower_http::{
    compression::CompressionLayer,
    cors::{Any, CorsLayer},
    trace::TraceLayer,
};
use tracing::info;

use liqshield::core::config::ShieldConfig;
use liqshield::dispatch::{DomainEvent, EventDispatcher};
use liqshield::error::Error;
use liqshield::lending::{InMemoryLending, InMemoryVault};
use liqshield::monitoring::{MetricsCollector, MetricsSnapshot};
use liqshield::protection::{ProtectionLedger, ProtectionOrchestrator, RiskStatistics};
use liqshield::relay::{ChannelCommandSink, Relay, SharedDispatcher};
use liqshield::storage::{FileStore, StateManager};
use liqshield::utils::ids::{Address, MarketId};
use liqshield::utils::time::unix_now;

type Orchestrator = ProtectionOrchestrator<InMemoryLending, InMemoryVault>;

// ═══════════════════════════════════════════════════════════════════════════════
// SERVER STATE
// ═══════════════════════════════════════════════════════════════════════════════

/// Shared application state
pub struct AppState {
    pub orchestrator: Arc<Orchestrator>,
    pub dispatcher: SharedDispatcher<ChannelCommandSink>,
    pub events: tokio::sync::mpsc::UnboundedSender<DomainEvent>,
    pub metrics: Arc<MetricsCollector>,
}

// ═══════════════════════════════════════════════════════════════════════════════
// API TYPES
// ═══════════════════════════════════════════════════════════════════════════════

#[derive(Debug, Serialize)]
pub struct ApiResponse<T> {
    pub success: bool,
    pub data: Option<T>,
    pub error: Option<String>,
}

impl<T: Serialize> ApiResponse<T> {
    pub fn ok(data: T) -> Self {
        Self { success: true, data: Some(data), error: None }
    }

    pub fn err(msg: impl Into<String>) -> Self {
        Self { success: false, data: None, error: Some(msg.into()) }
    }
}

type ApiResult<T> = (StatusCode, Json<ApiResponse<T>>);

fn ok<T: Serialize>(data: T) -> ApiResult<T> {
    (StatusCode::OK, Json(ApiResponse::ok(data)))
}

fn fail<T: Serialize>(err: Error) -> ApiResult<T> {
    let status = match &err {
        Error::Unauthorized(_) => StatusCode::FORBIDDEN,
        Error::NotSubscribed { .. } => StatusCode::NOT_FOUND,
        Error::MarketAlreadyMonitored(_)
        | Error::MarketNotMonitored(_)
        | Error::CycleInFlight
        | Error::CycleNotInFlight
        | Error::CycleNotStale { .. } => StatusCode::CONFLICT,
        e if e.is_recoverable() => StatusCode::SERVICE_UNAVAILABLE,
        _ => StatusCode::BAD_REQUEST,
    };
    (status, Json(ApiResponse::err(err.to_string())))
}

fn parse<T: std::str::FromStr<Err = Error>>(raw: &str) -> Result<T, Error> {
    raw.parse()
}

#[derive(Debug, Deserialize)]
pub struct OperatorRequest {
    pub caller: String,
}

#[derive(Debug, Deserialize)]
pub struct MarketRequest {
    pub caller: String,
    pub market: String,
}

#[derive(Debug, Serialize)]
pub struct EngineStats {
    pub risk: RiskStatistics,
    pub metrics: MetricsSnapshot,
}

// ═══════════════════════════════════════════════════════════════════════════════
// HANDLERS
// ═══════════════════════════════════════════════════════════════════════════════

/// GET /health - Health check
async fn health_check() -> impl IntoResponse {
    Json(serde_json::json!({
        "status": "healthy",
        "service": "liqshield-server",
        "version": liqshield::VERSION
    }))
}

/// GET /subscriptions/:user/:market - Subscription record
async fn get_subscription(
    State(state): State<Arc<AppState>>,
    Path((user, market)): Path<(String, String)>,
) -> impl IntoResponse {
    let lookup = || -> Result<_, Error> {
        let (user, market): (Address, MarketId) = (parse(&user)?, parse(&market)?);
        state
            .orchestrator
            .subscription(user, market)?
            .ok_or(Error::NotSubscribed { user: user.to_hex(), market: market.to_hex() })
    };
    match lookup() {
        Ok(sub) => ok(sub),
        Err(e) => fail(e),
    }
}

/// GET /stats - Risk statistics and counters
async fn get_stats(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    match state.orchestrator.statistics(unix_now()) {
        Ok(risk) => ok(EngineStats { risk, metrics: state.metrics.snapshot() }),
        Err(e) => fail(e),
    }
}

/// GET /explain/:user/:market - Risk explanation
async fn explain(
    State(state): State<Arc<AppState>>,
    Path((user, market)): Path<(String, String)>,
) -> impl IntoResponse {
    let explain = || -> Result<_, Error> {
        state.orchestrator.explain(parse(&user)?, parse(&market)?, unix_now())
    };
    match explain() {
        Ok(explanation) => ok(explanation),
        Err(e) => fail(e),
    }
}

/// GET /dispatcher/status - Dispatcher status
async fn dispatcher_status(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let status = state.dispatcher.lock().await.status(unix_now());
    Json(ApiResponse::ok(status))
}

/// POST /dispatcher/markets - Start monitoring a market
async fn add_market(
    State(state): State<Arc<AppState>>,
    Json(req): Json<MarketRequest>,
) -> impl IntoResponse {
    let mut dispatcher = state.dispatcher.lock().await;
    let result = parse(&req.caller).and_then(|caller| {
        let market = parse(&req.market)?;
        dispatcher.add_market(caller, market)
    });
    match result {
        Ok(()) => ok("Market added"),
        Err(e) => fail(e),
    }
}

/// DELETE /dispatcher/markets/:market - Stop monitoring a market
async fn remove_market(
    State(state): State<Arc<AppState>>,
    Path(market): Path<String>,
    Json(req): Json<OperatorRequest>,
) -> impl IntoResponse {
    let mut dispatcher = state.dispatcher.lock().await;
    let result = parse(&req.caller).and_then(|caller| dispatcher.remove_market(caller, parse(&market)?));
    match result {
        Ok(()) => ok("Market removed"),
        Err(e) => fail(e),
    }
}

/// POST /dispatcher/cycle - Dispatch a periodic cycle now
async fn manual_cycle(
    State(state): State<Arc<AppState>>,
    Json(req): Json<OperatorRequest>,
) -> impl IntoResponse {
    let mut dispatcher = state.dispatcher.lock().await;
    match parse(&req.caller).and_then(|caller| dispatcher.manual_cycle(caller, unix_now())) {
        Ok(decision) => ok(decision),
        Err(e) => fail(e),
    }
}

/// POST /dispatcher/clear - Force-clear a stale in-flight cycle
async fn force_clear(
    State(state): State<Arc<AppState>>,
    Json(req): Json<OperatorRequest>,
) -> impl IntoResponse {
    let mut dispatcher = state.dispatcher.lock().await;
    match parse(&req.caller).and_then(|caller| dispatcher.force_clear(caller, unix_now())) {
        Ok(()) => ok("Cycle cleared"),
        Err(e) => fail(e),
    }
}

/// POST /events - Feed a domain event to the monitor
async fn publish_event(
    State(state): State<Arc<AppState>>,
    Json(event): Json<DomainEvent>,
) -> impl IntoResponse {
    match state.events.send(event) {
        Ok(()) => ok("Event queued"),
        Err(_) => fail(Error::Dispatch("monitor service stopped".into())),
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// MAIN
// ═══════════════════════════════════════════════════════════════════════════════

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing::Level::INFO.into()),
        )
        .init();

    let config = match std::env::var("LIQSHIELD_CONFIG") {
        Ok(path) => ShieldConfig::load(std::path::Path::new(&path))?.with_env_overrides()?,
        Err(_) => ShieldConfig::from_env()?,
    };

    let store = StateManager::shared(FileStore::open(&config.data_dir)?);
    let metrics = Arc::new(MetricsCollector::new());
    let lending = Arc::new(InMemoryLending::new());
    let vault = Arc::new(InMemoryVault::new());

    let orchestrator = Arc::new(
        ProtectionOrchestrator::new(&config, lending, vault, metrics.clone())
            .with_ledger(ProtectionLedger::with_state(store.clone())?),
    );

    let dispatch_config = config.clone();
    let dispatch_metrics = metrics.clone();
    let relay = Relay::spawn(
        orchestrator.clone(),
        move |sink| {
            EventDispatcher::new(
                dispatch_config.dispatch.clone(),
                dispatch_config.trusted_sender,
                dispatch_config.operator,
                sink,
                dispatch_metrics,
            )
            .with_store(store)
        },
        Duration::from_millis(config.tick_interval_ms),
    )?;

    let state = Arc::new(AppState {
        orchestrator,
        dispatcher: relay.dispatcher(),
        events: relay.events(),
        metrics,
    });

    // Build router
    let app = Router::new()
        // Health
        .route("/health", get(health_check))

        // Execution domain
        .route("/subscriptions/:user/:market", get(get_subscription))
        .route("/stats", get(get_stats))
        .route("/explain/:user/:market", get(explain))

        // Monitor domain
        .route("/dispatcher/status", get(dispatcher_status))
        .route("/dispatcher/markets", post(add_market))
        .route("/dispatcher/markets/:market", delete(remove_market))
        .route("/dispatcher/cycle", post(manual_cycle))
        .route("/dispatcher/clear", post(force_clear))
        .route("/events", post(publish_event))

        // Middleware
        .layer(TraceLayer::new_for_http())
        .layer(CompressionLayer::new())
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
        .with_state(state);

    // Get bind address from env or default
    let addr: SocketAddr = std::env::var("LIQSHIELD_BIND")
        .unwrap_or_else(|_| "0.0.0.0:8080".to_string())
        .parse()?;

    info!("Starting liqshield server on {}", addr);
    info!("API endpoints:");
    info!("  GET    /health                        - Health check");
    info!("  GET    /subscriptions/:user/:market   - Subscription record");
    info!("  GET    /stats                         - Risk statistics");
    info!("  GET    /explain/:user/:market         - Risk explanation");
    info!("  GET    /dispatcher/status             - Dispatcher status");
    info!("  POST   /dispatcher/markets            - Monitor a market");
    info!("  DELETE /dispatcher/markets/:market    - Stop monitoring a market");
    info!("  POST   /dispatcher/cycle              - Dispatch a cycle now");
    info!("  POST   /dispatcher/clear              - Force-clear a stale cycle");
    info!("  POST   /events                        - Publish a domain event");

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
        })
        .await?;

    relay.shutdown().await?;
    Ok(())
}

use axum::{
    extract::State,
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};
use dotenv::dotenv;
use serde::Serialize;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::signal;
use tower::ServiceBuilder;
use tower_http::request_id::{PropagateRequestIdLayer, SetRequestIdLayer};
use tracing::{error, info};

use linkpage_checkout::api::checkout::CheckoutApiState;
use linkpage_checkout::api::webhooks::WebhookState;
use linkpage_checkout::checkout::dispatcher::FulfillmentDispatcher;
use linkpage_checkout::checkout::flow::{CheckoutFlow, FlowConfig};
use linkpage_checkout::checkout::fulfillment::{FulfillmentRegistry, LogFulfillment};
use linkpage_checkout::config::AppConfig;
use linkpage_checkout::logging::init_tracing;
use linkpage_checkout::middleware::logging::{request_logging_middleware, UuidRequestId};
use linkpage_checkout::providers::registry::ProviderRegistry;
use linkpage_checkout::services::webhook_processor::WebhookProcessor;
use linkpage_checkout::store::{
    init_pool, LedgerStore, MemoryLedgerStore, PgLedgerStore, PoolConfig,
};
use linkpage_checkout::{api, store};

async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    info!("shutdown signal received, starting graceful shutdown");
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_tracing();
    dotenv().ok();

    let config = AppConfig::from_env()?;
    config.validate()?;

    info!(
        version = env!("CARGO_PKG_VERSION"),
        "starting checkout service"
    );

    let (ledger_store, db_pool): (Arc<dyn LedgerStore>, Option<sqlx::PgPool>) =
        if config.checkout.memory_store {
            info!("using in-memory ledger store (CHECKOUT_MEMORY_STORE=true)");
            (Arc::new(MemoryLedgerStore::new()), None)
        } else {
            let url = config
                .database
                .url
                .clone()
                .ok_or_else(|| anyhow::anyhow!("DATABASE_URL not set"))?;
            let pool = init_pool(&url, PoolConfig::from(&config.database)).await?;
            (Arc::new(PgLedgerStore::new(pool.clone())), Some(pool))
        };

    let registry = Arc::new(ProviderRegistry::from_env()?);
    info!(providers = ?registry.list_enabled(), "payment providers enabled");

    let mut fulfillment = FulfillmentRegistry::new();
    fulfillment.register("activate_plan", Arc::new(LogFulfillment));
    fulfillment.register("unlock_download", Arc::new(LogFulfillment));
    let fulfillment = Arc::new(fulfillment);
    info!(ops = ?fulfillment.registered_ops(), "fulfillment operations registered");

    let dispatcher = Arc::new(FulfillmentDispatcher::new(
        ledger_store.clone(),
        fulfillment,
    ));
    let flow = Arc::new(CheckoutFlow::new(
        ledger_store.clone(),
        registry.clone(),
        dispatcher.clone(),
        FlowConfig {
            home_url: config.checkout.home_url.clone(),
            error_url: config.checkout.error_url.clone(),
        },
    ));
    let processor = Arc::new(WebhookProcessor::new(
        registry,
        dispatcher,
        ledger_store.clone(),
    ));

    let checkout_state = Arc::new(CheckoutApiState {
        flow,
        store: ledger_store,
    });
    let webhook_state = Arc::new(WebhookState { processor });

    let health_routes = Router::new()
        .route("/", get(root))
        .route("/health", get(health))
        .route("/health/ready", get(health))
        .route("/health/live", get(liveness))
        .with_state(HealthState { db_pool });

    let checkout_routes = Router::new()
        .route("/api/checkouts", post(api::checkout::create_checkout))
        .route(
            "/api/checkouts/{reference}",
            get(api::checkout::checkout_status),
        )
        .route(
            "/api/checkouts/{reference}/cancel",
            post(api::checkout::cancel_checkout),
        )
        .route("/pay/{provider}/verify", get(api::verify::verify_return))
        .with_state(checkout_state);

    let webhook_routes = Router::new()
        .route("/webhooks/{provider}", post(api::webhooks::handle_webhook))
        .with_state(webhook_state);

    let app = health_routes
        .merge(checkout_routes)
        .merge(webhook_routes)
        .layer(
            ServiceBuilder::new()
                .layer(SetRequestIdLayer::x_request_id(UuidRequestId))
                .layer(axum::middleware::from_fn(request_logging_middleware))
                .layer(PropagateRequestIdLayer::x_request_id()),
        );

    let addr: SocketAddr = format!("{}:{}", config.server.host, config.server.port).parse()?;
    let listener = tokio::net::TcpListener::bind(addr).await.map_err(|e| {
        error!(address = %addr, error = %e, "failed to bind");
        e
    })?;

    info!(address = %addr, "checkout service listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("server shutdown complete");
    Ok(())
}

#[derive(Clone)]
struct HealthState {
    db_pool: Option<sqlx::PgPool>,
}

#[derive(Serialize)]
struct HealthStatus {
    status: &'static str,
    database: &'static str,
}

async fn root() -> &'static str {
    "Linkpage checkout service"
}

async fn health(
    State(state): State<HealthState>,
) -> Result<Json<HealthStatus>, (StatusCode, String)> {
    match &state.db_pool {
        None => Ok(Json(HealthStatus {
            status: "ok",
            database: "disabled",
        })),
        Some(pool) => match store::health_check(pool).await {
            Ok(()) => Ok(Json(HealthStatus {
                status: "ok",
                database: "ok",
            })),
            Err(e) => {
                error!(error = %e, "health check failed");
                Err((
                    StatusCode::SERVICE_UNAVAILABLE,
                    "Service Unavailable".to_string(),
                ))
            }
        },
    }
}

async fn liveness() -> &'static str {
    "OK"
}

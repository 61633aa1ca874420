use axum::{extract::State, response::Json, routing::get, Router};
use std::sync::Arc;
use tokio::time::Duration;
use tower::ServiceBuilder;
use tower_http::trace::TraceLayer;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use compliance_ledger::config::{AppConfig, RetentionPolicies};
use compliance_ledger::database::Database;
use compliance_ledger::vault::PassthroughVault;
use compliance_ledger::{AuditLedger, LedgerError};

struct AppState {
    config: AppConfig,
    ledger: AuditLedger,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "compliance_ledger=info,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("Starting compliance ledger");

    let config = AppConfig::load()?;
    let policies = config.retention.load_policies()?;
    info!("Configuration loaded");

    let database = Database::new(&config.database_url).await?;
    database.run_migrations().await?;
    info!("Database migrations completed");

    let ledger = AuditLedger::new(
        Arc::new(database.ledger_store()),
        Arc::new(PassthroughVault),
        &config,
    );
    let state = Arc::new(AppState { config, ledger });

    if state.config.retention.enabled {
        spawn_retention_scheduler(state.clone(), policies);
        spawn_erasure_retrier(state.clone());
    } else {
        warn!("Retention scheduler disabled; expired events will not be checkpointed");
    }

    let app = Router::new()
        .route("/health", get(health_check))
        .route("/status", get(status_endpoint))
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .into_inner(),
        )
        .with_state(state.clone());

    let addr = state.config.server.bind_address();
    info!("Server listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}

fn spawn_retention_scheduler(state: Arc<AppState>, policies: RetentionPolicies) {
    let period = Duration::from_secs(state.config.retention.interval_secs.max(1));
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(period);
        loop {
            interval.tick().await;
            let tenants = match state.ledger.tenants().await {
                Ok(tenants) => tenants,
                Err(e) => {
                    error!("Failed to list tenants for retention: {}", e);
                    continue;
                }
            };

            for tenant_id in tenants {
                let policy = policies.for_tenant(&tenant_id);
                match state.ledger.enforce_retention(&tenant_id, policy).await {
                    Ok(Some(receipt)) => info!("{}", receipt.checkpoint.summary()),
                    Ok(None) => {}
                    Err(LedgerError::RetentionInProgress { .. }) => {
                        info!(tenant_id = %tenant_id, "retention already running elsewhere");
                    }
                    Err(e) => error!(tenant_id = %tenant_id, "Retention failed: {}", e),
                }
            }
        }
    });
    info!("Retention scheduler started");
}

fn spawn_erasure_retrier(state: Arc<AppState>) {
    let period = Duration::from_secs(state.config.retention.erasure_retry_interval_secs.max(1));
    let batch = state.config.retention.erasure_batch_size;
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(period);
        loop {
            interval.tick().await;
            match state.ledger.retry_pending_erasures(batch).await {
                Ok(sweep) if sweep.attempted > 0 => info!(
                    attempted = sweep.attempted,
                    completed = sweep.completed,
                    failed = sweep.failed.len(),
                    "Pending payload erasures retried"
                ),
                Ok(_) => {}
                Err(e) => error!("Failed to retry pending erasures: {}", e),
            }
        }
    });
    info!("Erasure retrier started");
}

async fn health_check() -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "status": "healthy",
        "service": "compliance-ledger",
        "timestamp": chrono::Utc::now()
    }))
}

async fn status_endpoint(State(state): State<Arc<AppState>>) -> Json<serde_json::Value> {
    let mut status = serde_json::json!({
        "status": "healthy",
        "service": "compliance-ledger",
        "timestamp": chrono::Utc::now(),
        "retention": {
            "enabled": state.config.retention.enabled,
            "rollup_kind": state.config.retention.rollup_kind,
            "interval_secs": state.config.retention.interval_secs
        }
    });

    match state.ledger.tenants().await {
        Ok(tenants) => {
            status["database"] = serde_json::json!({
                "status": "healthy",
                "tenants": tenants.len()
            });
        }
        Err(e) => {
            status["status"] = serde_json::json!("degraded");
            status["database"] = serde_json::json!({
                "status": "error",
                "error": e.to_string()
            });
        }
    }

    Json(status)
}

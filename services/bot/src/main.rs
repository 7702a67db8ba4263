use axum::{routing::get, Router};
use std::net::SocketAddr;
use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use bot::config::Config;
use bot::cryptopay::{CryptoPayClient, DemoProvider, PayProvider};
use bot::state::AppState;
use bot::{build_router, db, deposits, house};

const DB_POOL_SIZE: u32 = 8;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize structured logging with JSON formatting (configurable via env)
    let use_json = std::env::var("LOG_FORMAT")
        .unwrap_or_else(|_| "text".to_string())
        .eq_ignore_ascii_case("json");

    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "bot=info,tower_http=info".into());

    if use_json {
        // JSON structured logging for production
        tracing_subscriber::registry()
            .with(env_filter)
            .with(tracing_subscriber::fmt::layer().json())
            .init();
    } else {
        // Human-readable logging for development
        tracing_subscriber::registry()
            .with(env_filter)
            .with(tracing_subscriber::fmt::layer())
            .init();
    }

    tracing::info!(
        service = "bot",
        version = env!("CARGO_PKG_VERSION"),
        log_format = if use_json { "json" } else { "text" },
        "Starting casino bot service"
    );

    // Load configuration
    let config = Arc::new(Config::load()?);
    tracing::info!(demo_mode = config.demo_mode, "Configuration loaded");

    // Initialize storage
    let pool = db::connect(&config.db_path, DB_POOL_SIZE).await?;
    db::apply_schema(&pool).await?;
    tracing::info!(db_path = %config.db_path, "Database ready");

    // Payment provider: real client or in-memory demo
    let provider: Arc<dyn PayProvider> = if config.demo_mode {
        tracing::warn!("Demo mode: payments are simulated");
        Arc::new(DemoProvider::new())
    } else {
        Arc::new(CryptoPayClient::new(
            config.cryptopay.base_url.clone(),
            &config.cryptopay.api_token,
        )?)
    };

    let app_state = AppState::new(config.clone(), pool.clone(), provider);

    // Background workers
    tokio::spawn(deposits::run_expiry_sweep(pool.clone()));
    tokio::spawn(app_state.withdrawals.clone().run_dispatcher());
    tokio::spawn(app_state.withdrawals.clone().run_confirmation_poll());
    tokio::spawn(house::run_daily_reset(pool.clone()));
    tokio::spawn(app_state.sessions.clone().run_evictor());
    tokio::spawn(app_state.ledger.clone().run_lock_sweep());

    // Build router
    let app = build_router(app_state);

    // Start metrics server
    let metrics_handle = tokio::spawn(start_metrics_server(config.metrics_port));

    // Start server
    let addr = SocketAddr::from(([0, 0, 0, 0], config.port));
    tracing::info!("Bot API listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    metrics_handle.await??;

    Ok(())
}

async fn start_metrics_server(port: u16) -> anyhow::Result<()> {
    let builder = metrics_exporter_prometheus::PrometheusBuilder::new();
    let handle = builder.install_recorder()?;
    bot::handlers::metrics::set_prometheus_handle(handle.clone());

    let app = Router::new().route("/metrics", get(|| async move { handle.render() }));

    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    tracing::info!("Metrics server listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}

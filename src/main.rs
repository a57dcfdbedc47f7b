use std::net::SocketAddr;
use std::sync::Arc;

use tokio::signal;
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

use ecomonitor::identity::FirebaseIdentity;
use ecomonitor::{api, config, store};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_env("ECOMONITOR_LOG").unwrap_or_else(|_| "info".into()))
        .with(fmt::layer().json())
        .init();

    let cfg = config::Config::load();

    // Connect to Postgres and run migrations
    let pool = store::pool::connect(&cfg.database_url).await?;

    let identity = FirebaseIdentity::new(&cfg)?;
    if cfg.firebase_api_key.is_none() {
        tracing::warn!("FIREBASE_API_KEY not set, sign-up and login will answer 503");
    }

    let state = store::AppState {
        pool: pool.clone(),
        identity: Arc::new(identity),
        config: Arc::new(cfg.clone()),
    };

    // Monitoring site row and first administrator
    store::bootstrap::run(&pool, state.identity.as_ref(), &cfg).await?;

    let app = api::app(state);

    let addr: SocketAddr = cfg.listen.parse()?;
    tracing::info!(%addr, "starting ecomonitor");

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal())
    .await?;

    tracing::info!("ecomonitor stopped");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!(error = %e, "failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {},
        () = terminate => {},
    }

    tracing::info!("shutdown signal received");
}

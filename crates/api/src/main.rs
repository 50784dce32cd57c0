use anyhow::{Context, Result};
use tokio::net::TcpListener;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use acsp_members_api::{
    app::build_router,
    config::{ApiConfig, LogFormat},
    db::{
        migrations::run_migrations,
        pool::{check_pool_health, create_pg_pool},
    },
    engine::MembershipEngine,
    outbox::Outbox,
    store::Store,
};

#[tokio::main]
async fn main() -> Result<()> {
    let config = ApiConfig::from_env();
    init_tracing(&config);

    let (store, outbox) = match config.database_url.as_deref() {
        Some(database_url) => {
            let pool = create_pg_pool(database_url, &config.pool).await?;
            if config.run_migrations {
                run_migrations(&pool).await?;
            }
            check_pool_health(&pool).await?;
            (Store::Postgres(pool.clone()), Outbox::Postgres(pool))
        }
        None => {
            warn!("ACSP_MEMBERS_DATABASE_URL is not set; using the in-memory store");
            (Store::memory(), Outbox::memory())
        }
    };

    let backend = store.backend_name();
    let app = build_router(MembershipEngine::new(store, outbox));

    let listener = TcpListener::bind(config.listen_addr)
        .await
        .with_context(|| format!("failed to bind listener on {}", config.listen_addr))?;

    info!(listen_addr = %config.listen_addr, backend, "starting acsp membership api");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("acsp membership api exited unexpectedly")
}

fn init_tracing(config: &ApiConfig) {
    let filter = EnvFilter::try_new(&config.log_filter).unwrap_or_else(|_| EnvFilter::new("info"));
    let builder = tracing_subscriber::fmt().with_env_filter(filter);
    match config.log_format {
        LogFormat::Json => builder.json().init(),
        LogFormat::Text => builder.init(),
    }
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(error) = tokio::signal::ctrl_c().await {
            warn!(?error, "failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(error) => {
                warn!(?error, "failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }

    info!("shutdown signal received");
}

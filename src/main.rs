use std::{sync::Arc, time::Duration};

use anyhow::{Context, Result};
use tokio::{net::TcpListener, signal};
use tracing::{error, info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use room_occupancy_service::{
    api::{self, AppState},
    clock::Clock,
    config::{Config, StoreBackend},
    db,
    reading_cache::ReadingCache,
    sensors::{Disconnected, OccupancyPoller, RealtimeDbClient, SensorGateway},
    store::{self, MemoryStore, PgStore, ReservationStore},
};

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env (ignore error if file absent; env vars may be set externally)
    let _ = dotenvy::dotenv();

    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(EnvFilter::from_default_env())
        .init();

    let config = Config::from_env()?;

    let store: Arc<dyn ReservationStore> = match config.store_backend {
        StoreBackend::Postgres => {
            let url = config
                .database_url
                .as_deref()
                .context("DATABASE_URL is required for the postgres store")?;
            let pool = db::create_pool(url).await?;
            db::run_migrations(&pool).await?;
            info!("Database ready");
            Arc::new(PgStore::new(pool))
        }
        StoreBackend::Memory => {
            warn!("Using the in-memory store; data is lost on restart");
            Arc::new(MemoryStore::new())
        }
    };

    store::provision_rooms(store.as_ref(), &config.rooms)
        .await
        .context("failed to provision rooms")?;

    let gateway: Arc<dyn SensorGateway> = match &config.sensor_base_url {
        Some(base_url) => {
            // The HTTP client's own cap only backs up the per-call bounds.
            let client = RealtimeDbClient::new(
                base_url,
                config.sensor_auth_token.clone(),
                config.sensor_bulk_timeout,
            )?;
            info!(base_url = %base_url, "Sensor gateway configured");
            Arc::new(client)
        }
        None => {
            warn!("SENSOR_BASE_URL not set; sensor-equipped rooms will read as unoccupied");
            Arc::new(Disconnected)
        }
    };

    let cache = ReadingCache::new();

    if config.poll_interval_secs > 0 {
        let poller = OccupancyPoller::new(
            store.clone(),
            gateway.clone(),
            cache.clone(),
            config.sensor_bulk_timeout,
            Duration::from_secs(config.poll_interval_secs),
        );
        tokio::spawn(poller.run());
    } else {
        info!("Occupancy polling disabled");
    }

    let state = AppState::new(
        store,
        gateway,
        cache,
        Clock::System,
        config.sensor_timeout,
        config.sensor_bulk_timeout,
    );

    let addr = format!("{}:{}", config.server_host, config.server_port);
    let listener = TcpListener::bind(&addr)
        .await
        .with_context(|| format!("failed to bind {addr}"))?;
    info!(addr = %addr, "HTTP server listening");

    axum::serve(listener, api::router(state))
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!(error = %e, "Failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    info!("Shutdown signal received");
}

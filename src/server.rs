use axum::{http::StatusCode, routing::get, Router};
use log::{error, info};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;

use crate::api;
use crate::config::Config;
use crate::error::MigratorError;
use crate::interactive::Interactive;
use crate::migrator::{
    BusProducer, Consumer, DoubleWritePool, MemoryBus, MessageBus, Scheduler, SharedPattern, Store,
};

const INTERACTIVE_ROUTES: &str = "/migrator/interactive";

pub struct WebServer {
    host: String,
    port: u16,
}

impl WebServer {
    pub fn new(host: String, port: u16) -> Self {
        Self { host, port }
    }

    pub async fn start(&self, config: &Config) -> Result<(), MigratorError> {
        let addr: SocketAddr = format!("{}:{}", self.host, self.port)
            .parse()
            .map_err(|e| MigratorError::Error(format!("Invalid address: {}", e)))?;

        let db = &config.database;
        let src = Store::open("src", &db.src, db.pool_size, db.busy_timeout())?;
        let dst = Store::open("dst", &db.dst, db.pool_size, db.busy_timeout())?;
        Interactive::ensure_schema(&src)?;
        Interactive::ensure_schema(&dst)?;

        let pattern = config.migrator.pattern();
        let pool = Arc::new(DoubleWritePool::new(
            src.clone(),
            dst.clone(),
            SharedPattern::new(pattern),
        ));
        info!("Dual-write pool ready with pattern {}", pattern);

        let bus: Arc<dyn MessageBus> = Arc::new(MemoryBus::new(config.migrator.max_redeliveries));
        let producer = Arc::new(BusProducer::new(Arc::clone(&bus), &config.migrator.topic));
        let scheduler = Arc::new(Scheduler::<Interactive>::new(
            Arc::clone(&pool),
            producer,
            config.migrator.batch_size,
        )?);

        // Start the event consumer with shutdown handling
        let consumer = Consumer::<Interactive>::new(
            bus.as_ref(),
            &config.migrator.topic,
            &config.migrator.group_id,
            src,
            dst,
        )?;
        let consumer_token = CancellationToken::new();
        let consumer_handle = tokio::spawn(consumer.run(consumer_token.clone()));

        let app = Router::new()
            .route("/health", get(health_check))
            .nest(
                INTERACTIVE_ROUTES,
                api::migrator::router(Arc::clone(&scheduler)),
            );

        let listener = TcpListener::bind(addr)
            .await
            .map_err(|e| MigratorError::Error(format!("Failed to bind to {}: {}", addr, e)))?;

        info!("Migrator control plane listening on http://{}{}", addr, INTERACTIVE_ROUTES);

        // Start the server with graceful shutdown
        axum::serve(listener, app)
            .with_graceful_shutdown(async move {
                shutdown_signal().await;
                info!("Shutdown signal received, stopping validation and consumer...");

                scheduler.shutdown().await;
                consumer_token.cancel();
                if let Err(e) = consumer_handle.await {
                    error!("Consumer task ended abnormally: {}", e);
                }

                info!("Server shutdown complete");
            })
            .await
            .map_err(|e| MigratorError::Error(format!("Server error: {}", e)))?;

        Ok(())
    }
}

async fn health_check() -> (StatusCode, &'static str) {
    (StatusCode::OK, "OK")
}

/// Waits for a shutdown signal (SIGTERM or SIGINT)
async fn shutdown_signal() {
    use tokio::signal;

    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!("Failed to install Ctrl+C handler: {}", e);
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
                error!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received SIGINT (Ctrl+C)");
        },
        _ = terminate => {
            info!("Received SIGTERM");
        },
    }
}

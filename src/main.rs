use std::net::SocketAddr;
use std::sync::Arc;

use catalog_service::config::{AppConfig, ConfigError};
use catalog_service::domain::EntityKind;
use catalog_service::events::consumer::spawn_consumer;
use catalog_service::events::handlers::{EventRouter, VideoEventHandler};
use catalog_service::events::projection::SaveVideo;
use catalog_service::http::{build_router, AppState};
use catalog_service::services::elasticsearch::SearchStoreError;
use catalog_service::services::enrichment::EnrichmentError;
use catalog_service::{ElasticsearchCatalog, HttpEnrichmentClient};
use tokio::net::TcpListener;
use tokio::sync::watch;
use tracing::info;

#[derive(Debug, thiserror::Error)]
enum AppError {
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),
    #[error("search backend error: {0}")]
    Search(#[from] SearchStoreError),
    #[error("enrichment client error: {0}")]
    Enrichment(#[from] EnrichmentError),
    #[error("server error: {0}")]
    Io(#[from] std::io::Error),
}

#[tokio::main]
async fn main() -> Result<(), AppError> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "catalog_service=debug".into()),
        )
        .init();

    dotenvy::dotenv().ok();

    let config = AppConfig::from_env()?;

    info!("connecting to Elasticsearch at {}", config.elasticsearch_url);
    let catalog = Arc::new(
        ElasticsearchCatalog::new(&config.elasticsearch_url, &config.indices).await?,
    );

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("interrupt received, shutting down");
            let _ = shutdown_tx.send(true);
        }
    });

    let consumer_handle = match &config.kafka {
        Some(kafka_config) => {
            let enrichment = Arc::new(HttpEnrichmentClient::new(
                &config.enrichment.base_url,
                config.enrichment.timeout,
            )?);
            let save_video = SaveVideo::new(enrichment, catalog.clone());
            let router = EventRouter::new().with_handler(
                EntityKind::Video,
                Arc::new(VideoEventHandler::new(save_video, catalog.clone())),
            );
            Some(spawn_consumer(
                router,
                kafka_config.clone(),
                shutdown_rx.clone(),
            ))
        }
        None => {
            info!("Kafka brokers not configured; projection consumer disabled");
            None
        }
    };

    let state = AppState { catalog };
    let app = build_router().with_state(state);

    let addr = SocketAddr::from(([0, 0, 0, 0], config.http_port));
    info!("catalog-service listening on {}", addr);

    let listener = TcpListener::bind(addr).await?;
    let mut server_shutdown = shutdown_rx.clone();
    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            let _ = server_shutdown.changed().await;
        })
        .await?;

    if let Some(handle) = consumer_handle {
        let _ = handle.await;
    }

    Ok(())
}

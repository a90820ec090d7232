//! Per-entity change-event handling and operation dispatch.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde::Deserialize;
use thiserror::Error;
use tracing::info;
use uuid::Uuid;

use crate::domain::EntityKind;
use crate::events::parser::{Operation, ParsedEvent};
use crate::events::projection::{SaveVideo, SaveVideoError, SaveVideoInput, VideoStore};
use crate::services::elasticsearch::SearchStoreError;

#[derive(Debug, Error)]
pub enum HandlerError {
    #[error("invalid event payload: {0}")]
    Payload(#[from] serde_json::Error),
    #[error(transparent)]
    Save(#[from] SaveVideoError),
    #[error("index write failed: {0}")]
    Index(#[from] SearchStoreError),
}

/// One implementation per entity kind. Payload fields are trusted to
/// match the source row; type coercion failures surface as
/// [`HandlerError::Payload`], never silently.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait EventHandler: Send + Sync {
    async fn handle_created(&self, event: &ParsedEvent) -> Result<(), HandlerError>;
    async fn handle_updated(&self, event: &ParsedEvent) -> Result<(), HandlerError>;
    async fn handle_deleted(&self, event: &ParsedEvent) -> Result<(), HandlerError>;
}

/// Routes the event to the handler method matching its operation.
/// Snapshot reads carry no state change and are ignored with a log line.
pub async fn dispatch(handler: &dyn EventHandler, event: &ParsedEvent) -> Result<(), HandlerError> {
    match event.operation {
        Operation::Create => handler.handle_created(event).await,
        Operation::Update => handler.handle_updated(event).await,
        Operation::Delete => handler.handle_deleted(event).await,
        Operation::Read => {
            info!(entity = event.entity.table(), "ignoring snapshot read event");
            Ok(())
        }
    }
}

/// Handler table built once at startup and passed into the consumer.
/// A parsed event whose kind has no entry is a configuration fault the
/// consumer fails loudly on.
#[derive(Default)]
pub struct EventRouter {
    handlers: HashMap<EntityKind, Arc<dyn EventHandler>>,
}

impl EventRouter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_handler(mut self, kind: EntityKind, handler: Arc<dyn EventHandler>) -> Self {
        self.handlers.insert(kind, handler);
        self
    }

    pub fn handler_for(&self, kind: EntityKind) -> Option<&Arc<dyn EventHandler>> {
        self.handlers.get(&kind)
    }
}

#[derive(Debug, Deserialize)]
struct DeletedRow {
    id: Uuid,
}

/// Projects video change events into the search index. Creates and
/// updates share the same upsert path.
pub struct VideoEventHandler {
    save_video: SaveVideo,
    store: Arc<dyn VideoStore>,
}

impl VideoEventHandler {
    pub fn new(save_video: SaveVideo, store: Arc<dyn VideoStore>) -> Self {
        Self { save_video, store }
    }

    async fn upsert(&self, event: &ParsedEvent) -> Result<(), HandlerError> {
        let input: SaveVideoInput = serde_json::from_value(event.payload.clone())?;
        self.save_video.execute(input).await?;
        Ok(())
    }
}

#[async_trait]
impl EventHandler for VideoEventHandler {
    async fn handle_created(&self, event: &ParsedEvent) -> Result<(), HandlerError> {
        info!("projecting created video");
        self.upsert(event).await
    }

    async fn handle_updated(&self, event: &ParsedEvent) -> Result<(), HandlerError> {
        info!("projecting updated video");
        self.upsert(event).await
    }

    async fn handle_deleted(&self, event: &ParsedEvent) -> Result<(), HandlerError> {
        let row: DeletedRow = serde_json::from_value(event.payload.clone())?;
        info!(video_id = %row.id, "removing deleted video from the index");
        self.store.delete_video(row.id).await?;
        Ok(())
    }
}

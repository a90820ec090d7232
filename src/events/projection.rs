//! The save-video use case: enrich a change-event row with its
//! associations from the admin catalog and upsert the denormalized
//! document into the index.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use serde::de::{Deserializer, Error as DeError};
use serde::Deserialize;
use serde_json::Value;
use thiserror::Error;
use tracing::debug;
use uuid::Uuid;

use crate::domain::{Rating, ValidationError, Video};
use crate::services::elasticsearch::SearchStoreError;
use crate::services::enrichment::{EnrichmentClient, EnrichmentError};

/// Write side of the video index.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait VideoStore: Send + Sync {
    async fn save_video(&self, video: &Video) -> Result<(), SearchStoreError>;
    async fn delete_video(&self, video_id: Uuid) -> Result<(), SearchStoreError>;
}

#[derive(Debug, Error)]
pub enum SaveVideoError {
    #[error("enrichment lookup failed: {0}")]
    Enrichment(#[from] EnrichmentError),
    #[error("invalid video record: {0}")]
    Validation(#[from] ValidationError),
    #[error("index write failed: {0}")]
    Index(#[from] SearchStoreError),
}

/// Scalar video fields lifted from the change-event row image.
#[derive(Debug, Clone, Deserialize)]
pub struct SaveVideoInput {
    pub id: Uuid,
    pub title: String,
    pub launch_year: i32,
    pub rating: Rating,
    #[serde(deserialize_with = "deserialize_cdc_datetime")]
    pub created_at: DateTime<Utc>,
    #[serde(deserialize_with = "deserialize_cdc_datetime")]
    pub updated_at: DateTime<Utc>,
    pub is_active: bool,
}

pub struct SaveVideo {
    client: Arc<dyn EnrichmentClient>,
    store: Arc<dyn VideoStore>,
}

impl SaveVideo {
    pub fn new(client: Arc<dyn EnrichmentClient>, store: Arc<dyn VideoStore>) -> Self {
        Self { client, store }
    }

    /// Builds the full projection and writes it as one document.
    ///
    /// The associative sets are replaced wholesale from the enrichment
    /// response; nothing from a previous projection survives. Any failure
    /// propagates so the message stays uncommitted and is retried on
    /// redelivery.
    pub async fn execute(&self, input: SaveVideoInput) -> Result<(), SaveVideoError> {
        let detail = self.client.get_video(input.id).await?;

        let categories = detail.categories.iter().map(|c| c.id).collect();
        let cast_members = detail.cast_members.iter().map(|m| m.id).collect();
        let genres = detail.genres.iter().map(|g| g.id).collect();

        let video = Video {
            id: input.id,
            title: input.title,
            launch_year: input.launch_year,
            rating: input.rating,
            categories,
            cast_members,
            genres,
            banner: detail.banner.raw_location,
            created_at: input.created_at,
            updated_at: input.updated_at,
            is_active: input.is_active,
        }
        .validated()?;

        self.store.save_video(&video).await?;
        debug!(video_id = %video.id, "projected video into the index");
        Ok(())
    }
}

/// Timestamps in CDC row images arrive in whatever shape the connector
/// was configured with: RFC3339 strings, bare dates, or epoch numbers.
fn deserialize_cdc_datetime<'de, D>(deserializer: D) -> Result<DateTime<Utc>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Value::deserialize(deserializer)?;

    match value {
        Value::String(s) => {
            if let Ok(dt) = DateTime::parse_from_rfc3339(&s) {
                return Ok(dt.with_timezone(&Utc));
            }
            if let Ok(naive) = NaiveDateTime::parse_from_str(&s, "%Y-%m-%dT%H:%M:%S") {
                return Ok(naive.and_utc());
            }
            NaiveDate::parse_from_str(&s, "%Y-%m-%d")
                .map(|date| date.and_time(chrono::NaiveTime::MIN).and_utc())
                .map_err(|e| D::Error::custom(format!("invalid timestamp {s:?}: {e}")))
        }
        Value::Number(num) => {
            let raw = num
                .as_i64()
                .ok_or_else(|| D::Error::custom("expected integer timestamp"))?;

            // 10-digit values are seconds, 13 digits milliseconds,
            // 16 digits microseconds (Debezium's default for TIMESTAMP).
            let (secs, nanos) = if raw.abs() < 1_000_000_000_000 {
                (raw, 0)
            } else if raw.abs() < 1_000_000_000_000_000 {
                (raw / 1000, (raw % 1000) * 1_000_000)
            } else {
                (raw / 1_000_000, (raw % 1_000_000) * 1000)
            };

            DateTime::<Utc>::from_timestamp(secs, nanos as u32)
                .ok_or_else(|| D::Error::custom("timestamp out of range"))
        }
        other => Err(D::Error::custom(format!(
            "unsupported timestamp representation: {other}"
        ))),
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use std::collections::HashMap;
    use std::sync::Mutex;

    use super::*;

    /// Hash-map backed [`VideoStore`] for exercising upsert semantics.
    #[derive(Default)]
    pub(crate) struct InMemoryVideoStore {
        pub(crate) videos: Mutex<HashMap<Uuid, Video>>,
        pub(crate) deleted: Mutex<Vec<Uuid>>,
    }

    #[async_trait]
    impl VideoStore for InMemoryVideoStore {
        async fn save_video(&self, video: &Video) -> Result<(), SearchStoreError> {
            self.videos
                .lock()
                .unwrap()
                .insert(video.id, video.clone());
            Ok(())
        }

        async fn delete_video(&self, video_id: Uuid) -> Result<(), SearchStoreError> {
            self.videos.lock().unwrap().remove(&video_id);
            self.deleted.lock().unwrap().push(video_id);
            Ok(())
        }
    }
}

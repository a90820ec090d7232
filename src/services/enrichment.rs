//! Remote lookup against the admin catalog API.
//!
//! Change events only carry the video's scalar row; the associations and
//! banner come from this client at projection time.

use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use thiserror::Error;
use url::Url;
use uuid::Uuid;

use crate::domain::{CastMemberKind, Rating};

#[derive(Debug, Error)]
pub enum EnrichmentError {
    #[error("catalog admin request failed: {0}")]
    Request(#[from] reqwest::Error),
    #[error("catalog admin returned status {status} for video {video_id}")]
    Status { status: u16, video_id: Uuid },
}

/// Full video detail as served by the admin catalog.
#[derive(Debug, Clone, Deserialize)]
pub struct VideoDetail {
    pub id: Uuid,
    pub title: String,
    pub launch_year: i32,
    pub rating: Rating,
    pub is_active: bool,
    pub categories: Vec<CategorySummary>,
    pub cast_members: Vec<CastMemberSummary>,
    pub genres: Vec<GenreSummary>,
    pub banner: BannerDetail,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CategorySummary {
    pub id: Uuid,
    pub name: String,
    #[serde(default)]
    pub description: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CastMemberSummary {
    pub id: Uuid,
    pub name: String,
    #[serde(rename = "type")]
    pub kind: CastMemberKind,
}

#[derive(Debug, Clone, Deserialize)]
pub struct GenreSummary {
    pub id: Uuid,
    pub name: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct BannerDetail {
    pub name: String,
    pub raw_location: Url,
}

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait EnrichmentClient: Send + Sync {
    async fn get_video(&self, video_id: Uuid) -> Result<VideoDetail, EnrichmentError>;
}

pub struct HttpEnrichmentClient {
    client: reqwest::Client,
    base_url: String,
}

impl HttpEnrichmentClient {
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self, EnrichmentError> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }
}

#[async_trait]
impl EnrichmentClient for HttpEnrichmentClient {
    async fn get_video(&self, video_id: Uuid) -> Result<VideoDetail, EnrichmentError> {
        let url = format!("{}/videos/{}", self.base_url, video_id);
        let response = self.client.get(&url).send().await?;

        let status = response.status();
        if !status.is_success() {
            return Err(EnrichmentError::Status {
                status: status.as_u16(),
                video_id,
            });
        }

        Ok(response.json::<VideoDetail>().await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn video_detail_deserializes_admin_response() {
        let payload = json!({
            "id": "d5889ed5-3d3f-11ef-baf5-0242ac130006",
            "title": "The Godfather",
            "launch_year": 1972,
            "rating": "AGE_18",
            "is_active": true,
            "categories": [
                { "id": "142f2b4b-1b7b-4f3b-8eab-3f2f2b4b1b7b", "name": "Action", "description": "Action movies" }
            ],
            "cast_members": [
                { "id": "242f2b4b-1b7b-4f3b-8eab-3f2f2b4b1b7b", "name": "Marlon Brando", "type": "ACTOR" }
            ],
            "genres": [
                { "id": "442f2b4b-1b7b-4f3b-8eab-3f2f2b4b1b7b", "name": "Drama" }
            ],
            "banner": {
                "name": "The Godfather",
                "raw_location": "https://banner.example/the-godfather"
            }
        });

        let detail: VideoDetail = serde_json::from_value(payload).unwrap();
        assert_eq!(detail.rating, Rating::Age18);
        assert_eq!(detail.categories.len(), 1);
        assert_eq!(detail.cast_members[0].kind, CastMemberKind::Actor);
        assert_eq!(detail.banner.raw_location.as_str(), "https://banner.example/the-godfather");
    }

    #[test]
    fn video_detail_rejects_unknown_rating() {
        let payload = json!({
            "id": "d5889ed5-3d3f-11ef-baf5-0242ac130006",
            "title": "The Godfather",
            "launch_year": 1972,
            "rating": "NC_17",
            "is_active": true,
            "categories": [],
            "cast_members": [],
            "genres": [],
            "banner": { "name": "b", "raw_location": "https://banner.example/b" }
        });

        assert!(serde_json::from_value::<VideoDetail>(payload).is_err());
    }
}

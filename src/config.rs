//! Environment-driven configuration, loaded once at process start.

use std::time::Duration;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("{0} must be set")]
    Missing(&'static str),
    #[error("{0} is not a valid value")]
    Invalid(&'static str),
}

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub http_port: u16,
    pub elasticsearch_url: String,
    pub indices: IndexNames,
    pub enrichment: EnrichmentConfig,
    /// `None` when Kafka is not configured; the service then serves
    /// listings only and skips the projection consumer.
    pub kafka: Option<KafkaConfig>,
}

#[derive(Debug, Clone)]
pub struct IndexNames {
    pub categories: String,
    pub cast_members: String,
    pub genres: String,
    pub genre_categories: String,
    pub videos: String,
}

#[derive(Debug, Clone)]
pub struct EnrichmentConfig {
    pub base_url: String,
    pub timeout: Duration,
}

#[derive(Debug, Clone)]
pub struct KafkaConfig {
    pub brokers: String,
    pub group_id: String,
    pub topics: Vec<String>,
}

impl AppConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        let http_port = match std::env::var("PORT") {
            Ok(raw) => raw.parse().map_err(|_| ConfigError::Invalid("PORT"))?,
            Err(_) => 8080,
        };

        let elasticsearch_url = std::env::var("ELASTICSEARCH_URL")
            .unwrap_or_else(|_| "http://localhost:9200".to_string());

        let base_url =
            std::env::var("CATALOG_ADMIN_URL").map_err(|_| ConfigError::Missing("CATALOG_ADMIN_URL"))?;
        let timeout_secs = match std::env::var("CATALOG_ADMIN_TIMEOUT_SECS") {
            Ok(raw) => raw
                .parse()
                .map_err(|_| ConfigError::Invalid("CATALOG_ADMIN_TIMEOUT_SECS"))?,
            Err(_) => 10,
        };

        Ok(Self {
            http_port,
            elasticsearch_url,
            indices: IndexNames::from_env(),
            enrichment: EnrichmentConfig {
                base_url,
                timeout: Duration::from_secs(timeout_secs),
            },
            kafka: KafkaConfig::from_env(),
        })
    }
}

impl IndexNames {
    fn from_env() -> Self {
        Self {
            categories: index_var("ELASTICSEARCH_CATEGORY_INDEX", "catalog-db.codeflix.categories"),
            cast_members: index_var(
                "ELASTICSEARCH_CAST_MEMBER_INDEX",
                "catalog-db.codeflix.cast_members",
            ),
            genres: index_var("ELASTICSEARCH_GENRE_INDEX", "catalog-db.codeflix.genres"),
            genre_categories: index_var(
                "ELASTICSEARCH_GENRE_CATEGORIES_INDEX",
                "catalog-db.codeflix.genre_categories",
            ),
            videos: index_var("ELASTICSEARCH_VIDEO_INDEX", "catalog-db.codeflix.videos"),
        }
    }
}

fn index_var(name: &str, default: &str) -> String {
    std::env::var(name).unwrap_or_else(|_| default.to_string())
}

impl KafkaConfig {
    /// Returns `None` if brokers are not configured.
    pub fn from_env() -> Option<Self> {
        let brokers = std::env::var("KAFKA_BROKERS")
            .or_else(|_| std::env::var("BOOTSTRAP_SERVERS"))
            .ok()?;

        if brokers.trim().is_empty() {
            return None;
        }

        let topics = std::env::var("KAFKA_TOPICS")
            .unwrap_or_else(|_| "catalog-db.codeflix.videos".to_string())
            .split(',')
            .map(|topic| topic.trim().to_string())
            .filter(|topic| !topic.is_empty())
            .collect();

        Some(Self {
            brokers,
            group_id: std::env::var("KAFKA_GROUP_ID")
                .unwrap_or_else(|_| "consumer-cluster".to_string()),
            topics,
        })
    }
}

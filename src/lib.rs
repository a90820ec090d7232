pub mod config;
pub mod domain;
pub mod events;
pub mod http;
pub mod listing;
pub mod services;

pub use services::{ElasticsearchCatalog, HttpEnrichmentClient};

pub mod elasticsearch;
pub mod enrichment;

pub use elasticsearch::ElasticsearchCatalog;
pub use enrichment::HttpEnrichmentClient;

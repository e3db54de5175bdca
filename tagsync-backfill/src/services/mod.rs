//! Service modules for metadata backfill
//!
//! - `metadata_fetcher`: the seam the orchestrator calls
//! - `track_api_client`: HTTP implementation routed through the coordinator

pub mod metadata_fetcher;
pub mod track_api_client;

pub use metadata_fetcher::MetadataFetcher;
pub use track_api_client::{HttpMetadataFetcher, DEFAULT_API_BASE_URL};

//! Metadata fetcher seam
//!
//! The orchestrator only sees this trait. Implementations build one external
//! API call, route it through a `RequestCoordinator` and parse the response.

use crate::error::ApiError;
use crate::models::TrackIdentity;
use async_trait::async_trait;

#[async_trait]
pub trait MetadataFetcher: Send + Sync {
    /// Track title and artist names; `None` when the API has no such track
    async fn fetch_identity(&self, record_key: &str) -> Result<Option<TrackIdentity>, ApiError>;

    /// Tempo in BPM; `None` when the API has no analysis for the track
    async fn fetch_numeric_feature(&self, record_key: &str) -> Result<Option<f64>, ApiError>;
}

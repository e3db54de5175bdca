//! Track metadata API client
//!
//! Two lookups, both routed through the shared [`RequestCoordinator`]:
//! - `GET {base}/tracks/{id}` → title and artists (key `getTrack:<id>`)
//! - `GET {base}/audio-features/{id}` → tempo (key `getAudioFeatures:<id>`)
//!
//! Responses are validated at this boundary: a body that does not match the
//! expected structure is a terminal `Malformed` error, never a half-filled
//! value.

use super::MetadataFetcher;
use crate::coordinator::RequestCoordinator;
use crate::error::ApiError;
use crate::models::TrackIdentity;
use async_trait::async_trait;
use reqwest::header::RETRY_AFTER;
use reqwest::StatusCode;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use std::sync::Arc;

pub const DEFAULT_API_BASE_URL: &str = "https://api.spotify.com/v1";
const USER_AGENT: &str = concat!("TagSync/", env!("CARGO_PKG_VERSION"));

#[derive(Debug, Clone, Deserialize)]
struct TrackResponse {
    name: String,
    #[serde(default)]
    artists: Vec<ArtistResponse>,
}

#[derive(Debug, Clone, Deserialize)]
struct ArtistResponse {
    name: String,
}

#[derive(Debug, Clone, Deserialize)]
struct AudioFeaturesResponse {
    tempo: Option<f64>,
}

/// HTTP-backed [`MetadataFetcher`]
#[derive(Clone)]
pub struct HttpMetadataFetcher {
    http_client: reqwest::Client,
    coordinator: RequestCoordinator,
    base_url: Arc<str>,
    api_token: Option<Arc<str>>,
}

impl HttpMetadataFetcher {
    /// `api_token` is a pre-acquired bearer token, sent as-is
    pub fn new(
        coordinator: RequestCoordinator,
        base_url: impl Into<String>,
        api_token: Option<String>,
    ) -> Result<Self, ApiError> {
        // Per-call timeout is enforced by the coordinator
        let http_client = reqwest::Client::builder()
            .user_agent(USER_AGENT)
            .build()
            .map_err(|e| ApiError::Network(e.to_string()))?;

        let base_url = base_url.into();
        Ok(Self {
            http_client,
            coordinator,
            base_url: Arc::from(base_url.trim_end_matches('/')),
            api_token: api_token.filter(|t| !t.trim().is_empty()).map(Arc::from),
        })
    }

    pub fn coordinator(&self) -> &RequestCoordinator {
        &self.coordinator
    }

    async fn get<T>(&self, call_key: String, url: String) -> Result<Option<T>, ApiError>
    where
        T: DeserializeOwned + Clone + Send + Sync + 'static,
    {
        let client = self.http_client.clone();
        let token = self.api_token.clone();

        self.coordinator
            .execute(&call_key, move || async move {
                tracing::debug!(url = %url, "Querying metadata API");

                let mut request = client.get(&url);
                if let Some(token) = token {
                    request = request.bearer_auth(token);
                }

                let response = request.send().await?;
                let status = response.status();

                if status == StatusCode::NOT_FOUND {
                    return Ok(None);
                }

                if !status.is_success() {
                    let retry_after = response
                        .headers()
                        .get(RETRY_AFTER)
                        .and_then(|v| v.to_str().ok())
                        .map(str::to_string);
                    let body = response.text().await.unwrap_or_default();
                    return Err(ApiError::from_status(status.as_u16(), retry_after.as_deref(), body));
                }

                let body = response.text().await?;
                parse_body::<T>(&body).map(Some)
            })
            .await
    }
}

#[async_trait]
impl MetadataFetcher for HttpMetadataFetcher {
    async fn fetch_identity(&self, record_key: &str) -> Result<Option<TrackIdentity>, ApiError> {
        let id = validate_id(record_key)?;
        let url = format!("{}/tracks/{}", self.base_url, id);

        let track: Option<TrackResponse> = self.get(format!("getTrack:{}", id), url).await?;
        track.map(into_identity).transpose()
    }

    async fn fetch_numeric_feature(&self, record_key: &str) -> Result<Option<f64>, ApiError> {
        let id = validate_id(record_key)?;
        let url = format!("{}/audio-features/{}", self.base_url, id);

        let features: Option<AudioFeaturesResponse> =
            self.get(format!("getAudioFeatures:{}", id), url).await?;
        Ok(features.and_then(|f| f.tempo).filter(|t| t.is_finite() && *t > 0.0))
    }
}

fn validate_id(record_key: &str) -> Result<&str, ApiError> {
    let id = record_key.trim();
    if id.is_empty() || id.contains('/') || id.contains('?') {
        return Err(ApiError::Terminal(format!("Invalid record key: {:?}", record_key)));
    }
    Ok(id)
}

fn parse_body<T: DeserializeOwned>(body: &str) -> Result<T, ApiError> {
    serde_json::from_str(body).map_err(|e| ApiError::Malformed(e.to_string()))
}

fn into_identity(track: TrackResponse) -> Result<TrackIdentity, ApiError> {
    let display_name = track.name.trim().to_string();
    if display_name.is_empty() {
        return Err(ApiError::Malformed("Track has an empty name".to_string()));
    }

    Ok(TrackIdentity {
        display_name,
        artists: track
            .artists
            .into_iter()
            .map(|a| a.name.trim().to_string())
            .filter(|n| !n.is_empty())
            .collect(),
    })
}

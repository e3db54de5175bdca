//! Track records and the dataset
//!
//! A [`TrackRecord`] is owned by the Local Store; the orchestrator works on a
//! copy inside a [`Dataset`] and writes it back.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// One tagged/rated track
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrackRecord {
    /// Opaque identifier (remote track id)
    pub key: String,

    /// Track title, backfilled from the metadata API
    #[serde(default)]
    pub name: Option<String>,

    /// Artist display names, backfilled from the metadata API
    #[serde(default)]
    pub artists: Option<Vec<String>>,

    /// Tempo in BPM, backfilled from the metadata API
    #[serde(default)]
    pub tempo: Option<f64>,

    /// User tags
    #[serde(default)]
    pub tags: Vec<String>,

    /// User rating
    #[serde(default)]
    pub rating: Option<u8>,

    /// Local-only file with no remote counterpart; never enriched
    #[serde(default)]
    pub is_local: bool,
}

/// Which backfill targets a record lacks
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MissingFields {
    /// Name or artists missing
    pub identity: bool,
    /// Tempo missing
    pub tempo: bool,
}

impl MissingFields {
    pub fn any(&self) -> bool {
        self.identity || self.tempo
    }
}

impl TrackRecord {
    pub fn new(key: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            name: None,
            artists: None,
            tempo: None,
            tags: Vec::new(),
            rating: None,
            is_local: false,
        }
    }

    pub fn missing_fields(&self) -> MissingFields {
        let name_missing = self.name.as_deref().map_or(true, |n| n.trim().is_empty());
        let artists_missing = self.artists.as_ref().map_or(true, |a| a.is_empty());
        MissingFields {
            identity: name_missing || artists_missing,
            tempo: self.tempo.is_none(),
        }
    }

    pub fn is_eligible_for_enrichment(&self) -> bool {
        !self.is_local
    }

    pub fn needs_backfill(&self) -> bool {
        self.is_eligible_for_enrichment() && self.missing_fields().any()
    }

    /// No tags and no rating: nothing the user cares about
    pub fn is_empty(&self) -> bool {
        self.rating.is_none() && self.tags.iter().all(|t| t.trim().is_empty())
    }

    /// Fill missing fields from `metadata`; present values are never overwritten
    ///
    /// Returns true if any field changed.
    pub fn apply(&mut self, metadata: &TrackMetadata) -> bool {
        let missing = self.missing_fields();
        let mut changed = false;

        if missing.identity {
            if let Some(name) = metadata.name.as_ref().filter(|n| !n.trim().is_empty()) {
                if self.name.as_deref().map_or(true, |n| n.trim().is_empty()) {
                    self.name = Some(name.clone());
                    changed = true;
                }
            }
            if let Some(artists) = metadata.artists.as_ref().filter(|a| !a.is_empty()) {
                if self.artists.as_ref().map_or(true, |a| a.is_empty()) {
                    self.artists = Some(artists.clone());
                    changed = true;
                }
            }
        }

        if missing.tempo {
            if let Some(tempo) = metadata.tempo {
                self.tempo = Some(tempo);
                changed = true;
            }
        }

        changed
    }
}

/// Identity fields returned by the metadata API
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrackIdentity {
    pub display_name: String,
    pub artists: Vec<String>,
}

/// Partial track metadata: a fetch result or a cache entry
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TrackMetadata {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub artists: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tempo: Option<f64>,
}

impl TrackMetadata {
    pub fn with_identity(mut self, identity: TrackIdentity) -> Self {
        self.name = Some(identity.display_name);
        self.artists = Some(identity.artists);
        self
    }
}

/// All track records, keyed by record key
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Dataset {
    records: BTreeMap<String, TrackRecord>,
}

impl Dataset {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn insert(&mut self, record: TrackRecord) {
        self.records.insert(record.key.clone(), record);
    }

    pub fn get(&self, key: &str) -> Option<&TrackRecord> {
        self.records.get(key)
    }

    pub fn get_mut(&mut self, key: &str) -> Option<&mut TrackRecord> {
        self.records.get_mut(key)
    }

    pub fn iter(&self) -> impl Iterator<Item = &TrackRecord> {
        self.records.values()
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = &mut TrackRecord> {
        self.records.values_mut()
    }

    /// Keep only records matching `keep`; returns how many were removed
    pub fn retain(&mut self, mut keep: impl FnMut(&TrackRecord) -> bool) -> usize {
        let before = self.records.len();
        self.records.retain(|_, record| keep(record));
        before - self.records.len()
    }
}

impl FromIterator<TrackRecord> for Dataset {
    fn from_iter<I: IntoIterator<Item = TrackRecord>>(iter: I) -> Self {
        let mut dataset = Dataset::new();
        for record in iter {
            dataset.insert(record);
        }
        dataset
    }
}

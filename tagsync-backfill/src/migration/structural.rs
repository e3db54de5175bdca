//! Structural migrations: pure, single-pass dataset transforms

use super::Migration;
use crate::models::{Dataset, TrackRecord};
use std::collections::HashSet;
use tracing::debug;

/// Apply a structural migration; returns how many records it touched
///
/// The backfill migration is not structural and touches nothing here.
pub(super) fn apply(migration: Migration, dataset: &mut Dataset) -> usize {
    match migration {
        Migration::NormalizeTags => normalize_tags(dataset),
        Migration::PurgeEmptyRecords => purge_empty_records(dataset),
        Migration::BackfillMetadata => 0,
    }
}

/// Trim tags, drop empty ones, drop case-insensitive duplicates (first spelling wins)
pub(super) fn normalize_tags(dataset: &mut Dataset) -> usize {
    let mut touched = 0;
    for record in dataset.iter_mut() {
        if normalize_record_tags(record) {
            touched += 1;
        }
    }
    touched
}

fn normalize_record_tags(record: &mut TrackRecord) -> bool {
    let mut seen = HashSet::new();
    let normalized: Vec<String> = record
        .tags
        .iter()
        .map(|tag| tag.trim())
        .filter(|tag| !tag.is_empty())
        .filter(|tag| seen.insert(tag.to_lowercase()))
        .map(str::to_string)
        .collect();

    if normalized == record.tags {
        return false;
    }

    debug!(
        key = %record.key,
        before = record.tags.len(),
        after = normalized.len(),
        "Normalized tags"
    );
    record.tags = normalized;
    true
}

/// Remove records with no tags and no rating
pub(super) fn purge_empty_records(dataset: &mut Dataset) -> usize {
    dataset.retain(|record| !record.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(key: &str, tags: &[&str], rating: Option<u8>) -> TrackRecord {
        let mut record = TrackRecord::new(key);
        record.tags = tags.iter().map(|t| t.to_string()).collect();
        record.rating = rating;
        record
    }

    #[test]
    fn test_normalize_tags() {
        let mut dataset: Dataset = vec![
            record("a", &[" Chill ", "chill", "", "Focus", "CHILL"], None),
            record("b", &["Workout"], None),
        ]
        .into_iter()
        .collect();

        assert_eq!(normalize_tags(&mut dataset), 1);
        assert_eq!(dataset.get("a").unwrap().tags, vec!["Chill", "Focus"]);
        assert_eq!(dataset.get("b").unwrap().tags, vec!["Workout"]);

        // Second pass is a no-op
        assert_eq!(normalize_tags(&mut dataset), 0);
    }

    #[test]
    fn test_purge_empty_records() {
        let mut dataset: Dataset = vec![
            record("tagged", &["x"], None),
            record("rated", &[], Some(4)),
            record("empty", &[], None),
            record("blank", &["  "], None),
        ]
        .into_iter()
        .collect();

        assert_eq!(purge_empty_records(&mut dataset), 2);
        assert_eq!(dataset.len(), 2);
        assert!(dataset.get("empty").is_none());
        assert!(dataset.get("blank").is_none());
    }

    #[test]
    fn test_backfill_is_not_structural() {
        let mut dataset: Dataset = vec![record("a", &[" x "], None)].into_iter().collect();
        assert_eq!(apply(Migration::BackfillMetadata, &mut dataset), 0);
        assert_eq!(dataset.get("a").unwrap().tags, vec![" x "]);
    }
}

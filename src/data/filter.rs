use std::collections::HashSet;

use super::model::{CanonicalKey, Record};
use crate::config::PipelineConfig;

// ---------------------------------------------------------------------------
// Cleaner – drop records with missing fields
// ---------------------------------------------------------------------------

/// Completeness rule applied to every record.
///
/// A record fails when any checked field is `Null`, or empty while
/// `empty_is_missing` is set. With `required` unset every column is checked;
/// otherwise only the listed ones, and a listed column the record lacks
/// counts as missing.
#[derive(Debug, Clone)]
pub struct Cleaner {
    empty_is_missing: bool,
    required: Option<Vec<String>>,
}

impl Default for Cleaner {
    fn default() -> Self {
        Self {
            empty_is_missing: true,
            required: None,
        }
    }
}

impl Cleaner {
    pub fn new(empty_is_missing: bool, required: Option<Vec<String>>) -> Self {
        Self {
            empty_is_missing,
            required,
        }
    }

    pub fn from_config(config: &PipelineConfig) -> Self {
        Self::new(config.empty_is_missing, config.required_columns.clone())
    }

    /// Whether `record` survives cleaning.
    pub fn is_complete(&self, record: &Record) -> bool {
        match &self.required {
            None => record
                .values()
                .iter()
                .all(|v| !v.is_missing(self.empty_is_missing)),
            Some(columns) => columns.iter().all(|c| {
                record
                    .get(c)
                    .is_some_and(|v| !v.is_missing(self.empty_is_missing))
            }),
        }
    }

    /// Filter a record stream, preserving order.
    pub fn clean<'a, I>(&'a self, records: I) -> impl Iterator<Item = Record> + 'a
    where
        I: IntoIterator<Item = Record>,
        I::IntoIter: 'a,
    {
        records.into_iter().filter(move |r| self.is_complete(r))
    }
}

// ---------------------------------------------------------------------------
// Deduplicator – drop exact repeats, first occurrence wins
// ---------------------------------------------------------------------------

/// Hash index of canonical keys seen so far in one run.
///
/// Lookup is O(1) on average per record. The index belongs to a single run
/// and is freed when the deduplicator is dropped.
#[derive(Debug, Default)]
pub struct Deduplicator {
    seen: HashSet<CanonicalKey>,
}

impl Deduplicator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns `true` the first time a record's contents are seen.
    pub fn admit(&mut self, record: &Record) -> bool {
        self.seen.insert(record.canonical_key())
    }

    /// Number of distinct records admitted so far.
    pub fn distinct(&self) -> usize {
        self.seen.len()
    }

    /// Filter a record stream, keeping first occurrences in input order.
    pub fn dedup<I>(mut self, records: I) -> impl Iterator<Item = Record>
    where
        I: IntoIterator<Item = Record>,
    {
        records.into_iter().filter(move |r| self.admit(r))
    }
}

/// Convenience: cleaner with the default policy.
pub fn clean<I: IntoIterator<Item = Record>>(records: I) -> Vec<Record> {
    let cleaner = Cleaner::default();
    records
        .into_iter()
        .filter(|r| cleaner.is_complete(r))
        .collect()
}

/// Convenience: deduplicate with a fresh index.
pub fn dedup<I: IntoIterator<Item = Record>>(records: I) -> Vec<Record> {
    Deduplicator::new().dedup(records).collect()
}

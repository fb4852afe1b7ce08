use std::collections::HashSet;
use std::fmt;
use std::sync::Arc;

use serde::Serialize;

use crate::error::{Result, SweepError};

// ---------------------------------------------------------------------------
// FieldValue – a single cell
// ---------------------------------------------------------------------------

/// One cell of a record. The parser only produces `Null` for configured
/// null markers; everything else, including the empty string, is `Text`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(untagged)]
pub enum FieldValue {
    Null,
    Text(String),
}

impl FieldValue {
    /// Whether the cleaner should treat this cell as missing.
    pub fn is_missing(&self, empty_is_missing: bool) -> bool {
        match self {
            FieldValue::Null => true,
            FieldValue::Text(s) => empty_is_missing && s.is_empty(),
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            FieldValue::Text(s) => Some(s),
            FieldValue::Null => None,
        }
    }
}

impl fmt::Display for FieldValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FieldValue::Text(s) => write!(f, "{s}"),
            FieldValue::Null => write!(f, "<null>"),
        }
    }
}

impl From<&str> for FieldValue {
    fn from(s: &str) -> Self {
        FieldValue::Text(s.to_string())
    }
}

impl From<String> for FieldValue {
    fn from(s: String) -> Self {
        FieldValue::Text(s)
    }
}

impl<T: Into<FieldValue>> From<Option<T>> for FieldValue {
    fn from(v: Option<T>) -> Self {
        v.map_or(FieldValue::Null, Into::into)
    }
}

// ---------------------------------------------------------------------------
// Header – column names shared by every record of a dataset
// ---------------------------------------------------------------------------

/// Ordered column names. Cloning is cheap; all records of one dataset point
/// at the same allocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Header {
    names: Arc<[String]>,
}

impl Header {
    /// Build a header, rejecting blank or repeated column names.
    pub fn new(names: Vec<String>) -> Result<Self> {
        if names.is_empty() {
            return Err(SweepError::InvalidHeader("no columns".into()));
        }
        let mut seen = HashSet::with_capacity(names.len());
        for (i, name) in names.iter().enumerate() {
            if name.trim().is_empty() {
                return Err(SweepError::InvalidHeader(format!(
                    "column {} has an empty name",
                    i + 1
                )));
            }
            if !seen.insert(name.as_str()) {
                return Err(SweepError::InvalidHeader(format!(
                    "duplicate column name '{name}'"
                )));
            }
        }
        Ok(Self {
            names: names.into(),
        })
    }

    /// `column_1 … column_n`, used when the source has no header row.
    pub fn synthesized(n: usize) -> Self {
        Self {
            names: (1..=n).map(|i| format!("column_{i}")).collect(),
        }
    }

    pub fn names(&self) -> &[String] {
        &self.names
    }

    pub fn len(&self) -> usize {
        self.names.len()
    }

    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }

    pub fn index_of(&self, column: &str) -> Option<usize> {
        self.names.iter().position(|n| n == column)
    }
}

// ---------------------------------------------------------------------------
// Record – one row
// ---------------------------------------------------------------------------

/// One row as an ordered column → value mapping.
///
/// Equality ignores column order and the source row number: two records are
/// equal when they hold the same set of (column, value) pairs.
#[derive(Debug, Clone)]
pub struct Record {
    header: Header,
    values: Vec<FieldValue>,
    row: u64,
}

impl Record {
    /// `values` must line up with `header`; the parser guarantees it.
    pub fn new(header: Header, values: Vec<FieldValue>, row: u64) -> Self {
        debug_assert_eq!(header.len(), values.len());
        Self { header, values, row }
    }

    /// Build a standalone record from (column, value) pairs in the given order.
    pub fn from_pairs<K, V, I>(pairs: I) -> Result<Self>
    where
        K: Into<String>,
        V: Into<FieldValue>,
        I: IntoIterator<Item = (K, V)>,
    {
        let (names, values): (Vec<String>, Vec<FieldValue>) = pairs
            .into_iter()
            .map(|(k, v)| (k.into(), v.into()))
            .unzip();
        Ok(Self::new(Header::new(names)?, values, 0))
    }

    pub fn header(&self) -> &Header {
        &self.header
    }

    pub fn values(&self) -> &[FieldValue] {
        &self.values
    }

    /// Source row ordinal (0 for records built in memory).
    pub fn row(&self) -> u64 {
        self.row
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn get(&self, column: &str) -> Option<&FieldValue> {
        self.header.index_of(column).map(|i| &self.values[i])
    }

    /// (column, value) pairs in header order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &FieldValue)> {
        self.header
            .names()
            .iter()
            .map(String::as_str)
            .zip(self.values.iter())
    }

    /// Order-independent identity used for duplicate detection.
    pub fn canonical_key(&self) -> CanonicalKey {
        let mut pairs: Vec<(String, FieldValue)> = self
            .iter()
            .map(|(k, v)| (k.to_string(), v.clone()))
            .collect();
        pairs.sort_unstable_by(|a, b| a.0.cmp(&b.0));
        CanonicalKey(pairs)
    }
}

impl PartialEq for Record {
    fn eq(&self, other: &Self) -> bool {
        if self.len() != other.len() {
            return false;
        }
        if self.header == other.header {
            return self.values == other.values;
        }
        self.iter()
            .all(|(column, value)| other.get(column) == Some(value))
    }
}

impl Eq for Record {}

// ---------------------------------------------------------------------------
// CanonicalKey
// ---------------------------------------------------------------------------

/// A record's (column, value) pairs sorted by column name. Column names are
/// unique within a header, so the sort is total and the key is deterministic.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CanonicalKey(Vec<(String, FieldValue)>);

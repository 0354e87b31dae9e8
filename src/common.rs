use indexmap::IndexMap;
use thiserror::Error;

use crate::formatting::{sanitize_label_key, sanitize_label_value};

/// Errors that could occur while building or installing the exporter.
#[derive(Debug, Error)]
pub enum BuildError {
    /// There was an issue when creating the necessary Tokio runtime to launch the exporter.
    #[error("failed to create Tokio runtime for exporter: {0}")]
    FailedToCreateRuntime(String),

    /// There was an issue when creating the HTTP listener.
    #[error("failed to create HTTP listener: {0}")]
    FailedToCreateHTTPListener(String),

    /// There was an issue loading the native TLS root certificates for the API client.
    #[error("failed to load native TLS root certificates: {0}")]
    FailedToLoadNativeRoots(String),
}

/// A set of labels attached to an observation.
///
/// Labels are kept in insertion order, but two label sets compare equal whenever they carry
/// the same key/value pairs, regardless of the order the pairs were added in.
#[derive(Clone, Debug, Default)]
pub struct LabelSet {
    labels: IndexMap<String, String>,
}

impl LabelSet {
    /// Creates an empty `LabelSet`.
    pub fn new() -> Self {
        Self { labels: IndexMap::new() }
    }

    /// Creates a `LabelSet` from key/value pairs.
    pub fn from_pairs<K, V, I>(pairs: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        Self { labels: pairs.into_iter().map(|(k, v)| (k.into(), v.into())).collect() }
    }

    /// Adds a label to the set, replacing the value if the key is already present.
    pub fn insert<K, V>(&mut self, key: K, value: V)
    where
        K: Into<String>,
        V: Into<String>,
    {
        self.labels.insert(key.into(), value.into());
    }

    /// Returns the value of the label with the given key, if it exists.
    pub fn get(&self, key: &str) -> Option<&str> {
        self.labels.get(key).map(String::as_str)
    }

    /// Returns the label names in the set, in insertion order.
    pub fn names(&self) -> Vec<String> {
        self.labels.keys().cloned().collect()
    }

    /// Returns the number of labels in the set.
    pub fn len(&self) -> usize {
        self.labels.len()
    }

    /// Returns `true` if the set contains no labels.
    pub fn is_empty(&self) -> bool {
        self.labels.is_empty()
    }

    /// Returns the label values ordered to match `schema`.
    ///
    /// Returns `None` when the set does not carry exactly the names in `schema`.
    pub fn values_for_schema(&self, schema: &[String]) -> Option<Vec<String>> {
        if self.labels.len() != schema.len() {
            return None;
        }

        schema.iter().map(|name| self.labels.get(name).cloned()).collect()
    }

    /// Creates a sanitized version of this label set.
    ///
    /// Keys and values are rewritten to be valid in the Prometheus exposition format.
    pub fn sanitized(&self) -> Self {
        Self {
            labels: self
                .labels
                .iter()
                .map(|(k, v)| (sanitize_label_key(k), sanitize_label_value(v)))
                .collect(),
        }
    }
}

impl PartialEq for LabelSet {
    fn eq(&self, other: &Self) -> bool {
        self.labels.len() == other.labels.len()
            && self.labels.iter().all(|(k, v)| other.labels.get(k) == Some(v))
    }
}

impl Eq for LabelSet {}

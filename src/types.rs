//! Core data model: documents, metadata, metrics, and configuration

use crate::error::{EmbedixError, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

/// Opaque, caller-supplied document identifier
pub type DocumentId = String;

/// An embedding vector (array of f32 values)
pub type Embedding = Vec<f32>;

/// A single scalar metadata value
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum MetadataValue {
    Str(String),
    Number(f64),
    Bool(bool),
}

/// Document metadata: an ordered mapping from key to scalar value
pub type Metadata = BTreeMap<String, MetadataValue>;

/// Validate a JSON value into the typed metadata model.
///
/// Accepts a flat JSON object of string/number/boolean values (or null for
/// "no metadata"). Nested objects, arrays, and null fields are rejected.
pub fn metadata_from_json(value: &Value) -> Result<Metadata> {
    let mut metadata = Metadata::new();

    let obj = match value {
        Value::Null => return Ok(metadata),
        Value::Object(obj) => obj,
        other => {
            return Err(EmbedixError::InvalidMetadata(format!(
                "metadata must be a JSON object, got {}",
                json_type_name(other)
            )))
        }
    };

    for (key, field) in obj {
        let scalar = match field {
            Value::String(s) => MetadataValue::Str(s.clone()),
            Value::Number(n) => {
                let n = n.as_f64().ok_or_else(|| {
                    EmbedixError::InvalidMetadata(format!("field '{}' is not a finite number", key))
                })?;
                MetadataValue::Number(n)
            }
            Value::Bool(b) => MetadataValue::Bool(*b),
            other => {
                return Err(EmbedixError::InvalidMetadata(format!(
                    "field '{}' must be a string, number, or boolean, got {}",
                    key,
                    json_type_name(other)
                )))
            }
        };
        metadata.insert(key.clone(), scalar);
    }

    Ok(metadata)
}

fn json_type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

/// A stored document: an embedding plus its metadata and insertion sequence
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DocumentRecord {
    /// Unique identifier
    pub id: DocumentId,

    /// The embedding vector
    pub vector: Embedding,

    /// Associated metadata
    #[serde(default)]
    pub metadata: Metadata,

    /// Monotonically increasing sequence assigned at insert time.
    /// Used only for deterministic tie-breaking in search results.
    pub sequence: u64,
}

/// Similarity metric for search
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum Metric {
    /// Cosine similarity, range [-1, 1]; higher is better
    #[default]
    Cosine,
    /// Euclidean (L2) distance; lower is better
    Euclidean,
    /// Dot product; higher is better
    Dot,
}

impl Metric {
    /// Returns the name of the metric
    pub fn name(&self) -> &'static str {
        match self {
            Metric::Cosine => "cosine",
            Metric::Euclidean => "euclidean",
            Metric::Dot => "dot",
        }
    }

    /// True when a larger raw score means a better match
    pub fn higher_is_better(&self) -> bool {
        !matches!(self, Metric::Euclidean)
    }
}

impl FromStr for Metric {
    type Err = EmbedixError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "cosine" => Ok(Metric::Cosine),
            "euclidean" | "l2" => Ok(Metric::Euclidean),
            "dot" | "dot_product" => Ok(Metric::Dot),
            other => Err(EmbedixError::InvalidArgument(format!(
                "unknown metric '{}' (expected cosine, euclidean, or dot)",
                other
            ))),
        }
    }
}

/// When in-memory mutations are flushed to the persistence artifact
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum DurabilityPolicy {
    /// Persist after every successful mutation
    #[default]
    EveryWrite,
    /// Persist on the first mutation at least this long after the last flush
    Periodic(Duration),
    /// Persist only on explicit flush() or shutdown
    Manual,
}

/// Indexer service configuration
#[derive(Debug, Clone)]
pub struct IndexConfig {
    /// Where the persistence artifact lives
    pub persistence_path: PathBuf,

    /// When mutations are flushed to disk
    pub durability: DurabilityPolicy,

    /// Metric used when a search request does not name one
    pub default_metric: Metric,

    /// Upper bound on requested k; larger requests are clamped
    pub max_top_k: usize,
}

impl Default for IndexConfig {
    fn default() -> Self {
        Self {
            persistence_path: PathBuf::from("embedix.idx"),
            durability: DurabilityPolicy::EveryWrite,
            default_metric: Metric::Cosine,
            max_top_k: 1024,
        }
    }
}

impl IndexConfig {
    /// Create a config persisting to the given path
    pub fn new<P: Into<PathBuf>>(path: P) -> Self {
        Self {
            persistence_path: path.into(),
            ..Default::default()
        }
    }

    /// Set the durability policy
    pub fn with_durability(mut self, durability: DurabilityPolicy) -> Self {
        self.durability = durability;
        self
    }

    /// Set the default search metric
    pub fn with_default_metric(mut self, metric: Metric) -> Self {
        self.default_metric = metric;
        self
    }

    /// Set the maximum allowed k for search requests
    pub fn with_max_top_k(mut self, max_top_k: usize) -> Self {
        self.max_top_k = max_top_k;
        self
    }
}

/// Whether an index operation created a new record or replaced an existing one
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IndexOutcome {
    Inserted,
    Updated,
}

/// Whether a delete removed a record or found nothing
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeleteOutcome {
    Deleted,
    NotFound,
}

/// A single search result
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchHit {
    /// Matched document id
    pub id: DocumentId,

    /// Raw score under the requested metric (cosine similarity, euclidean
    /// distance, or dot product)
    pub score: f32,

    /// The matched document's metadata
    pub metadata: Metadata,
}

/// Point-in-time service status
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Status {
    /// Number of records in the store
    pub size: usize,

    /// Store dimensionality, None until the first insert fixes it
    pub dimensionality: Option<usize>,

    /// When the store was last flushed to disk, None if never
    pub last_persisted_at: Option<DateTime<Utc>>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn metadata_accepts_flat_scalars() {
        let meta = metadata_from_json(&json!({
            "source": "cam-01",
            "frame": 42,
            "keyframe": true
        }))
        .unwrap();

        assert_eq!(meta.len(), 3);
        assert_eq!(meta["source"], MetadataValue::Str("cam-01".into()));
        assert_eq!(meta["frame"], MetadataValue::Number(42.0));
        assert_eq!(meta["keyframe"], MetadataValue::Bool(true));
    }

    #[test]
    fn metadata_null_means_empty() {
        let meta = metadata_from_json(&Value::Null).unwrap();
        assert!(meta.is_empty());
    }

    #[test]
    fn metadata_rejects_nesting() {
        let err = metadata_from_json(&json!({"tags": ["a", "b"]})).unwrap_err();
        assert!(matches!(err, EmbedixError::InvalidMetadata(_)));

        let err = metadata_from_json(&json!({"inner": {"x": 1}})).unwrap_err();
        assert!(matches!(err, EmbedixError::InvalidMetadata(_)));
    }

    #[test]
    fn metadata_rejects_non_object() {
        let err = metadata_from_json(&json!("just a string")).unwrap_err();
        assert!(matches!(err, EmbedixError::InvalidMetadata(_)));
    }

    #[test]
    fn metric_parsing() {
        assert_eq!("cosine".parse::<Metric>().unwrap(), Metric::Cosine);
        assert_eq!("l2".parse::<Metric>().unwrap(), Metric::Euclidean);
        assert_eq!("dot_product".parse::<Metric>().unwrap(), Metric::Dot);
        assert!("taxicab".parse::<Metric>().is_err());
    }

    #[test]
    fn metric_direction() {
        assert!(Metric::Cosine.higher_is_better());
        assert!(Metric::Dot.higher_is_better());
        assert!(!Metric::Euclidean.higher_is_better());
    }
}

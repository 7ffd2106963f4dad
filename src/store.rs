//! In-memory vector store: the single source of truth for document records
//!
//! Records are held behind `Arc` so that `snapshot()` can hand out a
//! point-in-time view with O(N) pointer clones. A record is never mutated in
//! place: an update replaces the `Arc`, so a snapshot taken before the update
//! keeps observing the old record intact.

use crate::error::{EmbedixError, Result};
use crate::types::{DocumentId, DocumentRecord, Embedding, IndexOutcome, Metadata};
use std::collections::HashMap;
use std::sync::Arc;

/// Owns the mapping from document id to record
#[derive(Debug, Default)]
pub struct VectorStore {
    /// Fixed dimensionality, adopted from the first successful insert
    dimensionality: Option<usize>,

    /// All live records
    records: HashMap<DocumentId, Arc<DocumentRecord>>,

    /// Next insertion sequence to hand out
    next_sequence: u64,
}

impl VectorStore {
    /// Create an empty store with no fixed dimensionality
    pub fn new() -> Self {
        Self::default()
    }

    /// Create an empty store with a pre-declared dimensionality
    pub fn with_dimensionality(dimensionality: usize) -> Self {
        Self {
            dimensionality: Some(dimensionality),
            ..Default::default()
        }
    }

    /// Rebuild a store from persisted state
    pub fn from_parts(
        dimensionality: Option<usize>,
        next_sequence: u64,
        records: Vec<DocumentRecord>,
    ) -> Self {
        let records = records
            .into_iter()
            .map(|r| (r.id.clone(), Arc::new(r)))
            .collect();
        Self {
            dimensionality,
            records,
            next_sequence,
        }
    }

    /// Insert or replace a record.
    ///
    /// The first successful insert fixes the store dimensionality; any later
    /// vector of a different length is rejected without mutating the store.
    /// Re-inserting an existing id replaces the prior record and assigns a
    /// fresh sequence.
    pub fn insert(
        &mut self,
        id: DocumentId,
        vector: Embedding,
        metadata: Metadata,
    ) -> Result<IndexOutcome> {
        if vector.is_empty() {
            return Err(EmbedixError::InvalidArgument(
                "vector must not be empty".to_string(),
            ));
        }

        match self.dimensionality {
            Some(expected) if expected != vector.len() => {
                return Err(EmbedixError::DimensionMismatch {
                    expected,
                    actual: vector.len(),
                });
            }
            Some(_) => {}
            None => self.dimensionality = Some(vector.len()),
        }

        let sequence = self.next_sequence;
        self.next_sequence += 1;

        let record = Arc::new(DocumentRecord {
            id: id.clone(),
            vector,
            metadata,
            sequence,
        });

        match self.records.insert(id, record) {
            Some(_) => Ok(IndexOutcome::Updated),
            None => Ok(IndexOutcome::Inserted),
        }
    }

    /// Remove a record. Returns false (not an error) when the id is absent.
    pub fn delete(&mut self, id: &str) -> bool {
        self.records.remove(id).is_some()
    }

    /// Look up a record by id
    pub fn get(&self, id: &str) -> Result<Arc<DocumentRecord>> {
        self.records
            .get(id)
            .cloned()
            .ok_or_else(|| EmbedixError::NotFound(id.to_string()))
    }

    /// Number of live records
    pub fn len(&self) -> usize {
        self.records.len()
    }

    /// True when the store holds no records
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Fixed dimensionality, None until the first insert
    pub fn dimensionality(&self) -> Option<usize> {
        self.dimensionality
    }

    /// Take an immutable point-in-time view for searching or saving.
    ///
    /// Clones one `Arc` per record; never copies vector data.
    pub fn snapshot(&self) -> Snapshot {
        Snapshot {
            dimensionality: self.dimensionality,
            next_sequence: self.next_sequence,
            records: self.records.values().cloned().collect(),
        }
    }

    /// Drop all records. Dimensionality resets so the next insert may adopt
    /// a new one. Only reached through an explicit reset.
    pub fn clear(&mut self) {
        self.records.clear();
        self.dimensionality = None;
    }
}

/// An immutable, point-in-time view of the store
#[derive(Debug, Clone)]
pub struct Snapshot {
    dimensionality: Option<usize>,
    next_sequence: u64,
    records: Vec<Arc<DocumentRecord>>,
}

impl Snapshot {
    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn dimensionality(&self) -> Option<usize> {
        self.dimensionality
    }

    /// Sequence counter at snapshot time, persisted so sequences stay
    /// monotonic across restarts
    pub fn next_sequence(&self) -> u64 {
        self.next_sequence
    }

    pub fn records(&self) -> &[Arc<DocumentRecord>] {
        &self.records
    }
}

//! The public-facing indexer service
//!
//! `IndexerService` coordinates the store, the similarity engine, and the
//! persistence layer. Mutations go through a single writer lock; searches
//! snapshot the store under a read lock and scan without holding it, so
//! concurrent searches never block each other.

use crate::error::{EmbedixError, Result};
use crate::persist::PersistenceLayer;
use crate::similarity::{self, CancelToken};
use crate::store::VectorStore;
use crate::types::{
    DeleteOutcome, DocumentRecord, DurabilityPolicy, Embedding, IndexConfig, IndexOutcome,
    Metadata, Metric, SearchHit, Status,
};
use chrono::{DateTime, Utc};
use parking_lot::{Mutex, RwLock};
use std::sync::atomic::{AtomicBool, Ordering};
use tracing::{debug, info, warn};

/// How initialization found the persisted state
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LoadReport {
    /// Artifact loaded; carries the record count
    Hydrated(usize),
    /// No artifact yet; started empty
    FreshStart,
    /// Artifact unreadable; started empty and degraded, carries the reason
    Degraded(String),
}

/// Exact similarity index with configurable durability
pub struct IndexerService {
    config: IndexConfig,
    store: RwLock<VectorStore>,
    persistence: PersistenceLayer,
    ready: AtomicBool,
    /// True when the in-memory store is newer than the artifact
    dirty: AtomicBool,
    /// Serializes snapshot-and-save pairs so a slower save can never
    /// replace the artifact with an older snapshot
    save_lock: Mutex<()>,
    last_persisted_at: Mutex<Option<DateTime<Utc>>>,
}

impl IndexerService {
    /// Create an uninitialized service. Call `initialize()` before use.
    pub fn new(config: IndexConfig) -> Self {
        let persistence = PersistenceLayer::new(config.persistence_path.clone());
        Self {
            config,
            store: RwLock::new(VectorStore::new()),
            persistence,
            ready: AtomicBool::new(false),
            dirty: AtomicBool::new(false),
            save_lock: Mutex::new(()),
            last_persisted_at: Mutex::new(None),
        }
    }

    /// Load persisted state and move to the ready state.
    ///
    /// A missing artifact starts an empty store. A corrupt or
    /// version-mismatched artifact also starts empty, but degraded: the
    /// service comes up rather than crashing, and the report says why.
    /// Calling again once ready is a no-op reporting the current size.
    pub fn initialize(&self) -> Result<LoadReport> {
        // The write lock spans the ready check and the install, so a
        // concurrent initialize cannot replace a store that is already
        // live and taking mutations.
        let mut store = self.store.write();
        if self.ready.load(Ordering::SeqCst) {
            return Ok(LoadReport::Hydrated(store.len()));
        }

        let report = match self.persistence.load() {
            Ok(loaded) => {
                let count = loaded.len();
                info!(
                    path = %self.persistence.path().display(),
                    records = count,
                    "hydrated store from artifact"
                );
                *store = loaded;
                LoadReport::Hydrated(count)
            }
            Err(EmbedixError::ArtifactNotFound(_)) => {
                info!(
                    path = %self.persistence.path().display(),
                    "no artifact found, starting empty"
                );
                LoadReport::FreshStart
            }
            Err(e @ EmbedixError::CorruptData(_))
            | Err(e @ EmbedixError::UnsupportedVersion { .. }) => {
                warn!(
                    path = %self.persistence.path().display(),
                    error = %e,
                    "artifact unreadable, starting empty (degraded)"
                );
                LoadReport::Degraded(e.to_string())
            }
            Err(e) => return Err(e),
        };

        self.ready.store(true, Ordering::SeqCst);
        Ok(report)
    }

    fn ensure_ready(&self) -> Result<()> {
        if self.ready.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(EmbedixError::NotReady)
        }
    }

    /// Insert or update a document, then persist per the durability policy.
    ///
    /// A persistence failure is surfaced but the in-memory mutation stands;
    /// memory is the source of truth between flushes.
    pub fn index(
        &self,
        id: impl Into<String>,
        vector: Embedding,
        metadata: Metadata,
    ) -> Result<IndexOutcome> {
        self.ensure_ready()?;

        let outcome = self.store.write().insert(id.into(), vector, metadata)?;
        self.dirty.store(true, Ordering::SeqCst);
        self.persist_per_policy()?;
        Ok(outcome)
    }

    /// Identical to `index`; kept for API clarity when the caller knows the
    /// id already exists.
    pub fn update(
        &self,
        id: impl Into<String>,
        vector: Embedding,
        metadata: Metadata,
    ) -> Result<IndexOutcome> {
        self.index(id, vector, metadata)
    }

    /// Remove a document. Absent ids report `NotFound` without erroring.
    pub fn delete(&self, id: &str) -> Result<DeleteOutcome> {
        self.ensure_ready()?;

        let removed = self.store.write().delete(id);
        if !removed {
            return Ok(DeleteOutcome::NotFound);
        }

        self.dirty.store(true, Ordering::SeqCst);
        self.persist_per_policy()?;
        Ok(DeleteOutcome::Deleted)
    }

    /// Fetch a document by id
    pub fn get(&self, id: &str) -> Result<DocumentRecord> {
        self.ensure_ready()?;
        let record = self.store.read().get(id)?;
        Ok((*record).clone())
    }

    /// Rank the k closest documents to the query, best match first.
    /// `metric: None` uses the configured default.
    pub fn search(
        &self,
        query: &[f32],
        k: usize,
        metric: Option<Metric>,
    ) -> Result<Vec<SearchHit>> {
        self.search_with_cancel(query, k, metric, None)
    }

    /// `search` with a cooperative cancellation token checked during the scan
    pub fn search_with_cancel(
        &self,
        query: &[f32],
        k: usize,
        metric: Option<Metric>,
        cancel: Option<&CancelToken>,
    ) -> Result<Vec<SearchHit>> {
        self.ensure_ready()?;

        let metric = metric.unwrap_or(self.config.default_metric);
        let k = if k > self.config.max_top_k {
            debug!(
                requested = k,
                max = self.config.max_top_k,
                "clamping oversized k"
            );
            self.config.max_top_k
        } else {
            k
        };

        // Snapshot under the read lock, scan without it
        let snapshot = self.store.read().snapshot();
        similarity::top_k(&snapshot, query, k, metric, cancel)
    }

    /// Current size, dimensionality, and last persist time
    pub fn status(&self) -> Result<Status> {
        self.ensure_ready()?;

        let store = self.store.read();
        Ok(Status {
            size: store.len(),
            dimensionality: store.dimensionality(),
            last_persisted_at: *self.last_persisted_at.lock(),
        })
    }

    /// Persist the current store state regardless of the durability policy
    pub fn flush(&self) -> Result<()> {
        self.ensure_ready()?;
        self.save_now()
    }

    /// Clear all records and persist the empty state.
    ///
    /// The persist is unconditional so a restart cannot resurrect the
    /// cleared records.
    pub fn reset(&self) -> Result<()> {
        self.ensure_ready()?;
        self.store.write().clear();
        self.dirty.store(true, Ordering::SeqCst);
        self.save_now()
    }

    /// Flush any state newer than the artifact before the service goes
    /// away. A no-op when nothing changed since the last persist, or when
    /// the service never initialized. Also runs on drop.
    pub fn shutdown(&self) -> Result<()> {
        if !self.ready.load(Ordering::SeqCst) {
            return Ok(());
        }
        if self.dirty.load(Ordering::SeqCst) {
            self.save_now()
        } else {
            Ok(())
        }
    }

    fn persist_per_policy(&self) -> Result<()> {
        match self.config.durability {
            DurabilityPolicy::EveryWrite => self.save_now(),
            DurabilityPolicy::Periodic(interval) => {
                let due = match *self.last_persisted_at.lock() {
                    None => true,
                    Some(last) => Utc::now()
                        .signed_duration_since(last)
                        .to_std()
                        .map(|elapsed| elapsed >= interval)
                        .unwrap_or(true),
                };
                if due {
                    self.save_now()
                } else {
                    Ok(())
                }
            }
            DurabilityPolicy::Manual => Ok(()),
        }
    }

    fn save_now(&self) -> Result<()> {
        let _guard = self.save_lock.lock();

        // Cleared before the snapshot: a mutation landing after it re-marks
        // the store dirty and is picked up by the next flush
        self.dirty.store(false, Ordering::SeqCst);
        let snapshot = self.store.read().snapshot();

        match self.persistence.save(&snapshot) {
            Ok(()) => {
                *self.last_persisted_at.lock() = Some(Utc::now());
                Ok(())
            }
            Err(e) => {
                self.dirty.store(true, Ordering::SeqCst);
                Err(e)
            }
        }
    }
}

impl Drop for IndexerService {
    fn drop(&mut self) {
        if let Err(e) = self.shutdown() {
            warn!(
                path = %self.persistence.path().display(),
                error = %e,
                "flush on shutdown failed"
            );
        }
    }
}

//! Exact top-k similarity search over store snapshots
//!
//! A linear scan scores every record against the query and keeps the k best
//! in a bounded binary heap, O(N log k) instead of sort-everything's
//! O(N log N). This is the one performance-critical path in the crate.

use crate::error::{EmbedixError, Result};
use crate::store::Snapshot;
use crate::types::{Metric, SearchHit};
use std::cmp::Ordering;
use std::collections::BinaryHeap;
use std::sync::atomic::{AtomicBool, Ordering as AtomicOrdering};
use std::sync::Arc;

/// How many records a scan processes between cancellation checks
const CANCEL_CHECK_INTERVAL: usize = 1024;

/// Cooperative cancellation signal for long-running searches.
///
/// Cloning shares the underlying flag; a search holding a clone observes
/// `cancel()` from any other holder. Search is read-only, so cancellation
/// never leaves partial state behind.
#[derive(Debug, Clone, Default)]
pub struct CancelToken {
    cancelled: Arc<AtomicBool>,
}

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.cancelled.store(true, AtomicOrdering::Relaxed);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(AtomicOrdering::Relaxed)
    }
}

/// Dot product of two equal-length vectors
#[inline]
pub fn dot_product(a: &[f32], b: &[f32]) -> f32 {
    debug_assert_eq!(a.len(), b.len(), "vector dimensions must match");
    a.iter().zip(b.iter()).map(|(x, y)| x * y).sum()
}

/// L2 norm (magnitude) of a vector
#[inline]
pub fn norm(v: &[f32]) -> f32 {
    v.iter().map(|x| x * x).sum::<f32>().sqrt()
}

/// Euclidean (L2) distance
#[inline]
pub fn euclidean_distance(a: &[f32], b: &[f32]) -> f32 {
    debug_assert_eq!(a.len(), b.len(), "vector dimensions must match");
    a.iter()
        .zip(b.iter())
        .map(|(x, y)| {
            let diff = x - y;
            diff * diff
        })
        .sum::<f32>()
        .sqrt()
}

/// Cosine similarity, range [-1, 1].
///
/// Cosine of a zero vector is undefined; it scores negative infinity so it
/// ranks last instead of raising an error, keeping search total.
#[inline]
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    let norm_a = norm(a);
    let norm_b = norm(b);
    if norm_a == 0.0 || norm_b == 0.0 {
        return f32::NEG_INFINITY;
    }
    let similarity = dot_product(a, b) / (norm_a * norm_b);
    // Clamp to handle floating point errors
    similarity.clamp(-1.0, 1.0)
}

/// Raw score of a record against a query under the given metric
#[inline]
pub fn score(query: &[f32], vector: &[f32], metric: Metric) -> f32 {
    match metric {
        Metric::Cosine => cosine_similarity(query, vector),
        Metric::Euclidean => euclidean_distance(query, vector),
        Metric::Dot => dot_product(query, vector),
    }
}

/// Normalize a raw score into a key where lower always ranks first
#[inline]
fn rank_key(raw: f32, metric: Metric) -> f32 {
    if metric.higher_is_better() {
        -raw
    } else {
        raw
    }
}

/// A scored record during the scan. Ordered by (rank key, sequence)
/// ascending, so the heap's maximum is the current worst candidate and
/// equal scores resolve to the earlier-inserted record.
struct Candidate {
    rank: f32,
    sequence: u64,
    index: usize,
    raw: f32,
}

impl PartialEq for Candidate {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for Candidate {}

impl PartialOrd for Candidate {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Candidate {
    fn cmp(&self, other: &Self) -> Ordering {
        self.rank
            .total_cmp(&other.rank)
            .then_with(|| self.sequence.cmp(&other.sequence))
    }
}

/// Rank the k closest records to `query` in `snapshot`, best match first.
///
/// Returns at most k hits, and never more than the snapshot holds. An empty
/// snapshot or k == 0 yields an empty result, not an error. Equal scores
/// are broken by ascending insertion sequence for reproducible output.
pub fn top_k(
    snapshot: &Snapshot,
    query: &[f32],
    k: usize,
    metric: Metric,
    cancel: Option<&CancelToken>,
) -> Result<Vec<SearchHit>> {
    if let Some(expected) = snapshot.dimensionality() {
        if query.len() != expected {
            return Err(EmbedixError::DimensionMismatch {
                expected,
                actual: query.len(),
            });
        }
    }

    if snapshot.is_empty() || k == 0 {
        return Ok(Vec::new());
    }

    let records = snapshot.records();
    let mut heap: BinaryHeap<Candidate> = BinaryHeap::with_capacity(k.min(records.len()) + 1);

    for (index, record) in records.iter().enumerate() {
        if index % CANCEL_CHECK_INTERVAL == 0 {
            if let Some(token) = cancel {
                if token.is_cancelled() {
                    return Err(EmbedixError::Cancelled);
                }
            }
        }

        let raw = score(query, &record.vector, metric);
        let candidate = Candidate {
            rank: rank_key(raw, metric),
            sequence: record.sequence,
            index,
            raw,
        };

        if heap.len() < k {
            heap.push(candidate);
        } else if let Some(worst) = heap.peek() {
            if candidate.cmp(worst) == Ordering::Less {
                heap.pop();
                heap.push(candidate);
            }
        }
    }

    // Ascending order of the rank key: best match first
    let hits = heap
        .into_sorted_vec()
        .into_iter()
        .map(|c| {
            let record = &records[c.index];
            SearchHit {
                id: record.id.clone(),
                score: c.raw,
                metadata: record.metadata.clone(),
            }
        })
        .collect();

    Ok(hits)
}

//! # embedix
//!
//! An exact, single-node embedding index: store (id, vector, metadata)
//! documents, search them by similarity, and persist the whole store to a
//! single checksummed artifact.
//!
//! Search is an exact linear scan with bounded top-k selection; there is no
//! approximate-neighbor structure, no sharding, and no cross-process
//! coordination. Encoders producing the vectors and the runtime hosting the
//! service are external collaborators.
//!
//! # Example
//!
//! ```ignore
//! use embedix::{IndexConfig, IndexerService, Metadata, Metric};
//!
//! let service = IndexerService::new(IndexConfig::new("media.idx"));
//! service.initialize()?;
//!
//! service.index("frame-001", vec![0.1, 0.9, 0.0], Metadata::new())?;
//!
//! let hits = service.search(&[0.1, 0.8, 0.1], 10, Some(Metric::Cosine))?;
//! for hit in hits {
//!     println!("{}: {}", hit.id, hit.score);
//! }
//! ```

pub mod error;
pub mod persist;
pub mod service;
pub mod similarity;
pub mod store;
pub mod types;

pub use error::{EmbedixError, Result};
pub use persist::PersistenceLayer;
pub use service::{IndexerService, LoadReport};
pub use similarity::CancelToken;
pub use store::{Snapshot, VectorStore};
pub use types::{
    DeleteOutcome, DocumentId, DocumentRecord, DurabilityPolicy, Embedding, IndexConfig,
    IndexOutcome, Metadata, MetadataValue, Metric, SearchHit, Status,
};

//! Durable persistence for the vector store
//!
//! The entire store is serialized to a single artifact:
//!
//! ```text
//! magic   b"EIDX"        4 bytes
//! version u32 le         format version, currently 1
//! crc32   u32 le         checksum of the body
//! body    bincode        PersistedStore
//! ```
//!
//! Saves write to a temporary sibling and rename it over the artifact, so a
//! crash mid-save leaves the previous artifact intact.

use crate::error::{EmbedixError, Result};
use crate::store::{Snapshot, VectorStore};
use crate::types::DocumentRecord;
use serde::{Deserialize, Serialize};
use std::fs::{self, File, OpenOptions};
use std::io::{ErrorKind, Read, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tracing::{debug, warn};

/// Magic bytes identifying an embedix artifact
const MAGIC_BYTES: &[u8; 4] = b"EIDX";
const VERSION: u32 = 1;
const HEADER_SIZE: usize = 12;

/// Attempts per save before surfacing the I/O error
const SAVE_ATTEMPTS: u32 = 3;
const RETRY_BACKOFF: Duration = Duration::from_millis(20);

/// Distinguishes the temp files of saves running at the same time
static TEMP_COUNTER: AtomicU64 = AtomicU64::new(0);

/// Serialized store body
#[derive(Serialize, Deserialize)]
struct PersistedStore {
    /// Store dimensionality, 0 when not yet fixed
    dimensionality: u64,
    /// Sequence counter, so sequences stay monotonic across restarts
    next_sequence: u64,
    records: Vec<PersistedRecord>,
}

/// On-disk record layout. Metadata travels as a JSON string because its
/// value type is an untagged union, which bincode cannot decode directly.
#[derive(Serialize, Deserialize)]
struct PersistedRecord {
    id: String,
    vector: Vec<f32>,
    metadata_json: String,
    sequence: u64,
}

/// Reads and writes the store artifact at a fixed path
pub struct PersistenceLayer {
    path: PathBuf,
}

impl PersistenceLayer {
    pub fn new<P: Into<PathBuf>>(path: P) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// True when an artifact exists on disk
    pub fn exists(&self) -> bool {
        self.path.exists()
    }

    /// Serialize a snapshot to the artifact, atomically replacing any
    /// previous one. Transient I/O failures are retried a bounded number
    /// of times.
    pub fn save(&self, snapshot: &Snapshot) -> Result<()> {
        let body = encode_body(snapshot)?;
        let checksum = crc32fast::hash(&body);

        let mut attempt = 0;
        loop {
            attempt += 1;
            match self.write_artifact(&body, checksum) {
                Ok(()) => {
                    debug!(
                        path = %self.path.display(),
                        records = snapshot.len(),
                        bytes = body.len() + HEADER_SIZE,
                        "persisted store"
                    );
                    return Ok(());
                }
                Err(e) if attempt < SAVE_ATTEMPTS => {
                    warn!(
                        path = %self.path.display(),
                        attempt,
                        error = %e,
                        "save attempt failed, retrying"
                    );
                    std::thread::sleep(RETRY_BACKOFF);
                }
                Err(e) => return Err(e.into()),
            }
        }
    }

    fn write_artifact(&self, body: &[u8], checksum: u32) -> std::io::Result<()> {
        let tmp_path = self.temp_path();

        let result = self
            .write_temp(&tmp_path, body, checksum)
            .and_then(|()| fs::rename(&tmp_path, &self.path));
        if result.is_err() {
            let _ = fs::remove_file(&tmp_path);
        }
        result
    }

    fn write_temp(&self, tmp_path: &Path, body: &[u8], checksum: u32) -> std::io::Result<()> {
        let mut file = OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(true)
            .open(tmp_path)?;
        file.write_all(MAGIC_BYTES)?;
        file.write_all(&VERSION.to_le_bytes())?;
        file.write_all(&checksum.to_le_bytes())?;
        file.write_all(body)?;
        file.sync_all()
    }

    /// Temp names carry the process id and a counter so saves running at
    /// the same time never truncate or rename each other's file.
    fn temp_path(&self) -> PathBuf {
        let n = TEMP_COUNTER.fetch_add(1, Ordering::Relaxed);
        let mut name = self.path.file_name().unwrap_or_default().to_os_string();
        name.push(format!(".{}.{}.tmp", std::process::id(), n));
        self.path.with_file_name(name)
    }

    /// Deserialize the artifact into a store.
    ///
    /// A missing artifact is `ArtifactNotFound` (callers treat this as
    /// "start empty"). A short, mangled, or checksum-failing artifact is
    /// `CorruptData`; a newer format version is `UnsupportedVersion`.
    pub fn load(&self) -> Result<VectorStore> {
        let mut file = match File::open(&self.path) {
            Ok(f) => f,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                return Err(EmbedixError::ArtifactNotFound(
                    self.path.display().to_string(),
                ))
            }
            Err(e) => return Err(e.into()),
        };

        let mut data = Vec::new();
        file.read_to_end(&mut data)?;

        if data.len() < HEADER_SIZE {
            return Err(EmbedixError::CorruptData(format!(
                "artifact truncated: {} bytes, header needs {}",
                data.len(),
                HEADER_SIZE
            )));
        }

        if &data[0..4] != MAGIC_BYTES {
            return Err(EmbedixError::CorruptData("invalid magic bytes".to_string()));
        }

        let version = u32::from_le_bytes([data[4], data[5], data[6], data[7]]);
        if version != VERSION {
            return Err(EmbedixError::UnsupportedVersion {
                expected: VERSION,
                actual: version,
            });
        }

        let checksum = u32::from_le_bytes([data[8], data[9], data[10], data[11]]);
        let body = &data[HEADER_SIZE..];
        if crc32fast::hash(body) != checksum {
            return Err(EmbedixError::CorruptData(
                "checksum mismatch: artifact may be corrupted".to_string(),
            ));
        }

        let persisted: PersistedStore = bincode::deserialize(body)
            .map_err(|e| EmbedixError::CorruptData(format!("undecodable body: {}", e)))?;

        decode_store(persisted)
    }
}

fn encode_body(snapshot: &Snapshot) -> Result<Vec<u8>> {
    let mut records = snapshot
        .records()
        .iter()
        .map(|r| {
            Ok(PersistedRecord {
                id: r.id.clone(),
                vector: r.vector.clone(),
                metadata_json: serde_json::to_string(&r.metadata)?,
                sequence: r.sequence,
            })
        })
        .collect::<Result<Vec<_>>>()?;
    // Deterministic artifact bytes for a given store state
    records.sort_by_key(|r| r.sequence);

    let persisted = PersistedStore {
        dimensionality: snapshot.dimensionality().unwrap_or(0) as u64,
        next_sequence: snapshot.next_sequence(),
        records,
    };

    Ok(bincode::serialize(&persisted)?)
}

fn decode_store(persisted: PersistedStore) -> Result<VectorStore> {
    let dimensionality = match persisted.dimensionality {
        0 if !persisted.records.is_empty() => {
            return Err(EmbedixError::CorruptData(
                "artifact has records but no dimensionality".to_string(),
            ))
        }
        0 => None,
        d => Some(d as usize),
    };

    let mut records = Vec::with_capacity(persisted.records.len());
    for record in persisted.records {
        if let Some(expected) = dimensionality {
            if record.vector.len() != expected {
                return Err(EmbedixError::CorruptData(format!(
                    "record '{}' has {} dimensions, artifact declares {}",
                    record.id,
                    record.vector.len(),
                    expected
                )));
            }
        }

        let metadata = serde_json::from_str(&record.metadata_json).map_err(|e| {
            EmbedixError::CorruptData(format!("record '{}' has unreadable metadata: {}", record.id, e))
        })?;
        records.push(DocumentRecord {
            id: record.id,
            vector: record.vector,
            metadata,
            sequence: record.sequence,
        });
    }

    Ok(VectorStore::from_parts(
        dimensionality,
        persisted.next_sequence,
        records,
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{Metadata, MetadataValue};
    use tempfile::tempdir;

    fn sample_store() -> VectorStore {
        let mut store = VectorStore::new();
        let mut meta = Metadata::new();
        meta.insert("source".into(), MetadataValue::Str("cam-01".into()));
        meta.insert("frame".into(), MetadataValue::Number(42.0));
        store.insert("a".into(), vec![1.0, 0.0, 0.0], meta).unwrap();
        store
            .insert("b".into(), vec![0.0, 1.0, 0.0], Metadata::new())
            .unwrap();
        store
    }

    #[test]
    fn save_and_load_round_trip() {
        let dir = tempdir().unwrap();
        let layer = PersistenceLayer::new(dir.path().join("test.idx"));

        let store = sample_store();
        layer.save(&store.snapshot()).unwrap();

        let loaded = layer.load().unwrap();
        assert_eq!(loaded.len(), 2);
        assert_eq!(loaded.dimensionality(), Some(3));

        let a = loaded.get("a").unwrap();
        assert_eq!(a.vector, vec![1.0, 0.0, 0.0]);
        assert_eq!(a.metadata["source"], MetadataValue::Str("cam-01".into()));
        assert_eq!(a.metadata["frame"], MetadataValue::Number(42.0));
    }

    #[test]
    fn load_missing_artifact_is_not_found() {
        let dir = tempdir().unwrap();
        let layer = PersistenceLayer::new(dir.path().join("absent.idx"));
        assert!(matches!(
            layer.load(),
            Err(EmbedixError::ArtifactNotFound(_))
        ));
    }

    #[test]
    fn truncated_artifact_is_corrupt() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("short.idx");
        fs::write(&path, b"EIDX\x01").unwrap();

        let layer = PersistenceLayer::new(&path);
        assert!(matches!(layer.load(), Err(EmbedixError::CorruptData(_))));
    }

    #[test]
    fn bad_magic_is_corrupt() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("bad.idx");
        fs::write(&path, b"NOPE\x01\x00\x00\x00\x00\x00\x00\x00").unwrap();

        let layer = PersistenceLayer::new(&path);
        assert!(matches!(layer.load(), Err(EmbedixError::CorruptData(_))));
    }

    #[test]
    fn flipped_byte_fails_checksum() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("bitrot.idx");
        let layer = PersistenceLayer::new(&path);
        layer.save(&sample_store().snapshot()).unwrap();

        let mut bytes = fs::read(&path).unwrap();
        let last = bytes.len() - 1;
        bytes[last] ^= 0xFF;
        fs::write(&path, &bytes).unwrap();

        assert!(matches!(layer.load(), Err(EmbedixError::CorruptData(_))));
    }

    #[test]
    fn future_version_is_unsupported() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("future.idx");
        let layer = PersistenceLayer::new(&path);
        layer.save(&sample_store().snapshot()).unwrap();

        let mut bytes = fs::read(&path).unwrap();
        bytes[4..8].copy_from_slice(&99u32.to_le_bytes());
        fs::write(&path, &bytes).unwrap();

        assert!(matches!(
            layer.load(),
            Err(EmbedixError::UnsupportedVersion { expected: 1, actual: 99 })
        ));
    }

    #[test]
    fn save_replaces_previous_artifact() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("test.idx");
        let layer = PersistenceLayer::new(&path);

        let mut store = sample_store();
        layer.save(&store.snapshot()).unwrap();

        store.delete("b");
        store
            .insert("c".into(), vec![0.0, 0.0, 1.0], Metadata::new())
            .unwrap();
        layer.save(&store.snapshot()).unwrap();

        // No leftover temp files
        let leftovers = fs::read_dir(dir.path())
            .unwrap()
            .filter(|e| {
                e.as_ref().unwrap().path().extension().map(|x| x == "tmp") == Some(true)
            })
            .count();
        assert_eq!(leftovers, 0);

        let loaded = layer.load().unwrap();
        assert_eq!(loaded.len(), 2);
        assert!(loaded.get("b").is_err());
        assert!(loaded.get("c").is_ok());
    }

    #[test]
    fn concurrent_saves_do_not_collide() {
        use std::sync::Arc;

        let dir = tempdir().unwrap();
        let layer = Arc::new(PersistenceLayer::new(dir.path().join("race.idx")));
        let snapshot = sample_store().snapshot();

        let mut handles = Vec::new();
        for _ in 0..8 {
            let layer = Arc::clone(&layer);
            let snapshot = snapshot.clone();
            handles.push(std::thread::spawn(move || {
                for _ in 0..20 {
                    layer.save(&snapshot).unwrap();
                }
            }));
        }
        for handle in handles {
            handle.join().unwrap();
        }

        // Artifact is intact and no temp files linger
        let loaded = layer.load().unwrap();
        assert_eq!(loaded.len(), 2);
        let leftovers = fs::read_dir(dir.path())
            .unwrap()
            .filter(|e| {
                e.as_ref().unwrap().path().extension().map(|x| x == "tmp") == Some(true)
            })
            .count();
        assert_eq!(leftovers, 0);
    }

    #[test]
    fn empty_store_round_trips() {
        let dir = tempdir().unwrap();
        let layer = PersistenceLayer::new(dir.path().join("empty.idx"));
        layer.save(&VectorStore::new().snapshot()).unwrap();

        let loaded = layer.load().unwrap();
        assert!(loaded.is_empty());
        assert_eq!(loaded.dimensionality(), None);
    }

    #[test]
    fn sequences_survive_restart() {
        let dir = tempdir().unwrap();
        let layer = PersistenceLayer::new(dir.path().join("seq.idx"));

        let store = sample_store();
        let max_seq = store
            .snapshot()
            .records()
            .iter()
            .map(|r| r.sequence)
            .max()
            .unwrap();
        layer.save(&store.snapshot()).unwrap();

        let mut loaded = layer.load().unwrap();
        loaded
            .insert("later".into(), vec![0.5, 0.5, 0.5], Metadata::new())
            .unwrap();
        assert!(loaded.get("later").unwrap().sequence > max_seq);
    }

    mod properties {
        use super::*;
        use proptest::prelude::*;

        fn arb_metadata() -> impl Strategy<Value = Metadata> {
            proptest::collection::btree_map(
                "[a-z]{1,8}",
                prop_oneof![
                    "[ -~]{0,16}".prop_map(MetadataValue::Str),
                    (-1e6f64..1e6f64).prop_map(MetadataValue::Number),
                    any::<bool>().prop_map(MetadataValue::Bool),
                ],
                0..4,
            )
        }

        proptest! {
            #[test]
            fn round_trip_preserves_records(
                entries in proptest::collection::hash_map(
                    "[a-z0-9]{1,12}",
                    (proptest::collection::vec(-100.0f32..100.0, 8), arb_metadata()),
                    1..20,
                )
            ) {
                let dir = tempdir().unwrap();
                let layer = PersistenceLayer::new(dir.path().join("prop.idx"));

                let mut store = VectorStore::new();
                for (id, (vector, metadata)) in &entries {
                    store.insert(id.clone(), vector.clone(), metadata.clone()).unwrap();
                }

                layer.save(&store.snapshot()).unwrap();
                let loaded = layer.load().unwrap();

                prop_assert_eq!(loaded.len(), entries.len());
                for (id, (vector, metadata)) in &entries {
                    let record = loaded.get(id).unwrap();
                    prop_assert_eq!(&record.vector, vector);
                    prop_assert_eq!(&record.metadata, metadata);
                }
            }
        }
    }
}

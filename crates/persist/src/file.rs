//! File-backed remote store.
//!
//! Layout inside the store directory:
//! ```text
//! tower.meta.json              - schema versions and segment count
//! segments/
//!   000001.cube.cbor.zst       - one appended document per segment
//! integrity/
//!   manifest.json              - hash chain over every segment
//! ```

use std::io::{Read, Write};
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tower_common::{RemoteId, Timestamp};
use tower_kernel::{NewCube, RemoteAck, RemoteCube};

use crate::feed::{
    FeedMessage, RemoteError, RemoteStore, SnapshotMeta, Subscribers, Subscription, SubscriptionId,
};

const STORE_SCHEMA_VERSION: u32 = 1;
const DOCUMENT_SCHEMA_VERSION: u32 = 1;

/// Hex digits of the content hash used as a remote id.
const REMOTE_ID_LEN: usize = 16;

/// Contents of `tower.meta.json`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoreMeta {
    pub store_schema_version: u32,
    pub document_schema_version: u32,
    pub segment_count: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ManifestEntry {
    pub filename: String,
    pub remote_id: RemoteId,
    pub sha256: String,
    pub prev_hash: Option<String>,
}

/// On-disk payload of one segment.
#[derive(Debug, Serialize, Deserialize)]
struct Segment {
    remote_id: RemoteId,
    created_at: Timestamp,
    cube: NewCube,
}

/// Hash chain over all segments, in append order.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct IntegrityManifest {
    pub entries: Vec<ManifestEntry>,
}

/// Append-only cube log on disk.
///
/// Every segment is checked against the manifest when the store is opened;
/// a store that fails the check, or carries an unknown schema version, does
/// not open.
#[derive(Debug)]
pub struct FileRemote {
    root: PathBuf,
    meta: StoreMeta,
    manifest: IntegrityManifest,
    docs: Vec<RemoteCube>,
    subscribers: Subscribers,
    sequence: u64,
}

impl FileRemote {
    /// Open or create a store at `path`.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, RemoteError> {
        let root = path.as_ref().to_path_buf();
        std::fs::create_dir_all(root.join("segments"))?;
        std::fs::create_dir_all(root.join("integrity"))?;

        let meta_path = root.join("tower.meta.json");
        let manifest_path = root.join("integrity").join("manifest.json");

        let (meta, manifest) = if meta_path.exists() {
            let meta: StoreMeta = serde_json::from_reader(std::fs::File::open(&meta_path)?)?;
            check_version(meta.store_schema_version, STORE_SCHEMA_VERSION)?;
            check_version(meta.document_schema_version, DOCUMENT_SCHEMA_VERSION)?;
            let manifest = if manifest_path.exists() {
                serde_json::from_reader(std::fs::File::open(&manifest_path)?)?
            } else {
                IntegrityManifest::default()
            };
            (meta, manifest)
        } else {
            let meta = StoreMeta {
                store_schema_version: STORE_SCHEMA_VERSION,
                document_schema_version: DOCUMENT_SCHEMA_VERSION,
                segment_count: 0,
            };
            let manifest = IntegrityManifest::default();
            write_json_atomic(&manifest_path, &manifest)?;
            write_json_atomic(&meta_path, &meta)?;
            (meta, manifest)
        };

        let mut store = Self {
            root,
            meta,
            manifest,
            docs: Vec::new(),
            subscribers: Subscribers::default(),
            sequence: 0,
        };
        store.verify_integrity()?;
        store.docs = store.load_segments()?;
        tracing::info!(
            root = %store.root.display(),
            segments = store.meta.segment_count,
            "remote store opened"
        );
        Ok(store)
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn meta(&self) -> &StoreMeta {
        &self.meta
    }

    pub fn manifest(&self) -> &IntegrityManifest {
        &self.manifest
    }

    /// Every stored document, oldest first.
    pub fn docs(&self) -> &[RemoteCube] {
        &self.docs
    }

    pub fn len(&self) -> usize {
        self.docs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.docs.is_empty()
    }

    /// Check the hash chain and every segment's hash.
    pub fn verify_integrity(&self) -> Result<(), RemoteError> {
        if self.manifest.entries.len() != self.meta.segment_count as usize {
            return Err(RemoteError::IntegrityMismatch {
                expected: format!("{} segments", self.meta.segment_count),
                actual: format!("{} manifest entries", self.manifest.entries.len()),
            });
        }
        let mut prev_hash: Option<String> = None;
        for entry in &self.manifest.entries {
            if entry.prev_hash != prev_hash {
                return Err(RemoteError::IntegrityMismatch {
                    expected: prev_hash.unwrap_or_else(|| "None".into()),
                    actual: entry.prev_hash.clone().unwrap_or_else(|| "None".into()),
                });
            }
            let data = std::fs::read(self.segment_path(&entry.filename))?;
            let actual = sha256_hex(&data);
            if actual != entry.sha256 {
                return Err(RemoteError::IntegrityMismatch {
                    expected: entry.sha256.clone(),
                    actual,
                });
            }
            prev_hash = Some(entry.sha256.clone());
        }
        Ok(())
    }

    fn segment_path(&self, filename: &str) -> PathBuf {
        self.root.join("segments").join(filename)
    }

    fn load_segments(&self) -> Result<Vec<RemoteCube>, RemoteError> {
        self.manifest
            .entries
            .iter()
            .map(|entry| {
                let compressed = std::fs::read(self.segment_path(&entry.filename))?;
                let segment: Segment = cbor_deserialize(&zstd_decompress(&compressed)?)?;
                if segment.remote_id != entry.remote_id {
                    return Err(RemoteError::IntegrityMismatch {
                        expected: entry.remote_id.to_string(),
                        actual: segment.remote_id.to_string(),
                    });
                }
                Ok(RemoteCube {
                    remote_id: segment.remote_id,
                    created_at: segment.created_at,
                    cube: segment.cube,
                })
            })
            .collect()
    }

    fn snapshot(&self, initial: bool) -> FeedMessage {
        FeedMessage::Snapshot(
            self.docs.clone(),
            SnapshotMeta {
                sequence: self.sequence,
                initial,
            },
        )
    }

    fn meta_path(&self) -> PathBuf {
        self.root.join("tower.meta.json")
    }

    fn manifest_path(&self) -> PathBuf {
        self.root.join("integrity").join("manifest.json")
    }

    /// Persist a new manifest and meta pair. The manifest goes first, so a
    /// failure leaves the previous pair in place on disk.
    fn commit(&self, meta: &StoreMeta, manifest: &IntegrityManifest) -> Result<(), RemoteError> {
        write_json_atomic(&self.manifest_path(), manifest)?;
        if let Err(err) = write_json_atomic(&self.meta_path(), meta) {
            if let Err(restore) = write_json_atomic(&self.manifest_path(), &self.manifest) {
                tracing::warn!(%restore, "could not restore manifest");
            }
            return Err(err);
        }
        Ok(())
    }
}

impl RemoteStore for FileRemote {
    fn subscribe(&mut self) -> Subscription {
        let initial = self.snapshot(true);
        self.subscribers.add(initial)
    }

    fn unsubscribe(&mut self, id: SubscriptionId) {
        self.subscribers.remove(id);
    }

    fn append(&mut self, cube: NewCube) -> Result<RemoteAck, RemoteError> {
        let prev_hash = self.manifest.entries.last().map(|e| e.sha256.clone());

        // Id is a content hash chained to the previous segment, so identical
        // documents appended twice still get distinct ids.
        let mut hasher = Sha256::new();
        hasher.update(prev_hash.as_deref().unwrap_or_default().as_bytes());
        hasher.update(cbor_serialize(&cube)?);
        let digest = format!("{:x}", hasher.finalize());
        let remote_id = RemoteId(digest[..REMOTE_ID_LEN].to_string());

        let segment = Segment {
            remote_id: remote_id.clone(),
            created_at: Timestamp::now(),
            cube,
        };
        let index = self.meta.segment_count + 1;
        let filename = format!("{index:06}.cube.cbor.zst");
        let compressed = zstd_compress(&cbor_serialize(&segment)?)?;
        let sha256 = sha256_hex(&compressed);
        let segment_path = self.segment_path(&filename);
        std::fs::write(&segment_path, &compressed)?;

        let meta = StoreMeta {
            segment_count: index,
            ..self.meta.clone()
        };
        let mut manifest = self.manifest.clone();
        manifest.entries.push(ManifestEntry {
            filename,
            remote_id: remote_id.clone(),
            sha256,
            prev_hash,
        });
        if let Err(err) = self.commit(&meta, &manifest) {
            tracing::warn!(%err, segment = index, "append failed, discarding segment");
            if let Err(remove) = std::fs::remove_file(&segment_path) {
                tracing::warn!(%remove, "could not remove orphan segment");
            }
            return Err(err);
        }
        self.meta = meta;
        self.manifest = manifest;

        let ack = RemoteAck {
            remote_id,
            created_at: segment.created_at,
        };
        tracing::debug!(remote_id = %ack.remote_id, segment = index, "appended");
        self.docs.push(RemoteCube {
            remote_id: segment.remote_id,
            created_at: segment.created_at,
            cube: segment.cube,
        });
        self.sequence += 1;
        let message = self.snapshot(false);
        self.subscribers.broadcast(&message);
        Ok(ack)
    }
}

/// Write `value` next to `path` and rename it into place.
fn write_json_atomic<T: Serialize>(path: &Path, value: &T) -> Result<(), RemoteError> {
    let temp = path.with_extension("json.tmp");
    serde_json::to_writer_pretty(std::fs::File::create(&temp)?, value)?;
    if let Err(err) = std::fs::rename(&temp, path) {
        let _ = std::fs::remove_file(&temp);
        return Err(err.into());
    }
    Ok(())
}

fn check_version(file_version: u32, expected_version: u32) -> Result<(), RemoteError> {
    if file_version != expected_version {
        return Err(RemoteError::SchemaMismatch {
            file_version,
            expected_version,
        });
    }
    Ok(())
}

fn cbor_serialize<T: Serialize + ?Sized>(value: &T) -> Result<Vec<u8>, RemoteError> {
    let mut buf = Vec::new();
    ciborium::into_writer(value, &mut buf).map_err(|e| RemoteError::CborEncode(e.to_string()))?;
    Ok(buf)
}

fn cbor_deserialize<T: for<'de> Deserialize<'de>>(data: &[u8]) -> Result<T, RemoteError> {
    ciborium::from_reader(data).map_err(|e| RemoteError::CborDecode(e.to_string()))
}

fn zstd_compress(data: &[u8]) -> Result<Vec<u8>, RemoteError> {
    let mut encoder = zstd::Encoder::new(Vec::new(), 3)?;
    encoder.write_all(data)?;
    Ok(encoder.finish()?)
}

fn zstd_decompress(data: &[u8]) -> Result<Vec<u8>, RemoteError> {
    let mut decoder = zstd::Decoder::new(data)?;
    let mut buf = Vec::new();
    decoder.read_to_end(&mut buf)?;
    Ok(buf)
}

fn sha256_hex(data: &[u8]) -> String {
    format!("{:x}", Sha256::digest(data))
}

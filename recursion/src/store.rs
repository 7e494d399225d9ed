//! Storage backends for checkpoint records

use crate::DGCK_MAGIC;
use crate::FORMAT_VERSION;
use crate::error::GuardError;
use crate::error::Result;
use crate::integrity::Digest;
use crate::types::CheckpointId;
use crate::types::CheckpointSummary;
use crate::types::CheckpointTrigger;
use crate::types::ContextId;
use crate::types::DeepCheckpoint;
use chrono::DateTime;
use chrono::Utc;
use serde::Deserialize;
use serde::Serialize;
use std::collections::BTreeMap;
use std::collections::HashMap;
use std::fs::File;
use std::fs::{self};
use std::io::BufReader;
use std::io::ErrorKind;
use std::io::Read;
use std::path::Path;
use std::path::PathBuf;
use tokio::fs as async_fs;
use tokio::sync::RwLock;

/// Keyed storage of immutable checkpoint records.
///
/// Once `put` returns `Ok`, `get` on the same store returns an identical
/// record; a `put` that did not complete is never visible. Records are never
/// overwritten, only deleted.
pub trait CheckpointStore: Send + Sync {
    /// Persist a new checkpoint; fails with `CheckpointExists` for a known id
    fn put(
        &self,
        checkpoint: &DeepCheckpoint,
    ) -> impl std::future::Future<Output = Result<()>> + Send;

    /// Load a checkpoint, `None` when the id is unknown
    fn get(
        &self,
        id: CheckpointId,
    ) -> impl std::future::Future<Output = Result<Option<DeepCheckpoint>>> + Send;

    /// Remove a checkpoint, returning whether it existed
    fn delete(&self, id: CheckpointId) -> impl std::future::Future<Output = Result<bool>> + Send;

    /// Summaries of all stored checkpoints, oldest first
    fn list(&self) -> impl std::future::Future<Output = Result<Vec<CheckpointSummary>>> + Send;
}

/// In-process store
#[derive(Debug, Default)]
pub struct MemoryCheckpointStore {
    checkpoints: RwLock<HashMap<CheckpointId, DeepCheckpoint>>,
}

impl MemoryCheckpointStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn len(&self) -> usize {
        self.checkpoints.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.checkpoints.read().await.is_empty()
    }
}

impl CheckpointStore for MemoryCheckpointStore {
    async fn put(&self, checkpoint: &DeepCheckpoint) -> Result<()> {
        let mut checkpoints = self.checkpoints.write().await;
        if checkpoints.contains_key(&checkpoint.id) {
            return Err(GuardError::CheckpointExists(checkpoint.id));
        }
        checkpoints.insert(checkpoint.id, checkpoint.clone());
        Ok(())
    }

    async fn get(&self, id: CheckpointId) -> Result<Option<DeepCheckpoint>> {
        Ok(self.checkpoints.read().await.get(&id).cloned())
    }

    async fn delete(&self, id: CheckpointId) -> Result<bool> {
        Ok(self.checkpoints.write().await.remove(&id).is_some())
    }

    async fn list(&self) -> Result<Vec<CheckpointSummary>> {
        let mut summaries: Vec<_> = self
            .checkpoints
            .read()
            .await
            .values()
            .map(DeepCheckpoint::summary)
            .collect();
        summaries.sort_by_key(|s| s.created_at);
        Ok(summaries)
    }
}

/// Envelope fields written ahead of the payload
#[derive(Debug, Serialize, Deserialize)]
struct StoredHeader {
    id: CheckpointId,
    context_id: ContextId,
    created_at: DateTime<Utc>,
    depth: usize,
    trigger: CheckpointTrigger,
    digest: Digest,
    metadata: BTreeMap<String, String>,
}

/// One file per checkpoint under a base directory.
///
/// Layout: `DGCK` magic, format version (u16 LE), header length (u32 LE),
/// bincode header, payload length (u32 LE), payload. Files are written to a
/// temporary path and renamed into place.
#[derive(Debug, Clone)]
pub struct FileCheckpointStore {
    base_path: PathBuf,
}

impl FileCheckpointStore {
    /// Create a new file store, creating the directory if needed
    pub fn new(base_path: PathBuf) -> Result<Self> {
        fs::create_dir_all(&base_path)?;
        Ok(Self { base_path })
    }

    pub fn base_path(&self) -> &Path {
        &self.base_path
    }

    /// Get the path for a checkpoint file
    pub fn checkpoint_path(&self, id: CheckpointId) -> PathBuf {
        self.base_path.join(format!("{id}.dgck"))
    }

    fn encode(checkpoint: &DeepCheckpoint) -> Result<Vec<u8>> {
        let header = StoredHeader {
            id: checkpoint.id,
            context_id: checkpoint.context_id,
            created_at: checkpoint.created_at,
            depth: checkpoint.depth,
            trigger: checkpoint.trigger,
            digest: checkpoint.digest,
            metadata: checkpoint.metadata.clone(),
        };
        let header_bytes = bincode::serde::encode_to_vec(&header, bincode::config::standard())?;

        let mut bytes =
            Vec::with_capacity(14 + header_bytes.len() + checkpoint.payload.len());
        bytes.extend_from_slice(DGCK_MAGIC);
        bytes.extend_from_slice(&FORMAT_VERSION.to_le_bytes());
        bytes.extend_from_slice(&length_prefix(header_bytes.len())?);
        bytes.extend_from_slice(&header_bytes);
        bytes.extend_from_slice(&length_prefix(checkpoint.payload.len())?);
        bytes.extend_from_slice(&checkpoint.payload);
        Ok(bytes)
    }

    fn decode(bytes: &[u8]) -> Result<DeepCheckpoint> {
        let mut reader = bytes;
        let header = read_header(&mut reader)?;
        let payload_len = read_len(&mut reader)?;
        if reader.len() != payload_len {
            return Err(GuardError::CorruptData(format!(
                "payload length {} does not match recorded length {payload_len}",
                reader.len()
            )));
        }

        Ok(DeepCheckpoint {
            id: header.id,
            context_id: header.context_id,
            created_at: header.created_at,
            depth: header.depth,
            trigger: header.trigger,
            payload: reader.to_vec(),
            digest: header.digest,
            metadata: header.metadata,
        })
    }

    /// Read only the envelope of a checkpoint file
    pub fn read_summary(path: &Path) -> Result<CheckpointSummary> {
        let file = File::open(path)?;
        let mut reader = BufReader::new(file);
        let header = read_header(&mut reader)?;
        let payload_len = read_len(&mut reader)?;

        Ok(CheckpointSummary {
            id: header.id,
            context_id: header.context_id,
            created_at: header.created_at,
            depth: header.depth,
            trigger: header.trigger,
            payload_len,
            digest: header.digest,
        })
    }
}

impl CheckpointStore for FileCheckpointStore {
    async fn put(&self, checkpoint: &DeepCheckpoint) -> Result<()> {
        let path = self.checkpoint_path(checkpoint.id);
        if async_fs::try_exists(&path).await? {
            return Err(GuardError::CheckpointExists(checkpoint.id));
        }

        let bytes = Self::encode(checkpoint)?;

        // Write to temporary file first
        let temp_path = path.with_extension("tmp");
        async_fs::write(&temp_path, &bytes).await?;

        // Atomic rename
        if let Err(e) = async_fs::rename(&temp_path, &path).await {
            let _ = async_fs::remove_file(&temp_path).await;
            return Err(e.into());
        }

        Ok(())
    }

    async fn get(&self, id: CheckpointId) -> Result<Option<DeepCheckpoint>> {
        let path = self.checkpoint_path(id);

        let loaded = tokio::task::spawn_blocking(move || -> Result<Option<DeepCheckpoint>> {
            let bytes = match fs::read(&path) {
                Ok(bytes) => bytes,
                Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
                Err(e) => return Err(e.into()),
            };
            Self::decode(&bytes)
                .map(Some)
                .map_err(|e| GuardError::CheckpointCorrupted {
                    id,
                    reason: e.to_string(),
                })
        })
        .await
        .map_err(|e| GuardError::Io(std::io::Error::other(e)))??;

        let Some(checkpoint) = loaded else {
            return Ok(None);
        };

        if checkpoint.id != id {
            return Err(GuardError::CheckpointCorrupted {
                id,
                reason: format!("file holds checkpoint {}", checkpoint.id),
            });
        }

        Ok(Some(checkpoint))
    }

    async fn delete(&self, id: CheckpointId) -> Result<bool> {
        let path = self.checkpoint_path(id);

        if async_fs::try_exists(&path).await? {
            async_fs::remove_file(&path).await?;
            return Ok(true);
        }

        Ok(false)
    }

    async fn list(&self) -> Result<Vec<CheckpointSummary>> {
        let mut summaries = Vec::new();

        let mut entries = async_fs::read_dir(&self.base_path).await?;

        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();

            if path.extension().and_then(|ext| ext.to_str()) == Some("dgck") {
                match Self::read_summary(&path) {
                    Ok(summary) => summaries.push(summary),
                    Err(e) => {
                        tracing::warn!("Failed to read checkpoint header from {:?}: {}", path, e);
                    }
                }
            }
        }

        summaries.sort_by_key(|s| s.created_at);

        Ok(summaries)
    }
}

fn length_prefix(len: usize) -> Result<[u8; 4]> {
    u32::try_from(len)
        .map(u32::to_le_bytes)
        .map_err(|_| GuardError::CorruptData(format!("section of {len} bytes is too large")))
}

fn read_len(reader: &mut impl Read) -> Result<usize> {
    let mut len_bytes = [0u8; 4];
    reader.read_exact(&mut len_bytes)?;
    Ok(u32::from_le_bytes(len_bytes) as usize)
}

/// Validate magic and version, then decode the bincode header
fn read_header(reader: &mut impl Read) -> Result<StoredHeader> {
    let mut magic = [0u8; 4];
    reader.read_exact(&mut magic)?;
    if magic != DGCK_MAGIC {
        return Err(GuardError::InvalidMagic);
    }

    let mut version_bytes = [0u8; 2];
    reader.read_exact(&mut version_bytes)?;
    let version = u16::from_le_bytes(version_bytes);
    if version != FORMAT_VERSION {
        return Err(GuardError::UnsupportedVersion {
            found: version,
            supported: FORMAT_VERSION,
        });
    }

    let header_len = read_len(reader)?;
    let mut header_bytes = Vec::new();
    reader
        .by_ref()
        .take(header_len as u64)
        .read_to_end(&mut header_bytes)?;
    if header_bytes.len() != header_len {
        return Err(GuardError::CorruptData(format!(
            "header length {header_len} exceeds the {} bytes available",
            header_bytes.len()
        )));
    }
    let (header, _): (StoredHeader, _) =
        bincode::serde::decode_from_slice(&header_bytes, bincode::config::standard())?;
    Ok(header)
}

//! Error types for checkpoint guard operations

use crate::types::CheckpointId;
use crate::types::ContextId;
use std::io;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, GuardError>;

#[derive(Error, Debug)]
pub enum GuardError {
    /// Restoration requested for an id the store does not hold
    #[error("Checkpoint not found: {0}")]
    CheckpointNotFound(CheckpointId),

    /// Digest mismatch, or a verified payload that failed to decode
    #[error("Checkpoint {id} is corrupted: {reason}")]
    CheckpointCorrupted { id: CheckpointId, reason: String },

    /// Compression, digesting or persistence failed while creating a checkpoint
    #[error("Checkpoint creation failed: {0}")]
    CheckpointCreationFailed(String),

    /// Stored checkpoints are immutable
    #[error("Checkpoint already exists: {0}")]
    CheckpointExists(CheckpointId),

    /// The context has no checkpoint to fall back to
    #[error("No checkpoint available for context {0}")]
    NoCheckpointAvailable(ContextId),

    /// A guard was used against a context it was not issued for
    #[error("Guard issued for context {expected} used with context {actual}")]
    ContextMismatch {
        expected: ContextId,
        actual: ContextId,
    },

    /// Frame depth does not describe the context's active depth
    #[error("Frame depth {frame_depth} does not match context depth {context_depth}")]
    DepthMismatch {
        frame_depth: usize,
        context_depth: usize,
    },

    /// Filesystem failure in the checkpoint store or config loader
    #[error("I/O failure: {0}")]
    Io(#[from] io::Error),

    #[error("Failed to encode with bincode: {0}")]
    BincodeEncode(#[from] bincode::error::EncodeError),

    #[error("Failed to decode with bincode: {0}")]
    BincodeDecode(#[from] bincode::error::DecodeError),

    /// Zstd failure or a payload that decodes to the wrong shape
    #[error("Payload codec failure: {0}")]
    Compression(String),

    /// File does not start with `DGCK`
    #[error("Not a checkpoint file: missing DGCK magic")]
    InvalidMagic,

    #[error("Checkpoint file version {found} is not supported (this build reads {supported})")]
    UnsupportedVersion { found: u16, supported: u16 },

    /// Truncated or inconsistent checkpoint file
    #[error("Corrupt checkpoint data: {0}")]
    CorruptData(String),

    /// Configuration failed validation
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// TOML configuration parse errors
    #[error("TOML error: {0}")]
    Toml(#[from] toml::de::Error),
}

impl GuardError {
    /// Whether a restoration may fall back to an older checkpoint after this error
    pub const fn is_recoverable_restore_failure(&self) -> bool {
        matches!(
            self,
            Self::CheckpointNotFound(_) | Self::CheckpointCorrupted { .. }
        )
    }
}

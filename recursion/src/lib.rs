//! Recursion checkpointing guard for DeepGuard
//!
//! Protects long-running recursive computations from runaway depth and
//! repeated-frame cycles. Recursion state is periodically snapshotted,
//! compressed with Zstd, sealed with a SHA-256 digest and persisted so a
//! computation can be rolled back to its last known-good checkpoint.

pub mod compression;
pub mod config;
pub mod context;
pub mod error;
pub mod integrity;
pub mod manager;
pub mod metadata;
pub mod monitor;
pub mod policy;
pub mod retention;
pub mod store;
pub mod types;
pub mod window;


pub use compression::CompressionLevel;
pub use compression::StateCompressor;
pub use config::CheckpointConfig;
pub use config::GuardConfig;
pub use config::MonitorConfig;
pub use config::StoreConfig;
pub use context::HistoryEntry;
pub use context::RecursionContext;
pub use error::GuardError;
pub use error::Result;
pub use integrity::Digest;
pub use integrity::IntegrityValidator;
pub use manager::EmergencyExit;
pub use manager::FrameEntry;
pub use manager::GuardStats;
pub use manager::RecursionCheckpointManager;
pub use metadata::CaptureInfo;
pub use metadata::FrameCountMetadata;
pub use metadata::MetadataExtractor;
pub use monitor::FrameSigner;
pub use monitor::RecursionMonitor;
pub use monitor::Sha256FrameSigner;
pub use policy::CheckpointPolicy;
pub use policy::DepthCadence;
pub use retention::RetentionPolicy;
pub use store::CheckpointStore;
pub use store::FileCheckpointStore;
pub use store::MemoryCheckpointStore;
pub use types::CheckpointId;
pub use types::CheckpointIdGenerator;
pub use types::CheckpointSummary;
pub use types::CheckpointTrigger;
pub use types::Clock;
pub use types::ContextId;
pub use types::DeepCheckpoint;
pub use types::FrameId;
pub use types::FrameSignature;
pub use types::IntegrityVerdict;
pub use types::LoopDetection;
pub use types::Recommendation;
pub use types::RecursionFrame;
pub use types::RecursionGuard;
pub use types::RandomCheckpointIds;
pub use types::RestorationResult;
pub use types::SequentialCheckpointIds;
pub use types::SystemClock;
pub use window::FrameWindow;
pub use window::WindowEntry;

/// Magic bytes for DeepGuard checkpoint files
pub const DGCK_MAGIC: &[u8] = b"DGCK";

/// Current checkpoint file format version
pub const FORMAT_VERSION: u16 = 1;

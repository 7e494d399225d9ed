//! Core types for recursion checkpointing

use crate::integrity::Digest;
use chrono::DateTime;
use chrono::Utc;
use serde::Deserialize;
use serde::Serialize;
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use std::sync::atomic::AtomicU64;
use std::sync::atomic::Ordering;
use std::time::Duration;
use uuid::Uuid;

/// Unique identifier of a stored checkpoint
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct CheckpointId(Uuid);

impl CheckpointId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    pub const fn from_uuid(uuid: Uuid) -> Self {
        Self(uuid)
    }

    pub const fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl Default for CheckpointId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for CheckpointId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl FromStr for CheckpointId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Uuid::parse_str(s).map(Self)
    }
}

/// Identifier of one guarded computation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ContextId(Uuid);

impl ContextId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for ContextId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ContextId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// Sequence number of a frame within its context
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct FrameId(pub u64);

impl fmt::Display for FrameId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "frame#{}", self.0)
    }
}

/// Stable fingerprint of a frame's identity
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct FrameSignature(String);

impl FrameSignature {
    pub fn new(signature: impl Into<String>) -> Self {
        Self(signature.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for FrameSignature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// One entry of the guarded call stack.
///
/// `function` and `arguments` carry the identity of the step; `entered_at` is
/// incidental and never takes part in signatures.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecursionFrame {
    pub id: FrameId,
    pub function: String,
    pub arguments: String,
    pub depth: usize,
    pub entered_at: DateTime<Utc>,
}

/// Why a checkpoint was taken
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CheckpointTrigger {
    /// Regular depth cadence
    Cadence,
    /// Loop risk crossed the emergency threshold
    Emergency,
    /// Forced when a loop was detected
    LoopDetected,
}

impl fmt::Display for CheckpointTrigger {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Cadence => f.write_str("cadence"),
            Self::Emergency => f.write_str("emergency"),
            Self::LoopDetected => f.write_str("loop-detected"),
        }
    }
}

/// Immutable, integrity-sealed snapshot of a recursion context
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeepCheckpoint {
    pub id: CheckpointId,
    pub context_id: ContextId,
    pub created_at: DateTime<Utc>,
    pub depth: usize,
    pub trigger: CheckpointTrigger,
    #[serde(with = "serde_bytes")]
    pub payload: Vec<u8>,
    pub digest: Digest,
    pub metadata: BTreeMap<String, String>,
}

impl DeepCheckpoint {
    pub fn summary(&self) -> CheckpointSummary {
        CheckpointSummary {
            id: self.id,
            context_id: self.context_id,
            created_at: self.created_at,
            depth: self.depth,
            trigger: self.trigger,
            payload_len: self.payload.len(),
            digest: self.digest,
        }
    }
}

/// Checkpoint envelope without its payload
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CheckpointSummary {
    pub id: CheckpointId,
    pub context_id: ContextId,
    pub created_at: DateTime<Utc>,
    pub depth: usize,
    pub trigger: CheckpointTrigger,
    pub payload_len: usize,
    pub digest: Digest,
}

/// Handle issued for one frame entry.
///
/// Refers to its context by id only; emergency exit goes through
/// [`crate::RecursionCheckpointManager::emergency_exit`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecursionGuard {
    depth: usize,
    checkpoint: Option<CheckpointId>,
    context_id: ContextId,
    frame_id: FrameId,
}

impl RecursionGuard {
    pub(crate) const fn new(
        depth: usize,
        checkpoint: Option<CheckpointId>,
        context_id: ContextId,
        frame_id: FrameId,
    ) -> Self {
        Self {
            depth,
            checkpoint,
            context_id,
            frame_id,
        }
    }

    pub const fn depth(&self) -> usize {
        self.depth
    }

    /// Checkpoint active when the guard was issued; `None` before the first one
    pub const fn checkpoint(&self) -> Option<CheckpointId> {
        self.checkpoint
    }

    pub const fn context_id(&self) -> ContextId {
        self.context_id
    }

    pub const fn frame_id(&self) -> FrameId {
        self.frame_id
    }
}

/// Monitor recommendation for the current frame
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Recommendation {
    Continue,
    CreateEmergencyCheckpoint,
}

/// Verdict of the monitor for one observed frame
#[derive(Debug, Clone, PartialEq)]
pub struct LoopDetection {
    pub detected: bool,
    pub signature: FrameSignature,
    pub occurrences: usize,
    pub window_len: usize,
    /// `occurrences / window_len`, diagnostics only
    pub confidence: f64,
    pub recommendation: Recommendation,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum IntegrityVerdict {
    Verified,
}

/// Outcome of a successful restoration
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RestorationResult {
    pub successful: bool,
    pub checkpoint_id: CheckpointId,
    pub restored_depth: usize,
    pub integrity: IntegrityVerdict,
    pub elapsed: Duration,
}

/// Timestamp source for checkpoint metadata
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

/// Wall clock
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// Source of collision-free checkpoint ids
pub trait CheckpointIdGenerator: Send + Sync {
    fn next_id(&self) -> CheckpointId;
}

/// Random v4 UUIDs
#[derive(Debug, Clone, Copy, Default)]
pub struct RandomCheckpointIds;

impl CheckpointIdGenerator for RandomCheckpointIds {
    fn next_id(&self) -> CheckpointId {
        CheckpointId::new()
    }
}

/// Monotonic ids, reproducible across runs
#[derive(Debug, Default)]
pub struct SequentialCheckpointIds {
    next: AtomicU64,
}

impl SequentialCheckpointIds {
    pub const fn starting_at(first: u64) -> Self {
        Self {
            next: AtomicU64::new(first),
        }
    }
}

impl CheckpointIdGenerator for SequentialCheckpointIds {
    fn next_id(&self) -> CheckpointId {
        let n = self.next.fetch_add(1, Ordering::Relaxed);
        CheckpointId::from_uuid(Uuid::from_u128(u128::from(n) + 1))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_checkpoint_id_parse_roundtrip() {
        let id = CheckpointId::new();
        let parsed: CheckpointId = id.to_string().parse().unwrap();
        assert_eq!(id, parsed);
        assert!("nonexistent-id".parse::<CheckpointId>().is_err());
    }

    #[test]
    fn test_sequential_ids_are_distinct_and_reproducible() {
        let a = SequentialCheckpointIds::default();
        let b = SequentialCheckpointIds::default();
        let first: Vec<_> = (0..5).map(|_| a.next_id()).collect();
        let second: Vec<_> = (0..5).map(|_| b.next_id()).collect();
        assert_eq!(first, second);

        let mut dedup = first.clone();
        dedup.sort();
        dedup.dedup();
        assert_eq!(dedup.len(), 5);
    }
}

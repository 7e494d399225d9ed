//! Recursion checkpoint orchestration: cadence, loop response and restoration

use crate::compression::StateCompressor;
use crate::config::GuardConfig;
use crate::context::RecursionContext;
use crate::context::RecursionSnapshot;
use crate::error::GuardError;
use crate::error::Result;
use crate::integrity::IntegrityValidator;
use crate::metadata::CaptureInfo;
use crate::metadata::FrameCountMetadata;
use crate::metadata::MetadataExtractor;
use crate::monitor::FrameSigner;
use crate::monitor::RecursionMonitor;
use crate::policy::CheckpointPolicy;
use crate::policy::DepthCadence;
use crate::store::CheckpointStore;
use crate::types::CheckpointId;
use crate::types::CheckpointIdGenerator;
use crate::types::CheckpointSummary;
use crate::types::CheckpointTrigger;
use crate::types::Clock;
use crate::types::DeepCheckpoint;
use crate::types::IntegrityVerdict;
use crate::types::LoopDetection;
use crate::types::RandomCheckpointIds;
use crate::types::Recommendation;
use crate::types::RecursionFrame;
use crate::types::RecursionGuard;
use crate::types::RestorationResult;
use crate::types::SystemClock;
use serde::Serialize;
use serde::de::DeserializeOwned;
use std::sync::Arc;
use std::sync::atomic::AtomicU64;
use std::sync::atomic::Ordering;
use std::time::Instant;
use tracing::debug;
use tracing::error;
use tracing::info;
use tracing::warn;

/// Result of entering a frame
#[derive(Debug, Clone, PartialEq)]
pub enum FrameEntry {
    /// Keep recursing
    Continue(RecursionGuard),
    /// The frame repeats too often; the caller should unwind
    LoopDetected {
        guard: RecursionGuard,
        detection: LoopDetection,
    },
}

impl FrameEntry {
    pub const fn guard(&self) -> &RecursionGuard {
        match self {
            Self::Continue(guard) | Self::LoopDetected { guard, .. } => guard,
        }
    }

    pub fn into_guard(self) -> RecursionGuard {
        match self {
            Self::Continue(guard) | Self::LoopDetected { guard, .. } => guard,
        }
    }

    pub const fn is_loop(&self) -> bool {
        matches!(self, Self::LoopDetected { .. })
    }
}

/// Outcome of an emergency exit
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EmergencyExit {
    pub restoration: RestorationResult,
    /// Native frames the caller has to unwind to get back to the restored depth
    pub unwind_frames: usize,
}

/// Counters for observability
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct GuardStats {
    pub checkpoints_created: u64,
    pub emergency_checkpoints: u64,
    pub creation_failures: u64,
    pub loops_detected: u64,
    pub restorations: u64,
    pub failed_restorations: u64,
}

#[derive(Debug, Default)]
struct Counters {
    checkpoints_created: AtomicU64,
    emergency_checkpoints: AtomicU64,
    creation_failures: AtomicU64,
    loops_detected: AtomicU64,
    restorations: AtomicU64,
    failed_restorations: AtomicU64,
}

impl Counters {
    fn bump(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    fn snapshot(&self) -> GuardStats {
        GuardStats {
            checkpoints_created: self.checkpoints_created.load(Ordering::Relaxed),
            emergency_checkpoints: self.emergency_checkpoints.load(Ordering::Relaxed),
            creation_failures: self.creation_failures.load(Ordering::Relaxed),
            loops_detected: self.loops_detected.load(Ordering::Relaxed),
            restorations: self.restorations.load(Ordering::Relaxed),
            failed_restorations: self.failed_restorations.load(Ordering::Relaxed),
        }
    }
}

/// Guards recursive computations with checkpoints and loop detection.
///
/// Holds no per-computation state: everything about a computation lives in the
/// [`RecursionContext`] passed to each call, so one manager can be shared by
/// many concurrent computations.
pub struct RecursionCheckpointManager<St> {
    config: GuardConfig,
    store: Arc<St>,
    monitor: RecursionMonitor,
    compressor: StateCompressor,
    validator: IntegrityValidator,
    policy: Arc<dyn CheckpointPolicy>,
    clock: Arc<dyn Clock>,
    ids: Arc<dyn CheckpointIdGenerator>,
    metadata: Arc<dyn MetadataExtractor>,
    counters: Counters,
}

impl<St: CheckpointStore> RecursionCheckpointManager<St> {
    /// Create a manager with the default signer, cadence, clock and id source
    pub fn new(config: GuardConfig, store: Arc<St>) -> Self {
        Self {
            monitor: RecursionMonitor::new(config.monitor.clone()),
            compressor: StateCompressor::new(config.checkpoint.compression_level),
            validator: IntegrityValidator::new(),
            policy: Arc::new(DepthCadence::from_config(&config.checkpoint)),
            clock: Arc::new(SystemClock),
            ids: Arc::new(RandomCheckpointIds),
            metadata: Arc::new(FrameCountMetadata),
            counters: Counters::default(),
            store,
            config,
        }
    }

    pub fn with_signer(mut self, signer: Arc<dyn FrameSigner>) -> Self {
        self.monitor = RecursionMonitor::with_signer(self.config.monitor.clone(), signer);
        self
    }

    pub fn with_policy(mut self, policy: Arc<dyn CheckpointPolicy>) -> Self {
        self.policy = policy;
        self
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn with_id_generator(mut self, ids: Arc<dyn CheckpointIdGenerator>) -> Self {
        self.ids = ids;
        self
    }

    pub fn with_metadata_extractor(mut self, metadata: Arc<dyn MetadataExtractor>) -> Self {
        self.metadata = metadata;
        self
    }

    pub const fn config(&self) -> &GuardConfig {
        &self.config
    }

    pub const fn store(&self) -> &Arc<St> {
        &self.store
    }

    pub const fn monitor(&self) -> &RecursionMonitor {
        &self.monitor
    }

    pub fn stats(&self) -> GuardStats {
        self.counters.snapshot()
    }

    /// Start a new computation with a window sized from the monitor config
    pub fn new_context<S>(&self, state: S) -> RecursionContext<S> {
        RecursionContext::new(state, self.config.monitor.window_size)
    }

    /// Register entry into `frame` and decide how the caller should proceed.
    ///
    /// Checkpoint creation failures are logged and counted but never fail the
    /// call; the previous checkpoint stays active. The only error is a frame
    /// whose depth does not match the context.
    pub async fn enter_recursion_frame<S: Serialize>(
        &self,
        frame: &RecursionFrame,
        ctx: &mut RecursionContext<S>,
    ) -> Result<FrameEntry> {
        if frame.depth != ctx.depth() {
            return Err(GuardError::DepthMismatch {
                frame_depth: frame.depth,
                context_depth: ctx.depth(),
            });
        }

        let depth = frame.depth;
        let mut taken = None;

        if self.policy.should_checkpoint(depth, frame) {
            debug!(depth, frame = %frame.id, "checkpoint due by cadence");
            taken = self.try_checkpoint(ctx, CheckpointTrigger::Cadence).await;
        }

        let detection = self.monitor.observe(frame, ctx.observing_window());
        ctx.forget_departed_emergencies();

        match detection.recommendation {
            Recommendation::CreateEmergencyCheckpoint => {
                let covered = ctx.emergency_covered(&detection.signature);
                if !covered && !detection.detected && taken.is_none() {
                    warn!(
                        "Frame {} repeated {} times in {} frames, taking emergency checkpoint",
                        frame.function, detection.occurrences, detection.window_len
                    );
                    taken = self.try_checkpoint(ctx, CheckpointTrigger::Emergency).await;
                }
                // A failed attempt leaves the signature open for the next repeat
                if taken.is_some() || detection.detected {
                    ctx.cover_emergency(detection.signature.clone());
                }
            }
            Recommendation::Continue => ctx.release_emergency(&detection.signature),
        }

        if detection.detected {
            Counters::bump(&self.counters.loops_detected);
            warn!(
                context = %ctx.id(),
                depth,
                occurrences = detection.occurrences,
                confidence = detection.confidence,
                "Loop detected in {}",
                frame.function
            );

            if taken.is_none() {
                self.try_checkpoint(ctx, CheckpointTrigger::LoopDetected)
                    .await;
            }

            let guard = RecursionGuard::new(depth, ctx.latest_checkpoint(), ctx.id(), frame.id);
            return Ok(FrameEntry::LoopDetected { guard, detection });
        }

        Ok(FrameEntry::Continue(RecursionGuard::new(
            depth,
            ctx.latest_checkpoint(),
            ctx.id(),
            frame.id,
        )))
    }

    /// Checkpoint attempt whose failure is absorbed
    async fn try_checkpoint<S: Serialize>(
        &self,
        ctx: &mut RecursionContext<S>,
        trigger: CheckpointTrigger,
    ) -> Option<CheckpointId> {
        match self.create_checkpoint(ctx, trigger).await {
            Ok(summary) => Some(summary.id),
            Err(e) => {
                Counters::bump(&self.counters.creation_failures);
                warn!(
                    context = %ctx.id(),
                    depth = ctx.depth(),
                    %trigger,
                    "Checkpoint creation failed, keeping previous checkpoint: {}",
                    e
                );
                None
            }
        }
    }

    /// Capture, compress, seal and persist the context's current state.
    ///
    /// The record is persisted before it is appended to the context's history,
    /// so history never names a checkpoint the store cannot return.
    pub async fn create_checkpoint<S: Serialize>(
        &self,
        ctx: &mut RecursionContext<S>,
        trigger: CheckpointTrigger,
    ) -> Result<CheckpointSummary> {
        let info = CaptureInfo {
            context_id: ctx.id(),
            depth: ctx.depth(),
            window_len: ctx.window().len(),
            frames_observed: ctx.frames_observed(),
            checkpoints_taken: ctx.checkpoints().count(),
            trigger,
        };

        let payload = self
            .compressor
            .compress(&ctx.snapshot())
            .map_err(|e| GuardError::CheckpointCreationFailed(format!("compression: {e}")))?;
        let digest = self.validator.hash(&payload);

        let checkpoint = DeepCheckpoint {
            id: self.ids.next_id(),
            context_id: ctx.id(),
            created_at: self.clock.now(),
            depth: ctx.depth(),
            trigger,
            payload,
            digest,
            metadata: self.metadata.extract(&info),
        };

        self.store.put(&checkpoint).await.map_err(|e| {
            GuardError::CheckpointCreationFailed(format!("persisting {}: {e}", checkpoint.id))
        })?;

        let summary = checkpoint.summary();
        ctx.record_checkpoint(summary.clone());

        Counters::bump(&self.counters.checkpoints_created);
        if trigger != CheckpointTrigger::Cadence {
            Counters::bump(&self.counters.emergency_checkpoints);
        }

        info!(
            "Created {} checkpoint {} at depth {} for context {} ({} bytes)",
            trigger,
            summary.id,
            summary.depth,
            ctx.id(),
            summary.payload_len
        );
        Ok(summary)
    }

    /// Reload, verify, decompress and apply a checkpoint.
    ///
    /// On failure the context is left untouched.
    pub async fn restore_from_checkpoint<S: DeserializeOwned>(
        &self,
        checkpoint_id: CheckpointId,
        ctx: &mut RecursionContext<S>,
    ) -> Result<RestorationResult> {
        let started = Instant::now();
        let result = self.restore_inner(checkpoint_id, ctx, started).await;

        match &result {
            Ok(_) => Counters::bump(&self.counters.restorations),
            Err(_) => Counters::bump(&self.counters.failed_restorations),
        }
        result
    }

    async fn restore_inner<S: DeserializeOwned>(
        &self,
        checkpoint_id: CheckpointId,
        ctx: &mut RecursionContext<S>,
        started: Instant,
    ) -> Result<RestorationResult> {
        let checkpoint = self
            .store
            .get(checkpoint_id)
            .await?
            .ok_or(GuardError::CheckpointNotFound(checkpoint_id))?;

        if !self.validator.verify(&checkpoint) {
            error!(
                "Checkpoint {} failed digest verification (expected {})",
                checkpoint_id, checkpoint.digest
            );
            return Err(GuardError::CheckpointCorrupted {
                id: checkpoint_id,
                reason: "payload digest mismatch".to_string(),
            });
        }

        let snapshot: RecursionSnapshot<S> =
            self.compressor
                .decompress(&checkpoint.payload)
                .map_err(|e| {
                    error!(
                        "Checkpoint {} passed verification but failed to decode: {}",
                        checkpoint_id, e
                    );
                    GuardError::CheckpointCorrupted {
                        id: checkpoint_id,
                        reason: format!("payload decode failed: {e}"),
                    }
                })?;

        if snapshot.depth != checkpoint.depth {
            return Err(GuardError::CheckpointCorrupted {
                id: checkpoint_id,
                reason: format!(
                    "snapshot depth {} disagrees with envelope depth {}",
                    snapshot.depth, checkpoint.depth
                ),
            });
        }

        ctx.apply_snapshot(snapshot, checkpoint_id, self.clock.now());

        info!(
            "Restored context {} to checkpoint {} at depth {}",
            ctx.id(),
            checkpoint_id,
            checkpoint.depth
        );

        Ok(RestorationResult {
            successful: true,
            checkpoint_id,
            restored_depth: checkpoint.depth,
            integrity: IntegrityVerdict::Verified,
            elapsed: started.elapsed(),
        })
    }

    /// Roll the context back to the checkpoint bound to `guard`
    pub async fn emergency_exit<S: DeserializeOwned>(
        &self,
        guard: &RecursionGuard,
        ctx: &mut RecursionContext<S>,
    ) -> Result<EmergencyExit> {
        if guard.context_id() != ctx.id() {
            return Err(GuardError::ContextMismatch {
                expected: guard.context_id(),
                actual: ctx.id(),
            });
        }

        let checkpoint_id = guard
            .checkpoint()
            .ok_or(GuardError::NoCheckpointAvailable(ctx.id()))?;

        let depth_before = ctx.depth();
        let restoration = self.restore_from_checkpoint(checkpoint_id, ctx).await?;
        let unwind_frames = depth_before.saturating_sub(restoration.restored_depth);

        warn!(
            "Emergency exit from {} unwinds {} frames to depth {}",
            guard.frame_id(),
            unwind_frames,
            restoration.restored_depth
        );

        Ok(EmergencyExit {
            restoration,
            unwind_frames,
        })
    }

    /// Restore the newest checkpoint of this context that is still intact,
    /// skipping missing and corrupted ones
    pub async fn restore_latest_valid<S: DeserializeOwned>(
        &self,
        ctx: &mut RecursionContext<S>,
    ) -> Result<RestorationResult> {
        let candidates = ctx.live_checkpoints();

        for summary in candidates.iter().rev() {
            match self.restore_from_checkpoint(summary.id, ctx).await {
                Ok(result) => return Ok(result),
                Err(e) if e.is_recoverable_restore_failure() => {
                    warn!(
                        "Skipping checkpoint {} at depth {}: {}",
                        summary.id, summary.depth, e
                    );
                }
                Err(e) => return Err(e),
            }
        }

        Err(GuardError::NoCheckpointAvailable(ctx.id()))
    }

    /// Evict this context's checkpoints according to the retention policy.
    ///
    /// The latest checkpoint is never evicted. History gains an eviction
    /// marker per removed checkpoint; no entry is removed from it.
    pub async fn apply_retention<S>(
        &self,
        ctx: &mut RecursionContext<S>,
    ) -> Result<Vec<CheckpointId>> {
        let policy = &self.config.retention;
        if policy.is_unbounded() {
            return Ok(Vec::new());
        }

        let now = self.clock.now();
        let selected =
            policy.select_evictions(&ctx.live_checkpoints(), ctx.latest_checkpoint(), now);

        let mut evicted = Vec::with_capacity(selected.len());
        for checkpoint_id in selected {
            self.store.delete(checkpoint_id).await?;
            ctx.record_eviction(checkpoint_id, now);
            evicted.push(checkpoint_id);
        }

        if !evicted.is_empty() {
            info!(
                "Retention evicted {} checkpoints from context {}",
                evicted.len(),
                ctx.id()
            );
        }

        Ok(evicted)
    }
}

impl<St> std::fmt::Debug for RecursionCheckpointManager<St> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RecursionCheckpointManager")
            .field("config", &self.config)
            .field("stats", &self.counters.snapshot())
            .finish_non_exhaustive()
    }
}

//! Per-computation recursion state

use crate::types::CheckpointId;
use crate::types::CheckpointSummary;
use crate::types::ContextId;
use crate::types::FrameId;
use crate::types::FrameSignature;
use crate::types::RecursionFrame;
use crate::window::FrameWindow;
use crate::window::WindowEntry;
use chrono::DateTime;
use chrono::Utc;
use serde::Deserialize;
use serde::Serialize;
use std::collections::HashSet;

/// Append-only audit trail of a context
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HistoryEntry {
    /// A checkpoint was persisted
    Checkpoint(CheckpointSummary),
    /// The context was rolled back to a checkpoint
    Restored {
        checkpoint_id: CheckpointId,
        depth: usize,
        at: DateTime<Utc>,
    },
    /// Retention removed a checkpoint from the store
    Evicted {
        checkpoint_id: CheckpointId,
        at: DateTime<Utc>,
    },
}

/// State threaded through every recursive entry of one computation.
///
/// `S` is the caller's own work product (memo tables, partial results) and is
/// captured in every checkpoint; it must round-trip through bincode.
#[derive(Debug, Clone)]
pub struct RecursionContext<S> {
    id: ContextId,
    depth: usize,
    next_frame: u64,
    frames_observed: u64,
    history: Vec<HistoryEntry>,
    window: FrameWindow,
    latest_checkpoint: Option<CheckpointId>,
    emergency_signatures: HashSet<FrameSignature>,
    state: S,
}

impl<S> RecursionContext<S> {
    pub fn new(state: S, window_capacity: usize) -> Self {
        Self {
            id: ContextId::new(),
            depth: 0,
            next_frame: 0,
            frames_observed: 0,
            history: Vec::new(),
            window: FrameWindow::with_capacity(window_capacity),
            latest_checkpoint: None,
            emergency_signatures: HashSet::new(),
            state,
        }
    }

    pub const fn id(&self) -> ContextId {
        self.id
    }

    /// Number of active (entered, not yet unwound) frames
    pub const fn depth(&self) -> usize {
        self.depth
    }

    pub const fn state(&self) -> &S {
        &self.state
    }

    pub fn state_mut(&mut self) -> &mut S {
        &mut self.state
    }

    pub fn into_state(self) -> S {
        self.state
    }

    pub const fn window(&self) -> &FrameWindow {
        &self.window
    }

    pub fn history(&self) -> &[HistoryEntry] {
        &self.history
    }

    pub const fn latest_checkpoint(&self) -> Option<CheckpointId> {
        self.latest_checkpoint
    }

    pub const fn frames_observed(&self) -> u64 {
        self.frames_observed
    }

    /// Every checkpoint this context has taken, oldest first
    pub fn checkpoints(&self) -> impl Iterator<Item = &CheckpointSummary> {
        self.history.iter().filter_map(|entry| match entry {
            HistoryEntry::Checkpoint(summary) => Some(summary),
            _ => None,
        })
    }

    /// Checkpoints not yet evicted by retention, oldest first
    pub fn live_checkpoints(&self) -> Vec<CheckpointSummary> {
        let evicted: Vec<CheckpointId> = self
            .history
            .iter()
            .filter_map(|entry| match entry {
                HistoryEntry::Evicted { checkpoint_id, .. } => Some(*checkpoint_id),
                _ => None,
            })
            .collect();

        self.checkpoints()
            .filter(|summary| !evicted.contains(&summary.id))
            .cloned()
            .collect()
    }

    /// Enter one level deeper and describe the new frame
    pub fn descend(
        &mut self,
        function: impl Into<String>,
        arguments: impl Into<String>,
    ) -> RecursionFrame {
        self.depth += 1;
        let id = FrameId(self.next_frame);
        self.next_frame += 1;
        RecursionFrame {
            id,
            function: function.into(),
            arguments: arguments.into(),
            depth: self.depth,
            entered_at: Utc::now(),
        }
    }

    /// Leave the current frame, returning the new depth
    pub fn ascend(&mut self) -> usize {
        self.depth = self.depth.saturating_sub(1);
        self.depth
    }

    /// Window for the monitor to append the frame being entered
    pub(crate) fn observing_window(&mut self) -> &mut FrameWindow {
        self.frames_observed += 1;
        &mut self.window
    }

    pub(crate) fn record_checkpoint(&mut self, summary: CheckpointSummary) {
        self.latest_checkpoint = Some(summary.id);
        self.history.push(HistoryEntry::Checkpoint(summary));
    }

    pub(crate) fn record_eviction(&mut self, checkpoint_id: CheckpointId, at: DateTime<Utc>) {
        self.history
            .push(HistoryEntry::Evicted { checkpoint_id, at });
    }

    /// Whether an emergency checkpoint already covers this signature's
    /// current run above the threshold
    pub(crate) fn emergency_covered(&self, signature: &FrameSignature) -> bool {
        self.emergency_signatures.contains(signature)
    }

    pub(crate) fn cover_emergency(&mut self, signature: FrameSignature) {
        self.emergency_signatures.insert(signature);
    }

    /// The signature fell back below the threshold
    pub(crate) fn release_emergency(&mut self, signature: &FrameSignature) {
        self.emergency_signatures.remove(signature);
    }

    /// Drop covered signatures that have aged out of the window entirely
    pub(crate) fn forget_departed_emergencies(&mut self) {
        if self.emergency_signatures.is_empty() {
            return;
        }
        let window = &self.window;
        self.emergency_signatures
            .retain(|signature| window.count(signature) > 0);
    }

    #[cfg(test)]
    pub(crate) fn emergency_signature_count(&self) -> usize {
        self.emergency_signatures.len()
    }

    pub(crate) fn snapshot(&self) -> SnapshotRef<'_, S> {
        SnapshotRef {
            depth: self.depth,
            frames: self.window.iter().collect(),
            state: &self.state,
        }
    }

    /// Replace the restorable fields; history is only appended to
    pub(crate) fn apply_snapshot(
        &mut self,
        snapshot: RecursionSnapshot<S>,
        checkpoint_id: CheckpointId,
        at: DateTime<Utc>,
    ) {
        self.depth = snapshot.depth;
        self.window = FrameWindow::from_entries(self.window.capacity(), snapshot.frames);
        self.state = snapshot.state;
        self.latest_checkpoint = Some(checkpoint_id);
        self.history.push(HistoryEntry::Restored {
            checkpoint_id,
            depth: snapshot.depth,
            at,
        });
    }
}

/// Borrowed view of a context, serialized into a checkpoint payload
#[derive(Serialize)]
pub(crate) struct SnapshotRef<'a, S> {
    pub depth: usize,
    pub frames: Vec<&'a WindowEntry>,
    pub state: &'a S,
}

/// Owned snapshot decoded from a checkpoint payload
#[derive(Deserialize)]
pub(crate) struct RecursionSnapshot<S> {
    pub depth: usize,
    pub frames: Vec<WindowEntry>,
    pub state: S,
}

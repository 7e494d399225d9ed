//! When to take a regular checkpoint

use crate::config::CheckpointConfig;
use crate::types::RecursionFrame;

/// Decides checkpoint cadence. Must be a pure function of its inputs so the
/// set of checkpointed depths is reproducible.
pub trait CheckpointPolicy: Send + Sync {
    fn should_checkpoint(&self, depth: usize, frame: &RecursionFrame) -> bool;
}

/// Every `interval` levels of depth, plus each explicit threshold depth
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DepthCadence {
    interval: usize,
    thresholds: Vec<usize>,
}

impl DepthCadence {
    pub fn new(interval: usize, thresholds: impl IntoIterator<Item = usize>) -> Self {
        let mut thresholds: Vec<usize> = thresholds.into_iter().collect();
        thresholds.sort_unstable();
        thresholds.dedup();
        Self {
            interval: interval.max(1),
            thresholds,
        }
    }

    pub fn from_config(config: &CheckpointConfig) -> Self {
        Self::new(config.interval, config.depth_thresholds.iter().copied())
    }
}

impl CheckpointPolicy for DepthCadence {
    fn should_checkpoint(&self, depth: usize, _frame: &RecursionFrame) -> bool {
        if depth == 0 {
            return false;
        }
        depth % self.interval == 0 || self.thresholds.binary_search(&depth).is_ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::FrameId;
    use chrono::Utc;

    fn frame_at(depth: usize) -> RecursionFrame {
        RecursionFrame {
            id: FrameId(depth as u64),
            function: "f".to_string(),
            arguments: String::new(),
            depth,
            entered_at: Utc::now(),
        }
    }

    fn checkpointed_depths(policy: &DepthCadence, max: usize) -> Vec<usize> {
        (0..=max)
            .filter(|d| policy.should_checkpoint(*d, &frame_at(*d)))
            .collect()
    }

    #[test]
    fn test_interval_cadence() {
        let policy = DepthCadence::new(10, []);
        assert_eq!(checkpointed_depths(&policy, 35), vec![10, 20, 30]);
    }

    #[test]
    fn test_thresholds_add_depths() {
        let policy = DepthCadence::new(10, [7, 25, 7]);
        assert_eq!(checkpointed_depths(&policy, 30), vec![7, 10, 20, 25, 30]);
    }

    #[test]
    fn test_cadence_is_deterministic() {
        let a = DepthCadence::new(3, [11]);
        let b = DepthCadence::from_config(&CheckpointConfig {
            interval: 3,
            depth_thresholds: vec![11],
            ..Default::default()
        });
        assert_eq!(checkpointed_depths(&a, 200), checkpointed_depths(&b, 200));
        assert_eq!(checkpointed_depths(&a, 200), checkpointed_depths(&a, 200));
    }
}

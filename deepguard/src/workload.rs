//! Guarded recursive workloads

use deepguard_recursion::CheckpointStore;
use deepguard_recursion::EmergencyExit;
use deepguard_recursion::FrameEntry;
use deepguard_recursion::LoopDetection;
use deepguard_recursion::RecursionCheckpointManager;
use deepguard_recursion::RecursionContext;
use deepguard_recursion::RecursionFrame;
use deepguard_recursion::RecursionGuard;
use deepguard_recursion::Result;
use serde::Deserialize;
use serde::Serialize;
use std::collections::BTreeMap;
use tracing::warn;

/// Why a guarded computation stopped early
#[derive(Debug)]
pub enum Interrupt {
    /// Loop detected; the context was rolled back and every native frame
    /// above the restored depth returns without further work
    Aborted(EmergencyExit),
    /// The configured depth limit was reached
    TooDeep(usize),
}

/// How a guarded call finished
#[derive(Debug)]
pub enum Flow<T> {
    Done(T),
    Interrupted(Interrupt),
}

/// Unwrap a finished call or hand an interruption to our own caller
macro_rules! step {
    ($call:expr) => {
        match $call? {
            Flow::Done(value) => value,
            Flow::Interrupted(interrupt) => return Ok(Flow::Interrupted(interrupt)),
        }
    };
}

/// Memo table and call count of an Ackermann run
#[derive(Debug, Default, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AckermannMemo {
    pub memo: BTreeMap<(u64, u64), u64>,
    pub calls: u64,
}

/// Path walked through a successor graph
#[derive(Debug, Default, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WalkLog {
    pub visited: Vec<usize>,
}

/// Shared plumbing for one guarded computation
pub struct Guarded<'a, St> {
    pub manager: &'a RecursionCheckpointManager<St>,
    pub max_depth: usize,
}

impl<St: CheckpointStore> Guarded<'_, St> {
    /// Enter a frame, returning the guard to carry on with or the interruption
    /// to propagate
    async fn enter<S>(
        &self,
        frame: &RecursionFrame,
        ctx: &mut RecursionContext<S>,
        anchor: Option<&RecursionGuard>,
    ) -> Result<std::result::Result<RecursionGuard, Interrupt>>
    where
        S: Serialize + serde::de::DeserializeOwned,
    {
        if frame.depth > self.max_depth {
            return Ok(Err(Interrupt::TooDeep(frame.depth)));
        }

        match self.manager.enter_recursion_frame(frame, ctx).await? {
            FrameEntry::Continue(guard) => Ok(Ok(guard)),
            FrameEntry::LoopDetected { guard, detection } => {
                let exit = self.bail_out(ctx, anchor.unwrap_or(&guard), &detection).await?;
                Ok(Err(Interrupt::Aborted(exit)))
            }
        }
    }

    async fn bail_out<S>(
        &self,
        ctx: &mut RecursionContext<S>,
        guard: &RecursionGuard,
        detection: &LoopDetection,
    ) -> Result<EmergencyExit>
    where
        S: serde::de::DeserializeOwned,
    {
        warn!(
            "Loop signature {} seen {} times in the last {} frames, rolling back",
            detection.signature, detection.occurrences, detection.window_len
        );
        self.manager.emergency_exit(guard, ctx).await
    }

    /// Ackermann function with memoization; every non-memoized call is a frame
    pub async fn ackermann(
        &self,
        ctx: &mut RecursionContext<AckermannMemo>,
        anchor: Option<RecursionGuard>,
        m: u64,
        n: u64,
    ) -> Result<Flow<u64>> {
        if let Some(value) = ctx.state().memo.get(&(m, n)) {
            return Ok(Flow::Done(*value));
        }

        let frame = ctx.descend("ackermann", format!("[{m}, {n}]"));
        let guard = match self.enter(&frame, ctx, anchor.as_ref()).await? {
            Ok(guard) => guard,
            Err(interrupt) => return Ok(Flow::Interrupted(interrupt)),
        };
        ctx.state_mut().calls += 1;
        let anchor = anchor.or_else(|| guard.checkpoint().map(|_| guard.clone()));

        let value = if m == 0 {
            n + 1
        } else if n == 0 {
            step!(Box::pin(self.ackermann(ctx, anchor, m - 1, 1)).await)
        } else {
            let inner = step!(Box::pin(self.ackermann(ctx, anchor.clone(), m, n - 1)).await);
            step!(Box::pin(self.ackermann(ctx, anchor, m - 1, inner)).await)
        };

        ctx.state_mut().memo.insert((m, n), value);
        ctx.ascend();
        Ok(Flow::Done(value))
    }

    /// Follow `next` from `node` until it returns `None`; a cyclic successor
    /// function recurses until the guard stops it
    pub async fn walk(
        &self,
        ctx: &mut RecursionContext<WalkLog>,
        anchor: Option<RecursionGuard>,
        next: &(dyn Fn(usize) -> Option<usize> + Sync),
        node: usize,
    ) -> Result<Flow<usize>> {
        let frame = ctx.descend("walk", format!("[{node}]"));
        let guard = match self.enter(&frame, ctx, anchor.as_ref()).await? {
            Ok(guard) => guard,
            Err(interrupt) => return Ok(Flow::Interrupted(interrupt)),
        };
        ctx.state_mut().visited.push(node);
        let anchor = anchor.or_else(|| guard.checkpoint().map(|_| guard.clone()));

        let end = match next(node) {
            Some(successor) => step!(Box::pin(self.walk(ctx, anchor, next, successor)).await),
            None => node,
        };

        ctx.ascend();
        Ok(Flow::Done(end))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use deepguard_recursion::GuardConfig;
    use deepguard_recursion::MemoryCheckpointStore;
    use pretty_assertions::assert_eq;
    use std::sync::Arc;

    fn manager() -> RecursionCheckpointManager<MemoryCheckpointStore> {
        RecursionCheckpointManager::new(
            GuardConfig::default(),
            Arc::new(MemoryCheckpointStore::new()),
        )
    }

    #[tokio::test]
    async fn test_ackermann_values() {
        let manager = manager();
        let guarded = Guarded {
            manager: &manager,
            max_depth: 10_000,
        };

        for (m, n, expected) in [(0, 0, 1), (1, 2, 4), (2, 3, 9), (3, 3, 61)] {
            let mut ctx = manager.new_context(AckermannMemo::default());
            let Flow::Done(value) = guarded.ackermann(&mut ctx, None, m, n).await.unwrap() else {
                panic!("ackermann({m}, {n}) was interrupted");
            };
            assert_eq!(value, expected);
            assert_eq!(ctx.depth(), 0);
        }
        assert_eq!(manager.stats().loops_detected, 0);
    }

    #[tokio::test]
    async fn test_cycle_is_rolled_back_to_anchor() {
        let manager = manager();
        let guarded = Guarded {
            manager: &manager,
            max_depth: 10_000,
        };
        let mut ctx = manager.new_context(WalkLog::default());
        let next = |node: usize| Some((node + 1) % 3);

        let Flow::Interrupted(Interrupt::Aborted(exit)) = guarded.walk(&mut ctx, None, &next, 0).await.unwrap() else {
            panic!("cycle was not interrupted");
        };

        // First checkpoint is the cadence one at depth 10; node 0 repeats an
        // eleventh time at depth 31
        assert_eq!(exit.restoration.restored_depth, 10);
        assert_eq!(exit.unwind_frames, 21);
        assert_eq!(ctx.depth(), 10);
        assert_eq!(ctx.state().visited.len(), 9);
        assert_eq!(manager.stats().loops_detected, 1);
    }

    #[tokio::test]
    async fn test_walk_stops_at_depth_limit() {
        let manager = manager();
        let guarded = Guarded {
            manager: &manager,
            max_depth: 50,
        };
        let mut ctx = manager.new_context(WalkLog::default());
        let next = |node: usize| Some(node + 1);

        let flow = guarded.walk(&mut ctx, None, &next, 0).await.unwrap();
        assert!(matches!(flow, Flow::Interrupted(Interrupt::TooDeep(51))));
    }

    #[tokio::test]
    async fn test_acyclic_walk_finishes() {
        let manager = manager();
        let guarded = Guarded {
            manager: &manager,
            max_depth: 100,
        };
        let mut ctx = manager.new_context(WalkLog::default());
        let next = |node: usize| (node < 30).then_some(node + 1);

        let Flow::Done(end) = guarded.walk(&mut ctx, None, &next, 0).await.unwrap() else {
            panic!("walk was interrupted");
        };
        assert_eq!(end, 30);
        assert_eq!(ctx.state().visited, (0..=30).collect::<Vec<_>>());
        assert_eq!(ctx.depth(), 0);
    }
}

//! Retention policy for stored checkpoints

use crate::types::CheckpointId;
use crate::types::CheckpointSummary;
use chrono::DateTime;
use chrono::Utc;
use serde::Deserialize;
use serde::Serialize;

/// Bounds on how many checkpoints a context keeps in its store.
///
/// Both limits are optional; the default keeps everything. The protected
/// checkpoint (a context's latest) is never selected.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct RetentionPolicy {
    /// Keep at most this many checkpoints per context
    #[serde(default)]
    pub max_checkpoints: Option<usize>,

    /// Drop checkpoints older than this many seconds
    #[serde(default)]
    pub max_age_secs: Option<u64>,
}

impl RetentionPolicy {
    pub const fn keep_all() -> Self {
        Self {
            max_checkpoints: None,
            max_age_secs: None,
        }
    }

    pub const fn is_unbounded(&self) -> bool {
        self.max_checkpoints.is_none() && self.max_age_secs.is_none()
    }

    /// Pick the checkpoints to evict, oldest first
    pub fn select_evictions(
        &self,
        candidates: &[CheckpointSummary],
        protected: Option<CheckpointId>,
        now: DateTime<Utc>,
    ) -> Vec<CheckpointId> {
        let mut ordered: Vec<&CheckpointSummary> = candidates.iter().collect();
        ordered.sort_by_key(|summary| summary.created_at);

        let mut evicted = Vec::new();
        let mut survivors = Vec::with_capacity(ordered.len());

        for summary in ordered {
            let expired = self.max_age_secs.is_some_and(|max_age| {
                let age = now.signed_duration_since(summary.created_at);
                age.num_seconds() > i64::try_from(max_age).unwrap_or(i64::MAX)
            });

            if expired && Some(summary.id) != protected {
                evicted.push(summary.id);
            } else {
                survivors.push(summary);
            }
        }

        if let Some(max) = self.max_checkpoints {
            let mut excess = survivors.len().saturating_sub(max);
            for summary in survivors {
                if excess == 0 {
                    break;
                }
                if Some(summary.id) == protected {
                    continue;
                }
                evicted.push(summary.id);
                excess -= 1;
            }
        }

        evicted
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::integrity::IntegrityValidator;
    use crate::types::CheckpointTrigger;
    use crate::types::ContextId;
    use chrono::Duration;

    fn summaries(now: DateTime<Utc>, ages_secs: &[i64]) -> Vec<CheckpointSummary> {
        let context_id = ContextId::new();
        let digest = IntegrityValidator::new().hash(b"payload");
        ages_secs
            .iter()
            .enumerate()
            .map(|(i, age)| CheckpointSummary {
                id: CheckpointId::new(),
                context_id,
                created_at: now - Duration::seconds(*age),
                depth: i * 10,
                trigger: CheckpointTrigger::Cadence,
                payload_len: 7,
                digest,
            })
            .collect()
    }

    #[test]
    fn test_keep_all_selects_nothing() {
        let now = Utc::now();
        let candidates = summaries(now, &[500, 400, 300]);
        assert!(RetentionPolicy::keep_all().is_unbounded());
        assert!(
            RetentionPolicy::keep_all()
                .select_evictions(&candidates, None, now)
                .is_empty()
        );
    }

    #[test]
    fn test_count_limit_evicts_oldest() {
        let now = Utc::now();
        let candidates = summaries(now, &[10, 50, 30, 20]);
        let policy = RetentionPolicy {
            max_checkpoints: Some(2),
            max_age_secs: None,
        };

        let evicted = policy.select_evictions(&candidates, None, now);
        assert_eq!(evicted, vec![candidates[1].id, candidates[2].id]);
    }

    #[test]
    fn test_protected_checkpoint_survives() {
        let now = Utc::now();
        let candidates = summaries(now, &[300, 200, 100]);
        let policy = RetentionPolicy {
            max_checkpoints: Some(1),
            max_age_secs: Some(60),
        };

        let protected = candidates[0].id;
        let evicted = policy.select_evictions(&candidates, Some(protected), now);
        assert_eq!(evicted, vec![candidates[1].id, candidates[2].id]);
    }

    #[test]
    fn test_age_limit() {
        let now = Utc::now();
        let candidates = summaries(now, &[3600, 30, 7200]);
        let policy = RetentionPolicy {
            max_checkpoints: None,
            max_age_secs: Some(600),
        };

        let evicted = policy.select_evictions(&candidates, None, now);
        assert_eq!(evicted, vec![candidates[2].id, candidates[0].id]);
    }
}

//! Checkpoint metadata annotations

use crate::types::CheckpointTrigger;
use crate::types::ContextId;
use std::collections::BTreeMap;

/// What a metadata extractor gets to see about the context being captured
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CaptureInfo {
    pub context_id: ContextId,
    pub depth: usize,
    pub window_len: usize,
    pub frames_observed: u64,
    pub checkpoints_taken: usize,
    pub trigger: CheckpointTrigger,
}

/// Produces the key/value annotations stored with each checkpoint
pub trait MetadataExtractor: Send + Sync {
    fn extract(&self, info: &CaptureInfo) -> BTreeMap<String, String>;
}

impl<F> MetadataExtractor for F
where
    F: Fn(&CaptureInfo) -> BTreeMap<String, String> + Send + Sync,
{
    fn extract(&self, info: &CaptureInfo) -> BTreeMap<String, String> {
        self(info)
    }
}

/// Frame and checkpoint counts
#[derive(Debug, Clone, Copy, Default)]
pub struct FrameCountMetadata;

impl MetadataExtractor for FrameCountMetadata {
    fn extract(&self, info: &CaptureInfo) -> BTreeMap<String, String> {
        BTreeMap::from([
            ("trigger".to_string(), info.trigger.to_string()),
            ("window_frames".to_string(), info.window_len.to_string()),
            ("frames_observed".to_string(), info.frames_observed.to_string()),
            (
                "checkpoints_taken".to_string(),
                info.checkpoints_taken.to_string(),
            ),
        ])
    }
}

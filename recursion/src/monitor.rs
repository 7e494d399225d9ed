//! Repeated-frame (infinite loop) detection over the recent-frame window

use crate::config::MonitorConfig;
use crate::types::FrameSignature;
use crate::types::LoopDetection;
use crate::types::Recommendation;
use crate::types::RecursionFrame;
use crate::window::FrameWindow;
use crate::window::WindowEntry;
use sha2::Digest;
use sha2::Sha256;
use std::sync::Arc;

/// Derives the identity of a frame for cycle detection.
///
/// Implementations must ignore incidental fields (frame id, timestamps) or no
/// two frames would ever match. Any `Fn(&RecursionFrame) -> FrameSignature`
/// closure is a signer.
pub trait FrameSigner: Send + Sync {
    fn signature(&self, frame: &RecursionFrame) -> FrameSignature;
}

impl<F> FrameSigner for F
where
    F: Fn(&RecursionFrame) -> FrameSignature + Send + Sync,
{
    fn signature(&self, frame: &RecursionFrame) -> FrameSignature {
        self(frame)
    }
}

/// SHA-256 over the function name and its normalized arguments.
///
/// Depth is left out: the same call at ever-increasing depth is exactly the
/// runaway pattern being looked for.
#[derive(Debug, Clone, Copy, Default)]
pub struct Sha256FrameSigner;

impl Sha256FrameSigner {
    fn normalize_args(args: &str) -> String {
        serde_json::from_str::<serde_json::Value>(args)
            .map(|value| value.to_string())
            .unwrap_or_else(|_| args.trim().to_string())
    }
}

impl FrameSigner for Sha256FrameSigner {
    fn signature(&self, frame: &RecursionFrame) -> FrameSignature {
        let normalized_args = Self::normalize_args(&frame.arguments);
        let mut hasher = Sha256::new();
        hasher.update(frame.function.as_bytes());
        hasher.update(b":");
        hasher.update(normalized_args.as_bytes());
        FrameSignature::new(format!("{:x}", hasher.finalize()))
    }
}

/// Counts signature repetitions within a context's frame window
#[derive(Clone)]
pub struct RecursionMonitor {
    config: MonitorConfig,
    signer: Arc<dyn FrameSigner>,
}

impl RecursionMonitor {
    pub fn new(config: MonitorConfig) -> Self {
        Self::with_signer(config, Arc::new(Sha256FrameSigner))
    }

    pub fn with_signer(config: MonitorConfig, signer: Arc<dyn FrameSigner>) -> Self {
        Self { config, signer }
    }

    pub const fn config(&self) -> &MonitorConfig {
        &self.config
    }

    pub fn signature(&self, frame: &RecursionFrame) -> FrameSignature {
        self.signer.signature(frame)
    }

    /// Append `frame` to `window` and judge it against what the window holds
    pub fn observe(&self, frame: &RecursionFrame, window: &mut FrameWindow) -> LoopDetection {
        let signature = self.signature(frame);
        window.push(WindowEntry {
            signature: signature.clone(),
            frame: frame.clone(),
        });
        self.assess(signature, window)
    }

    /// Judge a signature against the window without modifying it
    pub fn assess(&self, signature: FrameSignature, window: &FrameWindow) -> LoopDetection {
        let occurrences = window.count(&signature);
        let window_len = window.len();

        let confidence = if window_len == 0 {
            0.0
        } else {
            occurrences as f64 / window_len as f64
        };

        let recommendation = if occurrences > self.config.emergency_threshold {
            Recommendation::CreateEmergencyCheckpoint
        } else {
            Recommendation::Continue
        };

        LoopDetection {
            detected: occurrences > self.config.repetition_threshold,
            signature,
            occurrences,
            window_len,
            confidence,
            recommendation,
        }
    }
}

impl std::fmt::Debug for RecursionMonitor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RecursionMonitor")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

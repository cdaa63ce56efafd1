use crate::error::Result;
use crate::frame::CapturedFrame;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// One detection from the deep-inference capability
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Detection {
    pub label: String,
    pub confidence: f32,
    /// Bounding box as (x, y, width, height) in frame pixels
    pub bbox: (i32, i32, u32, u32),
}

/// Result of running inference on one frame
#[derive(Debug, Clone, Default)]
pub struct InferenceOutcome {
    pub detections: Vec<Detection>,
    /// Annotated copy of the frame for the alert payload, when the backend renders one
    pub annotated_jpeg: Option<Vec<u8>>,
}

/// Opaque deep-inference capability: frame in, detections out
///
/// The model itself (YOLO or otherwise) lives outside this crate. Workers
/// treat failures as "no detection" so a flaky backend cannot destabilize
/// the read loop.
#[async_trait]
pub trait ObjectDetector: Send + Sync {
    async fn detect(&self, frame: &CapturedFrame) -> Result<InferenceOutcome>;
}

/// Detector used when no inference backend is wired in; never detects
pub struct NullDetector;

#[async_trait]
impl ObjectDetector for NullDetector {
    async fn detect(&self, _frame: &CapturedFrame) -> Result<InferenceOutcome> {
        Ok(InferenceOutcome::default())
    }
}

impl InferenceOutcome {
    /// Detections at or above the configured confidence threshold
    pub fn confident(&self, threshold: f32) -> usize {
        self.detections
            .iter()
            .filter(|d| d.confidence >= threshold)
            .count()
    }
}

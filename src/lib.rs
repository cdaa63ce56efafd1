pub mod api;
pub mod camera;
pub mod config;
pub mod error;
pub mod events;
pub mod frame;
pub mod inference;
pub mod metrics;
pub mod motion;
pub mod pipeline;
pub mod registry;
pub mod ring_buffer;
pub mod snapshot;
pub mod source;
pub mod worker;

pub use api::{ApiServer, ServerState};
pub use camera::{Camera, CameraSpec, CameraStatus, CameraView};
pub use config::CamhubConfig;
pub use error::{CamhubError, Result};
pub use events::{CameraEvent, EventBus};
pub use frame::{CapturedFrame, SourceKind, StreamMetadata};
pub use inference::{Detection, InferenceOutcome, NullDetector, ObjectDetector};
pub use metrics::IngestMetrics;
pub use motion::MotionDetector;
pub use pipeline::FramePipeline;
pub use registry::CameraRegistry;
pub use ring_buffer::{FrameRing, FrameRingStatsSnapshot};
pub use snapshot::SnapshotStore;
pub use source::{FrameStream, MjpegHttpOpener, StreamLocator, StreamOpener};
pub use worker::CameraWorker;

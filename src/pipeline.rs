use crate::config::{EventConfig, InferenceConfig, MotionConfig};
use crate::events::{CameraEvent, EventBus};
use crate::frame::CapturedFrame;
use crate::inference::ObjectDetector;
use crate::metrics::IngestMetrics;
use crate::motion::MotionDetector;
use crate::ring_buffer::FrameRing;
use crate::snapshot::SnapshotStore;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::Mutex;
use tracing::{debug, warn};

/// Per-camera frame processing: every ingested frame flows through here,
/// whether it was pulled by a worker's read loop or pushed over HTTP.
///
/// Owns the gating state (event throttle, frame-skip counter, motion
/// detector, cooldowns) behind one lock, which also serializes frames so
/// they are processed strictly in arrival order per camera.
pub struct FramePipeline {
    camera_id: String,
    ring: Arc<FrameRing>,
    bus: EventBus,
    metrics: Arc<IngestMetrics>,
    snapshots: Arc<SnapshotStore>,
    detector: Option<Arc<dyn ObjectDetector>>,
    events_config: EventConfig,
    inference_config: InferenceConfig,
    frame_skip: u32,
    state: Mutex<GateState>,
}

/// Mutable gating state, transitioned one frame at a time
struct GateState {
    closed: bool,
    last_frame_event: Option<Instant>,
    frame_counter: u32,
    motion: MotionDetector,
    inference_cooldown_until: Option<Instant>,
    person_cooldown_until: Option<Instant>,
}

impl FramePipeline {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        camera_id: String,
        ring: Arc<FrameRing>,
        bus: EventBus,
        metrics: Arc<IngestMetrics>,
        snapshots: Arc<SnapshotStore>,
        detector: Option<Arc<dyn ObjectDetector>>,
        events_config: EventConfig,
        motion_config: MotionConfig,
        inference_config: InferenceConfig,
    ) -> Self {
        let frame_skip = motion_config.frame_skip;
        Self {
            camera_id,
            ring,
            bus,
            metrics,
            snapshots,
            detector,
            events_config,
            inference_config,
            frame_skip,
            state: Mutex::new(GateState {
                closed: false,
                last_frame_event: None,
                frame_counter: 0,
                motion: MotionDetector::new(motion_config),
                inference_cooldown_until: None,
                person_cooldown_until: None,
            }),
        }
    }

    pub fn ring(&self) -> &Arc<FrameRing> {
        &self.ring
    }

    /// Refuse further frames; returns only once any in-flight `process`
    /// call has released the gate lock
    pub async fn close(&self) {
        self.state.lock().await.closed = true;
    }

    /// Accept frames again after a `close`
    pub async fn reopen(&self) {
        self.state.lock().await.closed = false;
    }

    /// Process one frame through the shared contract
    ///
    /// Frames arriving after `close` are dropped; a caller's running check
    /// alone cannot rule out a concurrent worker stop.
    pub async fn process(&self, frame: CapturedFrame) {
        let mut state = self.state.lock().await;
        if state.closed {
            debug!("Pipeline for {} is closed, dropping frame", self.camera_id);
            return;
        }
        let now = Instant::now();

        self.ring.push(frame.clone()).await;

        self.metrics
            .increment_frames_ingested(&self.camera_id, frame.source.as_str());
        self.metrics
            .set_last_frame_timestamp(&self.camera_id, frame.unix_timestamp());

        // frame.ingested is rate-limited so subscribers are not flooded at
        // full capture rate
        let due = state.last_frame_event.map_or(true, |last| {
            now.duration_since(last) > self.events_config.frame_publish_interval()
        });
        if due {
            state.last_frame_event = Some(now);
            self.bus.publish(CameraEvent::FrameIngested {
                camera_id: self.camera_id.clone(),
                timestamp: frame.timestamp,
                source: frame.source,
            });
        }

        if !self.inference_config.enabled || self.detector.is_none() {
            return;
        }

        // Subsample: only one frame out of every frame_skip+1 is analyzed
        state.frame_counter += 1;
        if state.frame_counter <= self.frame_skip {
            return;
        }
        state.frame_counter = 0;

        if state
            .inference_cooldown_until
            .map_or(false, |until| now < until)
        {
            return;
        }

        let prepared = state.motion.prepare(&frame.image);
        let Some(area) = state.motion.detect(prepared, now) else {
            return;
        };

        state.inference_cooldown_until = Some(now + self.inference_config.trigger_cooldown());
        self.metrics.increment_motion_detected(&self.camera_id);
        self.bus.publish(CameraEvent::MotionDetected {
            camera_id: self.camera_id.clone(),
            area,
            timestamp: frame.timestamp,
        });

        if state
            .person_cooldown_until
            .map_or(false, |until| now < until)
        {
            debug!(
                "Person cooldown active on {}, skipping inference",
                self.camera_id
            );
            return;
        }

        self.run_inference(&mut state, &frame, now).await;
    }

    /// Hand the frame to the deep-inference capability and publish a
    /// person.detected event on a confident hit. Failures count as
    /// "no detection".
    async fn run_inference(&self, state: &mut GateState, frame: &CapturedFrame, now: Instant) {
        let detector = match &self.detector {
            Some(detector) => Arc::clone(detector),
            None => return,
        };

        let outcome = match detector.detect(frame).await {
            Ok(outcome) => outcome,
            Err(e) => {
                warn!("Inference failed on {}: {}", self.camera_id, e);
                return;
            }
        };

        let count = outcome.confident(self.inference_config.confidence_threshold);
        if count == 0 {
            return;
        }

        state.person_cooldown_until = Some(now + self.inference_config.person_cooldown());

        let snapshot_id = match outcome.annotated_jpeg {
            Some(jpeg) => Some(self.snapshots.insert(jpeg)),
            None => match frame.to_jpeg() {
                Ok(jpeg) => Some(self.snapshots.insert(jpeg)),
                Err(e) => {
                    warn!("Failed to encode alert snapshot for {}: {}", self.camera_id, e);
                    None
                }
            },
        };

        self.bus.publish(CameraEvent::PersonDetected {
            camera_id: self.camera_id.clone(),
            count,
            snapshot_id,
            timestamp: frame.timestamp,
        });
    }
}

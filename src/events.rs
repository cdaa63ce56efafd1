use crate::frame::SourceKind;
use serde::{Deserialize, Serialize};
use std::time::SystemTime;
use tokio::sync::broadcast;
use tracing::{debug, info, warn};

/// Typed events published per camera
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "event_type", rename_all = "snake_case")]
pub enum CameraEvent {
    /// The worker opened its source successfully
    #[serde(rename = "camera.connected")]
    Connected {
        camera_id: String,
        timestamp: SystemTime,
        width: Option<u32>,
        height: Option<u32>,
        fps: Option<f64>,
    },
    /// The source failed to open or died mid-stream
    #[serde(rename = "camera.disconnected")]
    Disconnected {
        camera_id: String,
        reason: String,
        timestamp: SystemTime,
    },
    /// A frame entered the ring buffer (rate-limited per camera)
    #[serde(rename = "frame.ingested")]
    FrameIngested {
        camera_id: String,
        timestamp: SystemTime,
        source: SourceKind,
    },
    /// The cheap motion detector fired
    #[serde(rename = "motion.detected")]
    MotionDetected {
        camera_id: String,
        area: u32,
        timestamp: SystemTime,
    },
    /// Deep inference confirmed at least one person
    #[serde(rename = "person.detected")]
    PersonDetected {
        camera_id: String,
        count: usize,
        snapshot_id: Option<String>,
        timestamp: SystemTime,
    },
}

impl CameraEvent {
    pub fn camera_id(&self) -> &str {
        match self {
            CameraEvent::Connected { camera_id, .. } => camera_id,
            CameraEvent::Disconnected { camera_id, .. } => camera_id,
            CameraEvent::FrameIngested { camera_id, .. } => camera_id,
            CameraEvent::MotionDetected { camera_id, .. } => camera_id,
            CameraEvent::PersonDetected { camera_id, .. } => camera_id,
        }
    }

    /// Channel key the event is published under
    pub fn channel(&self) -> String {
        format!("camera:{}", self.camera_id())
    }

    pub fn timestamp(&self) -> SystemTime {
        match self {
            CameraEvent::Connected { timestamp, .. } => *timestamp,
            CameraEvent::Disconnected { timestamp, .. } => *timestamp,
            CameraEvent::FrameIngested { timestamp, .. } => *timestamp,
            CameraEvent::MotionDetected { timestamp, .. } => *timestamp,
            CameraEvent::PersonDetected { timestamp, .. } => *timestamp,
        }
    }

    /// Event kind as a string for filtering and logging
    pub fn event_type(&self) -> &'static str {
        match self {
            CameraEvent::Connected { .. } => "camera.connected",
            CameraEvent::Disconnected { .. } => "camera.disconnected",
            CameraEvent::FrameIngested { .. } => "frame.ingested",
            CameraEvent::MotionDetected { .. } => "motion.detected",
            CameraEvent::PersonDetected { .. } => "person.detected",
        }
    }
}

/// Best-effort broadcast bus fanning events out to independent consumers
///
/// Publication never blocks and never fails into the caller: a publish with
/// no subscribers, or one that overruns a slow subscriber's queue, is the
/// subscriber's problem, not the worker's.
pub struct EventBus {
    sender: broadcast::Sender<CameraEvent>,
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    /// Subscribe to all events; callers filter by channel key as needed
    pub fn subscribe(&self) -> broadcast::Receiver<CameraEvent> {
        self.sender.subscribe()
    }

    /// Publish an event, fire-and-forget; returns the subscriber count reached
    pub fn publish(&self, event: CameraEvent) -> usize {
        match &event {
            CameraEvent::Connected { camera_id, .. } => {
                info!("Camera {} connected", camera_id);
            }
            CameraEvent::Disconnected {
                camera_id, reason, ..
            } => {
                warn!("Camera {} disconnected: {}", camera_id, reason);
            }
            CameraEvent::MotionDetected {
                camera_id, area, ..
            } => {
                info!("Motion detected on {} (area {})", camera_id, area);
            }
            CameraEvent::PersonDetected {
                camera_id, count, ..
            } => {
                info!("Detected {} person(s) on {}", count, camera_id);
            }
            CameraEvent::FrameIngested { camera_id, .. } => {
                debug!("Frame ingested event for {}", camera_id);
            }
        }

        match self.sender.send(event) {
            Ok(receivers) => receivers,
            Err(_) => {
                // No subscribers; the event is simply dropped
                0
            }
        }
    }

    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl Clone for EventBus {
    fn clone(&self) -> Self {
        Self {
            sender: self.sender.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::time::{timeout, Duration};

    #[tokio::test]
    async fn test_publish_and_receive() {
        let bus = EventBus::new(16);
        let mut receiver = bus.subscribe();

        let reached = bus.publish(CameraEvent::MotionDetected {
            camera_id: "cam_1".to_string(),
            area: 2000,
            timestamp: SystemTime::now(),
        });
        assert_eq!(reached, 1);

        let event = timeout(Duration::from_millis(100), receiver.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(event.event_type(), "motion.detected");
        assert_eq!(event.camera_id(), "cam_1");
        assert_eq!(event.channel(), "camera:cam_1");
    }

    #[tokio::test]
    async fn test_publish_without_subscribers_does_not_fail() {
        let bus = EventBus::new(16);
        let reached = bus.publish(CameraEvent::Disconnected {
            camera_id: "cam_1".to_string(),
            reason: "stream closed".to_string(),
            timestamp: SystemTime::now(),
        });
        assert_eq!(reached, 0);
    }

    #[tokio::test]
    async fn test_multiple_subscribers_each_receive() {
        let bus = EventBus::new(16);
        let mut a = bus.subscribe();
        let mut b = bus.subscribe();
        assert_eq!(bus.subscriber_count(), 2);

        bus.publish(CameraEvent::FrameIngested {
            camera_id: "cam_2".to_string(),
            timestamp: SystemTime::now(),
            source: crate::frame::SourceKind::HttpPush,
        });

        for receiver in [&mut a, &mut b] {
            let event = timeout(Duration::from_millis(100), receiver.recv())
                .await
                .unwrap()
                .unwrap();
            assert_eq!(event.event_type(), "frame.ingested");
        }
    }

    #[test]
    fn test_event_serialization_carries_type_tag() {
        let event = CameraEvent::PersonDetected {
            camera_id: "cam_3".to_string(),
            count: 2,
            snapshot_id: Some("abc".to_string()),
            timestamp: SystemTime::UNIX_EPOCH,
        };
        let json = serde_json::to_string(&event).unwrap();
        assert!(json.contains("person.detected"));
        assert!(json.contains("cam_3"));
    }
}

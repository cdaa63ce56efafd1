use crate::camera::{Camera, CameraSpec, CameraStatus, CameraView};
use crate::config::CamhubConfig;
use crate::error::{CamhubError, Result};
use crate::events::EventBus;
use crate::frame::SourceKind;
use crate::inference::ObjectDetector;
use crate::metrics::IngestMetrics;
use crate::pipeline::FramePipeline;
use crate::ring_buffer::FrameRing;
use crate::snapshot::SnapshotStore;
use crate::source::{StreamLocator, StreamOpener};
use crate::worker::CameraWorker;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{info, warn};

/// Supervisor owning all camera workers
///
/// All mutations go through one mutex so register/unregister for the same
/// identity can never interleave; at most one worker exists per camera id.
pub struct CameraRegistry {
    config: CamhubConfig,
    bus: EventBus,
    metrics: Arc<IngestMetrics>,
    snapshots: Arc<SnapshotStore>,
    opener: Arc<dyn StreamOpener>,
    locator: Option<Arc<dyn StreamLocator>>,
    detector: Option<Arc<dyn ObjectDetector>>,
    entries: Mutex<HashMap<String, Arc<CameraWorker>>>,
}

impl CameraRegistry {
    pub fn new(
        config: CamhubConfig,
        bus: EventBus,
        metrics: Arc<IngestMetrics>,
        snapshots: Arc<SnapshotStore>,
        opener: Arc<dyn StreamOpener>,
        locator: Option<Arc<dyn StreamLocator>>,
        detector: Option<Arc<dyn ObjectDetector>>,
    ) -> Self {
        Self {
            config,
            bus,
            metrics,
            snapshots,
            opener,
            locator,
            detector,
            entries: Mutex::new(HashMap::new()),
        }
    }

    pub fn bus(&self) -> &EventBus {
        &self.bus
    }

    pub fn metrics(&self) -> &Arc<IngestMetrics> {
        &self.metrics
    }

    pub fn snapshots(&self) -> &Arc<SnapshotStore> {
        &self.snapshots
    }

    /// Register a camera and start its worker. Re-registering an existing id
    /// fully stops the previous worker before the replacement starts.
    pub async fn register(&self, spec: CameraSpec) -> Result<CameraView> {
        spec.validate()?;

        let url = self.resolve_url(&spec).await?;

        let mut entries = self.entries.lock().await;

        if let Some(existing) = entries.remove(&spec.id) {
            warn!("Replacing existing worker for camera {}", spec.id);
            existing.stop().await;
        }

        let camera = Arc::new(Camera::new(spec));
        let pipeline = Arc::new(FramePipeline::new(
            camera.id().to_string(),
            Arc::new(FrameRing::new(self.config.buffer.capacity)),
            self.bus.clone(),
            Arc::clone(&self.metrics),
            Arc::clone(&self.snapshots),
            self.detector.clone(),
            self.config.events.clone(),
            self.config.motion.clone(),
            self.config.inference.clone(),
        ));
        let worker = Arc::new(CameraWorker::new(
            Arc::clone(&camera),
            url,
            pipeline,
            self.bus.clone(),
            Arc::clone(&self.metrics),
            Arc::clone(&self.opener),
            self.config.worker.clone(),
        ));

        worker.start().await;
        let view = camera.view();
        entries.insert(camera.id().to_string(), worker);

        info!("Registered camera {} ({})", view.id, view.source);
        Ok(view)
    }

    /// Stop and remove a camera; `false` when the id was never registered
    pub async fn unregister(&self, camera_id: &str) -> bool {
        let removed = self.entries.lock().await.remove(camera_id);
        match removed {
            Some(worker) => {
                worker.stop().await;
                worker.camera().set_status(CameraStatus::Disconnected);
                self.metrics.set_camera_status(camera_id, false);
                info!("Unregistered camera {}", camera_id);
                true
            }
            None => false,
        }
    }

    pub async fn get(&self, camera_id: &str) -> Option<Arc<CameraWorker>> {
        self.entries.lock().await.get(camera_id).cloned()
    }

    pub async fn list(&self) -> Vec<CameraView> {
        let entries = self.entries.lock().await;
        let mut views: Vec<CameraView> = entries
            .values()
            .map(|worker| worker.camera().view())
            .collect();
        views.sort_by(|a, b| a.id.cmp(&b.id));
        views
    }

    /// Stop every worker; used on shutdown
    pub async fn stop_all(&self) {
        let workers: Vec<Arc<CameraWorker>> =
            self.entries.lock().await.values().cloned().collect();
        for worker in workers {
            worker.stop().await;
        }
        info!("All camera workers stopped");
    }

    async fn resolve_url(&self, spec: &CameraSpec) -> Result<Option<String>> {
        match spec.source {
            SourceKind::HttpPush => Ok(None),
            SourceKind::Rtsp | SourceKind::Mjpeg => Ok(spec.source_url.clone()),
            SourceKind::Onvif => {
                let locator = self.locator.as_ref().ok_or_else(|| {
                    CamhubError::validation("No discovery backend configured for onvif sources")
                })?;
                let url = locator.resolve(spec).await?;
                Ok(Some(url))
            }
        }
    }
}

use prometheus::{CounterVec, Encoder, GaugeVec, Opts, Registry, TextEncoder};
use tracing::warn;

/// Prometheus sink for the ingest pipeline
///
/// Workers update these on every frame and status transition; the `/metrics`
/// endpoint exposes the text encoding.
pub struct IngestMetrics {
    camera_status: GaugeVec,
    frames_ingested: CounterVec,
    motion_detected: CounterVec,
    last_frame_timestamp: GaugeVec,
    registry: Registry,
}

impl IngestMetrics {
    pub fn new() -> Result<Self, prometheus::Error> {
        let registry = Registry::new();

        let camera_status = GaugeVec::new(
            Opts::new(
                "camera_ingest_status",
                "Current connection status of the camera (0=disconnected, 1=connected)",
            ),
            &["camera_id"],
        )?;
        registry.register(Box::new(camera_status.clone()))?;

        let frames_ingested = CounterVec::new(
            Opts::new(
                "camera_ingest_frames_total",
                "Total number of frames ingested from all sources",
            ),
            &["camera_id", "source"],
        )?;
        registry.register(Box::new(frames_ingested.clone()))?;

        let motion_detected = CounterVec::new(
            Opts::new(
                "camera_ingest_motion_total",
                "Total number of motion detection events",
            ),
            &["camera_id"],
        )?;
        registry.register(Box::new(motion_detected.clone()))?;

        let last_frame_timestamp = GaugeVec::new(
            Opts::new(
                "camera_ingest_last_frame_timestamp",
                "Unix timestamp of the last ingested frame",
            ),
            &["camera_id"],
        )?;
        registry.register(Box::new(last_frame_timestamp.clone()))?;

        Ok(Self {
            camera_status,
            frames_ingested,
            motion_detected,
            last_frame_timestamp,
            registry,
        })
    }

    pub fn set_camera_status(&self, camera_id: &str, connected: bool) {
        self.camera_status
            .with_label_values(&[camera_id])
            .set(if connected { 1.0 } else { 0.0 });
    }

    pub fn increment_frames_ingested(&self, camera_id: &str, source: &str) {
        self.frames_ingested
            .with_label_values(&[camera_id, source])
            .inc();
    }

    pub fn increment_motion_detected(&self, camera_id: &str) {
        self.motion_detected.with_label_values(&[camera_id]).inc();
    }

    pub fn set_last_frame_timestamp(&self, camera_id: &str, unix_timestamp: f64) {
        self.last_frame_timestamp
            .with_label_values(&[camera_id])
            .set(unix_timestamp);
    }

    pub fn frames_ingested_count(&self, camera_id: &str, source: &str) -> u64 {
        self.frames_ingested
            .with_label_values(&[camera_id, source])
            .get() as u64
    }

    /// Latest metrics in Prometheus text exposition format
    pub fn export(&self) -> String {
        let encoder = TextEncoder::new();
        let families = self.registry.gather();
        let mut buf = Vec::new();
        if let Err(e) = encoder.encode(&families, &mut buf) {
            warn!("Failed to encode metrics: {}", e);
            return String::new();
        }
        String::from_utf8(buf).unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_counters_and_gauges() {
        let metrics = IngestMetrics::new().unwrap();

        metrics.set_camera_status("cam_1", true);
        metrics.increment_frames_ingested("cam_1", "rtsp");
        metrics.increment_frames_ingested("cam_1", "rtsp");
        metrics.increment_motion_detected("cam_1");
        metrics.set_last_frame_timestamp("cam_1", 1_700_000_000.0);

        assert_eq!(metrics.frames_ingested_count("cam_1", "rtsp"), 2);
        assert_eq!(metrics.frames_ingested_count("cam_1", "mjpeg"), 0);
    }

    #[test]
    fn test_export_contains_metric_names() {
        let metrics = IngestMetrics::new().unwrap();
        metrics.set_camera_status("cam_1", false);
        metrics.increment_frames_ingested("cam_1", "http_push");

        let text = metrics.export();
        assert!(text.contains("camera_ingest_status"));
        assert!(text.contains("camera_ingest_frames_total"));
        assert!(text.contains("cam_1"));
    }
}

use crate::camera::{Camera, CameraStatus};
use crate::config::WorkerConfig;
use crate::error::{CamhubError, Result};
use crate::events::{CameraEvent, EventBus};
use crate::frame::{CapturedFrame, StreamMetadata};
use crate::metrics::IngestMetrics;
use crate::pipeline::FramePipeline;
use crate::source::StreamOpener;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, SystemTime};
use tokio::time::sleep;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

/// Per-camera worker owning the source connection lifecycle
///
/// Pull cameras get a read-loop task that connects, reads frames into the
/// shared pipeline and reconnects with capped exponential backoff. Push
/// cameras have no task of their own; frames arrive through `ingest`.
/// At most one read loop exists per worker; `stop` is idempotent and
/// guarantees no frame processing is in flight once it returns.
pub struct CameraWorker {
    camera: Arc<Camera>,
    /// Resolved stream URL; `None` for push sources
    url: Option<String>,
    pipeline: Arc<FramePipeline>,
    bus: EventBus,
    metrics: Arc<IngestMetrics>,
    opener: Arc<dyn StreamOpener>,
    config: WorkerConfig,
    running: AtomicBool,
    current_backoff_ms: AtomicU64,
    cancel: parking_lot::Mutex<CancellationToken>,
    task: tokio::sync::Mutex<Option<tokio::task::JoinHandle<()>>>,
}

impl CameraWorker {
    pub fn new(
        camera: Arc<Camera>,
        url: Option<String>,
        pipeline: Arc<FramePipeline>,
        bus: EventBus,
        metrics: Arc<IngestMetrics>,
        opener: Arc<dyn StreamOpener>,
        config: WorkerConfig,
    ) -> Self {
        let initial_ms = config.initial_reconnect().as_millis() as u64;
        Self {
            camera,
            url,
            pipeline,
            bus,
            metrics,
            opener,
            config,
            running: AtomicBool::new(false),
            current_backoff_ms: AtomicU64::new(initial_ms),
            cancel: parking_lot::Mutex::new(CancellationToken::new()),
            task: tokio::sync::Mutex::new(None),
        }
    }

    pub fn camera(&self) -> &Arc<Camera> {
        &self.camera
    }

    pub fn pipeline(&self) -> &Arc<FramePipeline> {
        &self.pipeline
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Current reconnect delay; observable for supervision
    pub fn current_backoff(&self) -> Duration {
        Duration::from_millis(self.current_backoff_ms.load(Ordering::SeqCst))
    }

    fn store_backoff(&self, backoff: Duration) {
        self.current_backoff_ms
            .store(backoff.as_millis() as u64, Ordering::SeqCst);
    }

    /// Start the worker; a no-op when already running
    pub async fn start(self: &Arc<Self>) {
        if self.running.swap(true, Ordering::SeqCst) {
            debug!("Worker {} already running", self.camera.id());
            return;
        }

        self.pipeline.reopen().await;

        if !self.camera.source().is_pull() {
            // Push workers have no connection of their own; they are live
            // as soon as they exist
            self.camera.set_status(CameraStatus::Connected);
            self.metrics.set_camera_status(self.camera.id(), true);
            info!("Push worker {} ready", self.camera.id());
            return;
        }

        let token = CancellationToken::new();
        *self.cancel.lock() = token.clone();

        let worker = Arc::clone(self);
        let handle = tokio::spawn(async move {
            worker.run_loop(token).await;
        });
        *self.task.lock().await = Some(handle);

        info!("Worker {} started", self.camera.id());
    }

    /// Stop the worker and wait for its task to terminate; idempotent
    pub async fn stop(&self) {
        if !self.running.swap(false, Ordering::SeqCst) {
            return;
        }

        self.cancel.lock().cancel();

        if let Some(handle) = self.task.lock().await.take() {
            if let Err(e) = handle.await {
                error!("Worker task for {} panicked: {}", self.camera.id(), e);
            }
        }

        // Closing the pipeline waits out any frame still mid-process and
        // drops frames from callers that passed the running check before
        // the flag flipped
        self.pipeline.close().await;

        info!("Worker {} stopped", self.camera.id());
    }

    /// Inject an externally pushed frame (push sources only)
    pub async fn ingest(&self, frame: CapturedFrame) -> Result<()> {
        if !self.is_running() {
            return Err(CamhubError::validation(format!(
                "Camera '{}' worker is not running",
                self.camera.id()
            )));
        }
        self.pipeline.process(frame).await;
        Ok(())
    }

    async fn run_loop(self: Arc<Self>, cancel: CancellationToken) {
        let mut backoff = self.config.initial_reconnect();
        self.store_backoff(backoff);

        while !cancel.is_cancelled() {
            if let Err(e) = self.run_once(&cancel, &mut backoff).await {
                // The loop must never die silently while marked running
                error!("Unexpected error in worker {} loop: {}", self.camera.id(), e);
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = sleep(self.config.error_pause()) => {}
                }
            }
        }

        self.running.store(false, Ordering::SeqCst);
        debug!("Worker {} read loop exited", self.camera.id());
    }

    /// One connect/stream cycle: open the source, then read until it dies
    /// or a stop is requested
    async fn run_once(&self, cancel: &CancellationToken, backoff: &mut Duration) -> Result<()> {
        let url = self
            .url
            .as_deref()
            .ok_or_else(|| CamhubError::system("Pull worker has no stream URL"))?;

        let mut stream = tokio::select! {
            _ = cancel.cancelled() => return Ok(()),
            result = self.opener.open(url) => match result {
                Ok(stream) => stream,
                Err(e) => {
                    self.handle_disconnect(format!("Failed to open stream: {}", e));

                    let delay = *backoff;
                    *backoff = (*backoff * 2).min(self.config.max_reconnect());
                    self.store_backoff(*backoff);

                    tokio::select! {
                        _ = cancel.cancelled() => {}
                        _ = sleep(delay) => {}
                    }
                    return Ok(());
                }
            }
        };

        *backoff = self.config.initial_reconnect();
        self.store_backoff(*backoff);
        self.handle_connect(stream.metadata());

        loop {
            tokio::select! {
                _ = cancel.cancelled() => return Ok(()),
                result = stream.next_frame() => match result {
                    Ok(image) => {
                        let frame = CapturedFrame::new(
                            image,
                            SystemTime::now(),
                            self.camera.source(),
                        );
                        self.pipeline.process(frame).await;
                    }
                    Err(e) => {
                        self.handle_disconnect(format!("Stream error: {}", e));
                        return Ok(());
                    }
                }
            }
        }
    }

    fn handle_connect(&self, metadata: StreamMetadata) {
        self.camera.set_status(CameraStatus::Connected);
        self.metrics.set_camera_status(self.camera.id(), true);
        self.bus.publish(CameraEvent::Connected {
            camera_id: self.camera.id().to_string(),
            timestamp: SystemTime::now(),
            width: metadata.width,
            height: metadata.height,
            fps: metadata.fps,
        });
    }

    fn handle_disconnect(&self, reason: String) {
        self.camera.set_status(CameraStatus::Disconnected);
        self.metrics.set_camera_status(self.camera.id(), false);
        self.bus.publish(CameraEvent::Disconnected {
            camera_id: self.camera.id().to_string(),
            reason,
            timestamp: SystemTime::now(),
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::camera::CameraSpec;
    use crate::config::CamhubConfig;
    use crate::frame::SourceKind;
    use crate::ring_buffer::FrameRing;
    use crate::snapshot::SnapshotStore;
    use crate::source::FrameStream;
    use async_trait::async_trait;
    use image::RgbImage;
    use tokio::sync::mpsc;
    use tokio::time::{timeout, Duration};

    /// Opener that always fails to connect
    struct DeadOpener;

    #[async_trait]
    impl StreamOpener for DeadOpener {
        async fn open(&self, _url: &str) -> Result<Box<dyn FrameStream>> {
            Err(CamhubError::source("connection refused"))
        }
    }

    /// Opener yielding frames from a channel; the stream dies when the
    /// sender is dropped
    struct ChannelOpener {
        receiver: parking_lot::Mutex<Option<mpsc::Receiver<RgbImage>>>,
    }

    struct ChannelStream {
        receiver: mpsc::Receiver<RgbImage>,
    }

    #[async_trait]
    impl StreamOpener for ChannelOpener {
        async fn open(&self, _url: &str) -> Result<Box<dyn FrameStream>> {
            let receiver = self
                .receiver
                .lock()
                .take()
                .ok_or_else(|| CamhubError::source("already opened"))?;
            Ok(Box::new(ChannelStream { receiver }))
        }
    }

    #[async_trait]
    impl FrameStream for ChannelStream {
        fn metadata(&self) -> StreamMetadata {
            StreamMetadata {
                width: Some(64),
                height: Some(48),
                fps: Some(15.0),
            }
        }

        async fn next_frame(&mut self) -> Result<RgbImage> {
            self.receiver
                .recv()
                .await
                .ok_or_else(|| CamhubError::source("stream closed"))
        }
    }

    /// Opener whose stream never yields; used to prove stop() does not
    /// wait out a blocked read
    struct StalledOpener;

    struct StalledStream;

    #[async_trait]
    impl StreamOpener for StalledOpener {
        async fn open(&self, _url: &str) -> Result<Box<dyn FrameStream>> {
            Ok(Box::new(StalledStream))
        }
    }

    #[async_trait]
    impl FrameStream for StalledStream {
        fn metadata(&self) -> StreamMetadata {
            StreamMetadata::default()
        }

        async fn next_frame(&mut self) -> Result<RgbImage> {
            futures::future::pending().await
        }
    }

    fn pull_camera(id: &str) -> Arc<Camera> {
        Arc::new(Camera::new(CameraSpec {
            id: id.to_string(),
            source: SourceKind::Mjpeg,
            source_url: Some("http://cam/stream".to_string()),
            host: None,
            onvif_port: 80,
            username: None,
            password: None,
        }))
    }

    fn push_camera(id: &str) -> Arc<Camera> {
        Arc::new(Camera::new(CameraSpec {
            id: id.to_string(),
            source: SourceKind::HttpPush,
            source_url: None,
            host: None,
            onvif_port: 80,
            username: None,
            password: None,
        }))
    }

    fn build_worker(
        camera: Arc<Camera>,
        opener: Arc<dyn StreamOpener>,
        bus: &EventBus,
    ) -> Arc<CameraWorker> {
        let config = CamhubConfig::default();
        let metrics = Arc::new(IngestMetrics::new().unwrap());
        let url = camera.spec.source_url.clone();
        let pipeline = Arc::new(FramePipeline::new(
            camera.id().to_string(),
            Arc::new(FrameRing::new(10)),
            bus.clone(),
            Arc::clone(&metrics),
            Arc::new(SnapshotStore::new(8)),
            None,
            config.events,
            config.motion,
            config.inference,
        ));
        Arc::new(CameraWorker::new(
            camera,
            url,
            pipeline,
            bus.clone(),
            metrics,
            opener,
            config.worker,
        ))
    }

    async fn wait_for_event(
        receiver: &mut tokio::sync::broadcast::Receiver<CameraEvent>,
        event_type: &str,
    ) -> CameraEvent {
        loop {
            let event = timeout(Duration::from_secs(2), receiver.recv())
                .await
                .expect("timed out waiting for event")
                .expect("bus closed");
            if event.event_type() == event_type {
                return event;
            }
        }
    }

    #[tokio::test]
    async fn test_open_failure_emits_disconnect_and_doubles_backoff() {
        let bus = EventBus::new(64);
        let mut receiver = bus.subscribe();
        let worker = build_worker(pull_camera("cam_a"), Arc::new(DeadOpener), &bus);

        assert_eq!(worker.current_backoff(), Duration::from_secs(1));
        worker.start().await;

        let event = wait_for_event(&mut receiver, "camera.disconnected").await;
        assert_eq!(event.camera_id(), "cam_a");
        assert_eq!(worker.camera().status(), CameraStatus::Disconnected);
        assert_eq!(worker.current_backoff(), Duration::from_secs(2));

        worker.stop().await;
        assert!(!worker.is_running());
    }

    #[tokio::test]
    async fn test_frames_flow_into_ring_and_connect_event_carries_metadata() {
        let bus = EventBus::new(64);
        let mut receiver = bus.subscribe();

        let (sender, channel_receiver) = mpsc::channel(8);
        let opener = Arc::new(ChannelOpener {
            receiver: parking_lot::Mutex::new(Some(channel_receiver)),
        });
        let worker = build_worker(pull_camera("cam_b"), opener, &bus);

        worker.start().await;

        let event = wait_for_event(&mut receiver, "camera.connected").await;
        match event {
            CameraEvent::Connected { width, height, fps, .. } => {
                assert_eq!(width, Some(64));
                assert_eq!(height, Some(48));
                assert_eq!(fps, Some(15.0));
            }
            other => panic!("expected connected event, got {:?}", other),
        }
        assert_eq!(worker.camera().status(), CameraStatus::Connected);

        for _ in 0..3 {
            sender.send(RgbImage::new(64, 48)).await.unwrap();
        }

        timeout(Duration::from_secs(2), async {
            while worker.pipeline().ring().len() < 3 {
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .expect("frames never reached the ring");

        // Dropping the sender kills the stream; the worker reports the
        // disconnect and goes back to connecting instead of dying
        drop(sender);
        let event = wait_for_event(&mut receiver, "camera.disconnected").await;
        assert_eq!(event.camera_id(), "cam_b");
        assert!(worker.is_running());

        worker.stop().await;
    }

    #[tokio::test]
    async fn test_stop_interrupts_blocked_read_promptly() {
        let bus = EventBus::new(64);
        let worker = build_worker(pull_camera("cam_c"), Arc::new(StalledOpener), &bus);

        worker.start().await;
        // Give the loop time to connect and block in next_frame
        tokio::time::sleep(Duration::from_millis(50)).await;

        timeout(Duration::from_millis(500), worker.stop())
            .await
            .expect("stop() blocked on a stalled read");
        assert!(!worker.is_running());
    }

    #[tokio::test]
    async fn test_stop_is_idempotent_and_restart_works() {
        let bus = EventBus::new(64);
        let worker = build_worker(pull_camera("cam_d"), Arc::new(DeadOpener), &bus);

        worker.start().await;
        worker.stop().await;
        worker.stop().await;
        assert!(!worker.is_running());

        worker.start().await;
        assert!(worker.is_running());
        worker.stop().await;
        assert!(!worker.is_running());
    }

    #[tokio::test]
    async fn test_push_worker_has_no_task_and_accepts_frames() {
        let bus = EventBus::new(64);
        let worker = build_worker(push_camera("cam_push"), Arc::new(DeadOpener), &bus);

        worker.start().await;
        assert!(worker.is_running());
        assert_eq!(worker.camera().status(), CameraStatus::Connected);

        let frame = CapturedFrame::new(
            RgbImage::new(32, 32),
            SystemTime::now(),
            SourceKind::HttpPush,
        );
        worker.ingest(frame).await.unwrap();
        assert_eq!(worker.pipeline().ring().len(), 1);

        worker.stop().await;

        let frame = CapturedFrame::new(
            RgbImage::new(32, 32),
            SystemTime::now(),
            SourceKind::HttpPush,
        );
        assert!(worker.ingest(frame).await.is_err());
    }

    #[tokio::test]
    async fn test_no_frame_is_processed_after_stop_returns() {
        let bus = EventBus::new(64);
        let worker = build_worker(push_camera("cam_race"), Arc::new(DeadOpener), &bus);

        worker.start().await;
        worker.stop().await;

        // A handler that read the running flag just before stop() would
        // land here; the pipeline refuses the frame regardless
        let frame = CapturedFrame::new(
            RgbImage::new(32, 32),
            SystemTime::now(),
            SourceKind::HttpPush,
        );
        worker.pipeline().process(frame).await;
        assert_eq!(worker.pipeline().ring().len(), 0);

        // A restart accepts frames again
        worker.start().await;
        let frame = CapturedFrame::new(
            RgbImage::new(32, 32),
            SystemTime::now(),
            SourceKind::HttpPush,
        );
        worker.ingest(frame).await.unwrap();
        assert_eq!(worker.pipeline().ring().len(), 1);
    }

    #[tokio::test]
    async fn test_backoff_resets_after_successful_connect() {
        let bus = EventBus::new(64);
        let mut receiver = bus.subscribe();

        let (sender, channel_receiver) = mpsc::channel(8);
        let opener = Arc::new(ChannelOpener {
            receiver: parking_lot::Mutex::new(Some(channel_receiver)),
        });
        let worker = build_worker(pull_camera("cam_e"), opener, &bus);

        worker.start().await;
        wait_for_event(&mut receiver, "camera.connected").await;
        assert_eq!(worker.current_backoff(), Duration::from_secs(1));

        drop(sender);
        wait_for_event(&mut receiver, "camera.disconnected").await;

        worker.stop().await;
    }
}

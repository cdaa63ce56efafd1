use crate::error::{CamhubError, Result};
use config::{Config, Environment, File};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use tracing::{debug, info};

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct CamhubConfig {
    pub server: ServerConfig,
    pub buffer: BufferConfig,
    pub events: EventConfig,
    pub motion: MotionConfig,
    pub inference: InferenceConfig,
    pub worker: WorkerConfig,
    pub stream: LiveStreamConfig,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct ServerConfig {
    /// IP address to bind to
    #[serde(default = "default_server_ip")]
    pub ip: String,

    /// Port to listen on
    #[serde(default = "default_server_port")]
    pub port: u16,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct BufferConfig {
    /// Per-camera ring buffer capacity (number of frames)
    #[serde(default = "default_ring_capacity")]
    pub capacity: usize,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct EventConfig {
    /// Event bus channel capacity
    #[serde(default = "default_bus_capacity")]
    pub bus_capacity: usize,

    /// Minimum interval between frame.ingested publications per camera, in seconds
    #[serde(default = "default_frame_publish_interval")]
    pub frame_publish_interval_secs: f64,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct MotionConfig {
    /// Per-pixel delta threshold for the binary motion mask
    #[serde(default = "default_delta_threshold")]
    pub delta_threshold: u8,

    /// Minimum connected-region area (pixels) to report motion
    #[serde(default = "default_min_area")]
    pub min_area: u32,

    /// Suppression window after a positive motion report, in seconds
    #[serde(default = "default_motion_cooldown")]
    pub cooldown_secs: f64,

    /// Analyze only one frame out of this many
    #[serde(default = "default_frame_skip")]
    pub frame_skip: u32,

    /// Gaussian blur sigma applied before differencing
    #[serde(default = "default_blur_sigma")]
    pub blur_sigma: f32,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct InferenceConfig {
    /// Whether motion escalates to the deep-inference capability
    #[serde(default = "default_inference_enabled")]
    pub enabled: bool,

    /// Minimum detection confidence to count
    #[serde(default = "default_confidence_threshold")]
    pub confidence_threshold: f32,

    /// Minimum interval between inference invocations per camera, in seconds
    #[serde(default = "default_trigger_cooldown")]
    pub trigger_cooldown_secs: f64,

    /// Minimum interval between person.detected events per camera, in seconds
    #[serde(default = "default_person_cooldown")]
    pub person_cooldown_secs: f64,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct WorkerConfig {
    /// Initial reconnect delay after a source failure, in seconds
    #[serde(default = "default_initial_reconnect")]
    pub initial_reconnect_secs: f64,

    /// Cap for the exponential reconnect backoff, in seconds
    #[serde(default = "default_max_reconnect")]
    pub max_reconnect_secs: f64,

    /// Pause after an unexpected error inside the run loop, in seconds
    #[serde(default = "default_error_pause")]
    pub error_pause_secs: f64,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct LiveStreamConfig {
    /// Maximum frame rate of the live MJPEG endpoint
    #[serde(default = "default_stream_max_fps")]
    pub max_fps: u32,
}

impl WorkerConfig {
    pub fn initial_reconnect(&self) -> Duration {
        Duration::from_secs_f64(self.initial_reconnect_secs)
    }

    pub fn max_reconnect(&self) -> Duration {
        Duration::from_secs_f64(self.max_reconnect_secs)
    }

    pub fn error_pause(&self) -> Duration {
        Duration::from_secs_f64(self.error_pause_secs)
    }
}

impl MotionConfig {
    pub fn cooldown(&self) -> Duration {
        Duration::from_secs_f64(self.cooldown_secs)
    }
}

impl InferenceConfig {
    pub fn trigger_cooldown(&self) -> Duration {
        Duration::from_secs_f64(self.trigger_cooldown_secs)
    }

    pub fn person_cooldown(&self) -> Duration {
        Duration::from_secs_f64(self.person_cooldown_secs)
    }
}

impl EventConfig {
    pub fn frame_publish_interval(&self) -> Duration {
        Duration::from_secs_f64(self.frame_publish_interval_secs)
    }
}

impl CamhubConfig {
    /// Load configuration from default sources (file + environment variables)
    pub fn load() -> Result<Self> {
        Self::load_from_file("camhub.toml")
    }

    /// Load configuration from a specific file path
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path_str = path.as_ref().to_string_lossy();
        debug!("Loading configuration from: {}", path_str);

        let settings = Config::builder()
            .set_default("server.ip", default_server_ip())?
            .set_default("server.port", default_server_port() as i64)?
            .set_default("buffer.capacity", default_ring_capacity() as i64)?
            .set_default("events.bus_capacity", default_bus_capacity() as i64)?
            .set_default(
                "events.frame_publish_interval_secs",
                default_frame_publish_interval(),
            )?
            .set_default("motion.delta_threshold", default_delta_threshold() as i64)?
            .set_default("motion.min_area", default_min_area() as i64)?
            .set_default("motion.cooldown_secs", default_motion_cooldown())?
            .set_default("motion.frame_skip", default_frame_skip() as i64)?
            .set_default("motion.blur_sigma", default_blur_sigma() as f64)?
            .set_default("inference.enabled", default_inference_enabled())?
            .set_default(
                "inference.confidence_threshold",
                default_confidence_threshold() as f64,
            )?
            .set_default("inference.trigger_cooldown_secs", default_trigger_cooldown())?
            .set_default("inference.person_cooldown_secs", default_person_cooldown())?
            .set_default("worker.initial_reconnect_secs", default_initial_reconnect())?
            .set_default("worker.max_reconnect_secs", default_max_reconnect())?
            .set_default("worker.error_pause_secs", default_error_pause())?
            .set_default("stream.max_fps", default_stream_max_fps() as i64)?
            .add_source(File::with_name(&path_str).required(false))
            .add_source(Environment::with_prefix("CAMHUB").separator("_"))
            .build()?;

        let config: CamhubConfig = settings.try_deserialize()?;

        info!("Configuration loaded successfully");
        debug!("Final configuration: {:#?}", config);

        Ok(config)
    }

    /// Validate configuration values
    pub fn validate(&self) -> Result<()> {
        if self.buffer.capacity == 0 {
            return Err(CamhubError::validation(
                "Ring buffer capacity must be greater than 0",
            ));
        }

        if self.events.bus_capacity == 0 {
            return Err(CamhubError::validation(
                "Event bus capacity must be greater than 0",
            ));
        }

        if self.motion.frame_skip == 0 {
            return Err(CamhubError::validation(
                "Motion frame_skip must be greater than 0",
            ));
        }

        if self.motion.min_area == 0 {
            return Err(CamhubError::validation(
                "Motion min_area must be greater than 0",
            ));
        }

        if self.stream.max_fps == 0 {
            return Err(CamhubError::validation(
                "Stream max_fps must be greater than 0",
            ));
        }

        // Every seconds field is converted with from_secs_f64 later; reject
        // values that conversion cannot represent
        for (name, value) in [
            (
                "events.frame_publish_interval_secs",
                self.events.frame_publish_interval_secs,
            ),
            ("motion.cooldown_secs", self.motion.cooldown_secs),
            (
                "inference.trigger_cooldown_secs",
                self.inference.trigger_cooldown_secs,
            ),
            (
                "inference.person_cooldown_secs",
                self.inference.person_cooldown_secs,
            ),
            (
                "worker.initial_reconnect_secs",
                self.worker.initial_reconnect_secs,
            ),
            ("worker.max_reconnect_secs", self.worker.max_reconnect_secs),
            ("worker.error_pause_secs", self.worker.error_pause_secs),
        ] {
            if Duration::try_from_secs_f64(value).is_err() {
                return Err(CamhubError::validation(format!(
                    "{} must be a finite non-negative number of seconds",
                    name
                )));
            }
        }

        if self.worker.initial_reconnect_secs <= 0.0 {
            return Err(CamhubError::validation(
                "Worker initial_reconnect_secs must be positive",
            ));
        }

        if self.worker.max_reconnect_secs < self.worker.initial_reconnect_secs {
            return Err(CamhubError::validation(
                "Worker max_reconnect_secs must not be below initial_reconnect_secs",
            ));
        }

        if !(0.0..=1.0).contains(&self.inference.confidence_threshold) {
            return Err(CamhubError::validation(
                "Inference confidence_threshold must be between 0 and 1",
            ));
        }

        // The person cooldown is meant to outlast the trigger cooldown so a
        // persistent presence does not re-alert on every motion window.
        if self.inference.person_cooldown_secs <= self.inference.trigger_cooldown_secs {
            return Err(CamhubError::validation(
                "Inference person_cooldown_secs must exceed trigger_cooldown_secs",
            ));
        }

        Ok(())
    }

    /// Serialize the configuration as TOML
    pub fn to_toml(&self) -> Result<String> {
        Ok(toml::to_string_pretty(self)?)
    }
}

impl Default for CamhubConfig {
    fn default() -> Self {
        Self {
            server: ServerConfig {
                ip: default_server_ip(),
                port: default_server_port(),
            },
            buffer: BufferConfig {
                capacity: default_ring_capacity(),
            },
            events: EventConfig {
                bus_capacity: default_bus_capacity(),
                frame_publish_interval_secs: default_frame_publish_interval(),
            },
            motion: MotionConfig {
                delta_threshold: default_delta_threshold(),
                min_area: default_min_area(),
                cooldown_secs: default_motion_cooldown(),
                frame_skip: default_frame_skip(),
                blur_sigma: default_blur_sigma(),
            },
            inference: InferenceConfig {
                enabled: default_inference_enabled(),
                confidence_threshold: default_confidence_threshold(),
                trigger_cooldown_secs: default_trigger_cooldown(),
                person_cooldown_secs: default_person_cooldown(),
            },
            worker: WorkerConfig {
                initial_reconnect_secs: default_initial_reconnect(),
                max_reconnect_secs: default_max_reconnect(),
                error_pause_secs: default_error_pause(),
            },
            stream: LiveStreamConfig {
                max_fps: default_stream_max_fps(),
            },
        }
    }
}

// Default value functions
fn default_server_ip() -> String {
    "0.0.0.0".to_string()
}
fn default_server_port() -> u16 {
    8080
}

fn default_ring_capacity() -> usize {
    10
}

fn default_bus_capacity() -> usize {
    256
}
fn default_frame_publish_interval() -> f64 {
    1.0
}

fn default_delta_threshold() -> u8 {
    25
}
fn default_min_area() -> u32 {
    1500
}
fn default_motion_cooldown() -> f64 {
    3.0
}
fn default_frame_skip() -> u32 {
    5
}
fn default_blur_sigma() -> f32 {
    2.0
}

fn default_inference_enabled() -> bool {
    true
}
fn default_confidence_threshold() -> f32 {
    0.65
}
fn default_trigger_cooldown() -> f64 {
    3.0
}
fn default_person_cooldown() -> f64 {
    10.0
}

fn default_initial_reconnect() -> f64 {
    1.0
}
fn default_max_reconnect() -> f64 {
    60.0
}
fn default_error_pause() -> f64 {
    5.0
}

fn default_stream_max_fps() -> u32 {
    30
}

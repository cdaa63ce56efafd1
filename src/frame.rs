use crate::error::{CamhubError, Result};
use image::codecs::jpeg::JpegEncoder;
use image::RgbImage;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::SystemTime;

/// Kind of source a camera ingests frames from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceKind {
    /// Pull stream over RTSP
    Rtsp,
    /// Pull stream over HTTP multipart MJPEG
    Mjpeg,
    /// Frames are pushed in by an external client
    HttpPush,
    /// Stream URL is resolved through ONVIF discovery, then pulled
    Onvif,
}

impl SourceKind {
    /// Whether a worker actively connects and reads from this source
    pub fn is_pull(&self) -> bool {
        !matches!(self, SourceKind::HttpPush)
    }

    /// Label used in events and metrics
    pub fn as_str(&self) -> &'static str {
        match self {
            SourceKind::Rtsp => "rtsp",
            SourceKind::Mjpeg => "mjpeg",
            SourceKind::HttpPush => "http_push",
            SourceKind::Onvif => "onvif",
        }
    }
}

impl std::fmt::Display for SourceKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Stream properties reported by a source on a successful open
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct StreamMetadata {
    pub width: Option<u32>,
    pub height: Option<u32>,
    pub fps: Option<f64>,
}

/// A single decoded frame with its capture timestamp
///
/// The pixel data is shared so the ring buffer, the live stream and the
/// analysis path can hold the same frame without copying it.
#[derive(Debug, Clone)]
pub struct CapturedFrame {
    pub timestamp: SystemTime,
    pub source: SourceKind,
    pub image: Arc<RgbImage>,
}

impl CapturedFrame {
    pub fn new(image: RgbImage, timestamp: SystemTime, source: SourceKind) -> Self {
        Self {
            timestamp,
            source,
            image: Arc::new(image),
        }
    }

    /// Decode a JPEG payload into a frame, rejecting invalid image data
    pub fn from_jpeg(data: &[u8], timestamp: SystemTime, source: SourceKind) -> Result<Self> {
        let image = image::load_from_memory(data)
            .map_err(|e| CamhubError::decode(format!("JPEG decode failed: {}", e)))?;
        Ok(Self::new(image.to_rgb8(), timestamp, source))
    }

    /// Encode the frame as JPEG for API responses and live streaming
    pub fn to_jpeg(&self) -> Result<Vec<u8>> {
        encode_jpeg(&self.image)
    }

    pub fn width(&self) -> u32 {
        self.image.width()
    }

    pub fn height(&self) -> u32 {
        self.image.height()
    }

    /// Timestamp as fractional seconds since the Unix epoch
    pub fn unix_timestamp(&self) -> f64 {
        self.timestamp
            .duration_since(SystemTime::UNIX_EPOCH)
            .unwrap_or_default()
            .as_secs_f64()
    }
}

/// Encode an RGB image as JPEG at streaming quality
pub fn encode_jpeg(image: &RgbImage) -> Result<Vec<u8>> {
    let mut buf = Vec::new();
    let mut encoder = JpegEncoder::new_with_quality(&mut buf, 90);
    encoder
        .encode_image(image)
        .map_err(|e| CamhubError::encode(e.to_string()))?;
    Ok(buf)
}

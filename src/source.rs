use crate::camera::CameraSpec;
use crate::error::{CamhubError, Result};
use crate::frame::StreamMetadata;
use async_trait::async_trait;
use bytes::{Bytes, BytesMut};
use futures::{Stream, StreamExt};
use image::RgbImage;
use std::pin::Pin;
use tracing::{debug, info};

/// Opens a frame stream for a URL; injected so workers never depend on a
/// concrete network or decoding library
#[async_trait]
pub trait StreamOpener: Send + Sync {
    async fn open(&self, url: &str) -> Result<Box<dyn FrameStream>>;
}

/// A live sequence of frames from one source connection
#[async_trait]
pub trait FrameStream: Send {
    /// Stream properties resolved at open time, where the source reports them
    fn metadata(&self) -> StreamMetadata;

    /// Read the next frame; EOF and I/O failures both surface as `Source` errors
    async fn next_frame(&mut self) -> Result<RgbImage>;
}

/// Resolves discovery parameters (host/credentials) into a stream URL before
/// a worker starts; the ONVIF backend lives outside this crate
#[async_trait]
pub trait StreamLocator: Send + Sync {
    async fn resolve(&self, spec: &CameraSpec) -> Result<String>;
}

/// Pulls an HTTP multipart MJPEG stream and splits it into JPEG frames
pub struct MjpegHttpOpener {
    client: reqwest::Client,
}

impl MjpegHttpOpener {
    pub fn new() -> Self {
        Self {
            client: reqwest::Client::new(),
        }
    }
}

impl Default for MjpegHttpOpener {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl StreamOpener for MjpegHttpOpener {
    async fn open(&self, url: &str) -> Result<Box<dyn FrameStream>> {
        if !url.starts_with("http://") && !url.starts_with("https://") {
            return Err(CamhubError::source(format!(
                "Unsupported stream URL scheme: {}",
                url
            )));
        }

        debug!("Opening MJPEG stream: {}", url);

        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| CamhubError::source(format!("Failed to open stream: {}", e)))?
            .error_for_status()
            .map_err(|e| CamhubError::source(format!("Stream rejected request: {}", e)))?;

        let mut stream = MjpegHttpStream {
            chunks: Box::pin(response.bytes_stream()),
            buf: BytesMut::new(),
            metadata: StreamMetadata::default(),
            pending: None,
        };

        // Pull the first frame eagerly so a dead stream fails the open and
        // the connected event can carry real dimensions
        let first = stream.next_frame().await?;
        stream.metadata = StreamMetadata {
            width: Some(first.width()),
            height: Some(first.height()),
            fps: None,
        };
        stream.pending = Some(first);

        info!(
            "MJPEG stream open: {} ({}x{})",
            url,
            stream.metadata.width.unwrap_or(0),
            stream.metadata.height.unwrap_or(0)
        );

        Ok(Box::new(stream))
    }
}

/// Upper bound on buffered bytes while hunting for a frame boundary
const MAX_FRAME_BYTES: usize = 16 * 1024 * 1024;

struct MjpegHttpStream {
    chunks: Pin<Box<dyn Stream<Item = reqwest::Result<Bytes>> + Send>>,
    buf: BytesMut,
    metadata: StreamMetadata,
    pending: Option<RgbImage>,
}

#[async_trait]
impl FrameStream for MjpegHttpStream {
    fn metadata(&self) -> StreamMetadata {
        self.metadata
    }

    async fn next_frame(&mut self) -> Result<RgbImage> {
        if let Some(frame) = self.pending.take() {
            return Ok(frame);
        }

        loop {
            if let Some(jpeg) = extract_jpeg(&mut self.buf) {
                let image = image::load_from_memory(&jpeg)
                    .map_err(|e| CamhubError::source(format!("Bad JPEG in stream: {}", e)))?;
                return Ok(image.to_rgb8());
            }

            if self.buf.len() > MAX_FRAME_BYTES {
                return Err(CamhubError::source(
                    "No frame boundary found within buffer limit",
                ));
            }

            match self.chunks.next().await {
                Some(Ok(chunk)) => self.buf.extend_from_slice(&chunk),
                Some(Err(e)) => {
                    return Err(CamhubError::source(format!("Stream read failed: {}", e)))
                }
                None => return Err(CamhubError::source("Stream closed")),
            }
        }
    }
}

/// Pull one complete JPEG (SOI..EOI) out of the buffer, discarding any
/// multipart boundary bytes that precede it
fn extract_jpeg(buf: &mut BytesMut) -> Option<Vec<u8>> {
    const SOI: [u8; 2] = [0xFF, 0xD8];
    const EOI: [u8; 2] = [0xFF, 0xD9];

    let start = find_marker(buf, &SOI)?;
    if start > 0 {
        let _ = buf.split_to(start);
    }

    let end = find_marker(&buf[2..], &EOI)? + 2;
    let frame = buf.split_to(end + 2);
    Some(frame.to_vec())
}

fn find_marker(haystack: &[u8], marker: &[u8; 2]) -> Option<usize> {
    haystack
        .windows(2)
        .position(|window| window == marker)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame::encode_jpeg;

    #[test]
    fn test_extract_jpeg_skips_boundary_prefix() {
        let jpeg = encode_jpeg(&RgbImage::new(8, 8)).unwrap();

        let mut buf = BytesMut::new();
        buf.extend_from_slice(b"--frame\r\nContent-Type: image/jpeg\r\n\r\n");
        buf.extend_from_slice(&jpeg);
        buf.extend_from_slice(b"\r\n--frame");

        let extracted = extract_jpeg(&mut buf).expect("frame should be found");
        assert_eq!(extracted, jpeg);
        // The trailing boundary stays buffered for the next frame
        assert!(!buf.is_empty());
    }

    #[test]
    fn test_extract_jpeg_incomplete_frame_returns_none() {
        let jpeg = encode_jpeg(&RgbImage::new(8, 8)).unwrap();

        let mut buf = BytesMut::new();
        // Strip the EOI marker to simulate a partial chunk
        buf.extend_from_slice(&jpeg[..jpeg.len() - 2]);

        assert!(extract_jpeg(&mut buf).is_none());
        // Nothing consumed; the rest of the frame may still arrive
        assert_eq!(buf.len(), jpeg.len() - 2);
    }

    #[test]
    fn test_extract_jpeg_two_frames_in_sequence() {
        let a = encode_jpeg(&RgbImage::new(8, 8)).unwrap();
        let b = encode_jpeg(&RgbImage::new(4, 4)).unwrap();

        let mut buf = BytesMut::new();
        buf.extend_from_slice(&a);
        buf.extend_from_slice(&b);

        assert_eq!(extract_jpeg(&mut buf).unwrap(), a);
        assert_eq!(extract_jpeg(&mut buf).unwrap(), b);
        assert!(extract_jpeg(&mut buf).is_none());
    }

    #[tokio::test]
    async fn test_opener_rejects_non_http_scheme() {
        let opener = MjpegHttpOpener::new();
        let result = opener.open("rtsp://camera/stream").await;
        assert!(matches!(result, Err(CamhubError::Source { .. })));
    }
}

use crate::error::{CamhubError, Result};
use crate::frame::SourceKind;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

/// Connection status of a camera, driven by its worker
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CameraStatus {
    Registered,
    Connected,
    Disconnected,
}

/// Registration input from the API layer
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CameraSpec {
    /// Unique camera identity, e.g. "cam_001"
    pub id: String,

    pub source: SourceKind,

    /// Direct stream URL (required for rtsp and mjpeg sources)
    #[serde(default)]
    pub source_url: Option<String>,

    /// Camera host for ONVIF discovery
    #[serde(default)]
    pub host: Option<String>,

    /// ONVIF port
    #[serde(default = "default_onvif_port")]
    pub onvif_port: u16,

    #[serde(default)]
    pub username: Option<String>,

    #[serde(default)]
    pub password: Option<String>,
}

fn default_onvif_port() -> u16 {
    80
}

impl CameraSpec {
    /// Check that the parameters required by the declared source kind are present
    pub fn validate(&self) -> Result<()> {
        if self.id.trim().is_empty() {
            return Err(CamhubError::validation("Camera id must not be empty"));
        }

        match self.source {
            SourceKind::Rtsp | SourceKind::Mjpeg => {
                if self.source_url.as_deref().map_or(true, str::is_empty) {
                    return Err(CamhubError::validation(format!(
                        "Source type '{}' requires a source_url",
                        self.source
                    )));
                }
            }
            SourceKind::Onvif => {
                if self.host.as_deref().map_or(true, str::is_empty) {
                    return Err(CamhubError::validation(
                        "Source type 'onvif' requires a host",
                    ));
                }
                if self.username.is_none() || self.password.is_none() {
                    return Err(CamhubError::validation(
                        "Source type 'onvif' requires username and password",
                    ));
                }
            }
            SourceKind::HttpPush => {}
        }

        Ok(())
    }
}

/// A registered camera with its live status
///
/// The status cell is shared between the registry and the camera's worker;
/// the worker flips it on connect/disconnect transitions.
#[derive(Debug)]
pub struct Camera {
    pub spec: CameraSpec,
    status: RwLock<CameraStatus>,
}

impl Camera {
    pub fn new(spec: CameraSpec) -> Self {
        Self {
            spec,
            status: RwLock::new(CameraStatus::Registered),
        }
    }

    pub fn id(&self) -> &str {
        &self.spec.id
    }

    pub fn source(&self) -> SourceKind {
        self.spec.source
    }

    pub fn status(&self) -> CameraStatus {
        *self.status.read()
    }

    pub fn set_status(&self, status: CameraStatus) {
        *self.status.write() = status;
    }

    /// Serializable snapshot for API responses (credentials omitted)
    pub fn view(&self) -> CameraView {
        CameraView {
            id: self.spec.id.clone(),
            source: self.spec.source,
            source_url: self.spec.source_url.clone(),
            host: self.spec.host.clone(),
            status: self.status(),
        }
    }
}

/// API-facing view of a camera
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CameraView {
    pub id: String,
    pub source: SourceKind,
    pub source_url: Option<String>,
    pub host: Option<String>,
    pub status: CameraStatus,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pull_spec(url: Option<&str>) -> CameraSpec {
        CameraSpec {
            id: "cam_1".to_string(),
            source: SourceKind::Mjpeg,
            source_url: url.map(str::to_string),
            host: None,
            onvif_port: 80,
            username: None,
            password: None,
        }
    }

    #[test]
    fn test_pull_source_requires_url() {
        assert!(pull_spec(None).validate().is_err());
        assert!(pull_spec(Some("")).validate().is_err());
        assert!(pull_spec(Some("http://cam/stream")).validate().is_ok());
    }

    #[test]
    fn test_push_source_needs_no_url() {
        let spec = CameraSpec {
            id: "cam_push".to_string(),
            source: SourceKind::HttpPush,
            source_url: None,
            host: None,
            onvif_port: 80,
            username: None,
            password: None,
        };
        assert!(spec.validate().is_ok());
    }

    #[test]
    fn test_onvif_requires_host_and_credentials() {
        let mut spec = CameraSpec {
            id: "cam_onvif".to_string(),
            source: SourceKind::Onvif,
            source_url: None,
            host: Some("10.0.0.5".to_string()),
            onvif_port: 80,
            username: None,
            password: None,
        };
        assert!(spec.validate().is_err());

        spec.username = Some("admin".to_string());
        spec.password = Some("secret".to_string());
        assert!(spec.validate().is_ok());

        spec.host = None;
        assert!(spec.validate().is_err());
    }

    #[test]
    fn test_empty_id_rejected() {
        let mut spec = pull_spec(Some("http://cam/stream"));
        spec.id = "  ".to_string();
        assert!(spec.validate().is_err());
    }

    #[test]
    fn test_status_transitions() {
        let camera = Camera::new(pull_spec(Some("http://cam/stream")));
        assert_eq!(camera.status(), CameraStatus::Registered);

        camera.set_status(CameraStatus::Connected);
        assert_eq!(camera.status(), CameraStatus::Connected);
        assert_eq!(camera.view().status, CameraStatus::Connected);
    }

    #[test]
    fn test_view_omits_credentials() {
        let spec = CameraSpec {
            id: "cam_onvif".to_string(),
            source: SourceKind::Onvif,
            source_url: None,
            host: Some("10.0.0.5".to_string()),
            onvif_port: 80,
            username: Some("admin".to_string()),
            password: Some("secret".to_string()),
        };
        let view = Camera::new(spec).view();
        let json = serde_json::to_string(&view).unwrap();
        assert!(!json.contains("secret"));
        assert!(!json.contains("admin"));
    }
}

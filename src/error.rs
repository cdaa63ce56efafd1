use thiserror::Error;

#[derive(Error, Debug)]
pub enum CamhubError {
    #[error("Configuration error: {0}")]
    Config(#[from] config::ConfigError),

    #[error("Serialization error: {0}")]
    Serialization(#[from] toml::ser::Error),

    #[error("Validation error: {message}")]
    Validation { message: String },

    #[error("Camera not found: {camera_id}")]
    NotFound { camera_id: String },

    #[error("Image decode error: {details}")]
    Decode { details: String },

    #[error("Image encode error: {details}")]
    Encode { details: String },

    #[error("Source error: {details}")]
    Source { details: String },

    #[error("Inference error: {details}")]
    Inference { details: String },

    #[error("System error: {message}")]
    System { message: String },
}

impl CamhubError {
    pub fn validation<S: Into<String>>(message: S) -> Self {
        Self::Validation {
            message: message.into(),
        }
    }

    pub fn not_found<S: Into<String>>(camera_id: S) -> Self {
        Self::NotFound {
            camera_id: camera_id.into(),
        }
    }

    pub fn decode<S: Into<String>>(details: S) -> Self {
        Self::Decode {
            details: details.into(),
        }
    }

    pub fn encode<S: Into<String>>(details: S) -> Self {
        Self::Encode {
            details: details.into(),
        }
    }

    pub fn source<S: Into<String>>(details: S) -> Self {
        Self::Source {
            details: details.into(),
        }
    }

    pub fn inference<S: Into<String>>(details: S) -> Self {
        Self::Inference {
            details: details.into(),
        }
    }

    pub fn system<S: Into<String>>(message: S) -> Self {
        Self::System {
            message: message.into(),
        }
    }
}

pub type Result<T> = std::result::Result<T, CamhubError>;

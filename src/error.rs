use thiserror::Error;

/// Crate-wide error type
#[derive(Error, Debug)]
pub enum UvcError {
    #[error("Capability report error: {0}")]
    Format(String),

    #[error("Permission denied for device {0}")]
    PermissionDenied(u32),

    #[error("Permission permanently denied for device {0}")]
    PermissionDeniedPermanently(u32),

    #[error("Permission request already in flight for device {0}")]
    PermissionBusy(u32),

    #[error("Streaming unavailable for device {device}: {reason}")]
    StreamingUnavailable { device: u32, reason: String },

    #[error("Unsupported control: {0}")]
    UnsupportedControl(String),

    #[error("Device not found: {0}")]
    DeviceNotFound(u32),

    #[error("Capture engine error [{op}]: {reason}")]
    Engine { op: &'static str, reason: String },

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Coordinator is not running")]
    CoordinatorClosed,

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl UvcError {
    /// Shorthand for an engine failure
    pub fn engine(op: &'static str, reason: impl Into<String>) -> Self {
        Self::Engine {
            op,
            reason: reason.into(),
        }
    }

    /// Stable error code for event payloads
    pub fn code(&self) -> &'static str {
        match self {
            Self::Format(_) => "format_error",
            Self::PermissionDenied(_) => "permission_denied",
            Self::PermissionDeniedPermanently(_) => "permission_denied_permanently",
            Self::PermissionBusy(_) => "permission_busy",
            Self::StreamingUnavailable { .. } => "streaming_unavailable",
            Self::UnsupportedControl(_) => "unsupported_control",
            Self::DeviceNotFound(_) => "device_not_found",
            Self::Engine { .. } => "engine_error",
            Self::Config(_) => "config_error",
            Self::CoordinatorClosed => "coordinator_closed",
            Self::Io(_) => "io_error",
            Self::Serialization(_) => "serialization_error",
        }
    }
}

/// Result type alias
pub type Result<T> = std::result::Result<T, UvcError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_codes() {
        assert_eq!(UvcError::Format("bad".into()).code(), "format_error");
        assert_eq!(
            UvcError::StreamingUnavailable {
                device: 3,
                reason: "no format".into()
            }
            .code(),
            "streaming_unavailable"
        );
        assert_eq!(UvcError::engine("open", "busy").code(), "engine_error");
    }

    #[test]
    fn test_error_display() {
        let err = UvcError::engine("start", "pipe stalled");
        assert_eq!(err.to_string(), "Capture engine error [start]: pipe stalled");
    }
}

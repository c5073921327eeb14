//! Hub event types
//!
//! Events describe device lifecycle transitions as the coordinator performs
//! them. They are informational; consumers still get their own callbacks.

use serde::{Deserialize, Serialize};

use crate::control::ControlType;
use crate::device::DeviceId;
use crate::permission::PermissionResult;

/// Hub event
///
/// Serialized as:
///
/// ```json
/// {
///   "event": "stream.started",
///   "data": { "device": 3, "encoding": "H264", "width": 3840, "height": 2160 }
/// }
/// ```
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", content = "data")]
pub enum HubEvent {
    // ============================================================================
    // Device Events
    // ============================================================================
    /// A device was attached and accepted
    #[serde(rename = "device.attached")]
    DeviceAttached {
        device: DeviceId,
        vendor_id: u16,
        product_id: u16,
        name: String,
    },

    /// A device was attached but filtered out or declined by every consumer
    #[serde(rename = "device.rejected")]
    DeviceRejected { device: DeviceId, reason: String },

    /// A known device was detached and forgotten
    #[serde(rename = "device.detached")]
    DeviceDetached { device: DeviceId },

    /// A per-device operation failed; the device stays registered
    #[serde(rename = "device.error")]
    DeviceError {
        device: DeviceId,
        /// Stable error code, see `UvcError::code`
        code: String,
        message: String,
    },

    // ============================================================================
    // Permission Events
    // ============================================================================
    #[serde(rename = "permission.resolved")]
    PermissionResolved {
        device: DeviceId,
        result: PermissionResult,
    },

    // ============================================================================
    // Stream Events
    // ============================================================================
    #[serde(rename = "stream.started")]
    StreamStarted {
        device: DeviceId,
        encoding: String,
        width: u32,
        height: u32,
    },

    #[serde(rename = "stream.stopped")]
    StreamStopped { device: DeviceId },

    /// No format could be negotiated or the stream failed to start
    #[serde(rename = "stream.unavailable")]
    StreamUnavailable { device: DeviceId, reason: String },

    // ============================================================================
    // Audio Events
    // ============================================================================
    #[serde(rename = "audio.started")]
    AudioStarted {
        device: DeviceId,
        channels: u16,
        sample_rate: u32,
    },

    #[serde(rename = "audio.stopped")]
    AudioStopped { device: DeviceId },

    // ============================================================================
    // Control Events
    // ============================================================================
    /// A control was written; `value` is what the device confirmed
    #[serde(rename = "control.changed")]
    ControlChanged {
        device: DeviceId,
        control: ControlType,
        value: i32,
    },
}

impl HubEvent {
    /// Event name as it appears in the `event` field
    pub fn event_name(&self) -> &'static str {
        match self {
            Self::DeviceAttached { .. } => "device.attached",
            Self::DeviceRejected { .. } => "device.rejected",
            Self::DeviceDetached { .. } => "device.detached",
            Self::DeviceError { .. } => "device.error",
            Self::PermissionResolved { .. } => "permission.resolved",
            Self::StreamStarted { .. } => "stream.started",
            Self::StreamStopped { .. } => "stream.stopped",
            Self::StreamUnavailable { .. } => "stream.unavailable",
            Self::AudioStarted { .. } => "audio.started",
            Self::AudioStopped { .. } => "audio.stopped",
            Self::ControlChanged { .. } => "control.changed",
        }
    }

    /// Device the event concerns
    pub fn device(&self) -> DeviceId {
        match self {
            Self::DeviceAttached { device, .. }
            | Self::DeviceRejected { device, .. }
            | Self::DeviceDetached { device }
            | Self::DeviceError { device, .. }
            | Self::PermissionResolved { device, .. }
            | Self::StreamStarted { device, .. }
            | Self::StreamStopped { device }
            | Self::StreamUnavailable { device, .. }
            | Self::AudioStarted { device, .. }
            | Self::AudioStopped { device }
            | Self::ControlChanged { device, .. } => *device,
        }
    }

    /// Whether the event name matches a topic pattern
    ///
    /// `*` matches everything, `stream.*` matches a namespace, anything else
    /// must match exactly.
    pub fn matches_topic(&self, topic: &str) -> bool {
        if topic == "*" {
            return true;
        }

        let event_name = self.event_name();
        match topic.strip_suffix(".*") {
            Some(prefix) => event_name
                .split_once('.')
                .map_or(false, |(namespace, _)| namespace == prefix),
            None => event_name == topic,
        }
    }
}

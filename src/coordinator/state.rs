//! Registry entries and status snapshots

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::capability::{CapabilityCatalog, Encoding, Resolution};
use crate::control::ControlPanel;
use crate::device::Device;
use crate::engine::OpenHandle;
use crate::session::{AudioSession, StreamingSession};

/// Lifecycle state of a registered device
///
/// Detached devices are not in the registry at all.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeviceState {
    /// Known, not streaming (waiting for permission, denied, paused or idle)
    Attached,
    /// Being opened and negotiated
    Opening,
    Streaming,
    /// Sessions are being torn down
    Stopping,
}

/// Registry entry owned by the coordinator
pub(crate) struct DeviceEntry {
    pub device: Arc<Device>,
    pub state: DeviceState,
    pub granted: bool,
    pub handle: Option<OpenHandle>,
    pub catalog: Option<CapabilityCatalog>,
    pub video: Option<StreamingSession>,
    pub audio: Option<AudioSession>,
    pub controls: ControlPanel,
    /// Size set through the handle, overrides consumer preferences
    pub requested_size: Option<Resolution>,
    pub attached_at: DateTime<Utc>,
    pub attach_seq: u64,
}

impl DeviceEntry {
    pub fn new(device: Arc<Device>, attach_seq: u64) -> Self {
        Self {
            controls: ControlPanel::new(device.id),
            device,
            state: DeviceState::Attached,
            granted: false,
            handle: None,
            catalog: None,
            video: None,
            audio: None,
            requested_size: None,
            attached_at: Utc::now(),
            attach_seq,
        }
    }

    pub fn is_streaming(&self) -> bool {
        self.video.as_ref().map_or(false, |s| s.is_active())
    }

    pub fn status(&self) -> DeviceStatus {
        DeviceStatus {
            device: (*self.device).clone(),
            state: self.state,
            granted: self.granted,
            open: self.handle.is_some(),
            streaming: self.is_streaming(),
            encoding: self.video.as_ref().map(|s| s.encoding()),
            resolution: self.video.as_ref().map(|s| s.resolution()),
            frames_rendered: self.video.as_ref().map_or(0, |s| s.frames_rendered()),
            uptime_ms: self
                .video
                .as_ref()
                .map_or(0, |s| s.uptime().as_millis() as u64),
            audio: self.audio.as_ref().map_or(false, |a| a.is_active()),
            attached_at: self.attached_at,
        }
    }
}

/// Point-in-time view of a registered device
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeviceStatus {
    pub device: Device,
    pub state: DeviceState,
    pub granted: bool,
    pub open: bool,
    pub streaming: bool,
    pub encoding: Option<Encoding>,
    pub resolution: Option<Resolution>,
    pub frames_rendered: u64,
    /// How long the current stream has been running
    pub uptime_ms: u64,
    pub audio: bool,
    pub attached_at: DateTime<Utc>,
}

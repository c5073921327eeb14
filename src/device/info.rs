//! Device records built from attach descriptors

use serde::{Deserialize, Serialize};
use std::fmt;

/// Process-local device identifier, valid for one attach session only
pub type DeviceId = u32;

/// Ricoh USB vendor id
pub const VID_RICOH: u16 = 1482;
/// THETA S product id
pub const PID_THETA_S: u16 = 10001;
/// THETA V product id (the 872 id reported by some firmware does not stream)
pub const PID_THETA_V: u16 = 10002;

/// USB audio interface class
const USB_CLASS_AUDIO: u8 = 0x01;

/// Raw device descriptor as reported by the capture engine on attach
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceDescriptor {
    pub id: DeviceId,
    pub vendor_id: u16,
    pub product_id: u16,
    pub device_class: u8,
    pub device_subclass: u8,
    pub device_protocol: u8,
    pub name: String,
    /// Whether the engine found an audio class interface on the device
    #[serde(default)]
    pub audio_interface: bool,
}

/// Immutable attached-device record
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Device {
    pub id: DeviceId,
    pub vendor_id: u16,
    pub product_id: u16,
    pub device_class: u8,
    pub device_subclass: u8,
    pub device_protocol: u8,
    pub name: String,
    audio_interface: bool,
}

impl From<DeviceDescriptor> for Device {
    fn from(desc: DeviceDescriptor) -> Self {
        Self {
            id: desc.id,
            vendor_id: desc.vendor_id,
            product_id: desc.product_id,
            device_class: desc.device_class,
            device_subclass: desc.device_subclass,
            device_protocol: desc.device_protocol,
            name: desc.name,
            audio_interface: desc.audio_interface,
        }
    }
}

impl Device {
    /// Ricoh product
    pub fn is_ricoh(&self) -> bool {
        self.vendor_id == VID_RICOH
    }

    pub fn is_theta_s(&self) -> bool {
        self.is_ricoh() && self.product_id == PID_THETA_S
    }

    pub fn is_theta_v(&self) -> bool {
        self.is_ricoh() && self.product_id == PID_THETA_V
    }

    /// Known 360° camera family (dual-fisheye / equirectangular output)
    pub fn is_panoramic(&self) -> bool {
        self.is_theta_s() || self.is_theta_v()
    }

    /// Whether the device exposes a USB audio class interface
    pub fn supports_audio(&self) -> bool {
        self.audio_interface || self.device_class == USB_CLASS_AUDIO
    }
}

impl fmt::Display for Device {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} (id={}, {:04x}:{:04x})",
            if self.name.is_empty() { "<unnamed>" } else { &self.name },
            self.id,
            self.vendor_id,
            self.product_id
        )
    }
}

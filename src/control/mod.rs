//! Per-device hardware controls
//!
//! A [`ControlPanel`] caches the controls a device reported at its last
//! refresh. Reads and writes go through the capture engine; the cache only
//! ever holds values the device confirmed.

pub mod types;

pub use types::{
    ControlEntry, ControlInfo, ControlMask, ControlType, ProcessingControl, TerminalControl,
};

use std::collections::BTreeMap;
use tracing::{debug, warn};

use crate::device::DeviceId;
use crate::engine::CaptureEngine;
use crate::error::{Result, UvcError};

/// Registry of a device's supported controls
#[derive(Debug, Clone)]
pub struct ControlPanel {
    device: DeviceId,
    entries: BTreeMap<ControlType, ControlEntry>,
}

impl ControlPanel {
    pub fn new(device: DeviceId) -> Self {
        Self {
            device,
            entries: BTreeMap::new(),
        }
    }

    pub fn device(&self) -> DeviceId {
        self.device
    }

    /// Re-read the supported controls and their state
    ///
    /// Controls whose descriptor cannot be read are skipped. Returns the
    /// number of controls now cached.
    pub fn refresh(&mut self, engine: &dyn CaptureEngine) -> Result<usize> {
        let mask = engine.query_control_mask(self.device)?;
        let mut entries = BTreeMap::new();

        for control in mask.controls() {
            let info = match engine.query_control_info(self.device, control) {
                Ok(info) => info,
                Err(e) => {
                    warn!(
                        "Device {}: failed to read {} descriptor: {}",
                        self.device, control, e
                    );
                    continue;
                }
            };
            let current = engine
                .query_control_value(self.device, control)
                .unwrap_or(info.default);
            entries.insert(control, ControlEntry::new(control, info, current));
        }

        debug!("Device {}: {} controls available", self.device, entries.len());
        self.entries = entries;
        Ok(self.entries.len())
    }

    /// Drop every cached control (device closed)
    pub fn clear(&mut self) {
        self.entries.clear();
    }

    pub fn is_supported(&self, control: ControlType) -> bool {
        self.entries.contains_key(&control)
    }

    /// Cached entry for `control`
    pub fn entry(&self, control: ControlType) -> Option<&ControlEntry> {
        self.entries.get(&control)
    }

    /// All cached entries, terminal unit first
    pub fn entries(&self) -> Vec<ControlEntry> {
        self.entries.values().copied().collect()
    }

    /// Read the live value of `control` and cache it
    pub fn get(&mut self, engine: &dyn CaptureEngine, control: ControlType) -> Result<i32> {
        let entry = self
            .entries
            .get_mut(&control)
            .ok_or_else(|| UvcError::UnsupportedControl(control.to_string()))?;
        let value = engine.query_control_value(self.device, control)?;
        entry.current = value;
        Ok(value)
    }

    /// Write `value`, then cache and return the value the device confirmed
    pub fn set(&mut self, engine: &dyn CaptureEngine, control: ControlType, value: i32) -> Result<i32> {
        let entry = self
            .entries
            .get_mut(&control)
            .ok_or_else(|| UvcError::UnsupportedControl(control.to_string()))?;
        if !entry.in_range(value) {
            debug!(
                "Device {}: {} value {} outside {}..={}",
                self.device, control, value, entry.min, entry.max
            );
        }

        engine.set_control_value(self.device, control, value)?;
        let confirmed = engine.query_control_value(self.device, control)?;
        entry.current = confirmed;
        Ok(confirmed)
    }
}

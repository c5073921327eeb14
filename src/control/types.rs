//! UVC control identifiers and descriptors
//!
//! Bit positions follow the `bmControls` fields of the camera terminal and
//! processing unit descriptors.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Camera terminal controls
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TerminalControl {
    ScanningMode,
    AutoExposureMode,
    AutoExposurePriority,
    ExposureTimeAbsolute,
    ExposureTimeRelative,
    FocusAbsolute,
    FocusRelative,
    IrisAbsolute,
    IrisRelative,
    ZoomAbsolute,
    ZoomRelative,
    PanTiltAbsolute,
    PanTiltRelative,
    RollAbsolute,
    RollRelative,
    FocusAuto,
    Privacy,
}

impl TerminalControl {
    pub const ALL: [TerminalControl; 17] = [
        Self::ScanningMode,
        Self::AutoExposureMode,
        Self::AutoExposurePriority,
        Self::ExposureTimeAbsolute,
        Self::ExposureTimeRelative,
        Self::FocusAbsolute,
        Self::FocusRelative,
        Self::IrisAbsolute,
        Self::IrisRelative,
        Self::ZoomAbsolute,
        Self::ZoomRelative,
        Self::PanTiltAbsolute,
        Self::PanTiltRelative,
        Self::RollAbsolute,
        Self::RollRelative,
        Self::FocusAuto,
        Self::Privacy,
    ];

    /// Bit index in the terminal `bmControls` mask
    pub fn bit(&self) -> u32 {
        match self {
            Self::ScanningMode => 0,
            Self::AutoExposureMode => 1,
            Self::AutoExposurePriority => 2,
            Self::ExposureTimeAbsolute => 3,
            Self::ExposureTimeRelative => 4,
            Self::FocusAbsolute => 5,
            Self::FocusRelative => 6,
            Self::IrisAbsolute => 7,
            Self::IrisRelative => 8,
            Self::ZoomAbsolute => 9,
            Self::ZoomRelative => 10,
            Self::PanTiltAbsolute => 11,
            Self::PanTiltRelative => 12,
            Self::RollAbsolute => 13,
            Self::RollRelative => 14,
            Self::FocusAuto => 17,
            Self::Privacy => 18,
        }
    }
}

/// Processing unit controls
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProcessingControl {
    Brightness,
    Contrast,
    Hue,
    Saturation,
    Sharpness,
    Gamma,
    WhiteBalanceTemperature,
    WhiteBalanceComponent,
    BacklightCompensation,
    Gain,
    PowerLineFrequency,
    HueAuto,
    WhiteBalanceTemperatureAuto,
    WhiteBalanceComponentAuto,
    DigitalMultiplier,
    DigitalMultiplierLimit,
    ContrastAuto,
}

impl ProcessingControl {
    pub const ALL: [ProcessingControl; 17] = [
        Self::Brightness,
        Self::Contrast,
        Self::Hue,
        Self::Saturation,
        Self::Sharpness,
        Self::Gamma,
        Self::WhiteBalanceTemperature,
        Self::WhiteBalanceComponent,
        Self::BacklightCompensation,
        Self::Gain,
        Self::PowerLineFrequency,
        Self::HueAuto,
        Self::WhiteBalanceTemperatureAuto,
        Self::WhiteBalanceComponentAuto,
        Self::DigitalMultiplier,
        Self::DigitalMultiplierLimit,
        Self::ContrastAuto,
    ];

    /// Bit index in the processing unit `bmControls` mask
    pub fn bit(&self) -> u32 {
        match self {
            Self::Brightness => 0,
            Self::Contrast => 1,
            Self::Hue => 2,
            Self::Saturation => 3,
            Self::Sharpness => 4,
            Self::Gamma => 5,
            Self::WhiteBalanceTemperature => 6,
            Self::WhiteBalanceComponent => 7,
            Self::BacklightCompensation => 8,
            Self::Gain => 9,
            Self::PowerLineFrequency => 10,
            Self::HueAuto => 11,
            Self::WhiteBalanceTemperatureAuto => 12,
            Self::WhiteBalanceComponentAuto => 13,
            Self::DigitalMultiplier => 14,
            Self::DigitalMultiplierLimit => 15,
            Self::ContrastAuto => 18,
        }
    }
}

/// A hardware control, tagged by the unit that owns it
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(tag = "unit", content = "control", rename_all = "snake_case")]
pub enum ControlType {
    Terminal(TerminalControl),
    Processing(ProcessingControl),
}

impl ControlType {
    /// Every control this crate knows about
    pub fn all() -> impl Iterator<Item = ControlType> {
        TerminalControl::ALL
            .into_iter()
            .map(ControlType::Terminal)
            .chain(ProcessingControl::ALL.into_iter().map(ControlType::Processing))
    }

    /// Whether this control's bit is set in the unit masks
    pub fn is_set_in(&self, mask: &ControlMask) -> bool {
        match self {
            Self::Terminal(c) => mask.terminal & (1u64 << c.bit()) != 0,
            Self::Processing(c) => mask.processing & (1u64 << c.bit()) != 0,
        }
    }
}

impl fmt::Display for ControlType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Terminal(c) => write!(f, "terminal/{:?}", c),
            Self::Processing(c) => write!(f, "processing/{:?}", c),
        }
    }
}

/// Supported-control bitmasks reported by the device
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ControlMask {
    pub terminal: u64,
    pub processing: u64,
}

impl ControlMask {
    /// Mask with exactly the given controls set
    pub fn from_controls(controls: impl IntoIterator<Item = ControlType>) -> Self {
        let mut mask = Self::default();
        for control in controls {
            match control {
                ControlType::Terminal(c) => mask.terminal |= 1u64 << c.bit(),
                ControlType::Processing(c) => mask.processing |= 1u64 << c.bit(),
            }
        }
        mask
    }

    /// Controls present in the mask, terminal unit first
    pub fn controls(&self) -> Vec<ControlType> {
        ControlType::all().filter(|c| c.is_set_in(self)).collect()
    }
}

/// Static description of a control as read from the device
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ControlInfo {
    pub has_min_max: bool,
    pub min: i32,
    pub max: i32,
    pub step: i32,
    pub default: i32,
}

/// Cached state of one supported control
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ControlEntry {
    pub control_type: ControlType,
    pub has_min_max: bool,
    pub default: i32,
    pub current: i32,
    pub step: i32,
    pub min: i32,
    pub max: i32,
}

impl ControlEntry {
    pub fn new(control_type: ControlType, info: ControlInfo, current: i32) -> Self {
        Self {
            control_type,
            has_min_max: info.has_min_max,
            default: info.default,
            current,
            step: info.step,
            min: info.min,
            max: info.max,
        }
    }

    /// Whether `value` lies in the reported range (always true without one)
    pub fn in_range(&self, value: i32) -> bool {
        !self.has_min_max || (self.min..=self.max).contains(&value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mask_round_trip() {
        let wanted = vec![
            ControlType::Terminal(TerminalControl::FocusAuto),
            ControlType::Processing(ProcessingControl::Brightness),
            ControlType::Processing(ProcessingControl::ContrastAuto),
        ];
        let mask = ControlMask::from_controls(wanted.clone());
        assert_eq!(mask.terminal, 1 << 17);
        assert_eq!(mask.processing, 1 | (1 << 18));
        assert_eq!(mask.controls(), wanted);
    }

    #[test]
    fn test_empty_mask() {
        assert!(ControlMask::default().controls().is_empty());
    }

    #[test]
    fn test_in_range() {
        let info = ControlInfo {
            has_min_max: true,
            min: -10,
            max: 10,
            step: 1,
            default: 0,
        };
        let entry = ControlEntry::new(
            ControlType::Processing(ProcessingControl::Brightness),
            info,
            0,
        );
        assert!(entry.in_range(10));
        assert!(!entry.in_range(11));

        let unbounded = ControlEntry {
            has_min_max: false,
            ..entry
        };
        assert!(unbounded.in_range(1000));
    }

    #[test]
    fn test_serde_tagging() {
        let ty = ControlType::Terminal(TerminalControl::ZoomAbsolute);
        let json = serde_json::to_string(&ty).unwrap();
        assert_eq!(json, r#"{"unit":"terminal","control":"zoom_absolute"}"#);
        let back: ControlType = serde_json::from_str(&json).unwrap();
        assert_eq!(back, ty);
    }
}

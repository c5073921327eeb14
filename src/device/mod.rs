//! Attached device identity and filtering
//!
//! A [`Device`] is built once per attach from the engine-reported descriptor
//! and never changes afterwards. [`DeviceFilter`] lists decide which devices
//! the hub is willing to handle at all.

pub mod filter;
pub mod info;

pub use filter::{matches, DeviceFilter, FilterDecision};
pub use info::{Device, DeviceDescriptor, DeviceId, PID_THETA_S, PID_THETA_V, VID_RICOH};

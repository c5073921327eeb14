//! Device capability model
//!
//! Frame encodings, resolutions and the per-device catalog parsed from the
//! engine's capability report.

pub mod catalog;
pub mod format;

pub use catalog::{CapabilityCatalog, CapabilityEntry, DEFAULT_MAX_FPS, DEFAULT_MIN_FPS};
pub use format::{Encoding, Resolution};

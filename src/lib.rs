//! uvc-hub - USB video/audio capture device coordinator
//!
//! This crate tracks hot-plugged UVC/UAC devices, runs them through
//! filtering, consumer acceptance and permission, then opens them,
//! negotiates a capture format and keeps at most one video and one audio
//! session per device running until detach, pause or shutdown.

pub mod capability;
pub mod config;
pub mod control;
pub mod coordinator;
pub mod device;
pub mod engine;
pub mod error;
pub mod events;
pub mod permission;
pub mod session;
pub mod utils;

pub use coordinator::{CoordinatorHandle, DeviceCoordinator};
pub use error::{Result, UvcError};

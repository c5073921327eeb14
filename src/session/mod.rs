//! Per-device streaming sessions
//!
//! A session exists only while its stream runs. Stopping is split in two:
//! `deactivate` flips the session off and cancels its workers (returning
//! `true` once), `shutdown` joins them and releases the engine stream.

pub mod audio;
pub mod video;

pub use audio::{AudioReader, AudioSession};
pub use video::StreamingSession;

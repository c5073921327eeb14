//! Capture engine interface
//!
//! The engine performs USB transfers and decoding. This crate only drives it:
//! open a device, read its capability report, negotiate a format, start a
//! stream into a [`FrameSink`] and pull audio frames. All calls are short
//! and non-blocking from the caller's point of view.

pub mod sim;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::watch;

use crate::capability::{Encoding, Resolution};
use crate::control::{ControlInfo, ControlMask, ControlType};
use crate::device::{Device, DeviceId};
use crate::error::Result;

/// Token for an opened device
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct OpenHandle {
    pub device: DeviceId,
    /// Engine-assigned open counter, distinguishes reopenings
    pub serial: u64,
}

/// What the engine should render into
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SinkTarget {
    pub width: u32,
    pub height: u32,
    pub encoding: Encoding,
}

impl SinkTarget {
    pub fn resolution(&self) -> Resolution {
        Resolution::new(self.width, self.height)
    }
}

/// Audio stream parameters reported when audio capture starts
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct AudioFormat {
    pub channels: u16,
    pub sample_rate: u32,
    pub bits_per_sample: u16,
    /// Interleaved samples per engine frame
    pub frame_samples: usize,
}

/// Frame destination shared between the engine and consumers
///
/// The engine writes the latest frame; consumers read it or wait for the
/// frame counter to advance.
pub struct FrameSink {
    device: DeviceId,
    target: SinkTarget,
    latest: Mutex<Option<Arc<[u8]>>>,
    rendered: AtomicU64,
    frame_tx: watch::Sender<u64>,
}

/// Shared handle to a stream's sink
pub type SinkHandle = Arc<FrameSink>;

impl FrameSink {
    pub fn new(device: DeviceId, target: SinkTarget) -> SinkHandle {
        let (frame_tx, _) = watch::channel(0);
        Arc::new(Self {
            device,
            target,
            latest: Mutex::new(None),
            rendered: AtomicU64::new(0),
            frame_tx,
        })
    }

    pub fn device(&self) -> DeviceId {
        self.device
    }

    pub fn target(&self) -> SinkTarget {
        self.target
    }

    /// Store a new frame and wake waiters
    pub fn write_frame(&self, data: impl Into<Arc<[u8]>>) {
        *self.latest.lock() = Some(data.into());
        let count = self.rendered.fetch_add(1, Ordering::AcqRel) + 1;
        self.frame_tx.send_replace(count);
    }

    /// Most recent frame, if any was rendered
    pub fn latest_frame(&self) -> Option<Arc<[u8]>> {
        self.latest.lock().clone()
    }

    pub fn frames_rendered(&self) -> u64 {
        self.rendered.load(Ordering::Acquire)
    }

    /// Receiver that observes the frame counter
    pub fn watch(&self) -> watch::Receiver<u64> {
        self.frame_tx.subscribe()
    }
}

impl std::fmt::Debug for FrameSink {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FrameSink")
            .field("device", &self.device)
            .field("target", &self.target)
            .field("rendered", &self.frames_rendered())
            .finish()
    }
}

/// Native capture engine
pub trait CaptureEngine: Send + Sync {
    /// Open the device, hinting the preferred encoding
    fn open(&self, device: &Device, preferred: Encoding) -> Result<OpenHandle>;

    /// JSON capability report of an open device
    fn query_capabilities(&self, device: DeviceId) -> Result<String>;

    /// Ask the device to accept `encoding` at `width`x`height`
    fn negotiate(&self, device: DeviceId, encoding: Encoding, width: u32, height: u32) -> Result<()>;

    /// Start streaming with the negotiated format into a new sink
    fn start(&self, device: DeviceId, target: &SinkTarget) -> Result<SinkHandle>;

    fn stop(&self, device: DeviceId) -> Result<()>;

    fn close(&self, device: DeviceId) -> Result<()>;

    /// Render the next frame into `sink`. `Ok(false)` when no frame was ready.
    fn render_frame(&self, device: DeviceId, sink: &FrameSink) -> Result<bool>;

    fn start_audio(&self, device: DeviceId) -> Result<AudioFormat>;

    fn stop_audio(&self, device: DeviceId) -> Result<()>;

    /// Next fixed-size audio frame, `None` when nothing is buffered
    fn pull_audio_frame(&self, device: DeviceId) -> Result<Option<Vec<i16>>>;

    fn query_control_mask(&self, device: DeviceId) -> Result<ControlMask>;

    fn query_control_info(&self, device: DeviceId, control: ControlType) -> Result<ControlInfo>;

    fn query_control_value(&self, device: DeviceId, control: ControlType) -> Result<i32>;

    fn set_control_value(&self, device: DeviceId, control: ControlType, value: i32) -> Result<()>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_sink_wakes_watchers() {
        let sink = FrameSink::new(
            1,
            SinkTarget {
                width: 4,
                height: 2,
                encoding: Encoding::Mjpeg,
            },
        );
        let mut rx = sink.watch();
        assert!(sink.latest_frame().is_none());

        sink.write_frame(vec![1u8, 2, 3]);
        rx.changed().await.unwrap();
        assert_eq!(*rx.borrow(), 1);
        assert_eq!(sink.frames_rendered(), 1);
        assert_eq!(&*sink.latest_frame().unwrap(), &[1u8, 2, 3]);
    }
}

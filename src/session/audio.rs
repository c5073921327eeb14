//! Audio capture session and pull reader

use parking_lot::Mutex;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::device::{Device, DeviceId};
use crate::engine::{AudioFormat, CaptureEngine};
use crate::error::Result;

/// Pull-based reader over a device's audio frames
///
/// Cheap to clone; clones share the carry-over buffer. Reads return an
/// empty buffer once the session stopped.
#[derive(Clone)]
pub struct AudioReader {
    device: DeviceId,
    format: AudioFormat,
    engine: Arc<dyn CaptureEngine>,
    carry: Arc<Mutex<Vec<i16>>>,
    cancel: CancellationToken,
}

impl AudioReader {
    pub fn device(&self) -> DeviceId {
        self.device
    }

    pub fn format(&self) -> AudioFormat {
        self.format
    }

    pub fn is_closed(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Read up to `requested` interleaved samples
    ///
    /// Pulls engine frames until the request is filled or nothing is
    /// buffered. Returns fewer samples on under-fill, never padding. Samples
    /// left over from the last pulled frame are returned by the next read.
    pub fn read(&self, requested: usize) -> Result<Vec<i16>> {
        if self.is_closed() || requested == 0 {
            return Ok(Vec::new());
        }

        let mut carry = self.carry.lock();
        let mut out = Vec::with_capacity(requested);
        let from_carry = carry.len().min(requested);
        out.extend(carry.drain(..from_carry));

        while out.len() < requested {
            let frame = match self.engine.pull_audio_frame(self.device)? {
                Some(frame) if !frame.is_empty() => frame,
                _ => break,
            };
            let needed = requested - out.len();
            if frame.len() <= needed {
                out.extend_from_slice(&frame);
            } else {
                out.extend_from_slice(&frame[..needed]);
                carry.extend_from_slice(&frame[needed..]);
            }
        }

        Ok(out)
    }
}

impl std::fmt::Debug for AudioReader {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AudioReader")
            .field("device", &self.device)
            .field("format", &self.format)
            .field("closed", &self.is_closed())
            .finish()
    }
}

/// A started audio capture, independent of the video session
pub struct AudioSession {
    device: Arc<Device>,
    reader: AudioReader,
    active: bool,
    engine_stopped: bool,
}

impl AudioSession {
    /// Start audio capture on an open device
    pub fn start(engine: Arc<dyn CaptureEngine>, device: Arc<Device>) -> Result<Self> {
        let format = engine.start_audio(device.id)?;
        info!(
            "Audio capture on {}: {} ch, {} Hz, {} bit",
            device, format.channels, format.sample_rate, format.bits_per_sample
        );

        let reader = AudioReader {
            device: device.id,
            format,
            engine,
            carry: Arc::new(Mutex::new(Vec::new())),
            cancel: CancellationToken::new(),
        };
        Ok(Self {
            device,
            reader,
            active: true,
            engine_stopped: false,
        })
    }

    pub fn device(&self) -> &Arc<Device> {
        &self.device
    }

    pub fn format(&self) -> AudioFormat {
        self.reader.format
    }

    pub fn reader(&self) -> AudioReader {
        self.reader.clone()
    }

    pub fn is_active(&self) -> bool {
        self.active
    }

    /// Close the readers. `true` only for the call that deactivated it.
    pub fn deactivate(&mut self) -> bool {
        if !self.active {
            return false;
        }
        self.active = false;
        self.reader.cancel.cancel();
        self.reader.carry.lock().clear();
        true
    }

    /// Stop engine audio capture. Safe to call repeatedly.
    pub fn shutdown(&mut self, engine: &dyn CaptureEngine) {
        self.deactivate();
        if self.engine_stopped {
            return;
        }
        self.engine_stopped = true;
        if let Err(e) = engine.stop_audio(self.device.id) {
            warn!("Failed to stop audio of device {}: {}", self.device.id, e);
        }
        debug!("Audio of device {} stopped", self.device.id);
    }
}

impl Drop for AudioSession {
    fn drop(&mut self) {
        self.reader.cancel.cancel();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capability::Encoding;
    use crate::device::DeviceDescriptor;
    use crate::engine::sim::{EngineCall, SimulatedEngine};

    fn setup(budget: Option<usize>) -> (Arc<SimulatedEngine>, AudioSession) {
        let engine = Arc::new(SimulatedEngine::new());
        if let Some(frames) = budget {
            engine.limit_audio(1, frames);
        }
        let device = Arc::new(Device::from(DeviceDescriptor {
            id: 1,
            audio_interface: true,
            ..Default::default()
        }));
        engine.open(&device, Encoding::Mjpeg).unwrap();
        let session = AudioSession::start(engine.clone(), device).unwrap();
        (engine, session)
    }

    #[test]
    fn test_surplus_carried_to_next_read() {
        let (engine, session) = setup(None);
        let frame = engine.audio_format().frame_samples;
        let reader = session.reader();

        let first = reader.read(100).unwrap();
        assert_eq!(first.len(), 100);
        assert_eq!(first[0], 0);

        let second = reader.read(100).unwrap();
        assert_eq!(second.len(), 100);
        // Continues exactly where the first read stopped
        assert_eq!(second[0], 100);
        assert_eq!(second[frame - 100], (frame % 256) as i16);
    }

    #[test]
    fn test_underfill_truncates() {
        let (engine, session) = setup(Some(1));
        let frame = engine.audio_format().frame_samples;

        let samples = session.reader().read(frame * 3).unwrap();
        assert_eq!(samples.len(), frame);
        assert!(session.reader().read(10).unwrap().is_empty());
    }

    #[test]
    fn test_zero_length_frame_ends_read() {
        let (engine, session) = setup(None);
        let reader = session.reader();
        assert_eq!(reader.read(10).unwrap().len(), 10);

        engine.empty_audio(1);
        // Only the carried surplus of the first frame is left
        let frame = engine.audio_format().frame_samples;
        assert_eq!(reader.read(frame * 2).unwrap().len(), frame - 10);
        assert!(reader.read(10).unwrap().is_empty());
    }

    #[test]
    fn test_reads_empty_after_stop() {
        let (engine, mut session) = setup(None);
        let reader = session.reader();
        assert!(!reader.read(10).unwrap().is_empty());

        assert!(session.deactivate());
        assert!(!session.deactivate());
        assert!(reader.is_closed());
        assert!(reader.read(10).unwrap().is_empty());

        session.shutdown(engine.as_ref());
        session.shutdown(engine.as_ref());
        let stops = engine
            .calls_for(1)
            .into_iter()
            .filter(|c| *c == EngineCall::StopAudio(1))
            .count();
        assert_eq!(stops, 1);
    }
}

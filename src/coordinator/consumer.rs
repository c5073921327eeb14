//! Consumers of device lifecycle callbacks

use async_trait::async_trait;
use std::sync::Arc;

use crate::capability::Resolution;
use crate::device::Device;
use crate::engine::SinkHandle;
use crate::error::UvcError;
use crate::session::AudioReader;

/// Receives lifecycle callbacks from the coordinator
///
/// All callbacks run on the coordinator task, one at a time. Keep them
/// short; hand heavy work to another task.
#[async_trait]
pub trait Consumer: Send + Sync {
    /// Name used in logs
    fn name(&self) -> &str {
        "consumer"
    }

    /// A device passed the filters. Return `true` to accept it.
    async fn on_attach(&self, device: &Device) -> bool;

    /// The device was removed, after its sessions were torn down
    async fn on_detach(&self, _device: &Device) {}

    /// Whether this consumer wants video from `device`
    fn wants_device(&self, _device: &Device) -> bool {
        true
    }

    /// Resolution this consumer would like, if any
    fn preferred_size(&self, _device: &Device) -> Option<Resolution> {
        None
    }

    /// A stream started; frames arrive in `sink`
    async fn on_stream_ready(&self, _device: &Device, _sink: SinkHandle) {}

    /// The stream is about to stop; the sink receives no more frames
    async fn on_stream_stopped(&self, _device: &Device) {}

    /// Whether this consumer wants audio from `device`
    fn wants_audio(&self, _device: &Device) -> bool {
        false
    }

    async fn on_audio_ready(&self, _device: &Device, _reader: AudioReader) {}

    async fn on_audio_stopped(&self, _device: &Device) {}

    /// A non-fatal per-device failure
    async fn on_error(&self, _device: &Device, _error: &UvcError) {}
}

/// Outcome of offering an attached device to the consumers
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AttachDecision {
    /// Nobody registered, the device is accepted
    NoConsumers,
    /// The consumer at this index accepted first
    AcceptedBy(usize),
    /// Every consumer declined
    Declined,
}

impl AttachDecision {
    /// Ask consumers in registration order; the first acceptance wins
    pub async fn evaluate(consumers: &[Arc<dyn Consumer>], device: &Device) -> Self {
        if consumers.is_empty() {
            return Self::NoConsumers;
        }
        for (index, consumer) in consumers.iter().enumerate() {
            if consumer.on_attach(device).await {
                return Self::AcceptedBy(index);
            }
        }
        Self::Declined
    }

    pub fn accepted(&self) -> bool {
        !matches!(self, Self::Declined)
    }
}

//! Cross-context access to the coordinator task

use std::sync::Arc;
use tokio::sync::{mpsc, oneshot};
use tracing::warn;

use super::consumer::Consumer;
use super::state::DeviceStatus;
use crate::capability::{CapabilityCatalog, Resolution};
use crate::control::{ControlEntry, ControlType};
use crate::device::{DeviceDescriptor, DeviceId};
use crate::error::{Result, UvcError};
use crate::permission::PermissionResult;

/// Message handed to the coordinator task
pub(crate) enum Signal {
    Attached(DeviceDescriptor),
    Detached(DeviceId),
    /// Platform answer to a permission prompt
    PermissionResult {
        device: DeviceId,
        result: PermissionResult,
    },
    /// A spawned permission request finished
    PermissionSettled {
        device: DeviceId,
        request: u64,
        outcome: Result<PermissionResult>,
    },
    Pause,
    Resume,
    RegisterConsumer(Arc<dyn Consumer>),
    SetVideoSize {
        device: DeviceId,
        size: Option<Resolution>,
        reply: oneshot::Sender<Result<()>>,
    },
    Devices(oneshot::Sender<Vec<DeviceStatus>>),
    SupportedFormats {
        device: DeviceId,
        reply: oneshot::Sender<Result<CapabilityCatalog>>,
    },
    ControlGet {
        device: DeviceId,
        control: ControlType,
        reply: oneshot::Sender<Result<i32>>,
    },
    ControlSet {
        device: DeviceId,
        control: ControlType,
        value: i32,
        reply: oneshot::Sender<Result<i32>>,
    },
    Controls {
        device: DeviceId,
        reply: oneshot::Sender<Result<Vec<ControlEntry>>>,
    },
    Shutdown(oneshot::Sender<()>),
}

impl Signal {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Attached(_) => "attached",
            Self::Detached(_) => "detached",
            Self::PermissionResult { .. } => "permission_result",
            Self::PermissionSettled { .. } => "permission_settled",
            Self::Pause => "pause",
            Self::Resume => "resume",
            Self::RegisterConsumer(_) => "register_consumer",
            Self::SetVideoSize { .. } => "set_video_size",
            Self::Devices(_) => "devices",
            Self::SupportedFormats { .. } => "supported_formats",
            Self::ControlGet { .. } => "control_get",
            Self::ControlSet { .. } => "control_set",
            Self::Controls { .. } => "controls",
            Self::Shutdown(_) => "shutdown",
        }
    }
}

/// Cloneable handle to a running [`DeviceCoordinator`](super::DeviceCoordinator)
///
/// Notifications (`attach`, `detach`, ...) never block and are dropped with
/// a warning once the coordinator stopped. Queries fail with
/// `CoordinatorClosed` in that case.
#[derive(Clone)]
pub struct CoordinatorHandle {
    tx: mpsc::UnboundedSender<Signal>,
}

impl CoordinatorHandle {
    pub(crate) fn new(tx: mpsc::UnboundedSender<Signal>) -> Self {
        Self { tx }
    }

    pub(crate) fn downgrade(&self) -> mpsc::WeakUnboundedSender<Signal> {
        self.tx.downgrade()
    }

    fn notify(&self, signal: Signal) {
        let name = signal.name();
        if self.tx.send(signal).is_err() {
            warn!("Coordinator is not running, dropping {} signal", name);
        }
    }

    async fn query<T>(&self, make: impl FnOnce(oneshot::Sender<T>) -> Signal) -> Result<T> {
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(make(reply))
            .map_err(|_| UvcError::CoordinatorClosed)?;
        rx.await.map_err(|_| UvcError::CoordinatorClosed)
    }

    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }

    /// A device was plugged in
    pub fn attach(&self, descriptor: DeviceDescriptor) {
        self.notify(Signal::Attached(descriptor));
    }

    /// A device was unplugged
    pub fn detach(&self, device: DeviceId) {
        self.notify(Signal::Detached(device));
    }

    /// Deliver the user's answer to a permission prompt
    pub fn permission_result(&self, device: DeviceId, result: PermissionResult) {
        self.notify(Signal::PermissionResult { device, result });
    }

    /// Host went to the background: stop all streams and close devices
    pub fn pause(&self) {
        self.notify(Signal::Pause);
    }

    /// Host came back: reacquire devices that are attached but idle
    pub fn resume(&self) {
        self.notify(Signal::Resume);
    }

    pub fn register_consumer(&self, consumer: Arc<dyn Consumer>) {
        self.notify(Signal::RegisterConsumer(consumer));
    }

    /// Change a device's stream size; `None` goes back to the default
    pub async fn set_video_size(&self, device: DeviceId, size: Option<Resolution>) -> Result<()> {
        self.query(|reply| Signal::SetVideoSize {
            device,
            size,
            reply,
        })
        .await?
    }

    /// Registered devices in attach order
    pub async fn devices(&self) -> Result<Vec<DeviceStatus>> {
        self.query(Signal::Devices).await
    }

    /// Capability catalog of an open device
    pub async fn supported_formats(&self, device: DeviceId) -> Result<CapabilityCatalog> {
        self.query(|reply| Signal::SupportedFormats { device, reply })
            .await?
    }

    pub async fn control_get(&self, device: DeviceId, control: ControlType) -> Result<i32> {
        self.query(|reply| Signal::ControlGet {
            device,
            control,
            reply,
        })
        .await?
    }

    /// Write a control; returns the value the device confirmed
    pub async fn control_set(&self, device: DeviceId, control: ControlType, value: i32) -> Result<i32> {
        self.query(|reply| Signal::ControlSet {
            device,
            control,
            value,
            reply,
        })
        .await?
    }

    pub async fn controls(&self, device: DeviceId) -> Result<Vec<ControlEntry>> {
        self.query(|reply| Signal::Controls { device, reply })
            .await?
    }

    /// Stop every session, close every device and end the coordinator task
    pub async fn shutdown(&self) -> Result<()> {
        self.query(Signal::Shutdown).await
    }
}

//! Device access permission
//!
//! The host platform grants access to each USB device through a prompt.
//! [`PermissionCoordinator`] keeps at most one prompt in flight, bounds how
//! long it waits for an answer and clears its in-flight slot however the
//! request ends.

mod scripted;

pub use scripted::{ScriptedPermissions, ScriptedResponse};

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::oneshot;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::device::{Device, DeviceId};
use crate::error::{Result, UvcError};

/// Shortest accepted prompt timeout
pub const MIN_TIMEOUT: Duration = Duration::from_millis(500);
/// Longest accepted prompt timeout, also the default
pub const MAX_TIMEOUT: Duration = Duration::from_secs(30);

/// Outcome of a permission prompt
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PermissionResult {
    Granted,
    Denied,
    /// Denied and the user asked not to be prompted again
    DeniedPermanently,
}

impl PermissionResult {
    pub fn is_granted(&self) -> bool {
        matches!(self, Self::Granted)
    }

    /// Map to the matching error for `device`
    pub fn into_result(self, device: DeviceId) -> Result<()> {
        match self {
            Self::Granted => Ok(()),
            Self::Denied => Err(UvcError::PermissionDenied(device)),
            Self::DeniedPermanently => Err(UvcError::PermissionDeniedPermanently(device)),
        }
    }
}

/// Platform side of the permission prompt
pub trait PermissionBackend: Send + Sync {
    /// Whether access is already granted. Must not prompt.
    fn has_access(&self, device: &Device) -> bool;

    /// Whether the host should show an explanation before prompting. Must not prompt.
    fn should_explain_rationale(&self, device: &Device) -> bool;

    /// Show the prompt. The answer is delivered later through `responder`
    /// (or through `DeviceCoordinator`'s handle). Returning an error aborts
    /// the request.
    fn request(&self, device: &Device, responder: PermissionResponder) -> Result<()>;
}

struct Pending {
    device: DeviceId,
    /// Identifies one prompt; a device id can be reused after detach
    ticket: u64,
    tx: oneshot::Sender<PermissionResult>,
}

type Slot = Arc<Mutex<Option<Pending>>>;

/// Resolve the pending request if `owns` accepts it
fn resolve_slot(
    slot: &Slot,
    owns: impl Fn(&Pending) -> bool,
    result: PermissionResult,
) -> bool {
    let mut guard = slot.lock();
    if !guard.as_ref().map_or(false, |p| owns(p)) {
        return false;
    }
    match guard.take() {
        Some(pending) => {
            // The waiter may already have timed out
            let _ = pending.tx.send(result);
            true
        }
        None => false,
    }
}

/// One-shot answer channel handed to the backend with each prompt
#[derive(Clone)]
pub struct PermissionResponder {
    device: DeviceId,
    ticket: u64,
    slot: Slot,
}

impl PermissionResponder {
    pub fn device(&self) -> DeviceId {
        self.device
    }

    /// Deliver the prompt answer. Returns false when the request already
    /// ended (timed out or cancelled).
    pub fn respond(&self, result: PermissionResult) -> bool {
        let ticket = self.ticket;
        resolve_slot(&self.slot, |p| p.ticket == ticket, result)
    }
}

impl std::fmt::Debug for PermissionResponder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PermissionResponder")
            .field("device", &self.device)
            .finish()
    }
}

/// Serializes permission prompts and enforces the answer timeout
pub struct PermissionCoordinator {
    backend: Arc<dyn PermissionBackend>,
    slot: Slot,
    next_ticket: AtomicU64,
    timeout_ms: AtomicU64,
}

impl PermissionCoordinator {
    pub fn new(backend: Arc<dyn PermissionBackend>, timeout: Duration) -> Self {
        Self {
            backend,
            slot: Arc::new(Mutex::new(None)),
            next_ticket: AtomicU64::new(1),
            timeout_ms: AtomicU64::new(Self::clamp_timeout(timeout).as_millis() as u64),
        }
    }

    /// Clamp a timeout into `MIN_TIMEOUT..=MAX_TIMEOUT`
    pub fn clamp_timeout(timeout: Duration) -> Duration {
        timeout.clamp(MIN_TIMEOUT, MAX_TIMEOUT)
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms.load(Ordering::Relaxed))
    }

    pub fn set_timeout(&self, timeout: Duration) {
        let clamped = Self::clamp_timeout(timeout);
        if clamped != timeout {
            warn!(
                "Permission timeout {:?} out of range, using {:?}",
                timeout, clamped
            );
        }
        self.timeout_ms
            .store(clamped.as_millis() as u64, Ordering::Relaxed);
    }

    pub fn has_access(&self, device: &Device) -> bool {
        self.backend.has_access(device)
    }

    pub fn should_explain_rationale(&self, device: &Device) -> bool {
        self.backend.should_explain_rationale(device)
    }

    /// Whether a prompt is currently awaiting an answer
    pub fn is_requesting(&self) -> bool {
        self.slot.lock().is_some()
    }

    /// Device the in-flight prompt belongs to
    pub fn in_flight(&self) -> Option<DeviceId> {
        self.slot.lock().as_ref().map(|p| p.device)
    }

    /// Request access to `device`
    ///
    /// Returns immediately with `Granted` when access is already held. Fails
    /// with `PermissionBusy` while another prompt is in flight. A prompt that
    /// is not answered within the timeout resolves as `Denied`.
    pub async fn request_access(&self, device: &Device) -> Result<PermissionResult> {
        self.request_access_until(device, &CancellationToken::new())
            .await
    }

    /// [`request_access`](Self::request_access) that gives up once `cancel`
    /// fires
    ///
    /// A request cancelled before its prompt opens never reaches the backend.
    /// Either way it resolves as `Denied` and leaves the slot free.
    pub async fn request_access_until(
        &self,
        device: &Device,
        cancel: &CancellationToken,
    ) -> Result<PermissionResult> {
        if self.backend.has_access(device) {
            debug!("Device {} already has access", device.id);
            return Ok(PermissionResult::Granted);
        }

        let ticket = self.next_ticket.fetch_add(1, Ordering::Relaxed);
        let rx = {
            let mut slot = self.slot.lock();
            if cancel.is_cancelled() {
                debug!("Permission request for device {} cancelled before prompting", device.id);
                return Ok(PermissionResult::Denied);
            }
            if let Some(pending) = slot.as_ref() {
                debug!(
                    "Permission for device {} requested while device {} is pending",
                    device.id, pending.device
                );
                return Err(UvcError::PermissionBusy(device.id));
            }
            let (tx, rx) = oneshot::channel();
            *slot = Some(Pending {
                device: device.id,
                ticket,
                tx,
            });
            rx
        };

        info!("Requesting permission for {}", device);
        let responder = PermissionResponder {
            device: device.id,
            ticket,
            slot: self.slot.clone(),
        };
        if let Err(e) = self.backend.request(device, responder) {
            self.clear(ticket);
            return Err(e);
        }

        let timeout = self.timeout();
        let result = tokio::select! {
            _ = cancel.cancelled() => {
                debug!("Permission request for device {} was cancelled", device.id);
                PermissionResult::Denied
            }
            answer = tokio::time::timeout(timeout, rx) => match answer {
                Ok(Ok(result)) => result,
                Ok(Err(_)) => {
                    debug!("Permission request for device {} was cancelled", device.id);
                    PermissionResult::Denied
                }
                Err(_) => {
                    warn!(
                        "Permission request for device {} timed out after {:?}",
                        device.id, timeout
                    );
                    PermissionResult::Denied
                }
            },
        };
        self.clear(ticket);

        info!("Permission for device {}: {:?}", device.id, result);
        Ok(result)
    }

    /// Deliver an answer for the in-flight request of `device`
    pub fn resolve(&self, device: DeviceId, result: PermissionResult) -> bool {
        let resolved = resolve_slot(&self.slot, |p| p.device == device, result);
        if !resolved {
            debug!(
                "Ignoring permission result {:?} for device {} with no pending request",
                result, device
            );
        }
        resolved
    }

    /// Drop the in-flight request; its waiter resolves as `Denied`
    pub fn cancel(&self) {
        if let Some(pending) = self.slot.lock().take() {
            debug!("Cancelling permission request for device {}", pending.device);
        }
    }

    /// Drop the in-flight request if it belongs to `device`
    pub fn cancel_device(&self, device: DeviceId) -> bool {
        let mut slot = self.slot.lock();
        if slot.as_ref().map(|p| p.device) == Some(device) {
            *slot = None;
            debug!("Cancelling permission request for device {}", device);
            true
        } else {
            false
        }
    }

    fn clear(&self, ticket: u64) {
        let mut slot = self.slot.lock();
        if slot.as_ref().map(|p| p.ticket) == Some(ticket) {
            *slot = None;
        }
    }
}

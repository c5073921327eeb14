//! In-process permission backend driven by a script
//!
//! Used by the demo binary and by tests in place of a platform prompt.

use parking_lot::Mutex;
use std::collections::{HashMap, HashSet, VecDeque};
use std::time::Duration;
use tracing::debug;

use super::{PermissionBackend, PermissionResponder, PermissionResult};
use crate::device::{Device, DeviceId};
use crate::error::Result;

/// How the simulated user answers a prompt
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScriptedResponse {
    Grant,
    Deny,
    DenyPermanently,
    /// Never answer; the responder is held until `respond_held`
    Ignore,
}

#[derive(Default)]
struct ScriptState {
    default: Option<ScriptedResponse>,
    per_device: HashMap<DeviceId, VecDeque<ScriptedResponse>>,
    granted: HashSet<DeviceId>,
    denied: HashSet<DeviceId>,
    requests: Vec<DeviceId>,
    held: Vec<PermissionResponder>,
}

/// Scripted [`PermissionBackend`]
///
/// Grants are remembered, so later requests for the same device skip the
/// prompt, just like a platform that persists the user's choice.
pub struct ScriptedPermissions {
    state: Mutex<ScriptState>,
    delay: Duration,
}

impl ScriptedPermissions {
    pub fn new(default: ScriptedResponse) -> Self {
        Self {
            state: Mutex::new(ScriptState {
                default: Some(default),
                ..Default::default()
            }),
            delay: Duration::ZERO,
        }
    }

    /// Answer prompts after `delay` instead of immediately
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    /// Change the answer used when no per-device script is queued
    pub fn set_default(&self, response: ScriptedResponse) {
        self.state.lock().default = Some(response);
    }

    /// Queue an answer for the next prompt of `device`
    pub fn push(&self, device: DeviceId, response: ScriptedResponse) {
        self.state
            .lock()
            .per_device
            .entry(device)
            .or_default()
            .push_back(response);
    }

    /// Pre-grant access without prompting
    pub fn grant(&self, device: DeviceId) {
        self.state.lock().granted.insert(device);
    }

    /// Forget a grant (the device was replugged)
    pub fn revoke(&self, device: DeviceId) {
        self.state.lock().granted.remove(&device);
    }

    /// Devices prompted for, in order
    pub fn requests(&self) -> Vec<DeviceId> {
        self.state.lock().requests.clone()
    }

    /// Answer every held prompt. Returns whether any was still pending.
    pub fn respond_held(&self, result: PermissionResult) -> bool {
        let held: Vec<_> = self.state.lock().held.drain(..).collect();
        let mut delivered = false;
        for responder in held {
            self.record(responder.device(), result);
            delivered |= responder.respond(result);
        }
        delivered
    }

    fn record(&self, device: DeviceId, result: PermissionResult) {
        let mut state = self.state.lock();
        match result {
            PermissionResult::Granted => {
                state.granted.insert(device);
                state.denied.remove(&device);
            }
            PermissionResult::Denied => {
                state.denied.insert(device);
            }
            PermissionResult::DeniedPermanently => {
                state.denied.remove(&device);
            }
        }
    }
}

impl PermissionBackend for ScriptedPermissions {
    fn has_access(&self, device: &Device) -> bool {
        self.state.lock().granted.contains(&device.id)
    }

    fn should_explain_rationale(&self, device: &Device) -> bool {
        self.state.lock().denied.contains(&device.id)
    }

    fn request(&self, device: &Device, responder: PermissionResponder) -> Result<()> {
        let response = {
            let mut state = self.state.lock();
            state.requests.push(device.id);
            let scripted = state
                .per_device
                .get_mut(&device.id)
                .and_then(|queue| queue.pop_front());
            scripted
                .or(state.default)
                .unwrap_or(ScriptedResponse::Ignore)
        };
        debug!("Scripted permission answer for device {}: {:?}", device.id, response);

        let result = match response {
            ScriptedResponse::Grant => PermissionResult::Granted,
            ScriptedResponse::Deny => PermissionResult::Denied,
            ScriptedResponse::DenyPermanently => PermissionResult::DeniedPermanently,
            ScriptedResponse::Ignore => {
                self.state.lock().held.push(responder);
                return Ok(());
            }
        };
        self.record(device.id, result);

        if self.delay.is_zero() {
            responder.respond(result);
        } else {
            let delay = self.delay;
            tokio::spawn(async move {
                tokio::time::sleep(delay).await;
                responder.respond(result);
            });
        }
        Ok(())
    }
}

//! Device lifecycle and streaming coordinator
//!
//! A single task owns the device registry and performs every state
//! transition and consumer callback. Other contexts talk to it through a
//! [`CoordinatorHandle`]; permission prompts run in spawned tasks that post
//! their outcome back, so a pending prompt never stalls other devices.
//!
//! ```text
//! attach -> filters -> consumers -> permission -> open -> negotiate -> start
//!                                                              |
//! detach <- close <- engine stop <- on_stream_stopped <--------+
//! ```

mod consumer;
mod handle;
mod negotiate;
mod state;


pub use consumer::{AttachDecision, Consumer};
pub use handle::CoordinatorHandle;
pub use negotiate::{negotiate, FormatRequest};
pub use state::{DeviceState, DeviceStatus};

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::capability::{CapabilityCatalog, Resolution};
use crate::config::{ConfigStore, HubConfig};
use crate::device::{Device, DeviceDescriptor, DeviceId, FilterDecision};
use crate::engine::CaptureEngine;
use crate::error::{Result, UvcError};
use crate::events::{EventBus, HubEvent};
use crate::permission::{PermissionBackend, PermissionCoordinator, PermissionResult};
use crate::session::{AudioSession, StreamingSession};
use handle::Signal;
use state::DeviceEntry;

/// Owns the device registry and drives each device through its lifecycle
pub struct DeviceCoordinator {
    engine: Arc<dyn CaptureEngine>,
    permissions: Arc<PermissionCoordinator>,
    config: ConfigStore,
    events: Arc<EventBus>,
    consumers: Vec<Arc<dyn Consumer>>,
    devices: HashMap<DeviceId, DeviceEntry>,
    /// Accepted devices waiting for the single permission slot
    permission_queue: VecDeque<DeviceId>,
    pending_permission: Option<PendingPermission>,
    permission_seq: u64,
    paused: bool,
    attach_seq: u64,
    signal_tx: Option<mpsc::WeakUnboundedSender<Signal>>,
}

impl DeviceCoordinator {
    pub fn new(
        engine: Arc<dyn CaptureEngine>,
        permission_backend: Arc<dyn PermissionBackend>,
        config: ConfigStore,
    ) -> Self {
        let timeout = config.get().permission.timeout();
        Self {
            engine,
            permissions: Arc::new(PermissionCoordinator::new(permission_backend, timeout)),
            config,
            events: Arc::new(EventBus::new()),
            consumers: Vec::new(),
            devices: HashMap::new(),
            permission_queue: VecDeque::new(),
            pending_permission: None,
            permission_seq: 0,
            paused: false,
            attach_seq: 0,
            signal_tx: None,
        }
    }

    /// Publish on a shared event bus instead of a private one
    pub fn with_events(mut self, events: Arc<EventBus>) -> Self {
        self.events = events;
        self
    }

    pub fn with_consumer(mut self, consumer: Arc<dyn Consumer>) -> Self {
        self.consumers.push(consumer);
        self
    }

    pub fn events(&self) -> Arc<EventBus> {
        self.events.clone()
    }

    pub fn permissions(&self) -> Arc<PermissionCoordinator> {
        self.permissions.clone()
    }

    /// Start the coordinator task
    ///
    /// The task ends on `shutdown` or once every handle is dropped.
    pub fn spawn(self) -> (CoordinatorHandle, JoinHandle<()>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let handle = CoordinatorHandle::new(tx);
        let weak = handle.downgrade();
        let task = tokio::spawn(self.run(rx, weak));
        (handle, task)
    }

    async fn run(
        mut self,
        mut rx: mpsc::UnboundedReceiver<Signal>,
        signal_tx: mpsc::WeakUnboundedSender<Signal>,
    ) {
        self.signal_tx = Some(signal_tx);
        let mut config_rx = self.config.subscribe();
        info!(
            "Device coordinator started ({} consumers)",
            self.consumers.len()
        );

        loop {
            tokio::select! {
                signal = rx.recv() => match signal {
                    Some(Signal::Shutdown(reply)) => {
                        self.shutdown_all().await;
                        let _ = reply.send(());
                        break;
                    }
                    Some(signal) => self.handle_signal(signal).await,
                    None => {
                        debug!("All coordinator handles dropped");
                        self.shutdown_all().await;
                        break;
                    }
                },
                change = config_rx.recv() => match change {
                    Ok(change) => self.apply_config(&change.config),
                    Err(broadcast::error::RecvError::Lagged(_)) => {
                        let config = self.config.get();
                        self.apply_config(&config);
                    }
                    Err(broadcast::error::RecvError::Closed) => {
                        config_rx = self.config.subscribe();
                    }
                },
            }
        }

        info!("Device coordinator stopped");
    }

    async fn handle_signal(&mut self, signal: Signal) {
        match signal {
            Signal::Attached(descriptor) => self.handle_attach(descriptor).await,
            Signal::Detached(device) => self.handle_detach(device).await,
            Signal::PermissionResult { device, result } => {
                self.permissions.resolve(device, result);
            }
            Signal::PermissionSettled {
                device,
                request,
                outcome,
            } => self.handle_permission_settled(device, request, outcome).await,
            Signal::Pause => self.pause().await,
            Signal::Resume => self.resume(),
            Signal::RegisterConsumer(consumer) => self.register_consumer(consumer).await,
            Signal::SetVideoSize {
                device,
                size,
                reply,
            } => {
                let result = self.set_video_size(device, size).await;
                let _ = reply.send(result);
            }
            Signal::Devices(reply) => {
                let mut entries: Vec<&DeviceEntry> = self.devices.values().collect();
                entries.sort_by_key(|e| e.attach_seq);
                let _ = reply.send(entries.into_iter().map(|e| e.status()).collect());
            }
            Signal::SupportedFormats { device, reply } => {
                let result = match self.devices.get(&device) {
                    Some(entry) => entry.catalog.clone().ok_or_else(|| {
                        UvcError::StreamingUnavailable {
                            device,
                            reason: "device is not open".to_string(),
                        }
                    }),
                    None => Err(UvcError::DeviceNotFound(device)),
                };
                let _ = reply.send(result);
            }
            Signal::ControlGet {
                device,
                control,
                reply,
            } => {
                let result = match self.devices.get_mut(&device) {
                    Some(entry) => entry.controls.get(self.engine.as_ref(), control),
                    None => Err(UvcError::DeviceNotFound(device)),
                };
                let _ = reply.send(result);
            }
            Signal::ControlSet {
                device,
                control,
                value,
                reply,
            } => {
                let result = match self.devices.get_mut(&device) {
                    Some(entry) => entry.controls.set(self.engine.as_ref(), control, value),
                    None => Err(UvcError::DeviceNotFound(device)),
                };
                if let Ok(confirmed) = result {
                    info!(
                        "Device {}: {} set to {} (requested {})",
                        device, control, confirmed, value
                    );
                    self.events.publish(HubEvent::ControlChanged {
                        device,
                        control,
                        value: confirmed,
                    });
                }
                let _ = reply.send(result);
            }
            Signal::Controls { device, reply } => {
                let result = self
                    .devices
                    .get(&device)
                    .map(|entry| entry.controls.entries())
                    .ok_or(UvcError::DeviceNotFound(device));
                let _ = reply.send(result);
            }
            // Handled by the run loop
            Signal::Shutdown(reply) => {
                let _ = reply.send(());
            }
        }
    }

    fn apply_config(&self, config: &HubConfig) {
        info!(
            "Configuration changed: {} filters, prefer_h264={}",
            config.filters.len(),
            config.video.prefer_h264
        );
        self.permissions.set_timeout(config.permission.timeout());
    }

    // ========================================================================
    // Attach / detach
    // ========================================================================

    async fn handle_attach(&mut self, descriptor: DeviceDescriptor) {
        if self.devices.contains_key(&descriptor.id) {
            debug!("Device {} is already registered, ignoring attach", descriptor.id);
            return;
        }

        let device = Arc::new(Device::from(descriptor));
        info!("Device attached: {}", device);

        let config = self.config.get();
        match FilterDecision::evaluate(&device, &config.filters) {
            FilterDecision::Excluded(index) => {
                return self.reject(&device, format!("excluded by filter #{}", index));
            }
            FilterDecision::NoMatch => {
                return self.reject(&device, "no include filter matched".to_string());
            }
            FilterDecision::NoFilters | FilterDecision::Included(_) => {}
        }

        match AttachDecision::evaluate(&self.consumers, &device).await {
            AttachDecision::Declined => {
                return self.reject(&device, "declined by every consumer".to_string());
            }
            AttachDecision::AcceptedBy(index) => {
                debug!(
                    "Device {} accepted by {}",
                    device.id,
                    self.consumers[index].name()
                );
            }
            AttachDecision::NoConsumers => {}
        }

        self.attach_seq += 1;
        self.devices
            .insert(device.id, DeviceEntry::new(device.clone(), self.attach_seq));
        self.events.publish(HubEvent::DeviceAttached {
            device: device.id,
            vendor_id: device.vendor_id,
            product_id: device.product_id,
            name: device.name.clone(),
        });

        self.enqueue_permission(device.id);
    }

    fn reject(&self, device: &Device, reason: String) {
        info!("Device {} rejected: {}", device, reason);
        self.events.publish(HubEvent::DeviceRejected {
            device: device.id,
            reason,
        });
    }

    async fn handle_detach(&mut self, id: DeviceId) {
        if !self.devices.contains_key(&id) {
            debug!("Detach for unknown device {}", id);
            return;
        }

        self.permission_queue.retain(|queued| *queued != id);
        if self.pending_permission.as_ref().map(|p| p.device) == Some(id) {
            if let Some(pending) = self.pending_permission.take() {
                debug!("Cancelling permission request {} for device {}", pending.request, id);
                pending.cancel.cancel();
                self.permissions.cancel_device(id);
            }
        }

        self.close_device(id).await;
        let Some(entry) = self.devices.remove(&id) else {
            return;
        };

        for consumer in self.consumers.clone() {
            consumer.on_detach(&entry.device).await;
        }
        info!("Device detached: {}", entry.device);
        self.events.publish(HubEvent::DeviceDetached { device: id });

        self.next_permission();
    }

    // ========================================================================
    // Permission
    // ========================================================================

    fn enqueue_permission(&mut self, id: DeviceId) {
        let pending = self.pending_permission.as_ref().map(|p| p.device);
        if pending != Some(id) && !self.permission_queue.contains(&id) {
            self.permission_queue.push_back(id);
        }
        self.next_permission();
    }

    /// Start the next queued permission request if the slot is free
    fn next_permission(&mut self) {
        if self.paused || self.pending_permission.is_some() {
            return;
        }
        let Some(signal_tx) = self.signal_tx.clone() else {
            return;
        };

        while let Some(id) = self.permission_queue.pop_front() {
            let Some(entry) = self.devices.get(&id) else {
                continue;
            };
            if entry.state != DeviceState::Attached || entry.video.is_some() {
                continue;
            }

            let device = entry.device.clone();
            let permissions = self.permissions.clone();
            let cancel = CancellationToken::new();
            self.permission_seq += 1;
            let request = self.permission_seq;
            self.pending_permission = Some(PendingPermission {
                device: id,
                request,
                cancel: cancel.clone(),
            });

            if permissions.should_explain_rationale(&device) {
                debug!("Device {} was denied before, prompting again", id);
            }
            tokio::spawn(async move {
                let outcome = permissions.request_access_until(&device, &cancel).await;
                match signal_tx.upgrade() {
                    Some(tx) => {
                        let _ = tx.send(Signal::PermissionSettled {
                            device: device.id,
                            request,
                            outcome,
                        });
                    }
                    None => debug!("Coordinator gone before permission for {} settled", device.id),
                }
            });
            return;
        }
    }

    async fn handle_permission_settled(
        &mut self,
        id: DeviceId,
        request: u64,
        outcome: Result<PermissionResult>,
    ) {
        if self.pending_permission.as_ref().map(|p| p.request) != Some(request) {
            debug!("Dropping outcome of cancelled permission request {} for device {}", request, id);
            self.next_permission();
            return;
        }
        self.pending_permission = None;

        match outcome {
            Ok(result) => {
                self.events.publish(HubEvent::PermissionResolved { device: id, result });
                if let Some(entry) = self.devices.get_mut(&id) {
                    entry.granted = result.is_granted();
                    let device = entry.device.clone();
                    match result.into_result(id) {
                        Ok(()) => self.activate(id).await,
                        Err(e) => self.report(&device, &e).await,
                    }
                } else {
                    debug!("Permission for {} settled after detach", id);
                }
            }
            Err(UvcError::PermissionBusy(_)) => {
                debug!("Permission slot busy, requeueing device {}", id);
                self.permission_queue.push_back(id);
            }
            Err(e) => {
                if let Some(device) = self.devices.get(&id).map(|entry| entry.device.clone()) {
                    self.report(&device, &e).await;
                }
            }
        }

        self.next_permission();
    }

    // ========================================================================
    // Open / stream / close
    // ========================================================================

    fn should_stream(&self, device: &Device) -> bool {
        self.consumers.is_empty() || self.consumers.iter().any(|c| c.wants_device(device))
    }

    fn candidate_size(&self, entry: &DeviceEntry, config: &HubConfig) -> Resolution {
        entry
            .requested_size
            .or_else(|| {
                self.consumers
                    .iter()
                    .filter(|c| c.wants_device(&entry.device))
                    .find_map(|c| c.preferred_size(&entry.device))
            })
            .unwrap_or_else(|| config.video.default_resolution())
    }

    fn mark_attached(&mut self, id: DeviceId) {
        if let Some(entry) = self.devices.get_mut(&id) {
            if entry.video.is_none() {
                entry.state = DeviceState::Attached;
            }
        }
    }

    /// Open a granted device if needed and start streaming when wanted
    async fn activate(&mut self, id: DeviceId) {
        if self.paused {
            debug!("Paused, not opening device {}", id);
            return;
        }
        let Some(entry) = self.devices.get(&id) else {
            return;
        };
        if !entry.granted || entry.video.is_some() {
            return;
        }
        let device = entry.device.clone();

        if entry.handle.is_none() {
            if let Err(e) = self.open_device(id) {
                self.mark_attached(id);
                self.report(&device, &unavailable(id, e)).await;
                return;
            }
        }

        if !self.should_stream(&device) {
            debug!("No consumer wants {}, leaving it open", device);
            self.mark_attached(id);
            return;
        }

        if let Err(e) = self.start_stream(id).await {
            self.mark_attached(id);
            self.report(&device, &unavailable(id, e)).await;
        }
    }

    fn open_device(&mut self, id: DeviceId) -> Result<()> {
        let config = self.config.get();
        let entry = self
            .devices
            .get_mut(&id)
            .ok_or(UvcError::DeviceNotFound(id))?;
        entry.state = DeviceState::Opening;

        let handle = self
            .engine
            .open(&entry.device, config.video.encoding_order()[0])?;
        entry.handle = Some(handle);

        let catalog = self
            .engine
            .query_capabilities(id)
            .and_then(|report| CapabilityCatalog::parse(&report));
        let catalog = match catalog {
            Ok(catalog) => catalog,
            Err(e) => {
                if let Err(close_err) = self.engine.close(id) {
                    warn!("Failed to close device {}: {}", id, close_err);
                }
                entry.handle = None;
                return Err(e);
            }
        };

        if let Err(e) = entry.controls.refresh(self.engine.as_ref()) {
            warn!("Device {}: failed to read controls: {}", id, e);
        }

        info!(
            "Opened {} (serial {}): {} formats, encodings {:?}",
            entry.device,
            handle.serial,
            catalog.len(),
            catalog.encodings()
        );
        entry.catalog = Some(catalog);
        Ok(())
    }

    async fn start_stream(&mut self, id: DeviceId) -> Result<()> {
        let config = self.config.get();
        let consumers = self.consumers.clone();
        let entry = self
            .devices
            .get(&id)
            .ok_or(UvcError::DeviceNotFound(id))?;
        if entry.video.is_some() {
            return Ok(());
        }
        let device = entry.device.clone();
        let catalog = entry
            .catalog
            .as_ref()
            .ok_or_else(|| unavailable(id, UvcError::engine("start", "device is not open")))?;

        let request = FormatRequest::new(self.candidate_size(entry, &config), &config.video);
        let target = negotiate(self.engine.as_ref(), id, catalog, &request)?;
        let sink = self.engine.start(id, &target)?;

        let session = StreamingSession::start(
            self.engine.clone(),
            device.clone(),
            target,
            sink.clone(),
            config.video.frame_interval(),
        );
        if let Some(entry) = self.devices.get_mut(&id) {
            entry.video = Some(session);
            entry.state = DeviceState::Streaming;
        }

        self.events.publish(HubEvent::StreamStarted {
            device: id,
            encoding: target.encoding.to_string(),
            width: target.width,
            height: target.height,
        });
        for consumer in consumers.iter().filter(|c| c.wants_device(&device)) {
            consumer.on_stream_ready(&device, sink.clone()).await;
        }

        if config.audio.enabled {
            self.start_audio(id).await;
        }
        Ok(())
    }

    async fn start_audio(&mut self, id: DeviceId) {
        let Some(entry) = self.devices.get(&id) else {
            return;
        };
        if entry.audio.is_some() || !entry.device.supports_audio() {
            return;
        }
        let device = entry.device.clone();
        let listeners: Vec<_> = self
            .consumers
            .iter()
            .filter(|c| c.wants_device(&device) && c.wants_audio(&device))
            .cloned()
            .collect();
        if listeners.is_empty() {
            return;
        }

        let session = match AudioSession::start(self.engine.clone(), device.clone()) {
            Ok(session) => session,
            Err(e) => {
                self.report(&device, &e).await;
                return;
            }
        };
        let reader = session.reader();
        let format = session.format();
        if let Some(entry) = self.devices.get_mut(&id) {
            entry.audio = Some(session);
        }

        self.events.publish(HubEvent::AudioStarted {
            device: id,
            channels: format.channels,
            sample_rate: format.sample_rate,
        });
        for consumer in listeners {
            consumer.on_audio_ready(&device, reader.clone()).await;
        }
    }

    /// Tear down audio and video sessions, notifying before each engine stop
    async fn stop_sessions(&mut self, id: DeviceId) {
        let consumers = self.consumers.clone();
        let Some(entry) = self.devices.get_mut(&id) else {
            return;
        };
        let device = entry.device.clone();
        let audio = entry.audio.take();
        let video = entry.video.take();
        if video.is_some() {
            entry.state = DeviceState::Stopping;
        }

        if let Some(mut audio) = audio {
            if audio.deactivate() {
                for consumer in consumers
                    .iter()
                    .filter(|c| c.wants_device(&device) && c.wants_audio(&device))
                {
                    consumer.on_audio_stopped(&device).await;
                }
                self.events.publish(HubEvent::AudioStopped { device: id });
            }
            audio.shutdown(self.engine.as_ref());
        }

        if let Some(mut video) = video {
            if video.deactivate() {
                for consumer in consumers.iter().filter(|c| c.wants_device(&device)) {
                    consumer.on_stream_stopped(&device).await;
                }
                self.events.publish(HubEvent::StreamStopped { device: id });
            }
            video.shutdown(self.engine.as_ref()).await;
            info!(
                "Stopped stream of {} after {} frames",
                device,
                video.frames_rendered()
            );
        }

        self.mark_attached(id);
    }

    /// Stop sessions and release the engine handle; the device stays registered
    async fn close_device(&mut self, id: DeviceId) {
        self.stop_sessions(id).await;

        let Some(entry) = self.devices.get_mut(&id) else {
            return;
        };
        if let Some(handle) = entry.handle.take() {
            if let Err(e) = self.engine.close(id) {
                warn!("Failed to close device {}: {}", id, e);
            }
            debug!("Closed device {} (serial {})", id, handle.serial);
        }
        entry.controls.clear();
        entry.catalog = None;
        entry.state = DeviceState::Attached;
    }

    // ========================================================================
    // Host lifecycle and runtime changes
    // ========================================================================

    fn ids_in_attach_order(&self) -> Vec<DeviceId> {
        let mut entries: Vec<(u64, DeviceId)> = self
            .devices
            .values()
            .map(|e| (e.attach_seq, e.device.id))
            .collect();
        entries.sort_unstable();
        entries.into_iter().map(|(_, id)| id).collect()
    }

    async fn pause(&mut self) {
        if self.paused {
            return;
        }
        info!("Pausing: closing {} devices", self.devices.len());
        self.paused = true;
        for id in self.ids_in_attach_order() {
            self.close_device(id).await;
        }
    }

    fn resume(&mut self) {
        if !self.paused {
            debug!("Resume while not paused");
        }
        self.paused = false;

        let idle: Vec<DeviceId> = self
            .ids_in_attach_order()
            .into_iter()
            .filter(|id| {
                self.devices
                    .get(id)
                    .map_or(false, |e| e.state == DeviceState::Attached && e.video.is_none())
            })
            .collect();
        info!("Resuming: re-requesting access for {} devices", idle.len());
        for id in idle {
            self.enqueue_permission(id);
        }
    }

    async fn register_consumer(&mut self, consumer: Arc<dyn Consumer>) {
        info!("Registered consumer {}", consumer.name());
        self.consumers.push(consumer);

        let waiting: Vec<DeviceId> = self
            .ids_in_attach_order()
            .into_iter()
            .filter(|id| {
                self.devices
                    .get(id)
                    .map_or(false, |e| e.granted && e.video.is_none())
            })
            .collect();
        for id in waiting {
            self.activate(id).await;
        }
    }

    async fn set_video_size(&mut self, id: DeviceId, size: Option<Resolution>) -> Result<()> {
        if let Some(size) = size {
            if !size.is_valid() {
                return Err(UvcError::Format(format!("invalid resolution {}", size)));
            }
        }

        let config = self.config.get();
        let entry = self
            .devices
            .get_mut(&id)
            .ok_or(UvcError::DeviceNotFound(id))?;
        entry.requested_size = size;

        let entry = &self.devices[&id];
        let Some(session) = entry.video.as_ref() else {
            debug!("Device {} not streaming, size applies on next start", id);
            return Ok(());
        };
        let device = entry.device.clone();
        let request = FormatRequest::new(self.candidate_size(entry, &config), &config.video);
        let wanted = request.resolution;
        let unchanged = entry
            .catalog
            .as_ref()
            .map(|c| request.usable(c))
            .and_then(|c| {
                c.find_nearest(Some(session.encoding()), wanted.width, wanted.height)
                    .map(|nearest| nearest.resolution)
            })
            .map_or(false, |nearest| nearest == session.resolution());
        if unchanged {
            debug!("Device {} already streams the nearest size to {}", id, wanted);
            return Ok(());
        }

        info!("Restarting {} for size {}", device, wanted);
        self.stop_sessions(id).await;
        if let Err(e) = self.start_stream(id).await {
            self.mark_attached(id);
            let err = unavailable(id, e);
            self.report(&device, &err).await;
            return Err(err);
        }
        Ok(())
    }

    async fn shutdown_all(&mut self) {
        info!("Shutting down {} devices", self.devices.len());
        self.permission_queue.clear();
        if let Some(pending) = self.pending_permission.take() {
            pending.cancel.cancel();
        }
        self.permissions.cancel();
        for id in self.ids_in_attach_order() {
            self.close_device(id).await;
        }
        self.devices.clear();
    }

    /// Deliver a per-device failure to observers and consumers
    async fn report(&self, device: &Device, error: &UvcError) {
        warn!("{}: {}", device, error);
        let event = match error {
            UvcError::StreamingUnavailable { reason, .. } => HubEvent::StreamUnavailable {
                device: device.id,
                reason: reason.clone(),
            },
            other => HubEvent::DeviceError {
                device: device.id,
                code: other.code().to_string(),
                message: other.to_string(),
            },
        };
        self.events.publish(event);

        for consumer in &self.consumers {
            consumer.on_error(device, error).await;
        }
    }
}

/// The permission request currently allowed to prompt
struct PendingPermission {
    device: DeviceId,
    /// Distinguishes a re-attached device from its cancelled request
    request: u64,
    cancel: CancellationToken,
}

/// Wrap an open/start failure as `StreamingUnavailable`
///
/// An undecodable capability report stays a `Format` error.
fn unavailable(device: DeviceId, error: UvcError) -> UvcError {
    match error {
        e @ (UvcError::StreamingUnavailable { .. }
        | UvcError::DeviceNotFound(_)
        | UvcError::Format(_)) => e,
        other => UvcError::StreamingUnavailable {
            device,
            reason: other.to_string(),
        },
    }
}

//! Video streaming session and its frame pump

use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::capability::{Encoding, Resolution};
use crate::device::Device;
use crate::engine::{CaptureEngine, SinkHandle, SinkTarget};
use crate::utils::LogThrottler;
use crate::warn_throttled;

/// A started video stream
///
/// Owns the sink and the pump task. The pump renders one frame per tick
/// until the session is deactivated; [`shutdown`](Self::shutdown) joins it
/// before stopping the engine stream.
pub struct StreamingSession {
    device: Arc<Device>,
    target: SinkTarget,
    sink: SinkHandle,
    active: bool,
    engine_stopped: bool,
    cancel: CancellationToken,
    pump: Option<JoinHandle<()>>,
    started_at: Instant,
}

impl StreamingSession {
    /// Wrap a stream the engine already started and spawn its pump
    pub fn start(
        engine: Arc<dyn CaptureEngine>,
        device: Arc<Device>,
        target: SinkTarget,
        sink: SinkHandle,
        frame_interval: Duration,
    ) -> Self {
        let cancel = CancellationToken::new();
        let pump = tokio::spawn(run_pump(
            engine,
            device.id,
            sink.clone(),
            frame_interval,
            cancel.clone(),
        ));

        info!(
            "Streaming {} at {} {} (frame interval {:?})",
            device,
            target.resolution(),
            target.encoding,
            frame_interval
        );

        Self {
            device,
            target,
            sink,
            active: true,
            engine_stopped: false,
            cancel,
            pump: Some(pump),
            started_at: Instant::now(),
        }
    }

    pub fn device(&self) -> &Arc<Device> {
        &self.device
    }

    pub fn encoding(&self) -> Encoding {
        self.target.encoding
    }

    pub fn resolution(&self) -> Resolution {
        self.target.resolution()
    }

    pub fn sink(&self) -> &SinkHandle {
        &self.sink
    }

    pub fn is_active(&self) -> bool {
        self.active
    }

    pub fn frames_rendered(&self) -> u64 {
        self.sink.frames_rendered()
    }

    pub fn uptime(&self) -> Duration {
        self.started_at.elapsed()
    }

    /// Mark the session stopped and cancel the pump
    ///
    /// Returns `true` only for the call that actually deactivated it, so the
    /// caller sends exactly one stop notification.
    pub fn deactivate(&mut self) -> bool {
        if !self.active {
            return false;
        }
        self.active = false;
        self.cancel.cancel();
        true
    }

    /// Join the pump, then stop the engine stream. Safe to call repeatedly.
    pub async fn shutdown(&mut self, engine: &dyn CaptureEngine) {
        self.deactivate();

        if let Some(pump) = self.pump.take() {
            if let Err(e) = pump.await {
                warn!("Frame pump for device {} ended abnormally: {}", self.device.id, e);
            }
        }

        if !self.engine_stopped {
            self.engine_stopped = true;
            if let Err(e) = engine.stop(self.device.id) {
                warn!("Failed to stop stream of device {}: {}", self.device.id, e);
            }
            debug!(
                "Stream of device {} stopped after {} frames",
                self.device.id,
                self.sink.frames_rendered()
            );
        }
    }
}

impl Drop for StreamingSession {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

async fn run_pump(
    engine: Arc<dyn CaptureEngine>,
    device: u32,
    sink: SinkHandle,
    frame_interval: Duration,
    cancel: CancellationToken,
) {
    let throttler = LogThrottler::with_secs(5);
    let key = format!("render_{}", device);
    let mut failing = false;

    let mut ticker = tokio::time::interval(frame_interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

    loop {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            _ = ticker.tick() => {
                match engine.render_frame(device, &sink) {
                    Ok(_) => {
                        if failing {
                            failing = false;
                            throttler.clear(&key);
                            info!("Device {} is rendering frames again", device);
                        }
                    }
                    Err(e) => {
                        failing = true;
                        let dropped = throttler.suppressed(&key);
                        warn_throttled!(
                            throttler,
                            &key,
                            "Device {}: frame render failed: {} ({} suppressed)",
                            device,
                            e,
                            dropped
                        );
                    }
                }
            }
        }
    }

    debug!("Frame pump for device {} exited", device);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::DeviceDescriptor;
    use crate::engine::sim::{EngineCall, SimulatedEngine};

    fn setup() -> (Arc<SimulatedEngine>, Arc<Device>, SinkTarget, SinkHandle) {
        let engine = Arc::new(SimulatedEngine::new());
        let device = Arc::new(Device::from(DeviceDescriptor {
            id: 1,
            name: "cam".to_string(),
            ..Default::default()
        }));
        let target = SinkTarget {
            width: 1280,
            height: 720,
            encoding: Encoding::Mjpeg,
        };
        engine.open(&device, Encoding::Mjpeg).unwrap();
        engine.negotiate(1, Encoding::Mjpeg, 1280, 720).unwrap();
        let sink = engine.start(1, &target).unwrap();
        (engine, device, target, sink)
    }

    #[tokio::test]
    async fn test_pump_renders_frames() {
        let (engine, device, target, sink) = setup();
        let mut session = StreamingSession::start(
            engine.clone(),
            device,
            target,
            sink,
            Duration::from_millis(5),
        );

        let mut rx = session.sink().watch();
        while *rx.borrow_and_update() < 3 {
            rx.changed().await.unwrap();
        }
        assert!(session.frames_rendered() >= 3);
        assert_eq!(session.resolution(), Resolution::HD720);

        session.shutdown(engine.as_ref()).await;
        assert!(!engine.is_streaming(1));
    }

    #[tokio::test]
    async fn test_stop_is_idempotent() {
        let (engine, device, target, sink) = setup();
        let mut session =
            StreamingSession::start(engine.clone(), device, target, sink, Duration::from_millis(5));

        assert!(session.deactivate());
        assert!(!session.deactivate());
        assert!(!session.is_active());

        session.shutdown(engine.as_ref()).await;
        session.shutdown(engine.as_ref()).await;

        let stops = engine
            .calls_for(1)
            .into_iter()
            .filter(|c| *c == EngineCall::Stop(1))
            .count();
        assert_eq!(stops, 1);
    }

    #[tokio::test]
    async fn test_no_render_after_shutdown() {
        let (engine, device, target, sink) = setup();
        let mut session =
            StreamingSession::start(engine.clone(), device, target, sink, Duration::from_millis(2));
        tokio::time::sleep(Duration::from_millis(20)).await;

        session.shutdown(engine.as_ref()).await;
        let calls = engine.render_calls();
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(engine.render_calls(), calls);
    }

    #[tokio::test]
    async fn test_render_errors_keep_pump_alive() {
        let (engine, device, target, sink) = setup();
        engine.fail_render(1);
        let mut session =
            StreamingSession::start(engine.clone(), device, target, sink, Duration::from_millis(2));
        tokio::time::sleep(Duration::from_millis(20)).await;

        assert!(engine.render_calls() > 1);
        assert_eq!(session.frames_rendered(), 0);
        session.shutdown(engine.as_ref()).await;
    }
}

//! Simulated capture engine
//!
//! Behaves like a device-backed engine without touching USB: devices expose
//! a configurable capability report, accept only formats present in it,
//! render synthetic frames and produce a synthetic audio tone. Every
//! lifecycle call is recorded so callers can check ordering.

use parking_lot::Mutex;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::{debug, trace};

use super::{AudioFormat, CaptureEngine, FrameSink, OpenHandle, SinkHandle, SinkTarget};
use crate::capability::{CapabilityCatalog, Encoding, Resolution};
use crate::control::{ControlInfo, ControlMask, ControlType, ProcessingControl, TerminalControl};
use crate::device::{Device, DeviceId};
use crate::error::{Result, UvcError};

/// Report of a generic USB webcam
pub const WEBCAM_REPORT: &str = r#"{"formats":[{"frame_type":7,"default":1,"size":["640x480","1280x720","1920x1080"],"frameRate":[[30,15],[30,15],[30,15]]},{"frame_type":20,"default":0,"size":["1280x720","1920x1080"],"frameRate":[[30],[30]]}]}"#;

/// Report of a 360° camera streaming equirectangular H.264
pub const THETA_REPORT: &str = r#"{"formats":[{"frame_type":20,"default":0,"size":["1920x960","3840x2160"],"frameRate":[[29.97],[29.97]]},{"frame_type":7,"default":0,"size":["1280x720"],"frameRate":[[30]]}]}"#;

/// Lifecycle call observed by the simulated engine
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EngineCall {
    Open(DeviceId),
    Negotiate(DeviceId, Encoding, Resolution),
    Start(DeviceId, SinkTarget),
    Stop(DeviceId),
    Close(DeviceId),
    StartAudio(DeviceId),
    StopAudio(DeviceId),
    SetControl(DeviceId, ControlType, i32),
}

struct SimDevice {
    serial: u64,
    audio_capable: bool,
    report: String,
    negotiated: Option<(Encoding, Resolution)>,
    streaming: bool,
    audio_running: bool,
    audio_budget: Option<usize>,
    audio_empty: bool,
    audio_phase: u64,
    controls: HashMap<ControlType, (ControlInfo, i32)>,
}

#[derive(Default)]
struct SimState {
    open: HashMap<DeviceId, SimDevice>,
    reports: HashMap<DeviceId, String>,
    audio_budgets: HashMap<DeviceId, usize>,
    empty_audio: HashSet<DeviceId>,
    rejected_encodings: HashSet<Encoding>,
    failing_opens: HashSet<DeviceId>,
    failing_renders: HashSet<DeviceId>,
    calls: Vec<EngineCall>,
    next_serial: u64,
}

/// In-process [`CaptureEngine`]
pub struct SimulatedEngine {
    state: Mutex<SimState>,
    default_report: String,
    audio_format: AudioFormat,
    render_calls: AtomicU64,
}

impl Default for SimulatedEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl SimulatedEngine {
    pub fn new() -> Self {
        Self::with_report(WEBCAM_REPORT)
    }

    /// Engine whose devices all report `report` unless overridden per device
    pub fn with_report(report: &str) -> Self {
        Self {
            state: Mutex::new(SimState::default()),
            default_report: report.to_string(),
            audio_format: AudioFormat {
                channels: 2,
                sample_rate: 48000,
                bits_per_sample: 16,
                frame_samples: 192,
            },
            render_calls: AtomicU64::new(0),
        }
    }

    pub fn audio_format(&self) -> AudioFormat {
        self.audio_format
    }

    /// Capability report for one device
    pub fn set_report(&self, device: DeviceId, report: &str) {
        self.state.lock().reports.insert(device, report.to_string());
    }

    /// Refuse negotiation of `encoding` at any size
    pub fn reject_encoding(&self, encoding: Encoding) {
        self.state.lock().rejected_encodings.insert(encoding);
    }

    /// Make `open` fail for `device`
    pub fn fail_open(&self, device: DeviceId) {
        self.state.lock().failing_opens.insert(device);
    }

    /// Make `render_frame` fail for `device`
    pub fn fail_render(&self, device: DeviceId) {
        self.state.lock().failing_renders.insert(device);
    }

    /// Limit how many audio frames `device` produces per audio start
    pub fn limit_audio(&self, device: DeviceId, frames: usize) {
        let mut state = self.state.lock();
        state.audio_budgets.insert(device, frames);
        if let Some(dev) = state.open.get_mut(&device) {
            dev.audio_budget = Some(frames);
        }
    }

    /// Make `device` hand out zero-length audio frames
    pub fn empty_audio(&self, device: DeviceId) {
        let mut state = self.state.lock();
        state.empty_audio.insert(device);
        if let Some(dev) = state.open.get_mut(&device) {
            dev.audio_empty = true;
        }
    }

    /// Lifecycle calls so far, in order
    pub fn calls(&self) -> Vec<EngineCall> {
        self.state.lock().calls.clone()
    }

    /// Lifecycle calls that concern `device`
    pub fn calls_for(&self, device: DeviceId) -> Vec<EngineCall> {
        self.calls()
            .into_iter()
            .filter(|call| call_device(call) == device)
            .collect()
    }

    /// Total `render_frame` invocations across devices
    pub fn render_calls(&self) -> u64 {
        self.render_calls.load(Ordering::Acquire)
    }

    pub fn is_open(&self, device: DeviceId) -> bool {
        self.state.lock().open.contains_key(&device)
    }

    pub fn is_streaming(&self, device: DeviceId) -> bool {
        self.state
            .lock()
            .open
            .get(&device)
            .map_or(false, |d| d.streaming)
    }

    fn default_controls() -> HashMap<ControlType, (ControlInfo, i32)> {
        let ranged = |min, max, default| ControlInfo {
            has_min_max: true,
            min,
            max,
            step: 1,
            default,
        };
        HashMap::from([
            (
                ControlType::Processing(ProcessingControl::Brightness),
                (ranged(-64, 64, 0), 0),
            ),
            (
                ControlType::Processing(ProcessingControl::Contrast),
                (ranged(0, 95, 32), 32),
            ),
            (
                ControlType::Processing(ProcessingControl::WhiteBalanceTemperatureAuto),
                (ranged(0, 1, 1), 1),
            ),
            (
                ControlType::Terminal(TerminalControl::FocusAuto),
                (ranged(0, 1, 1), 1),
            ),
            (
                ControlType::Terminal(TerminalControl::ZoomAbsolute),
                (ranged(100, 500, 100), 100),
            ),
        ])
    }

    fn with_device<T>(
        &self,
        op: &'static str,
        device: DeviceId,
        f: impl FnOnce(&mut SimDevice) -> Result<T>,
    ) -> Result<T> {
        let mut state = self.state.lock();
        let dev = state
            .open
            .get_mut(&device)
            .ok_or_else(|| UvcError::engine(op, format!("device {} is not open", device)))?;
        f(dev)
    }
}

fn call_device(call: &EngineCall) -> DeviceId {
    match call {
        EngineCall::Open(id)
        | EngineCall::Negotiate(id, _, _)
        | EngineCall::Start(id, _)
        | EngineCall::Stop(id)
        | EngineCall::Close(id)
        | EngineCall::StartAudio(id)
        | EngineCall::StopAudio(id)
        | EngineCall::SetControl(id, _, _) => *id,
    }
}

impl CaptureEngine for SimulatedEngine {
    fn open(&self, device: &Device, preferred: Encoding) -> Result<OpenHandle> {
        let mut state = self.state.lock();
        state.calls.push(EngineCall::Open(device.id));
        if state.failing_opens.contains(&device.id) {
            return Err(UvcError::engine("open", format!("device {} refused to open", device.id)));
        }
        if let Some(existing) = state.open.get(&device.id) {
            return Ok(OpenHandle {
                device: device.id,
                serial: existing.serial,
            });
        }

        state.next_serial += 1;
        let serial = state.next_serial;
        let report = state
            .reports
            .get(&device.id)
            .cloned()
            .unwrap_or_else(|| self.default_report.clone());
        let audio_budget = state.audio_budgets.get(&device.id).copied();
        let audio_empty = state.empty_audio.contains(&device.id);
        state.open.insert(
            device.id,
            SimDevice {
                serial,
                audio_capable: device.supports_audio(),
                report,
                negotiated: None,
                streaming: false,
                audio_running: false,
                audio_budget,
                audio_empty,
                audio_phase: 0,
                controls: Self::default_controls(),
            },
        );
        debug!("Simulated open of {} (prefers {})", device, preferred);
        Ok(OpenHandle {
            device: device.id,
            serial,
        })
    }

    fn query_capabilities(&self, device: DeviceId) -> Result<String> {
        self.with_device("query_capabilities", device, |dev| Ok(dev.report.clone()))
    }

    fn negotiate(&self, device: DeviceId, encoding: Encoding, width: u32, height: u32) -> Result<()> {
        let resolution = Resolution::new(width, height);
        let rejected = {
            let mut state = self.state.lock();
            state
                .calls
                .push(EngineCall::Negotiate(device, encoding, resolution));
            state.rejected_encodings.contains(&encoding)
        };
        self.with_device("negotiate", device, |dev| {
            let catalog = CapabilityCatalog::parse(&dev.report)?;
            let listed = catalog
                .entries()
                .iter()
                .any(|e| e.encoding == encoding && e.resolution == resolution);
            if rejected || !listed {
                return Err(UvcError::engine(
                    "negotiate",
                    format!("{} {} not accepted", encoding, resolution),
                ));
            }
            dev.negotiated = Some((encoding, resolution));
            Ok(())
        })
    }

    fn start(&self, device: DeviceId, target: &SinkTarget) -> Result<SinkHandle> {
        self.state.lock().calls.push(EngineCall::Start(device, *target));
        self.with_device("start", device, |dev| {
            if dev.negotiated != Some((target.encoding, target.resolution())) {
                return Err(UvcError::engine("start", "format was not negotiated"));
            }
            dev.streaming = true;
            Ok(FrameSink::new(device, *target))
        })
    }

    fn stop(&self, device: DeviceId) -> Result<()> {
        self.state.lock().calls.push(EngineCall::Stop(device));
        self.with_device("stop", device, |dev| {
            dev.streaming = false;
            Ok(())
        })
    }

    fn close(&self, device: DeviceId) -> Result<()> {
        let mut state = self.state.lock();
        state.calls.push(EngineCall::Close(device));
        state.open.remove(&device);
        Ok(())
    }

    fn render_frame(&self, device: DeviceId, sink: &FrameSink) -> Result<bool> {
        self.render_calls.fetch_add(1, Ordering::AcqRel);
        if self.state.lock().failing_renders.contains(&device) {
            return Err(UvcError::engine("render", "transfer stalled"));
        }
        let streaming = self.with_device("render", device, |dev| Ok(dev.streaming))?;
        if !streaming {
            return Err(UvcError::engine("render", "stream is not running"));
        }

        let seq = sink.frames_rendered() + 1;
        let frame: Vec<u8> = seq.to_le_bytes().into_iter().cycle().take(64).collect();
        trace!("Rendered frame {} for device {}", seq, device);
        sink.write_frame(frame);
        Ok(true)
    }

    fn start_audio(&self, device: DeviceId) -> Result<AudioFormat> {
        self.state.lock().calls.push(EngineCall::StartAudio(device));
        let format = self.audio_format;
        self.with_device("start_audio", device, |dev| {
            if !dev.audio_capable {
                return Err(UvcError::engine("start_audio", "device has no audio interface"));
            }
            dev.audio_running = true;
            dev.audio_phase = 0;
            Ok(format)
        })
    }

    fn stop_audio(&self, device: DeviceId) -> Result<()> {
        self.state.lock().calls.push(EngineCall::StopAudio(device));
        self.with_device("stop_audio", device, |dev| {
            dev.audio_running = false;
            Ok(())
        })
    }

    fn pull_audio_frame(&self, device: DeviceId) -> Result<Option<Vec<i16>>> {
        let frame_samples = self.audio_format.frame_samples;
        self.with_device("pull_audio", device, |dev| {
            if !dev.audio_running {
                return Ok(None);
            }
            if dev.audio_empty {
                return Ok(Some(Vec::new()));
            }
            if let Some(budget) = dev.audio_budget.as_mut() {
                if *budget == 0 {
                    return Ok(None);
                }
                *budget -= 1;
            }
            let base = dev.audio_phase;
            dev.audio_phase += frame_samples as u64;
            let frame = (0..frame_samples as u64)
                .map(|i| ((base + i) % 256) as i16)
                .collect();
            Ok(Some(frame))
        })
    }

    fn query_control_mask(&self, device: DeviceId) -> Result<ControlMask> {
        self.with_device("query_control_mask", device, |dev| {
            Ok(ControlMask::from_controls(dev.controls.keys().copied()))
        })
    }

    fn query_control_info(&self, device: DeviceId, control: ControlType) -> Result<ControlInfo> {
        self.with_device("query_control_info", device, |dev| {
            dev.controls
                .get(&control)
                .map(|(info, _)| *info)
                .ok_or_else(|| UvcError::UnsupportedControl(control.to_string()))
        })
    }

    fn query_control_value(&self, device: DeviceId, control: ControlType) -> Result<i32> {
        self.with_device("query_control_value", device, |dev| {
            dev.controls
                .get(&control)
                .map(|(_, value)| *value)
                .ok_or_else(|| UvcError::UnsupportedControl(control.to_string()))
        })
    }

    fn set_control_value(&self, device: DeviceId, control: ControlType, value: i32) -> Result<()> {
        self.state
            .lock()
            .calls
            .push(EngineCall::SetControl(device, control, value));
        self.with_device("set_control_value", device, |dev| {
            let (info, current) = dev
                .controls
                .get_mut(&control)
                .ok_or_else(|| UvcError::UnsupportedControl(control.to_string()))?;
            // Hardware clamps out-of-range requests
            *current = if info.has_min_max {
                value.clamp(info.min, info.max)
            } else {
                value
            };
            Ok(())
        })
    }
}

//! Capture format negotiation

use tracing::{debug, info};

use crate::capability::{CapabilityCatalog, Encoding, Resolution};
use crate::config::VideoConfig;
use crate::device::DeviceId;
use crate::engine::{CaptureEngine, SinkTarget};
use crate::error::{Result, UvcError};

/// What to ask the device for
#[derive(Debug, Clone, PartialEq)]
pub struct FormatRequest {
    pub resolution: Resolution,
    /// Encodings in preference order
    pub encodings: Vec<Encoding>,
    pub min_fps: f32,
    pub max_fps: f32,
}

impl FormatRequest {
    pub fn new(resolution: Resolution, video: &VideoConfig) -> Self {
        Self {
            resolution,
            encodings: video.encoding_order().to_vec(),
            min_fps: video.min_fps,
            max_fps: video.max_fps,
        }
    }

    /// Catalog entries with a frame rate inside the requested range
    pub fn usable(&self, catalog: &CapabilityCatalog) -> CapabilityCatalog {
        CapabilityCatalog::from_entries(
            catalog
                .entries()
                .iter()
                .filter(|e| e.supports_fps(self.min_fps, self.max_fps))
                .cloned(),
        )
    }
}

/// Pick the stream format for an open device
///
/// For each encoding in order the requested size is snapped to the nearest
/// catalog entry whose frame rates fit the range, and the engine is asked
/// to accept it. The first accepted encoding wins. There is no fallback to
/// another size when every encoding is refused.
pub fn negotiate(
    engine: &dyn CaptureEngine,
    device: DeviceId,
    catalog: &CapabilityCatalog,
    request: &FormatRequest,
) -> Result<SinkTarget> {
    let usable = request.usable(catalog);
    let wanted = request.resolution;
    let mut refusals = Vec::new();

    for &encoding in &request.encodings {
        let Some(entry) = usable.find_nearest(Some(encoding), wanted.width, wanted.height) else {
            refusals.push(format!("{} not offered", encoding));
            continue;
        };

        match engine.negotiate(device, encoding, entry.width(), entry.height()) {
            Ok(()) => {
                if entry.resolution != wanted {
                    info!(
                        "Device {}: {} not available, using nearest {} {}",
                        device, wanted, encoding, entry.resolution
                    );
                }
                return Ok(SinkTarget {
                    width: entry.width(),
                    height: entry.height(),
                    encoding,
                });
            }
            Err(e) => {
                debug!(
                    "Device {} refused {} {}: {}",
                    device, encoding, entry.resolution, e
                );
                refusals.push(format!("{} {} refused", encoding, entry.resolution));
            }
        }
    }

    Err(UvcError::StreamingUnavailable {
        device,
        reason: if refusals.is_empty() {
            "no encodings to try".to_string()
        } else {
            format!("no format accepted for {}: {}", wanted, refusals.join(", "))
        },
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::{Device, DeviceDescriptor};
    use crate::engine::sim::{EngineCall, SimulatedEngine, THETA_REPORT, WEBCAM_REPORT};

    fn open(report: &str) -> (SimulatedEngine, CapabilityCatalog) {
        let engine = SimulatedEngine::with_report(report);
        let device = Device::from(DeviceDescriptor {
            id: 1,
            ..Default::default()
        });
        engine.open(&device, Encoding::Mjpeg).unwrap();
        let catalog = CapabilityCatalog::parse(&engine.query_capabilities(1).unwrap()).unwrap();
        (engine, catalog)
    }

    fn request(width: u32, height: u32, prefer_h264: bool) -> FormatRequest {
        let video = VideoConfig {
            prefer_h264,
            ..Default::default()
        };
        FormatRequest::new(Resolution::new(width, height), &video)
    }

    #[test]
    fn test_exact_match_preferred_encoding() {
        let (engine, catalog) = open(WEBCAM_REPORT);
        let target = negotiate(&engine, 1, &catalog, &request(1280, 720, false)).unwrap();
        assert_eq!(target.encoding, Encoding::Mjpeg);
        assert_eq!(target.resolution(), Resolution::HD720);

        let target = negotiate(&engine, 1, &catalog, &request(1280, 720, true)).unwrap();
        assert_eq!(target.encoding, Encoding::H264);
    }

    #[test]
    fn test_snaps_to_nearest() {
        let (engine, catalog) = open(THETA_REPORT);
        let target = negotiate(&engine, 1, &catalog, &request(3840, 1920, true)).unwrap();
        assert_eq!(target.encoding, Encoding::H264);
        assert_eq!(target.resolution(), Resolution::new(3840, 2160));
    }

    #[test]
    fn test_falls_through_to_next_encoding() {
        let (engine, catalog) = open(WEBCAM_REPORT);
        engine.reject_encoding(Encoding::H264);
        let target = negotiate(&engine, 1, &catalog, &request(1920, 1080, true)).unwrap();
        assert_eq!(target.encoding, Encoding::Mjpeg);
        assert_eq!(target.resolution(), Resolution::HD1080);

        let negotiations: Vec<_> = engine
            .calls()
            .into_iter()
            .filter(|c| matches!(c, EngineCall::Negotiate(..)))
            .collect();
        assert_eq!(negotiations.len(), 2);
    }

    #[test]
    fn test_all_refused_is_unavailable() {
        let (engine, catalog) = open(WEBCAM_REPORT);
        engine.reject_encoding(Encoding::H264);
        engine.reject_encoding(Encoding::Mjpeg);
        let err = negotiate(&engine, 1, &catalog, &request(1280, 720, false)).unwrap_err();
        assert!(matches!(err, UvcError::StreamingUnavailable { device: 1, .. }));
    }

    #[test]
    fn test_fps_range_filters_entries() {
        let (engine, catalog) = open(WEBCAM_REPORT);
        let mut req = request(1280, 720, false);
        req.min_fps = 60.0;
        req.max_fps = 120.0;
        let err = negotiate(&engine, 1, &catalog, &req).unwrap_err();
        assert!(matches!(err, UvcError::StreamingUnavailable { .. }));
        // Nothing was offered, so the engine was never asked
        assert!(!engine
            .calls()
            .iter()
            .any(|c| matches!(c, EngineCall::Negotiate(..))));
    }

    #[test]
    fn test_empty_catalog() {
        let (engine, _) = open(WEBCAM_REPORT);
        let err = negotiate(&engine, 1, &CapabilityCatalog::default(), &request(640, 480, false))
            .unwrap_err();
        assert!(err.to_string().contains("not offered"));
    }
}

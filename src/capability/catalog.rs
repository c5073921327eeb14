//! Parsed device capability reports
//!
//! The engine describes what a device can stream as JSON:
//!
//! ```json
//! {
//!   "formats": [
//!     {
//!       "frame_type": 7,
//!       "default": 1,
//!       "size": ["640x480", "1280x720"],
//!       "frameRate": [[30, 15], [30, 15, 7.5]]
//!     }
//!   ]
//! }
//! ```
//!
//! Sizes are paired with frame-rate lists by index. Unpaired sizes, sizes
//! that do not parse and sizes with an empty frame-rate list are dropped.

use serde::{Deserialize, Serialize};
use tracing::debug;

use super::format::{Encoding, Resolution};
use crate::error::{Result, UvcError};

/// Lower frame rate bound used when the caller has no preference
pub const DEFAULT_MIN_FPS: f32 = 0.1;
/// Upper frame rate bound used when the caller has no preference
pub const DEFAULT_MAX_FPS: f32 = 121.0;

#[derive(Debug, Deserialize)]
struct RawReport {
    formats: Option<Vec<RawFormat>>,
}

#[derive(Debug, Deserialize)]
struct RawFormat {
    frame_type: u32,
    #[serde(default, rename = "default")]
    default_index: Option<usize>,
    #[serde(default)]
    size: Vec<String>,
    #[serde(default, rename = "frameRate")]
    frame_rate: Vec<Vec<f32>>,
}

/// One supported (encoding, size, frame rates) tuple
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CapabilityEntry {
    pub encoding: Encoding,
    pub resolution: Resolution,
    /// Frame rates in the order the device reported them, never empty
    pub frame_rates: Vec<f32>,
}

impl CapabilityEntry {
    pub fn width(&self) -> u32 {
        self.resolution.width
    }

    pub fn height(&self) -> u32 {
        self.resolution.height
    }

    /// Whether any frame rate lies in `[min_fps, max_fps]`
    pub fn supports_fps(&self, min_fps: f32, max_fps: f32) -> bool {
        self.frame_rates
            .iter()
            .any(|&fps| fps >= min_fps && fps <= max_fps)
    }

    pub fn max_fps(&self) -> f32 {
        self.frame_rates.iter().copied().fold(0.0, f32::max)
    }
}

/// Immutable set of capabilities for one device
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CapabilityCatalog {
    entries: Vec<CapabilityEntry>,
    /// Device-preferred entry index per encoding, as (encoding, index into `entries`)
    defaults: Vec<(Encoding, usize)>,
}

impl CapabilityCatalog {
    /// Parse an engine capability report
    ///
    /// Fails only when the report is not decodable at all. Individual bad
    /// entries are skipped.
    pub fn parse(report: &str) -> Result<Self> {
        let raw: RawReport = serde_json::from_str(report)
            .map_err(|e| UvcError::Format(format!("failed to parse capability report: {}", e)))?;

        let formats = raw
            .formats
            .ok_or_else(|| UvcError::Format("capability report has no formats".to_string()))?;

        let mut catalog = Self::default();
        for format in formats {
            let encoding = Encoding::from_code(format.frame_type);
            let paired = format.size.len().min(format.frame_rate.len());
            if paired < format.size.len() {
                debug!(
                    "Capability report for {} lists {} sizes but {} frame rate sets, truncating",
                    encoding,
                    format.size.len(),
                    format.frame_rate.len()
                );
            }

            for (index, (size, rates)) in format
                .size
                .iter()
                .zip(format.frame_rate.into_iter())
                .enumerate()
            {
                let Some(resolution) = Resolution::parse(size) else {
                    debug!("Skipping malformed size {:?} for {}", size, encoding);
                    continue;
                };
                if rates.is_empty() {
                    debug!("Skipping {} {} with no frame rates", encoding, resolution);
                    continue;
                }
                if format.default_index == Some(index) {
                    catalog.defaults.push((encoding, catalog.entries.len()));
                }
                catalog.entries.push(CapabilityEntry {
                    encoding,
                    resolution,
                    frame_rates: rates,
                });
            }
        }

        Ok(catalog)
    }

    /// Build a catalog from entries, dropping ones that violate the invariants
    pub fn from_entries(entries: impl IntoIterator<Item = CapabilityEntry>) -> Self {
        Self {
            entries: entries
                .into_iter()
                .filter(|e| e.resolution.is_valid() && !e.frame_rates.is_empty())
                .collect(),
            defaults: Vec::new(),
        }
    }

    pub fn entries(&self) -> &[CapabilityEntry] {
        &self.entries
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Distinct encodings in catalog order
    pub fn encodings(&self) -> Vec<Encoding> {
        let mut out: Vec<Encoding> = Vec::new();
        for entry in &self.entries {
            if !out.contains(&entry.encoding) {
                out.push(entry.encoding);
            }
        }
        out
    }

    /// The device-preferred entry for an encoding, if the report named one
    pub fn default_entry(&self, encoding: Encoding) -> Option<&CapabilityEntry> {
        self.defaults
            .iter()
            .find(|(enc, _)| *enc == encoding)
            .and_then(|(_, index)| self.entries.get(*index))
    }

    /// First entry of exactly `width`x`height` with a frame rate in range
    pub fn find(&self, width: u32, height: u32, min_fps: f32, max_fps: f32) -> Option<&CapabilityEntry> {
        self.entries.iter().find(|e| {
            e.width() == width && e.height() == height && e.supports_fps(min_fps, max_fps)
        })
    }

    /// Whether `width`x`height` is streamable at a frame rate in range
    pub fn is_supported(&self, width: u32, height: u32, min_fps: f32, max_fps: f32) -> bool {
        self.find(width, height, min_fps, max_fps).is_some()
    }

    /// [`is_supported`](Self::is_supported) with the default frame rate bounds
    pub fn is_supported_default(&self, width: u32, height: u32) -> bool {
        self.is_supported(width, height, DEFAULT_MIN_FPS, DEFAULT_MAX_FPS)
    }

    /// Exact or nearest entry for an encoding (`None` = any encoding)
    ///
    /// Exact size wins; otherwise the entry with the smallest squared
    /// distance in (width, height), first one on ties.
    pub fn find_nearest(
        &self,
        encoding: Option<Encoding>,
        width: u32,
        height: u32,
    ) -> Option<&CapabilityEntry> {
        let target = Resolution::new(width, height);
        let candidates = || {
            self.entries
                .iter()
                .filter(move |e| encoding.map_or(true, |enc| e.encoding == enc))
        };

        if let Some(exact) = candidates().find(|e| e.resolution == target) {
            return Some(exact);
        }

        let mut best: Option<(&CapabilityEntry, u128)> = None;
        for entry in candidates() {
            let d = entry.resolution.distance_sq(target);
            if best.map_or(true, |(_, best_d)| d < best_d) {
                best = Some((entry, d));
            }
        }
        best.map(|(entry, _)| entry)
    }
}

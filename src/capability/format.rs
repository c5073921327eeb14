//! Frame encodings and resolutions

use serde::{Deserialize, Serialize};
use std::fmt;

/// Frame encoding as reported in capability reports (`frame_type`)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Encoding {
    /// Uncompressed YUYV 4:2:2
    Yuyv,
    /// Motion JPEG
    Mjpeg,
    /// H.264 elementary stream
    H264,
    /// H.264 frame-based payload
    H264Frame,
    /// Any other frame type code the engine reports
    Other(u32),
}

impl Encoding {
    const CODE_YUYV: u32 = 0x000003;
    const CODE_MJPEG: u32 = 0x000007;
    const CODE_H264: u32 = 0x000014;
    const CODE_H264_FRAME: u32 = 0x030011;

    /// Convert from the engine's frame type code
    pub fn from_code(code: u32) -> Self {
        match code {
            Self::CODE_YUYV => Encoding::Yuyv,
            Self::CODE_MJPEG => Encoding::Mjpeg,
            Self::CODE_H264 => Encoding::H264,
            Self::CODE_H264_FRAME => Encoding::H264Frame,
            other => Encoding::Other(other),
        }
    }

    /// Engine frame type code
    pub fn code(&self) -> u32 {
        match self {
            Encoding::Yuyv => Self::CODE_YUYV,
            Encoding::Mjpeg => Self::CODE_MJPEG,
            Encoding::H264 => Self::CODE_H264,
            Encoding::H264Frame => Self::CODE_H264_FRAME,
            Encoding::Other(code) => *code,
        }
    }

    /// Check if the encoding is compressed
    pub fn is_compressed(&self) -> bool {
        matches!(self, Encoding::Mjpeg | Encoding::H264 | Encoding::H264Frame)
    }

    /// Negotiation order, most preferred first
    ///
    /// `prefer_h264`: H.264 > MJPEG, otherwise MJPEG > H.264.
    pub fn negotiation_order(prefer_h264: bool) -> [Encoding; 2] {
        if prefer_h264 {
            [Encoding::H264, Encoding::Mjpeg]
        } else {
            [Encoding::Mjpeg, Encoding::H264]
        }
    }
}

impl fmt::Display for Encoding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Encoding::Yuyv => write!(f, "YUYV"),
            Encoding::Mjpeg => write!(f, "MJPEG"),
            Encoding::H264 => write!(f, "H264"),
            Encoding::H264Frame => write!(f, "H264_FRAME"),
            Encoding::Other(code) => write!(f, "0x{:06x}", code),
        }
    }
}

impl std::str::FromStr for Encoding {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_uppercase().as_str() {
            "YUYV" | "YUV" => Ok(Encoding::Yuyv),
            "MJPEG" | "MJPG" => Ok(Encoding::Mjpeg),
            "H264" | "H.264" => Ok(Encoding::H264),
            "H264_FRAME" => Ok(Encoding::H264Frame),
            _ => Err(format!("Unknown encoding: {}", s)),
        }
    }
}

/// Resolution (width x height)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Resolution {
    pub width: u32,
    pub height: u32,
}

impl Resolution {
    pub const fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }

    pub fn is_valid(&self) -> bool {
        self.width > 0 && self.height > 0
    }

    /// Squared Euclidean distance to another resolution
    pub fn distance_sq(&self, other: Resolution) -> u128 {
        let dw = self.width.abs_diff(other.width) as u128;
        let dh = self.height.abs_diff(other.height) as u128;
        dw * dw + dh * dh
    }

    /// Parse the `"WxH"` form used in capability reports
    pub fn parse(s: &str) -> Option<Self> {
        let (w, h) = s.trim().split_once(['x', 'X'])?;
        let res = Self::new(w.trim().parse().ok()?, h.trim().parse().ok()?);
        res.is_valid().then_some(res)
    }

    pub const HD720: Resolution = Resolution::new(1280, 720);
    pub const HD1080: Resolution = Resolution::new(1920, 1080);
    /// Equirectangular 4K output of 360° cameras
    pub const EQUIRECT_4K: Resolution = Resolution::new(3840, 1920);
}

impl fmt::Display for Resolution {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}x{}", self.width, self.height)
    }
}

impl From<(u32, u32)> for Resolution {
    fn from((width, height): (u32, u32)) -> Self {
        Self { width, height }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_encoding_codes() {
        assert_eq!(Encoding::from_code(7), Encoding::Mjpeg);
        assert_eq!(Encoding::from_code(0x14), Encoding::H264);
        assert_eq!(Encoding::from_code(0x030011), Encoding::H264Frame);
        assert_eq!(Encoding::from_code(0x42), Encoding::Other(0x42));
        assert_eq!(Encoding::Other(0x42).code(), 0x42);
    }

    #[test]
    fn test_negotiation_order() {
        assert_eq!(
            Encoding::negotiation_order(true),
            [Encoding::H264, Encoding::Mjpeg]
        );
        assert_eq!(
            Encoding::negotiation_order(false),
            [Encoding::Mjpeg, Encoding::H264]
        );
    }

    #[test]
    fn test_resolution_parse() {
        assert_eq!(Resolution::parse("640x480"), Some(Resolution::new(640, 480)));
        assert_eq!(Resolution::parse(" 1920 X 1080 "), Some(Resolution::HD1080));
        assert_eq!(Resolution::parse("0x480"), None);
        assert_eq!(Resolution::parse("640"), None);
        assert_eq!(Resolution::parse("axb"), None);
    }

    #[test]
    fn test_distance() {
        let a = Resolution::new(3840, 1920);
        assert_eq!(a.distance_sq(a), 0);
        assert_eq!(
            Resolution::new(1920, 1080).distance_sq(Resolution::new(1280, 720)),
            640 * 640 + 360 * 360
        );
    }

    #[test]
    fn test_distance_extreme_sizes() {
        let huge = Resolution::new(u32::MAX, u32::MAX);
        let side = (u32::MAX - 1) as u128;
        assert_eq!(huge.distance_sq(Resolution::new(1, 1)), 2 * side * side);
        assert_eq!(Resolution::new(1, 1).distance_sq(huge), 2 * side * side);
        assert!(huge.is_valid());
    }
}

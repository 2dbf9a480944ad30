use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use shared_config::AppConfig;

use crate::error::ScanFailure;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PixelFormat {
    Luma8,
    Rgb8,
    Rgba8,
}

impl PixelFormat {
    pub fn channels(self) -> usize {
        match self {
            PixelFormat::Luma8 => 1,
            PixelFormat::Rgb8 => 3,
            PixelFormat::Rgba8 => 4,
        }
    }
}

/// One captured bitmap, row-major, no padding between rows.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawFrame {
    pub width: u32,
    pub height: u32,
    pub format: PixelFormat,
    pub pixels: Vec<u8>,
}

impl RawFrame {
    pub fn new(width: u32, height: u32, format: PixelFormat, pixels: Vec<u8>) -> Self {
        Self {
            width,
            height,
            format,
            pixels,
        }
    }

    pub fn luma(width: u32, height: u32, pixels: Vec<u8>) -> Self {
        Self::new(width, height, PixelFormat::Luma8, pixels)
    }

    pub fn rgba(width: u32, height: u32, pixels: Vec<u8>) -> Self {
        Self::new(width, height, PixelFormat::Rgba8, pixels)
    }

    /// Buffer length implied by the dimensions, `None` on overflow.
    pub fn expected_len(&self) -> Option<usize> {
        (self.width as usize)
            .checked_mul(self.height as usize)?
            .checked_mul(self.format.channels())
    }

    pub fn is_well_formed(&self) -> bool {
        self.width > 0 && self.height > 0 && self.expected_len() == Some(self.pixels.len())
    }

    /// Luminance of one pixel, `None` when the pixel lies outside the buffer.
    pub fn luminance(&self, x: usize, y: usize) -> Option<u8> {
        if x >= self.width as usize || y >= self.height as usize {
            return None;
        }
        let channels = self.format.channels();
        let offset = y
            .checked_mul(self.width as usize)?
            .checked_add(x)?
            .checked_mul(channels)?;
        let pixel = self.pixels.get(offset..offset.checked_add(channels)?)?;
        match self.format {
            PixelFormat::Luma8 => Some(pixel[0]),
            PixelFormat::Rgb8 | PixelFormat::Rgba8 => {
                let (r, g, b) = (pixel[0] as u32, pixel[1] as u32, pixel[2] as u32);
                Some(((299 * r + 587 * g + 114 * b) / 1000) as u8)
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DecodedPayload {
    pub text: String,
}

/// Result of one decode attempt. Absence is a normal outcome, not an error.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DecodeOutcome {
    Found(DecodedPayload),
    NotFound,
}

impl DecodeOutcome {
    pub fn is_found(&self) -> bool {
        matches!(self, DecodeOutcome::Found(_))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InterpretedIdentifier {
    pub patient_id: String,
}

impl InterpretedIdentifier {
    pub fn new(patient_id: impl Into<String>) -> Self {
        Self {
            patient_id: patient_id.into(),
        }
    }
}

/// How a decoded payload was classified before any identifier checks.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PayloadShape {
    /// A JSON object; carries the identifier field when present and non-empty.
    Structured(Option<String>),
    /// Not structured data, kept verbatim for the bare-identifier check.
    BareString(String),
    Unparseable,
}

/// Opaque health summary returned by the lookup backend, passed through verbatim.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct HealthSummary(pub Value);

impl HealthSummary {
    pub fn patient_name(&self) -> Option<&str> {
        self.0
            .pointer("/patient/name")
            .or_else(|| self.0.get("name"))
            .and_then(Value::as_str)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScanMode {
    Manual,
    Camera,
    FileUpload,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ResolvedScan {
    pub patient_id: String,
    pub summary: HealthSummary,
    pub resolved_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum ScanSessionState {
    Idle,
    Acquiring { mode: ScanMode },
    Detected { patient_id: String },
    Resolved(ResolvedScan),
    Failed(ScanFailure),
}

impl ScanSessionState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, ScanSessionState::Resolved(_) | ScanSessionState::Failed(_))
    }

    pub fn name(&self) -> &'static str {
        match self {
            ScanSessionState::Idle => "idle",
            ScanSessionState::Acquiring { .. } => "acquiring",
            ScanSessionState::Detected { .. } => "detected",
            ScanSessionState::Resolved(_) => "resolved",
            ScanSessionState::Failed(_) => "failed",
        }
    }

    pub fn can_transition_to(&self, target: &ScanSessionState) -> bool {
        use ScanSessionState::*;
        match (self, target) {
            (_, Idle) => true,
            (Idle, Acquiring { .. }) => true,
            // Manual entry skips acquisition.
            (Idle, Detected { .. }) => true,
            (Idle, Failed(_)) => true,
            (Acquiring { .. }, Detected { .. }) => true,
            (Acquiring { .. }, Failed(_)) => true,
            (Detected { .. }, Resolved(_)) => true,
            (Detected { .. }, Failed(_)) => true,
            _ => false,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FacingMode {
    User,
    Environment,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CameraConstraints {
    pub facing: FacingMode,
    pub width: u32,
    pub height: u32,
}

impl Default for CameraConstraints {
    fn default() -> Self {
        Self {
            facing: FacingMode::Environment,
            width: 640,
            height: 480,
        }
    }
}

#[derive(Debug, Clone)]
pub struct ScanConfig {
    pub sample_interval: Duration,
    pub resolve_timeout: Option<Duration>,
    pub identifier_length: usize,
    pub camera: CameraConstraints,
}

impl Default for ScanConfig {
    fn default() -> Self {
        Self {
            sample_interval: Duration::from_millis(500),
            resolve_timeout: Some(Duration::from_secs(10)),
            identifier_length: 24,
            camera: CameraConstraints::default(),
        }
    }
}

impl ScanConfig {
    pub fn from_app_config(config: &AppConfig) -> Self {
        Self {
            sample_interval: Duration::from_millis(config.scan_sample_interval_ms.max(1)),
            // Zero disables the deadline.
            resolve_timeout: (config.lookup_timeout_secs > 0)
                .then(|| Duration::from_secs(config.lookup_timeout_secs)),
            identifier_length: config.patient_id_length,
            camera: CameraConstraints {
                facing: FacingMode::Environment,
                width: config.camera_width,
                height: config.camera_height,
            },
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ManualScanRequest {
    pub patient_id: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DecodeResponse {
    pub text: String,
    pub patient_id: String,
}

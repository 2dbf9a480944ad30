#![allow(dead_code)]

use std::io::Cursor;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::json;
use tokio::sync::Notify;

use qr_scan_cell::{
    HealthSummary, PatientResolver, PayloadInterpreter, RawFrame, ResolutionError, RqrrDecoder,
    ScanConfig, ScanSessionController, ScanSessionState,
};

pub const PATIENT_ID: &str = "64f1a2b3c4d5e6f7a8b9c0d1";

/// Renders `text` as a QR symbol: 6px modules, 4-module quiet zone.
pub fn qr_frame(text: &str) -> RawFrame {
    let code = qrcode::QrCode::new(text.as_bytes()).expect("payload fits in a QR code");
    let modules = code.width();
    let colors = code.to_colors();
    let (scale, quiet) = (6usize, 4usize);
    let side = (modules + 2 * quiet) * scale;

    let mut pixels = vec![255u8; side * side];
    for y in 0..side {
        for x in 0..side {
            let (mx, my) = (x / scale, y / scale);
            let inside = (quiet..modules + quiet).contains(&mx) && (quiet..modules + quiet).contains(&my);
            if inside && colors[(my - quiet) * modules + (mx - quiet)] == qrcode::Color::Dark {
                pixels[y * side + x] = 0;
            }
        }
    }
    RawFrame::luma(side as u32, side as u32, pixels)
}

pub fn blank_frame() -> RawFrame {
    RawFrame::luma(120, 90, vec![230; 120 * 90])
}

pub fn encode_png(frame: &RawFrame) -> Vec<u8> {
    let image = image::GrayImage::from_raw(frame.width, frame.height, frame.pixels.clone())
        .expect("luma frame");
    let mut bytes = Vec::new();
    image::DynamicImage::ImageLuma8(image)
        .write_to(&mut Cursor::new(&mut bytes), image::ImageFormat::Png)
        .expect("png encoding");
    bytes
}

pub fn qr_png(text: &str) -> Vec<u8> {
    encode_png(&qr_frame(text))
}

pub fn structured_payload(patient_id: &str) -> String {
    json!({ "patient_id": patient_id }).to_string()
}

pub fn summary_for(patient_id: &str) -> HealthSummary {
    HealthSummary(json!({
        "patient": { "id": patient_id, "name": "Ada Lovelace" },
        "vitals": { "heart_rate": 72 },
        "medications": [],
        "prescriptions": [],
        "appointments": []
    }))
}

/// Resolver that records calls and, when gated, waits for `open` before answering.
pub struct FakeResolver {
    calls: AtomicUsize,
    finished: AtomicUsize,
    seen: Mutex<Vec<String>>,
    gate: Option<Notify>,
    response: Result<HealthSummary, ResolutionError>,
}

impl FakeResolver {
    pub fn answering(response: Result<HealthSummary, ResolutionError>) -> Arc<Self> {
        Arc::new(Self {
            calls: AtomicUsize::new(0),
            finished: AtomicUsize::new(0),
            seen: Mutex::new(Vec::new()),
            gate: None,
            response,
        })
    }

    pub fn found() -> Arc<Self> {
        Self::answering(Ok(summary_for(PATIENT_ID)))
    }

    pub fn gated(response: Result<HealthSummary, ResolutionError>) -> Arc<Self> {
        Arc::new(Self {
            calls: AtomicUsize::new(0),
            finished: AtomicUsize::new(0),
            seen: Mutex::new(Vec::new()),
            gate: Some(Notify::new()),
            response,
        })
    }

    pub fn open(&self) {
        if let Some(gate) = &self.gate {
            gate.notify_one();
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn finished(&self) -> usize {
        self.finished.load(Ordering::SeqCst)
    }

    pub fn seen(&self) -> Vec<String> {
        self.seen.lock().unwrap().clone()
    }
}

#[async_trait]
impl PatientResolver for FakeResolver {
    async fn resolve(&self, patient_id: &str) -> Result<HealthSummary, ResolutionError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.seen.lock().unwrap().push(patient_id.to_string());
        if let Some(gate) = &self.gate {
            gate.notified().await;
        }
        self.finished.fetch_add(1, Ordering::SeqCst);
        self.response.clone()
    }
}

pub fn scan_config() -> ScanConfig {
    ScanConfig {
        sample_interval: Duration::from_millis(500),
        resolve_timeout: None,
        ..ScanConfig::default()
    }
}

pub fn controller(resolver: Arc<dyn PatientResolver>, config: ScanConfig) -> ScanSessionController {
    ScanSessionController::new(
        Arc::new(RqrrDecoder::new()),
        PayloadInterpreter::from_config(&config),
        resolver,
        config,
    )
}

pub async fn wait_terminal(controller: &ScanSessionController) -> ScanSessionState {
    let mut rx = controller.subscribe();
    let state = rx
        .wait_for(|state| state.is_terminal())
        .await
        .expect("controller alive")
        .clone();
    state
}

pub async fn wait_detected(controller: &ScanSessionController) {
    let mut rx = controller.subscribe();
    rx.wait_for(|state| matches!(state, ScanSessionState::Detected { .. }))
        .await
        .expect("controller alive");
}

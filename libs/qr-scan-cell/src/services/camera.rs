use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use tracing::{debug, info};

use crate::error::AcquisitionError;
use crate::models::{CameraConstraints, RawFrame, ScanMode};
use crate::services::source::{AcquisitionSource, Candidate};

/// A video input that can be opened for exclusive capture.
#[async_trait]
pub trait VideoDevice: Send + Sync {
    async fn open(
        &self,
        constraints: &CameraConstraints,
    ) -> Result<Box<dyn MediaStream>, AcquisitionError>;
}

/// A live capture handle. Tracks stay live until `stop` is called.
pub trait MediaStream: Send {
    /// The frame currently visible, if the device has produced one.
    fn current_frame(&mut self) -> Option<RawFrame>;

    fn active_tracks(&self) -> usize;

    fn stop(&mut self);
}

/// Camera acquisition source. Releases the device on `release` and on drop.
pub struct CameraSource {
    device: Arc<dyn VideoDevice>,
    constraints: CameraConstraints,
    stream: Option<Box<dyn MediaStream>>,
}

impl CameraSource {
    pub fn new(device: Arc<dyn VideoDevice>, constraints: CameraConstraints) -> Self {
        Self {
            device,
            constraints,
            stream: None,
        }
    }

    pub fn is_streaming(&self) -> bool {
        self.stream
            .as_ref()
            .map(|stream| stream.active_tracks() > 0)
            .unwrap_or(false)
    }
}

#[async_trait]
impl AcquisitionSource for CameraSource {
    fn mode(&self) -> ScanMode {
        ScanMode::Camera
    }

    fn is_continuous(&self) -> bool {
        true
    }

    async fn acquire(&mut self) -> Result<(), AcquisitionError> {
        self.release();
        let stream = self.device.open(&self.constraints).await?;
        info!(
            "Camera acquired ({:?}, {}x{}, {} tracks)",
            self.constraints.facing,
            self.constraints.width,
            self.constraints.height,
            stream.active_tracks()
        );
        self.stream = Some(stream);
        Ok(())
    }

    fn next_candidate(&mut self) -> Result<Option<Candidate>, AcquisitionError> {
        Ok(self
            .stream
            .as_mut()
            .and_then(|stream| stream.current_frame())
            .map(Candidate::Frame))
    }

    fn release(&mut self) {
        if let Some(mut stream) = self.stream.take() {
            stream.stop();
            info!("Camera released");
        }
    }
}

impl Drop for CameraSource {
    fn drop(&mut self) {
        AcquisitionSource::release(self);
    }
}

/// Device that replays a fixed sequence of frames in a loop.
///
/// Hands out one stream at a time and counts live tracks, so callers can
/// check that every stream was stopped.
pub struct ReplayDevice {
    frames: Arc<Vec<RawFrame>>,
    live_tracks: Arc<AtomicUsize>,
    opened: AtomicUsize,
    failure: Option<AcquisitionError>,
    requested: Mutex<Option<CameraConstraints>>,
}

impl ReplayDevice {
    pub fn new(frames: Vec<RawFrame>) -> Self {
        Self {
            frames: Arc::new(frames),
            live_tracks: Arc::new(AtomicUsize::new(0)),
            opened: AtomicUsize::new(0),
            failure: None,
            requested: Mutex::new(None),
        }
    }

    /// A device whose every `open` fails with `error`.
    pub fn unavailable(error: AcquisitionError) -> Self {
        Self {
            failure: Some(error),
            ..Self::new(Vec::new())
        }
    }

    pub fn live_tracks(&self) -> usize {
        self.live_tracks.load(Ordering::SeqCst)
    }

    pub fn open_count(&self) -> usize {
        self.opened.load(Ordering::SeqCst)
    }

    pub fn last_constraints(&self) -> Option<CameraConstraints> {
        self.requested.lock().ok().and_then(|requested| *requested)
    }
}

#[async_trait]
impl VideoDevice for ReplayDevice {
    async fn open(
        &self,
        constraints: &CameraConstraints,
    ) -> Result<Box<dyn MediaStream>, AcquisitionError> {
        if let Ok(mut requested) = self.requested.lock() {
            *requested = Some(*constraints);
        }
        if let Some(error) = &self.failure {
            return Err(error.clone());
        }
        if self
            .live_tracks
            .compare_exchange(0, 1, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return Err(AcquisitionError::DeviceBusy);
        }

        self.opened.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(ReplayStream {
            frames: Arc::clone(&self.frames),
            cursor: 0,
            live_tracks: Arc::clone(&self.live_tracks),
            stopped: false,
        }))
    }
}

struct ReplayStream {
    frames: Arc<Vec<RawFrame>>,
    cursor: usize,
    live_tracks: Arc<AtomicUsize>,
    stopped: bool,
}

impl MediaStream for ReplayStream {
    fn current_frame(&mut self) -> Option<RawFrame> {
        if self.stopped || self.frames.is_empty() {
            return None;
        }
        let frame = self.frames[self.cursor % self.frames.len()].clone();
        self.cursor += 1;
        Some(frame)
    }

    fn active_tracks(&self) -> usize {
        if self.stopped {
            0
        } else {
            1
        }
    }

    fn stop(&mut self) {
        if !self.stopped {
            self.stopped = true;
            self.live_tracks.fetch_sub(1, Ordering::SeqCst);
            debug!("Replay stream stopped after {} frames", self.cursor);
        }
    }
}

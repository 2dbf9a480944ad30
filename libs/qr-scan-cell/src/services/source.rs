use std::path::Path;

use async_trait::async_trait;
use tracing::debug;

use crate::error::AcquisitionError;
use crate::models::{RawFrame, ScanMode};

/// What an acquisition source hands to the scan pipeline.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Candidate {
    /// Typed by the operator; skips decoding and interpretation.
    Identifier(String),
    Frame(RawFrame),
}

/// Origin of data for one scan session.
///
/// Continuous sources are sampled by the controller on a fixed cadence;
/// single-shot sources are asked for exactly one candidate.
#[async_trait]
pub trait AcquisitionSource: Send {
    fn mode(&self) -> ScanMode;

    fn is_continuous(&self) -> bool {
        false
    }

    /// Claims whatever the source needs (device access, file contents).
    async fn acquire(&mut self) -> Result<(), AcquisitionError> {
        Ok(())
    }

    /// `Ok(None)` means nothing to offer right now.
    fn next_candidate(&mut self) -> Result<Option<Candidate>, AcquisitionError>;

    /// Gives back anything claimed in `acquire`. Must be safe to call repeatedly.
    fn release(&mut self) {}
}

#[derive(Debug, Clone)]
pub struct ManualEntry {
    input: String,
    submitted: bool,
}

impl ManualEntry {
    pub fn new(input: impl Into<String>) -> Self {
        Self {
            input: input.into(),
            submitted: false,
        }
    }
}

#[async_trait]
impl AcquisitionSource for ManualEntry {
    fn mode(&self) -> ScanMode {
        ScanMode::Manual
    }

    fn next_candidate(&mut self) -> Result<Option<Candidate>, AcquisitionError> {
        if self.submitted {
            return Ok(None);
        }
        self.submitted = true;

        let patient_id = self.input.trim();
        if patient_id.is_empty() {
            return Err(AcquisitionError::EmptyInput);
        }
        Ok(Some(Candidate::Identifier(patient_id.to_string())))
    }
}

/// A single user-selected image, decoded client-side into one frame.
#[derive(Debug, Clone)]
pub struct FileUpload {
    bytes: Vec<u8>,
    frame: Option<RawFrame>,
    consumed: bool,
}

impl FileUpload {
    pub fn from_bytes(bytes: impl Into<Vec<u8>>) -> Self {
        Self {
            bytes: bytes.into(),
            frame: None,
            consumed: false,
        }
    }

    pub async fn from_path(path: impl AsRef<Path>) -> Result<Self, AcquisitionError> {
        let path = path.as_ref();
        let bytes = tokio::fs::read(path)
            .await
            .map_err(|e| AcquisitionError::UnreadableImage(format!("{}: {}", path.display(), e)))?;
        Ok(Self::from_bytes(bytes))
    }

    fn decode_image(bytes: &[u8]) -> Result<RawFrame, AcquisitionError> {
        let image = image::load_from_memory(bytes)
            .map_err(|e| AcquisitionError::UnreadableImage(e.to_string()))?
            .to_luma8();
        let (width, height) = image.dimensions();
        Ok(RawFrame::luma(width, height, image.into_raw()))
    }
}

#[async_trait]
impl AcquisitionSource for FileUpload {
    fn mode(&self) -> ScanMode {
        ScanMode::FileUpload
    }

    async fn acquire(&mut self) -> Result<(), AcquisitionError> {
        if self.frame.is_none() {
            let bytes = std::mem::take(&mut self.bytes);
            let frame = tokio::task::spawn_blocking(move || Self::decode_image(&bytes))
                .await
                .map_err(|err| AcquisitionError::UnreadableImage(format!("task join error: {err}")))??;
            debug!("Decoded uploaded image into {}x{} frame", frame.width, frame.height);
            self.frame = Some(frame);
        }
        Ok(())
    }

    fn next_candidate(&mut self) -> Result<Option<Candidate>, AcquisitionError> {
        if self.consumed {
            return Ok(None);
        }
        self.consumed = true;
        Ok(self.frame.take().map(Candidate::Frame))
    }

    fn release(&mut self) {
        self.frame = None;
        self.bytes = Vec::new();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;
    use std::io::Cursor;

    fn png(width: u32, height: u32, fill: u8) -> Vec<u8> {
        let image = image::GrayImage::from_pixel(width, height, image::Luma([fill]));
        let mut bytes = Vec::new();
        image::DynamicImage::ImageLuma8(image)
            .write_to(&mut Cursor::new(&mut bytes), image::ImageFormat::Png)
            .unwrap();
        bytes
    }

    #[test]
    fn test_manual_entry_trims_and_yields_once() {
        let mut entry = ManualEntry::new("  64f1a2b3c4d5e6f7a8b9c0d1\n");
        assert_eq!(entry.mode(), ScanMode::Manual);
        assert!(!entry.is_continuous());
        assert_eq!(
            entry.next_candidate().unwrap(),
            Some(Candidate::Identifier("64f1a2b3c4d5e6f7a8b9c0d1".to_string()))
        );
        assert_eq!(entry.next_candidate().unwrap(), None);
    }

    #[test]
    fn test_manual_entry_rejects_blank() {
        assert_matches!(
            ManualEntry::new("   ").next_candidate(),
            Err(AcquisitionError::EmptyInput)
        );
    }

    #[tokio::test]
    async fn test_file_upload_decodes_once() {
        let mut upload = FileUpload::from_bytes(png(8, 4, 200));
        upload.acquire().await.unwrap();

        let frame = match upload.next_candidate().unwrap() {
            Some(Candidate::Frame(frame)) => frame,
            other => panic!("expected a frame, got {:?}", other),
        };
        assert_eq!((frame.width, frame.height), (8, 4));
        assert!(frame.pixels.iter().all(|&p| p == 200));
        assert_eq!(upload.next_candidate().unwrap(), None);
    }

    #[tokio::test]
    async fn test_file_upload_rejects_non_images() {
        let mut upload = FileUpload::from_bytes(b"definitely not a png".to_vec());
        assert_matches!(upload.acquire().await, Err(AcquisitionError::UnreadableImage(_)));
    }

    #[tokio::test]
    async fn test_file_upload_from_path() {
        let file = tempfile::NamedTempFile::new().unwrap();
        std::fs::write(file.path(), png(3, 3, 0)).unwrap();

        let mut upload = FileUpload::from_path(file.path()).await.unwrap();
        upload.acquire().await.unwrap();
        assert_matches!(upload.next_candidate(), Ok(Some(Candidate::Frame(_))));

        assert_matches!(
            FileUpload::from_path(file.path().with_extension("missing")).await,
            Err(AcquisitionError::UnreadableImage(_))
        );
    }
}

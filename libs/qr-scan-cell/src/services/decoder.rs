use std::sync::Arc;

use tracing::{debug, warn};

use crate::models::{DecodeOutcome, DecodedPayload, RawFrame};

/// Locates and decodes a QR symbol in one frame.
///
/// Implementations keep no state between calls: decoding the same frame twice
/// yields the same outcome. Unreadable input is reported as `NotFound`.
pub trait QrDecoder: Send + Sync {
    fn decode(&self, frame: &RawFrame) -> DecodeOutcome;
}

/// Decoder backed by `rqrr`.
#[derive(Debug, Default, Clone, Copy)]
pub struct RqrrDecoder;

impl RqrrDecoder {
    pub fn new() -> Self {
        Self
    }
}

impl QrDecoder for RqrrDecoder {
    fn decode(&self, frame: &RawFrame) -> DecodeOutcome {
        if !frame.is_well_formed() {
            debug!(
                "Ignoring malformed frame {}x{} ({:?}, {} bytes)",
                frame.width,
                frame.height,
                frame.format,
                frame.pixels.len()
            );
            return DecodeOutcome::NotFound;
        }

        let mut prepared = rqrr::PreparedImage::prepare_from_greyscale(
            frame.width as usize,
            frame.height as usize,
            |x, y| frame.luminance(x, y).unwrap_or(u8::MAX),
        );

        for grid in prepared.detect_grids() {
            match grid.decode() {
                Ok((_meta, text)) => return DecodeOutcome::Found(DecodedPayload { text }),
                Err(e) => debug!("Located a QR grid but could not decode it: {:?}", e),
            }
        }

        DecodeOutcome::NotFound
    }
}

/// Runs `decoder` on the blocking pool so grid detection never stalls the
/// async workers.
pub async fn decode_blocking(decoder: Arc<dyn QrDecoder>, frame: RawFrame) -> DecodeOutcome {
    match tokio::task::spawn_blocking(move || decoder.decode(&frame)).await {
        Ok(outcome) => outcome,
        Err(err) => {
            warn!("QR decode task failed: {}", err);
            DecodeOutcome::NotFound
        }
    }
}

use serde_json::Value;
use tracing::debug;

use crate::error::InterpretationError;
use crate::models::{InterpretedIdentifier, PayloadShape, ScanConfig};

/// Field names accepted for the identifier inside a structured payload, in
/// priority order.
pub const PATIENT_ID_FIELDS: [&str; 2] = ["patient_id", "patientId"];

/// Turns decoded QR text into a patient identifier.
///
/// Two conventions are in circulation: a JSON object carrying the identifier,
/// or the bare identifier itself. A bare string is only accepted when its
/// length matches the backend's identifier length.
#[derive(Debug, Clone)]
pub struct PayloadInterpreter {
    identifier_length: usize,
}

impl Default for PayloadInterpreter {
    fn default() -> Self {
        Self::new(ScanConfig::default().identifier_length)
    }
}

impl PayloadInterpreter {
    pub fn new(identifier_length: usize) -> Self {
        Self { identifier_length }
    }

    pub fn from_config(config: &ScanConfig) -> Self {
        Self::new(config.identifier_length)
    }

    pub fn identifier_length(&self) -> usize {
        self.identifier_length
    }

    pub fn classify(&self, text: &str) -> PayloadShape {
        match serde_json::from_str::<Value>(text) {
            Ok(Value::Object(record)) => PayloadShape::Structured(
                PATIENT_ID_FIELDS
                    .iter()
                    .filter_map(|field| record.get(*field).and_then(Value::as_str))
                    .find(|id| !id.is_empty())
                    .map(str::to_string),
            ),
            _ if !text.is_empty() && text.chars().count() == self.identifier_length => {
                PayloadShape::BareString(text.to_string())
            }
            _ => PayloadShape::Unparseable,
        }
    }

    pub fn interpret(&self, text: &str) -> Result<InterpretedIdentifier, InterpretationError> {
        match self.classify(text) {
            PayloadShape::Structured(Some(patient_id)) => Ok(InterpretedIdentifier::new(patient_id)),
            PayloadShape::Structured(None) => {
                debug!("Structured QR payload has no patient identifier");
                Err(InterpretationError::MissingIdentifierField)
            }
            PayloadShape::BareString(patient_id) => Ok(InterpretedIdentifier::new(patient_id)),
            PayloadShape::Unparseable => {
                debug!(
                    "QR payload of {} chars is neither structured nor a bare identifier",
                    text.chars().count()
                );
                Err(InterpretationError::UnrecognizedFormat)
            }
        }
    }
}

use thiserror::Error;

use shared_models::error::AppError;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum AcquisitionError {
    #[error("Camera permission denied")]
    PermissionDenied,

    #[error("No camera device available")]
    NoDevice,

    #[error("Camera is already in use")]
    DeviceBusy,

    #[error("Uploaded file is not a readable image: {0}")]
    UnreadableImage(String),

    #[error("Patient ID must not be empty")]
    EmptyInput,
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum InterpretationError {
    #[error("missing identifier field")]
    MissingIdentifierField,

    #[error("unrecognized format")]
    UnrecognizedFormat,
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ResolutionError {
    #[error("patient not found")]
    NotFound,

    #[error("patient lookup failed: {0}")]
    Transient(String),
}

/// Why a scan session ended in `Failed`. Every variant is terminal for the session.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ScanFailure {
    #[error("acquisition failed: {0}")]
    Acquisition(#[from] AcquisitionError),

    #[error("no QR code found in image")]
    NoCodeFound,

    #[error("invalid QR payload: {0}")]
    Interpretation(#[from] InterpretationError),

    #[error("resolution failed: {0}")]
    Resolution(#[from] ResolutionError),
}

impl ScanFailure {
    pub fn kind(&self) -> &'static str {
        match self {
            ScanFailure::Acquisition(_) => "acquisition",
            ScanFailure::NoCodeFound => "no_code_found",
            ScanFailure::Interpretation(_) => "interpretation",
            ScanFailure::Resolution(ResolutionError::NotFound) => "not_found",
            ScanFailure::Resolution(ResolutionError::Transient(_)) => "transient",
        }
    }

    /// Text shown to the operator.
    pub fn user_message(&self) -> String {
        match self {
            ScanFailure::Acquisition(AcquisitionError::PermissionDenied) => {
                "Camera access was denied. Allow camera access or upload an image instead.".to_string()
            }
            ScanFailure::Acquisition(err) => err.to_string(),
            ScanFailure::NoCodeFound => {
                "No QR code found in the image. Try another image or enter the patient ID manually."
                    .to_string()
            }
            ScanFailure::Interpretation(_) => {
                "Invalid QR code format. Please try manual entry.".to_string()
            }
            ScanFailure::Resolution(ResolutionError::NotFound) => "Patient not found".to_string(),
            ScanFailure::Resolution(ResolutionError::Transient(_)) => {
                "Could not reach the patient records service. Please try again.".to_string()
            }
        }
    }
}

impl From<ScanFailure> for AppError {
    fn from(failure: ScanFailure) -> Self {
        let message = failure.user_message();
        match failure {
            ScanFailure::Resolution(ResolutionError::NotFound) => AppError::NotFound(message),
            ScanFailure::Resolution(ResolutionError::Transient(_)) => {
                AppError::ExternalService(message)
            }
            ScanFailure::Acquisition(_)
            | ScanFailure::NoCodeFound
            | ScanFailure::Interpretation(_) => AppError::Unprocessable(message),
        }
    }
}

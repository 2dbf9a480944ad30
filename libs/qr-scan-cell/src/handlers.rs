use std::sync::Arc;

use axum::{body::Bytes, extract::State, Extension, Json};
use axum_extra::TypedHeader;
use headers::{authorization::Bearer, Authorization};
use tracing::info;

use shared_config::AppConfig;
use shared_models::auth::User;
use shared_models::error::AppError;
use shared_records::{RecordsClient, RecordsError};

use crate::error::ScanFailure;
use crate::models::{
    DecodeOutcome, DecodeResponse, ManualScanRequest, ResolvedScan, ScanConfig, ScanSessionState,
};
use crate::services::{
    decode_blocking, AcquisitionSource, Candidate, FileUpload, HttpPatientResolver, LookupAuth,
    ManualEntry, PayloadInterpreter, QrDecoder, RqrrDecoder, ScanSessionController,
};

/// Shared collaborators for the scan endpoints. Each request gets its own
/// session controller.
#[derive(Clone)]
pub struct ScanState {
    pub config: Arc<AppConfig>,
    pub records: Arc<RecordsClient>,
    pub decoder: Arc<dyn QrDecoder>,
    pub interpreter: PayloadInterpreter,
    pub scan_config: ScanConfig,
}

impl ScanState {
    pub fn new(config: Arc<AppConfig>) -> Result<Self, RecordsError> {
        let records = Arc::new(RecordsClient::new(&config)?);
        let scan_config = ScanConfig::from_app_config(&config);

        Ok(Self {
            interpreter: PayloadInterpreter::from_config(&scan_config),
            decoder: Arc::new(RqrrDecoder::new()),
            records,
            scan_config,
            config,
        })
    }

    pub fn controller(&self, auth: LookupAuth) -> ScanSessionController {
        let resolver = HttpPatientResolver::new(self.records.clone(), self.config.clone(), auth);
        ScanSessionController::new(
            self.decoder.clone(),
            self.interpreter.clone(),
            Arc::new(resolver),
            self.scan_config.clone(),
        )
    }
}

async fn run_session(
    state: &ScanState,
    auth: LookupAuth,
    source: Box<dyn AcquisitionSource>,
) -> Result<Json<ResolvedScan>, AppError> {
    let controller = state.controller(auth);

    match controller.start(source).await {
        ScanSessionState::Resolved(scan) => Ok(Json(scan)),
        ScanSessionState::Failed(failure) => Err(failure.into()),
        other => Err(AppError::Internal(format!(
            "Scan session ended in unexpected state: {}",
            other.name()
        ))),
    }
}

fn upload_source(body: Bytes) -> Result<Box<dyn AcquisitionSource>, AppError> {
    if body.is_empty() {
        return Err(AppError::BadRequest("Request body must contain an image".to_string()));
    }
    Ok(Box::new(FileUpload::from_bytes(body.to_vec())))
}

#[axum::debug_handler]
pub async fn manual_scan(
    State(state): State<ScanState>,
    Json(request): Json<ManualScanRequest>,
) -> Result<Json<ResolvedScan>, AppError> {
    run_session(&state, LookupAuth::Public, Box::new(ManualEntry::new(request.patient_id))).await
}

#[axum::debug_handler]
pub async fn upload_scan(
    State(state): State<ScanState>,
    body: Bytes,
) -> Result<Json<ResolvedScan>, AppError> {
    run_session(&state, LookupAuth::Public, upload_source(body)?).await
}

/// Decode and interpret an uploaded image without looking the patient up.
#[axum::debug_handler]
pub async fn decode_image(
    State(state): State<ScanState>,
    body: Bytes,
) -> Result<Json<DecodeResponse>, AppError> {
    let mut upload = upload_source(body)?;
    upload.acquire().await.map_err(ScanFailure::from)?;

    let frame = match upload.next_candidate().map_err(ScanFailure::from)? {
        Some(Candidate::Frame(frame)) => frame,
        _ => return Err(ScanFailure::NoCodeFound.into()),
    };
    upload.release();

    let payload = match decode_blocking(state.decoder.clone(), frame).await {
        DecodeOutcome::Found(payload) => payload,
        DecodeOutcome::NotFound => return Err(ScanFailure::NoCodeFound.into()),
    };
    let identifier = state
        .interpreter
        .interpret(&payload.text)
        .map_err(ScanFailure::from)?;

    Ok(Json(DecodeResponse {
        text: payload.text,
        patient_id: identifier.patient_id,
    }))
}

#[axum::debug_handler]
pub async fn doctor_manual_scan(
    State(state): State<ScanState>,
    TypedHeader(auth): TypedHeader<Authorization<Bearer>>,
    Extension(user): Extension<User>,
    Json(request): Json<ManualScanRequest>,
) -> Result<Json<ResolvedScan>, AppError> {
    info!("Doctor {} looking up patient by manual entry", user.id);
    let source = Box::new(ManualEntry::new(request.patient_id));
    run_session(&state, LookupAuth::Bearer(auth.token().to_string()), source).await
}

#[axum::debug_handler]
pub async fn doctor_upload_scan(
    State(state): State<ScanState>,
    TypedHeader(auth): TypedHeader<Authorization<Bearer>>,
    Extension(user): Extension<User>,
    body: Bytes,
) -> Result<Json<ResolvedScan>, AppError> {
    info!("Doctor {} scanning an uploaded patient code", user.id);
    let source = upload_source(body)?;
    run_session(&state, LookupAuth::Bearer(auth.token().to_string()), source).await
}

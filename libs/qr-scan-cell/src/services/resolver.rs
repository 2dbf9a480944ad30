use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;
use tracing::{debug, warn};

use shared_config::AppConfig;
use shared_records::{RecordsClient, RecordsError};

use crate::error::ResolutionError;
use crate::models::HealthSummary;

/// Looks a patient identifier up against the records backend.
#[async_trait]
pub trait PatientResolver: Send + Sync {
    async fn resolve(&self, patient_id: &str) -> Result<HealthSummary, ResolutionError>;
}

/// Credential sent with the lookup.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LookupAuth {
    /// Public scan page: the identifier itself is the capability.
    Public,
    /// Doctor scan page: the clinician's bearer token is forwarded.
    Bearer(String),
}

impl LookupAuth {
    fn token(&self) -> Option<&str> {
        match self {
            LookupAuth::Public => None,
            LookupAuth::Bearer(token) => Some(token),
        }
    }
}

pub struct HttpPatientResolver {
    records: Arc<RecordsClient>,
    config: Arc<AppConfig>,
    auth: LookupAuth,
}

impl HttpPatientResolver {
    pub fn new(records: Arc<RecordsClient>, config: Arc<AppConfig>, auth: LookupAuth) -> Self {
        Self {
            records,
            config,
            auth,
        }
    }
}

#[async_trait]
impl PatientResolver for HttpPatientResolver {
    async fn resolve(&self, patient_id: &str) -> Result<HealthSummary, ResolutionError> {
        let path = self.config.lookup_path_for(patient_id);
        debug!("Resolving patient {} via {}", patient_id, path);

        match self.records.get_json::<Value>(&path, self.auth.token()).await {
            Ok(summary) => Ok(HealthSummary(summary)),
            Err(RecordsError::NotFound(_)) => Err(ResolutionError::NotFound),
            Err(e) => {
                warn!("Patient lookup for {} failed: {}", patient_id, e);
                Err(ResolutionError::Transient(e.to_string()))
            }
        }
    }
}

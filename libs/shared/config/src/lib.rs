use std::env;
use std::str::FromStr;
use tracing::warn;

pub const DEFAULT_LOOKUP_PATH: &str = "/api/patients/{id}/summary";

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub records_api_url: String,
    pub records_api_key: Option<String>,
    pub patient_lookup_path: String,
    pub jwt_secret: String,
    pub patient_id_length: usize,
    pub scan_sample_interval_ms: u64,
    pub lookup_timeout_secs: u64,
    pub camera_width: u32,
    pub camera_height: u32,
    pub max_upload_bytes: usize,
    pub port: u16,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            records_api_url: "http://localhost:8000".to_string(),
            records_api_key: None,
            patient_lookup_path: DEFAULT_LOOKUP_PATH.to_string(),
            jwt_secret: String::new(),
            patient_id_length: 24,
            scan_sample_interval_ms: 500,
            lookup_timeout_secs: 10,
            camera_width: 640,
            camera_height: 480,
            max_upload_bytes: 10 * 1024 * 1024,
            port: 3000,
        }
    }
}

impl AppConfig {
    pub fn from_env() -> Self {
        let defaults = Self::default();

        let config = Self {
            records_api_url: env::var("RECORDS_API_URL").unwrap_or_else(|_| {
                warn!("RECORDS_API_URL not set, using default");
                defaults.records_api_url.clone()
            }),
            records_api_key: env::var("RECORDS_API_KEY").ok().filter(|key| !key.is_empty()),
            patient_lookup_path: env::var("PATIENT_LOOKUP_PATH")
                .unwrap_or_else(|_| defaults.patient_lookup_path.clone()),
            jwt_secret: env::var("JWT_SECRET").unwrap_or_else(|_| {
                warn!("JWT_SECRET not set, doctor scan routes will reject every token");
                String::new()
            }),
            patient_id_length: parse_positive_var(
                "PATIENT_ID_LENGTH",
                defaults.patient_id_length,
            ),
            scan_sample_interval_ms: parse_var(
                "SCAN_SAMPLE_INTERVAL_MS",
                defaults.scan_sample_interval_ms,
            ),
            lookup_timeout_secs: parse_var("LOOKUP_TIMEOUT_SECS", defaults.lookup_timeout_secs),
            camera_width: parse_var("CAMERA_WIDTH", defaults.camera_width),
            camera_height: parse_var("CAMERA_HEIGHT", defaults.camera_height),
            max_upload_bytes: parse_var("MAX_UPLOAD_BYTES", defaults.max_upload_bytes),
            port: parse_var("PORT", defaults.port),
        };

        if !config.is_configured() {
            warn!("Application not fully configured - missing environment variables");
        }

        config
    }

    pub fn is_configured(&self) -> bool {
        !self.records_api_url.is_empty() && !self.jwt_secret.is_empty()
    }

    /// Lookup path for one identifier, with the identifier URL-encoded.
    pub fn lookup_path_for(&self, patient_id: &str) -> String {
        self.patient_lookup_path
            .replace("{id}", &urlencoding::encode(patient_id))
    }
}

fn parse_var<T>(key: &str, default: T) -> T
where
    T: FromStr + Copy + std::fmt::Display,
{
    match env::var(key) {
        Ok(raw) => parse_or(key, &raw, default),
        Err(_) => default,
    }
}

/// Like `parse_var`, but zero is rejected in favour of the default.
fn parse_positive_var(key: &str, default: usize) -> usize {
    match env::var(key) {
        Ok(raw) => parse_positive_or(key, &raw, default),
        Err(_) => default,
    }
}

fn parse_positive_or(key: &str, raw: &str, default: usize) -> usize {
    match parse_or(key, raw, default) {
        0 => {
            warn!("{} must be at least 1, using default {}", key, default);
            default
        }
        value => value,
    }
}

fn parse_or<T>(key: &str, raw: &str, default: T) -> T
where
    T: FromStr + Copy + std::fmt::Display,
{
    raw.trim().parse().unwrap_or_else(|_| {
        warn!("{} has invalid value {:?}, using default {}", key, raw, default);
        default
    })
}

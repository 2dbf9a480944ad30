pub mod error;
pub mod handlers;
pub mod models;
pub mod router;
pub mod services;

pub use error::*;
pub use handlers::ScanState;
pub use models::*;
pub use router::{doctor_scan_routes, scan_routes};
pub use services::*;

pub mod client;

pub use client::{RecordsClient, RecordsError};

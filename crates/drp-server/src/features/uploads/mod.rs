//! Upload feature
//!
//! Accepts tabular files per dataset type, hands them to the ingestion
//! workers and exposes the upload's status and counters.

pub mod commands;
pub mod queries;
pub mod routes;

pub use commands::{DeleteUploadCommand, UploadDatasetCommand, UploadDatasetResponse};
pub use queries::GetUploadQuery;
pub use routes::uploads_routes;

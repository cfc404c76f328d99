//! Export feature
//!
//! Queues CSV / XLSX exports and lists finished (or failed) downloads.

pub mod commands;
pub mod queries;
pub mod routes;

pub use commands::{CreateExportCommand, CreateExportResponse};
pub use queries::{ListExportsQuery, ListExportsResponse};
pub use routes::exports_routes;

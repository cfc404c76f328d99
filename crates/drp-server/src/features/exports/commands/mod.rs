pub mod create;

pub use create::{CreateExportCommand, CreateExportError, CreateExportResponse};

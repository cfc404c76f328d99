pub mod create;
pub mod delete;

pub use create::{UploadDatasetCommand, UploadDatasetError, UploadDatasetResponse};
pub use delete::{DeleteUploadCommand, DeleteUploadError};

pub mod get;

pub use get::{GetUploadError, GetUploadQuery};

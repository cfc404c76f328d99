pub mod list;

pub use list::{ListExportsQuery, ListExportsResponse};

//! DRP Common Library
//!
//! Shared error handling and logging for the DRP (Data Records Platform) workspace.
//!
//! - **Error Handling**: [`DrpError`] and the [`Result`] alias
//! - **Logging**: environment-driven `tracing` setup shared by every binary
//!
//! # Example
//!
//! ```no_run
//! use drp_common::logging::{init_logging, LogConfig};
//!
//! fn main() -> anyhow::Result<()> {
//!     let _guard = init_logging(&LogConfig::from_env()?)?;
//!     tracing::info!("ready");
//!     Ok(())
//! }
//! ```

#![deny(clippy::unwrap_used, clippy::expect_used)]

pub mod error;
pub mod logging;

pub use error::{DrpError, Result};

//! Enroll Common Library
//!
//! Shared error handling and logging setup for the enroll workspace.
//!
//! - **Error Handling**: [`EtlError`] and the [`Result`] alias used by every
//!   crate boundary that does not need a more specific error type
//! - **Logging**: [`logging::init_logging`] wires `tracing` to the console
//!   and/or a daily rolling file
//!
//! # Example
//!
//! ```no_run
//! use enroll_common::logging::{init_logging, LogConfig};
//!
//! fn main() -> anyhow::Result<()> {
//!     let config = LogConfig::from_env()?;
//!     let _guard = init_logging(&config)?;
//!     tracing::info!("ready");
//!     Ok(())
//! }
//! ```

#![deny(clippy::unwrap_used, clippy::expect_used)]

pub mod error;
pub mod logging;

pub use error::{EtlError, Result};

//! Tessera Telemetry - Logging and tracing for the Tessera module runtime.
//!
//! This crate provides:
//! - Configurable logging setup with multiple formats and targets
//! - Operation context for correlating work across tokio tasks
//! - With the `config` feature, a log config built from framework properties
//!
//! # Example
//!
//! ```rust,no_run
//! use tessera_telemetry::{LogConfig, LogFormat, OperationContext, setup_logging};
//!
//! # fn main() -> Result<(), tessera_telemetry::TelemetryError> {
//! let config = LogConfig::new("debug")
//!     .with_format(LogFormat::Pretty)
//!     .with_directive("tessera_resolver=trace");
//!
//! setup_logging(&config)?;
//!
//! let ctx = OperationContext::new("bootstrap").with_operation("install");
//! let span = ctx.span();
//! let _guard = span.enter();
//! tracing::info!("Installing bundles");
//! # Ok(())
//! # }
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]
#![deny(clippy::all)]
#![warn(unreachable_pub)]
#![deny(clippy::unwrap_used)]
#![cfg_attr(test, allow(clippy::unwrap_used))]

pub mod prelude;

mod context;
mod error;
mod logging;

pub use context::OperationContext;
pub use error::{TelemetryError, TelemetryResult};
#[cfg(feature = "config")]
pub use logging::{LOG_DIR, LOG_FORMAT, LOG_LEVEL};
pub use logging::{FileRotation, LogConfig, LogFormat, LogTarget, setup_default_logging, setup_logging};

//! Tessera Test - Shared test utilities for the Tessera runtime.
//!
//! This crate provides deployment fixtures, an id-allocating resource
//! factory, an event recorder and test harness helpers. Use it as a
//! dev-dependency:
//!
//! ```toml
//! [dev-dependencies]
//! tessera-test.workspace = true
//! ```
//!
//! ```rust,ignore
//! use tessera_test::{ResourceFactory, test_exporter, test_importer};
//!
//! let mut factory = ResourceFactory::new();
//! let api = factory.create(&test_exporter("com.acme.api", "1.0", &["com.acme.api"]));
//! let web = factory.create(&test_importer("com.acme.web", &["com.acme.api"]));
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]
#![deny(clippy::all)]
#![warn(unreachable_pub)]

pub mod prelude;

pub mod fixtures;
pub mod harness;
pub mod recorder;

pub use fixtures::*;
pub use harness::*;
pub use recorder::*;

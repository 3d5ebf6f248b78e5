//! Prelude module - commonly used test utilities.
//!
//! Use `use tessera_test::prelude::*;` in tests.

pub use crate::{
    EventRecorder, ResourceFactory, setup_test_logging, test_exporter, test_fragment, test_host,
    test_importer, test_singleton,
};

//! Scratch directories and logging for tests.

use std::path::PathBuf;
use tempfile::TempDir;
use tracing_subscriber::EnvFilter;

/// Environment variable that overrides the test log filter.
pub const TEST_LOG_ENV: &str = "TESSERA_TEST_LOG";

/// Fresh scratch directory, removed when dropped.
///
/// # Panics
///
/// Panics if the directory cannot be created.
#[must_use]
pub fn test_dir() -> TempDir {
    tempfile::Builder::new()
        .prefix("tessera-")
        .tempdir()
        .expect("scratch directory")
}

/// Write `content` to `name` under `dir`. `name` may contain subdirectories.
///
/// # Panics
///
/// Panics on any IO failure.
#[must_use]
pub fn test_file_in_dir(dir: &TempDir, name: &str, content: &str) -> PathBuf {
    let path = dir.path().join(name);
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).expect("parent directories");
    }
    std::fs::write(&path, content).expect("file contents");
    path
}

/// Route tracing output through the test writer.
///
/// `TESSERA_TEST_LOG` wins over `filter` when set. Repeated calls are
/// harmless since only the first one installs the subscriber.
pub fn setup_test_logging(filter: &str) {
    let filter = std::env::var(TEST_LOG_ENV)
        .ok()
        .and_then(|value| EnvFilter::try_new(value).ok())
        .unwrap_or_else(|| EnvFilter::new(filter));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_test_writer()
        .try_init();
}

/// [`setup_test_logging`] at `warn`.
pub fn setup_test_logging_default() {
    setup_test_logging("warn");
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_file_in_dir_creates_nested_paths() {
        let dir = test_dir();
        let path = test_file_in_dir(&dir, "bundles/api.toml", "symbolic_name = \"api\"");
        assert!(path.starts_with(dir.path()));
        assert_eq!(
            std::fs::read_to_string(&path).unwrap(),
            "symbolic_name = \"api\""
        );
    }

    #[test]
    fn test_logging_setup_is_idempotent() {
        setup_test_logging_default();
        setup_test_logging("debug");
    }
}

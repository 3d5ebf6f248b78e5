//! Typed view over framework properties.

use std::num::NonZeroUsize;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{error, warn};

use crate::error::ConfigResult;
use crate::properties::PropertyProvider;
use crate::substitute::resolved_property;

/// Locations installed during bootstrap.
pub const AUTO_INSTALL: &str = "tessera.auto.install";
/// Locations installed and marked for start during bootstrap.
pub const AUTO_START: &str = "tessera.auto.start";
/// Start level the framework moves to once started.
pub const BEGINNING_START_LEVEL: &str = "tessera.framework.beginning.startlevel";
/// Maximum concurrent installs during bootstrap.
pub const BOOTSTRAP_MAX_THREADS: &str = "tessera.bootstrap.max_threads";
/// Bound on framework initialization, in milliseconds.
pub const INIT_TIMEOUT: &str = "tessera.init.timeout";
/// Bound on framework start, in milliseconds.
pub const START_TIMEOUT: &str = "tessera.start.timeout";
/// Packages exported by the system resource.
pub const SYSTEM_PACKAGES: &str = "tessera.system.packages";
/// Paths always loaded through the system edge.
pub const BOOT_DELEGATION: &str = "tessera.bootdelegation";
/// Start level assigned to newly installed bundles.
pub const INITIAL_BUNDLE_START_LEVEL: &str = "tessera.bundle.initial.startlevel";

const DEFAULT_START_LEVEL: u32 = 1;
const DEFAULT_INIT_TIMEOUT_MS: u64 = 5_000;
const DEFAULT_START_TIMEOUT_MS: u64 = 10_000;

/// Typed framework configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FrameworkConfig {
    /// Locations to install during bootstrap.
    pub auto_install: Vec<String>,
    /// Locations to install and start during bootstrap.
    pub auto_start: Vec<String>,
    /// Target start level after framework start.
    pub beginning_start_level: u32,
    /// Bootstrap install concurrency.
    pub max_threads: usize,
    /// Bound on framework initialization.
    pub init_timeout: Duration,
    /// Bound on framework start.
    pub start_timeout: Duration,
    /// System packages, optionally with `;version=` suffixes.
    pub system_packages: Vec<String>,
    /// Boot-delegated paths or patterns.
    pub boot_delegation: Vec<String>,
    /// Start level assigned to new bundles.
    pub initial_bundle_start_level: u32,
}

impl Default for FrameworkConfig {
    fn default() -> Self {
        Self {
            auto_install: Vec::new(),
            auto_start: Vec::new(),
            beginning_start_level: DEFAULT_START_LEVEL,
            max_threads: default_max_threads(),
            init_timeout: Duration::from_millis(DEFAULT_INIT_TIMEOUT_MS),
            start_timeout: Duration::from_millis(DEFAULT_START_TIMEOUT_MS),
            system_packages: Vec::new(),
            boot_delegation: Vec::new(),
            initial_bundle_start_level: DEFAULT_START_LEVEL,
        }
    }
}

fn default_max_threads() -> usize {
    std::thread::available_parallelism().map_or(1, NonZeroUsize::get)
}

impl FrameworkConfig {
    /// Read the configuration from `props`.
    ///
    /// Malformed numeric values are logged and replaced with their defaults;
    /// a beginning start level below 1 falls back to 1.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::CyclicReference`](crate::ConfigError::CyclicReference)
    /// if a location list contains a self-referencing `${key}`.
    pub fn from_properties(props: &dyn PropertyProvider) -> ConfigResult<Self> {
        let defaults = Self::default();
        Ok(Self {
            auto_install: list(props, AUTO_INSTALL)?,
            auto_start: list(props, AUTO_START)?,
            beginning_start_level: start_level(props, BEGINNING_START_LEVEL)?,
            max_threads: number(props, BOOTSTRAP_MAX_THREADS, defaults.max_threads)?.max(1),
            init_timeout: millis(props, INIT_TIMEOUT, DEFAULT_INIT_TIMEOUT_MS)?,
            start_timeout: millis(props, START_TIMEOUT, DEFAULT_START_TIMEOUT_MS)?,
            system_packages: list(props, SYSTEM_PACKAGES)?,
            boot_delegation: list(props, BOOT_DELEGATION)?,
            initial_bundle_start_level: start_level(props, INITIAL_BUNDLE_START_LEVEL)?,
        })
    }
}

/// Split a comma-separated property into trimmed, non-empty items.
fn list(props: &dyn PropertyProvider, key: &str) -> ConfigResult<Vec<String>> {
    Ok(resolved_property(props, key)?
        .map(|value| {
            value
                .split(',')
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(str::to_owned)
                .collect()
        })
        .unwrap_or_default())
}

fn number<T>(props: &dyn PropertyProvider, key: &str, default: T) -> ConfigResult<T>
where
    T: std::str::FromStr + Copy + std::fmt::Display,
{
    let Some(raw) = resolved_property(props, key)? else {
        return Ok(default);
    };
    match raw.trim().parse::<T>() {
        Ok(value) => Ok(value),
        Err(_) => {
            warn!(key, value = %raw, %default, "Invalid numeric property, using default");
            Ok(default)
        },
    }
}

fn millis(props: &dyn PropertyProvider, key: &str, default: u64) -> ConfigResult<Duration> {
    number(props, key, default).map(Duration::from_millis)
}

fn start_level(props: &dyn PropertyProvider, key: &str) -> ConfigResult<u32> {
    let Some(raw) = resolved_property(props, key)? else {
        return Ok(DEFAULT_START_LEVEL);
    };
    match raw.trim().parse::<u32>() {
        Ok(level) if level >= 1 => Ok(level),
        _ => {
            error!(key, value = %raw, "Invalid start level, falling back to {DEFAULT_START_LEVEL}");
            Ok(DEFAULT_START_LEVEL)
        },
    }
}

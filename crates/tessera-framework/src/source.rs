//! Deployment sources: turn an install location into a descriptor.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{PoisonError, RwLock};

use async_trait::async_trait;
use tessera_core::Deployment;
use tracing::debug;

use crate::error::{FrameworkError, FrameworkResult};

/// Loads deployment descriptors by location.
#[async_trait]
pub trait DeploymentSource: Send + Sync {
    /// Load the descriptor at `location`. The returned deployment carries
    /// `location` as its location.
    ///
    /// # Errors
    ///
    /// Returns [`FrameworkError::Deployment`] if the location cannot be read
    /// or does not hold a valid descriptor.
    async fn load(&self, location: &str) -> FrameworkResult<Deployment>;
}

/// Descriptors registered in memory.
#[derive(Debug, Default)]
pub struct InMemorySource {
    deployments: RwLock<HashMap<String, Deployment>>,
}

impl InMemorySource {
    /// Create an empty source.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a deployment under its own location.
    pub fn add(&self, deployment: Deployment) {
        self.deployments
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(deployment.location.clone(), deployment);
    }

    /// Builder form of [`InMemorySource::add`].
    #[must_use]
    pub fn with(self, deployment: Deployment) -> Self {
        self.add(deployment);
        self
    }
}

#[async_trait]
impl DeploymentSource for InMemorySource {
    async fn load(&self, location: &str) -> FrameworkResult<Deployment> {
        self.deployments
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(location)
            .cloned()
            .ok_or_else(|| FrameworkError::Deployment {
                location: location.to_owned(),
                message: "no deployment registered at this location".into(),
            })
    }
}

/// Descriptors stored as TOML files.
///
/// Locations are paths, optionally prefixed with `file:`. Relative paths are
/// taken from the source's root directory.
#[derive(Debug, Clone)]
pub struct TomlFileSource {
    root: PathBuf,
}

impl TomlFileSource {
    /// Resolve relative locations against `root`.
    #[must_use]
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn path_of(&self, location: &str) -> PathBuf {
        let raw = Path::new(location.strip_prefix("file:").unwrap_or(location));
        if raw.is_absolute() {
            raw.to_path_buf()
        } else {
            self.root.join(raw)
        }
    }
}

/// Parse a TOML descriptor found at `location`. A `location` key in the
/// text is overridden.
///
/// # Errors
///
/// Returns [`FrameworkError::Deployment`] if the text is not a valid
/// descriptor.
pub fn parse_deployment(text: &str, location: &str) -> FrameworkResult<Deployment> {
    let rejected = |message: String| FrameworkError::Deployment {
        location: location.to_owned(),
        message,
    };
    let mut table: toml::Table = toml::from_str(text).map_err(|e| rejected(e.to_string()))?;
    table.insert(
        "location".to_owned(),
        toml::Value::String(location.to_owned()),
    );
    toml::Value::Table(table)
        .try_into()
        .map_err(|e: toml::de::Error| rejected(e.to_string()))
}

#[async_trait]
impl DeploymentSource for TomlFileSource {
    async fn load(&self, location: &str) -> FrameworkResult<Deployment> {
        let path = self.path_of(location);
        debug!(location, path = %path.display(), "Loading deployment descriptor");
        let text = tokio::task::spawn_blocking(move || std::fs::read_to_string(path))
            .await
            .map_err(|e| FrameworkError::Deployment {
                location: location.to_owned(),
                message: e.to_string(),
            })?
            .map_err(|e| FrameworkError::Deployment {
                location: location.to_owned(),
                message: e.to_string(),
            })?;
        parse_deployment(&text, location)
    }
}

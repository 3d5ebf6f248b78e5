//! Framework properties.
//!
//! Properties are flat `dotted.key = value` strings. TOML files are accepted
//! as a source: nested tables flatten into dotted keys, arrays join with
//! commas and scalars render as text.

use std::collections::BTreeMap;
use std::path::Path;

use tracing::debug;

use crate::error::{ConfigError, ConfigResult};

/// Embedded default properties.
const DEFAULTS_TOML: &str = include_str!("defaults.toml");

/// Read access to framework properties.
pub trait PropertyProvider: Send + Sync {
    /// Raw value of `key`, before `${key}` replacement.
    fn property(&self, key: &str) -> Option<String>;

    /// Value of `key`, or `default` when unset.
    fn property_or(&self, key: &str, default: &str) -> String {
        self.property(key).unwrap_or_else(|| default.to_string())
    }
}

/// An in-memory, ordered property map.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MapProperties {
    values: BTreeMap<String, String>,
}

impl MapProperties {
    /// An empty map.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// The embedded framework defaults.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::ParseError`] if the embedded file is malformed.
    pub fn defaults() -> ConfigResult<Self> {
        Self::from_toml_str(DEFAULTS_TOML, "<embedded defaults>")
    }

    /// Builder-style insert.
    #[must_use]
    pub fn with(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.set(key, value);
        self
    }

    /// Insert or replace a property.
    pub fn set(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.values.insert(key.into(), value.into());
    }

    /// Remove a property.
    pub fn remove(&mut self, key: &str) -> Option<String> {
        self.values.remove(key)
    }

    /// Overlay `other` on top of `self`; keys in `other` win.
    pub fn merge(&mut self, other: &MapProperties) {
        for (key, value) in &other.values {
            self.values.insert(key.clone(), value.clone());
        }
    }

    /// Iterate over all properties in key order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.values.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    /// Number of properties.
    #[must_use]
    pub fn len(&self) -> usize {
        self.values.len()
    }

    /// Whether the map is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Parse TOML text into flattened properties.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::ParseError`] if `text` is not valid TOML.
    pub fn from_toml_str(text: &str, origin: &str) -> ConfigResult<Self> {
        let table: toml::Table = toml::from_str(text).map_err(|e| ConfigError::ParseError {
            path: origin.to_owned(),
            source: e,
        })?;
        let mut props = Self::new();
        flatten("", &toml::Value::Table(table), &mut props.values);
        Ok(props)
    }

    /// Load a TOML properties file.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::ReadError`] or [`ConfigError::ParseError`].
    pub fn load_file(path: &Path) -> ConfigResult<Self> {
        let text = std::fs::read_to_string(path).map_err(|e| ConfigError::ReadError {
            path: path.display().to_string(),
            source: e,
        })?;
        let props = Self::from_toml_str(&text, &path.display().to_string())?;
        debug!(path = %path.display(), count = props.len(), "Loaded properties file");
        Ok(props)
    }

    /// Defaults, overlaid with an optional file, overlaid with `overrides`.
    ///
    /// # Errors
    ///
    /// Returns an error if the defaults or the file cannot be parsed.
    pub fn layered(file: Option<&Path>, overrides: &MapProperties) -> ConfigResult<Self> {
        let mut props = Self::defaults()?;
        if let Some(path) = file {
            props.merge(&Self::load_file(path)?);
        }
        props.merge(overrides);
        Ok(props)
    }
}

impl PropertyProvider for MapProperties {
    fn property(&self, key: &str) -> Option<String> {
        self.values.get(key).cloned()
    }
}

impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for MapProperties {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        Self {
            values: iter
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        }
    }
}

fn flatten(prefix: &str, value: &toml::Value, out: &mut BTreeMap<String, String>) {
    match value {
        toml::Value::Table(table) => {
            for (key, child) in table {
                let path = if prefix.is_empty() {
                    key.clone()
                } else {
                    format!("{prefix}.{key}")
                };
                flatten(&path, child, out);
            }
        },
        toml::Value::Array(items) => {
            let joined: Vec<String> = items.iter().map(scalar_text).collect();
            out.insert(prefix.to_owned(), joined.join(","));
        },
        other => {
            out.insert(prefix.to_owned(), scalar_text(other));
        },
    }
}

fn scalar_text(value: &toml::Value) -> String {
    match value {
        toml::Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_toml_flattens_to_dotted_keys() {
        let props = MapProperties::from_toml_str(
            r#"
            [tessera.auto]
            install = ["file:a.toml", "file:b.toml"]

            [tessera.framework]
            beginning.startlevel = 3
            "#,
            "test",
        )
        .unwrap();
        assert_eq!(
            props.property("tessera.auto.install").as_deref(),
            Some("file:a.toml,file:b.toml")
        );
        assert_eq!(
            props.property("tessera.framework.beginning.startlevel").as_deref(),
            Some("3")
        );
    }

    #[test]
    fn test_defaults_parse() {
        let props = MapProperties::defaults().unwrap();
        assert_eq!(props.property("tessera.init.timeout").as_deref(), Some("5000"));
        assert_eq!(props.property("tessera.start.timeout").as_deref(), Some("10000"));
        assert_eq!(props.property("tessera.system.packages").as_deref(), Some(""));
    }

    #[test]
    fn test_layered_precedence() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "[tessera.init]\ntimeout = 100\n[tessera.start]\ntimeout = 200").unwrap();

        let overrides = MapProperties::new().with("tessera.start.timeout", "300");
        let props = MapProperties::layered(Some(file.path()), &overrides).unwrap();
        assert_eq!(props.property("tessera.init.timeout").as_deref(), Some("100"));
        assert_eq!(props.property("tessera.start.timeout").as_deref(), Some("300"));
    }

    #[test]
    fn test_missing_file_is_read_error() {
        let err = MapProperties::load_file(Path::new("/nonexistent/tessera.toml")).unwrap_err();
        assert!(matches!(err, ConfigError::ReadError { .. }));
    }

    #[test]
    fn test_malformed_toml_is_parse_error() {
        let err = MapProperties::from_toml_str("this is = = not toml", "bad").unwrap_err();
        assert!(matches!(err, ConfigError::ParseError { .. }));
    }

    #[test]
    fn test_property_or() {
        let props: MapProperties = [("a", "1")].into_iter().collect();
        assert_eq!(props.property_or("a", "x"), "1");
        assert_eq!(props.property_or("b", "x"), "x");
    }
}

//! Versions and version ranges.
//!
//! Bundle versions are [`semver::Version`]s. Descriptors frequently omit the
//! minor or patch component (`"1"`, `"1.2"`) and may carry a fourth
//! qualifier segment (`"1.2.3.final"`), so [`parse_version`] pads missing
//! components with zero and maps the qualifier onto build metadata.

use std::fmt;
use std::str::FromStr;

use semver::{BuildMetadata, Version};
use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::error::{CoreError, CoreResult};

/// Parse a lenient `major[.minor[.patch[.qualifier]]]` version string.
///
/// # Errors
///
/// Returns [`CoreError::InvalidVersion`] if a numeric segment is malformed
/// or the qualifier contains characters semver rejects.
pub fn parse_version(value: &str) -> CoreResult<Version> {
    let trimmed = value.trim();
    let invalid = |reason: String| CoreError::InvalidVersion {
        value: value.to_string(),
        reason,
    };
    if trimmed.is_empty() {
        return Err(invalid("empty version".to_string()));
    }

    let mut parts = trimmed.splitn(4, '.');
    let mut numeric = [0_u64; 3];
    for slot in &mut numeric {
        match parts.next() {
            Some(segment) => {
                *slot = segment
                    .parse()
                    .map_err(|e: std::num::ParseIntError| invalid(e.to_string()))?;
            },
            None => break,
        }
    }

    let mut version = Version::new(numeric[0], numeric[1], numeric[2]);
    if let Some(qualifier) = parts.next().filter(|q| !q.is_empty()) {
        version.build = BuildMetadata::new(qualifier).map_err(|e| invalid(e.to_string()))?;
    }
    Ok(version)
}

/// A range of versions with inclusive or exclusive bounds.
///
/// A range without a ceiling is unbounded above, which is the meaning of a
/// bare version such as `"1.0"` in a requirement.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct VersionRange {
    floor: Version,
    floor_inclusive: bool,
    ceiling: Option<Version>,
    ceiling_inclusive: bool,
}

impl VersionRange {
    /// Every version (`[0.0.0, ∞)`).
    #[must_use]
    pub fn any() -> Self {
        Self::at_least(Version::new(0, 0, 0))
    }

    /// All versions greater than or equal to `floor`.
    #[must_use]
    pub fn at_least(floor: Version) -> Self {
        Self {
            floor,
            floor_inclusive: true,
            ceiling: None,
            ceiling_inclusive: false,
        }
    }

    /// Exactly one version (`[v, v]`).
    #[must_use]
    pub fn exact(version: Version) -> Self {
        Self {
            floor: version.clone(),
            floor_inclusive: true,
            ceiling: Some(version),
            ceiling_inclusive: true,
        }
    }

    /// A half-open range `[floor, ceiling)`.
    #[must_use]
    pub fn between(floor: Version, ceiling: Version) -> Self {
        Self {
            floor,
            floor_inclusive: true,
            ceiling: Some(ceiling),
            ceiling_inclusive: false,
        }
    }

    /// Lower bound of the range.
    #[must_use]
    pub fn floor(&self) -> &Version {
        &self.floor
    }

    /// Upper bound of the range, if any.
    #[must_use]
    pub fn ceiling(&self) -> Option<&Version> {
        self.ceiling.as_ref()
    }

    /// Whether `version` lies within the range.
    #[must_use]
    pub fn includes(&self, version: &Version) -> bool {
        let above_floor = if self.floor_inclusive {
            version >= &self.floor
        } else {
            version > &self.floor
        };
        if !above_floor {
            return false;
        }
        match &self.ceiling {
            None => true,
            Some(ceiling) if self.ceiling_inclusive => version <= ceiling,
            Some(ceiling) => version < ceiling,
        }
    }
}

impl Default for VersionRange {
    fn default() -> Self {
        Self::any()
    }
}

impl FromStr for VersionRange {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let trimmed = s.trim();
        let invalid = || CoreError::InvalidVersionRange(s.to_string());

        let Some(first) = trimmed.chars().next() else {
            return Err(invalid());
        };
        if first != '[' && first != '(' {
            return Ok(Self::at_least(parse_version(trimmed)?));
        }

        let last = trimmed.chars().last().ok_or_else(invalid)?;
        if last != ']' && last != ')' {
            return Err(invalid());
        }
        let inner = trimmed
            .get(1..trimmed.len().saturating_sub(1))
            .ok_or_else(invalid)?;
        let (floor, ceiling) = inner.split_once(',').ok_or_else(invalid)?;

        let range = Self {
            floor: parse_version(floor)?,
            floor_inclusive: first == '[',
            ceiling: Some(parse_version(ceiling)?),
            ceiling_inclusive: last == ']',
        };
        if range.ceiling.as_ref().is_some_and(|c| c < &range.floor) {
            return Err(invalid());
        }
        Ok(range)
    }
}

impl fmt::Display for VersionRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.ceiling {
            None if self.floor_inclusive => write!(f, "{}", self.floor),
            None => write!(f, "({},∞)", self.floor),
            Some(ceiling) => write!(
                f,
                "{}{},{}{}",
                if self.floor_inclusive { '[' } else { '(' },
                self.floor,
                ceiling,
                if self.ceiling_inclusive { ']' } else { ')' },
            ),
        }
    }
}

impl Serialize for VersionRange {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for VersionRange {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn v(s: &str) -> Version {
        parse_version(s).unwrap()
    }

    #[test]
    fn test_parse_version_pads_missing_segments() {
        assert_eq!(v("1"), Version::new(1, 0, 0));
        assert_eq!(v("1.2"), Version::new(1, 2, 0));
        assert_eq!(v(" 1.2.3 "), Version::new(1, 2, 3));
    }

    #[test]
    fn test_parse_version_qualifier_becomes_build_metadata() {
        let version = v("1.2.3.Final");
        assert_eq!(version.build.as_str(), "Final");
    }

    #[test]
    fn test_parse_version_rejects_garbage() {
        assert!(parse_version("").is_err());
        assert!(parse_version("one.two").is_err());
    }

    #[test]
    fn test_bare_version_is_unbounded_floor() {
        let range: VersionRange = "1.0".parse().unwrap();
        assert!(range.includes(&v("1.0.0")));
        assert!(range.includes(&v("42.0.0")));
        assert!(!range.includes(&v("0.9.9")));
    }

    #[test]
    fn test_interval_bounds() {
        let range: VersionRange = "[1.0,2.0)".parse().unwrap();
        assert!(range.includes(&v("1.0")));
        assert!(range.includes(&v("1.9.9")));
        assert!(!range.includes(&v("2.0")));

        let range: VersionRange = "(1.0,2.0]".parse().unwrap();
        assert!(!range.includes(&v("1.0")));
        assert!(range.includes(&v("2.0")));
    }

    #[test]
    fn test_inverted_interval_rejected() {
        assert!("[2.0,1.0)".parse::<VersionRange>().is_err());
        assert!("[1.0 2.0)".parse::<VersionRange>().is_err());
    }

    #[test]
    fn test_display_round_trips() {
        let range: VersionRange = "[1.0,2.0)".parse().unwrap();
        assert_eq!(range.to_string(), "[1.0.0,2.0.0)");
        let reparsed: VersionRange = range.to_string().parse().unwrap();
        assert_eq!(reparsed, range);
    }
}

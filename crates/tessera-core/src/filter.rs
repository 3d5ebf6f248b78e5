//! Typed requirement filters.
//!
//! A [`Filter`] is evaluated against a capability's attribute map. Filters
//! are built programmatically from descriptors; the `Display` form mirrors
//! the familiar LDAP-style syntax and exists for diagnostics only.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::capability::{AttributeValue, Attributes};
use crate::version::{VersionRange, parse_version};

/// A match expression over capability attributes.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Filter {
    /// Matches every capability.
    #[default]
    MatchAll,
    /// Attribute equals the given value (list attributes match on membership).
    Equals {
        /// Attribute key.
        key: String,
        /// Expected value in string form.
        value: String,
    },
    /// Version attribute lies within the range.
    InRange {
        /// Attribute key.
        key: String,
        /// Accepted versions.
        range: VersionRange,
    },
    /// Attribute is present with any value.
    Present {
        /// Attribute key.
        key: String,
    },
    /// All sub-filters match.
    And(Vec<Filter>),
    /// At least one sub-filter matches.
    Or(Vec<Filter>),
    /// The sub-filter does not match.
    Not(Box<Filter>),
}

impl Filter {
    /// Shorthand for [`Filter::Equals`].
    #[must_use]
    pub fn equals(key: impl Into<String>, value: impl Into<String>) -> Self {
        Self::Equals {
            key: key.into(),
            value: value.into(),
        }
    }

    /// Shorthand for [`Filter::InRange`].
    #[must_use]
    pub fn in_range(key: impl Into<String>, range: VersionRange) -> Self {
        Self::InRange {
            key: key.into(),
            range,
        }
    }

    /// Combine two filters with a logical AND, flattening nested conjunctions.
    #[must_use]
    pub fn and(self, other: Filter) -> Self {
        match (self, other) {
            (Self::MatchAll, f) | (f, Self::MatchAll) => f,
            (Self::And(mut left), Self::And(right)) => {
                left.extend(right);
                Self::And(left)
            },
            (Self::And(mut left), f) => {
                left.push(f);
                Self::And(left)
            },
            (f, g) => Self::And(vec![f, g]),
        }
    }

    /// Evaluate the filter against an attribute map.
    #[must_use]
    pub fn matches(&self, attributes: &Attributes) -> bool {
        match self {
            Self::MatchAll => true,
            Self::Equals { key, value } => attributes
                .get(key)
                .is_some_and(|attr| value_equals(attr, value)),
            Self::InRange { key, range } => match attributes.get(key) {
                Some(AttributeValue::Version(v)) => range.includes(v),
                Some(AttributeValue::String(s)) => {
                    parse_version(s).is_ok_and(|v| range.includes(&v))
                },
                _ => false,
            },
            Self::Present { key } => attributes.contains_key(key),
            Self::And(filters) => filters.iter().all(|f| f.matches(attributes)),
            Self::Or(filters) => filters.iter().any(|f| f.matches(attributes)),
            Self::Not(filter) => !filter.matches(attributes),
        }
    }
}

fn value_equals(attr: &AttributeValue, expected: &str) -> bool {
    match attr {
        AttributeValue::String(s) => s == expected,
        AttributeValue::Long(n) => expected.trim().parse::<i64>().is_ok_and(|e| e == *n),
        AttributeValue::Version(v) => parse_version(expected).is_ok_and(|e| &e == v),
        AttributeValue::List(items) => items.iter().any(|item| item == expected),
    }
}

impl fmt::Display for Filter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::MatchAll => f.write_str("(*)"),
            Self::Equals { key, value } => write!(f, "({key}={value})"),
            Self::InRange { key, range } => match range.ceiling() {
                None => write!(f, "({key}>={})", range.floor()),
                Some(_) => write!(f, "({key} in {range})"),
            },
            Self::Present { key } => write!(f, "({key}=*)"),
            Self::And(filters) => {
                f.write_str("(&")?;
                for filter in filters {
                    write!(f, "{filter}")?;
                }
                f.write_str(")")
            },
            Self::Or(filters) => {
                f.write_str("(|")?;
                for filter in filters {
                    write!(f, "{filter}")?;
                }
                f.write_str(")")
            },
            Self::Not(filter) => write!(f, "(!{filter})"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use semver::Version;

    fn attrs() -> Attributes {
        let mut attrs = Attributes::new();
        attrs.insert("package".into(), AttributeValue::String("com.acme.api".into()));
        attrs.insert("version".into(), AttributeValue::Version(Version::new(1, 4, 0)));
        attrs.insert("weight".into(), AttributeValue::Long(7));
        attrs.insert(
            "tags".into(),
            AttributeValue::List(vec!["fast".into(), "safe".into()]),
        );
        attrs
    }

    #[test]
    fn test_equals_per_attribute_type() {
        let attrs = attrs();
        assert!(Filter::equals("package", "com.acme.api").matches(&attrs));
        assert!(Filter::equals("weight", "7").matches(&attrs));
        assert!(Filter::equals("version", "1.4").matches(&attrs));
        assert!(Filter::equals("tags", "safe").matches(&attrs));
        assert!(!Filter::equals("tags", "slow").matches(&attrs));
        assert!(!Filter::equals("missing", "x").matches(&attrs));
    }

    #[test]
    fn test_range_and_composition() {
        let attrs = attrs();
        let filter = Filter::equals("package", "com.acme.api")
            .and(Filter::in_range("version", "[1.0,2.0)".parse().unwrap()));
        assert!(filter.matches(&attrs));

        let too_new = Filter::in_range("version", "[2.0,3.0)".parse().unwrap());
        assert!(!too_new.matches(&attrs));
        assert!(Filter::Not(Box::new(too_new)).matches(&attrs));
    }

    #[test]
    fn test_and_flattens_match_all() {
        let filter = Filter::MatchAll.and(Filter::equals("a", "b"));
        assert_eq!(filter, Filter::equals("a", "b"));
    }

    #[test]
    fn test_display_is_ldap_like() {
        let filter = Filter::equals("package", "com.acme.api")
            .and(Filter::in_range("version", VersionRange::at_least(Version::new(1, 0, 0))));
        assert_eq!(
            filter.to_string(),
            "(&(package=com.acme.api)(version>=1.0.0))"
        );
    }
}

//! Path filters over slash-separated resource paths.
//!
//! Filters decide which paths cross a dependency edge. Package-level filters
//! are evaluated against directory paths (`com/acme/api`), class filters
//! against full entry paths (`com/acme/api/Client.class`).

use std::collections::BTreeSet;
use std::fmt;

use globset::{GlobBuilder, GlobMatcher};

use crate::error::{ModuleError, ModuleResult};

/// Convert a dotted package name to its directory path.
#[must_use]
pub fn package_path(package: &str) -> String {
    package.replace('.', "/")
}

/// Directory part of an entry path; empty for top-level entries.
#[must_use]
pub fn parent_path(path: &str) -> &str {
    path.rsplit_once('/').map_or("", |(dir, _)| dir)
}

/// A compiled glob, compared by its source pattern.
#[derive(Debug, Clone)]
pub struct GlobPattern {
    pattern: String,
    matcher: GlobMatcher,
}

impl GlobPattern {
    /// Compile `pattern`. `*` stays within one path segment; `**` crosses
    /// segments.
    ///
    /// # Errors
    ///
    /// Returns [`ModuleError::InvalidPattern`] if the glob does not compile.
    pub fn new(pattern: impl Into<String>) -> ModuleResult<Self> {
        let pattern = pattern.into();
        let glob = GlobBuilder::new(&pattern)
            .literal_separator(true)
            .build()
            .map_err(|e| ModuleError::InvalidPattern {
                pattern: pattern.clone(),
                message: e.to_string(),
            })?;
        Ok(Self {
            matcher: glob.compile_matcher(),
            pattern,
        })
    }

    /// The source pattern.
    #[must_use]
    pub fn pattern(&self) -> &str {
        &self.pattern
    }

    /// Whether `path` matches.
    #[must_use]
    pub fn is_match(&self, path: &str) -> bool {
        self.matcher.is_match(path)
    }
}

impl PartialEq for GlobPattern {
    fn eq(&self, other: &Self) -> bool {
        self.pattern == other.pattern
    }
}

impl Eq for GlobPattern {}

/// Boolean algebra over paths.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum PathFilter {
    /// Accept every path.
    #[default]
    AcceptAll,
    /// Reject every path.
    RejectAll,
    /// Accept exactly the listed paths.
    In(BTreeSet<String>),
    /// Invert a filter.
    Not(Box<PathFilter>),
    /// Accept when every filter accepts.
    All(Vec<PathFilter>),
    /// Accept when any filter accepts.
    Any(Vec<PathFilter>),
    /// Accept paths matching a glob.
    Glob(GlobPattern),
}

impl PathFilter {
    /// Accept every path.
    #[must_use]
    pub fn accept_all() -> Self {
        Self::AcceptAll
    }

    /// Reject every path.
    #[must_use]
    pub fn reject_all() -> Self {
        Self::RejectAll
    }

    /// Accept exactly the given paths.
    #[must_use]
    pub fn in_set<I, S>(paths: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::In(paths.into_iter().map(Into::into).collect())
    }

    /// Invert `filter`.
    #[must_use]
    pub fn not(filter: PathFilter) -> Self {
        match filter {
            Self::AcceptAll => Self::RejectAll,
            Self::RejectAll => Self::AcceptAll,
            Self::Not(inner) => *inner,
            other => Self::Not(Box::new(other)),
        }
    }

    /// Conjunction. An empty list accepts everything.
    #[must_use]
    pub fn all(filters: Vec<PathFilter>) -> Self {
        match filters.len() {
            0 => Self::AcceptAll,
            1 => filters.into_iter().next().unwrap_or(Self::AcceptAll),
            _ => Self::All(filters),
        }
    }

    /// Disjunction. An empty list rejects everything.
    #[must_use]
    pub fn any(filters: Vec<PathFilter>) -> Self {
        match filters.len() {
            0 => Self::RejectAll,
            1 => filters.into_iter().next().unwrap_or(Self::RejectAll),
            _ => Self::Any(filters),
        }
    }

    /// Accept paths matching the glob `pattern`.
    ///
    /// # Errors
    ///
    /// Returns [`ModuleError::InvalidPattern`] if the glob does not compile.
    pub fn glob(pattern: impl Into<String>) -> ModuleResult<Self> {
        GlobPattern::new(pattern).map(Self::Glob)
    }

    /// Build a directory filter from dotted package patterns.
    ///
    /// `com.acme` matches that package only, `com.acme.*` matches every
    /// package below it and `*` matches everything.
    ///
    /// # Errors
    ///
    /// Returns [`ModuleError::InvalidPattern`] if a wildcard pattern does
    /// not compile.
    pub fn packages<S: AsRef<str>>(patterns: &[S]) -> ModuleResult<Self> {
        let mut exact = BTreeSet::new();
        let mut filters = Vec::new();
        for pattern in patterns {
            let pattern = pattern.as_ref().trim();
            if pattern.is_empty() {
                continue;
            }
            if pattern == "*" {
                return Ok(Self::AcceptAll);
            }
            if let Some(prefix) = pattern.strip_suffix(".*") {
                filters.push(Self::glob(format!("{}/**", package_path(prefix)))?);
            } else {
                exact.insert(package_path(pattern));
            }
        }
        if !exact.is_empty() {
            filters.insert(0, Self::In(exact));
        }
        Ok(Self::any(filters))
    }

    /// Whether `path` passes the filter.
    #[must_use]
    pub fn accepts(&self, path: &str) -> bool {
        match self {
            Self::AcceptAll => true,
            Self::RejectAll => false,
            Self::In(paths) => paths.contains(path),
            Self::Not(inner) => !inner.accepts(path),
            Self::All(filters) => filters.iter().all(|f| f.accepts(path)),
            Self::Any(filters) => filters.iter().any(|f| f.accepts(path)),
            Self::Glob(glob) => glob.is_match(path),
        }
    }
}

impl fmt::Display for PathFilter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::AcceptAll => f.write_str("*"),
            Self::RejectAll => f.write_str("-"),
            Self::In(paths) => {
                let joined: Vec<&str> = paths.iter().map(String::as_str).collect();
                write!(f, "{{{}}}", joined.join(","))
            },
            Self::Not(inner) => write!(f, "!{inner}"),
            Self::All(filters) => write_joined(f, filters, " & "),
            Self::Any(filters) => write_joined(f, filters, " | "),
            Self::Glob(glob) => f.write_str(glob.pattern()),
        }
    }
}

fn write_joined(f: &mut fmt::Formatter<'_>, filters: &[PathFilter], sep: &str) -> fmt::Result {
    f.write_str("(")?;
    for (i, filter) in filters.iter().enumerate() {
        if i > 0 {
            f.write_str(sep)?;
        }
        write!(f, "{filter}")?;
    }
    f.write_str(")")
}

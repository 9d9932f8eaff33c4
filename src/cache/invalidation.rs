//! Named invalidation groups
//!
//! A group ties a semantic domain ("suppliers", "categories", ...) to the key
//! families that must be purged together when that domain's data changes.
//! Groups are registered once at startup and may overlap: the categories
//! group also purges supplier listings, because a category change alters
//! which suppliers match a category filter.

use crate::cache::types::QueryKey;
use crate::error::{CacheError, Result};
use chrono::{DateTime, Utc};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tracing::warn;

/// Reason for removing entries from the cache
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum InvalidationReason {
    /// Removed by the periodic sweep
    Swept,

    /// Purged through a registered group
    Group { name: String },

    /// Purged through an ad hoc pattern
    Pattern { pattern: String },

    /// Purged through a caller-supplied predicate
    Predicate,

    /// Evicted because the entry count reached its limit
    Capacity,

    /// Evicted because the memory budget was exceeded
    Memory,
}

impl std::fmt::Display for InvalidationReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            InvalidationReason::Swept => write!(f, "periodic sweep"),
            InvalidationReason::Group { name } => write!(f, "group: {}", name),
            InvalidationReason::Pattern { pattern } => write!(f, "pattern: {}", pattern),
            InvalidationReason::Predicate => write!(f, "predicate match"),
            InvalidationReason::Capacity => write!(f, "entry limit reached"),
            InvalidationReason::Memory => write!(f, "memory budget exceeded"),
        }
    }
}

/// One key-matching rule inside a group
#[derive(Debug, Clone)]
pub enum InvalidationRule {
    /// Regex over the raw key string
    Pattern(Regex),

    /// Structured match: keys that parse as a [`QueryKey`] with this domain
    Domain(String),
}

impl InvalidationRule {
    /// Compile a regex rule
    pub fn pattern(pattern: &str) -> Result<Self> {
        Regex::new(pattern)
            .map(InvalidationRule::Pattern)
            .map_err(|e| CacheError::ConfigError(format!("invalid pattern {:?}: {}", pattern, e)))
    }

    pub fn domain(domain: impl Into<String>) -> Self {
        InvalidationRule::Domain(domain.into())
    }

    pub fn matches(&self, key: &str) -> bool {
        match self {
            InvalidationRule::Pattern(regex) => regex.is_match(key),
            InvalidationRule::Domain(domain) => {
                QueryKey::parse(key).is_some_and(|parsed| &parsed.domain == domain)
            }
        }
    }
}

/// A named set of rules purged together
#[derive(Debug, Clone)]
pub struct InvalidationGroup {
    pub name: String,
    pub rules: Vec<InvalidationRule>,
}

impl InvalidationGroup {
    pub fn new(name: impl Into<String>, rules: Vec<InvalidationRule>) -> Self {
        Self {
            name: name.into(),
            rules,
        }
    }

    /// Build a group from regex sources
    pub fn from_patterns(name: impl Into<String>, patterns: &[&str]) -> Result<Self> {
        let rules = patterns
            .iter()
            .map(|p| InvalidationRule::pattern(p))
            .collect::<Result<Vec<_>>>()?;
        Ok(Self::new(name, rules))
    }

    pub fn matches(&self, key: &str) -> bool {
        self.rules.iter().any(|rule| rule.matches(key))
    }
}

/// Rules resolved for one `invalidate` call
#[derive(Debug, Clone)]
pub struct KeyMatcher {
    rules: Vec<InvalidationRule>,
    reason: InvalidationReason,
}

impl KeyMatcher {
    pub fn matches(&self, key: &str) -> bool {
        self.rules.iter().any(|rule| rule.matches(key))
    }

    pub fn reason(&self) -> &InvalidationReason {
        &self.reason
    }
}

/// Static table of invalidation groups
#[derive(Debug, Clone, Default)]
pub struct InvalidationRegistry {
    groups: HashMap<String, InvalidationGroup>,
}

impl InvalidationRegistry {
    /// Empty registry: every name is treated as an ad hoc pattern
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a group, replacing any group of the same name
    pub fn with_group(mut self, group: InvalidationGroup) -> Self {
        self.groups.insert(group.name.clone(), group);
        self
    }

    /// Add a group from regex sources
    pub fn with_patterns(self, name: &str, patterns: &[&str]) -> Result<Self> {
        Ok(self.with_group(InvalidationGroup::from_patterns(name, patterns)?))
    }

    /// Groups for the supplier directory's data domains
    pub fn supplier_directory() -> Result<Self> {
        Self::new()
            .with_patterns(
                "suppliers",
                &["^suppliers", "^home-suppliers", "^supplier-detail", "^user-suppliers"],
            )?
            .with_patterns(
                "categories",
                &["^categories", "^category-", "^suppliers", "^home-suppliers"],
            )?
            .with_patterns("articles", &["^articles", "^home-articles", "^article-detail"])?
            .with_patterns("profile", &["^user-profile", "^user-suppliers"])?
            .with_patterns("notifications", &["^notifications"])?
            .with_patterns("subscription", &["^subscription", "^user-profile"])
    }

    pub fn group(&self, name: &str) -> Option<&InvalidationGroup> {
        self.groups.get(name)
    }

    pub fn group_names(&self) -> impl Iterator<Item = &str> {
        self.groups.keys().map(String::as_str)
    }

    /// Resolve a group name, falling back to treating `name` as a pattern
    ///
    /// A name that is not a valid regex is matched literally.
    pub fn resolve(&self, name: &str) -> KeyMatcher {
        if let Some(group) = self.groups.get(name) {
            return KeyMatcher {
                rules: group.rules.clone(),
                reason: InvalidationReason::Group {
                    name: name.to_string(),
                },
            };
        }

        let rules = match Regex::new(name).or_else(|_| Regex::new(&regex::escape(name))) {
            Ok(regex) => vec![InvalidationRule::Pattern(regex)],
            Err(e) => {
                warn!("Ad hoc pattern {:?} cannot be compiled: {}", name, e);
                Vec::new()
            }
        };

        KeyMatcher {
            rules,
            reason: InvalidationReason::Pattern {
                pattern: name.to_string(),
            },
        }
    }
}

/// Record of a batch removal
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InvalidationEvent {
    /// Reason for invalidation
    pub reason: InvalidationReason,

    /// When the invalidation occurred
    pub timestamp: DateTime<Utc>,

    /// Keys that were removed
    pub keys: Vec<String>,

    /// Additional context
    pub context: Option<String>,
}

impl InvalidationEvent {
    /// Create a new invalidation event
    pub fn new(reason: InvalidationReason, keys: Vec<String>) -> Self {
        Self {
            reason,
            timestamp: Utc::now(),
            keys,
            context: None,
        }
    }

    /// Add context to the event
    pub fn with_context(mut self, context: String) -> Self {
        self.context = Some(context);
        self
    }

    pub fn count(&self) -> usize {
        self.keys.len()
    }
}

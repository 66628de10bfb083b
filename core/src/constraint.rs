//! Applicability constraints
//!
//! A check is applicable to a target when its environment, application and
//! target predicates all pass. The combined verdict is cached per
//! (check, target) pair for the process lifetime: targets and checks are
//! fixed once the engine starts serving, so there is no invalidation path.
//! The tag filter is request-scoped and never cached.
//!
//! A dependency-resolution failure while evaluating a predicate defaults the
//! verdict to applicable: the check must still appear in listings, and
//! executing it surfaces the resolution failure as an execution failure.

use crate::suite::CheckDef;
use crate::target::{Target, TargetKey};
use dashmap::DashMap;
use std::collections::HashSet;
use tracing::debug;

/// Process-lifetime cache of (check, target) applicability verdicts
#[derive(Default)]
pub struct ConstraintCache {
    verdicts: DashMap<(String, TargetKey), bool>,
}

impl ConstraintCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether the check applies to the target, evaluating the underlying
    /// predicates at most once per pair
    pub fn applicable(&self, check: &CheckDef, target: &Target) -> bool {
        if check.applicability.is_empty() {
            return true;
        }
        let key = (check.name().to_string(), target.key());
        if let Some(hit) = self.verdicts.get(&key) {
            return *hit;
        }
        let verdict = evaluate(check, target);
        // Insert-or-get: a concurrent request may have cached the same pair.
        *self.verdicts.entry(key).or_insert(verdict)
    }
}

fn evaluate(check: &CheckDef, target: &Target) -> bool {
    let set = &check.applicability;
    let mut verdict = true;
    if let Some(pred) = &set.environment {
        verdict &= pred(target, target.environment()).unwrap_or_else(|e| {
            debug!("environment predicate unresolvable for '{}': {}", check.name(), e);
            true
        });
    }
    if verdict {
        if let Some(pred) = &set.application {
            verdict &= pred(target, target.application()).unwrap_or_else(|e| {
                debug!("application predicate unresolvable for '{}': {}", check.name(), e);
                true
            });
        }
    }
    if verdict {
        if let Some(pred) = &set.target {
            verdict &= pred(target).unwrap_or_else(|e| {
                debug!("target predicate unresolvable for '{}': {}", check.name(), e);
                true
            });
        }
    }
    verdict
}

/// Request-scoped tag filter parsed from query pairs
///
/// A key with value "true" joins the include set, "false" the exclude set;
/// names and value literals are compared case-insensitively. An empty filter
/// matches everything.
#[derive(Debug, Default, Clone)]
pub struct TagFilter {
    include: HashSet<String>,
    exclude: HashSet<String>,
}

impl TagFilter {
    /// Build a filter from (key, value) pairs; keys with other values are
    /// ignored
    pub fn from_pairs<'a>(pairs: impl IntoIterator<Item = (&'a str, &'a str)>) -> Self {
        let mut filter = TagFilter::default();
        for (key, value) in pairs {
            if value.eq_ignore_ascii_case("true") {
                filter.include.insert(key.to_ascii_lowercase());
            } else if value.eq_ignore_ascii_case("false") {
                filter.exclude.insert(key.to_ascii_lowercase());
            }
        }
        filter
    }

    pub fn is_empty(&self) -> bool {
        self.include.is_empty() && self.exclude.is_empty()
    }

    /// Whether a check with the given tags passes this filter
    pub fn matches(&self, tags: &[String]) -> bool {
        let tags: HashSet<String> = tags.iter().map(|t| t.to_ascii_lowercase()).collect();
        if self.exclude.iter().any(|tag| tags.contains(tag)) {
            return false;
        }
        if !self.include.is_empty() && !self.include.is_subset(&tags) {
            return false;
        }
        true
    }
}

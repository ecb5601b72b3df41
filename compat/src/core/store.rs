//! In-memory combination store: verified, failed and ignored pairs.
//!
//! Persistence and schema migration live in `io::storage`; this module only
//! enforces the membership rules.

use std::collections::BTreeSet;

use crate::core::combination::{Combination, IgnoreRule};

/// Which set a pair was found in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Membership {
    Ignored,
    Verified,
    Failed,
}

/// Result of recording a failed attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureRecord {
    /// Pair newly added to `failed`.
    Added,
    /// Pair was already in `failed`.
    Unchanged,
    /// Pair is `verified`; failures never demote a verified pair.
    AlreadyVerified,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CombinationStore {
    verified: BTreeSet<Combination>,
    failed: BTreeSet<Combination>,
    ignored: BTreeSet<IgnoreRule>,
}

/// Set sizes, for status output.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, serde::Serialize)]
pub struct StoreCounts {
    pub verified: usize,
    pub failed: usize,
    pub ignored: usize,
}

impl CombinationStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a store from raw sets. A pair present in both `verified` and
    /// `failed` is kept as verified.
    pub fn from_sets(
        verified: impl IntoIterator<Item = Combination>,
        failed: impl IntoIterator<Item = Combination>,
        ignored: impl IntoIterator<Item = IgnoreRule>,
    ) -> Self {
        let verified: BTreeSet<Combination> = verified.into_iter().collect();
        let failed = failed
            .into_iter()
            .filter(|pair| !verified.contains(pair))
            .collect();
        Self {
            verified,
            failed,
            ignored: ignored.into_iter().collect(),
        }
    }

    /// Copy holding only the ignore rules, for runs whose results are not kept.
    pub fn ignore_rules_only(&self) -> Self {
        Self {
            ignored: self.ignored.clone(),
            ..Self::default()
        }
    }

    /// `true` if the pair is verified, failed, or matched by an ignore rule.
    pub fn contains(&self, combination: &Combination) -> bool {
        self.membership(combination).is_some()
    }

    pub fn membership(&self, combination: &Combination) -> Option<Membership> {
        if self.is_ignored(combination) {
            Some(Membership::Ignored)
        } else if self.verified.contains(combination) {
            Some(Membership::Verified)
        } else if self.failed.contains(combination) {
            Some(Membership::Failed)
        } else {
            None
        }
    }

    pub fn is_ignored(&self, combination: &Combination) -> bool {
        self.ignored.iter().any(|rule| rule.matches(combination))
    }

    pub fn is_verified(&self, combination: &Combination) -> bool {
        self.verified.contains(combination)
    }

    pub fn is_failed(&self, combination: &Combination) -> bool {
        self.failed.contains(combination)
    }

    /// Mark a pair verified, clearing any earlier failure. Returns `true` if the store changed.
    pub fn record_success(&mut self, combination: &Combination) -> bool {
        let cleared = self.failed.remove(combination);
        let added = self.verified.insert(combination.clone());
        cleared || added
    }

    pub fn record_failure(&mut self, combination: &Combination) -> FailureRecord {
        if self.verified.contains(combination) {
            return FailureRecord::AlreadyVerified;
        }
        if self.failed.insert(combination.clone()) {
            FailureRecord::Added
        } else {
            FailureRecord::Unchanged
        }
    }

    /// Add an ignore rule. Returns `true` if it was not already present.
    pub fn ignore(&mut self, rule: IgnoreRule) -> bool {
        self.ignored.insert(rule)
    }

    /// Remove failed pairs matching `rule`, making them eligible again. Returns the number removed.
    pub fn clear_failed(&mut self, rule: &IgnoreRule) -> usize {
        let before = self.failed.len();
        self.failed.retain(|pair| !rule.matches(pair));
        before - self.failed.len()
    }

    pub fn verified(&self) -> impl Iterator<Item = &Combination> {
        self.verified.iter()
    }

    pub fn failed(&self) -> impl Iterator<Item = &Combination> {
        self.failed.iter()
    }

    pub fn ignored(&self) -> impl Iterator<Item = &IgnoreRule> {
        self.ignored.iter()
    }

    pub fn counts(&self) -> StoreCounts {
        StoreCounts {
            verified: self.verified.len(),
            failed: self.failed.len(),
            ignored: self.ignored.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.verified.is_empty() && self.failed.is_empty() && self.ignored.is_empty()
    }
}

//! Lazy candidate pair generation over the version matrix.
//!
//! The generator never materializes the product: it walks index cursors over
//! the two input lists, so memory stays constant regardless of matrix size.
//! Re-invoking [`MatrixGenerator::candidates`] restarts the walk, and with an
//! unchanged store and policy yields the same sequence.

use std::collections::HashSet;

use crate::core::combination::Combination;
use crate::core::policy::BrokenPairPolicy;
use crate::core::store::{CombinationStore, Membership};

/// How candidate pairs are enumerated.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MatrixMode {
    /// Every `cli × platform` pair.
    Full,
    /// Only pairs where `snapshot` sits in exactly one position, plus `(snapshot, snapshot)`.
    SnapshotDelta { snapshot: String },
}

/// Classification of a candidate before execution.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Disposition {
    /// Never attempted; will be executed.
    Pending,
    /// Failed earlier and retrying failed pairs is enabled.
    Retry,
    Broken,
    Verified,
    Failed,
    Ignored,
}

impl Disposition {
    pub fn is_runnable(self) -> bool {
        matches!(self, Disposition::Pending | Disposition::Retry)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Candidate {
    pub combination: Combination,
    pub disposition: Disposition,
}

/// Candidate pair generator with policy and store filtering.
#[derive(Debug, Clone, Copy)]
pub struct MatrixGenerator<'a> {
    cli_versions: &'a [String],
    platform_versions: &'a [String],
    mode: &'a MatrixMode,
    policy: &'a BrokenPairPolicy,
    store: &'a CombinationStore,
    retry_failed: bool,
}

impl<'a> MatrixGenerator<'a> {
    pub fn new(
        cli_versions: &'a [String],
        platform_versions: &'a [String],
        mode: &'a MatrixMode,
        policy: &'a BrokenPairPolicy,
        store: &'a CombinationStore,
    ) -> Self {
        Self {
            cli_versions,
            platform_versions,
            mode,
            policy,
            store,
            retry_failed: false,
        }
    }

    /// Offer previously failed pairs again instead of skipping them.
    pub fn retry_failed(mut self, retry: bool) -> Self {
        self.retry_failed = retry;
        self
    }

    /// Unfiltered pair sequence for the configured mode.
    pub fn pairs(&self) -> Pairs<'a> {
        Pairs::new(self.cli_versions, self.platform_versions, self.mode)
    }

    /// Every pair with its disposition, in generation order.
    pub fn candidates(&self) -> impl Iterator<Item = Candidate> + use<'a> {
        let generator = *self;
        self.pairs().map(move |combination| {
            let disposition = generator.classify(&combination);
            Candidate {
                combination,
                disposition,
            }
        })
    }

    /// Pairs that survive policy and store filtering.
    pub fn pending(&self) -> impl Iterator<Item = Combination> + use<'a> {
        self.candidates()
            .filter(|candidate| candidate.disposition.is_runnable())
            .map(|candidate| candidate.combination)
    }

    /// Broken pairs are dropped first, then anything the store already holds.
    pub fn classify(&self, combination: &Combination) -> Disposition {
        if self.policy.is_broken(combination) {
            return Disposition::Broken;
        }
        match self.store.membership(combination) {
            Some(Membership::Ignored) => Disposition::Ignored,
            Some(Membership::Verified) => Disposition::Verified,
            Some(Membership::Failed) if self.retry_failed => Disposition::Retry,
            Some(Membership::Failed) => Disposition::Failed,
            None => Disposition::Pending,
        }
    }
}

#[derive(Debug, Clone, Copy)]
enum Cursor {
    Full { cli: usize, platform: usize },
    /// `forward` emits `(snapshot, platform[index])`, otherwise `(cli[index], snapshot)`.
    Delta { index: usize, forward: bool },
    Done,
}

/// Lazy pair sequence. Finite; never yields the same pair twice for
/// de-duplicated inputs.
#[derive(Debug, Clone)]
pub struct Pairs<'a> {
    cli_versions: &'a [String],
    platform_versions: &'a [String],
    snapshot: Option<&'a str>,
    cursor: Cursor,
}

impl<'a> Pairs<'a> {
    fn new(cli_versions: &'a [String], platform_versions: &'a [String], mode: &'a MatrixMode) -> Self {
        let (snapshot, cursor) = match mode {
            MatrixMode::Full => (None, Cursor::Full { cli: 0, platform: 0 }),
            MatrixMode::SnapshotDelta { snapshot } => (
                Some(snapshot.as_str()),
                Cursor::Delta {
                    index: 0,
                    forward: true,
                },
            ),
        };
        Self {
            cli_versions,
            platform_versions,
            snapshot,
            cursor,
        }
    }

    fn next_full(&mut self, mut cli: usize, mut platform: usize) -> Option<Combination> {
        if self.platform_versions.is_empty() {
            self.cursor = Cursor::Done;
            return None;
        }
        if platform >= self.platform_versions.len() {
            cli += 1;
            platform = 0;
        }
        let Some(cli_version) = self.cli_versions.get(cli) else {
            self.cursor = Cursor::Done;
            return None;
        };
        let pair = Combination::new(cli_version.as_str(), self.platform_versions[platform].as_str());
        self.cursor = Cursor::Full {
            cli,
            platform: platform + 1,
        };
        Some(pair)
    }

    fn next_delta(&mut self, snapshot: &str, mut index: usize, mut forward: bool) -> Option<Combination> {
        let len = self.cli_versions.len().max(self.platform_versions.len());
        while index < len {
            let other = if forward {
                self.platform_versions.get(index)
            } else {
                self.cli_versions.get(index)
            };
            let (next_index, next_forward) = if forward {
                (index, false)
            } else {
                (index + 1, true)
            };
            if let Some(other) = other
                && other != snapshot
            {
                self.cursor = Cursor::Delta {
                    index: next_index,
                    forward: next_forward,
                };
                return Some(if forward {
                    Combination::new(snapshot, other.as_str())
                } else {
                    Combination::new(other.as_str(), snapshot)
                });
            }
            index = next_index;
            forward = next_forward;
        }
        self.cursor = Cursor::Done;
        Some(Combination::new(snapshot, snapshot))
    }
}

impl Iterator for Pairs<'_> {
    type Item = Combination;

    fn next(&mut self) -> Option<Combination> {
        match self.cursor {
            Cursor::Full { cli, platform } => self.next_full(cli, platform),
            Cursor::Delta { index, forward } => {
                let snapshot = self.snapshot?;
                self.next_delta(snapshot, index, forward)
            }
            Cursor::Done => None,
        }
    }
}

/// Remove duplicate versions, keeping the first occurrence.
pub fn dedup_versions(versions: &[String]) -> Vec<String> {
    let mut seen = HashSet::new();
    versions
        .iter()
        .filter(|version| seen.insert(version.as_str()))
        .cloned()
        .collect()
}

//! Artifact version ordering (dotted numerics followed by an optional qualifier).

use std::cmp::Ordering;
use std::fmt;

/// Parsed artifact version such as `2.10.0.Final`, `3.0.0.CR1` or `999-SNAPSHOT`.
///
/// Numeric segments compare numerically with missing trailing segments treated
/// as zero, so `3.0` equals `3.0.0`. Qualifiers then order as
/// `alpha < beta < milestone < rc < snapshot < release < sp < other`.
#[derive(Debug, Clone)]
pub struct ArtifactVersion {
    numbers: Vec<u64>,
    qualifier: Qualifier,
}

impl ArtifactVersion {
    /// Parse a version string. Returns `None` when there is no leading numeric segment.
    pub fn parse(input: &str) -> Option<Self> {
        let mut numbers = Vec::new();
        let mut rest = input.trim();
        loop {
            let end = rest.find(['.', '-']).unwrap_or(rest.len());
            let token = &rest[..end];
            if token.is_empty() || !token.bytes().all(|b| b.is_ascii_digit()) {
                break;
            }
            let Ok(value) = token.parse::<u64>() else {
                break;
            };
            numbers.push(value);
            rest = if end == rest.len() { "" } else { &rest[end + 1..] };
            if rest.is_empty() {
                break;
            }
        }
        if numbers.is_empty() {
            return None;
        }
        Some(Self {
            numbers,
            qualifier: Qualifier::parse(rest),
        })
    }

    pub fn numbers(&self) -> &[u64] {
        &self.numbers
    }

    pub fn qualifier(&self) -> &str {
        &self.qualifier.raw
    }
}

impl fmt::Display for ArtifactVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let numbers: Vec<String> = self.numbers.iter().map(u64::to_string).collect();
        write!(f, "{}", numbers.join("."))?;
        if !self.qualifier.raw.is_empty() {
            write!(f, ".{}", self.qualifier.raw)?;
        }
        Ok(())
    }
}

impl PartialEq for ArtifactVersion {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for ArtifactVersion {}

impl PartialOrd for ArtifactVersion {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for ArtifactVersion {
    fn cmp(&self, other: &Self) -> Ordering {
        let len = self.numbers.len().max(other.numbers.len());
        for i in 0..len {
            let left = self.numbers.get(i).copied().unwrap_or(0);
            let right = other.numbers.get(i).copied().unwrap_or(0);
            match left.cmp(&right) {
                Ordering::Equal => {}
                unequal => return unequal,
            }
        }
        self.qualifier.cmp(&other.qualifier)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct Qualifier {
    raw: String,
    rank: u8,
    number: u64,
    /// Lowercased form used for the final lexical tie-break.
    folded: String,
}

impl Qualifier {
    fn parse(raw: &str) -> Self {
        let folded = raw.to_ascii_lowercase();
        let name_len = folded
            .find(|c: char| !c.is_ascii_alphabetic())
            .unwrap_or(folded.len());
        let (name, suffix) = folded.split_at(name_len);
        let suffix = suffix.trim_start_matches(['.', '-']);
        let number = suffix.parse::<u64>().ok();
        let rank = match name {
            "alpha" | "a" => 0,
            "beta" | "b" => 1,
            "milestone" | "m" => 2,
            "rc" | "cr" => 3,
            "snapshot" => 4,
            "" if folded.is_empty() => 5,
            "final" | "ga" | "release" => 5,
            "sp" => 6,
            _ => 7,
        };
        // A suffix that is not a plain number makes the qualifier unknown.
        let rank = if number.is_none() && !suffix.is_empty() {
            7
        } else {
            rank
        };
        Self {
            raw: raw.to_string(),
            rank,
            number: number.unwrap_or(0),
            folded,
        }
    }
}

impl PartialOrd for Qualifier {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Qualifier {
    fn cmp(&self, other: &Self) -> Ordering {
        self.rank
            .cmp(&other.rank)
            .then_with(|| self.number.cmp(&other.number))
            .then_with(|| self.folded.cmp(&other.folded))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn v(input: &str) -> ArtifactVersion {
        ArtifactVersion::parse(input).expect("parse version")
    }

    #[test]
    fn parses_numbers_and_qualifier() {
        let version = v("2.10.0.Final");
        assert_eq!(version.numbers(), &[2, 10, 0]);
        assert_eq!(version.qualifier(), "Final");

        let snapshot = v("999-SNAPSHOT");
        assert_eq!(snapshot.numbers(), &[999]);
        assert_eq!(snapshot.qualifier(), "SNAPSHOT");
    }

    #[test]
    fn rejects_versions_without_numeric_prefix() {
        assert!(ArtifactVersion::parse("SNAPSHOT").is_none());
        assert!(ArtifactVersion::parse("").is_none());
        assert!(ArtifactVersion::parse("latest.1").is_none());
    }

    #[test]
    fn numeric_segments_compare_numerically() {
        assert!(v("2.10.0.Final") > v("2.9.0.Final"));
        assert!(v("2.10.0.Final") < v("2.11"));
        assert!(v("3.0.1.Final") >= v("3.0"));
        assert_eq!(v("3.0"), v("3.0.0"));
    }

    #[test]
    fn release_qualifiers_sort_after_pre_releases() {
        assert!(v("3.0.0.Alpha1") < v("3.0.0.Beta1"));
        assert!(v("3.0.0.Beta1") < v("3.0.0.CR1"));
        assert!(v("3.0.0.CR1") < v("3.0.0.CR2"));
        assert!(v("3.0.0.CR2") < v("3.0.0.Final"));
        assert!(v("3.0.0-SNAPSHOT") < v("3.0.0"));
        assert!(v("3.0.0.Alpha1") < v("3.0"));
    }

    #[test]
    fn final_and_bare_release_do_not_sort_before_threshold() {
        assert!(v("2.11.0.Final") >= v("2.11"));
        assert!(v("2.11.0") >= v("2.11"));
    }

    #[test]
    fn unknown_qualifiers_tie_break_lexically() {
        assert!(v("1.0.0.redhat") < v("1.0.0.zulu"));
        assert!(v("1.0.0.Final") < v("1.0.0.redhat-00001"));
        assert!(v("1.0.0.redhat-00001") < v("1.0.0.redhat-00002"));
    }
}

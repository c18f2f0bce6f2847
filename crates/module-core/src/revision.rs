//! Revision tags: the `(name, sequence)` identity of one compiled view of a
//! module.

use std::cmp::Ordering;

use crate::ids::ModuleId;

/// Identifies one compiled revision of a module.
///
/// Ordering is by name ascending, ties broken by sequence **descending**
/// (newest first) — this is the ordering the revision registry's sorted map
/// relies on so that iterating it yields each name's latest revision first.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RevisionTag {
    name: String,
    sequence: i64,
}

impl RevisionTag {
    pub fn new(name: impl Into<String>, sequence: i64) -> Self {
        Self {
            name: name.into(),
            sequence,
        }
    }

    pub fn of(id: &ModuleId, sequence: i64) -> Self {
        Self::new(id.name().to_string(), sequence)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn sequence(&self) -> i64 {
        self.sequence
    }
}

impl PartialOrd for RevisionTag {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for RevisionTag {
    fn cmp(&self, other: &Self) -> Ordering {
        self.name
            .cmp(&other.name)
            .then_with(|| other.sequence.cmp(&self.sequence))
    }
}

impl std::fmt::Display for RevisionTag {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}@{}", self.name, self.sequence)
    }
}

/// Monotonic sequence source for a batch of updates.
///
/// The reference design allows wall-clock milliseconds; open question (a)
/// in the design notes recommends a monotonic counter instead to avoid
/// collisions within a single millisecond, which this type provides.
#[derive(Debug, Default)]
pub struct SequenceCounter(std::sync::atomic::AtomicI64);

impl SequenceCounter {
    pub fn new() -> Self {
        Self(std::sync::atomic::AtomicI64::new(0))
    }

    /// Returns a sequence strictly greater than any previously returned by
    /// this counter.
    pub fn next(&self) -> i64 {
        self.0.fetch_add(1, std::sync::atomic::Ordering::SeqCst) + 1
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn orders_by_name_then_sequence_descending() {
        let mut tags = vec![
            RevisionTag::new("b", 1),
            RevisionTag::new("a", 2),
            RevisionTag::new("a", 5),
        ];
        tags.sort();
        assert_eq!(
            tags,
            vec![
                RevisionTag::new("a", 5),
                RevisionTag::new("a", 2),
                RevisionTag::new("b", 1),
            ]
        );
    }

    #[test]
    fn sequence_counter_is_monotone() {
        let counter = SequenceCounter::new();
        let a = counter.next();
        let b = counter.next();
        assert!(b > a);
    }
}

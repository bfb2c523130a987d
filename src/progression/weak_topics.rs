use std::collections::{BTreeMap, BTreeSet};

use crate::store::operations::performance::PerformanceRecord;

const MIN_ATTEMPTS: u32 = 2;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TagTally {
    pub correct: u32,
    pub wrong: u32,
}

impl TagTally {
    pub fn total(&self) -> u32 {
        self.correct + self.wrong
    }

    /// Error rate strictly above 40% over at least two attempts.
    pub fn is_weak(&self) -> bool {
        let total = self.total();
        total >= MIN_ATTEMPTS && self.wrong * 10 > total * 4
    }
}

pub fn tally_tags(records: &[PerformanceRecord]) -> BTreeMap<String, TagTally> {
    let mut tallies: BTreeMap<String, TagTally> = BTreeMap::new();
    for record in records {
        // a tag repeated on one challenge still counts once per answer
        let tags: BTreeSet<&str> = record.tags.iter().map(String::as_str).collect();
        for tag in tags {
            let tally = tallies.entry(tag.to_string()).or_default();
            if record.correct {
                tally.correct += 1;
            } else {
                tally.wrong += 1;
            }
        }
    }
    tallies
}

/// Weak tags among `records`, in tag order. Callers pass the recent window.
pub fn detect_weak_tags(records: &[PerformanceRecord]) -> Vec<String> {
    tally_tags(records)
        .into_iter()
        .filter(|(_, tally)| tally.is_weak())
        .map(|(tag, _)| tag)
        .collect()
}

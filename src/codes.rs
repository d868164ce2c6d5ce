//! Code allocation for newly discovered categories.
//!
//! A `CodeAllocator` is a plain value seeded from one codebook snapshot. It is
//! moved into each step that issues codes and handed back with the result, so
//! per-question pipelines never share allocation state.

use crate::codebook::{is_reserved, Codebook, MAX_CODE};
use std::collections::BTreeSet;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CodeAllocator {
    /// Codes at or below this are never issued to a new category
    baseline: i64,
    /// Highest code handed out by `mint`
    last: i64,
    /// Codebook codes plus every code issued or accepted so far
    used: BTreeSet<i64>,
}

impl CodeAllocator {
    /// New codes start at `floor`, or just above the codebook maximum when
    /// that is higher. `floor` is clamped to `1..=MAX_CODE`.
    pub fn seeded(codebook: &Codebook, floor: i64) -> Self {
        let baseline = (floor.clamp(1, MAX_CODE) - 1).max(codebook.max_code());
        Self {
            baseline,
            last: baseline,
            used: codebook.entries().iter().map(|e| e.code).collect(),
        }
    }

    /// Issue the next free code, skipping reserved and already used ones
    pub fn mint(&mut self) -> i64 {
        let mut next = self.last + 1;
        while self.used.contains(&next) || is_reserved(next) {
            next += 1;
        }
        self.last = next;
        self.used.insert(next);
        next
    }

    /// Accept `code` for a new category if it lies in the new-code range and
    /// nobody holds it yet. Returns whether it was granted.
    pub fn claim(&mut self, code: i64) -> bool {
        if !self.is_new_range(code) || is_reserved(code) || self.used.contains(&code) {
            return false;
        }
        self.used.insert(code);
        true
    }

    pub fn is_used(&self, code: i64) -> bool {
        self.used.contains(&code)
    }

    pub fn is_new_range(&self, code: i64) -> bool {
        code > self.baseline
    }

    /// First code a new category may receive
    pub fn first_new_code(&self) -> i64 {
        self.baseline + 1
    }
}

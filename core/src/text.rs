//! RGA (Replicated Growable Array) text CRDT (spec §5.1, §4.9), exposed to
//! the rest of the crate as a `custom{kind:"text"}` patch leaf via
//! [`crate::reflect::CustomData`].
//!
//! Grounded on the run-based RGA representation used by the pack's
//! CRDT-text references (`other_examples` diamond-types/diamond-crdts and
//! braid_tauri): characters inserted in one causal step are kept together
//! as a single *run* addressed by `(node_id, counter)` of its first
//! character; inserting into the middle of an existing run splits it at
//! that character offset so the new run has a well-defined `prev` anchor.

use crate::reflect::CustomData;
use std::any::Any;
use std::fmt;

#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct RunId {
    pub node_id: String,
    pub counter: u64,
}

impl RunId {
    pub fn offset(&self, n: u64) -> RunId {
        RunId {
            node_id: self.node_id.clone(),
            counter: self.counter + n,
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct TextRun {
    pub id: RunId,
    pub prev: Option<RunId>,
    pub value: String,
    pub deleted: bool,
}

impl TextRun {
    fn len(&self) -> usize {
        self.value.chars().count()
    }

    /// The id of this run's last character, used as the `prev` anchor for
    /// whatever gets inserted immediately after it.
    fn last_id(&self) -> RunId {
        self.id.offset(self.len() as u64 - 1)
    }
}

/// An RGA document: an ordered list of runs in final sequence order
/// (deleted runs are tombstoned in place, not removed, so every replica
/// converges to the same run list regardless of merge order — §8 "CRDT
/// convergence").
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Text {
    runs: Vec<TextRun>,
}

impl Text {
    pub fn new() -> Self {
        Text { runs: Vec::new() }
    }

    pub fn from_str(node_id: impl Into<String>, s: &str) -> Self {
        let mut t = Text::new();
        if !s.is_empty() {
            t.runs.push(TextRun {
                id: RunId {
                    node_id: node_id.into(),
                    counter: 0,
                },
                prev: None,
                value: s.to_string(),
                deleted: false,
            });
        }
        t
    }

    fn position_of(&self, id: &RunId) -> Option<(usize, usize)> {
        for (i, run) in self.runs.iter().enumerate() {
            let len = run.len() as u64;
            if id.node_id == run.id.node_id && id.counter >= run.id.counter && id.counter < run.id.counter + len {
                return Some((i, (id.counter - run.id.counter) as usize));
            }
        }
        None
    }

    /// Splits the run at `idx` so that character offset `at` begins a new
    /// run, inserted immediately after it. No-op if `at` is already a run
    /// boundary.
    fn split_at(&mut self, idx: usize, at: usize) {
        let run = &self.runs[idx];
        if at == 0 || at >= run.len() {
            return;
        }
        let chars: Vec<char> = run.value.chars().collect();
        let head: String = chars[..at].iter().collect();
        let tail: String = chars[at..].iter().collect();
        let tail_id = run.id.offset(at as u64);
        let deleted = run.deleted;
        let tail_run = TextRun {
            id: tail_id,
            prev: Some(run.id.offset(at as u64 - 1)),
            value: tail,
            deleted,
        };
        self.runs[idx].value = head;
        self.runs.insert(idx + 1, tail_run);
    }

    /// Low-level causal insert (§5.1 "insert"): `new_id` must not already
    /// exist in the document. Concurrent inserts sharing the same `prev`
    /// are ordered by descending id, the standard RGA tie-break that makes
    /// merge order-independent.
    pub fn insert(&mut self, prev: Option<RunId>, new_id: RunId, value: impl Into<String>) {
        let mut idx = match &prev {
            None => 0,
            Some(p) => match self.position_of(p) {
                Some((i, offset)) => {
                    self.split_at(i, offset + 1);
                    i + 1
                }
                None => self.runs.len(),
            },
        };
        while idx < self.runs.len() {
            let sibling = &self.runs[idx];
            if sibling.prev == prev && sibling.id > new_id {
                idx += 1;
            } else {
                break;
            }
        }
        self.runs.insert(
            idx,
            TextRun {
                id: new_id,
                prev,
                value: value.into(),
                deleted: false,
            },
        );
    }

    /// Convenience insert by visible character position, used by the
    /// builder/differ layers which think in terms of string offsets rather
    /// than causal ids.
    pub fn insert_at(&mut self, position: usize, new_id: RunId, value: impl Into<String>) {
        let prev = self.visible_id_before(position);
        self.insert(prev, new_id, value);
    }

    fn visible_id_before(&self, position: usize) -> Option<RunId> {
        let mut seen = 0usize;
        let mut last = None;
        for run in &self.runs {
            if run.deleted {
                continue;
            }
            let len = run.len();
            if seen + len >= position {
                let within = position - seen;
                return if within == 0 {
                    last
                } else {
                    Some(run.id.offset(within as u64 - 1))
                };
            }
            seen += len;
            last = Some(run.last_id());
        }
        last
    }

    /// Marks the character with this id as deleted (§5.1 "delete"); RGA
    /// tombstones rather than removes, so causal ordering survives merges.
    pub fn delete(&mut self, id: &RunId) {
        let Some((i, offset)) = self.position_of(id) else { return };
        self.split_at(i, offset);
        let Some((i, offset)) = self.position_of(id) else { return };
        debug_assert_eq!(offset, 0);
        self.split_at(i, 1);
        if let Some((i, _)) = self.position_of(id) {
            self.runs[i].deleted = true;
        }
    }

    pub fn delete_range(&mut self, position: usize, len: usize) {
        let ids: Vec<RunId> = (position..position + len)
            .filter_map(|p| self.visible_id_at(p))
            .collect();
        for id in ids {
            self.delete(&id);
        }
    }

    fn visible_id_at(&self, position: usize) -> Option<RunId> {
        let mut seen = 0usize;
        for run in &self.runs {
            if run.deleted {
                continue;
            }
            let len = run.len();
            if position < seen + len {
                return Some(run.id.offset((position - seen) as u64));
            }
            seen += len;
        }
        None
    }

    pub fn get_ordered(&self) -> String {
        self.runs.iter().filter(|r| !r.deleted).map(|r| r.value.as_str()).collect()
    }

    pub fn len(&self) -> usize {
        self.runs.iter().filter(|r| !r.deleted).map(TextRun::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Merges `other`'s history into `self`: every run not yet present is
    /// inserted at its causal position; runs present in both take the
    /// logical-OR of their tombstone state (§5 "merge is commutative,
    /// associative, idempotent").
    pub fn merge(&mut self, other: &Text) {
        for run in &other.runs {
            match self.position_of(&run.id) {
                None => self.insert(run.prev.clone(), run.id.clone(), run.value.clone()),
                Some(_) => {
                    if run.deleted {
                        self.delete(&run.id);
                    }
                }
            }
        }
    }

    /// Coalesces adjacent runs from the same origin with matching tombstone
    /// state into a single run, purely a storage optimization (does not
    /// change `get_ordered()`'s output).
    pub fn normalize(&mut self) {
        let mut merged: Vec<TextRun> = Vec::with_capacity(self.runs.len());
        for run in self.runs.drain(..) {
            if let Some(last) = merged.last_mut() {
                let contiguous = last.id.node_id == run.id.node_id
                    && last.id.counter + last.len() as u64 == run.id.counter
                    && last.deleted == run.deleted
                    && run.prev.as_ref() == Some(&last.last_id());
                if contiguous {
                    last.value.push_str(&run.value);
                    continue;
                }
            }
            merged.push(run);
        }
        self.runs = merged;
    }
}

impl fmt::Display for Text {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.get_ordered())
    }
}

impl CustomData for Text {
    fn kind(&self) -> &'static str {
        "text"
    }
    fn clone_box(&self) -> Box<dyn CustomData> {
        Box::new(self.clone())
    }
    fn eq_box(&self, other: &dyn CustomData) -> bool {
        other.as_any().downcast_ref::<Text>().map(|o| o == self).unwrap_or(false)
    }
    fn structural_bytes(&self) -> Vec<u8> {
        self.get_ordered().into_bytes()
    }
    fn as_any(&self) -> &dyn Any {
        self
    }
}

/// Registers `text`'s diff/merge hooks with the process-wide custom-hook
/// table (§5, §4.9). Call once at startup before diffing or CRDT-merging
/// any value containing a [`Text`] field.
pub fn register_hooks() {
    crate::registry::register_custom_hook(
        "text",
        crate::registry::CustomHooks {
            diff: |a, b| {
                let (Some(a), Some(b)) = (a.as_any().downcast_ref::<Text>(), b.as_any().downcast_ref::<Text>()) else {
                    return false;
                };
                a.get_ordered() == b.get_ordered()
            },
            merge: Some(|a, b| {
                let a = a.as_any().downcast_ref::<Text>().expect("text hook called on non-Text value");
                let b = b.as_any().downcast_ref::<Text>().expect("text hook called on non-Text value");
                let mut merged = a.clone();
                merged.merge(b);
                Box::new(merged)
            }),
        },
    );
}

#[cfg(test)]
mod tests {
    use super::*;

    fn id(node: &str, c: u64) -> RunId {
        RunId {
            node_id: node.to_string(),
            counter: c,
        }
    }

    #[test]
    fn sequential_inserts_produce_expected_order() {
        let mut t = Text::new();
        t.insert_at(0, id("a", 0), "h");
        t.insert_at(1, id("a", 1), "i");
        assert_eq!(t.get_ordered(), "hi");
    }

    #[test]
    fn middle_insert_splits_existing_run() {
        let mut t = Text::from_str("a", "helo");
        t.insert_at(3, id("a", 10), "l");
        assert_eq!(t.get_ordered(), "hello");
    }

    #[test]
    fn delete_range_removes_visible_chars() {
        let mut t = Text::from_str("a", "hello");
        t.delete_range(1, 3);
        assert_eq!(t.get_ordered(), "ho");
    }

    #[test]
    fn merge_is_commutative() {
        let mut a = Text::new();
        a.insert_at(0, id("a", 0), "a");
        let mut b = a.clone();
        a.insert_at(1, id("a", 1), "b");
        b.insert_at(1, id("b", 0), "c");

        let mut merged_ab = a.clone();
        merged_ab.merge(&b);
        let mut merged_ba = b.clone();
        merged_ba.merge(&a);
        assert_eq!(merged_ab.get_ordered(), merged_ba.get_ordered());
    }

    #[test]
    fn merge_is_idempotent() {
        let mut a = Text::new();
        a.insert_at(0, id("a", 0), "x");
        let b = a.clone();
        a.merge(&b);
        a.merge(&b);
        assert_eq!(a.get_ordered(), "x");
    }
}

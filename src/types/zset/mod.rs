// src/types/zset/mod.rs

//! # Timestamped Sorted Set
//!
//! A sorted set whose elements carry a score and a timestamp. Elements are
//! ordered by score ascending; equal scores put the *newer* timestamp first,
//! and remaining ties are broken by member bytes.
//!
//! [`ZSet`] keeps two views of the same elements in sync:
//! - a [`SkipList`] for ordered traversal and O(log n) rank queries, which
//!   owns every member;
//! - a [`MemberIndex`] mapping a member to its node, for O(1) lookups.
//!
//! The command surface built on top of this type lives in [`commands`];
//! snapshot and rewrite encoding in [`codec`].

pub mod codec;
pub mod commands;
pub mod index;
pub mod member;
pub mod range;
pub mod skiplist;

use crate::error::ZsetError;

pub use index::MemberIndex;
pub use member::Member;
pub use range::ScoreRange;
pub use skiplist::{NodeId, SkipList};

/// Modifiers for [`ZSet::add`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct AddFlags {
    /// Only add new elements; never touch existing ones.
    pub nx: bool,
    /// Only update existing elements; never add new ones.
    pub xx: bool,
    /// Treat the score as an increment over the current score (0 if absent).
    pub incr: bool,
}

/// What [`ZSet::add`] did with the element.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AddOutcome {
    Added,
    Updated,
    /// Present with the same score and timestamp; nothing changed.
    Unchanged,
    /// Not performed because of NX or XX.
    Skipped,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AddResult {
    pub outcome: AddOutcome,
    /// Score of the element after the call (the current one when skipped).
    pub score: Option<f64>,
}

impl AddResult {
    /// Whether the call went through, i.e. was not blocked by NX/XX.
    pub fn processed(&self) -> bool {
        self.outcome != AddOutcome::Skipped
    }
}

/// One element as seen through a read-only view of the set.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Element<'a> {
    pub member: &'a [u8],
    pub score: f64,
    pub timestamp: i64,
}

pub struct ZSet {
    list: SkipList,
    index: MemberIndex,
}

impl ZSet {
    pub fn new() -> Self {
        ZSet { list: SkipList::new(), index: MemberIndex::new() }
    }

    /// Set with a deterministic level generator.
    pub fn with_seed(seed: u64) -> Self {
        ZSet { list: SkipList::with_seed(seed), index: MemberIndex::new() }
    }

    pub fn len(&self) -> usize {
        self.list.len()
    }

    pub fn is_empty(&self) -> bool {
        self.list.is_empty()
    }

    fn element(&self, id: NodeId) -> Element<'_> {
        Element {
            member: self.list.member(id),
            score: self.list.score(id),
            timestamp: self.list.timestamp(id),
        }
    }

    pub fn score(&self, member: &[u8]) -> Option<f64> {
        self.index.find(member, &self.list).map(|id| self.list.score(id))
    }

    pub fn score_with_timestamp(&self, member: &[u8]) -> Option<(f64, i64)> {
        self.index
            .find(member, &self.list)
            .map(|id| (self.list.score(id), self.list.timestamp(id)))
    }

    pub fn contains(&self, member: &[u8]) -> bool {
        self.index.find(member, &self.list).is_some()
    }

    /// Add `member` or update its score and timestamp.
    ///
    /// An existing member whose score or timestamp changes is unlinked and
    /// re-inserted at its new position; its bytes are moved, not copied.
    /// A new member is copied exactly once.
    ///
    /// # Errors
    ///
    /// * `NanScore` if `score` is NaN.
    /// * `NanResult` if an increment produces NaN; the set is left untouched.
    pub fn add(
        &mut self,
        score: f64,
        timestamp: i64,
        member: &[u8],
        flags: AddFlags,
    ) -> Result<AddResult, ZsetError> {
        if score.is_nan() {
            return Err(ZsetError::NanScore);
        }

        let Some(id) = self.index.find(member, &self.list) else {
            if flags.xx {
                return Ok(AddResult { outcome: AddOutcome::Skipped, score: None });
            }
            let id = self.list.insert(score, timestamp, Member::copy_from(member));
            self.index.insert(member, id);
            return Ok(AddResult { outcome: AddOutcome::Added, score: Some(score) });
        };

        let current = self.list.score(id);
        let current_ts = self.list.timestamp(id);
        if flags.nx {
            return Ok(AddResult { outcome: AddOutcome::Skipped, score: Some(current) });
        }

        let mut score = score;
        if flags.incr {
            score += current;
            if score.is_nan() {
                return Err(ZsetError::NanResult);
            }
        }

        if score == current && timestamp == current_ts {
            return Ok(AddResult { outcome: AddOutcome::Unchanged, score: Some(score) });
        }

        let owned = match self.list.delete(current, current_ts, member) {
            Some(owned) => owned,
            None => panic!("indexed member missing from the skiplist"),
        };
        let new_id = self.list.insert(score, timestamp, owned);
        self.index.repoint(member, id, new_id);
        Ok(AddResult { outcome: AddOutcome::Updated, score: Some(score) })
    }

    /// Remove `member`. Returns whether it was present.
    pub fn remove(&mut self, member: &[u8]) -> bool {
        let Some(id) = self.index.find(member, &self.list) else {
            return false;
        };
        let score = self.list.score(id);
        let timestamp = self.list.timestamp(id);

        // de-index before the skiplist releases the member
        self.index.remove(member, id);
        if self.list.delete(score, timestamp, member).is_none() {
            panic!("indexed member missing from the skiplist");
        }
        self.maybe_resize();
        true
    }

    /// 0-based rank of `member`; with `reverse` rank 0 is the highest element.
    pub fn rank(&self, member: &[u8], reverse: bool) -> Option<usize> {
        let id = self.index.find(member, &self.list)?;
        let rank = self.node_rank(id);
        Some(if reverse { self.len() - rank } else { rank - 1 })
    }

    /// Elements between 0-based ranks `start` and `end`, both inclusive.
    ///
    /// Negative indices count from the end (`-1` is the last element).
    pub fn range_by_rank(&self, start: i64, end: i64, reverse: bool) -> Vec<Element<'_>> {
        let Some((start, end)) = clamp_ranks(start, end, self.len()) else {
            return Vec::new();
        };
        let len = self.len();
        // trivial start avoids the O(log n) lookup
        let mut cursor = match (reverse, start) {
            (false, 0) => self.list.first(),
            (true, 0) => self.list.tail(),
            (false, _) => self.list.node_by_rank(start + 1),
            (true, _) => self.list.node_by_rank(len - start),
        };

        let mut out = Vec::with_capacity(end - start + 1);
        for _ in start..=end {
            let Some(id) = cursor else { break };
            out.push(self.element(id));
            cursor = self.step(id, reverse);
        }
        out
    }

    /// Elements whose score lies in `range`, ascending (or descending with
    /// `reverse`), after skipping `offset` nodes and returning at most `limit`
    /// (negative means no limit).
    ///
    /// The skip does not look at the range bound, so an offset past the end
    /// of the matching elements yields an empty result.
    pub fn range_by_score(
        &self,
        range: &ScoreRange,
        reverse: bool,
        offset: usize,
        limit: i64,
    ) -> Vec<Element<'_>> {
        let mut cursor = if reverse {
            self.list.last_in_range(range)
        } else {
            self.list.first_in_range(range)
        };

        for _ in 0..offset {
            match cursor {
                Some(id) => cursor = self.step(id, reverse),
                None => break,
            }
        }

        let mut out = Vec::new();
        let mut limit = limit;
        while limit != 0 {
            let Some(id) = cursor else { break };
            let score = self.list.score(id);
            let inside = if reverse { range.gte_min(score) } else { range.lte_max(score) };
            if !inside {
                break;
            }
            out.push(self.element(id));
            cursor = self.step(id, reverse);
            if limit > 0 {
                limit -= 1;
            }
        }
        out
    }

    /// Number of elements whose score lies in `range`.
    pub fn count_in_range(&self, range: &ScoreRange) -> usize {
        let Some(first) = self.list.first_in_range(range) else {
            return 0;
        };
        let Some(last) = self.list.last_in_range(range) else {
            return 0;
        };
        let first_rank = self.node_rank(first);
        let last_rank = self.node_rank(last);
        last_rank - first_rank + 1
    }

    fn node_rank(&self, id: NodeId) -> usize {
        let rank = self
            .list
            .rank(self.list.score(id), self.list.timestamp(id), self.list.member(id));
        assert!(rank != 0, "live node has no rank in the skiplist");
        rank
    }

    /// Remove elements between 0-based ranks `start` and `end` (inclusive,
    /// negative from the end). Returns how many were removed.
    pub fn delete_range_by_rank(&mut self, start: i64, end: i64) -> usize {
        let Some((start, end)) = clamp_ranks(start, end, self.len()) else {
            return 0;
        };
        let removed = self.list.delete_range_by_rank(start + 1, end + 1, &mut self.index);
        self.maybe_resize();
        removed
    }

    /// Remove elements whose score lies in `range`. Returns how many were removed.
    pub fn delete_range_by_score(&mut self, range: &ScoreRange) -> usize {
        if range.is_empty() {
            return 0;
        }
        let removed = self.list.delete_range_by_score(range, &mut self.index);
        self.maybe_resize();
        removed
    }

    fn maybe_resize(&mut self) {
        if self.index.needs_resize() {
            self.index.resize();
        }
    }

    fn step(&self, id: NodeId, reverse: bool) -> Option<NodeId> {
        if reverse { self.list.prev(id) } else { self.list.next(id) }
    }

    /// Elements from lowest to highest.
    pub fn iter(&self) -> Iter<'_> {
        Iter { set: self, cursor: self.list.first(), reverse: false }
    }

    /// Elements from highest to lowest.
    pub fn iter_rev(&self) -> Iter<'_> {
        Iter { set: self, cursor: self.list.tail(), reverse: true }
    }

    /// Insert an element known to be absent, bypassing `add` semantics.
    /// Used when rebuilding a set from a snapshot.
    pub(crate) fn insert_new(&mut self, score: f64, timestamp: i64, member: Member) {
        let id = self.list.insert(score, timestamp, member);
        self.index.insert(self.list.member(id), id);
    }

    #[cfg(test)]
    pub(crate) fn check_invariants(&self) {
        self.list.check_invariants();
        assert_eq!(self.index.len(), self.list.len(), "index and skiplist disagree on count");
        for e in self.iter() {
            let id = self.index.find(e.member, &self.list).expect("member missing from index");
            assert_eq!(self.list.score(id), e.score);
            assert_eq!(self.list.timestamp(id), e.timestamp);
        }
    }

    #[cfg(test)]
    pub(crate) fn member_ptr(&self, member: &[u8]) -> Option<*const u8> {
        self.index.find(member, &self.list).map(|id| self.list.member_ptr(id))
    }
}

impl Default for ZSet {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for ZSet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_list()
            .entries(self.iter().map(|e| (String::from_utf8_lossy(e.member), e.score, e.timestamp)))
            .finish()
    }
}

/// Read-only traversal in either direction.
pub struct Iter<'a> {
    set: &'a ZSet,
    cursor: Option<NodeId>,
    reverse: bool,
}

impl<'a> Iterator for Iter<'a> {
    type Item = Element<'a>;

    fn next(&mut self) -> Option<Self::Item> {
        let id = self.cursor?;
        self.cursor = self.set.step(id, self.reverse);
        Some(self.set.element(id))
    }
}

/// Normalise a `start..=end` rank pair against `len`.
///
/// Negative values count from the end; start is clamped to 0 and end to
/// `len - 1`. Returns `None` when the range selects nothing.
fn clamp_ranks(start: i64, end: i64, len: usize) -> Option<(usize, usize)> {
    let len = len as i64;
    let mut start = if start < 0 { len + start } else { start };
    let mut end = if end < 0 { len + end } else { end };
    if start < 0 {
        start = 0;
    }
    if start > end || start >= len {
        return None;
    }
    if end >= len {
        end = len - 1;
    }
    Some((start as usize, end as usize))
}

// src/types/zset/skiplist.rs

//! # Skiplist Engine
//!
//! A classic span-annotated skiplist kept in an arena. Nodes are addressed by
//! [`NodeId`] and linked by ids instead of pointers; freed slots go to a free
//! list and are reused by later inserts.
//!
//! Elements are ordered by score ascending, then timestamp *descending*, then
//! member bytes ascending, so the list holds no two equal keys.
//!
//! ```text
//! L2: HEAD ----------------------> c ---------------> NIL
//! L1: HEAD ---------> a ---------> c ------> d -----> NIL
//! L0: HEAD -> b ----> a -> e ----> c ------> d -----> NIL
//! ```
//!
//! `levels[i].span` on a node counts how many level-0 steps the level-`i`
//! link jumps over; summing spans along a search path gives the 1-based rank.
//!
//! The list does not check for duplicate members: the owning `ZSet` consults
//! its membership index first.

use std::cmp::Ordering;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use smallvec::SmallVec;

use super::index::MemberIndex;
use super::member::Member;
use super::range::ScoreRange;

/// Enough for 4^32 elements.
pub const MAX_LEVEL: usize = 32;

/// Probability that a node grows one more level.
const LEVEL_P: f64 = 0.25;

/// Handle to a node in the arena. Only valid while the node is linked.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct NodeId(u32);

impl NodeId {
    const NIL: NodeId = NodeId(u32::MAX);
    const HEAD: NodeId = NodeId(0);

    fn is_nil(self) -> bool {
        self == Self::NIL
    }

    fn slot(self) -> usize {
        self.0 as usize
    }
}

#[derive(Debug, Clone, Copy)]
struct Level {
    forward: NodeId,
    span: usize,
}

struct Node {
    member: Member,
    score: f64,
    timestamp: i64,
    backward: NodeId,
    levels: SmallVec<[Level; 4]>,
}

/// Borrowed composite key used while searching.
#[derive(Clone, Copy)]
struct Key<'a> {
    score: f64,
    timestamp: i64,
    member: &'a [u8],
}

impl Key<'_> {
    /// Composite order. Scores are never NaN, so partial comparison is total here.
    fn order(&self, other: &Key<'_>) -> Ordering {
        if self.score < other.score {
            return Ordering::Less;
        }
        if self.score > other.score {
            return Ordering::Greater;
        }
        other
            .timestamp
            .cmp(&self.timestamp)
            .then_with(|| self.member.cmp(other.member))
    }
}

pub struct SkipList {
    nodes: Vec<Node>,
    free: Vec<NodeId>,
    tail: NodeId,
    level: usize,
    length: usize,
    rng: StdRng,
}

impl SkipList {
    /// New list whose level generator is seeded from OS entropy.
    pub fn new() -> Self {
        Self::with_rng(StdRng::from_entropy())
    }

    /// New list with a fixed level generator, so node heights are reproducible.
    pub fn with_seed(seed: u64) -> Self {
        Self::with_rng(StdRng::seed_from_u64(seed))
    }

    fn with_rng(rng: StdRng) -> Self {
        let head = Node {
            member: Member::default(),
            score: 0.0,
            timestamp: 0,
            backward: NodeId::NIL,
            levels: SmallVec::from_elem(Level { forward: NodeId::NIL, span: 0 }, MAX_LEVEL),
        };
        SkipList {
            nodes: vec![head],
            free: Vec::new(),
            tail: NodeId::NIL,
            level: 1,
            length: 0,
            rng,
        }
    }

    pub fn len(&self) -> usize {
        self.length
    }

    pub fn is_empty(&self) -> bool {
        self.length == 0
    }

    /// Current number of levels in use (at least 1).
    pub fn level(&self) -> usize {
        self.level
    }

    // --- node access ---

    fn node(&self, id: NodeId) -> &Node {
        &self.nodes[id.slot()]
    }

    fn node_mut(&mut self, id: NodeId) -> &mut Node {
        &mut self.nodes[id.slot()]
    }

    fn key(&self, id: NodeId) -> Key<'_> {
        let n = self.node(id);
        Key { score: n.score, timestamp: n.timestamp, member: n.member.as_bytes() }
    }

    fn forward(&self, id: NodeId, level: usize) -> NodeId {
        self.node(id).levels[level].forward
    }

    fn span(&self, id: NodeId, level: usize) -> usize {
        self.node(id).levels[level].span
    }

    fn some(id: NodeId) -> Option<NodeId> {
        if id.is_nil() { None } else { Some(id) }
    }

    pub fn member(&self, id: NodeId) -> &[u8] {
        self.node(id).member.as_bytes()
    }

    pub(crate) fn member_ptr(&self, id: NodeId) -> *const u8 {
        self.node(id).member.as_ptr()
    }

    pub fn score(&self, id: NodeId) -> f64 {
        self.node(id).score
    }

    pub fn timestamp(&self, id: NodeId) -> i64 {
        self.node(id).timestamp
    }

    /// Lowest element.
    pub fn first(&self) -> Option<NodeId> {
        Self::some(self.forward(NodeId::HEAD, 0))
    }

    /// Highest element.
    pub fn tail(&self) -> Option<NodeId> {
        Self::some(self.tail)
    }

    pub fn next(&self, id: NodeId) -> Option<NodeId> {
        Self::some(self.forward(id, 0))
    }

    pub fn prev(&self, id: NodeId) -> Option<NodeId> {
        Self::some(self.node(id).backward)
    }

    // --- allocation ---

    fn random_level(&mut self) -> usize {
        let mut level = 1;
        while level < MAX_LEVEL && self.rng.gen_bool(LEVEL_P) {
            level += 1;
        }
        level
    }

    fn alloc(&mut self, height: usize, score: f64, timestamp: i64, member: Member) -> NodeId {
        let levels = SmallVec::from_elem(Level { forward: NodeId::NIL, span: 0 }, height);
        let node = Node { member, score, timestamp, backward: NodeId::NIL, levels };
        match self.free.pop() {
            Some(id) => {
                *self.node_mut(id) = node;
                id
            }
            None => {
                let id = NodeId(self.nodes.len() as u32);
                assert!(!id.is_nil(), "skiplist arena exhausted");
                self.nodes.push(node);
                id
            }
        }
    }

    /// Return a slot to the free list and hand its member back.
    fn release(&mut self, id: NodeId) -> Member {
        let node = self.node_mut(id);
        node.levels.clear();
        node.backward = NodeId::NIL;
        let member = std::mem::take(&mut node.member);
        self.free.push(id);
        member
    }

    // --- core operations ---

    /// Insert a new element, taking ownership of `member`.
    ///
    /// The caller guarantees that `member` is not already in the list.
    pub fn insert(&mut self, score: f64, timestamp: i64, member: Member) -> NodeId {
        debug_assert!(!score.is_nan(), "NaN score reached the skiplist");
        let mut update = [NodeId::HEAD; MAX_LEVEL];
        let mut rank = [0usize; MAX_LEVEL];

        {
            let key = Key { score, timestamp, member: member.as_bytes() };
            let mut x = NodeId::HEAD;
            for i in (0..self.level).rev() {
                // rank crossed to reach the insert position at this level
                rank[i] = if i == self.level - 1 { 0 } else { rank[i + 1] };
                loop {
                    let next = self.forward(x, i);
                    if next.is_nil() || self.key(next).order(&key) != Ordering::Less {
                        break;
                    }
                    rank[i] += self.span(x, i);
                    x = next;
                }
                update[i] = x;
            }
        }

        let height = self.random_level();
        if height > self.level {
            for i in self.level..height {
                rank[i] = 0;
                update[i] = NodeId::HEAD;
                self.node_mut(NodeId::HEAD).levels[i].span = self.length;
            }
            self.level = height;
        }

        let x = self.alloc(height, score, timestamp, member);
        for i in 0..height {
            let pred = update[i];
            let crossed = rank[0] - rank[i];
            let Level { forward, span } = self.node(pred).levels[i];
            self.node_mut(x).levels[i] = Level { forward, span: span - crossed };
            self.node_mut(pred).levels[i] = Level { forward: x, span: crossed + 1 };
        }
        // untouched levels now jump over one more node
        for i in height..self.level {
            self.node_mut(update[i]).levels[i].span += 1;
        }

        self.node_mut(x).backward = if update[0] == NodeId::HEAD { NodeId::NIL } else { update[0] };
        let next = self.forward(x, 0);
        if next.is_nil() {
            self.tail = x;
        } else {
            self.node_mut(next).backward = x;
        }
        self.length += 1;
        x
    }

    /// Unlink `x`, given the rightmost node before it on every level.
    fn unlink(&mut self, x: NodeId, update: &[NodeId; MAX_LEVEL]) {
        for i in 0..self.level {
            let pred = update[i];
            if self.forward(pred, i) == x {
                let Level { forward, span } = self.node(x).levels[i];
                let p = &mut self.node_mut(pred).levels[i];
                p.span = p.span + span - 1;
                p.forward = forward;
            } else {
                self.node_mut(pred).levels[i].span -= 1;
            }
        }
        let next = self.forward(x, 0);
        let back = self.node(x).backward;
        if next.is_nil() {
            self.tail = back;
        } else {
            self.node_mut(next).backward = back;
        }
        while self.level > 1 && self.forward(NodeId::HEAD, self.level - 1).is_nil() {
            self.level -= 1;
        }
        self.length -= 1;
    }

    /// Collect, on every level, the last node strictly before `key`.
    fn predecessors(&self, key: &Key<'_>) -> ([NodeId; MAX_LEVEL], NodeId) {
        let mut update = [NodeId::HEAD; MAX_LEVEL];
        let mut x = NodeId::HEAD;
        for i in (0..self.level).rev() {
            loop {
                let next = self.forward(x, i);
                if next.is_nil() || self.key(next).order(key) != Ordering::Less {
                    break;
                }
                x = next;
            }
            update[i] = x;
        }
        (update, x)
    }

    /// Remove the element with exactly this key and give its member back.
    ///
    /// Dropping the returned `Member` releases the element; re-inserting it
    /// moves the same allocation into a new node.
    pub fn delete(&mut self, score: f64, timestamp: i64, member: &[u8]) -> Option<Member> {
        let key = Key { score, timestamp, member };
        let (update, x) = self.predecessors(&key);
        let x = self.forward(x, 0);
        if x.is_nil() || self.key(x).order(&key) != Ordering::Equal {
            return None;
        }
        self.unlink(x, &update);
        Some(self.release(x))
    }

    /// 1-based rank of the element with this key, or 0 when absent.
    pub fn rank(&self, score: f64, timestamp: i64, member: &[u8]) -> usize {
        let key = Key { score, timestamp, member };
        let mut rank = 0;
        let mut x = NodeId::HEAD;
        for i in (0..self.level).rev() {
            loop {
                let next = self.forward(x, i);
                if next.is_nil() || self.key(next).order(&key) == Ordering::Greater {
                    break;
                }
                rank += self.span(x, i);
                x = next;
            }
            if x != NodeId::HEAD && self.member(x) == member {
                return rank;
            }
        }
        0
    }

    /// Element at a 1-based rank.
    pub fn node_by_rank(&self, rank: usize) -> Option<NodeId> {
        let mut traversed = 0;
        let mut x = NodeId::HEAD;
        for i in (0..self.level).rev() {
            loop {
                let next = self.forward(x, i);
                if next.is_nil() || traversed + self.span(x, i) > rank {
                    break;
                }
                traversed += self.span(x, i);
                x = next;
            }
            if traversed == rank {
                return if x == NodeId::HEAD { None } else { Some(x) };
            }
        }
        None
    }

    /// Whether some part of the list may fall inside `range`.
    pub fn is_in_range(&self, range: &ScoreRange) -> bool {
        if range.is_empty() {
            return false;
        }
        match (self.tail(), self.first()) {
            (Some(last), Some(first)) => {
                range.gte_min(self.score(last)) && range.lte_max(self.score(first))
            }
            _ => false,
        }
    }

    /// Lowest element whose score lies in `range`.
    pub fn first_in_range(&self, range: &ScoreRange) -> Option<NodeId> {
        if !self.is_in_range(range) {
            return None;
        }
        let mut x = NodeId::HEAD;
        for i in (0..self.level).rev() {
            // go forward while *out* of range
            loop {
                let next = self.forward(x, i);
                if next.is_nil() || range.gte_min(self.score(next)) {
                    break;
                }
                x = next;
            }
        }
        // the tail is >= min, so something follows
        let x = self.forward(x, 0);
        assert!(!x.is_nil(), "skiplist range bookkeeping is corrupted");
        if range.lte_max(self.score(x)) { Some(x) } else { None }
    }

    /// Highest element whose score lies in `range`.
    pub fn last_in_range(&self, range: &ScoreRange) -> Option<NodeId> {
        if !self.is_in_range(range) {
            return None;
        }
        let mut x = NodeId::HEAD;
        for i in (0..self.level).rev() {
            // go forward while *in* range
            loop {
                let next = self.forward(x, i);
                if next.is_nil() || !range.lte_max(self.score(next)) {
                    break;
                }
                x = next;
            }
        }
        // the head is <= max, so we moved at least once
        assert!(x != NodeId::HEAD, "skiplist range bookkeeping is corrupted");
        if range.gte_min(self.score(x)) { Some(x) } else { None }
    }

    /// Remove every element whose score is in `range`, dropping each from `index` too.
    pub fn delete_range_by_score(&mut self, range: &ScoreRange, index: &mut MemberIndex) -> usize {
        let mut update = [NodeId::HEAD; MAX_LEVEL];
        let mut x = NodeId::HEAD;
        for i in (0..self.level).rev() {
            loop {
                let next = self.forward(x, i);
                if next.is_nil() || range.gte_min(self.score(next)) {
                    break;
                }
                x = next;
            }
            update[i] = x;
        }

        let mut removed = 0;
        let mut x = self.forward(x, 0);
        while !x.is_nil() && range.lte_max(self.score(x)) {
            let next = self.forward(x, 0);
            self.unlink(x, &update);
            index.remove(self.member(x), x);
            drop(self.release(x));
            removed += 1;
            x = next;
        }
        removed
    }

    /// Remove elements with 1-based rank in `start..=end`, dropping each from `index` too.
    pub fn delete_range_by_rank(&mut self, start: usize, end: usize, index: &mut MemberIndex) -> usize {
        let mut update = [NodeId::HEAD; MAX_LEVEL];
        let mut traversed = 0;
        let mut x = NodeId::HEAD;
        for i in (0..self.level).rev() {
            loop {
                let next = self.forward(x, i);
                if next.is_nil() || traversed + self.span(x, i) >= start {
                    break;
                }
                traversed += self.span(x, i);
                x = next;
            }
            update[i] = x;
        }

        traversed += 1;
        let mut removed = 0;
        let mut x = self.forward(x, 0);
        while !x.is_nil() && traversed <= end {
            let next = self.forward(x, 0);
            self.unlink(x, &update);
            index.remove(self.member(x), x);
            drop(self.release(x));
            removed += 1;
            traversed += 1;
            x = next;
        }
        removed
    }

    /// Walk every level and check links, spans, order and bookkeeping.
    #[cfg(test)]
    pub(crate) fn check_invariants(&self) {
        // level 0: order, backward links, tail, length
        let mut count = 0;
        let mut prev = NodeId::NIL;
        let mut x = self.forward(NodeId::HEAD, 0);
        while !x.is_nil() {
            count += 1;
            assert_eq!(self.node(x).backward, prev, "backward link broken");
            if !prev.is_nil() {
                assert_eq!(self.key(prev).order(&self.key(x)), Ordering::Less, "order broken");
            }
            assert!(self.node(x).levels.len() <= self.level);
            prev = x;
            x = self.forward(x, 0);
        }
        assert_eq!(count, self.length, "length mismatch");
        assert_eq!(self.tail, prev, "tail mismatch");

        // spans: each link on level i must jump exactly `span` level-0 steps
        let mut position = std::collections::HashMap::new();
        let mut x = self.forward(NodeId::HEAD, 0);
        while !x.is_nil() {
            position.insert(x, position.len() + 1);
            x = self.forward(x, 0);
        }
        for i in 0..self.level {
            let mut x = NodeId::HEAD;
            let mut pos = 0;
            loop {
                let next = self.forward(x, i);
                if next.is_nil() {
                    assert_eq!(pos + self.span(x, i), self.length, "tail span mismatch on level {i}");
                    break;
                }
                let target = position[&next];
                assert_eq!(pos + self.span(x, i), target, "span mismatch on level {i}");
                pos = target;
                x = next;
            }
        }
        if self.level > 1 {
            assert!(!self.forward(NodeId::HEAD, self.level - 1).is_nil(), "empty top level");
        }
    }
}

impl Default for SkipList {
    fn default() -> Self {
        Self::new()
    }
}

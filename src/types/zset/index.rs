// src/types/zset/index.rs

//! # Membership Index
//!
//! Maps a member to the skiplist node currently holding it, for O(1)
//! membership tests and score lookups.
//!
//! The index never stores member bytes. Entries are bucketed by the member's
//! hash and hold only [`NodeId`]s; on lookup the candidate node's member is
//! read back from the skiplist and compared. The skiplist therefore stays the
//! single owner of every member, and a score is always read through the node.

use std::hash::BuildHasher;

use rustc_hash::{FxBuildHasher, FxHashMap};
use smallvec::SmallVec;

use super::skiplist::{NodeId, SkipList};

/// Tables at or below this many slots are never compacted.
const MIN_CAPACITY: usize = 4;

/// Compact once fewer than this percentage of the slots are occupied.
const MIN_FILL_PERCENT: usize = 10;

#[derive(Default)]
pub struct MemberIndex {
    buckets: FxHashMap<u64, SmallVec<[NodeId; 1]>>,
    len: usize,
}

fn hash(member: &[u8]) -> u64 {
    FxBuildHasher.hash_one(member)
}

impl MemberIndex {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Node holding `member`, if any.
    pub fn find(&self, member: &[u8], list: &SkipList) -> Option<NodeId> {
        self.buckets
            .get(&hash(member))?
            .iter()
            .copied()
            .find(|&id| list.member(id) == member)
    }

    /// Register `id` as the node for `member`. The member must not be indexed yet.
    pub fn insert(&mut self, member: &[u8], id: NodeId) {
        self.buckets.entry(hash(member)).or_default().push(id);
        self.len += 1;
    }

    /// Forget `id`, which holds `member`. Returns whether it was indexed.
    pub fn remove(&mut self, member: &[u8], id: NodeId) -> bool {
        let h = hash(member);
        let Some(bucket) = self.buckets.get_mut(&h) else {
            return false;
        };
        let Some(pos) = bucket.iter().position(|&x| x == id) else {
            return false;
        };
        bucket.swap_remove(pos);
        if bucket.is_empty() {
            self.buckets.remove(&h);
        }
        self.len -= 1;
        true
    }

    /// Point `member`'s entry at a new node after the old one was replaced.
    pub fn repoint(&mut self, member: &[u8], old: NodeId, new: NodeId) {
        let slot = self
            .buckets
            .get_mut(&hash(member))
            .and_then(|bucket| bucket.iter_mut().find(|x| **x == old));
        match slot {
            Some(slot) => *slot = new,
            None => panic!("membership index lost an entry for a live member"),
        }
    }

    pub fn capacity(&self) -> usize {
        self.buckets.capacity()
    }

    /// Whether the table is mostly empty and worth compacting.
    pub fn needs_resize(&self) -> bool {
        let size = self.capacity();
        size > MIN_CAPACITY && self.buckets.len() * 100 / size < MIN_FILL_PERCENT
    }

    /// Shrink the table to fit the current entries.
    pub fn resize(&mut self) {
        self.buckets.shrink_to_fit();
    }
}

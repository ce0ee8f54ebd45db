// src/types/zset/member.rs

//! Owned member buffers.
//!
//! A `Member` is created exactly once, when an element first enters a set,
//! and is then *moved* between owners: into a skiplist node on insert, back
//! out of it on delete. It is never cloned by the sorted set itself, so the
//! bytes of a member live in one allocation for as long as it stays in the set.

use std::fmt;

/// Immutable, owned byte string identifying a sorted-set element.
#[derive(Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Member(Box<[u8]>);

impl Member {
    /// Copy `bytes` into a fresh allocation.
    pub fn copy_from(bytes: &[u8]) -> Self {
        Member(bytes.into())
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Address of the underlying allocation; stable across moves.
    pub fn as_ptr(&self) -> *const u8 {
        self.0.as_ptr()
    }
}

impl From<Vec<u8>> for Member {
    fn from(v: Vec<u8>) -> Self {
        Member(v.into_boxed_slice())
    }
}

impl fmt::Debug for Member {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Member({:?})", String::from_utf8_lossy(&self.0))
    }
}

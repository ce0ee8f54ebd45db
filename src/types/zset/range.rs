// src/types/zset/range.rs

//! Score intervals with independently open or closed bounds.
//!
//! On the wire a bound is a float, optionally prefixed by `(` to make it
//! exclusive: `(1.5 (2.5` matches `1.5 < x < 2.5`, `1.5 2.5` matches
//! `1.5 <= x <= 2.5`. `-inf` / `+inf` are accepted.

use crate::error::ZsetError;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ScoreRange {
    pub min: f64,
    pub max: f64,
    pub min_exclusive: bool,
    pub max_exclusive: bool,
}

impl ScoreRange {
    /// Closed interval `[min, max]`.
    pub fn inclusive(min: f64, max: f64) -> Self {
        ScoreRange { min, max, min_exclusive: false, max_exclusive: false }
    }

    /// Parse a `min max` pair as sent by clients.
    pub fn parse(min: &[u8], max: &[u8]) -> Result<Self, ZsetError> {
        let (min, min_exclusive) = parse_bound(min)?;
        let (max, max_exclusive) = parse_bound(max)?;
        Ok(ScoreRange { min, max, min_exclusive, max_exclusive })
    }

    pub fn gte_min(&self, value: f64) -> bool {
        if self.min_exclusive { value > self.min } else { value >= self.min }
    }

    pub fn lte_max(&self, value: f64) -> bool {
        if self.max_exclusive { value < self.max } else { value <= self.max }
    }

    pub fn contains(&self, value: f64) -> bool {
        self.gte_min(value) && self.lte_max(value)
    }

    /// True when no score at all can satisfy the interval.
    pub fn is_empty(&self) -> bool {
        self.min > self.max || (self.min == self.max && (self.min_exclusive || self.max_exclusive))
    }
}

fn parse_bound(raw: &[u8]) -> Result<(f64, bool), ZsetError> {
    let (digits, exclusive) = match raw.split_first() {
        Some((b'(', rest)) => (rest, true),
        _ => (raw, false),
    };
    let value = std::str::from_utf8(digits)
        .ok()
        .and_then(|s| s.parse::<f64>().ok())
        .filter(|v| !v.is_nan())
        .ok_or(ZsetError::MinMaxNotFloat)?;
    Ok((value, exclusive))
}

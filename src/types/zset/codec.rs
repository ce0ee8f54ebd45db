// src/types/zset/codec.rs

//! # Snapshot and Rewrite Encoding
//!
//! Snapshot layout of one set (all integers little-endian):
//!
//! ```text
//! [u64 count]
//! count x [u64 len][member bytes][f64 score][i64 timestamp]
//! ```
//!
//! Elements are written from the highest to the lowest, so the stream is in
//! descending composite order. The encoding version travels next to the
//! payload (see `persistence`) and must match [`ENCODING_VERSION`] on load.
//!
//! The rewrite form turns a set into `ZTS.ZADD key TS score ts member`
//! commands that rebuild it exactly when replayed on an empty key.

use std::io::{self, Read, Write};

use thiserror::Error;
use tracing::error;

use super::{Member, ZSet};

/// Version of the snapshot payload produced by [`save`].
pub const ENCODING_VERSION: u32 = 0;

/// Name the value type is registered under.
pub const TYPE_NAME: &str = "ZSetWithT";

/// Upper bound on a single member, to reject corrupted length prefixes
/// before allocating.
const MAX_MEMBER_LEN: u64 = 512 * 1024 * 1024;

#[derive(Debug, Error)]
pub enum CodecError {
    #[error("snapshot I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("data encoding version {found}, expecting version {expected}")]
    VersionMismatch { expected: u32, found: u32 },

    #[error("corrupted snapshot: {0}")]
    Corrupt(String),
}

/// Write every element of `set`, highest first.
pub fn save<W: Write>(set: &ZSet, w: &mut W) -> io::Result<()> {
    w.write_all(&(set.len() as u64).to_le_bytes())?;
    for e in set.iter_rev() {
        w.write_all(&(e.member.len() as u64).to_le_bytes())?;
        w.write_all(e.member)?;
        w.write_all(&e.score.to_le_bytes())?;
        w.write_all(&e.timestamp.to_le_bytes())?;
    }
    Ok(())
}

/// Convenience wrapper around [`save`] producing a buffer.
pub fn save_to_vec(set: &ZSet) -> Vec<u8> {
    let mut buf = Vec::new();
    // writing into a Vec cannot fail
    let _ = save(set, &mut buf);
    buf
}

fn read_u64<R: Read>(r: &mut R) -> io::Result<u64> {
    let mut b = [0u8; 8];
    r.read_exact(&mut b)?;
    Ok(u64::from_le_bytes(b))
}

fn read_i64<R: Read>(r: &mut R) -> io::Result<i64> {
    let mut b = [0u8; 8];
    r.read_exact(&mut b)?;
    Ok(i64::from_le_bytes(b))
}

fn read_f64<R: Read>(r: &mut R) -> io::Result<f64> {
    let mut b = [0u8; 8];
    r.read_exact(&mut b)?;
    Ok(f64::from_le_bytes(b))
}

/// Rebuild a set from a stream written by [`save`] under encoding `encver`.
///
/// # Errors
///
/// * `VersionMismatch` when `encver` is not [`ENCODING_VERSION`].
/// * `Corrupt` for NaN scores, duplicate members or absurd lengths.
/// * `Io` when the stream ends early.
pub fn load<R: Read>(r: &mut R, encver: u32) -> Result<ZSet, CodecError> {
    if encver != ENCODING_VERSION {
        error!(found = encver, expected = ENCODING_VERSION, "data encoding version mismatch");
        return Err(CodecError::VersionMismatch { expected: ENCODING_VERSION, found: encver });
    }

    let count = read_u64(r)?;
    let mut set = ZSet::new();
    for _ in 0..count {
        let len = read_u64(r)?;
        if len > MAX_MEMBER_LEN {
            return Err(CodecError::Corrupt(format!("member length {len} is too large")));
        }
        let mut bytes = vec![0u8; len as usize];
        r.read_exact(&mut bytes)?;
        let score = read_f64(r)?;
        let timestamp = read_i64(r)?;

        if score.is_nan() {
            return Err(CodecError::Corrupt("NaN score".into()));
        }
        if set.contains(&bytes) {
            return Err(CodecError::Corrupt(format!(
                "duplicate member {:?}",
                String::from_utf8_lossy(&bytes)
            )));
        }
        set.insert_new(score, timestamp, Member::from(bytes));
    }
    Ok(set)
}

/// Format a score so that parsing it back yields the same `f64`.
pub fn format_score(score: f64) -> String {
    if score.is_infinite() {
        return if score > 0.0 { "inf".into() } else { "-inf".into() };
    }
    // Display for f64 is the shortest representation that round-trips
    format!("{score}")
}

/// Commands that rebuild `set` under `key`, highest element first.
pub fn rewrite(key: &[u8], set: &ZSet) -> Vec<Vec<Vec<u8>>> {
    set.iter_rev()
        .map(|e| {
            vec![
                b"ZTS.ZADD".to_vec(),
                key.to_vec(),
                b"TS".to_vec(),
                format_score(e.score).into_bytes(),
                e.timestamp.to_string().into_bytes(),
                e.member.to_vec(),
            ]
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::zset::AddFlags;

    fn triples(set: &ZSet) -> Vec<(Vec<u8>, u64, i64)> {
        set.iter()
            .map(|e| (e.member.to_vec(), e.score.to_bits(), e.timestamp))
            .collect()
    }

    fn sample() -> ZSet {
        let mut z = ZSet::with_seed(3);
        let f = AddFlags::default();
        z.add(1.0, 100, b"a", f).unwrap();
        z.add(1.0, 200, b"b", f).unwrap();
        z.add(2.0, 50, b"c", f).unwrap();
        z.add(-0.5, -7, b"neg", f).unwrap();
        z.add(f64::INFINITY, 0, b"top", f).unwrap();
        z.add(0.1 + 0.2, 1, b"\x00bin\xff", f).unwrap();
        z
    }

    #[test]
    fn test_save_load_round_trip() {
        let z = sample();
        let buf = save_to_vec(&z);
        let back = load(&mut buf.as_slice(), ENCODING_VERSION).unwrap();
        assert_eq!(triples(&back), triples(&z));
        back.check_invariants();
    }

    #[test]
    fn test_save_writes_highest_first() {
        let mut z = ZSet::with_seed(1);
        z.add(1.0, 0, b"lo", AddFlags::default()).unwrap();
        z.add(2.0, 0, b"hi", AddFlags::default()).unwrap();
        let buf = save_to_vec(&z);

        assert_eq!(&buf[0..8], &2u64.to_le_bytes());
        assert_eq!(&buf[8..16], &2u64.to_le_bytes());
        assert_eq!(&buf[16..18], b"hi");
        assert_eq!(&buf[18..26], &2.0f64.to_le_bytes());
        assert_eq!(&buf[26..34], &0i64.to_le_bytes());
        assert_eq!(buf.len(), 8 + 2 * (8 + 2 + 8 + 8));
    }

    #[test]
    fn test_version_mismatch_is_reported() {
        let buf = save_to_vec(&sample());
        match load(&mut buf.as_slice(), 7) {
            Err(CodecError::VersionMismatch { expected, found }) => {
                assert_eq!(expected, ENCODING_VERSION);
                assert_eq!(found, 7);
            }
            other => panic!("expected version mismatch, got {other:?}"),
        }
    }

    #[test]
    fn test_truncated_and_corrupt_streams() {
        let buf = save_to_vec(&sample());
        let cut = &buf[..buf.len() - 3];
        assert!(matches!(load(&mut &cut[..], ENCODING_VERSION), Err(CodecError::Io(_))));

        let mut dup = Vec::new();
        dup.extend_from_slice(&2u64.to_le_bytes());
        for _ in 0..2 {
            dup.extend_from_slice(&1u64.to_le_bytes());
            dup.extend_from_slice(b"x");
            dup.extend_from_slice(&1.0f64.to_le_bytes());
            dup.extend_from_slice(&0i64.to_le_bytes());
        }
        assert!(matches!(load(&mut dup.as_slice(), ENCODING_VERSION), Err(CodecError::Corrupt(_))));

        let mut nan = Vec::new();
        nan.extend_from_slice(&1u64.to_le_bytes());
        nan.extend_from_slice(&1u64.to_le_bytes());
        nan.extend_from_slice(b"x");
        nan.extend_from_slice(&f64::NAN.to_le_bytes());
        nan.extend_from_slice(&0i64.to_le_bytes());
        assert!(matches!(load(&mut nan.as_slice(), ENCODING_VERSION), Err(CodecError::Corrupt(_))));
    }

    #[test]
    fn test_format_score_round_trips() {
        for v in [0.0, -0.0, 1.0, 0.1 + 0.2, 1e300, -2.5e-308, f64::INFINITY, f64::NEG_INFINITY] {
            let s = format_score(v);
            let back: f64 = s.parse().unwrap();
            assert_eq!(back.to_bits(), v.to_bits(), "{s}");
        }
        assert_eq!(format_score(3.0), "3");
        assert_eq!(format_score(f64::NEG_INFINITY), "-inf");
    }

    #[test]
    fn test_rewrite_emits_one_timestamped_add_per_member() {
        let z = sample();
        let cmds = rewrite(b"k", &z);
        assert_eq!(cmds.len(), z.len());
        assert_eq!(cmds[0][0], b"ZTS.ZADD");
        assert_eq!(cmds[0][2], b"TS");
        assert_eq!(cmds[0][5], b"top");

        let mut replayed = ZSet::with_seed(99);
        for cmd in &cmds {
            let score: f64 = std::str::from_utf8(&cmd[3]).unwrap().parse().unwrap();
            let ts: i64 = std::str::from_utf8(&cmd[4]).unwrap().parse().unwrap();
            replayed.add(score, ts, &cmd[5], AddFlags::default()).unwrap();
        }
        assert_eq!(triples(&replayed), triples(&z));
    }
}

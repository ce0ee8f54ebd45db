// src/types/zset/commands.rs

//! # Timestamped Sorted Set Commands
//!
//! The `ZTS.*` command family on top of [`ZSet`] and the [`Keyspace`].
//!
//! Every handler receives the full argument vector (command name first),
//! parses *all* of it before touching the keyspace, and reports the
//! deterministic commands that reproduce its mutation through `effects`.
//! Effects are what the append-only log stores: a replay never depends on the
//! server clock or on the state an `INCR` started from.
//!
//! Supported commands:
//! - `ZTS.ZADD`, `ZTS.ZINCRBY`, `ZTS.ZREM`
//! - `ZTS.ZCARD`, `ZTS.ZSCORE`, `ZTS.ZSCOREWITHTS`
//! - `ZTS.ZRANK`, `ZTS.ZREVRANK`
//! - `ZTS.ZRANGE`, `ZTS.ZREVRANGE`
//! - `ZTS.ZRANGEBYSCORE`, `ZTS.ZREVRANGEBYSCORE`, `ZTS.ZCOUNT`
//! - `ZTS.ZREMRANGEBYRANK`, `ZTS.ZREMRANGEBYSCORE`

use std::time::{SystemTime, UNIX_EPOCH};

use crate::engine::keyspace::Keyspace;
use crate::error::ZsetError;
use crate::protocol::{Args, Reply};

use super::codec::format_score;
use super::{AddFlags, AddOutcome, Element, ScoreRange, ZSet};

/// Signature shared by every command handler.
pub type Handler = fn(&Keyspace, &[Vec<u8>], &mut Vec<Args>) -> Result<Reply, ZsetError>;

/// Static description of one command.
pub struct CommandSpec {
    pub name: &'static str,
    /// Exact argument count when positive, minimum when negative
    /// (the command name counts).
    pub arity: i32,
    /// Whether the command may mutate the keyspace.
    pub write: bool,
    pub handler: Handler,
}

impl CommandSpec {
    fn arity_ok(&self, argc: usize) -> bool {
        let argc = argc as i32;
        if self.arity >= 0 { argc == self.arity } else { argc >= -self.arity }
    }
}

static COMMANDS: &[CommandSpec] = &[
    CommandSpec { name: "ZTS.ZADD", arity: -4, write: true, handler: zadd },
    CommandSpec { name: "ZTS.ZINCRBY", arity: 4, write: true, handler: zincrby },
    CommandSpec { name: "ZTS.ZREM", arity: -3, write: true, handler: zrem },
    CommandSpec { name: "ZTS.ZCARD", arity: 2, write: false, handler: zcard },
    CommandSpec { name: "ZTS.ZSCORE", arity: 3, write: false, handler: zscore },
    CommandSpec { name: "ZTS.ZSCOREWITHTS", arity: 3, write: false, handler: zscorewithts },
    CommandSpec { name: "ZTS.ZRANK", arity: 3, write: false, handler: zrank },
    CommandSpec { name: "ZTS.ZREVRANK", arity: 3, write: false, handler: zrevrank },
    CommandSpec { name: "ZTS.ZRANGE", arity: -4, write: false, handler: zrange },
    CommandSpec { name: "ZTS.ZREVRANGE", arity: -4, write: false, handler: zrevrange },
    CommandSpec { name: "ZTS.ZRANGEBYSCORE", arity: -4, write: false, handler: zrangebyscore },
    CommandSpec { name: "ZTS.ZREVRANGEBYSCORE", arity: -4, write: false, handler: zrevrangebyscore },
    CommandSpec { name: "ZTS.ZCOUNT", arity: 4, write: false, handler: zcount },
    CommandSpec { name: "ZTS.ZREMRANGEBYRANK", arity: 4, write: true, handler: zremrangebyrank },
    CommandSpec { name: "ZTS.ZREMRANGEBYSCORE", arity: 4, write: true, handler: zremrangebyscore },
];

/// Find a `ZTS.*` command by name, case-insensitively.
pub fn lookup(name: &[u8]) -> Option<&'static CommandSpec> {
    COMMANDS.iter().find(|c| c.name.as_bytes().eq_ignore_ascii_case(name))
}

/// All registered commands.
pub fn table() -> &'static [CommandSpec] {
    COMMANDS
}

/// Look up, arity-check and run a command.
///
/// # Errors
///
/// * `UnknownCommand` if the name is not a `ZTS.*` command.
/// * `WrongArity` if the argument count does not fit.
/// * Whatever the handler reports.
pub fn call(ks: &Keyspace, args: &[Vec<u8>], effects: &mut Vec<Args>) -> Result<Reply, ZsetError> {
    let Some(name) = args.first() else {
        return Err(ZsetError::UnknownCommand(String::new()));
    };
    let spec = lookup(name)
        .ok_or_else(|| ZsetError::UnknownCommand(String::from_utf8_lossy(name).into_owned()))?;
    if !spec.arity_ok(args.len()) {
        return Err(wrong_arity(args));
    }
    (spec.handler)(ks, args, effects)
}

fn wrong_arity(args: &[Vec<u8>]) -> ZsetError {
    let name = args.first().map(|n| String::from_utf8_lossy(n).to_lowercase()).unwrap_or_default();
    ZsetError::WrongArity(name)
}

/// Milliseconds since the Unix epoch.
pub fn now_ms() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as i64)
        .unwrap_or(0)
}

fn as_str(raw: &[u8]) -> Option<&str> {
    std::str::from_utf8(raw).ok()
}

/// Parse a score; `inf`, `+inf` and `-inf` are accepted, NaN is not.
pub fn parse_score(raw: &[u8]) -> Result<f64, ZsetError> {
    let v: f64 = as_str(raw)
        .and_then(|s| s.parse().ok())
        .ok_or(ZsetError::NotAFloat)?;
    if v.is_nan() {
        return Err(ZsetError::NotAFloat);
    }
    Ok(v)
}

fn parse_int(raw: &[u8]) -> Result<i64, ZsetError> {
    as_str(raw).and_then(|s| s.parse().ok()).ok_or(ZsetError::NotAnInteger)
}

fn parse_timestamp(raw: &[u8]) -> Result<i64, ZsetError> {
    as_str(raw).and_then(|s| s.parse().ok()).ok_or(ZsetError::InvalidTimestamp)
}

fn score_reply(score: f64) -> Reply {
    Reply::Bulk(format_score(score).into_bytes())
}

/// The effect recorded for an applied add: explicit timestamp, resolved score.
fn add_effect(key: &[u8], score: f64, timestamp: i64, member: &[u8]) -> Args {
    vec![
        b"ZTS.ZADD".to_vec(),
        key.to_vec(),
        b"TS".to_vec(),
        format_score(score).into_bytes(),
        timestamp.to_string().into_bytes(),
        member.to_vec(),
    ]
}

/// Execute `ZTS.ZADD key [NX|XX] [CH] [INCR] [TS] score [timestamp] member ...`.
///
/// Without `TS` every group is stamped with the same clock reading.
///
/// # Returns
///
/// * Number of added elements, or added plus updated with `CH`.
/// * With `INCR`: the new score, or nil when `NX`/`XX` blocked the update.
///
/// # Errors
///
/// * `WrongArity` when nothing or an incomplete group follows the options.
/// * `IncompatibleOptions` for `NX` with `XX` or `INCR` with `TS`.
/// * `IncrSinglePair` for `INCR` with more than one group.
/// * `NotAFloat` / `InvalidTimestamp` for malformed groups; nothing is applied.
/// * `NanResult` when an increment yields NaN; earlier groups stay applied.
pub fn zadd(ks: &Keyspace, args: &[Vec<u8>], effects: &mut Vec<Args>) -> Result<Reply, ZsetError> {
    let key = &args[1];
    let mut flags = AddFlags::default();
    let mut ch = false;
    let mut with_ts = false;

    let mut idx = 2;
    while idx < args.len() {
        let opt = args[idx].as_slice();
        if opt.eq_ignore_ascii_case(b"NX") {
            flags.nx = true;
        } else if opt.eq_ignore_ascii_case(b"XX") {
            flags.xx = true;
        } else if opt.eq_ignore_ascii_case(b"CH") {
            ch = true;
        } else if opt.eq_ignore_ascii_case(b"INCR") {
            flags.incr = true;
        } else if opt.eq_ignore_ascii_case(b"TS") {
            with_ts = true;
        } else {
            break;
        }
        idx += 1;
    }

    let per_group = if with_ts { 3 } else { 2 };
    let rest = args.len() - idx;
    if rest == 0 || rest % per_group != 0 {
        return Err(wrong_arity(args));
    }
    if flags.nx && flags.xx {
        return Err(ZsetError::IncompatibleOptions("XX", "NX"));
    }
    if flags.incr && with_ts {
        return Err(ZsetError::IncompatibleOptions("INCR", "TS"));
    }
    if flags.incr && rest / per_group > 1 {
        return Err(ZsetError::IncrSinglePair);
    }

    let now = now_ms();
    let groups = args[idx..]
        .chunks(per_group)
        .map(|g| {
            let score = parse_score(&g[0])?;
            if with_ts {
                Ok((score, parse_timestamp(&g[1])?, g[2].as_slice()))
            } else {
                Ok((score, now, g[1].as_slice()))
            }
        })
        .collect::<Result<Vec<_>, ZsetError>>()?;

    let mut added = 0i64;
    let mut updated = 0i64;
    let mut incr_reply = Reply::Nil;
    let apply = |set: &mut ZSet| -> Result<(), ZsetError> {
        for (score, timestamp, member) in groups {
            let r = set.add(score, timestamp, member, flags)?;
            match r.outcome {
                AddOutcome::Added => added += 1,
                AddOutcome::Updated => updated += 1,
                AddOutcome::Unchanged | AddOutcome::Skipped => {}
            }
            if let (AddOutcome::Added | AddOutcome::Updated, Some(score)) = (r.outcome, r.score) {
                effects.push(add_effect(key, score, timestamp, member));
            }
            incr_reply = match (r.processed(), r.score) {
                (true, Some(score)) => score_reply(score),
                _ => Reply::Nil,
            };
        }
        Ok(())
    };
    // XX never creates the key
    if flags.xx {
        ks.write(key, apply).transpose()?;
    } else {
        ks.upsert(key, apply)?;
    }

    if flags.incr {
        Ok(incr_reply)
    } else {
        Ok(Reply::Integer(if ch { added + updated } else { added }))
    }
}

/// Execute `ZTS.ZINCRBY key increment member`; stamps the member with the
/// current time and replies with the new score.
pub fn zincrby(ks: &Keyspace, args: &[Vec<u8>], effects: &mut Vec<Args>) -> Result<Reply, ZsetError> {
    let key = &args[1];
    let increment = parse_score(&args[2])?;
    let member = args[3].as_slice();
    let timestamp = now_ms();
    let flags = AddFlags { incr: true, ..Default::default() };

    let r = ks.upsert(key, |set| set.add(increment, timestamp, member, flags))?;
    if matches!(r.outcome, AddOutcome::Added | AddOutcome::Updated) {
        effects.push(add_effect(key, r.score.unwrap_or(increment), timestamp, member));
    }
    Ok(r.score.map_or(Reply::Nil, score_reply))
}

/// Execute `ZTS.ZREM key member [member ...]`; replies with the number removed.
pub fn zrem(ks: &Keyspace, args: &[Vec<u8>], effects: &mut Vec<Args>) -> Result<Reply, ZsetError> {
    let removed = ks
        .write(&args[1], |set| args[2..].iter().filter(|m| set.remove(m)).count())
        .unwrap_or(0);
    if removed > 0 {
        effects.push(args.to_vec());
    }
    Ok(Reply::Integer(removed as i64))
}

/// Execute `ZTS.ZCARD key`; 0 for a missing key.
pub fn zcard(ks: &Keyspace, args: &[Vec<u8>], _effects: &mut Vec<Args>) -> Result<Reply, ZsetError> {
    Ok(Reply::Integer(ks.read(&args[1], |set| set.len()).unwrap_or(0) as i64))
}

/// Execute `ZTS.ZSCORE key member`; nil when absent.
pub fn zscore(ks: &Keyspace, args: &[Vec<u8>], _effects: &mut Vec<Args>) -> Result<Reply, ZsetError> {
    let score = ks.read(&args[1], |set| set.score(&args[2])).flatten();
    Ok(score.map_or(Reply::Nil, score_reply))
}

/// Execute `ZTS.ZSCOREWITHTS key member`; replies `[score, timestamp]` or nil.
pub fn zscorewithts(ks: &Keyspace, args: &[Vec<u8>], _effects: &mut Vec<Args>) -> Result<Reply, ZsetError> {
    let found = ks.read(&args[1], |set| set.score_with_timestamp(&args[2])).flatten();
    Ok(match found {
        Some((score, ts)) => Reply::Array(vec![score_reply(score), Reply::Integer(ts)]),
        None => Reply::Nil,
    })
}

fn rank_generic(ks: &Keyspace, args: &[Vec<u8>], reverse: bool) -> Reply {
    ks.read(&args[1], |set| set.rank(&args[2], reverse))
        .flatten()
        .map_or(Reply::Nil, |r| Reply::Integer(r as i64))
}

/// Execute `ZTS.ZRANK key member`.
pub fn zrank(ks: &Keyspace, args: &[Vec<u8>], _effects: &mut Vec<Args>) -> Result<Reply, ZsetError> {
    Ok(rank_generic(ks, args, false))
}

/// Execute `ZTS.ZREVRANK key member`.
pub fn zrevrank(ks: &Keyspace, args: &[Vec<u8>], _effects: &mut Vec<Args>) -> Result<Reply, ZsetError> {
    Ok(rank_generic(ks, args, true))
}

/// Reply-shaping options shared by the range commands.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct RangeOpts {
    with_scores: bool,
    with_timestamps: bool,
    offset: i64,
    /// Negative means no limit.
    count: i64,
}

fn parse_range_opts(args: &[Vec<u8>], allow_limit: bool) -> Result<RangeOpts, ZsetError> {
    let mut opts = RangeOpts { with_scores: false, with_timestamps: false, offset: 0, count: -1 };
    let mut i = 0;
    while i < args.len() {
        let opt = args[i].as_slice();
        if opt.eq_ignore_ascii_case(b"WITHSCORES") {
            opts.with_scores = true;
        } else if opt.eq_ignore_ascii_case(b"WITHTIMESTAMPS") {
            opts.with_timestamps = true;
        } else if allow_limit && opt.eq_ignore_ascii_case(b"LIMIT") && i + 2 < args.len() {
            opts.offset = parse_int(&args[i + 1])?;
            opts.count = parse_int(&args[i + 2])?;
            i += 2;
        } else {
            return Err(ZsetError::Syntax);
        }
        i += 1;
    }
    Ok(opts)
}

fn elements_reply(elements: &[Element<'_>], opts: RangeOpts) -> Reply {
    let mut out = Vec::with_capacity(elements.len());
    for e in elements {
        out.push(Reply::bulk(e.member));
        if opts.with_scores {
            out.push(score_reply(e.score));
        }
        if opts.with_timestamps {
            out.push(Reply::Integer(e.timestamp));
        }
    }
    Reply::Array(out)
}

fn range_generic(ks: &Keyspace, args: &[Vec<u8>], reverse: bool) -> Result<Reply, ZsetError> {
    let start = parse_int(&args[2])?;
    let stop = parse_int(&args[3])?;
    let opts = parse_range_opts(&args[4..], false)?;
    Ok(ks
        .read(&args[1], |set| elements_reply(&set.range_by_rank(start, stop, reverse), opts))
        .unwrap_or(Reply::Array(Vec::new())))
}

/// Execute `ZTS.ZRANGE key start stop [WITHSCORES] [WITHTIMESTAMPS]`.
///
/// The reply is flat: each member is followed by its score and then its
/// timestamp when requested.
pub fn zrange(ks: &Keyspace, args: &[Vec<u8>], _effects: &mut Vec<Args>) -> Result<Reply, ZsetError> {
    range_generic(ks, args, false)
}

/// Execute `ZTS.ZREVRANGE key start stop [WITHSCORES] [WITHTIMESTAMPS]`.
pub fn zrevrange(ks: &Keyspace, args: &[Vec<u8>], _effects: &mut Vec<Args>) -> Result<Reply, ZsetError> {
    range_generic(ks, args, true)
}

fn range_by_score_generic(ks: &Keyspace, args: &[Vec<u8>], reverse: bool) -> Result<Reply, ZsetError> {
    let range = if reverse {
        ScoreRange::parse(&args[3], &args[2])?
    } else {
        ScoreRange::parse(&args[2], &args[3])?
    };
    let opts = parse_range_opts(&args[4..], true)?;
    if opts.offset < 0 {
        return Ok(Reply::Array(Vec::new()));
    }
    Ok(ks
        .read(&args[1], |set| {
            let elements = set.range_by_score(&range, reverse, opts.offset as usize, opts.count);
            elements_reply(&elements, opts)
        })
        .unwrap_or(Reply::Array(Vec::new())))
}

/// Execute `ZTS.ZRANGEBYSCORE key min max [WITHSCORES] [WITHTIMESTAMPS] [LIMIT offset count]`.
///
/// A `(` prefix makes a bound exclusive. A negative offset yields an empty
/// reply and a negative count means no limit.
pub fn zrangebyscore(ks: &Keyspace, args: &[Vec<u8>], _effects: &mut Vec<Args>) -> Result<Reply, ZsetError> {
    range_by_score_generic(ks, args, false)
}

/// Execute `ZTS.ZREVRANGEBYSCORE key max min [...]`.
pub fn zrevrangebyscore(ks: &Keyspace, args: &[Vec<u8>], _effects: &mut Vec<Args>) -> Result<Reply, ZsetError> {
    range_by_score_generic(ks, args, true)
}

/// Execute `ZTS.ZCOUNT key min max`.
pub fn zcount(ks: &Keyspace, args: &[Vec<u8>], _effects: &mut Vec<Args>) -> Result<Reply, ZsetError> {
    let range = ScoreRange::parse(&args[2], &args[3])?;
    let n = ks.read(&args[1], |set| set.count_in_range(&range)).unwrap_or(0);
    Ok(Reply::Integer(n as i64))
}

/// Execute `ZTS.ZREMRANGEBYRANK key start stop`; replies with the number removed.
pub fn zremrangebyrank(ks: &Keyspace, args: &[Vec<u8>], effects: &mut Vec<Args>) -> Result<Reply, ZsetError> {
    let start = parse_int(&args[2])?;
    let stop = parse_int(&args[3])?;
    let removed = ks
        .write(&args[1], |set| set.delete_range_by_rank(start, stop))
        .unwrap_or(0);
    if removed > 0 {
        effects.push(args.to_vec());
    }
    Ok(Reply::Integer(removed as i64))
}

/// Execute `ZTS.ZREMRANGEBYSCORE key min max`; replies with the number removed.
pub fn zremrangebyscore(ks: &Keyspace, args: &[Vec<u8>], effects: &mut Vec<Args>) -> Result<Reply, ZsetError> {
    let range = ScoreRange::parse(&args[2], &args[3])?;
    let removed = ks
        .write(&args[1], |set| set.delete_range_by_score(&range))
        .unwrap_or(0);
    if removed > 0 {
        effects.push(args.to_vec());
    }
    Ok(Reply::Integer(removed as i64))
}

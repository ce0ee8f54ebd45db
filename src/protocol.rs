// src/protocol.rs

//! # 协议编解码
//!
//! - 请求：RESP Array（`*N\r\n$len\r\n...`）或一行以空白分隔的内联命令。
//! - 回复：RESP2 的 Simple / Error / Integer / Bulk / Nil / Array。
//!
//! 解析是增量式的：缓冲区里数据不完整时返回 `Ok(None)`，由调用方继续读取。

use thiserror::Error;

/// 一条命令：命令名加参数，均为原始字节。
pub type Args = Vec<Vec<u8>>;

/// 单个 bulk 参数的上限（与 Redis 的 proto-max-bulk-len 一致）
const MAX_BULK_LEN: usize = 512 * 1024 * 1024;
/// 单条命令最多参数个数
const MAX_ARGS: usize = 1024 * 1024;
/// 内联命令一行的上限，也用于 `*N` / `$len` 头部
const MAX_INLINE_LEN: usize = 64 * 1024;
/// 新命令预先分配的参数槽位上限
const PREALLOC_ARGS: usize = 1024;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ProtocolError {
    #[error("invalid multibulk length")]
    InvalidMultibulkLength,

    #[error("invalid bulk length")]
    InvalidBulkLength,

    #[error("expected '$', got '{0}'")]
    ExpectedBulk(char),

    #[error("bulk string not terminated by CRLF")]
    MissingCrlf,

    #[error("too big inline request")]
    InlineTooLong,

    #[error("too big count string")]
    HeaderTooLong,
}

/// RESP2 回复
#[derive(Debug, Clone, PartialEq)]
pub enum Reply {
    Simple(String),
    Error(String),
    Integer(i64),
    Bulk(Vec<u8>),
    Nil,
    Array(Vec<Reply>),
}

impl Reply {
    pub fn ok() -> Self {
        Reply::Simple("OK".into())
    }

    pub fn bulk(bytes: impl Into<Vec<u8>>) -> Self {
        Reply::Bulk(bytes.into())
    }

    /// 编码为 RESP2 字节
    pub fn encode(&self) -> Vec<u8> {
        let mut out = Vec::new();
        self.encode_into(&mut out);
        out
    }

    pub fn encode_into(&self, out: &mut Vec<u8>) {
        match self {
            Reply::Simple(s) => {
                out.push(b'+');
                out.extend_from_slice(s.as_bytes());
                out.extend_from_slice(b"\r\n");
            }
            Reply::Error(s) => {
                out.push(b'-');
                out.extend_from_slice(s.as_bytes());
                out.extend_from_slice(b"\r\n");
            }
            Reply::Integer(n) => {
                out.extend_from_slice(format!(":{n}\r\n").as_bytes());
            }
            Reply::Bulk(b) => {
                out.extend_from_slice(format!("${}\r\n", b.len()).as_bytes());
                out.extend_from_slice(b);
                out.extend_from_slice(b"\r\n");
            }
            Reply::Nil => out.extend_from_slice(b"$-1\r\n"),
            Reply::Array(items) => {
                out.extend_from_slice(format!("*{}\r\n", items.len()).as_bytes());
                for item in items {
                    item.encode_into(out);
                }
            }
        }
    }
}

/// 把一条命令编码成 RESP Array（用于 AOF）
pub fn encode_command(args: &[Vec<u8>]) -> Vec<u8> {
    let mut out = format!("*{}\r\n", args.len()).into_bytes();
    for arg in args {
        out.extend_from_slice(format!("${}\r\n", arg.len()).as_bytes());
        out.extend_from_slice(arg);
        out.extend_from_slice(b"\r\n");
    }
    out
}

/// 从 `buf` 开头解析一条命令（无状态版本，用于整块数据，例如 AOF 重放）。
///
/// 返回解析出的参数和消耗的字节数；数据不完整时返回 `Ok(None)`。
/// 空的内联行会被消耗，并返回空的 `Args`。
pub fn parse(buf: &[u8]) -> Result<Option<(Args, usize)>, ProtocolError> {
    match RequestParser::new().parse(buf)? {
        (Some(args), used) => Ok(Some((args, used))),
        (None, _) => Ok(None),
    }
}

/// 每个连接一个的增量解析器。
///
/// 已经完整到达的 bulk 参数会立即被消耗并保存在解析器里，
/// 所以每次读到新数据后只需要从上次停下的地方继续，大命令的解析是线性的。
#[derive(Debug, Default)]
pub struct RequestParser {
    pending: Option<Multibulk>,
}

/// 解析到一半的 RESP Array
#[derive(Debug)]
struct Multibulk {
    remaining: usize,
    args: Args,
}

impl RequestParser {
    pub fn new() -> Self {
        Self::default()
    }

    /// 是否停在一条命令的中间
    pub fn is_pending(&self) -> bool {
        self.pending.is_some()
    }

    /// 从 `buf` 开头继续解析。
    ///
    /// 返回完整的命令（若有）和消耗的字节数。即使命令还不完整，
    /// 已消耗的字节也属于解析器，调用方必须把它们从缓冲区移除。
    /// 出错后解析器的状态不再可用。
    pub fn parse(&mut self, buf: &[u8]) -> Result<(Option<Args>, usize), ProtocolError> {
        let mut pos = 0;
        let mut mb = match self.pending.take() {
            Some(mb) => mb,
            None => {
                let Some(&first) = buf.first() else {
                    return Ok((None, 0));
                };
                if first != b'*' {
                    return Ok(match parse_inline(buf)? {
                        Some((args, used)) => (Some(args), used),
                        None => (None, 0),
                    });
                }
                let Some(eol) = find_crlf(buf, 1)? else {
                    return Ok((None, 0));
                };
                let count = parse_len(&buf[1..eol]).ok_or(ProtocolError::InvalidMultibulkLength)?;
                if count > MAX_ARGS as i64 {
                    return Err(ProtocolError::InvalidMultibulkLength);
                }
                pos = eol + 2;
                if count <= 0 {
                    return Ok((Some(Vec::new()), pos));
                }
                let count = count as usize;
                Multibulk {
                    remaining: count,
                    // 参数个数来自客户端，不按它一次性预留
                    args: Vec::with_capacity(count.min(PREALLOC_ARGS)),
                }
            }
        };

        while mb.remaining > 0 {
            match parse_bulk(&buf[pos..])? {
                Some((arg, used)) => {
                    mb.args.push(arg);
                    mb.remaining -= 1;
                    pos += used;
                }
                None => {
                    self.pending = Some(mb);
                    return Ok((None, pos));
                }
            }
        }
        Ok((Some(mb.args), pos))
    }
}

/// 查找 `from` 之后的第一个 CRLF，只在头部长度上限内查找
fn find_crlf(buf: &[u8], from: usize) -> Result<Option<usize>, ProtocolError> {
    let limit = buf.len().min(from + MAX_INLINE_LEN + 2);
    let found = buf
        .get(from..limit)
        .and_then(|line| line.windows(2).position(|w| w == b"\r\n"));
    match found {
        Some(p) => Ok(Some(p + from)),
        None if limit == from + MAX_INLINE_LEN + 2 => Err(ProtocolError::HeaderTooLong),
        None => Ok(None),
    }
}

fn parse_len(digits: &[u8]) -> Option<i64> {
    std::str::from_utf8(digits).ok()?.parse().ok()
}

/// 解析一个 `$len\r\n<bytes>\r\n`，数据不完整时返回 `Ok(None)`
fn parse_bulk(buf: &[u8]) -> Result<Option<(Vec<u8>, usize)>, ProtocolError> {
    let Some(&first) = buf.first() else {
        return Ok(None);
    };
    if first != b'$' {
        return Err(ProtocolError::ExpectedBulk(first as char));
    }
    let Some(eol) = find_crlf(buf, 1)? else {
        return Ok(None);
    };
    let len = parse_len(&buf[1..eol]).ok_or(ProtocolError::InvalidBulkLength)?;
    if len < 0 || len as usize > MAX_BULK_LEN {
        return Err(ProtocolError::InvalidBulkLength);
    }
    let start = eol + 2;
    let end = start + len as usize;
    if buf.len() < end + 2 {
        return Ok(None);
    }
    if &buf[end..end + 2] != b"\r\n" {
        return Err(ProtocolError::MissingCrlf);
    }
    Ok(Some((buf[start..end].to_vec(), end + 2)))
}

fn parse_inline(buf: &[u8]) -> Result<Option<(Args, usize)>, ProtocolError> {
    let Some(nl) = buf.iter().position(|&b| b == b'\n') else {
        if buf.len() > MAX_INLINE_LEN {
            return Err(ProtocolError::InlineTooLong);
        }
        return Ok(None);
    };
    let line = &buf[..nl];
    let args = line
        .split(|b| b.is_ascii_whitespace())
        .filter(|s| !s.is_empty())
        .map(<[u8]>::to_vec)
        .collect();
    Ok(Some((args, nl + 1)))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(items: &[&str]) -> Args {
        items.iter().map(|s| s.as_bytes().to_vec()).collect()
    }

    #[test]
    fn test_parse_multibulk() {
        let raw = b"*3\r\n$8\r\nZTS.ZADD\r\n$1\r\nk\r\n$3\r\na b\r\nrest";
        let (parsed, used) = parse(raw).unwrap().unwrap();
        assert_eq!(parsed, args(&["ZTS.ZADD", "k", "a b"]));
        assert_eq!(&raw[used..], b"rest");
    }

    #[test]
    fn test_parse_incomplete_waits_for_more() {
        let raw = b"*2\r\n$4\r\nPING\r\n$3\r\nab";
        for cut in 0..raw.len() {
            assert_eq!(parse(&raw[..cut]).unwrap(), None, "cut at {cut}");
        }
        assert_eq!(parse(b"ZTS.ZCARD k").unwrap(), None);
    }

    #[test]
    fn test_parse_inline() {
        let (parsed, used) = parse(b"ZTS.ZCARD  key\r\nPING\r\n").unwrap().unwrap();
        assert_eq!(parsed, args(&["ZTS.ZCARD", "key"]));
        assert_eq!(used, 16);

        let (parsed, used) = parse(b"\r\n").unwrap().unwrap();
        assert!(parsed.is_empty());
        assert_eq!(used, 2);
    }

    #[test]
    fn test_parse_errors() {
        assert_eq!(parse(b"*x\r\n"), Err(ProtocolError::InvalidMultibulkLength));
        assert_eq!(parse(b"*1\r\n:1\r\n"), Err(ProtocolError::ExpectedBulk(':')));
        assert_eq!(parse(b"*1\r\n$-3\r\n"), Err(ProtocolError::InvalidBulkLength));
        assert_eq!(parse(b"*1\r\n$1\r\nabc\r\n"), Err(ProtocolError::MissingCrlf));
        assert_eq!(parse(&vec![b'a'; MAX_INLINE_LEN + 1]), Err(ProtocolError::InlineTooLong));
    }

    #[test]
    fn test_parser_resumes_across_reads() {
        let raw = encode_command(&args(&["ZTS.ZADD", "k", "TS", "1", "2", "member"]));
        let mut parser = RequestParser::new();
        let mut buf = Vec::new();
        let mut done = None;
        for &byte in &raw {
            buf.push(byte);
            let (parsed, used) = parser.parse(&buf).unwrap();
            buf.drain(..used);
            if parsed.is_some() {
                done = parsed;
            }
        }
        assert_eq!(done, Some(args(&["ZTS.ZADD", "k", "TS", "1", "2", "member"])));
        assert!(buf.is_empty());
        assert!(!parser.is_pending());
    }

    #[test]
    fn test_large_command_in_small_reads() {
        // 20 万个成员，约 5MB，按 4KB 分片送入
        let mut cmd = args(&["ZTS.ZADD", "big"]);
        for i in 0..200_000 {
            cmd.push(b"1".to_vec());
            cmd.push(format!("member-{i:08}").into_bytes());
        }
        let raw = encode_command(&cmd);

        let started = std::time::Instant::now();
        let mut parser = RequestParser::new();
        let mut buf = Vec::new();
        let mut done = None;
        for slice in raw.chunks(4096) {
            buf.extend_from_slice(slice);
            let (parsed, used) = parser.parse(&buf).unwrap();
            buf.drain(..used);
            // 已完整到达的参数都被解析器接走，缓冲区里最多剩一个不完整的参数
            assert!(buf.len() < 4096 + 32, "buffer kept {} bytes", buf.len());
            if parsed.is_some() {
                done = parsed;
            }
        }
        let elapsed = started.elapsed();

        assert_eq!(done.as_ref().map(Vec::len), Some(cmd.len()));
        assert_eq!(done, Some(cmd));
        assert!(elapsed < std::time::Duration::from_secs(10), "took {elapsed:?}");
    }

    #[test]
    fn test_header_without_crlf_is_bounded() {
        let mut raw = b"*".to_vec();
        raw.extend(std::iter::repeat_n(b'1', MAX_INLINE_LEN + 2));
        assert_eq!(parse(&raw), Err(ProtocolError::HeaderTooLong));

        let mut raw = b"*1\r\n$".to_vec();
        raw.extend(std::iter::repeat_n(b'9', MAX_INLINE_LEN + 2));
        assert_eq!(parse(&raw), Err(ProtocolError::HeaderTooLong));

        // 未超过上限时继续等待
        assert_eq!(parse(b"*1\r\n$99999"), Ok(None));
    }

    #[test]
    fn test_huge_count_does_not_preallocate() {
        let mut parser = RequestParser::new();
        let (parsed, used) = parser.parse(b"*1048576\r\n$1\r\na\r\n").unwrap();
        assert_eq!(parsed, None);
        assert_eq!(used, 17);
        assert!(parser.is_pending());
        let pending = parser.pending.as_ref().unwrap();
        assert_eq!(pending.remaining, 1_048_575);
        assert!(pending.args.capacity() <= PREALLOC_ARGS);
    }

    #[test]
    fn test_encode_replies() {
        assert_eq!(Reply::ok().encode(), b"+OK\r\n");
        assert_eq!(Reply::Error("ERR syntax error".into()).encode(), b"-ERR syntax error\r\n");
        assert_eq!(Reply::Integer(-3).encode(), b":-3\r\n");
        assert_eq!(Reply::Nil.encode(), b"$-1\r\n");
        let arr = Reply::Array(vec![Reply::bulk("a"), Reply::Integer(7), Reply::Nil]);
        assert_eq!(arr.encode(), b"*3\r\n$1\r\na\r\n:7\r\n$-1\r\n");
    }

    #[test]
    fn test_encode_command_parses_back() {
        let cmd = args(&["ZTS.ZADD", "k", "TS", "1.5", "100", "\r\n member"]);
        let raw = encode_command(&cmd);
        let (parsed, used) = parse(&raw).unwrap().unwrap();
        assert_eq!(parsed, cmd);
        assert_eq!(used, raw.len());
    }
}

// tests/integration_zset.rs

//! 集成测试：通过 engine::execute 和真实的 TCP 连接驱动 ZTS.* 命令

use std::sync::Arc;

use anyhow::Result;
use tempfile::tempdir;
use tokio::{
    io::{AsyncReadExt, AsyncWriteExt},
    net::{TcpListener, TcpStream},
};

use tszset::{
    config::Config,
    engine::{execute, Keyspace},
    persistence::Persistence,
    protocol::{encode_command, Reply},
    server,
};

/// 辅助：把 &str 切片数组转成命令参数
fn cmd(parts: &[&str]) -> Vec<Vec<u8>> {
    parts.iter().map(|s| s.as_bytes().to_vec()).collect()
}

fn bulks(items: &[&str]) -> Reply {
    Reply::Array(items.iter().map(|s| Reply::bulk(s.as_bytes())).collect())
}

#[test]
fn test_leaderboard_flow() {
    let ks = Keyspace::new();

    // 同分数时新的时间戳排在前面
    let r = execute(&cmd(&["ZTS.ZADD", "board", "TS", "10", "1000", "alice", "10", "2000", "bob", "5", "1500", "carol"]), &ks);
    assert_eq!(r.reply, Reply::Integer(3));
    assert_eq!(r.effects.len(), 3);

    let r = execute(&cmd(&["ZTS.ZREVRANGE", "board", "0", "-1", "WITHSCORES"]), &ks);
    assert_eq!(
        r.reply,
        Reply::Array(vec![
            Reply::bulk("alice"), Reply::bulk("10"),
            Reply::bulk("bob"), Reply::bulk("10"),
            Reply::bulk("carol"), Reply::bulk("5"),
        ])
    );

    // 只改时间戳也会调整位置
    execute(&cmd(&["ZTS.ZADD", "board", "TS", "10", "3000", "alice"]), &ks);
    let r = execute(&cmd(&["ZTS.ZRANGE", "board", "0", "-1"]), &ks);
    assert_eq!(r.reply, bulks(&["carol", "alice", "bob"]));

    let r = execute(&cmd(&["ZTS.ZSCOREWITHTS", "board", "alice"]), &ks);
    assert_eq!(r.reply, Reply::Array(vec![Reply::bulk("10"), Reply::Integer(3000)]));

    let r = execute(&cmd(&["ZTS.ZRANGEBYSCORE", "board", "(5", "+inf", "WITHTIMESTAMPS"]), &ks);
    assert_eq!(
        r.reply,
        Reply::Array(vec![
            Reply::bulk("alice"), Reply::Integer(3000),
            Reply::bulk("bob"), Reply::Integer(2000),
        ])
    );

    let r = execute(&cmd(&["ZTS.ZREMRANGEBYSCORE", "board", "10", "10"]), &ks);
    assert_eq!(r.reply, Reply::Integer(2));
    assert_eq!(execute(&cmd(&["ZTS.ZCARD", "board"]), &ks).reply, Reply::Integer(1));

    let r = execute(&cmd(&["ZTS.ZREM", "board", "carol"]), &ks);
    assert_eq!(r.reply, Reply::Integer(1));
    assert_eq!(execute(&cmd(&["EXISTS", "board"]), &ks).reply, Reply::Integer(0));
}

#[test]
fn test_failed_parse_leaves_set_untouched() {
    let ks = Keyspace::new();
    execute(&cmd(&["ZTS.ZADD", "k", "TS", "1", "1", "a"]), &ks);

    let r = execute(&cmd(&["ZTS.ZADD", "k", "TS", "2", "2", "a", "x", "3", "b"]), &ks);
    assert_eq!(r.reply, Reply::Error("ERR value is not a valid float".into()));
    assert!(r.effects.is_empty());

    let r = execute(&cmd(&["ZTS.ZSCOREWITHTS", "k", "a"]), &ks);
    assert_eq!(r.reply, Reply::Array(vec![Reply::bulk("1"), Reply::Integer(1)]));
    assert_eq!(execute(&cmd(&["ZTS.ZSCORE", "k", "b"]), &ks).reply, Reply::Nil);
}

#[test]
fn test_clock_timestamps_are_shared_within_a_call() {
    let ks = Keyspace::new();
    let r = execute(&cmd(&["ZTS.ZADD", "k", "1", "a", "1", "b"]), &ks);
    assert_eq!(r.effects.len(), 2);
    // 两个元素拿到同一个时间戳，所以按成员字节排序
    assert_eq!(r.effects[0][4], r.effects[1][4]);
    assert_eq!(execute(&cmd(&["ZTS.ZRANGE", "k", "0", "-1"]), &ks).reply, bulks(&["a", "b"]));
}

/// 读一个完整的 RESP 回复（测试里回复都很短，按需累积）
async fn read_reply(stream: &mut TcpStream, expected: &[u8]) -> Result<Vec<u8>> {
    let mut out = Vec::new();
    let mut chunk = [0u8; 1024];
    while out.len() < expected.len() {
        let n = stream.read(&mut chunk).await?;
        if n == 0 {
            break;
        }
        out.extend_from_slice(&chunk[..n]);
    }
    Ok(out)
}

#[tokio::test]
async fn test_server_round_trip() -> Result<()> {
    let tmp = tempdir()?;
    let cfg = Config { rdb: false, ..Config::default() };
    let pers = Persistence::new_with_paths(cfg, tmp.path().join("db"), tmp.path().join("a.aof"))?;
    let ks = Arc::new(Keyspace::new());

    let listener = TcpListener::bind("127.0.0.1:0").await?;
    let addr = listener.local_addr()?;
    tokio::spawn(server::serve(listener, ks.clone(), pers.clone()));

    let mut stream = TcpStream::connect(addr).await?;

    // RESP 请求，分两次写，验证增量解析
    let req = encode_command(&cmd(&["ZTS.ZADD", "k", "TS", "1.5", "7", "m"]));
    let (head, tail) = req.split_at(10);
    stream.write_all(head).await?;
    stream.flush().await?;
    stream.write_all(tail).await?;
    let expected = Reply::Integer(1).encode();
    assert_eq!(read_reply(&mut stream, &expected).await?, expected);

    // 内联命令
    stream.write_all(b"ZTS.ZSCORE k m\r\n").await?;
    let expected = Reply::bulk("1.5").encode();
    assert_eq!(read_reply(&mut stream, &expected).await?, expected);

    // 错误回复
    stream.write_all(b"ZTS.ZADD k NX XX 1 m\r\n").await?;
    let expected = Reply::Error("ERR XX and NX options at the same time are not compatible".into()).encode();
    assert_eq!(read_reply(&mut stream, &expected).await?, expected);

    stream.write_all(b"QUIT\r\n").await?;
    let expected = Reply::ok().encode();
    assert_eq!(read_reply(&mut stream, &expected).await?, expected);

    // 写命令已经进了 AOF
    let aof = std::fs::read(pers.aof_path())?;
    assert_eq!(aof, encode_command(&cmd(&["ZTS.ZADD", "k", "TS", "1.5", "7", "m"])));
    Ok(())
}

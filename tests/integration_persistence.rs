// tests/integration_persistence.rs

//! 集成测试：验证 AOF 重放、AOF 重写和 sled 快照
//! 流程：
//! 1. 在临时目录打开 Persistence
//! 2. 经 execute_logged 执行若干写命令
//! 3. fsync_and_close() 后丢弃，模拟重启
//! 4. 新开 Persistence 并 load，对比重启前后的状态

use std::{fs, path::Path, sync::Arc};

use anyhow::Result;
use tempfile::tempdir;

use tszset::{
    config::Config,
    engine::{execute, Keyspace},
    persistence::{Persistence, SNAPSHOT_TREE},
    protocol::Reply,
};

fn cmd(parts: &[&str]) -> Vec<Vec<u8>> {
    parts.iter().map(|s| s.as_bytes().to_vec()).collect()
}

fn open(dir: &Path, aof: bool, rdb: bool) -> Result<Arc<Persistence>> {
    let cfg = Config { aof, rdb, snapshot_threshold: 0, ..Config::default() };
    Persistence::new_with_paths(cfg, dir.join("db"), dir.join("appendonly.aof"))
}

/// 键空间里某个 key 的完整内容（成员、分数、时间戳，按顺序）
fn dump(ks: &Keyspace, key: &str) -> Reply {
    execute(&cmd(&["ZTS.ZRANGE", key, "0", "-1", "WITHSCORES", "WITHTIMESTAMPS"]), ks).reply
}

fn write_workload(pers: &Persistence, ks: &Keyspace) -> Result<()> {
    let cmds: &[&[&str]] = &[
        &["ZTS.ZADD", "k", "TS", "1", "100", "a", "1", "200", "b", "2", "50", "c"],
        &["ZTS.ZADD", "k", "INCR", "2.5", "a"],
        &["ZTS.ZINCRBY", "k", "1", "n"],
        &["ZTS.ZADD", "k", "TS", "9", "1", "d", "10", "1", "e"],
        &["ZTS.ZREMRANGEBYRANK", "k", "0", "0"],
        &["ZTS.ZREM", "k", "c"],
        &["ZTS.ZADD", "gone", "1", "x"],
        &["DEL", "gone"],
        &["ZTS.ZADD", "other", "CH", "TS", "-1.25", "-5", "z"],
    ];
    for parts in cmds {
        let resp = pers.execute_logged(&cmd(parts), ks)?;
        assert!(!matches!(resp.reply, Reply::Error(_)), "{parts:?} -> {:?}", resp.reply);
    }
    Ok(())
}

#[test]
fn test_aof_replay_reproduces_state() -> Result<()> {
    let tmp = tempdir()?;
    let ks1 = Keyspace::new();
    {
        let pers = open(tmp.path(), true, false)?;
        write_workload(&pers, &ks1)?;
        pers.fsync_and_close();
    }

    // “重启”
    let ks2 = Keyspace::new();
    let pers = open(tmp.path(), true, false)?;
    pers.load(&ks2)?;

    assert_eq!(ks2.len(), 2);
    assert_eq!(dump(&ks2, "k"), dump(&ks1, "k"));
    assert_eq!(dump(&ks2, "other"), dump(&ks1, "other"));
    assert_eq!(execute(&cmd(&["EXISTS", "gone"]), &ks2).reply, Reply::Integer(0));
    Ok(())
}

#[test]
fn test_aof_rewrite_compacts_and_replays() -> Result<()> {
    let tmp = tempdir()?;
    let ks1 = Keyspace::new();
    {
        let pers = open(tmp.path(), true, false)?;
        write_workload(&pers, &ks1)?;
        pers.rewrite_aof(&ks1)?;
        // 每个元素一条 ZADD
        let rewritten = fs::read(pers.aof_path())?;
        let adds = rewritten.windows(8).filter(|w| *w == b"ZTS.ZADD").count();
        assert_eq!(adds, 5);

        // 重写之后继续追加
        pers.execute_logged(&cmd(&["ZTS.ZADD", "k", "TS", "0", "0", "late"]), &ks1)?;
        pers.fsync_and_close();
    }

    let ks2 = Keyspace::new();
    let pers = open(tmp.path(), true, false)?;
    pers.load(&ks2)?;
    assert_eq!(dump(&ks2, "k"), dump(&ks1, "k"));
    assert_eq!(dump(&ks2, "other"), dump(&ks1, "other"));
    Ok(())
}

#[test]
fn test_truncated_aof_tail_is_ignored() -> Result<()> {
    let tmp = tempdir()?;
    let ks1 = Keyspace::new();
    {
        let pers = open(tmp.path(), true, false)?;
        pers.execute_logged(&cmd(&["ZTS.ZADD", "k", "TS", "1", "1", "a"]), &ks1)?;
        pers.fsync_and_close();
    }
    // 模拟写到一半崩溃
    let aof = tmp.path().join("appendonly.aof");
    let mut data = fs::read(&aof)?;
    data.extend_from_slice(b"*6\r\n$8\r\nZTS.ZADD\r\n$1\r\nk");
    fs::write(&aof, data)?;

    let ks2 = Keyspace::new();
    let pers = open(tmp.path(), true, false)?;
    pers.load(&ks2)?;
    assert_eq!(dump(&ks2, "k"), dump(&ks1, "k"));
    Ok(())
}

#[test]
fn test_snapshot_reload() -> Result<()> {
    let tmp = tempdir()?;
    let ks1 = Keyspace::new();
    {
        let pers = open(tmp.path(), false, true)?;
        write_workload(&pers, &ks1)?;
        pers.snapshot(&ks1)?;

        // 删除 key 后再快照，快照里也应消失
        pers.execute_logged(&cmd(&["DEL", "other"]), &ks1)?;
        pers.snapshot(&ks1)?;
        pers.fsync_and_close();
    }

    let ks2 = Keyspace::new();
    let pers = open(tmp.path(), false, true)?;
    pers.load(&ks2)?;
    assert_eq!(ks2.len(), 1);
    assert_eq!(dump(&ks2, "k"), dump(&ks1, "k"));
    Ok(())
}

#[test]
fn test_snapshot_seeds_empty_aof() -> Result<()> {
    let tmp = tempdir()?;
    let ks1 = Keyspace::new();
    {
        let pers = open(tmp.path(), false, true)?;
        write_workload(&pers, &ks1)?;
        pers.snapshot(&ks1)?;
        pers.fsync_and_close();
    }

    // 打开 AOF 后第一次启动：从快照加载，并把状态写入 AOF
    {
        let ks = Keyspace::new();
        let pers = open(tmp.path(), true, true)?;
        pers.load(&ks)?;
        assert_eq!(dump(&ks, "k"), dump(&ks1, "k"));
        assert!(fs::metadata(pers.aof_path())?.len() > 0);
        pers.fsync_and_close();
    }

    let ks2 = Keyspace::new();
    let pers = open(tmp.path(), true, false)?;
    pers.load(&ks2)?;
    assert_eq!(dump(&ks2, "k"), dump(&ks1, "k"));
    Ok(())
}

#[test]
fn test_snapshot_version_mismatch_fails_load() -> Result<()> {
    let tmp = tempdir()?;
    {
        let db = sled::open(tmp.path().join("db"))?;
        let tree = db.open_tree(SNAPSHOT_TREE)?;
        let mut value = 7u32.to_le_bytes().to_vec();
        value.extend_from_slice(&0u64.to_le_bytes());
        tree.insert(b"k", value)?;
        db.flush()?;
    }

    let ks = Keyspace::new();
    let pers = open(tmp.path(), false, true)?;
    let err = pers.load(&ks).unwrap_err();
    let msg = format!("{err:#}");
    assert!(msg.contains("data encoding version 7, expecting version 0"), "{msg}");
    assert!(ks.is_empty());
    Ok(())
}

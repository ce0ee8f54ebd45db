// src/persistence.rs

//! # 持久化
//!
//! - AOF：每条写命令产生的效果命令以 RESP Array 追加到文件末尾。
//! - 快照：每个 key 的集合编码后写入 sled 的 `zsets` 树，
//!   值的格式为 `[u32 编码版本][payload]`。
//!
//! 启动时若 AOF 打开且非空，只重放 AOF；否则从快照加载。
//! 写命令的执行和 AOF 追加在同一把锁下完成，
//! 所以 AOF 重写和快照看到的是某个命令边界上的完整状态。

use anyhow::{bail, Context, Result};
use sled::{Db, Tree};
use std::{
    fs::{self, File, OpenOptions},
    io::Write,
    path::{Path, PathBuf},
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc, Mutex, MutexGuard, PoisonError,
    },
    thread,
    time::Duration,
};
use tracing::{debug, error, info, warn};

use crate::config::Config;
use crate::engine::{self, Keyspace, Response};
use crate::protocol::{self, Args};
use crate::types::zset::codec;

/// sled 中存放快照的树
pub const SNAPSHOT_TREE: &str = "zsets";

/// 持久化器：AOF 日志 + sled 快照
pub struct Persistence {
    cfg: Config,
    db: Db,
    tree: Tree,
    aof_path: PathBuf,
    /// 写锁；AOF 关闭时里面是 `None`，但锁本身仍用来串行化写命令
    aof_writer: Mutex<Option<File>>,
    write_count: AtomicU64,
}

impl Persistence {
    /// 使用配置中的路径打开
    pub fn open(cfg: Config) -> Result<Arc<Self>> {
        let snapshot_dir = cfg.snapshot_dir.clone();
        let aof_path = cfg.aof_path.clone();
        Self::new_with_paths(cfg, snapshot_dir, aof_path)
    }

    /// 指定快照目录和 AOF 文件路径
    pub fn new_with_paths(
        cfg: Config,
        snapshot_dir: impl AsRef<Path>,
        aof_path: impl Into<PathBuf>,
    ) -> Result<Arc<Self>> {
        let aof_path = aof_path.into();
        let snapshot_dir = snapshot_dir.as_ref();
        let db = sled::open(snapshot_dir)
            .with_context(|| format!("Failed to open snapshot store {:?}", snapshot_dir))?;
        let tree = db.open_tree(SNAPSHOT_TREE)?;

        // 打开或创建 AOF
        let aof_writer = if cfg.aof {
            Some(open_append(&aof_path)?)
        } else {
            None
        };

        Ok(Arc::new(Self {
            cfg,
            db,
            tree,
            aof_path,
            aof_writer: Mutex::new(aof_writer),
            write_count: AtomicU64::new(0),
        }))
    }

    pub fn aof_path(&self) -> &Path {
        &self.aof_path
    }

    fn lock(&self) -> MutexGuard<'_, Option<File>> {
        self.aof_writer.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// 启动周期快照线程（配置关闭快照时什么也不做）
    pub fn spawn_snapshot_thread(self: &Arc<Self>, ks: Arc<Keyspace>) {
        if !self.cfg.rdb || self.cfg.snapshot_interval_secs == 0 {
            return;
        }
        let p = self.clone();
        let interval = Duration::from_secs(self.cfg.snapshot_interval_secs);
        thread::spawn(move || loop {
            thread::sleep(interval);
            if let Err(e) = p.snapshot(&ks) {
                error!(error = %e, "periodic snapshot failed");
            }
        });
    }

    /// 启动时恢复数据
    pub fn load(&self, ks: &Keyspace) -> Result<()> {
        let aof_len = fs::metadata(&self.aof_path).map(|m| m.len()).unwrap_or(0);
        if self.cfg.aof && aof_len > 0 {
            let n = self.replay_aof(ks)?;
            info!(commands = n, keys = ks.len(), "AOF replayed");
            return Ok(());
        }

        let n = self.load_snapshot(ks)?;
        info!(keys = n, "snapshot loaded");
        // AOF 刚打开且为空：把快照内容写进去，否则下次启动会丢掉快照里的数据
        if self.cfg.aof && n > 0 {
            self.rewrite_aof(ks)?;
        }
        Ok(())
    }

    /// 从 sled 快照加载所有 key，返回 key 个数
    pub fn load_snapshot(&self, ks: &Keyspace) -> Result<usize> {
        let mut n = 0;
        for item in self.tree.iter() {
            let (key, value) = item?;
            if value.len() < 4 {
                bail!("corrupted snapshot entry for key {:?}", String::from_utf8_lossy(&key));
            }
            let mut ver = [0u8; 4];
            ver.copy_from_slice(&value[..4]);
            let encver = u32::from_le_bytes(ver);
            let set = codec::load(&mut &value[4..], encver).with_context(|| {
                format!("Failed to load key {:?} from snapshot", String::from_utf8_lossy(&key))
            })?;
            ks.insert(key.to_vec(), set);
            n += 1;
        }
        Ok(n)
    }

    /// 重放 AOF，返回重放的命令条数
    ///
    /// 文件末尾不完整的命令会被忽略并记录警告；格式错误则报错。
    pub fn replay_aof(&self, ks: &Keyspace) -> Result<usize> {
        let data = fs::read(&self.aof_path)
            .with_context(|| format!("Failed to read AOF {:?}", self.aof_path))?;
        let mut pos = 0;
        let mut n = 0;
        while pos < data.len() {
            let parsed = protocol::parse(&data[pos..])
                .with_context(|| format!("Bad AOF format at offset {}", pos))?;
            let Some((args, used)) = parsed else {
                warn!(offset = pos, bytes = data.len() - pos, "truncated command at end of AOF ignored");
                break;
            };
            pos += used;
            if args.is_empty() {
                continue;
            }
            let resp = engine::execute(&args, ks);
            if let protocol::Reply::Error(e) = &resp.reply {
                warn!(offset = pos, error = %e, "AOF command failed during replay");
            }
            n += 1;
        }
        Ok(n)
    }

    /// 执行一条写命令并把效果追加到 AOF，必要时触发快照
    pub fn execute_logged(&self, parts: &[Vec<u8>], ks: &Keyspace) -> Result<Response> {
        let mut writer = self.lock();
        let resp = engine::execute(parts, ks);
        if resp.effects.is_empty() {
            return Ok(resp);
        }
        if let Some(f) = writer.as_mut() {
            append_effects(f, &resp.effects).context("Failed to append to AOF")?;
        }

        if self.cfg.rdb && self.cfg.snapshot_threshold > 0 {
            let prev = self.write_count.fetch_add(1, Ordering::SeqCst);
            if prev + 1 >= self.cfg.snapshot_threshold {
                self.write_count.store(0, Ordering::SeqCst);
                if let Err(e) = self.snapshot_locked(ks) {
                    error!(error = %e, "threshold snapshot failed");
                }
            }
        }
        Ok(resp)
    }

    /// 执行一次全量快照
    pub fn snapshot(&self, ks: &Keyspace) -> Result<()> {
        let _guard = self.lock();
        self.snapshot_locked(ks)
    }

    // 调用方必须持有写锁
    fn snapshot_locked(&self, ks: &Keyspace) -> Result<()> {
        let mut batch = sled::Batch::default();
        let mut live = std::collections::HashSet::new();
        ks.for_each(|key, set| {
            let mut value = codec::ENCODING_VERSION.to_le_bytes().to_vec();
            value.extend_from_slice(&codec::save_to_vec(set));
            batch.insert(key, value);
            live.insert(key.to_vec());
        });
        // 删除快照里已经不存在的 key
        for item in self.tree.iter().keys() {
            let key = item?;
            if !live.contains(&key[..]) {
                batch.remove(key);
            }
        }
        self.tree.apply_batch(batch)?;
        self.db.flush()?;
        debug!(keys = live.len(), "snapshot written");
        Ok(())
    }

    /// 用当前状态重写 AOF：每个元素一条 `ZTS.ZADD key TS score ts member`
    pub fn rewrite_aof(&self, ks: &Keyspace) -> Result<()> {
        let mut writer = self.lock();
        if writer.is_none() {
            bail!("AOF is disabled");
        }

        // 写入临时文件
        let tmp = self.aof_path.with_extension("rewrite.tmp");
        let mut f = File::create(&tmp)
            .with_context(|| format!("Failed to create {:?}", tmp))?;
        let mut result = Ok(());
        let mut commands = 0usize;
        ks.for_each(|key, set| {
            if result.is_err() {
                return;
            }
            let cmds = codec::rewrite(key, set);
            commands += cmds.len();
            result = append_effects(&mut f, &cmds);
        });
        result?;
        f.sync_all()?;

        // 原子替换，再切换写句柄
        fs::rename(&tmp, &self.aof_path)?;
        *writer = Some(open_append(&self.aof_path)?);
        info!(commands, "AOF rewritten");
        Ok(())
    }

    /// 优雅关闭时调用，强制 fsync AOF 并刷写快照存储
    pub fn fsync_and_close(&self) {
        let writer = self.lock();
        if let Some(f) = writer.as_ref() {
            if let Err(e) = f.sync_all() {
                error!(error = %e, "AOF fsync failed");
            }
        }
        if let Err(e) = self.db.flush() {
            error!(error = %e, "snapshot store flush failed");
        }
    }
}

fn open_append(path: &Path) -> Result<File> {
    OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .with_context(|| format!("Failed to open AOF {:?}", path))
}

fn append_effects(f: &mut File, effects: &[Args]) -> std::io::Result<()> {
    let mut buf = Vec::new();
    for cmd in effects {
        buf.extend_from_slice(&protocol::encode_command(cmd));
    }
    f.write_all(&buf)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn argv(items: &[&str]) -> Args {
        items.iter().map(|s| s.as_bytes().to_vec()).collect()
    }

    #[test]
    fn test_logged_effects_are_resp() {
        let dir = tempfile::tempdir().unwrap();
        let cfg = Config { rdb: false, ..Config::default() };
        let aof = dir.path().join("a.aof");
        let pers = Persistence::new_with_paths(cfg, dir.path().join("db"), &aof).unwrap();
        let ks = Keyspace::new();

        pers.execute_logged(&argv(&["ZTS.ZADD", "k", "TS", "1.5", "7", "m"]), &ks).unwrap();
        // 没有效果的命令不写 AOF
        pers.execute_logged(&argv(&["ZTS.ZREM", "k", "nope"]), &ks).unwrap();

        let data = fs::read(&aof).unwrap();
        assert_eq!(data, protocol::encode_command(&argv(&["ZTS.ZADD", "k", "TS", "1.5", "7", "m"])));
    }
}

// src/config.rs

use serde::{Deserialize, Serialize};
use std::{fs, path::{Path, PathBuf}};
use anyhow::{Context, Result};

/// 进程启动后，从 config.json 中读到的全局配置
///
/// 缺失的字段取默认值，所以旧的配置文件仍然可以加载。
#[derive(Deserialize, Serialize, Debug, Clone, PartialEq)]
#[serde(default)]
pub struct Config {
    /// 监听地址
    pub bind: String,
    /// 是否打开 AOF 日志
    pub aof: bool,
    /// AOF 文件路径
    pub aof_path: PathBuf,
    /// 是否开启快照
    pub rdb: bool,
    /// 快照所在的 sled 目录
    pub snapshot_dir: PathBuf,
    /// 快照周期（秒）
    pub snapshot_interval_secs: u64,
    /// 每固定 N 次写操作强制快照，0 表示关闭
    pub snapshot_threshold: u64,
    /// 日志过滤规则，`RUST_LOG` 优先
    pub log_filter: String,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            bind: "127.0.0.1:6380".into(),
            aof: true,
            aof_path: PathBuf::from("appendonly.aof"),
            rdb: true,
            snapshot_dir: PathBuf::from("tszset.db"),
            snapshot_interval_secs: 60,
            snapshot_threshold: 1000,
            log_filter: "info".into(),
        }
    }
}

/// 从指定路径读取并反序列化 JSON 配置
///
/// 文件不存在时写入一份默认配置并返回它，第二个返回值为 `true`。
/// 此时日志通常还没初始化，由调用方决定何时记录。
pub fn load<P: AsRef<Path>>(path: P) -> Result<(Config, bool)> {
    let path_ref = path.as_ref();

    // 如果配置文件不存在，创建默认配置
    if !path_ref.exists() {
        let default_cfg = Config::default();
        let default_json = serde_json::to_string_pretty(&default_cfg)?;
        fs::write(path_ref, default_json)
            .with_context(|| format!("Failed to write default config {:?}", path_ref))?;
        return Ok((default_cfg, true));
    }

    let data = fs::read_to_string(path_ref)
        .with_context(|| format!("Failed to read config file {:?}", path_ref))?;
    let cfg: Config = serde_json::from_str(&data)
        .with_context(|| format!("Failed to parse config file {:?}", path_ref))?;
    Ok((cfg, false))
}

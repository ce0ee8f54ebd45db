// src/main.rs
use std::{path::PathBuf, sync::Arc};

use anyhow::Result;
use clap::Parser;
use tracing::{error, info};

use tszset::{config, engine::Keyspace, logging, persistence::Persistence, server};

/// 带时间戳的有序集合服务器
#[derive(Parser, Debug)]
#[command(name = "tszset", version, about)]
struct Cli {
    /// 配置文件路径，不存在时写入默认配置
    #[arg(short, long, default_value = "config.json")]
    config: PathBuf,

    /// 覆盖配置中的监听地址
    #[arg(short, long)]
    bind: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let (mut cfg, created) = config::load(&cli.config)?;
    if let Some(bind) = cli.bind {
        cfg.bind = bind;
    }
    logging::init(&cfg.log_filter)?;
    if created {
        info!(config = ?cli.config, "config file not found, default configuration created");
    }
    info!(config = ?cli.config, "configuration loaded");

    // 1. 恢复数据：AOF 或快照
    let ks = Arc::new(Keyspace::new());
    let pers = Persistence::open(cfg.clone())?;
    if let Err(e) = pers.load(&ks) {
        error!(error = %format!("{e:#}"), "failed to load persisted data");
        return Err(e);
    }

    // 2. 周期快照
    pers.spawn_snapshot_thread(ks.clone());

    // 3. 服务，直到 Ctrl-C
    tokio::select! {
        res = server::start(&cfg.bind, ks.clone(), pers.clone()) => {
            if let Err(e) = res {
                error!(error = %format!("{e:#}"), "server stopped");
                return Err(e);
            }
        }
        _ = tokio::signal::ctrl_c() => {
            info!("shutting down");
        }
    }

    // 4. 优雅关闭：最后一次快照并 fsync
    if cfg.rdb {
        if let Err(e) = pers.snapshot(&ks) {
            error!(error = %e, "final snapshot failed");
        }
    }
    pers.fsync_and_close();
    Ok(())
}

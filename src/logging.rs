// src/logging.rs

use tracing_subscriber::{fmt, layer::SubscriberExt, EnvFilter, Registry};

/// 初始化全局 `tracing` subscriber
///
/// `RUST_LOG` 存在时优先使用，否则使用配置里的 `default_filter`。
pub fn init(default_filter: &str) -> anyhow::Result<()> {
    let fmt_layer = fmt::layer()
        .with_writer(std::io::stderr)
        .with_target(true);
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(default_filter))
        .unwrap_or_else(|_| EnvFilter::new("info"));
    let subscriber = Registry::default().with(filter).with(fmt_layer);
    tracing::subscriber::set_global_default(subscriber)?;
    Ok(())
}

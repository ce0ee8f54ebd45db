// src/lib.rs
//! tszset 库：protocol / server / engine / persistence / types

pub mod config;      // 配置加载
pub mod engine;      // 命令分发 & 键空间
pub mod error;       // 命令错误
pub mod logging;     // tracing 初始化
pub mod persistence; // AOF + sled 快照
pub mod protocol;    // 协议编解码
pub mod server;      // 网络层
pub mod types;       // 带时间戳的有序集合

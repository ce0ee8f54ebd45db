// src/engine/mod.rs

//! # 引擎模块
//!
//! `engine` 模块是服务器的核心。它：
//! - 从网络层接收已解析的命令（`Args`，命令名在前）。
//! - 处理通用命令（`PING`、`DEL`、`EXISTS`、`DBSIZE`、`TYPE`）。
//! - 把 `ZTS.*` 命令交给 `types::zset::commands` 执行。
//! - 返回回复和需要写入 AOF 的效果命令。
//!
//! 持久化相关的命令（`SAVE`、`BGREWRITEAOF`）由网络层处理，不经过这里。
pub mod keyspace;
pub use keyspace::Keyspace;

use tracing::debug;

use crate::error::ZsetError;
use crate::protocol::{Args, Reply};
use crate::types::zset::{codec, commands};

/// 一次命令执行的结果
#[derive(Debug, Clone, PartialEq)]
pub struct Response {
    /// 发回客户端的回复
    pub reply: Reply,
    /// 需要追加到 AOF 的确定性命令（可能为空）
    pub effects: Vec<Args>,
    /// 客户端请求关闭连接
    pub quit: bool,
}

impl Response {
    fn reply(reply: Reply) -> Self {
        Response { reply, effects: Vec::new(), quit: false }
    }
}

/// 对键空间执行单个客户端命令
///
/// # 参数
///
/// * `parts` - 命令名称及其参数
/// * `ks` - 键空间
pub fn execute(parts: &[Vec<u8>], ks: &Keyspace) -> Response {
    // 1. 空白命令检查
    let Some(name) = parts.first() else {
        return Response::reply(Reply::Error("ERR empty command".into()));
    };
    let cmd = String::from_utf8_lossy(name).to_uppercase();

    // 2. 通用命令
    let generic = match cmd.as_str() {
        "PING" => Some(match parts.len() {
            1 => Ok(Reply::Simple("PONG".into())),
            2 => Ok(Reply::bulk(parts[1].as_slice())),
            _ => Err(ZsetError::WrongArity("ping".into())),
        }),
        "QUIT" => {
            return Response { reply: Reply::ok(), effects: Vec::new(), quit: true };
        }
        "DEL" => Some(del(parts, ks)),
        "EXISTS" => Some(exists(parts, ks)),
        "DBSIZE" => Some(if parts.len() == 1 {
            Ok(Reply::Integer(ks.len() as i64))
        } else {
            Err(ZsetError::WrongArity("dbsize".into()))
        }),
        "TYPE" => Some(if parts.len() == 2 {
            let ty = if ks.contains(&parts[1]) { codec::TYPE_NAME } else { "none" };
            Ok(Reply::Simple(ty.into()))
        } else {
            Err(ZsetError::WrongArity("type".into()))
        }),
        _ => None,
    };

    let mut effects = Vec::new();
    let result = match generic {
        Some(result) => {
            if cmd == "DEL" && matches!(result, Ok(Reply::Integer(n)) if n > 0) {
                effects.push(parts.to_vec());
            }
            result
        }
        // 3. 类型命令
        None => commands::call(ks, parts, &mut effects),
    };

    // 4. 错误统一映射为 "ERR ..."；即使出错，已经生效的部分仍保留效果命令
    let reply = match result {
        Ok(reply) => reply,
        Err(e) => {
            debug!(command = %cmd, code = e.code(), error = %e, "command failed");
            Reply::Error(format!("ERR {}", e))
        }
    };
    Response { reply, effects, quit: false }
}

/// 命令是否可能修改键空间
pub fn is_write_command(name: &[u8]) -> bool {
    if name.eq_ignore_ascii_case(b"DEL") {
        return true;
    }
    commands::lookup(name).is_some_and(|c| c.write)
}

fn del(parts: &[Vec<u8>], ks: &Keyspace) -> Result<Reply, ZsetError> {
    if parts.len() < 2 {
        return Err(ZsetError::WrongArity("del".into()));
    }
    let removed = parts[1..].iter().filter(|k| ks.remove(k)).count();
    Ok(Reply::Integer(removed as i64))
}

fn exists(parts: &[Vec<u8>], ks: &Keyspace) -> Result<Reply, ZsetError> {
    if parts.len() < 2 {
        return Err(ZsetError::WrongArity("exists".into()));
    }
    let n = parts[1..].iter().filter(|k| ks.contains(k)).count();
    Ok(Reply::Integer(n as i64))
}

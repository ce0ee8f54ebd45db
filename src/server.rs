// src/server.rs
//! 这是 tszset 服务的网络层：
//! - 监听 TCP 连接
//! - 解码请求（RESP Array / 内联文本）
//! - 调度到 engine 执行，写命令经持久化器记录 AOF
//! - 以 RESP2 回复
use anyhow::{Context, Result};
use std::io::ErrorKind;
use std::sync::Arc;

use tokio::{
    io::{AsyncReadExt, AsyncWriteExt},
    net::{TcpListener, TcpStream},
};
use tracing::{debug, error, info, warn};

use crate::engine::{self, Keyspace, Response};
use crate::persistence::Persistence;
use crate::protocol::{Reply, RequestParser};

/// 绑定地址并进入接受循环
pub async fn start(addr: &str, ks: Arc<Keyspace>, pers: Arc<Persistence>) -> Result<()> {
    let listener = TcpListener::bind(addr)
        .await
        .with_context(|| format!("Failed to bind {}", addr))?;
    info!(addr = %listener.local_addr()?, "tszset server listening");
    serve(listener, ks, pers).await
}

/// 核心循环：不断接受新连接，并为每个连接 spawn 一个异步任务
pub async fn serve(listener: TcpListener, ks: Arc<Keyspace>, pers: Arc<Persistence>) -> Result<()> {
    loop {
        let (stream, peer) = listener.accept().await?;
        debug!(%peer, "accepted connection");

        let ks = ks.clone();
        let pers = pers.clone();
        tokio::spawn(async move {
            if let Err(err) = handle_connection(stream, ks, pers).await {
                warn!(%peer, error = %err, "connection error");
            }
        });
    }
}

/// 单个连接的处理逻辑
/// - 把读到的字节攒进缓冲区，逐条解析出完整命令
/// - 调度执行并按顺序回复
/// - 协议错误时回复错误并关闭连接
async fn handle_connection(stream: TcpStream, ks: Arc<Keyspace>, pers: Arc<Persistence>) -> Result<()> {
    let peer = stream.peer_addr()?;
    let (mut reader, mut writer) = stream.into_split();
    let mut buf: Vec<u8> = Vec::with_capacity(4096);
    let mut chunk = [0u8; 4096];
    let mut parser = RequestParser::new();

    loop {
        // ----- 1) 处理缓冲区里所有完整的命令 -----
        let mut consumed = 0;
        loop {
            let args = match parser.parse(&buf[consumed..]) {
                Ok((parsed, used)) => {
                    consumed += used;
                    match parsed {
                        Some(args) => args,
                        None => break,
                    }
                }
                Err(e) => {
                    warn!(%peer, error = %e, "protocol error, closing connection");
                    let reply = Reply::Error(format!("ERR Protocol error: {}", e));
                    writer.write_all(&reply.encode()).await?;
                    return Ok(());
                }
            };
            // 空行直接跳过
            if args.is_empty() {
                continue;
            }

            let resp = dispatch(&args, &ks, &pers).await;
            writer.write_all(&resp.reply.encode()).await?;
            if resp.quit {
                debug!(%peer, "client quit");
                return Ok(());
            }
        }

        // 解析器已经接手的字节一次性移出缓冲区
        buf.drain(..consumed);

        // ----- 2) 继续读 -----
        match reader.read(&mut chunk).await {
            Ok(0) => {
                if parser.is_pending() || !buf.is_empty() {
                    debug!(%peer, "disconnected in the middle of a command");
                } else {
                    debug!(%peer, "disconnected");
                }
                return Ok(());
            }
            Ok(n) => buf.extend_from_slice(&chunk[..n]),
            // 客户端断开 or Windows 下的 RST(10054)
            Err(e) if e.kind() == ErrorKind::UnexpectedEof || e.kind() == ErrorKind::ConnectionReset => {
                debug!(%peer, "disconnected");
                return Ok(());
            }
            Err(e) => return Err(e.into()),
        }
    }
}

/// 执行一条命令：持久化命令在这里处理，写命令经持久化器记录，读命令直接执行
async fn dispatch(args: &[Vec<u8>], ks: &Arc<Keyspace>, pers: &Arc<Persistence>) -> Response {
    let name = args[0].as_slice();

    if name.eq_ignore_ascii_case(b"SAVE") {
        let (ks, pers) = (ks.clone(), pers.clone());
        let result = tokio::task::spawn_blocking(move || pers.snapshot(&ks)).await;
        let reply = match result {
            Ok(Ok(())) => Reply::ok(),
            Ok(Err(e)) => {
                error!(error = %e, "SAVE failed");
                Reply::Error(format!("ERR {}", e))
            }
            Err(e) => Reply::Error(format!("ERR {}", e)),
        };
        return plain(reply);
    }

    if name.eq_ignore_ascii_case(b"BGREWRITEAOF") {
        let (ks, pers) = (ks.clone(), pers.clone());
        tokio::task::spawn_blocking(move || {
            if let Err(e) = pers.rewrite_aof(&ks) {
                error!(error = %e, "AOF rewrite failed");
            }
        });
        return plain(Reply::Simple("Background append only file rewriting started".into()));
    }

    if engine::is_write_command(name) {
        return match pers.execute_logged(args, ks) {
            Ok(resp) => resp,
            Err(e) => {
                error!(error = %e, "write command not persisted");
                plain(Reply::Error(format!("ERR {:#}", e)))
            }
        };
    }

    engine::execute(args, ks)
}

fn plain(reply: Reply) -> Response {
    Response { reply, effects: Vec::new(), quit: false }
}

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tracing::{debug, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use gomoku_peer::console::run_console;
use gomoku_peer::{ChannelPrompt, DrawPrompt, Lobby, PeerConfig, SessionDriver, SessionError, SessionHandle};
use protocol::{TcpEndpoint, TcpTransport};

/// 五子棋点对点联机
#[derive(Parser, Debug)]
#[command(name = "gomoku-peer", version, about)]
struct Cli {
    /// 配置文件 (JSON)
    #[arg(long, global = true, env = "GOMOKU_PEER_CONFIG")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// 创建房间并等待对手
    Host {
        /// 昵称
        #[arg(short, long)]
        name: String,
        /// 监听地址，覆盖配置文件
        #[arg(long)]
        listen: Option<String>,
    },
    /// 用房间号加入对局
    Join {
        /// 昵称
        #[arg(short, long)]
        name: String,
        /// 6 位房间号
        room_code: String,
        /// 房主地址，覆盖配置文件
        #[arg(long)]
        host_addr: Option<String>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    // 初始化日志（输出到 stderr，不干扰控制台）
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .with(tracing_subscriber::EnvFilter::from_default_env()
            .add_directive("gomoku_peer=debug".parse()?))
        .init();

    let cli = Cli::parse();
    let mut config = PeerConfig::load(cli.config.as_deref());

    info!("五子棋联机启动中...");
    debug!(
        "signaling {}:{}{} (secure: {}), {} ice server(s)",
        config.signaling.host,
        config.signaling.port,
        config.signaling.path,
        config.signaling.secure,
        config.ice_servers.len()
    );

    let (prompt, questions) = ChannelPrompt::new(4);
    let prompt: Arc<dyn DrawPrompt> = Arc::new(prompt);

    let (driver, handle) = match cli.command {
        Command::Host { name, listen } => {
            if let Some(listen) = listen {
                config.tcp.listen_addr = listen;
            }
            let lobby = Lobby::new(TcpTransport::new(config.tcp.clone()), config);
            let (driver, handle) =
                with_retry(|| lobby.create_room(&name, Arc::clone(&prompt))).await?;
            println!(
                "房间已创建，房间号: {}（监听 {}）",
                handle.snapshot().room_code,
                driver.endpoint().local_addr().unwrap_or("?")
            );
            println!("等待对手加入...");
            (driver, handle)
        }
        Command::Join {
            name,
            room_code,
            host_addr,
        } => {
            if let Some(addr) = host_addr {
                config.tcp.host_addr = addr;
            }
            let lobby = Lobby::new(TcpTransport::new(config.tcp.clone()), config);
            with_retry(|| lobby.join_room(&name, &room_code, Arc::clone(&prompt))).await?
        }
    };

    let driver_task = driver.spawn();
    run_console(handle, questions).await?;
    driver_task.await.context("session driver panicked")?;

    info!("已退出");
    Ok(())
}

/// 连接失败时询问用户是否重试；不可重试的错误直接返回
async fn with_retry<F, Fut>(mut attempt: F) -> Result<(SessionDriver<TcpEndpoint>, SessionHandle)>
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = Result<(SessionDriver<TcpEndpoint>, SessionHandle), SessionError>>,
{
    loop {
        match attempt().await {
            Ok(session) => return Ok(session),
            Err(e) if e.is_retryable() => {
                let mut stderr = tokio::io::stderr();
                stderr
                    .write_all(format!("连接失败: {}。重试? [y/N] ", e).as_bytes())
                    .await?;
                stderr.flush().await?;
                let mut answer = String::new();
                BufReader::new(tokio::io::stdin()).read_line(&mut answer).await?;
                if !answer.trim().eq_ignore_ascii_case("y") {
                    return Err(e.into());
                }
            }
            Err(e) => return Err(e.into()),
        }
    }
}

//! 店铺聊天命令行客户端
//!
//! 加载配置，装配 REST 客户端与实时通道，提供会话列表、收发消息和实时监听命令。

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use config::ClientConfig;
use tracing_subscriber::EnvFilter;

mod commands;

/// 买家与店铺之间的实时聊天客户端
#[derive(Parser, Debug)]
#[command(name = "storefront-chat")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// YAML 配置文件（未指定时读取 CHAT_CONFIG_FILE）
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// 覆盖配置中的当前用户ID
    #[arg(long, global = true)]
    user_id: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// 列出会话（按最后消息时间倒序）
    Conversations,

    /// 显示未读总数
    Unread,

    /// 获取或创建与店铺的会话
    Start {
        /// 店铺ID
        store_id: String,
    },

    /// 打开会话并打印历史消息
    Open {
        /// 会话ID
        conversation_id: String,
    },

    /// 发送一条消息
    Send {
        /// 会话ID
        conversation_id: String,
        /// 消息正文
        #[arg(required = true, num_args = 1..)]
        text: Vec<String>,
    },

    /// 连接实时通道并持续打印新消息，Ctrl-C 退出
    Watch {
        /// 同时打开的会话
        conversation_id: Option<String>,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // 初始化日志
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();

    let mut config = match cli.config.as_deref() {
        Some(path) => ClientConfig::load_with_file(Some(path))?,
        None => ClientConfig::load()?,
    };
    if let Some(user_id) = cli.user_id {
        config.identity.user_id = user_id;
    }
    tracing::debug!(config = %config.sanitize(), "configuration loaded");

    let client = commands::build_client(&config)?;

    match cli.command {
        Commands::Conversations => commands::conversations(&client).await,
        Commands::Unread => commands::unread(&client).await,
        Commands::Start { store_id } => commands::start(&client, store_id.into()).await,
        Commands::Open { conversation_id } => commands::open(&client, conversation_id.into()).await,
        Commands::Send {
            conversation_id,
            text,
        } => commands::send(&client, conversation_id.into(), &text.join(" ")).await,
        Commands::Watch { conversation_id } => {
            commands::watch(&client, conversation_id.map(Into::into)).await
        }
    }
}

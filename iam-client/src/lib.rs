//! IAM 实时更新通道
//!
//! 每个登录用户一条 WebSocket 长连接，断线自动重连，按消息类型分发服务端推送的更新

mod error;
mod events;
pub mod modules;
mod state;

use anyhow::{Context, Result};
use std::path::PathBuf;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

pub use app_core::{RecentUpdate, TranscriptionStatus, UpdateMessage, TRANSCRIPTION_UPDATE};
pub use error::{AppError, ConfigError, ErrorCode, NetworkError, RecoveryStrategy};
pub use events::{ConnectionEvent, EventBus, ListenerId};
pub use modules::config::{ConfigManager, RealtimeConfig};
pub use modules::dispatch::{Subscription, SubscriptionId};
pub use modules::lifecycle::UserSession;
pub use modules::network::{
    ConnectionConfig, ConnectionManager, Connector, HeartbeatFrame, Link, LinkPeer,
    WebSocketConnector, WsMessage,
};
pub use modules::notification::{Notice, NotificationManager};
pub use state::{ConnectionState, ConnectionStatus};

/// 初始化日志，`RUST_LOG` 优先于 `default_filter`
pub fn init_logging(default_filter: &str) -> Result<()> {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(default_filter))
        .context("Invalid log filter")?;

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer())
        .try_init()
        .context("Logging already initialized")?;
    Ok(())
}

/// 命令行运行参数
#[derive(Debug, Clone, Default)]
pub struct RunOptions {
    pub user_id: String,
    pub endpoint: Option<String>,
    pub token: Option<String>,
    pub config_path: Option<PathBuf>,
    pub log_level: Option<String>,
}

/// 打开会话，记录收到的更新和通知，直到 Ctrl-C
pub async fn run(options: RunOptions) -> Result<()> {
    let config_manager = match &options.config_path {
        Some(path) => ConfigManager::from_file(path.clone()),
        None => ConfigManager::default(),
    };
    let mut config = config_manager
        .load()
        .with_context(|| format!("Failed to load {}", config_manager.path().display()))?;
    config.apply_env_overrides();
    if let Some(endpoint) = options.endpoint {
        config.server.endpoint = endpoint;
    }
    if let Some(token) = options.token {
        config.server.auth_token = Some(token);
    }
    if let Some(level) = options.log_level {
        config.logging.level = level;
    }

    init_logging(&config.logging.level)?;

    let session = UserSession::with_websocket(&options.user_id, &config)
        .context("Failed to start realtime session")?;
    let manager = session.manager();

    manager.on_message(TRANSCRIPTION_UPDATE, |message| {
        tracing::info!(
            "Transcription {} {}{}",
            message.transcription_id.as_deref().unwrap_or("?"),
            message.status.map(|s| s.to_string()).unwrap_or_default(),
            message
                .progress
                .map(|p| format!(" ({:.0}%)", p))
                .unwrap_or_default()
        );
        if let Some(error) = &message.error {
            tracing::warn!("Transcription error: {}", error);
        }
    });
    manager.on_connection_change(|connected| {
        tracing::debug!("Realtime channel connected: {}", connected);
    });
    manager.on_event(|event| {
        if let ConnectionEvent::ReconnectScheduled { attempt, delay_ms } = event {
            tracing::debug!("Reconnect attempt {} in {} ms", attempt, delay_ms);
        }
    });
    drop(manager);

    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for Ctrl-C")?;
    tracing::info!("Interrupted, logging out");
    session.logout().await;
    Ok(())
}

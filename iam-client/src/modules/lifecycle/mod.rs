//! 用户会话生命周期
//!
//! 登录后创建会话并建立实时通道，登出时断开并停止连接管理器。
//! 连接管理器由会话显式持有，通过 `manager()` 交给使用方，不存在全局单例。

use crate::error::{AppError, ConfigError};
use crate::modules::config::RealtimeConfig;
use crate::modules::network::{ConnectionConfig, ConnectionManager, Connector, WebSocketConnector};
use std::sync::Arc;

/// 已登录用户的实时会话
#[derive(Debug)]
pub struct UserSession {
    user_id: String,
    manager: Arc<ConnectionManager>,
}

impl UserSession {
    /// 启动会话并开始连接
    pub fn start(
        user_id: &str,
        config: &RealtimeConfig,
        connector: Arc<dyn Connector>,
    ) -> Result<Self, AppError> {
        validate_user_id(user_id)?;
        config.validate()?;

        let connection = ConnectionConfig::from_settings(user_id, config);
        tracing::info!(user_id = %user_id, "Starting realtime session at {}", connection.url);

        let manager = Arc::new(ConnectionManager::spawn(connection, connector));
        manager.connect();

        Ok(Self {
            user_id: user_id.to_string(),
            manager,
        })
    }

    /// 使用 WebSocket 连接器启动会话，令牌取自配置
    pub fn with_websocket(user_id: &str, config: &RealtimeConfig) -> Result<Self, AppError> {
        let mut connector = WebSocketConnector::new();
        if let Some(token) = &config.server.auth_token {
            connector = connector.with_auth_token(token.clone());
        }
        Self::start(user_id, config, Arc::new(connector))
    }

    pub fn user_id(&self) -> &str {
        &self.user_id
    }

    pub fn manager(&self) -> Arc<ConnectionManager> {
        self.manager.clone()
    }

    /// 登出：断开连接并停止连接管理器
    pub async fn logout(self) {
        tracing::info!(user_id = %self.user_id, "Ending realtime session");
        self.manager.disconnect();
        self.manager.shutdown().await;
    }
}

fn validate_user_id(user_id: &str) -> Result<(), ConfigError> {
    if user_id.trim().is_empty() {
        return Err(ConfigError::ValidationFailed("user id is empty".to_string()));
    }
    if user_id.contains('/') || user_id.chars().any(char::is_whitespace) {
        return Err(ConfigError::ValidationFailed(format!(
            "invalid user id: {:?}",
            user_id
        )));
    }
    Ok(())
}

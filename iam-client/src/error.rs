//! IAM 实时通道错误类型定义
//!
//! 所有模块的错误类型统一在此定义，使用 thiserror 自动派生 Error trait

use app_core::ParseError;
use std::time::Duration;
use thiserror::Error;

/// 应用统一错误类型
#[derive(Debug, Error)]
pub enum AppError {
    /// 网络相关错误
    #[error(transparent)]
    Network(#[from] NetworkError),

    /// 配置相关错误
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// 消息格式错误
    #[error(transparent)]
    Protocol(#[from] ParseError),
}

/// 错误代码（用于日志和界面显示）
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCode {
    // 网络错误 2xxx
    NetworkConnectFailed,
    NetworkTimeout,
    NetworkAuthFailed,
    NetworkLost,
    NetworkSendFailed,
    HeartbeatTimeout,
    RetriesExhausted,

    // 配置错误 4xxx
    ConfigLoadFailed,
    ConfigSaveFailed,
    ConfigValidationFailed,

    // 协议错误 5xxx
    MessageMalformed,
}

impl std::fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ErrorCode::NetworkConnectFailed => write!(f, "NETWORK_CONNECT_FAILED"),
            ErrorCode::NetworkTimeout => write!(f, "NETWORK_TIMEOUT"),
            ErrorCode::NetworkAuthFailed => write!(f, "NETWORK_AUTH_FAILED"),
            ErrorCode::NetworkLost => write!(f, "NETWORK_LOST"),
            ErrorCode::NetworkSendFailed => write!(f, "NETWORK_SEND_FAILED"),
            ErrorCode::HeartbeatTimeout => write!(f, "HEARTBEAT_TIMEOUT"),
            ErrorCode::RetriesExhausted => write!(f, "RETRIES_EXHAUSTED"),
            ErrorCode::ConfigLoadFailed => write!(f, "CONFIG_LOAD_FAILED"),
            ErrorCode::ConfigSaveFailed => write!(f, "CONFIG_SAVE_FAILED"),
            ErrorCode::ConfigValidationFailed => write!(f, "CONFIG_VALIDATION_FAILED"),
            ErrorCode::MessageMalformed => write!(f, "MESSAGE_MALFORMED"),
        }
    }
}

/// 网络相关错误
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum NetworkError {
    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    #[error("Connection timed out after {0:?}")]
    ConnectTimeout(Duration),

    #[error("Authentication failed - server rejected credentials")]
    AuthenticationFailed,

    #[error("Connection lost - disconnected from server")]
    ConnectionLost,

    #[error("Send failed: {0}")]
    SendFailed(String),

    #[error("Heartbeat timeout - {missed} pongs missed")]
    HeartbeatTimeout { missed: u32 },

    #[error("Gave up after {attempts} connection attempts")]
    RetriesExhausted { attempts: u32 },
}

/// 配置相关错误
#[derive(Debug, PartialEq, Eq, Error)]
pub enum ConfigError {
    #[error("Failed to load configuration: {0}")]
    LoadFailed(String),

    #[error("Failed to save configuration: {0}")]
    SaveFailed(String),

    #[error("Configuration validation failed: {0}")]
    ValidationFailed(String),

    #[error("Configuration file not found")]
    NotFound,
}

/// 错误的处理策略
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecoveryStrategy {
    /// 按退避策略自动重连
    Reconnect,
    /// 停止自动重试，等待用户手动重连
    ManualReconnect,
    /// 记录日志后丢弃
    Drop,
    /// 无法恢复，需要调用方处理
    Fatal,
}

impl AppError {
    /// 获取对应的错误代码
    pub fn code(&self) -> ErrorCode {
        match self {
            AppError::Network(e) => match e {
                NetworkError::ConnectionFailed(_) => ErrorCode::NetworkConnectFailed,
                NetworkError::ConnectTimeout(_) => ErrorCode::NetworkTimeout,
                NetworkError::AuthenticationFailed => ErrorCode::NetworkAuthFailed,
                NetworkError::ConnectionLost => ErrorCode::NetworkLost,
                NetworkError::SendFailed(_) => ErrorCode::NetworkSendFailed,
                NetworkError::HeartbeatTimeout { .. } => ErrorCode::HeartbeatTimeout,
                NetworkError::RetriesExhausted { .. } => ErrorCode::RetriesExhausted,
            },
            AppError::Config(e) => match e {
                ConfigError::LoadFailed(_) => ErrorCode::ConfigLoadFailed,
                ConfigError::SaveFailed(_) => ErrorCode::ConfigSaveFailed,
                ConfigError::ValidationFailed(_) => ErrorCode::ConfigValidationFailed,
                ConfigError::NotFound => ErrorCode::ConfigLoadFailed,
            },
            AppError::Protocol(_) => ErrorCode::MessageMalformed,
        }
    }

    /// 检查是否为可自动恢复的错误
    pub fn is_recoverable(&self) -> bool {
        self.recovery() == RecoveryStrategy::Reconnect
    }

    /// 获取处理策略
    pub fn recovery(&self) -> RecoveryStrategy {
        match self {
            AppError::Network(NetworkError::RetriesExhausted { .. }) => {
                RecoveryStrategy::ManualReconnect
            }
            AppError::Network(_) => RecoveryStrategy::Reconnect,
            AppError::Protocol(_) => RecoveryStrategy::Drop,
            AppError::Config(_) => RecoveryStrategy::Fatal,
        }
    }
}

//! 连接状态
//!
//! 状态机的状态定义，以及供诊断使用的状态快照

use arc_swap::ArcSwap;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::Arc;

/// 连接状态
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(tag = "state", content = "detail")]
pub enum ConnectionState {
    #[default]
    Disconnected,
    Connecting,
    Connected,
    Reconnecting { attempt: u32, max_attempts: u32 },
    Failed(String),
}

impl ConnectionState {
    /// 检查连接是否可用
    pub fn is_connected(&self) -> bool {
        matches!(self, ConnectionState::Connected)
    }

    /// 检查是否处于终止失败状态
    pub fn is_failed(&self) -> bool {
        matches!(self, ConnectionState::Failed(_))
    }

    /// 是否有连接或重连正在进行
    pub fn is_active(&self) -> bool {
        matches!(
            self,
            ConnectionState::Connecting
                | ConnectionState::Connected
                | ConnectionState::Reconnecting { .. }
        )
    }
}

impl std::fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConnectionState::Disconnected => write!(f, "Disconnected"),
            ConnectionState::Connecting => write!(f, "Connecting"),
            ConnectionState::Connected => write!(f, "Connected"),
            ConnectionState::Reconnecting { attempt, max_attempts } => {
                write!(f, "Reconnecting ({}/{})", attempt, max_attempts)
            }
            ConnectionState::Failed(msg) => write!(f, "Failed: {}", msg),
        }
    }
}

/// 连接状态快照
///
/// 只用于诊断和测试，不应据此做流程控制
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ConnectionStatus {
    pub user_id: String,
    pub state: ConnectionState,
    /// 当前连续失败次数
    pub attempt: u32,
    pub max_attempts: u32,
    pub connected_since: Option<DateTime<Utc>>,
    pub last_ping_at: Option<DateTime<Utc>>,
    pub last_pong_at: Option<DateTime<Utc>>,
    pub missed_pongs: u32,
}

impl ConnectionStatus {
    pub fn new(user_id: impl Into<String>, max_attempts: u32) -> Self {
        Self {
            user_id: user_id.into(),
            max_attempts,
            ..Default::default()
        }
    }

    pub fn is_connected(&self) -> bool {
        self.state.is_connected()
    }
}

/// 状态快照的发布单元
///
/// 只有连接驱动任务写入，其他线程随时读取
#[derive(Debug)]
pub struct StatusCell {
    inner: ArcSwap<ConnectionStatus>,
}

impl StatusCell {
    pub fn new(status: ConnectionStatus) -> Self {
        Self {
            inner: ArcSwap::from_pointee(status),
        }
    }

    pub fn load(&self) -> ConnectionStatus {
        (**self.inner.load()).clone()
    }

    pub fn state(&self) -> ConnectionState {
        self.inner.load().state.clone()
    }

    /// 修改并发布新的快照
    pub fn update<F>(&self, f: F)
    where
        F: FnOnce(&mut ConnectionStatus),
    {
        let mut next = self.load();
        f(&mut next);
        self.inner.store(Arc::new(next));
    }
}

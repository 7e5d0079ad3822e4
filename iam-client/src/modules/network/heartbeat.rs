//! 心跳检测
//!
//! 传输层的关闭事件并不总会触发 (例如网络分区)，只能靠 ping/pong 发现失效连接

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// ping 的发送方式
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HeartbeatFrame {
    /// WebSocket 协议层 ping 帧
    #[default]
    Protocol,
    /// 文本帧 `{"type":"ping"}`
    Json,
}

/// 每次心跳计时器触发后的判定
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HeartbeatVerdict {
    /// 发送下一个 ping；`missed` 为当前连续未回应次数
    SendPing { missed: u32 },
    /// 连续未回应次数达到阈值，连接视为失效
    Dead { missed: u32 },
}

/// 心跳状态
#[derive(Debug, Clone)]
pub struct HeartbeatMonitor {
    max_missed: u32,
    awaiting_pong: bool,
    missed: u32,
    last_ping_at: Option<DateTime<Utc>>,
    last_pong_at: Option<DateTime<Utc>>,
}

impl HeartbeatMonitor {
    pub fn new(max_missed: u32) -> Self {
        Self {
            max_missed: max_missed.max(1),
            awaiting_pong: false,
            missed: 0,
            last_ping_at: None,
            last_pong_at: None,
        }
    }

    /// 心跳计时器触发
    ///
    /// 上一个 ping 仍未回应则记一次丢失。
    pub fn on_tick(&mut self, now: DateTime<Utc>) -> HeartbeatVerdict {
        if self.awaiting_pong {
            self.missed += 1;
        }

        if self.missed >= self.max_missed {
            return HeartbeatVerdict::Dead {
                missed: self.missed,
            };
        }

        self.awaiting_pong = true;
        self.last_ping_at = Some(now);
        HeartbeatVerdict::SendPing {
            missed: self.missed,
        }
    }

    /// 收到 pong
    pub fn on_pong(&mut self, now: DateTime<Utc>) {
        self.awaiting_pong = false;
        self.missed = 0;
        self.last_pong_at = Some(now);
    }

    pub fn missed(&self) -> u32 {
        self.missed
    }

    pub fn is_awaiting_pong(&self) -> bool {
        self.awaiting_pong
    }

    pub fn last_ping_at(&self) -> Option<DateTime<Utc>> {
        self.last_ping_at
    }

    pub fn last_pong_at(&self) -> Option<DateTime<Utc>> {
        self.last_pong_at
    }
}

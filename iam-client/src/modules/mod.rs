//! IAM 实时通道核心模块
//!
//! 包含配置管理、消息分发、连接管理、通知和会话生命周期

pub mod config;
pub mod dispatch;
pub mod lifecycle;
pub mod network;
pub mod notification;

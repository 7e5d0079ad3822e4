//! 配置模块

pub mod manager;

pub use manager::{
    ConfigManager, HeartbeatSettings, LoggingSettings, RealtimeConfig, ReconnectSettings,
    ServerSettings, UpdateSettings,
};

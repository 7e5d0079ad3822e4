//! 配置管理器

use crate::error::ConfigError;
use crate::modules::network::heartbeat::HeartbeatFrame;
use app_core::BackoffPolicy;
use arc_swap::ArcSwap;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

const APP_DIR: &str = "iam";
const CONFIG_FILE: &str = "config.toml";

/// 覆盖服务端地址的环境变量
pub const ENV_ENDPOINT: &str = "IAM_WS_ENDPOINT";
/// 覆盖认证令牌的环境变量
pub const ENV_TOKEN: &str = "IAM_WS_TOKEN";

/// 服务端设置
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerSettings {
    /// WebSocket 基础地址，用户 ID 作为最后一段路径
    pub endpoint: String,
    pub auth_token: Option<String>,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            endpoint: "ws://localhost:8000/ws".to_string(),
            auth_token: None,
        }
    }
}

impl ServerSettings {
    /// 某个用户的连接地址
    pub fn endpoint_for(&self, user_id: &str) -> String {
        format!("{}/{}", self.endpoint.trim_end_matches('/'), user_id)
    }
}

/// 重连设置
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReconnectSettings {
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
    pub max_attempts: u32,
    pub connect_timeout_secs: u64,
}

impl Default for ReconnectSettings {
    fn default() -> Self {
        Self {
            base_delay_ms: 1000,
            max_delay_ms: 30_000,
            max_attempts: 10,
            connect_timeout_secs: 10,
        }
    }
}

impl ReconnectSettings {
    pub fn policy(&self) -> BackoffPolicy {
        BackoffPolicy::new(
            Duration::from_millis(self.base_delay_ms),
            Duration::from_millis(self.max_delay_ms),
            self.max_attempts,
        )
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }
}

/// 心跳设置
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HeartbeatSettings {
    pub interval_secs: u64,
    pub max_missed_pongs: u32,
    pub frame: HeartbeatFrame,
}

impl Default for HeartbeatSettings {
    fn default() -> Self {
        Self {
            interval_secs: 30,
            max_missed_pongs: 3,
            frame: HeartbeatFrame::default(),
        }
    }
}

impl HeartbeatSettings {
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs)
    }
}

/// 最近更新列表设置
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct UpdateSettings {
    pub recent_capacity: usize,
    pub display_secs: u64,
}

impl Default for UpdateSettings {
    fn default() -> Self {
        Self {
            recent_capacity: app_core::recent::DEFAULT_CAPACITY,
            display_secs: app_core::recent::DEFAULT_DISPLAY_SECS as u64,
        }
    }
}

/// 日志设置
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingSettings {
    /// `EnvFilter` 语法，`RUST_LOG` 优先
    pub level: String,
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
        }
    }
}

/// 实时通道配置
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct RealtimeConfig {
    pub server: ServerSettings,
    pub reconnect: ReconnectSettings,
    pub heartbeat: HeartbeatSettings,
    pub updates: UpdateSettings,
    pub logging: LoggingSettings,
}

impl RealtimeConfig {
    /// 校验配置
    pub fn validate(&self) -> Result<(), ConfigError> {
        let endpoint = self.server.endpoint.trim();
        if endpoint.is_empty() {
            return Err(ConfigError::ValidationFailed("server.endpoint is empty".to_string()));
        }
        if !(endpoint.starts_with("ws://") || endpoint.starts_with("wss://")) {
            return Err(ConfigError::ValidationFailed(format!(
                "server.endpoint must use ws:// or wss://, got {}",
                endpoint
            )));
        }
        if self.reconnect.base_delay_ms == 0 {
            return Err(ConfigError::ValidationFailed(
                "reconnect.base_delay_ms must be positive".to_string(),
            ));
        }
        if self.reconnect.base_delay_ms > self.reconnect.max_delay_ms {
            return Err(ConfigError::ValidationFailed(
                "reconnect.base_delay_ms exceeds reconnect.max_delay_ms".to_string(),
            ));
        }
        if self.reconnect.max_attempts == 0 {
            return Err(ConfigError::ValidationFailed(
                "reconnect.max_attempts must be positive".to_string(),
            ));
        }
        if self.reconnect.connect_timeout_secs == 0 {
            return Err(ConfigError::ValidationFailed(
                "reconnect.connect_timeout_secs must be positive".to_string(),
            ));
        }
        if self.heartbeat.interval_secs == 0 || self.heartbeat.max_missed_pongs == 0 {
            return Err(ConfigError::ValidationFailed(
                "heartbeat.interval_secs and heartbeat.max_missed_pongs must be positive"
                    .to_string(),
            ));
        }
        if self.updates.recent_capacity == 0 {
            return Err(ConfigError::ValidationFailed(
                "updates.recent_capacity must be positive".to_string(),
            ));
        }
        Ok(())
    }

    /// 应用环境变量覆盖
    pub fn apply_env_overrides(&mut self) {
        self.apply_overrides(|key| std::env::var(key).ok());
    }

    /// 按给定的查找函数应用覆盖
    pub fn apply_overrides<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(endpoint) = lookup(ENV_ENDPOINT).filter(|v| !v.trim().is_empty()) {
            tracing::debug!("Using endpoint from {}", ENV_ENDPOINT);
            self.server.endpoint = endpoint;
        }
        if let Some(token) = lookup(ENV_TOKEN).filter(|v| !v.is_empty()) {
            tracing::debug!("Using auth token from {}", ENV_TOKEN);
            self.server.auth_token = Some(token);
        }
    }
}

/// 配置管理器
#[derive(Debug)]
pub struct ConfigManager {
    config: ArcSwap<RealtimeConfig>,
    config_path: PathBuf,
}

impl Default for ConfigManager {
    fn default() -> Self {
        let config_dir = dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(APP_DIR);
        Self::new(config_dir)
    }
}

impl ConfigManager {
    pub fn new(config_dir: PathBuf) -> Self {
        Self::from_file(config_dir.join(CONFIG_FILE))
    }

    /// 使用指定的配置文件
    pub fn from_file(config_path: PathBuf) -> Self {
        let config = ArcSwap::from_pointee(RealtimeConfig::default());
        Self { config, config_path }
    }

    pub fn path(&self) -> &Path {
        &self.config_path
    }

    /// 加载配置，文件不存在时使用默认值
    pub fn load(&self) -> Result<RealtimeConfig, ConfigError> {
        if !self.config_path.exists() {
            tracing::debug!(
                "No config at {}, using defaults",
                self.config_path.display()
            );
            return Ok(self.current().as_ref().clone());
        }
        let content = std::fs::read_to_string(&self.config_path)
            .map_err(|e| ConfigError::LoadFailed(e.to_string()))?;
        let config: RealtimeConfig =
            toml::from_str(&content).map_err(|e| ConfigError::LoadFailed(e.to_string()))?;
        config.validate()?;
        self.config.store(Arc::new(config.clone()));
        Ok(config)
    }

    pub fn save(&self, config: &RealtimeConfig) -> Result<(), ConfigError> {
        config.validate()?;
        let content =
            toml::to_string(config).map_err(|e| ConfigError::SaveFailed(e.to_string()))?;
        if let Some(parent) = self.config_path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| ConfigError::SaveFailed(e.to_string()))?;
        }
        std::fs::write(&self.config_path, content)
            .map_err(|e| ConfigError::SaveFailed(e.to_string()))?;
        self.config.store(Arc::new(config.clone()));
        Ok(())
    }

    pub fn current(&self) -> Arc<RealtimeConfig> {
        self.config.load_full()
    }

    pub fn update<F>(&self, f: F) -> Result<(), ConfigError>
    where
        F: FnOnce(&mut RealtimeConfig),
    {
        let mut config = (*self.current()).clone();
        f(&mut config);
        self.save(&config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn test_default_config_is_valid() {
        let config = RealtimeConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.reconnect.max_attempts, 10);
        assert_eq!(config.heartbeat.interval(), Duration::from_secs(30));
        assert_eq!(config.reconnect.policy().delay(2), Duration::from_secs(2));
    }

    #[test]
    fn test_endpoint_for_user() {
        let mut server = ServerSettings::default();
        assert_eq!(server.endpoint_for("u-1"), "ws://localhost:8000/ws/u-1");
        server.endpoint = "wss://iam.example.com/ws/".to_string();
        assert_eq!(server.endpoint_for("u-1"), "wss://iam.example.com/ws/u-1");
    }

    #[test]
    fn test_validation_failures() {
        let mut config = RealtimeConfig::default();
        config.server.endpoint = "http://localhost".to_string();
        assert!(matches!(config.validate(), Err(ConfigError::ValidationFailed(_))));

        let mut config = RealtimeConfig::default();
        config.reconnect.base_delay_ms = 60_000;
        assert!(matches!(config.validate(), Err(ConfigError::ValidationFailed(_))));

        let mut config = RealtimeConfig::default();
        config.heartbeat.max_missed_pongs = 0;
        assert!(matches!(config.validate(), Err(ConfigError::ValidationFailed(_))));
    }

    #[test]
    fn test_partial_toml_uses_defaults() {
        let config: RealtimeConfig = toml::from_str(
            r#"
            [server]
            endpoint = "wss://iam.example.com/ws"

            [heartbeat]
            frame = "json"
            "#,
        )
        .unwrap();
        assert_eq!(config.server.endpoint, "wss://iam.example.com/ws");
        assert_eq!(config.heartbeat.frame, HeartbeatFrame::Json);
        assert_eq!(config.heartbeat.max_missed_pongs, 3);
        assert_eq!(config.reconnect, ReconnectSettings::default());
    }

    #[test]
    fn test_overrides() {
        let env: HashMap<&str, &str> = [(ENV_ENDPOINT, "wss://override/ws"), (ENV_TOKEN, "t0k")]
            .into_iter()
            .collect();
        let mut config = RealtimeConfig::default();
        config.apply_overrides(|key| env.get(key).map(|v| v.to_string()));
        assert_eq!(config.server.endpoint, "wss://override/ws");
        assert_eq!(config.server.auth_token.as_deref(), Some("t0k"));
    }

    #[test]
    fn test_load_missing_file_returns_defaults() {
        let temp_dir = tempfile::tempdir().unwrap();
        let manager = ConfigManager::new(temp_dir.path().to_path_buf());
        assert_eq!(manager.load().unwrap(), RealtimeConfig::default());
    }

    #[test]
    fn test_save_and_load() {
        let temp_dir = tempfile::tempdir().unwrap();
        let manager = ConfigManager::new(temp_dir.path().join("nested"));

        manager
            .update(|config| {
                config.reconnect.max_attempts = 5;
                config.server.auth_token = Some("secret".to_string());
            })
            .unwrap();
        assert!(manager.path().exists());

        let reloaded = ConfigManager::new(temp_dir.path().join("nested"));
        let config = reloaded.load().unwrap();
        assert_eq!(config.reconnect.max_attempts, 5);
        assert_eq!(config.server.auth_token.as_deref(), Some("secret"));
        assert_eq!(reloaded.current().reconnect.max_attempts, 5);
    }

    #[test]
    fn test_save_rejects_invalid_config() {
        let temp_dir = tempfile::tempdir().unwrap();
        let manager = ConfigManager::new(temp_dir.path().to_path_buf());
        let result = manager.update(|config| config.updates.recent_capacity = 0);
        assert!(matches!(result, Err(ConfigError::ValidationFailed(_))));
        assert!(!manager.path().exists());
    }

    #[test]
    fn test_load_invalid_toml() {
        let temp_dir = tempfile::tempdir().unwrap();
        let path = temp_dir.path().join("broken.toml");
        std::fs::write(&path, "server = [").unwrap();
        let manager = ConfigManager::from_file(path);
        assert!(matches!(manager.load(), Err(ConfigError::LoadFailed(_))));
    }
}

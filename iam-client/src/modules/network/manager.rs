//! 连接管理器
//!
//! 每个用户会话一个实例。状态机运行在单独的驱动任务中，它独占传输连接和所有计时器；
//! 公开接口只向驱动任务发送命令，或读取共享的订阅表和状态快照。

use crate::error::{AppError, NetworkError, RecoveryStrategy};
use crate::events::{ConnectionEvent, EventBus, ListenerId};
use crate::modules::config::RealtimeConfig;
use crate::modules::dispatch::{SubscriberRegistry, Subscription};
use crate::modules::network::heartbeat::{HeartbeatFrame, HeartbeatMonitor, HeartbeatVerdict};
use crate::modules::network::transport::{Connector, Link, WsMessage};
use crate::modules::notification::{Notice, NotificationManager};
use crate::state::{ConnectionState, ConnectionStatus, StatusCell};
use app_core::{parse_frame, BackoffPolicy, ControlFrame, InboundFrame, RecentUpdate, RecentUpdates, UpdateMessage};
use chrono::Utc;
use futures_util::FutureExt;
use parking_lot::Mutex;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};

/// 连接参数
#[derive(Debug, Clone)]
pub struct ConnectionConfig {
    pub user_id: String,
    /// 完整的连接地址
    pub url: String,
    pub backoff: BackoffPolicy,
    pub connect_timeout: Duration,
    pub heartbeat_interval: Duration,
    pub max_missed_pongs: u32,
    pub heartbeat_frame: HeartbeatFrame,
    pub recent_capacity: usize,
    pub display_for: chrono::Duration,
}

impl ConnectionConfig {
    pub fn new(user_id: impl Into<String>, url: impl Into<String>) -> Self {
        Self {
            user_id: user_id.into(),
            url: url.into(),
            backoff: BackoffPolicy::default(),
            connect_timeout: Duration::from_secs(10),
            heartbeat_interval: Duration::from_secs(30),
            max_missed_pongs: 3,
            heartbeat_frame: HeartbeatFrame::default(),
            recent_capacity: app_core::recent::DEFAULT_CAPACITY,
            display_for: chrono::Duration::seconds(app_core::recent::DEFAULT_DISPLAY_SECS),
        }
    }

    /// 修正会让计时器失效的取值
    fn normalized(mut self) -> Self {
        if self.heartbeat_interval.is_zero() {
            tracing::warn!(user_id = %self.user_id, "Heartbeat interval is zero, using 1ms");
            self.heartbeat_interval = Duration::from_millis(1);
        }
        self.max_missed_pongs = self.max_missed_pongs.max(1);
        self.backoff.max_attempts = self.backoff.max_attempts.max(1);
        self.recent_capacity = self.recent_capacity.max(1);
        self
    }

    /// 由配置文件的设置构建
    pub fn from_settings(user_id: &str, settings: &RealtimeConfig) -> Self {
        Self {
            user_id: user_id.to_string(),
            url: settings.server.endpoint_for(user_id),
            backoff: settings.reconnect.policy(),
            connect_timeout: settings.reconnect.connect_timeout(),
            heartbeat_interval: settings.heartbeat.interval(),
            max_missed_pongs: settings.heartbeat.max_missed_pongs,
            heartbeat_frame: settings.heartbeat.frame,
            recent_capacity: settings.updates.recent_capacity,
            display_for: chrono::Duration::seconds(
                settings.updates.display_secs.min(u64::from(u32::MAX)) as i64,
            ),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Command {
    Connect,
    Disconnect,
    Shutdown,
}

/// 驱动任务与公开句柄共享的部分
#[derive(Debug)]
struct Shared {
    registry: Arc<SubscriberRegistry>,
    events: EventBus,
    notifications: NotificationManager,
    status: StatusCell,
    recent: Mutex<RecentUpdates>,
}

/// 连接管理器
///
/// `spawn` 需要在 tokio 运行时内调用。丢弃管理器会停止驱动任务。
#[derive(Debug)]
pub struct ConnectionManager {
    user_id: String,
    commands: mpsc::UnboundedSender<Command>,
    shared: Arc<Shared>,
    driver: Mutex<Option<JoinHandle<()>>>,
}

impl ConnectionManager {
    /// 创建管理器并启动驱动任务，初始状态为 `Disconnected`
    pub fn spawn(config: ConnectionConfig, connector: Arc<dyn Connector>) -> Self {
        let config = config.normalized();
        let shared = Arc::new(Shared {
            registry: Arc::new(SubscriberRegistry::new()),
            events: EventBus::new(),
            notifications: NotificationManager::new(),
            status: StatusCell::new(ConnectionStatus::new(
                config.user_id.clone(),
                config.backoff.max_attempts,
            )),
            recent: Mutex::new(RecentUpdates::new(config.recent_capacity, config.display_for)),
        });
        let (commands, receiver) = mpsc::unbounded_channel();
        let user_id = config.user_id.clone();

        tracing::debug!(
            user_id = %user_id,
            "Starting connection driver for {} ({})",
            config.url,
            config.backoff
        );

        let driver = Driver {
            config,
            connector,
            shared: shared.clone(),
            commands: receiver,
            attempts: 0,
        };
        let guard = shared.clone();
        let driver_user = user_id.clone();
        let handle = tokio::spawn(async move {
            if AssertUnwindSafe(driver.run()).catch_unwind().await.is_err() {
                tracing::error!(user_id = %driver_user, "Connection driver panicked");
                guard.status.update(|status| {
                    status.state = ConnectionState::Failed("connection driver stopped".to_string());
                    status.connected_since = None;
                });
            }
        });

        Self {
            user_id,
            commands,
            shared,
            driver: Mutex::new(Some(handle)),
        }
    }

    pub fn user_id(&self) -> &str {
        &self.user_id
    }

    /// 开始连接
    ///
    /// 已连接或正在连接时无效果；重连等待中会立即发起连接；终止失败后重新开始计数。
    pub fn connect(&self) {
        self.send(Command::Connect);
    }

    /// 断开连接，取消所有等待中的重连和心跳
    pub fn disconnect(&self) {
        self.send(Command::Disconnect);
    }

    /// 停止驱动任务
    pub async fn shutdown(&self) {
        self.send(Command::Shutdown);
        let handle = self.driver.lock().take();
        if let Some(handle) = handle {
            if let Err(e) = handle.await {
                tracing::error!(user_id = %self.user_id, "Connection driver failed: {}", e);
            }
        }
    }

    fn send(&self, command: Command) {
        if self.commands.send(command).is_err() {
            tracing::warn!(
                user_id = %self.user_id,
                "Connection driver has stopped, ignoring {:?}",
                command
            );
        }
    }

    /// 订阅某个消息类型
    pub fn on_message<F>(&self, kind: impl Into<String>, handler: F) -> Subscription
    where
        F: Fn(&UpdateMessage) + Send + Sync + 'static,
    {
        self.shared.registry.subscribe(kind, handler)
    }

    /// 取消订阅，重复取消返回 false
    pub fn off_message(&self, subscription: &Subscription) -> bool {
        self.shared
            .registry
            .unsubscribe(subscription.kind(), subscription.id())
    }

    /// 每次状态迁移时以 `是否已连接` 调用
    pub fn on_connection_change<F>(&self, handler: F) -> ListenerId
    where
        F: Fn(bool) + Send + Sync + 'static,
    {
        self.shared.events.subscribe(move |event| {
            if let ConnectionEvent::StateChanged { new_state, .. } = event {
                handler(new_state.is_connected());
            }
        })
    }

    /// 订阅完整的连接事件
    pub fn on_event<F>(&self, handler: F) -> ListenerId
    where
        F: Fn(&ConnectionEvent) + Send + Sync + 'static,
    {
        self.shared.events.subscribe(handler)
    }

    /// 取消 `on_connection_change` 或 `on_event` 注册的监听器
    pub fn off_event(&self, id: ListenerId) -> bool {
        self.shared.events.unsubscribe(id)
    }

    /// 订阅面向用户的通知
    pub fn on_notice<F>(&self, handler: F) -> ListenerId
    where
        F: Fn(&Notice) + Send + Sync + 'static,
    {
        self.shared.notifications.subscribe(handler)
    }

    pub fn off_notice(&self, id: ListenerId) -> bool {
        self.shared.notifications.unsubscribe(id)
    }

    pub fn notifications(&self) -> &NotificationManager {
        &self.shared.notifications
    }

    /// 当前状态快照
    pub fn connection_status(&self) -> ConnectionStatus {
        self.shared.status.load()
    }

    pub fn state(&self) -> ConnectionState {
        self.shared.status.state()
    }

    pub fn is_connected(&self) -> bool {
        self.state().is_connected()
    }

    /// 仍在展示时间窗内的最近更新，从旧到新
    pub fn recent_updates(&self) -> Vec<RecentUpdate> {
        let mut recent = self.shared.recent.lock();
        recent.prune_expired(Utc::now());
        recent.snapshot()
    }

    /// 关闭某个转写任务的更新
    pub fn dismiss_update(&self, transcription_id: &str) -> bool {
        self.shared.recent.lock().dismiss(transcription_id)
    }
}

enum Phase {
    Idle,
    Connecting,
    Connected(Link),
    Reconnecting(Duration),
    Exit,
}

/// 驱动任务
struct Driver {
    config: ConnectionConfig,
    connector: Arc<dyn Connector>,
    shared: Arc<Shared>,
    commands: mpsc::UnboundedReceiver<Command>,
    /// 连续失败次数
    attempts: u32,
}

impl Driver {
    async fn run(mut self) {
        let mut phase = Phase::Idle;
        loop {
            phase = match phase {
                Phase::Idle => self.idle().await,
                Phase::Connecting => self.connecting().await,
                Phase::Connected(link) => self.connected(link).await,
                Phase::Reconnecting(delay) => self.reconnecting(delay).await,
                Phase::Exit => break,
            };
        }

        self.attempts = 0;
        self.shared.status.update(|status| {
            status.attempt = 0;
            status.connected_since = None;
        });
        self.transition(ConnectionState::Disconnected);
        tracing::debug!(user_id = %self.config.user_id, "Connection driver stopped");
    }

    /// `Disconnected` 或 `Failed`：只等待命令
    async fn idle(&mut self) -> Phase {
        match self.commands.recv().await {
            Some(Command::Connect) => {
                self.attempts = 0;
                self.shared.notifications.reset_terminal();
                Phase::Connecting
            }
            Some(Command::Disconnect) => {
                self.enter_disconnected();
                Phase::Idle
            }
            Some(Command::Shutdown) | None => Phase::Exit,
        }
    }

    async fn connecting(&mut self) -> Phase {
        self.transition(ConnectionState::Connecting);
        tracing::info!(
            user_id = %self.config.user_id,
            "Connecting to {} (attempt {})",
            self.config.url,
            self.attempts + 1
        );

        let timeout = self.config.connect_timeout;
        let attempt = tokio::time::timeout(timeout, self.connector.connect(&self.config.url));
        tokio::pin!(attempt);

        loop {
            tokio::select! {
                command = self.commands.recv() => match command {
                    Some(Command::Connect) => continue,
                    Some(Command::Disconnect) => {
                        self.enter_disconnected();
                        return Phase::Idle;
                    }
                    Some(Command::Shutdown) | None => return Phase::Exit,
                },
                result = &mut attempt => {
                    return match result {
                        Ok(Ok(link)) => self.on_open(link),
                        Ok(Err(e)) => self.on_failure(e),
                        Err(_) => self.on_failure(NetworkError::ConnectTimeout(timeout)),
                    };
                }
            }
        }
    }

    async fn reconnecting(&mut self, delay: Duration) -> Phase {
        let wait = tokio::time::sleep(delay);
        tokio::pin!(wait);

        tokio::select! {
            command = self.commands.recv() => match command {
                Some(Command::Connect) => {
                    tracing::debug!(user_id = %self.config.user_id, "Manual connect, skipping backoff");
                    Phase::Connecting
                }
                Some(Command::Disconnect) => {
                    self.enter_disconnected();
                    Phase::Idle
                }
                Some(Command::Shutdown) | None => Phase::Exit,
            },
            _ = &mut wait => Phase::Connecting,
        }
    }

    async fn connected(&mut self, mut link: Link) -> Phase {
        let interval = self.config.heartbeat_interval;
        let mut ticker = tokio::time::interval_at(Instant::now() + interval, interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut heartbeat = HeartbeatMonitor::new(self.config.max_missed_pongs);

        loop {
            tokio::select! {
                command = self.commands.recv() => match command {
                    Some(Command::Connect) => {}
                    Some(Command::Disconnect) => {
                        link.close();
                        self.enter_disconnected();
                        return Phase::Idle;
                    }
                    Some(Command::Shutdown) | None => {
                        link.close();
                        return Phase::Exit;
                    }
                },
                _ = ticker.tick() => {
                    if self.attempts > 0 {
                        tracing::debug!(user_id = %self.config.user_id, "Connection stable, resetting backoff");
                        self.attempts = 0;
                    }
                    let verdict = heartbeat.on_tick(Utc::now());
                    let missed = match verdict {
                        HeartbeatVerdict::SendPing { missed } | HeartbeatVerdict::Dead { missed } => missed,
                    };
                    if missed > 0 {
                        tracing::debug!(user_id = %self.config.user_id, "Heartbeat missed ({}/{})", missed, self.config.max_missed_pongs);
                        self.shared.events.emit(&ConnectionEvent::HeartbeatMissed { missed });
                    }
                    self.shared.status.update(|status| status.missed_pongs = missed);

                    if let HeartbeatVerdict::Dead { missed } = verdict {
                        tracing::warn!(user_id = %self.config.user_id, "No pong after {} heartbeats, dropping connection", missed);
                        link.close();
                        return self.on_failure(NetworkError::HeartbeatTimeout { missed });
                    }

                    let ping = match self.config.heartbeat_frame {
                        HeartbeatFrame::Protocol => WsMessage::Ping(Vec::new()),
                        HeartbeatFrame::Json => WsMessage::Text(ControlFrame::Ping.to_json()),
                    };
                    if let Err(e) = self.send_control(&link, ping) {
                        return self.on_failure(e);
                    }
                    let sent_at = heartbeat.last_ping_at();
                    self.shared.status.update(|status| status.last_ping_at = sent_at);
                }
                frame = link.recv() => {
                    let result = match frame {
                        Some(WsMessage::Text(text)) => self.handle_text(&link, &text, &mut heartbeat),
                        Some(WsMessage::Binary(bytes)) => match String::from_utf8(bytes) {
                            Ok(text) => self.handle_text(&link, &text, &mut heartbeat),
                            Err(_) => {
                                self.drop_message("binary frame is not valid UTF-8".to_string());
                                Ok(())
                            }
                        },
                        Some(WsMessage::Pong(_)) => {
                            self.record_pong(&mut heartbeat);
                            Ok(())
                        }
                        Some(WsMessage::Ping(_)) => Ok(()),
                        Some(WsMessage::Close) | None => Err(NetworkError::ConnectionLost),
                    };
                    if let Err(e) = result {
                        drop(link);
                        return self.on_failure(e);
                    }
                }
            }
        }
    }

    fn handle_text(
        &self,
        link: &Link,
        text: &str,
        heartbeat: &mut HeartbeatMonitor,
    ) -> Result<(), NetworkError> {
        match parse_frame(text) {
            Ok(InboundFrame::Pong) => self.record_pong(heartbeat),
            Ok(InboundFrame::Ping) => {
                self.send_control(link, WsMessage::Text(ControlFrame::Pong.to_json()))?;
            }
            Ok(InboundFrame::Update(message)) => self.deliver(message),
            Err(e) => self.drop_message(e.to_string()),
        }
        Ok(())
    }

    fn deliver(&self, message: UpdateMessage) {
        if message.is_transcription_update() {
            tracing::debug!(
                user_id = %self.config.user_id,
                "Transcription {} is {}",
                message.transcription_id.as_deref().unwrap_or_default(),
                message.status.map(|s| s.to_string()).unwrap_or_default()
            );
            self.shared.recent.lock().record(message.clone(), Utc::now());
        }

        self.shared.registry.dispatch(&message);
    }

    fn drop_message(&self, reason: String) {
        tracing::warn!(user_id = %self.config.user_id, "Dropping malformed message: {}", reason);
        self.shared
            .events
            .emit(&ConnectionEvent::MessageDropped { reason });
    }

    fn record_pong(&self, heartbeat: &mut HeartbeatMonitor) {
        heartbeat.on_pong(Utc::now());
        let received_at = heartbeat.last_pong_at();
        self.shared.status.update(|status| {
            status.last_pong_at = received_at;
            status.missed_pongs = 0;
        });
    }

    /// 发送控制帧；缓冲已满只记录日志，连接已关闭则返回错误
    fn send_control(&self, link: &Link, message: WsMessage) -> Result<(), NetworkError> {
        match link.try_send(message) {
            Ok(()) => Ok(()),
            Err(NetworkError::ConnectionLost) => Err(NetworkError::ConnectionLost),
            Err(e) => {
                tracing::warn!(user_id = %self.config.user_id, "Control frame not sent: {}", e);
                Ok(())
            }
        }
    }

    /// 连接建立；失败计数保留到连接稳定之后才清零
    fn on_open(&mut self, link: Link) -> Phase {
        let now = Utc::now();
        self.shared.status.update(|status| {
            status.attempt = 0;
            status.connected_since = Some(now);
            status.missed_pongs = 0;
            status.last_ping_at = None;
            status.last_pong_at = None;
        });
        self.transition(ConnectionState::Connected);
        self.shared.notifications.notify_connected();
        Phase::Connected(link)
    }

    fn on_failure(&mut self, error: NetworkError) -> Phase {
        self.attempts = self.attempts.saturating_add(1);
        let attempt = self.attempts;
        let max_attempts = self.config.backoff.max_attempts;
        self.shared.status.update(|status| {
            status.attempt = attempt;
            status.connected_since = None;
        });

        let recovery = AppError::from(error.clone()).recovery();
        if recovery != RecoveryStrategy::Reconnect || self.config.backoff.is_exhausted(attempt) {
            let reason = error.to_string();
            tracing::error!(
                user_id = %self.config.user_id,
                "{}, last error: {}",
                NetworkError::RetriesExhausted { attempts: attempt },
                reason
            );
            self.transition(ConnectionState::Failed(reason.clone()));
            self.shared.events.emit(&ConnectionEvent::TerminalFailure {
                attempts: attempt,
                reason: reason.clone(),
            });
            self.shared
                .notifications
                .notify_terminal_failure(attempt, &reason);
            return Phase::Idle;
        }

        let delay = self.config.backoff.delay(attempt);
        tracing::warn!(
            user_id = %self.config.user_id,
            "Connection attempt {}/{} failed: {}, retrying in {:?}",
            attempt,
            max_attempts,
            error,
            delay
        );
        self.transition(ConnectionState::Reconnecting {
            attempt,
            max_attempts,
        });
        self.shared.events.emit(&ConnectionEvent::ReconnectScheduled {
            attempt,
            delay_ms: u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
        });
        Phase::Reconnecting(delay)
    }

    fn enter_disconnected(&mut self) {
        self.attempts = 0;
        self.shared.status.update(|status| {
            status.attempt = 0;
            status.connected_since = None;
            status.missed_pongs = 0;
        });
        self.transition(ConnectionState::Disconnected);
    }

    /// 发布状态迁移，状态未变时无操作
    fn transition(&self, next: ConnectionState) {
        let previous = self.shared.status.state();
        if previous == next {
            return;
        }

        self.shared.status.update(|status| status.state = next.clone());
        tracing::info!(
            user_id = %self.config.user_id,
            "Connection state: {} -> {}",
            previous,
            next
        );

        if previous.is_connected() && matches!(next, ConnectionState::Reconnecting { .. }) {
            self.shared.notifications.notify_offline();
        }

        self.shared.events.emit(&ConnectionEvent::StateChanged {
            old_state: previous,
            new_state: next,
        });
    }
}

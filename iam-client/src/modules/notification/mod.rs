//! 通知模块
//!
//! 面向用户的连接提示：在线/离线指示，以及重试用尽后的一次性终止提示

use crate::events::ListenerId;
use parking_lot::Mutex;
use serde::Serialize;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

const APP_TITLE: &str = "IAM";

/// 通知类型
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind")]
pub enum Notice {
    /// 实时通道已连接
    Connected,
    /// 实时通道断开，正在后台重连
    Offline,
    /// 重试用尽，需要用户手动刷新或重连
    TerminalFailure { attempts: u32, reason: String },
}

impl Notice {
    pub fn title(&self) -> String {
        match self {
            Notice::TerminalFailure { .. } => format!("{} - Connection lost", APP_TITLE),
            _ => APP_TITLE.to_string(),
        }
    }

    pub fn body(&self) -> String {
        match self {
            Notice::Connected => "Live updates connected".to_string(),
            Notice::Offline => "Offline - reconnecting...".to_string(),
            Notice::TerminalFailure { attempts, reason } => format!(
                "Live updates stopped after {} failed attempts ({}). Refresh the page or reconnect manually.",
                attempts, reason
            ),
        }
    }
}

type Sink = Arc<dyn Fn(&Notice) + Send + Sync>;

/// 通知管理器
pub struct NotificationManager {
    enabled: AtomicBool,
    terminal_reported: AtomicBool,
    next_id: AtomicU64,
    sinks: Mutex<Vec<(ListenerId, Sink)>>,
}

impl std::fmt::Debug for NotificationManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NotificationManager")
            .field("enabled", &self.is_enabled())
            .field("sinks", &self.sinks.lock().len())
            .finish()
    }
}

impl Default for NotificationManager {
    fn default() -> Self {
        Self::new()
    }
}

impl NotificationManager {
    pub fn new() -> Self {
        Self {
            enabled: AtomicBool::new(true),
            terminal_reported: AtomicBool::new(false),
            next_id: AtomicU64::new(1),
            sinks: Mutex::new(Vec::new()),
        }
    }

    /// 检查通知是否启用
    pub fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::SeqCst)
    }

    /// 启用/禁用通知
    pub fn set_enabled(&self, enabled: bool) {
        self.enabled.store(enabled, Ordering::SeqCst);
    }

    /// 注册通知接收方
    pub fn subscribe<F>(&self, sink: F) -> ListenerId
    where
        F: Fn(&Notice) + Send + Sync + 'static,
    {
        let id = ListenerId::new(self.next_id.fetch_add(1, Ordering::Relaxed));
        self.sinks.lock().push((id, Arc::new(sink)));
        id
    }

    pub fn unsubscribe(&self, id: ListenerId) -> bool {
        let mut sinks = self.sinks.lock();
        let before = sinks.len();
        sinks.retain(|(existing, _)| *existing != id);
        sinks.len() != before
    }

    /// 发送连接建立通知
    pub fn notify_connected(&self) {
        self.terminal_reported.store(false, Ordering::SeqCst);
        self.notify(Notice::Connected);
    }

    /// 发送离线通知
    pub fn notify_offline(&self) {
        self.notify(Notice::Offline);
    }

    /// 发送终止失败通知
    ///
    /// 直到下一次成功连接或手动重连之前只发送一次，重复调用返回 false
    pub fn notify_terminal_failure(&self, attempts: u32, reason: &str) -> bool {
        if self.terminal_reported.swap(true, Ordering::SeqCst) {
            return false;
        }
        self.notify(Notice::TerminalFailure {
            attempts,
            reason: reason.to_string(),
        });
        true
    }

    /// 手动重连时重置终止通知标记
    pub fn reset_terminal(&self) {
        self.terminal_reported.store(false, Ordering::SeqCst);
    }

    /// 通用通知
    pub fn notify(&self, notice: Notice) {
        match &notice {
            Notice::Connected => tracing::info!("{}: {}", notice.title(), notice.body()),
            Notice::Offline => tracing::warn!("{}: {}", notice.title(), notice.body()),
            Notice::TerminalFailure { .. } => {
                tracing::error!("{}: {}", notice.title(), notice.body())
            }
        }

        if !self.is_enabled() {
            return;
        }

        let sinks: Vec<Sink> = self.sinks.lock().iter().map(|(_, sink)| sink.clone()).collect();
        for sink in sinks {
            if catch_unwind(AssertUnwindSafe(|| sink(&notice))).is_err() {
                tracing::error!("Notice sink panicked on {:?}", notice);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn collecting(manager: &NotificationManager) -> Arc<Mutex<Vec<Notice>>> {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        manager.subscribe(move |notice| sink.lock().push(notice.clone()));
        seen
    }

    #[test]
    fn test_notification_manager_toggle() {
        let manager = NotificationManager::new();
        assert!(manager.is_enabled());

        manager.set_enabled(false);
        assert!(!manager.is_enabled());

        manager.set_enabled(true);
        assert!(manager.is_enabled());
    }

    #[test]
    fn test_disabled_manager_skips_sinks() {
        let manager = NotificationManager::new();
        let seen = collecting(&manager);
        manager.set_enabled(false);
        manager.notify_offline();
        assert!(seen.lock().is_empty());
    }

    #[test]
    fn test_terminal_failure_is_reported_once() {
        let manager = NotificationManager::new();
        let seen = collecting(&manager);

        assert!(manager.notify_terminal_failure(10, "refused"));
        assert!(!manager.notify_terminal_failure(10, "refused"));
        assert_eq!(seen.lock().len(), 1);

        manager.reset_terminal();
        assert!(manager.notify_terminal_failure(10, "refused"));
        assert_eq!(seen.lock().len(), 2);
    }

    #[test]
    fn test_connected_rearms_terminal_notice() {
        let manager = NotificationManager::new();
        let seen = collecting(&manager);

        manager.notify_terminal_failure(3, "timeout");
        manager.notify_connected();
        manager.notify_terminal_failure(3, "timeout");

        let kinds: Vec<_> = seen.lock().clone();
        assert_eq!(kinds.len(), 3);
        assert_eq!(kinds[1], Notice::Connected);
    }

    #[test]
    fn test_notice_text() {
        let notice = Notice::TerminalFailure {
            attempts: 10,
            reason: "Connection lost".to_string(),
        };
        assert!(notice.title().contains("Connection lost"));
        assert!(notice.body().contains("reconnect manually"));
        assert_eq!(Notice::Offline.title(), "IAM");
    }

    #[test]
    fn test_panicking_sink_does_not_block_others() {
        let manager = NotificationManager::new();
        manager.subscribe(|_| panic!("sink failure"));
        let seen = collecting(&manager);

        manager.notify_connected();
        manager.notify_offline();
        assert_eq!(seen.lock().clone(), vec![Notice::Connected, Notice::Offline]);
    }

    #[test]
    fn test_unsubscribe_sink() {
        let manager = NotificationManager::new();
        let id = manager.subscribe(|_| {});
        assert!(manager.unsubscribe(id));
        assert!(!manager.unsubscribe(id));
    }
}

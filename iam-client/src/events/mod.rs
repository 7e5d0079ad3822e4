//! 事件模块
//!
//! 定义连接事件，以及事件监听器的注册与分发

use crate::state::ConnectionState;
use parking_lot::Mutex;
use serde::Serialize;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// 连接事件
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "event_type")]
pub enum ConnectionEvent {
    /// 状态迁移
    StateChanged {
        old_state: ConnectionState,
        new_state: ConnectionState,
    },
    /// 已安排重连
    ReconnectScheduled { attempt: u32, delay_ms: u64 },
    /// 心跳未收到回应
    HeartbeatMissed { missed: u32 },
    /// 重试次数用尽
    TerminalFailure { attempts: u32, reason: String },
    /// 丢弃了一条无法解析的消息
    MessageDropped { reason: String },
}

impl ConnectionEvent {
    pub fn name(&self) -> &'static str {
        match self {
            ConnectionEvent::StateChanged { .. } => "state_changed",
            ConnectionEvent::ReconnectScheduled { .. } => "reconnect_scheduled",
            ConnectionEvent::HeartbeatMissed { .. } => "heartbeat_missed",
            ConnectionEvent::TerminalFailure { .. } => "terminal_failure",
            ConnectionEvent::MessageDropped { .. } => "message_dropped",
        }
    }
}

/// 监听器标识
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerId(u64);

impl ListenerId {
    pub(crate) fn new(id: u64) -> Self {
        Self(id)
    }
}

type Listener = Arc<dyn Fn(&ConnectionEvent) + Send + Sync>;

/// 事件总线
pub struct EventBus {
    next_id: AtomicU64,
    listeners: Mutex<Vec<(ListenerId, Listener)>>,
}

impl std::fmt::Debug for EventBus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventBus")
            .field("listeners", &self.listeners.lock().len())
            .finish()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

impl EventBus {
    pub fn new() -> Self {
        Self {
            next_id: AtomicU64::new(1),
            listeners: Mutex::new(Vec::new()),
        }
    }

    /// 注册监听器
    pub fn subscribe<F>(&self, listener: F) -> ListenerId
    where
        F: Fn(&ConnectionEvent) + Send + Sync + 'static,
    {
        let id = ListenerId::new(self.next_id.fetch_add(1, Ordering::Relaxed));
        self.listeners.lock().push((id, Arc::new(listener)));
        id
    }

    /// 移除监听器，重复移除返回 false
    pub fn unsubscribe(&self, id: ListenerId) -> bool {
        let mut listeners = self.listeners.lock();
        let before = listeners.len();
        listeners.retain(|(existing, _)| *existing != id);
        listeners.len() != before
    }

    /// 分发事件
    ///
    /// 在快照上调用，监听器内部可以安全地注册或移除监听器
    pub fn emit(&self, event: &ConnectionEvent) {
        let snapshot: Vec<Listener> = self
            .listeners
            .lock()
            .iter()
            .map(|(_, listener)| listener.clone())
            .collect();

        tracing::trace!("Emitting connection event: {}", event.name());

        for listener in snapshot {
            if catch_unwind(AssertUnwindSafe(|| listener(event))).is_err() {
                tracing::error!("Connection event listener panicked on {}", event.name());
            }
        }
    }

    pub fn len(&self) -> usize {
        self.listeners.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.listeners.lock().is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    #[test]
    fn test_connection_event_serialization() {
        let event = ConnectionEvent::ReconnectScheduled {
            attempt: 2,
            delay_ms: 2000,
        };
        let parsed = serde_json::to_value(&event).unwrap();
        assert_eq!(parsed["event_type"], "ReconnectScheduled");
        assert_eq!(parsed["delay_ms"], 2000);
        assert_eq!(event.name(), "reconnect_scheduled");
    }

    #[test]
    fn test_event_bus_delivers_to_all_listeners() {
        let bus = EventBus::new();
        let count = Arc::new(AtomicUsize::new(0));

        for _ in 0..2 {
            let count = count.clone();
            bus.subscribe(move |_| {
                count.fetch_add(1, Ordering::SeqCst);
            });
        }

        bus.emit(&ConnectionEvent::HeartbeatMissed { missed: 1 });
        assert_eq!(count.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_event_bus_unsubscribe_is_idempotent() {
        let bus = EventBus::new();
        let id = bus.subscribe(|_| {});
        assert_eq!(bus.len(), 1);
        assert!(bus.unsubscribe(id));
        assert!(!bus.unsubscribe(id));
        assert!(bus.is_empty());
    }

    #[test]
    fn test_event_bus_isolates_panicking_listener() {
        let bus = EventBus::new();
        let reached = Arc::new(AtomicUsize::new(0));

        bus.subscribe(|_| panic!("listener failure"));
        let reached_clone = reached.clone();
        bus.subscribe(move |_| {
            reached_clone.fetch_add(1, Ordering::SeqCst);
        });

        bus.emit(&ConnectionEvent::MessageDropped {
            reason: "bad json".to_string(),
        });
        assert_eq!(reached.load(Ordering::SeqCst), 1);
    }
}

//! 消息分发模块
//!
//! 按消息类型精确匹配的订阅表。同一类型可以有多个订阅者，按注册顺序调用。

use app_core::UpdateMessage;
use dashmap::DashMap;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};

/// 订阅标识
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SubscriptionId(u64);

/// 消息处理函数
pub type MessageHandler = Arc<dyn Fn(&UpdateMessage) + Send + Sync>;

/// 订阅表
pub struct SubscriberRegistry {
    next_id: AtomicU64,
    handlers: DashMap<String, Vec<(SubscriptionId, MessageHandler)>>,
}

impl std::fmt::Debug for SubscriberRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SubscriberRegistry")
            .field("types", &self.handlers.len())
            .finish()
    }
}

impl Default for SubscriberRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl SubscriberRegistry {
    pub fn new() -> Self {
        Self {
            next_id: AtomicU64::new(1),
            handlers: DashMap::new(),
        }
    }

    /// 注册订阅者
    pub fn subscribe<F>(self: &Arc<Self>, kind: impl Into<String>, handler: F) -> Subscription
    where
        F: Fn(&UpdateMessage) + Send + Sync + 'static,
    {
        let kind = kind.into();
        let id = SubscriptionId(self.next_id.fetch_add(1, Ordering::Relaxed));
        self.handlers
            .entry(kind.clone())
            .or_default()
            .push((id, Arc::new(handler)));

        tracing::debug!("Subscribed {:?} to message type {}", id, kind);

        Subscription {
            kind,
            id,
            registry: Arc::downgrade(self),
        }
    }

    /// 移除订阅者，重复移除返回 false
    pub fn unsubscribe(&self, kind: &str, id: SubscriptionId) -> bool {
        let removed = match self.handlers.get_mut(kind) {
            Some(mut entries) => {
                let before = entries.len();
                entries.retain(|(existing, _)| *existing != id);
                entries.len() != before
            }
            None => false,
        };
        self.handlers.remove_if(kind, |_, entries| entries.is_empty());
        removed
    }

    /// 把消息分发给该类型的所有订阅者，返回调用的订阅者数量
    ///
    /// 先复制订阅列表再调用，处理函数在分发过程中增删订阅不影响本条消息。
    /// 单个处理函数 panic 会被记录并跳过。
    pub fn dispatch(&self, message: &UpdateMessage) -> usize {
        let snapshot: Vec<(SubscriptionId, MessageHandler)> = match self.handlers.get(&message.kind) {
            Some(entries) => entries.clone(),
            None => {
                tracing::trace!("No subscribers for message type {}", message.kind);
                return 0;
            }
        };

        for (id, handler) in &snapshot {
            if catch_unwind(AssertUnwindSafe(|| handler(message))).is_err() {
                tracing::error!(
                    "Handler {:?} panicked while handling {} message",
                    id,
                    message.kind
                );
            }
        }
        snapshot.len()
    }

    /// 某类型当前的订阅者数量
    pub fn handler_count(&self, kind: &str) -> usize {
        self.handlers.get(kind).map_or(0, |entries| entries.len())
    }
}

/// 一次订阅
///
/// 调用 `unsubscribe` 显式取消；丢弃句柄不会取消订阅。
#[derive(Debug, Clone)]
pub struct Subscription {
    kind: String,
    id: SubscriptionId,
    registry: Weak<SubscriberRegistry>,
}

impl Subscription {
    pub fn kind(&self) -> &str {
        &self.kind
    }

    pub fn id(&self) -> SubscriptionId {
        self.id
    }

    /// 取消订阅，可重复调用
    pub fn unsubscribe(&self) -> bool {
        self.registry
            .upgrade()
            .is_some_and(|registry| registry.unsubscribe(&self.kind, self.id))
    }
}

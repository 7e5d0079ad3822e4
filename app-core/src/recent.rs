//! 最近更新列表
//!
//! 供界面展示的有界列表，条目在展示时间窗结束或被手动关闭后移除

use crate::message::UpdateMessage;
use chrono::{DateTime, Duration, Utc};
use std::collections::VecDeque;

/// 默认容量
pub const DEFAULT_CAPACITY: usize = 10;
/// 默认展示时长 (秒)
pub const DEFAULT_DISPLAY_SECS: i64 = 5;

/// 列表中的一条更新
#[derive(Debug, Clone, PartialEq)]
pub struct RecentUpdate {
    pub message: UpdateMessage,
    pub received_at: DateTime<Utc>,
}

impl RecentUpdate {
    pub fn transcription_id(&self) -> Option<&str> {
        self.message.transcription_id.as_deref()
    }
}

/// 有界的最近更新列表
#[derive(Debug, Clone)]
pub struct RecentUpdates {
    capacity: usize,
    display_for: Duration,
    items: VecDeque<RecentUpdate>,
}

impl Default for RecentUpdates {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY, Duration::seconds(DEFAULT_DISPLAY_SECS))
    }
}

impl RecentUpdates {
    pub fn new(capacity: usize, display_for: Duration) -> Self {
        let capacity = capacity.max(1);
        Self {
            capacity,
            display_for,
            items: VecDeque::with_capacity(capacity),
        }
    }

    /// 记录一条更新
    ///
    /// 同一转写任务只保留最新的一条；超出容量时丢弃最旧的。
    /// 不携带转写状态的消息不会被记录。
    pub fn record(&mut self, message: UpdateMessage, now: DateTime<Utc>) -> bool {
        if !message.is_transcription_update() {
            return false;
        }

        if let Some(id) = message.transcription_id.as_deref() {
            self.items.retain(|item| item.transcription_id() != Some(id));
        }

        self.items.push_back(RecentUpdate {
            message,
            received_at: now,
        });
        while self.items.len() > self.capacity {
            self.items.pop_front();
        }
        true
    }

    /// 手动关闭某个转写任务的更新
    pub fn dismiss(&mut self, transcription_id: &str) -> bool {
        let before = self.items.len();
        self.items
            .retain(|item| item.transcription_id() != Some(transcription_id));
        self.items.len() != before
    }

    /// 移除展示时间窗已结束的条目，返回移除数量
    pub fn prune_expired(&mut self, now: DateTime<Utc>) -> usize {
        let before = self.items.len();
        let display_for = self.display_for;
        self.items
            .retain(|item| now.signed_duration_since(item.received_at) < display_for);
        before - self.items.len()
    }

    /// 当前条目的快照 (从旧到新)
    pub fn snapshot(&self) -> Vec<RecentUpdate> {
        self.items.iter().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn clear(&mut self) {
        self.items.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::TranscriptionStatus;
    use serde_json::json;

    fn status_update(id: &str, status: TranscriptionStatus) -> UpdateMessage {
        UpdateMessage {
            kind: crate::TRANSCRIPTION_UPDATE.to_string(),
            transcription_id: Some(id.to_string()),
            status: Some(status),
            progress: None,
            error: None,
            payload: json!({ "transcription_id": id }),
        }
    }

    #[test]
    fn test_record_replaces_same_transcription() {
        let mut recent = RecentUpdates::default();
        let now = Utc::now();
        recent.record(status_update("a", TranscriptionStatus::Pending), now);
        recent.record(status_update("b", TranscriptionStatus::Pending), now);
        recent.record(status_update("a", TranscriptionStatus::Completed), now);

        let items = recent.snapshot();
        assert_eq!(items.len(), 2);
        assert_eq!(items[0].transcription_id(), Some("b"));
        assert_eq!(items[1].message.status, Some(TranscriptionStatus::Completed));
    }

    #[test]
    fn test_capacity_drops_oldest() {
        let mut recent = RecentUpdates::new(2, Duration::seconds(5));
        let now = Utc::now();
        for id in ["a", "b", "c"] {
            recent.record(status_update(id, TranscriptionStatus::Processing), now);
        }
        let ids: Vec<_> = recent
            .snapshot()
            .iter()
            .filter_map(|u| u.transcription_id().map(str::to_string))
            .collect();
        assert_eq!(ids, vec!["b", "c"]);
    }

    #[test]
    fn test_non_transcription_messages_are_skipped() {
        let mut recent = RecentUpdates::default();
        let message = UpdateMessage {
            kind: "new_message".to_string(),
            transcription_id: None,
            status: None,
            progress: None,
            error: None,
            payload: json!({ "type": "new_message" }),
        };
        assert!(!recent.record(message, Utc::now()));
        assert!(recent.is_empty());
    }

    #[test]
    fn test_dismiss_and_prune() {
        let mut recent = RecentUpdates::new(10, Duration::seconds(5));
        let start = Utc::now();
        recent.record(status_update("a", TranscriptionStatus::Completed), start);
        recent.record(
            status_update("b", TranscriptionStatus::Failed),
            start + Duration::seconds(3),
        );

        assert!(recent.dismiss("a"));
        assert!(!recent.dismiss("a"));
        assert_eq!(recent.len(), 1);

        assert_eq!(recent.prune_expired(start + Duration::seconds(7)), 0);
        assert_eq!(recent.prune_expired(start + Duration::seconds(8)), 1);
        assert!(recent.is_empty());
    }
}

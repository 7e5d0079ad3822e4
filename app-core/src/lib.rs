//! IAM 实时通道的核心类型
//!
//! 与传输层无关：消息模型、退避策略、最近更新列表

pub mod backoff;
pub mod message;
pub mod recent;

pub use backoff::BackoffPolicy;
pub use message::{
    parse_frame, ControlFrame, InboundFrame, ParseError, TranscriptionStatus, UpdateMessage,
    TRANSCRIPTION_UPDATE,
};
pub use recent::{RecentUpdate, RecentUpdates};

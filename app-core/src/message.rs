//! 实时更新消息
//!
//! 服务端推送的 JSON 消息模型，以及心跳控制帧的编解码

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use thiserror::Error;

/// 转写状态更新的消息类型
pub const TRANSCRIPTION_UPDATE: &str = "transcription_update";

/// 转写任务状态
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TranscriptionStatus {
    Pending,
    Processing,
    Completed,
    Failed,
}

impl TranscriptionStatus {
    /// 是否为终态
    pub fn is_terminal(&self) -> bool {
        matches!(self, TranscriptionStatus::Completed | TranscriptionStatus::Failed)
    }
}

impl fmt::Display for TranscriptionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TranscriptionStatus::Pending => write!(f, "pending"),
            TranscriptionStatus::Processing => write!(f, "processing"),
            TranscriptionStatus::Completed => write!(f, "completed"),
            TranscriptionStatus::Failed => write!(f, "failed"),
        }
    }
}

/// 消息解析错误
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ParseError {
    #[error("Payload is not valid JSON: {0}")]
    InvalidJson(String),

    #[error("Payload is not a JSON object")]
    NotAnObject,

    #[error("Message has no string `type` field")]
    MissingType,

    #[error("Invalid field value: {0}")]
    InvalidField(String),
}

/// 服务端推送的更新消息
///
/// `type` 之外的字段都是可选的：非转写类消息只携带原始载荷。
#[derive(Debug, Clone, PartialEq)]
pub struct UpdateMessage {
    /// 消息类型，订阅按此精确匹配
    pub kind: String,
    pub transcription_id: Option<String>,
    pub status: Option<TranscriptionStatus>,
    /// 进度 (0-100)
    pub progress: Option<f64>,
    pub error: Option<String>,
    /// 原始 JSON 载荷，包含未知字段
    pub payload: Value,
}

impl UpdateMessage {
    /// 是否携带转写状态 (可以进入最近更新列表)
    pub fn is_transcription_update(&self) -> bool {
        self.transcription_id.is_some() && self.status.is_some()
    }
}

/// 入站帧
#[derive(Debug, Clone, PartialEq)]
pub enum InboundFrame {
    /// 服务端发起的 JSON ping
    Ping,
    /// JSON pong
    Pong,
    Update(UpdateMessage),
}

/// 出站控制帧
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum ControlFrame {
    Ping,
    Pong,
}

impl ControlFrame {
    pub fn to_json(self) -> String {
        match self {
            ControlFrame::Ping => r#"{"type":"ping"}"#.to_string(),
            ControlFrame::Pong => r#"{"type":"pong"}"#.to_string(),
        }
    }
}

#[derive(Debug, Deserialize)]
struct Envelope {
    #[serde(default)]
    transcription_id: Option<String>,
    #[serde(default)]
    status: Option<TranscriptionStatus>,
    #[serde(default)]
    progress: Option<f64>,
    #[serde(default)]
    error: Option<String>,
}

/// 解析一条文本帧
pub fn parse_frame(text: &str) -> Result<InboundFrame, ParseError> {
    let value: Value =
        serde_json::from_str(text).map_err(|e| ParseError::InvalidJson(e.to_string()))?;

    let kind = match &value {
        Value::Object(map) => map
            .get("type")
            .and_then(Value::as_str)
            .ok_or(ParseError::MissingType)?
            .to_string(),
        _ => return Err(ParseError::NotAnObject),
    };

    match kind.as_str() {
        "ping" => return Ok(InboundFrame::Ping),
        "pong" => return Ok(InboundFrame::Pong),
        _ => {}
    }

    let envelope: Envelope = serde_json::from_value(value.clone())
        .map_err(|e| ParseError::InvalidField(e.to_string()))?;

    let progress = envelope.progress.map(|p| {
        if !(0.0..=100.0).contains(&p) {
            tracing::debug!("Clamping out-of-range progress {} for {}", p, kind);
        }
        p.clamp(0.0, 100.0)
    });

    Ok(InboundFrame::Update(UpdateMessage {
        kind,
        transcription_id: envelope.transcription_id,
        status: envelope.status,
        progress,
        error: envelope.error,
        payload: value,
    }))
}

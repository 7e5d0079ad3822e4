//! 传输抽象
//!
//! 连接管理器只依赖 `Connector` 和 `Link`，不直接接触 WebSocket 实现。
//! `Link` 是一对帧通道：入站通道关闭即表示传输已关闭，丢弃 `Link` 即关闭传输。

use crate::error::NetworkError;
use futures_util::future::BoxFuture;
use tokio::sync::mpsc;
use tokio::task::AbortHandle;

/// 默认帧通道容量
pub const DEFAULT_LINK_BUFFER: usize = 64;

/// WebSocket 消息
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WsMessage {
    Text(String),
    Binary(Vec<u8>),
    Ping(Vec<u8>),
    Pong(Vec<u8>),
    Close,
}

/// 建立传输连接
pub trait Connector: Send + Sync + 'static {
    /// 打开到 `url` 的连接
    ///
    /// 超时由调用方控制；返回的 future 被丢弃即取消连接。
    fn connect(&self, url: &str) -> BoxFuture<'static, Result<Link, NetworkError>>;
}

/// 一条已建立的传输连接
#[derive(Debug)]
pub struct Link {
    outgoing: mpsc::Sender<WsMessage>,
    incoming: mpsc::Receiver<WsMessage>,
    tasks: Vec<AbortHandle>,
}

impl Link {
    pub fn new(outgoing: mpsc::Sender<WsMessage>, incoming: mpsc::Receiver<WsMessage>) -> Self {
        Self {
            outgoing,
            incoming,
            tasks: Vec::new(),
        }
    }

    /// 附加需要随连接一起终止的后台任务
    pub fn with_tasks(mut self, tasks: impl IntoIterator<Item = AbortHandle>) -> Self {
        self.tasks.extend(tasks);
        self
    }

    /// 创建内存中的连接对，用于测试和本地模拟
    pub fn pair(buffer: usize) -> (Link, LinkPeer) {
        let (client_tx, peer_rx) = mpsc::channel(buffer);
        let (peer_tx, client_rx) = mpsc::channel(buffer);
        (
            Link::new(client_tx, client_rx),
            LinkPeer {
                sender: peer_tx,
                receiver: peer_rx,
            },
        )
    }

    /// 发送一帧
    pub async fn send(&self, message: WsMessage) -> Result<(), NetworkError> {
        self.outgoing
            .send(message)
            .await
            .map_err(|_| NetworkError::ConnectionLost)
    }

    /// 不等待地发送一帧
    ///
    /// 出站缓冲已满时返回 `SendFailed`，传输已关闭时返回 `ConnectionLost`
    pub fn try_send(&self, message: WsMessage) -> Result<(), NetworkError> {
        self.outgoing.try_send(message).map_err(|e| match e {
            mpsc::error::TrySendError::Full(_) => {
                NetworkError::SendFailed("outgoing buffer full".to_string())
            }
            mpsc::error::TrySendError::Closed(_) => NetworkError::ConnectionLost,
        })
    }

    /// 接收下一帧，`None` 表示传输已关闭
    pub async fn recv(&mut self) -> Option<WsMessage> {
        self.incoming.recv().await
    }

    /// 尽力发送 Close 帧后关闭连接
    pub fn close(self) {
        let _ = self.outgoing.try_send(WsMessage::Close);
    }
}

impl Drop for Link {
    fn drop(&mut self) {
        for task in &self.tasks {
            task.abort();
        }
    }
}

/// 内存连接的对端，扮演服务端
#[derive(Debug)]
pub struct LinkPeer {
    sender: mpsc::Sender<WsMessage>,
    receiver: mpsc::Receiver<WsMessage>,
}

impl LinkPeer {
    /// 向客户端推送一帧，客户端已断开时返回 false
    pub async fn send(&self, message: WsMessage) -> bool {
        self.sender.send(message).await.is_ok()
    }

    /// 推送文本帧
    pub async fn send_text(&self, text: impl Into<String>) -> bool {
        self.send(WsMessage::Text(text.into())).await
    }

    /// 接收客户端发出的下一帧，客户端已断开时返回 `None`
    pub async fn recv(&mut self) -> Option<WsMessage> {
        self.receiver.recv().await
    }

    /// 客户端是否已经丢弃了连接
    pub fn is_closed(&self) -> bool {
        self.sender.is_closed()
    }
}

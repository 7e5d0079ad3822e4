//! WebSocket 连接器
//!
//! 使用 tokio-tungstenite 建立连接，并把读写两端转接成 `Link` 的帧通道

use crate::error::NetworkError;
use crate::modules::network::transport::{Connector, Link, WsMessage, DEFAULT_LINK_BUFFER};
use futures_util::future::BoxFuture;
use futures_util::{SinkExt, StreamExt};
use http::header::{HeaderValue, AUTHORIZATION};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::{self, Message};
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};

type Stream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// WebSocket 连接器
#[derive(Debug, Clone)]
pub struct WebSocketConnector {
    /// 认证令牌，以 `Authorization: Bearer` 头发送
    auth_token: Option<String>,
    /// 帧通道容量
    buffer: usize,
}

impl Default for WebSocketConnector {
    fn default() -> Self {
        Self::new()
    }
}

impl WebSocketConnector {
    pub fn new() -> Self {
        Self {
            auth_token: None,
            buffer: DEFAULT_LINK_BUFFER,
        }
    }

    /// 设置认证令牌
    pub fn with_auth_token(mut self, token: impl Into<String>) -> Self {
        self.auth_token = Some(token.into());
        self
    }

    pub fn with_buffer(mut self, buffer: usize) -> Self {
        self.buffer = buffer.max(1);
        self
    }

    /// 构建握手请求
    fn build_request(
        &self,
        url: &str,
    ) -> Result<http::Request<()>, NetworkError> {
        let mut request = url
            .into_client_request()
            .map_err(|e| NetworkError::ConnectionFailed(e.to_string()))?;

        if let Some(token) = &self.auth_token {
            let value = HeaderValue::from_str(&format!("Bearer {}", token))
                .map_err(|e| NetworkError::ConnectionFailed(e.to_string()))?;
            request.headers_mut().insert(AUTHORIZATION, value);
        }

        Ok(request)
    }
}

impl Connector for WebSocketConnector {
    fn connect(&self, url: &str) -> BoxFuture<'static, Result<Link, NetworkError>> {
        let request = self.build_request(url);
        let buffer = self.buffer;
        let url = url.to_string();

        Box::pin(async move {
            let request = request?;
            match connect_async(request).await {
                Ok((stream, _response)) => {
                    tracing::info!("WebSocket connected to {}", url);
                    Ok(into_link(stream, buffer))
                }
                Err(tungstenite::Error::Http(response))
                    if response.status() == http::StatusCode::UNAUTHORIZED =>
                {
                    Err(NetworkError::AuthenticationFailed)
                }
                Err(e) => Err(NetworkError::ConnectionFailed(e.to_string())),
            }
        })
    }
}

/// 启动读写转接任务
///
/// 写任务在出站通道关闭后发送 Close 帧并退出；读任务随 `Link` 一起被终止。
fn into_link(stream: Stream, buffer: usize) -> Link {
    let (mut sink, mut source) = stream.split();
    let (outgoing_tx, mut outgoing_rx) = mpsc::channel::<WsMessage>(buffer);
    let (incoming_tx, incoming_rx) = mpsc::channel::<WsMessage>(buffer);

    tokio::spawn(async move {
        while let Some(message) = outgoing_rx.recv().await {
            let closing = message == WsMessage::Close;
            if let Err(e) = sink.send(to_frame(message)).await {
                tracing::warn!("WebSocket send error: {}", e);
                return;
            }
            if closing {
                return;
            }
        }
        let _ = sink.close().await;
        tracing::debug!("WebSocket writer closed");
    });

    let reader = tokio::spawn(async move {
        while let Some(frame) = source.next().await {
            let message = match frame {
                Ok(Message::Text(text)) => WsMessage::Text(text.as_str().to_string()),
                Ok(Message::Binary(data)) => WsMessage::Binary(data.to_vec()),
                Ok(Message::Ping(data)) => WsMessage::Ping(data.to_vec()),
                Ok(Message::Pong(data)) => WsMessage::Pong(data.to_vec()),
                Ok(Message::Close(frame)) => {
                    tracing::debug!("WebSocket closed by server: {:?}", frame);
                    let _ = incoming_tx.send(WsMessage::Close).await;
                    return;
                }
                Ok(Message::Frame(_)) => continue,
                Err(e) => {
                    tracing::warn!("WebSocket receive error: {}", e);
                    return;
                }
            };
            if incoming_tx.send(message).await.is_err() {
                return;
            }
        }
    });

    Link::new(outgoing_tx, incoming_rx).with_tasks([reader.abort_handle()])
}

fn to_frame(message: WsMessage) -> Message {
    match message {
        WsMessage::Text(text) => Message::Text(text.into()),
        WsMessage::Binary(data) => Message::Binary(data.into()),
        WsMessage::Ping(data) => Message::Ping(data.into()),
        WsMessage::Pong(data) => Message::Pong(data.into()),
        WsMessage::Close => Message::Close(None),
    }
}

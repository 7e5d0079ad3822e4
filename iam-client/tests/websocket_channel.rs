//! 通过本地 WebSocket 服务端验证实时通道

use futures_util::{SinkExt, StreamExt};
use iam_realtime::{
    ConnectionConfig, ConnectionEvent, ConnectionManager, ConnectionState, Connector,
    NetworkError, TranscriptionStatus, WebSocketConnector, TRANSCRIPTION_UPDATE,
};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::sync::{mpsc, oneshot};
use tokio::time::timeout;
use tokio_tungstenite::tungstenite::handshake::server::{ErrorResponse, Request, Response};
use tokio_tungstenite::tungstenite::Message;

const LIMIT: Duration = Duration::from_secs(10);

const UPDATE: &str = r#"{"type":"transcription_update","transcription_id":"t-42","status":"processing","progress":55.5,"extra":true}"#;

async fn bind() -> (TcpListener, String) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let url = format!("ws://{}/ws/alice", listener.local_addr().unwrap());
    (listener, url)
}

fn record_updates(manager: &ConnectionManager) -> mpsc::UnboundedReceiver<iam_realtime::UpdateMessage> {
    let (tx, rx) = mpsc::unbounded_channel();
    manager.on_message(TRANSCRIPTION_UPDATE, move |message| {
        let _ = tx.send(message.clone());
    });
    rx
}

#[tokio::test]
async fn test_receives_pushed_update() {
    let (listener, url) = bind().await;
    let server = tokio::spawn(async move {
        let (stream, _) = listener.accept().await.unwrap();
        let mut ws = tokio_tungstenite::accept_async(stream).await.unwrap();
        ws.send(Message::Text(UPDATE.into())).await.unwrap();
        while let Some(Ok(message)) = ws.next().await {
            if message.is_close() {
                return true;
            }
        }
        false
    });

    let manager = ConnectionManager::spawn(
        ConnectionConfig::new("alice", url),
        Arc::new(WebSocketConnector::new()),
    );
    let mut updates = record_updates(&manager);
    manager.connect();

    let update = timeout(LIMIT, updates.recv()).await.unwrap().unwrap();
    assert_eq!(update.transcription_id.as_deref(), Some("t-42"));
    assert_eq!(update.status, Some(TranscriptionStatus::Processing));
    assert_eq!(update.progress, Some(55.5));
    assert!(manager.is_connected());
    assert_eq!(manager.recent_updates().len(), 1);

    manager.disconnect();
    assert!(timeout(LIMIT, server).await.unwrap().unwrap(), "server saw no close frame");
    manager.shutdown().await;
    assert_eq!(manager.state(), ConnectionState::Disconnected);
}

#[tokio::test]
async fn test_sends_bearer_token() {
    let (listener, url) = bind().await;
    let (header_tx, header_rx) = oneshot::channel();
    tokio::spawn(async move {
        let (stream, _) = listener.accept().await.unwrap();
        let callback = move |request: &Request, response: Response| -> Result<Response, ErrorResponse> {
            let header = request
                .headers()
                .get("authorization")
                .and_then(|v| v.to_str().ok())
                .map(str::to_string);
            let _ = header_tx.send((request.uri().path().to_string(), header));
            Ok(response)
        };
        let mut ws = tokio_tungstenite::accept_hdr_async(stream, callback).await.unwrap();
        while let Some(Ok(_)) = ws.next().await {}
    });

    let connector = WebSocketConnector::new().with_auth_token("s3cret");
    let link = timeout(LIMIT, connector.connect(&url)).await.unwrap().unwrap();

    let (path, header) = timeout(LIMIT, header_rx).await.unwrap().unwrap();
    assert_eq!(path, "/ws/alice");
    assert_eq!(header.as_deref(), Some("Bearer s3cret"));
    link.close();
}

#[tokio::test]
async fn test_unauthorized_handshake() {
    let (listener, url) = bind().await;
    tokio::spawn(async move {
        let (stream, _) = listener.accept().await.unwrap();
        let reject = |_: &Request, _: Response| -> Result<Response, ErrorResponse> {
            Err(http::Response::builder()
                .status(http::StatusCode::UNAUTHORIZED)
                .body(None)
                .unwrap())
        };
        let _ = tokio_tungstenite::accept_hdr_async(stream, reject).await;
    });

    let result = timeout(LIMIT, WebSocketConnector::new().connect(&url))
        .await
        .unwrap();
    assert!(matches!(result, Err(NetworkError::AuthenticationFailed)));
}

#[tokio::test]
async fn test_reconnects_after_server_drop() {
    let (listener, url) = bind().await;
    tokio::spawn(async move {
        let (stream, _) = listener.accept().await.unwrap();
        let ws = tokio_tungstenite::accept_async(stream).await.unwrap();
        drop(ws);

        let (stream, _) = listener.accept().await.unwrap();
        let mut ws = tokio_tungstenite::accept_async(stream).await.unwrap();
        ws.send(Message::Text(UPDATE.into())).await.unwrap();
        while let Some(Ok(_)) = ws.next().await {}
    });

    let manager = ConnectionManager::spawn(
        ConnectionConfig::new("alice", url),
        Arc::new(WebSocketConnector::new()),
    );
    let (tx, mut events) = mpsc::unbounded_channel();
    manager.on_event(move |event| {
        let _ = tx.send(event.clone());
    });
    let mut updates = record_updates(&manager);
    manager.connect();

    let update = timeout(LIMIT, updates.recv()).await.unwrap().unwrap();
    assert_eq!(update.transcription_id.as_deref(), Some("t-42"));

    let mut scheduled = Vec::new();
    while let Ok(event) = events.try_recv() {
        if let ConnectionEvent::ReconnectScheduled { attempt, delay_ms } = event {
            scheduled.push((attempt, delay_ms));
        }
    }
    assert_eq!(scheduled, vec![(1, 1000)]);
    assert_eq!(manager.connection_status().attempt, 0);

    manager.shutdown().await;
}

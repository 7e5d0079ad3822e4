//! 网络通信模块
//!
//! 传输抽象、WebSocket 连接器、心跳检测和连接管理器

pub mod heartbeat;
pub mod manager;
pub mod transport;
pub mod websocket;

#[cfg(test)]
pub(crate) mod testing;

pub use heartbeat::{HeartbeatFrame, HeartbeatMonitor, HeartbeatVerdict};
pub use manager::{ConnectionConfig, ConnectionManager};
pub use transport::{Connector, Link, LinkPeer, WsMessage};
pub use websocket::WebSocketConnector;

//! 测试用连接器：按脚本依次返回连接成功、失败或挂起

use crate::error::NetworkError;
use crate::modules::network::transport::{Connector, Link, LinkPeer};
use futures_util::future::{self, BoxFuture};
use futures_util::FutureExt;
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::time::Instant;

/// 单次连接的结果，脚本用完后一律失败
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Script {
    Open,
    Fail,
    Hang,
}

pub(crate) struct ScriptedConnector {
    script: Mutex<VecDeque<Script>>,
    attempts: Mutex<Vec<(Instant, String)>>,
    peers: mpsc::UnboundedSender<LinkPeer>,
}

impl ScriptedConnector {
    /// 返回连接器，以及每次成功连接时服务端一侧的 `LinkPeer`
    pub(crate) fn new(
        script: impl IntoIterator<Item = Script>,
    ) -> (Arc<Self>, mpsc::UnboundedReceiver<LinkPeer>) {
        let (peers, receiver) = mpsc::unbounded_channel();
        let connector = Arc::new(Self {
            script: Mutex::new(script.into_iter().collect()),
            attempts: Mutex::new(Vec::new()),
            peers,
        });
        (connector, receiver)
    }

    pub(crate) fn attempt_count(&self) -> usize {
        self.attempts.lock().len()
    }

    pub(crate) fn attempt_times(&self) -> Vec<Instant> {
        self.attempts.lock().iter().map(|(at, _)| *at).collect()
    }

    pub(crate) fn urls(&self) -> Vec<String> {
        self.attempts.lock().iter().map(|(_, url)| url.clone()).collect()
    }
}

impl Connector for ScriptedConnector {
    fn connect(&self, url: &str) -> BoxFuture<'static, Result<Link, NetworkError>> {
        self.attempts.lock().push((Instant::now(), url.to_string()));
        let step = self.script.lock().pop_front().unwrap_or(Script::Fail);

        match step {
            Script::Open => {
                let (link, peer) = Link::pair(16);
                let _ = self.peers.send(peer);
                future::ready(Ok(link)).boxed()
            }
            Script::Fail => future::ready(Err(NetworkError::ConnectionFailed(
                "connection refused".to_string(),
            )))
            .boxed(),
            Script::Hang => future::pending().boxed(),
        }
    }
}

//! 进程内传输实现
//!
//! 用一个共享注册表模拟信令服务：按 ID 绑定端点、按 ID 找到远端。
//! 用于测试以及同一进程内的双人对战。

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use rand::distributions::Alphanumeric;
use rand::Rng;
use tokio::sync::mpsc;
use tracing::debug;

use crate::error::TransportError;
use crate::transport::{Endpoint, Link, LinkEvent, Transport};

type Registry = Arc<Mutex<HashMap<String, mpsc::UnboundedSender<MemoryLink>>>>;

/// 进程内"网络"，克隆后共享同一个注册表
#[derive(Clone, Default)]
pub struct MemoryNetwork {
    registry: Registry,
}

impl MemoryNetwork {
    pub fn new() -> Self {
        Self::default()
    }

    /// 某个 ID 当前是否已被绑定
    pub fn is_bound(&self, id: &str) -> bool {
        self.registry
            .lock()
            .map(|map| map.contains_key(id))
            .unwrap_or(false)
    }

    fn random_id() -> String {
        let suffix: String = rand::thread_rng()
            .sample_iter(&Alphanumeric)
            .take(12)
            .map(char::from)
            .collect();
        format!("peer-{}", suffix.to_ascii_lowercase())
    }
}

#[async_trait]
impl Transport for MemoryNetwork {
    type Endpoint = MemoryEndpoint;

    async fn open(&self, bind_id: Option<&str>) -> Result<MemoryEndpoint, TransportError> {
        let mut map = self
            .registry
            .lock()
            .map_err(|_| TransportError::server("registry poisoned"))?;

        let id = match bind_id {
            Some(id) => {
                if map.contains_key(id) {
                    return Err(TransportError::id_taken(id));
                }
                id.to_string()
            }
            None => loop {
                let id = Self::random_id();
                if !map.contains_key(&id) {
                    break id;
                }
            },
        };

        let (tx, rx) = mpsc::unbounded_channel();
        map.insert(id.clone(), tx);
        debug!("memory endpoint bound: {}", id);

        Ok(MemoryEndpoint {
            id,
            registry: self.registry.clone(),
            incoming: rx,
            closed: false,
        })
    }
}

/// 进程内端点
pub struct MemoryEndpoint {
    id: String,
    registry: Registry,
    incoming: mpsc::UnboundedReceiver<MemoryLink>,
    closed: bool,
}

impl MemoryEndpoint {
    fn unregister(&mut self) {
        if self.closed {
            return;
        }
        self.closed = true;
        self.incoming.close();
        if let Ok(mut map) = self.registry.lock() {
            map.remove(&self.id);
        }
    }
}

#[async_trait]
impl Endpoint for MemoryEndpoint {
    type Link = MemoryLink;

    fn id(&self) -> &str {
        &self.id
    }

    async fn connect_to(&mut self, remote_id: &str) -> Result<MemoryLink, TransportError> {
        let remote = self
            .registry
            .lock()
            .map_err(|_| TransportError::server("registry poisoned"))?
            .get(remote_id)
            .cloned()
            .ok_or_else(|| TransportError::remote_unavailable(format!("no peer with id {}", remote_id)))?;

        let (to_remote, from_local) = mpsc::unbounded_channel();
        let (to_local, from_remote) = mpsc::unbounded_channel();

        let local = MemoryLink::new(remote_id.to_string(), to_remote, from_remote);
        let inbound = MemoryLink::new(self.id.clone(), to_local, from_local);

        remote
            .send(inbound)
            .map_err(|_| TransportError::remote_unavailable(format!("peer {} went away", remote_id)))?;

        Ok(local)
    }

    async fn accept(&mut self) -> Result<MemoryLink, TransportError> {
        let mut link = self.incoming.recv().await.ok_or_else(TransportError::closed)?;
        // 双方同时收到 Opened
        link.pending.push_back(LinkEvent::Opened);
        let _ = link.tx.send(LinkEvent::Opened);
        debug!("memory endpoint {} accepted {}", self.id, link.remote_id);
        Ok(link)
    }

    async fn close(&mut self) {
        self.unregister();
    }
}

impl Drop for MemoryEndpoint {
    fn drop(&mut self) {
        self.unregister();
    }
}

/// 进程内连接
pub struct MemoryLink {
    remote_id: String,
    tx: mpsc::UnboundedSender<LinkEvent>,
    rx: mpsc::UnboundedReceiver<LinkEvent>,
    pending: VecDeque<LinkEvent>,
    open: bool,
    closed: bool,
}

impl MemoryLink {
    fn new(
        remote_id: String,
        tx: mpsc::UnboundedSender<LinkEvent>,
        rx: mpsc::UnboundedReceiver<LinkEvent>,
    ) -> Self {
        Self {
            remote_id,
            tx,
            rx,
            pending: VecDeque::new(),
            open: false,
            closed: false,
        }
    }

    fn observe(&mut self, event: &LinkEvent) {
        match event {
            LinkEvent::Opened => self.open = true,
            LinkEvent::Closed => {
                self.open = false;
                self.closed = true;
            }
            _ => {}
        }
    }
}

#[async_trait]
impl Link for MemoryLink {
    fn remote_id(&self) -> &str {
        &self.remote_id
    }

    fn is_open(&self) -> bool {
        self.open
    }

    async fn send_text(&mut self, payload: String) -> Result<(), TransportError> {
        if !self.open {
            return Err(TransportError::closed());
        }
        self.tx
            .send(LinkEvent::Data(payload))
            .map_err(|_| TransportError::closed())
    }

    async fn next_event(&mut self) -> LinkEvent {
        if self.closed {
            return LinkEvent::Closed;
        }
        let event = match self.pending.pop_front() {
            Some(event) => event,
            None => self.rx.recv().await.unwrap_or(LinkEvent::Closed),
        };
        self.observe(&event);
        event
    }

    async fn close(&mut self) {
        if !self.closed {
            let _ = self.tx.send(LinkEvent::Closed);
        }
        self.open = false;
        self.closed = true;
    }
}

impl Drop for MemoryLink {
    fn drop(&mut self) {
        if !self.closed {
            let _ = self.tx.send(LinkEvent::Closed);
        }
    }
}

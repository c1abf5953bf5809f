//! 直连 TCP 传输实现
//!
//! 房主在配置的地址上监听，客人连接配置的房主地址后先发送握手帧声明目标房间号；
//! 房间号与房主绑定的 ID 不一致时房主拒绝，客人侧表现为 remote-unavailable。

use std::net::SocketAddr;

use async_trait::async_trait;
use rand::distributions::Alphanumeric;
use rand::Rng;
use serde::{Deserialize, Serialize};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tracing::{debug, warn};

use crate::error::{ProtocolError, TransportError};
use crate::transport::{Endpoint, FrameReader, FrameWriter, Link, LinkEvent, Transport};
use crate::CONNECT_TIMEOUT;

/// TCP 传输配置
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TcpConfig {
    /// 房主监听地址
    pub listen_addr: String,
    /// 客人连接的房主地址
    pub host_addr: String,
}

impl Default for TcpConfig {
    fn default() -> Self {
        Self {
            listen_addr: "0.0.0.0:9527".to_string(),
            host_addr: "127.0.0.1:9527".to_string(),
        }
    }
}

/// 握手帧
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
enum Handshake {
    Hello { from: String, target: String },
    Accept { id: String },
    Reject { reason: String },
}

fn protocol_to_transport(err: ProtocolError) -> TransportError {
    match err {
        ProtocolError::ConnectionClosed => TransportError::closed(),
        ProtocolError::Io(e) => e.into(),
        other => TransportError::network(other.to_string()),
    }
}

/// TCP 传输
#[derive(Clone, Debug, Default)]
pub struct TcpTransport {
    config: TcpConfig,
}

impl TcpTransport {
    pub fn new(config: TcpConfig) -> Self {
        Self { config }
    }
}

#[async_trait]
impl Transport for TcpTransport {
    type Endpoint = TcpEndpoint;

    async fn open(&self, bind_id: Option<&str>) -> Result<TcpEndpoint, TransportError> {
        match bind_id {
            Some(id) => {
                let listener = TcpListener::bind(&self.config.listen_addr).await?;
                let local = listener.local_addr().ok().map(|a| a.to_string());
                debug!("tcp endpoint {} listening on {:?}", id, local);

                let (tx, rx) = mpsc::unbounded_channel();
                let acceptor = tokio::spawn(accept_loop(listener, id.to_string(), tx));
                Ok(TcpEndpoint {
                    id: id.to_string(),
                    host_addr: self.config.host_addr.clone(),
                    local_addr: local,
                    incoming: Some(rx),
                    acceptor: Some(acceptor),
                })
            }
            None => {
                let suffix: String = rand::thread_rng()
                    .sample_iter(&Alphanumeric)
                    .take(12)
                    .map(char::from)
                    .collect();
                Ok(TcpEndpoint {
                    id: format!("peer-{}", suffix.to_ascii_lowercase()),
                    host_addr: self.config.host_addr.clone(),
                    local_addr: None,
                    incoming: None,
                    acceptor: None,
                })
            }
        }
    }
}

/// 房主侧接受循环：每个连入在独立任务中握手，完成后再交给 `accept`
async fn accept_loop(
    listener: TcpListener,
    id: String,
    ready: mpsc::UnboundedSender<TcpLink>,
) {
    loop {
        let (stream, addr) = match listener.accept().await {
            Ok(pair) => pair,
            Err(e) => {
                warn!("tcp accept failed: {}", e);
                continue;
            }
        };
        if ready.is_closed() {
            // 端点已关闭
            break;
        }
        tokio::spawn(handshake(stream, addr, id.clone(), ready.clone()));
    }
}

/// 等待客人的握手帧，房间号匹配时接受
async fn handshake(
    stream: TcpStream,
    addr: SocketAddr,
    id: String,
    ready: mpsc::UnboundedSender<TcpLink>,
) {
    let _ = stream.set_nodelay(true);
    let (read_half, write_half) = stream.into_split();
    let mut reader = FrameReader::new(read_half);
    let mut writer = FrameWriter::new(write_half);

    let hello = match timeout(CONNECT_TIMEOUT, reader.read_frame::<Handshake>()).await {
        Ok(Ok(hello)) => hello,
        Ok(Err(e)) => {
            warn!("handshake from {} failed: {}", addr, e);
            return;
        }
        Err(_) => {
            warn!("handshake from {} timed out", addr);
            return;
        }
    };

    let from = match hello {
        Handshake::Hello { from, target } if target == id => from,
        Handshake::Hello { target, .. } => {
            debug!("rejecting {} asking for {}", addr, target);
            let _ = writer
                .write_frame(&Handshake::Reject {
                    reason: format!("no room {}", target),
                })
                .await;
            return;
        }
        other => {
            warn!("unexpected handshake frame from {}: {:?}", addr, other);
            return;
        }
    };

    if let Err(e) = writer.write_frame(&Handshake::Accept { id }).await {
        warn!("handshake reply to {} failed: {}", addr, e);
        return;
    }

    let link = TcpLink::established(from, reader, writer);
    if ready.send(link).is_err() {
        debug!("endpoint closed before {} finished joining", addr);
    }
}

/// TCP 端点
pub struct TcpEndpoint {
    id: String,
    host_addr: String,
    local_addr: Option<String>,
    incoming: Option<mpsc::UnboundedReceiver<TcpLink>>,
    acceptor: Option<JoinHandle<()>>,
}

impl TcpEndpoint {
    /// 实际监听地址（仅房主）
    pub fn local_addr(&self) -> Option<&str> {
        self.local_addr.as_deref()
    }
}

#[async_trait]
impl Endpoint for TcpEndpoint {
    type Link = TcpLink;

    fn id(&self) -> &str {
        &self.id
    }

    async fn connect_to(&mut self, remote_id: &str) -> Result<TcpLink, TransportError> {
        Ok(TcpLink::connecting(
            self.id.clone(),
            remote_id.to_string(),
            self.host_addr.clone(),
        ))
    }

    async fn accept(&mut self) -> Result<TcpLink, TransportError> {
        let Some(incoming) = self.incoming.as_mut() else {
            // 客人端点不接受连入
            return std::future::pending().await;
        };
        incoming.recv().await.ok_or_else(TransportError::closed)
    }

    async fn close(&mut self) {
        if let Some(acceptor) = self.acceptor.take() {
            acceptor.abort();
        }
        self.incoming = None;
    }
}

impl Drop for TcpEndpoint {
    fn drop(&mut self) {
        if let Some(acceptor) = self.acceptor.take() {
            acceptor.abort();
        }
    }
}

enum Outgoing {
    Text(String),
    Close,
}

/// TCP 连接
///
/// 读、写各由一个后台任务负责，`next_event` 只从通道取事件，可安全取消。
pub struct TcpLink {
    remote_id: String,
    out_tx: mpsc::UnboundedSender<Outgoing>,
    events: mpsc::UnboundedReceiver<LinkEvent>,
    tasks: Vec<JoinHandle<()>>,
    open: bool,
    closed: bool,
}

impl TcpLink {
    /// 房主侧：握手已完成
    fn established(
        remote_id: String,
        reader: FrameReader<OwnedReadHalf>,
        writer: FrameWriter<OwnedWriteHalf>,
    ) -> Self {
        let (out_tx, out_rx) = mpsc::unbounded_channel();
        let (ev_tx, events) = mpsc::unbounded_channel();
        let _ = ev_tx.send(LinkEvent::Opened);
        let tasks = spawn_io(reader, writer, out_rx, ev_tx);
        Self {
            remote_id,
            out_tx,
            events,
            tasks,
            open: false,
            closed: false,
        }
    }

    /// 客人侧：后台完成 TCP 连接与握手，成功后产生 Opened
    fn connecting(local_id: String, remote_id: String, host_addr: String) -> Self {
        let (out_tx, out_rx) = mpsc::unbounded_channel();
        let (ev_tx, events) = mpsc::unbounded_channel();
        let target = remote_id.clone();

        let task = tokio::spawn(async move {
            let stream = match TcpStream::connect(&host_addr).await {
                Ok(stream) => stream,
                Err(e) => {
                    let _ = ev_tx.send(LinkEvent::Errored(e.into()));
                    return;
                }
            };
            let _ = stream.set_nodelay(true);
            let (read_half, write_half) = stream.into_split();
            let mut reader = FrameReader::new(read_half);
            let mut writer = FrameWriter::new(write_half);

            let hello = Handshake::Hello {
                from: local_id,
                target,
            };
            if let Err(e) = writer.write_frame(&hello).await {
                let _ = ev_tx.send(LinkEvent::Errored(protocol_to_transport(e)));
                return;
            }

            match reader.read_frame::<Handshake>().await {
                Ok(Handshake::Accept { .. }) => {
                    let _ = ev_tx.send(LinkEvent::Opened);
                    // 读写任务与本任务脱离，连接关闭时自然退出
                    spawn_io(reader, writer, out_rx, ev_tx);
                }
                Ok(Handshake::Reject { reason }) => {
                    let _ = ev_tx.send(LinkEvent::Errored(TransportError::remote_unavailable(reason)));
                }
                Ok(other) => {
                    let _ = ev_tx.send(LinkEvent::Errored(TransportError::server(format!(
                        "unexpected handshake frame: {:?}",
                        other
                    ))));
                }
                Err(ProtocolError::ConnectionClosed) => {
                    let _ = ev_tx.send(LinkEvent::Errored(TransportError::remote_unavailable(
                        "host closed the connection during handshake",
                    )));
                }
                Err(e) => {
                    let _ = ev_tx.send(LinkEvent::Errored(protocol_to_transport(e)));
                }
            }
        });

        Self {
            remote_id,
            out_tx,
            events,
            tasks: vec![task],
            open: false,
            closed: false,
        }
    }
}

fn spawn_io(
    mut reader: FrameReader<OwnedReadHalf>,
    mut writer: FrameWriter<OwnedWriteHalf>,
    mut out_rx: mpsc::UnboundedReceiver<Outgoing>,
    ev_tx: mpsc::UnboundedSender<LinkEvent>,
) -> Vec<JoinHandle<()>> {
    let read_events = ev_tx.clone();
    let read_task = tokio::spawn(async move {
        loop {
            match reader.read_text().await {
                Ok(text) => {
                    if read_events.send(LinkEvent::Data(text)).is_err() {
                        break;
                    }
                }
                Err(ProtocolError::ConnectionClosed) => {
                    let _ = read_events.send(LinkEvent::Closed);
                    break;
                }
                Err(e) => {
                    let _ = read_events.send(LinkEvent::Errored(protocol_to_transport(e)));
                    let _ = read_events.send(LinkEvent::Closed);
                    break;
                }
            }
        }
    });

    let write_task = tokio::spawn(async move {
        while let Some(out) = out_rx.recv().await {
            match out {
                Outgoing::Text(text) => {
                    if let Err(e) = writer.write_text(&text).await {
                        let _ = ev_tx.send(LinkEvent::Errored(protocol_to_transport(e)));
                        break;
                    }
                }
                Outgoing::Close => break,
            }
        }
        let _ = writer.shutdown().await;
    });

    vec![read_task, write_task]
}

#[async_trait]
impl Link for TcpLink {
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
        self.out_tx
            .send(Outgoing::Text(payload))
            .map_err(|_| TransportError::closed())
    }

    async fn next_event(&mut self) -> LinkEvent {
        if self.closed {
            return LinkEvent::Closed;
        }
        let event = self.events.recv().await.unwrap_or(LinkEvent::Closed);
        match event {
            LinkEvent::Opened => self.open = true,
            LinkEvent::Closed => {
                self.open = false;
                self.closed = true;
            }
            _ => {}
        }
        event
    }

    async fn close(&mut self) {
        let _ = self.out_tx.send(Outgoing::Close);
        self.open = false;
        self.closed = true;
    }
}

impl Drop for TcpLink {
    fn drop(&mut self) {
        let _ = self.out_tx.send(Outgoing::Close);
        // 写任务需要把 Close 处理完，只中止读任务或握手任务
        if let Some(first) = self.tasks.first() {
            first.abort();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn local_config() -> TcpConfig {
        TcpConfig {
            listen_addr: "127.0.0.1:0".to_string(),
            host_addr: String::new(),
        }
    }

    async fn host_and_guest() -> (TcpEndpoint, TcpEndpoint) {
        let host = TcpTransport::new(local_config()).open(Some("AB12C9")).await.unwrap();
        let addr = host.local_addr().unwrap().to_string();
        let guest = TcpTransport::new(TcpConfig {
            listen_addr: String::new(),
            host_addr: addr,
        })
        .open(None)
        .await
        .unwrap();
        (host, guest)
    }

    #[tokio::test]
    async fn test_tcp_handshake_and_data() {
        let (mut host, mut guest) = host_and_guest().await;

        let mut guest_link = guest.connect_to("AB12C9").await.unwrap();
        let mut host_link = host.accept().await.unwrap();
        assert_eq!(host_link.remote_id(), guest.id());

        assert_eq!(host_link.next_event().await, LinkEvent::Opened);
        assert_eq!(guest_link.next_event().await, LinkEvent::Opened);

        guest_link.send_text("{\"type\":\"restart\"}".to_string()).await.unwrap();
        assert_eq!(
            host_link.next_event().await,
            LinkEvent::Data("{\"type\":\"restart\"}".to_string())
        );

        host_link.close().await;
        assert_eq!(guest_link.next_event().await, LinkEvent::Closed);
    }

    #[tokio::test]
    async fn test_silent_client_does_not_block_guests() {
        let (mut host, mut guest) = host_and_guest().await;
        let addr = host.local_addr().unwrap().to_string();

        // 连上后一直不发握手帧
        let _silent = TcpStream::connect(&addr).await.unwrap();

        let mut guest_link = guest.connect_to("AB12C9").await.unwrap();
        let wait = std::time::Duration::from_secs(2);
        let mut host_link = timeout(wait, host.accept()).await.unwrap().unwrap();
        assert_eq!(host_link.remote_id(), guest.id());
        assert_eq!(timeout(wait, guest_link.next_event()).await.unwrap(), LinkEvent::Opened);
        assert_eq!(host_link.next_event().await, LinkEvent::Opened);
    }

    #[tokio::test]
    async fn test_tcp_wrong_room_is_unavailable() {
        let (_host, mut guest) = host_and_guest().await;

        let mut guest_link = guest.connect_to("ZZZZZZ").await.unwrap();
        match guest_link.next_event().await {
            LinkEvent::Errored(e) => {
                assert_eq!(e.kind, crate::TransportErrorKind::RemoteUnavailable)
            }
            other => panic!("unexpected event: {:?}", other),
        }
    }
}

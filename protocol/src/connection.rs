//! 带发送队列的连接
//!
//! 连接打开前发出的消息先进入队列，收到 Opened 后按原顺序冲刷。
//! 每条消息在入队时就盖上连接内序号与轮次，保证对端看到的序号严格递增。

use std::collections::VecDeque;

use tracing::{debug, trace};

use crate::error::TransportError;
use crate::message::{ConnectionId, Envelope, Epoch, PeerMessage};
use crate::transport::{Link, LinkEvent};

/// 一条对端连接及其待发送队列
pub struct Connection<L: Link> {
    id: ConnectionId,
    link: L,
    outbox: VecDeque<Envelope>,
    next_seq: u64,
}

impl<L: Link> Connection<L> {
    pub fn new(id: ConnectionId, link: L) -> Self {
        Self {
            id,
            link,
            outbox: VecDeque::new(),
            next_seq: 1,
        }
    }

    pub fn id(&self) -> ConnectionId {
        self.id
    }

    pub fn remote_id(&self) -> &str {
        self.link.remote_id()
    }

    pub fn is_open(&self) -> bool {
        self.link.is_open()
    }

    /// 队列中尚未发出的消息数
    pub fn queued(&self) -> usize {
        self.outbox.len()
    }

    /// 发送一条消息；连接未打开时排队
    pub async fn send(&mut self, epoch: Epoch, message: PeerMessage) -> Result<(), TransportError> {
        let envelope = Envelope::new(self.next_seq, epoch, message);
        self.next_seq += 1;
        self.outbox.push_back(envelope);

        if self.link.is_open() {
            self.flush().await
        } else {
            trace!(
                "connection {} not open, queued {} message(s)",
                self.id,
                self.outbox.len()
            );
            Ok(())
        }
    }

    /// 按顺序发出队列中的全部消息
    pub async fn flush(&mut self) -> Result<(), TransportError> {
        while let Some(envelope) = self.outbox.front() {
            let text = envelope
                .encode()
                .map_err(|e| TransportError::network(e.to_string()))?;
            self.link.send_text(text).await?;
            self.outbox.pop_front();
        }
        Ok(())
    }

    /// 等待下一个连接事件；Opened 时先冲刷队列
    ///
    /// 冲刷失败会以 Errored 事件的形式返回。
    pub async fn next_event(&mut self) -> LinkEvent {
        let event = self.link.next_event().await;
        if event == LinkEvent::Opened && !self.outbox.is_empty() {
            debug!(
                "connection {} opened, flushing {} queued message(s)",
                self.id,
                self.outbox.len()
            );
            if let Err(e) = self.flush().await {
                return LinkEvent::Errored(e);
            }
        }
        event
    }

    /// 关闭连接并丢弃未发出的消息
    pub async fn close(&mut self) {
        self.outbox.clear();
        self.link.close().await;
    }
}

//! 传输层抽象
//!
//! 核心只依赖这里的 Transport/Endpoint/Link traits：
//! 按 ID 打开端点、按 ID 连接远端、收发任意文本消息，以及打开/关闭/出错等生命周期事件。
//! 信令与穿透由具体实现负责，核心不关心。

use async_trait::async_trait;
use serde::{de::DeserializeOwned, Serialize};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::error::{ProtocolError, Result, TransportError};
use crate::{MAX_FRAME_SIZE, PROTOCOL_VERSION};

/// 连接生命周期事件
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LinkEvent {
    /// 连接已打开，此后才允许发送
    Opened,
    /// 收到一条消息
    Data(String),
    /// 连接已关闭
    Closed,
    /// 连接出错
    Errored(TransportError),
}

/// 一条到对端的连接
///
/// `next_event` 必须可以安全地在 `tokio::select!` 中被取消。
#[async_trait]
pub trait Link: Send {
    /// 对端 ID
    fn remote_id(&self) -> &str;

    /// 是否已收到 Opened 事件且尚未关闭
    fn is_open(&self) -> bool;

    /// 发送一条消息，只能在 Opened 之后调用
    async fn send_text(&mut self, payload: String) -> std::result::Result<(), TransportError>;

    /// 等待下一个生命周期事件；关闭后持续返回 Closed
    async fn next_event(&mut self) -> LinkEvent;

    /// 关闭连接
    async fn close(&mut self);
}

/// 已打开的本地端点
#[async_trait]
pub trait Endpoint: Send {
    type Link: Link;

    /// 本端绑定的 ID
    fn id(&self) -> &str;

    /// 主动连接远端（客人连接房主），返回的连接需等待 Opened
    async fn connect_to(&mut self, remote_id: &str) -> std::result::Result<Self::Link, TransportError>;

    /// 等待远端连入（房主接受客人）
    async fn accept(&mut self) -> std::result::Result<Self::Link, TransportError>;

    /// 关闭端点，释放绑定的 ID
    async fn close(&mut self);
}

/// 传输实现
#[async_trait]
pub trait Transport: Send + Sync {
    type Endpoint: Endpoint;

    /// 打开端点：给定 `bind_id` 时必须绑定到这个精确 ID（房主），否则分配任意 ID（客人）
    async fn open(&self, bind_id: Option<&str>) -> std::result::Result<Self::Endpoint, TransportError>;
}

// ============================================================================
// 帧编解码
// ============================================================================

/// 帧头大小: 1 字节版本 + 4 字节长度
const HEADER_SIZE: usize = 5;

fn map_eof(e: std::io::Error) -> ProtocolError {
    if e.kind() == std::io::ErrorKind::UnexpectedEof {
        ProtocolError::ConnectionClosed
    } else {
        ProtocolError::Io(e)
    }
}

/// 帧读取器
pub struct FrameReader<R> {
    reader: R,
    buffer: Vec<u8>,
}

impl<R: AsyncRead + Unpin + Send> FrameReader<R> {
    /// 创建新的帧读取器
    pub fn new(reader: R) -> Self {
        Self {
            reader,
            buffer: Vec::new(),
        }
    }

    /// 读取一帧的原始负载
    pub async fn read_payload(&mut self) -> Result<&[u8]> {
        // 读取帧头
        let mut header = [0u8; HEADER_SIZE];
        self.reader.read_exact(&mut header).await.map_err(map_eof)?;

        // 解析版本号
        let version = header[0];
        if version != PROTOCOL_VERSION {
            return Err(ProtocolError::VersionMismatch {
                expected: PROTOCOL_VERSION,
                actual: version,
            });
        }

        // 解析长度（大端序）
        let length = u32::from_be_bytes([header[1], header[2], header[3], header[4]]) as usize;
        if length > MAX_FRAME_SIZE {
            return Err(ProtocolError::FrameTooLarge {
                size: length,
                max: MAX_FRAME_SIZE,
            });
        }

        if self.buffer.len() < length {
            self.buffer.resize(length, 0);
        }
        self.reader
            .read_exact(&mut self.buffer[..length])
            .await
            .map_err(map_eof)?;

        Ok(&self.buffer[..length])
    }

    /// 读取并解码一帧 JSON 消息
    pub async fn read_frame<M: DeserializeOwned>(&mut self) -> Result<M> {
        let payload = self.read_payload().await?;
        Ok(serde_json::from_slice(payload)?)
    }

    /// 读取一帧文本
    pub async fn read_text(&mut self) -> Result<String> {
        let payload = self.read_payload().await?;
        String::from_utf8(payload.to_vec()).map_err(|e| {
            ProtocolError::Io(std::io::Error::new(std::io::ErrorKind::InvalidData, e))
        })
    }
}

/// 帧写入器
pub struct FrameWriter<W> {
    writer: W,
}

impl<W: AsyncWrite + Unpin + Send> FrameWriter<W> {
    /// 创建新的帧写入器
    pub fn new(writer: W) -> Self {
        Self { writer }
    }

    /// 写入一帧原始负载
    pub async fn write_payload(&mut self, payload: &[u8]) -> Result<()> {
        if payload.len() > MAX_FRAME_SIZE {
            return Err(ProtocolError::FrameTooLarge {
                size: payload.len(),
                max: MAX_FRAME_SIZE,
            });
        }

        let length = payload.len() as u32;
        let mut header = [0u8; HEADER_SIZE];
        header[0] = PROTOCOL_VERSION;
        header[1..5].copy_from_slice(&length.to_be_bytes());

        self.writer.write_all(&header).await?;
        self.writer.write_all(payload).await?;
        self.writer.flush().await?;

        Ok(())
    }

    /// 编码并写入一帧 JSON 消息
    pub async fn write_frame<M: Serialize>(&mut self, msg: &M) -> Result<()> {
        let payload = serde_json::to_vec(msg)?;
        self.write_payload(&payload).await
    }

    /// 写入一帧文本
    pub async fn write_text(&mut self, text: &str) -> Result<()> {
        self.write_payload(text.as_bytes()).await
    }

    /// 关闭写入端
    pub async fn shutdown(&mut self) -> Result<()> {
        self.writer.shutdown().await?;
        Ok(())
    }
}

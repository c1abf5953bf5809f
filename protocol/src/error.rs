//! 错误类型定义

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// 五子棋规则 / 本地输入错误
///
/// 这类错误同步返回给调用方，发生时状态不做任何修改。
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum GomokuError {
    /// 坐标越界
    #[error("Invalid position: ({row}, {col})")]
    InvalidPosition { row: i32, col: i32 },

    /// 该位置已有棋子
    #[error("Cell ({row}, {col}) is already occupied")]
    Occupied { row: u8, col: u8 },

    /// 不是你的回合
    #[error("Not your turn")]
    NotYourTurn,

    /// 对局尚未开始（等待分配棋色）
    #[error("Game has not started")]
    NotStarted,

    /// 对局已结束
    #[error("Game is already over")]
    GameOver,

    /// 对局进行中，不能重新开始
    #[error("Game is still in progress")]
    GameInProgress,

    /// 已经发出过和棋请求
    #[error("A draw request is already pending")]
    DrawAlreadyRequested,

    /// 没有待回应的和棋请求
    #[error("No draw offer to respond to")]
    NoDrawOffer,

    /// 对手未连接
    #[error("Opponent is not connected")]
    NotConnected,

    /// 与对手的连接仍然有效
    #[error("Already connected to the opponent")]
    AlreadyConnected,

    /// 昵称为空
    #[error("Nickname is empty")]
    NicknameEmpty,

    /// 昵称过长
    #[error("Nickname too long: {len} chars (max: {max})")]
    NicknameTooLong { len: usize, max: usize },

    /// 房间号格式错误
    #[error("Invalid room code: {reason}")]
    InvalidRoomCode { reason: String },

    /// 聊天消息为空
    #[error("Chat message is empty")]
    ChatEmpty,

    /// 聊天消息过长
    #[error("Chat message too long: {len} chars (max: {max})")]
    ChatTooLong { len: usize, max: usize },
}

/// 传输层错误分类
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum TransportErrorKind {
    /// 对方不在线或房间不存在
    RemoteUnavailable,
    /// 网络连接失败
    NetworkFailure,
    /// 信令服务器错误
    ServerFailure,
    /// 请求绑定的地址已被占用（房间号冲突）
    IdTaken,
    /// 连接在限定时间内未建立
    Timeout,
    /// 连接已关闭
    TransportClosed,
}

impl TransportErrorKind {
    /// 是否应向用户提供手动重试
    pub fn is_retryable(&self) -> bool {
        !matches!(self, TransportErrorKind::TransportClosed)
    }
}

impl std::fmt::Display for TransportErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            TransportErrorKind::RemoteUnavailable => "remote-unavailable",
            TransportErrorKind::NetworkFailure => "network-failure",
            TransportErrorKind::ServerFailure => "server-failure",
            TransportErrorKind::IdTaken => "id-taken",
            TransportErrorKind::Timeout => "timeout",
            TransportErrorKind::TransportClosed => "transport-closed",
        };
        f.write_str(name)
    }
}

/// 传输层错误
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("{kind}: {reason}")]
pub struct TransportError {
    pub kind: TransportErrorKind,
    pub reason: String,
}

impl TransportError {
    pub fn new(kind: TransportErrorKind, reason: impl Into<String>) -> Self {
        Self {
            kind,
            reason: reason.into(),
        }
    }

    pub fn remote_unavailable(reason: impl Into<String>) -> Self {
        Self::new(TransportErrorKind::RemoteUnavailable, reason)
    }

    pub fn network(reason: impl Into<String>) -> Self {
        Self::new(TransportErrorKind::NetworkFailure, reason)
    }

    pub fn server(reason: impl Into<String>) -> Self {
        Self::new(TransportErrorKind::ServerFailure, reason)
    }

    pub fn id_taken(id: &str) -> Self {
        Self::new(TransportErrorKind::IdTaken, format!("id {} is already taken", id))
    }

    pub fn timeout() -> Self {
        Self::new(TransportErrorKind::Timeout, "connection was not opened in time")
    }

    pub fn closed() -> Self {
        Self::new(TransportErrorKind::TransportClosed, "connection closed")
    }

    /// 是否应向用户提供手动重试
    pub fn is_retryable(&self) -> bool {
        self.kind.is_retryable()
    }
}

impl From<std::io::Error> for TransportError {
    fn from(err: std::io::Error) -> Self {
        use std::io::ErrorKind;
        match err.kind() {
            ErrorKind::ConnectionRefused => TransportError::remote_unavailable(err.to_string()),
            ErrorKind::AddrInUse => TransportError::new(TransportErrorKind::IdTaken, err.to_string()),
            ErrorKind::UnexpectedEof | ErrorKind::ConnectionReset | ErrorKind::BrokenPipe => {
                TransportError::new(TransportErrorKind::TransportClosed, err.to_string())
            }
            ErrorKind::TimedOut => TransportError::new(TransportErrorKind::Timeout, err.to_string()),
            _ => TransportError::network(err.to_string()),
        }
    }
}

/// 协议错误类型
#[derive(Error, Debug)]
pub enum ProtocolError {
    /// IO 错误
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON 序列化错误
    #[error("JSON serialization error: {0}")]
    Json(#[from] serde_json::Error),

    /// 协议版本不匹配
    #[error("Protocol version mismatch: expected {expected}, got {actual}")]
    VersionMismatch { expected: u8, actual: u8 },

    /// 帧大小超限
    #[error("Frame too large: {size} bytes (max: {max})")]
    FrameTooLarge { size: usize, max: usize },

    /// 消息缺少 type 字段
    #[error("Message has no type field")]
    MissingType,

    /// 未知消息类型
    #[error("Unknown message type: {0}")]
    UnknownMessageType(String),

    /// 连接已关闭
    #[error("Connection closed")]
    ConnectionClosed,

    /// 传输层错误
    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),

    /// 五子棋规则错误
    #[error("Gomoku error: {0}")]
    Gomoku(#[from] GomokuError),
}

/// 协议操作结果类型
pub type Result<T> = std::result::Result<T, ProtocolError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retryable_kinds() {
        assert!(TransportError::remote_unavailable("x").is_retryable());
        assert!(TransportError::network("x").is_retryable());
        assert!(TransportError::server("x").is_retryable());
        assert!(TransportError::timeout().is_retryable());
        assert!(!TransportError::closed().is_retryable());
    }

    #[test]
    fn test_io_error_mapping() {
        let refused = std::io::Error::new(std::io::ErrorKind::ConnectionRefused, "refused");
        assert_eq!(
            TransportError::from(refused).kind,
            TransportErrorKind::RemoteUnavailable
        );

        let eof = std::io::Error::new(std::io::ErrorKind::UnexpectedEof, "eof");
        assert_eq!(
            TransportError::from(eof).kind,
            TransportErrorKind::TransportClosed
        );
    }

    #[test]
    fn test_display() {
        let err = TransportError::id_taken("AB12C9");
        assert_eq!(err.to_string(), "id-taken: id AB12C9 is already taken");
    }
}

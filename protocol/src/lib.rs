//! 五子棋联机共享协议库
//!
//! 包含:
//! - 棋子、坐标、棋盘与五连判定
//! - 房间号
//! - 对等消息与信封 (PeerMessage, Envelope)
//! - 传输层抽象 (Transport, Endpoint, Link traits)
//! - 帧编解码 (FrameReader, FrameWriter)
//! - 进程内与 TCP 两种传输实现

mod board;
mod connection;
mod constants;
mod error;
mod memory;
mod message;
mod room_code;
mod stone;
mod tcp;
mod transport;

pub use board::Board;
pub use connection::Connection;
pub use constants::*;
pub use error::{GomokuError, ProtocolError, Result, TransportError, TransportErrorKind};
pub use memory::{MemoryEndpoint, MemoryLink, MemoryNetwork};
pub use message::{ConnectionId, Envelope, Epoch, PeerMessage, SequenceGuard};
pub use room_code::RoomCode;
pub use stone::{Position, Stone};
pub use tcp::{TcpConfig, TcpEndpoint, TcpLink, TcpTransport};
pub use transport::{Endpoint, FrameReader, FrameWriter, Link, LinkEvent, Transport};

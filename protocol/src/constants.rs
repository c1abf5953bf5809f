//! 协议常量定义

use std::time::Duration;

/// 协议版本号
pub const PROTOCOL_VERSION: u8 = 1;

/// 棋盘边长（15 路）
pub const BOARD_SIZE: usize = 15;

/// 连成几子获胜
pub const WIN_LENGTH: usize = 5;

/// 房间号长度
pub const ROOM_CODE_LEN: usize = 6;

/// 房间号字符集（大写字母 + 数字）
pub const ROOM_CODE_ALPHABET: &str = "ABCDEFGHIJKLMNOPQRSTUVWXYZ0123456789";

/// 昵称最大长度
pub const MAX_NICKNAME_LEN: usize = 20;

/// 单条聊天消息最大长度
pub const MAX_CHAT_LEN: usize = 200;

/// 消息帧最大大小
pub const MAX_FRAME_SIZE: usize = 65536;

/// 连接超时（秒）
pub const CONNECT_TIMEOUT_SECS: u64 = 10;

/// 连接超时 Duration
pub const CONNECT_TIMEOUT: Duration = Duration::from_secs(CONNECT_TIMEOUT_SECS);

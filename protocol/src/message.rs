//! 消息类型定义
//!
//! 线上格式为 JSON 对象，`type` 字段区分消息种类，负载字段使用 camelCase。
//! 每条消息外层包一层信封：协议版本 `v`、连接内单调递增的序号 `seq`、
//! 以及发送方当时的对局轮次 `epoch`。

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::constants::PROTOCOL_VERSION;
use crate::error::{ProtocolError, Result};
use crate::stone::Stone;

/// 连接 ID（同一会话内每换一条连接递增）
pub type ConnectionId = u64;

/// 对局轮次（每次重新开始 / 换连接时推进）
pub type Epoch = u32;

/// 对等端之间交换的消息
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum PeerMessage {
    /// 客人 -> 房主：加入房间
    #[serde(rename = "join", rename_all = "camelCase")]
    Join {
        player_name: String,
        room_code: String,
    },
    /// 房主 -> 客人：欢迎
    #[serde(rename = "welcome", rename_all = "camelCase")]
    Welcome {
        message: String,
        player_name: String,
        room_code: String,
    },
    /// 房主 -> 客人：棋色分配（`is_host` 标记发送方是房主，`is_black` 表示房主执黑）
    #[serde(rename = "colorAssignment", rename_all = "camelCase")]
    ColorAssignment {
        player_name: String,
        is_host: bool,
        is_black: bool,
        current_player: Stone,
    },
    /// 双向：玩家信息同步（仅展示用）
    #[serde(rename = "playerInfo", rename_all = "camelCase")]
    PlayerInfo {
        player_name: String,
        is_host: bool,
        game_started: bool,
    },
    /// 双向：落子
    #[serde(rename = "move")]
    Move { row: u8, col: u8, player: Stone },
    /// 双向：认输，携带胜方颜色
    #[serde(rename = "surrender")]
    Surrender { winner: Stone },
    /// 双向：请求和棋
    #[serde(rename = "draw_request")]
    DrawRequest,
    /// 双向：同意和棋
    #[serde(rename = "draw_accepted")]
    DrawAccepted,
    /// 双向：拒绝和棋
    #[serde(rename = "draw_rejected")]
    DrawRejected,
    /// 双向：重新开始
    #[serde(rename = "restart")]
    Restart,
    /// 双向：聊天
    #[serde(rename = "chat", rename_all = "camelCase")]
    Chat {
        message: String,
        player_name: String,
    },
    /// 双向：房间号同步（兼容旧版本）
    #[serde(rename = "roomCode", rename_all = "camelCase")]
    RoomCode {
        room_code: String,
        player_name: String,
    },
}

impl PeerMessage {
    /// 所有合法的 `type` 取值
    pub const KINDS: [&'static str; 12] = [
        "join",
        "welcome",
        "colorAssignment",
        "playerInfo",
        "move",
        "surrender",
        "draw_request",
        "draw_accepted",
        "draw_rejected",
        "restart",
        "chat",
        "roomCode",
    ];

    /// 消息的 `type` 字段
    pub fn kind(&self) -> &'static str {
        match self {
            PeerMessage::Join { .. } => "join",
            PeerMessage::Welcome { .. } => "welcome",
            PeerMessage::ColorAssignment { .. } => "colorAssignment",
            PeerMessage::PlayerInfo { .. } => "playerInfo",
            PeerMessage::Move { .. } => "move",
            PeerMessage::Surrender { .. } => "surrender",
            PeerMessage::DrawRequest => "draw_request",
            PeerMessage::DrawAccepted => "draw_accepted",
            PeerMessage::DrawRejected => "draw_rejected",
            PeerMessage::Restart => "restart",
            PeerMessage::Chat { .. } => "chat",
            PeerMessage::RoomCode { .. } => "roomCode",
        }
    }

    /// 是否属于某一局棋的消息（旧轮次的此类消息需要丢弃）
    pub fn is_match_scoped(&self) -> bool {
        matches!(
            self,
            PeerMessage::Move { .. }
                | PeerMessage::Surrender { .. }
                | PeerMessage::DrawRequest
                | PeerMessage::DrawAccepted
                | PeerMessage::DrawRejected
        )
    }
}

/// 消息信封
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Envelope {
    /// 协议版本
    pub v: u8,
    /// 连接内序号，从 1 开始
    pub seq: u64,
    /// 发送方的对局轮次
    pub epoch: Epoch,
    #[serde(flatten)]
    pub message: PeerMessage,
}

impl Envelope {
    pub fn new(seq: u64, epoch: Epoch, message: PeerMessage) -> Self {
        Self {
            v: PROTOCOL_VERSION,
            seq,
            epoch,
            message,
        }
    }

    /// 编码为 JSON 文本
    pub fn encode(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }

    /// 从 JSON 文本解码
    ///
    /// 未知的 `type` 单独报告为 [`ProtocolError::UnknownMessageType`]，
    /// 方便上层记录日志后丢弃。
    pub fn decode(text: &str) -> Result<Self> {
        let value: Value = serde_json::from_str(text)?;

        let kind = value
            .get("type")
            .and_then(Value::as_str)
            .ok_or(ProtocolError::MissingType)?;
        if !PeerMessage::KINDS.contains(&kind) {
            return Err(ProtocolError::UnknownMessageType(kind.to_string()));
        }

        let version = value.get("v").and_then(Value::as_u64).unwrap_or(0);
        if version != PROTOCOL_VERSION as u64 {
            return Err(ProtocolError::VersionMismatch {
                expected: PROTOCOL_VERSION,
                actual: version.min(u8::MAX as u64) as u8,
            });
        }

        Ok(serde_json::from_value(value)?)
    }
}

/// 接收方序号检查，拒绝不递增的序号
#[derive(Debug, Default, Clone)]
pub struct SequenceGuard {
    last: Option<u64>,
}

impl SequenceGuard {
    pub fn new() -> Self {
        Self::default()
    }

    /// 序号大于已见过的最大值时接受并记录
    pub fn accept(&mut self, seq: u64) -> bool {
        match self.last {
            Some(last) if seq <= last => false,
            _ => {
                self.last = Some(seq);
                true
            }
        }
    }

    /// 最近接受的序号
    pub fn last(&self) -> Option<u64> {
        self.last
    }

    /// 换连接时重置
    pub fn reset(&mut self) {
        self.last = None;
    }
}

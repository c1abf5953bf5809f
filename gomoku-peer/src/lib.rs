//! 五子棋点对点联机
//!
//! 包含:
//! - 身份与角色、棋色分配
//! - 对局状态机
//! - 会话聚合与消息分发
//! - 和棋询问抽象
//! - 会话驱动（事件循环）
//! - 建房 / 加入流程
//! - 配置与文本控制台

pub mod config;
pub mod console;
pub mod dispatcher;
pub mod driver;
pub mod error;
pub mod identity;
pub mod lobby;
pub mod match_state;
pub mod prompt;
pub mod session;

pub use config::{IceServer, PeerConfig, SignalingConfig};
pub use dispatcher::MessageHandler;
pub use driver::{LocalCommand, SessionCommander, SessionDriver, SessionHandle};
pub use error::{Result, SessionError};
pub use identity::{validate_name, ColorAssignment, Identity, Role};
pub use lobby::Lobby;
pub use match_state::{DrawFlags, MatchState, MatchStatus, Outcome, WinReason};
pub use prompt::{AutoPrompt, ChannelPrompt, DrawPrompt, DrawQuestion};
pub use session::{ChatLine, Outgoing, Pending, Session, SessionEvent, SessionSnapshot};

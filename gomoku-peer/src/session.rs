//! 会话聚合
//!
//! 一个 `Session` 持有身份、棋盘、对局状态、聊天记录和当前连接编号，
//! 在"创建/加入房间"时构造，退出时整体丢弃。
//! 所有本地操作与远端消息都只通过 `&mut Session` 同步修改状态，
//! 需要发出的消息和需要通知界面的事件先收集进 [`Pending`]，由驱动层统一冲刷。

use chrono::{DateTime, Utc};
use rand::rngs::StdRng;
use rand::SeedableRng;
use serde::Serialize;
use tracing::{debug, info};

use protocol::{
    Board, ConnectionId, Epoch, GomokuError, PeerMessage, Position, RoomCode, SequenceGuard,
    Stone, TransportErrorKind, MAX_CHAT_LEN,
};

use crate::identity::{ColorAssignment, Identity, Role};
use crate::match_state::{DrawFlags, MatchState, MatchStatus, Outcome, WinReason};

/// 一条聊天记录
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ChatLine {
    pub from: String,
    pub message: String,
    /// 是否为本地玩家发出
    pub local: bool,
    pub at: DateTime<Utc>,
}

/// 推送给界面的事件
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum SessionEvent {
    /// 与对手的连接已打开
    Connected { connection: ConnectionId },
    /// 得知对手昵称
    OpponentJoined { name: String },
    /// 对手同步了身份信息
    OpponentInfo {
        name: String,
        is_host: bool,
        game_started: bool,
    },
    /// 显示的房间号变化
    RoomCodeChanged { room_code: RoomCode },
    /// 对局开始
    MatchStarted {
        epoch: Epoch,
        local_color: Stone,
        host_is_black: bool,
    },
    /// 一颗棋子落下
    StonePlaced {
        row: u8,
        col: u8,
        color: Stone,
        local: bool,
    },
    /// 对手请求和棋，等待回应
    DrawOffered { from: String },
    /// 对手拒绝了我方的和棋请求
    DrawDeclined,
    /// 对局结束
    MatchEnded { outcome: Outcome },
    /// 重新开始，等待分配棋色
    Restarted { epoch: Epoch, local: bool },
    /// 聊天消息
    Chat { line: ChatLine },
    /// 对手断开
    Disconnected,
    /// 传输层出错
    TransportFailed {
        kind: TransportErrorKind,
        reason: String,
        retryable: bool,
    },
}

/// 一条待发送的消息，携带生成时的轮次
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Outgoing {
    pub epoch: Epoch,
    pub message: PeerMessage,
}

/// 一次处理产生的副作用
#[derive(Debug, Default)]
pub struct Pending {
    pub messages: Vec<Outgoing>,
    pub events: Vec<SessionEvent>,
}

impl Pending {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn send(&mut self, epoch: Epoch, message: PeerMessage) {
        self.messages.push(Outgoing { epoch, message });
    }

    pub fn notify(&mut self, event: SessionEvent) {
        self.events.push(event);
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty() && self.events.is_empty()
    }
}

/// 供界面渲染的只读快照
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SessionSnapshot {
    pub role: Role,
    pub room_code: RoomCode,
    pub local_name: String,
    pub opponent_name: Option<String>,
    pub connected: bool,
    #[serde(flatten)]
    pub status: MatchStatus,
    pub epoch: Epoch,
    pub turn: Stone,
    pub local_color: Option<Stone>,
    pub remote_color: Option<Stone>,
    pub draw: DrawFlags,
    pub move_count: u32,
    pub board: Vec<Vec<Option<Stone>>>,
    pub chat: Vec<ChatLine>,
}

impl SessionSnapshot {
    /// 当前是否轮到本地玩家
    pub fn is_my_turn(&self) -> bool {
        self.status == MatchStatus::Active && self.local_color == Some(self.turn)
    }

    pub fn cell(&self, row: usize, col: usize) -> Option<Stone> {
        self.board.get(row).and_then(|r| r.get(col)).copied().flatten()
    }
}

/// 五子棋对等会话
pub struct Session {
    pub(crate) identity: Identity,
    pub(crate) board: Board,
    pub(crate) state: MatchState,
    pub(crate) chat: Vec<ChatLine>,
    pub(crate) connection: Option<ConnectionId>,
    pub(crate) inbound: SequenceGuard,
    host_color: Option<Stone>,
    rng: StdRng,
}

impl Session {
    pub fn new(identity: Identity) -> Self {
        Self {
            identity,
            board: Board::empty(),
            state: MatchState::new(),
            chat: Vec::new(),
            connection: None,
            inbound: SequenceGuard::new(),
            host_color: None,
            rng: StdRng::from_entropy(),
        }
    }

    /// 房主的执子偏好，`None` 表示随机
    pub fn with_host_color(mut self, color: Option<Stone>) -> Self {
        self.host_color = color;
        self
    }

    pub fn identity(&self) -> &Identity {
        &self.identity
    }

    pub fn role(&self) -> Role {
        self.identity.role()
    }

    pub fn board(&self) -> &Board {
        &self.board
    }

    pub fn state(&self) -> &MatchState {
        &self.state
    }

    pub fn chat(&self) -> &[ChatLine] {
        &self.chat
    }

    pub fn connection(&self) -> Option<ConnectionId> {
        self.connection
    }

    pub fn is_connected(&self) -> bool {
        self.connection.is_some()
    }

    pub fn epoch(&self) -> Epoch {
        self.state.epoch()
    }

    /// 本局本地棋色，未分配时为 `None`
    pub fn local_color(&self) -> Option<Stone> {
        self.state
            .assignment()
            .map(|a| a.local_color(self.identity.role()))
    }

    /// 本局对手棋色
    pub fn remote_color(&self) -> Option<Stone> {
        self.state
            .assignment()
            .map(|a| a.remote_color(self.identity.role()))
    }

    pub fn snapshot(&self) -> SessionSnapshot {
        SessionSnapshot {
            role: self.identity.role(),
            room_code: self.identity.room_code().clone(),
            local_name: self.identity.local_name().to_string(),
            opponent_name: self.identity.opponent_name().map(str::to_string),
            connected: self.is_connected(),
            status: self.state.status(),
            epoch: self.state.epoch(),
            turn: self.state.turn(),
            local_color: self.local_color(),
            remote_color: self.remote_color(),
            draw: self.state.draw(),
            move_count: self.state.move_count(),
            board: self.board.rows().map(|row| row.to_vec()).collect(),
            chat: self.chat.clone(),
        }
    }

    fn ensure_connected(&self) -> Result<ConnectionId, GomokuError> {
        self.connection.ok_or(GomokuError::NotConnected)
    }

    // ========================================================================
    // 连接生命周期
    // ========================================================================

    /// 与对手的连接已打开
    ///
    /// 房主发送欢迎消息并立即分配棋色；客人发送加入请求。
    pub fn on_connected(&mut self, connection: ConnectionId, pending: &mut Pending) {
        info!(
            "connection {} opened as {:?} in room {}",
            connection,
            self.role(),
            self.identity.room_code()
        );
        self.connection = Some(connection);
        self.inbound.reset();
        self.state.reset_for_connection();
        self.board.reset();
        if self.role().is_host() {
            self.identity.clear_opponent();
        }
        pending.notify(SessionEvent::Connected { connection });

        let epoch = self.epoch();
        let name = self.identity.local_name().to_string();
        let room_code = self.identity.room_code().to_string();
        match self.role() {
            Role::Host => {
                pending.send(
                    epoch,
                    PeerMessage::Welcome {
                        message: format!("欢迎加入 {} 的房间", name),
                        player_name: name,
                        room_code,
                    },
                );
                self.start_as_host(pending);
            }
            Role::Guest => {
                pending.send(
                    epoch,
                    PeerMessage::Join {
                        player_name: name,
                        room_code,
                    },
                );
            }
        }
    }

    /// 对手断开；棋盘保留供查看，但不再接受落子
    pub fn on_disconnected(&mut self, pending: &mut Pending) {
        if self.connection.take().is_some() {
            info!("opponent disconnected from room {}", self.identity.room_code());
            pending.notify(SessionEvent::Disconnected);
        }
    }

    /// 房主分配棋色并开局；同一连接与轮次只会执行一次
    pub(crate) fn start_as_host(&mut self, pending: &mut Pending) {
        if !self.role().is_host() {
            return;
        }
        let Some(connection) = self.connection else {
            return;
        };
        if self.state.has_started(connection) {
            debug!("match already started for connection {}", connection);
            return;
        }

        let assignment = ColorAssignment::roll(self.host_color, &mut self.rng);
        if !self.state.try_start(connection, assignment) {
            return;
        }
        self.board.reset();

        let epoch = self.epoch();
        info!(
            "match started (epoch {}), host is {}",
            epoch,
            assignment.local_color(Role::Host)
        );
        pending.send(
            epoch,
            PeerMessage::ColorAssignment {
                player_name: self.identity.local_name().to_string(),
                is_host: true,
                is_black: assignment.host_is_black,
                current_player: Stone::Black,
            },
        );
        pending.notify(SessionEvent::MatchStarted {
            epoch,
            local_color: assignment.local_color(Role::Host),
            host_is_black: assignment.host_is_black,
        });
    }

    /// 在棋盘上落下一子并推进对局，调用方已确认轮次
    pub(crate) fn apply_move(&mut self, pos: Position, color: Stone) -> Result<(), GomokuError> {
        self.board.place(pos, color)?;
        let won = self.board.check_win(pos);
        self.state.record_move(color, won);
        if !won && self.board.is_full() {
            self.state.end(Outcome::Draw);
        }
        Ok(())
    }

    /// 清空棋盘并回到等待分配，本地与远端重新开始共用
    pub(crate) fn reset_match(&mut self, epoch: Epoch) {
        self.state.adopt_epoch(epoch);
        self.board.reset();
    }

    // ========================================================================
    // 本地操作
    // ========================================================================

    /// 本地落子
    pub fn place_stone(&mut self, row: i32, col: i32, pending: &mut Pending) -> Result<(), GomokuError> {
        self.ensure_connected()?;
        let color = self.local_color().ok_or(GomokuError::NotStarted)?;
        self.state.ensure_turn(color)?;
        let pos = Position::try_new(row, col)?;
        self.apply_move(pos, color)?;

        let epoch = self.epoch();
        pending.send(
            epoch,
            PeerMessage::Move {
                row: pos.row,
                col: pos.col,
                player: color,
            },
        );
        pending.notify(SessionEvent::StonePlaced {
            row: pos.row,
            col: pos.col,
            color,
            local: true,
        });
        if let Some(outcome) = self.state.outcome() {
            info!("match ended after local move {}: {:?}", pos, outcome);
            pending.notify(SessionEvent::MatchEnded { outcome });
        }
        Ok(())
    }

    /// 认输，胜方为对手棋色
    pub fn surrender(&mut self, pending: &mut Pending) -> Result<(), GomokuError> {
        self.ensure_connected()?;
        self.state.ensure_active()?;
        // 胜方总是对手棋色，与当前轮到谁无关；在对手回合认输也不会判自己胜
        let winner = self.remote_color().ok_or(GomokuError::NotStarted)?;
        let outcome = Outcome::Win {
            winner,
            reason: WinReason::Surrender,
        };
        self.state.end(outcome);

        info!("surrendered, {} wins", winner);
        pending.send(self.epoch(), PeerMessage::Surrender { winner });
        pending.notify(SessionEvent::MatchEnded { outcome });
        Ok(())
    }

    /// 请求和棋
    pub fn request_draw(&mut self, pending: &mut Pending) -> Result<(), GomokuError> {
        self.ensure_connected()?;
        self.state.request_draw()?;
        pending.send(self.epoch(), PeerMessage::DrawRequest);
        Ok(())
    }

    /// 回应对手的和棋请求
    pub fn respond_draw(&mut self, accept: bool, pending: &mut Pending) -> Result<(), GomokuError> {
        self.ensure_connected()?;
        self.state.respond_draw(accept)?;

        let epoch = self.epoch();
        if accept {
            pending.send(epoch, PeerMessage::DrawAccepted);
            pending.notify(SessionEvent::MatchEnded {
                outcome: Outcome::Draw,
            });
        } else {
            pending.send(epoch, PeerMessage::DrawRejected);
        }
        Ok(())
    }

    /// 是否有待回应的对手和棋请求
    pub fn draw_offer_pending(&self) -> bool {
        self.state.is_active() && self.state.draw().sent_by_opponent
    }

    /// 重新开始；对局进行中不允许
    pub fn restart(&mut self, pending: &mut Pending) -> Result<(), GomokuError> {
        self.ensure_connected()?;
        self.state.ensure_restartable()?;

        let epoch = self.epoch() + 1;
        self.reset_match(epoch);
        info!("restarting match, epoch {}", epoch);
        pending.send(epoch, PeerMessage::Restart);
        pending.notify(SessionEvent::Restarted { epoch, local: true });
        self.start_as_host(pending);
        Ok(())
    }

    /// 发送聊天消息
    pub fn send_chat(&mut self, text: &str, pending: &mut Pending) -> Result<(), GomokuError> {
        let message = text.trim();
        if message.is_empty() {
            return Err(GomokuError::ChatEmpty);
        }
        let len = message.chars().count();
        if len > MAX_CHAT_LEN {
            return Err(GomokuError::ChatTooLong {
                len,
                max: MAX_CHAT_LEN,
            });
        }
        self.ensure_connected()?;

        let name = self.identity.local_name().to_string();
        let line = self.record_chat(name.clone(), message.to_string(), true);
        pending.send(
            self.epoch(),
            PeerMessage::Chat {
                message: message.to_string(),
                player_name: name,
            },
        );
        pending.notify(SessionEvent::Chat { line });
        Ok(())
    }

    pub(crate) fn record_chat(&mut self, from: String, message: String, local: bool) -> ChatLine {
        let line = ChatLine {
            from,
            message,
            local,
            at: Utc::now(),
        };
        self.chat.push(line.clone());
        line
    }
}

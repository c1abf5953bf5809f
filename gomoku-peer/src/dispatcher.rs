//! 消息分发
//!
//! 收到的每条文本先解码为信封，依次检查序号与轮次，再按消息类型分发。
//! 无法解码、未知类型、重复、过期或与当前状态不符的消息一律记录日志后丢弃，不会中断会话。

use tracing::{debug, warn};

use protocol::{
    ConnectionId, Envelope, Epoch, PeerMessage, Position, ProtocolError, RoomCode, Stone,
    MAX_CHAT_LEN,
};

use crate::identity::ColorAssignment;
use crate::match_state::{MatchStatus, Outcome, WinReason};
use crate::session::{Pending, Session, SessionEvent};

/// 消息处理器
pub struct MessageHandler;

impl MessageHandler {
    /// 处理一条来自对手的原始消息
    pub fn handle(session: &mut Session, text: &str) -> Pending {
        let mut pending = Pending::new();
        match Envelope::decode(text) {
            Ok(envelope) => Self::dispatch(session, &mut pending, envelope),
            Err(ProtocolError::UnknownMessageType(kind)) => {
                warn!("ignoring message of unknown type '{}'", kind);
            }
            Err(e) => {
                warn!("dropping undecodable message: {}", e);
            }
        }
        pending
    }

    /// 检查序号与轮次后分发一条已解码的消息
    pub fn dispatch(session: &mut Session, pending: &mut Pending, envelope: Envelope) {
        let Some(connection) = session.connection() else {
            warn!("dropping {} received without an open connection", envelope.message.kind());
            return;
        };

        if !session.inbound.accept(envelope.seq) {
            warn!(
                "dropping duplicate {} (seq {}, last accepted {:?})",
                envelope.message.kind(),
                envelope.seq,
                session.inbound.last()
            );
            return;
        }

        let local_epoch = session.epoch();
        if envelope.message.is_match_scoped() && envelope.epoch != local_epoch {
            warn!(
                "dropping stale {} from epoch {} (current {})",
                envelope.message.kind(),
                envelope.epoch,
                local_epoch
            );
            return;
        }

        debug!(
            "recv {} seq={} epoch={}",
            envelope.message.kind(),
            envelope.seq,
            envelope.epoch
        );

        let epoch = envelope.epoch;
        match envelope.message {
            PeerMessage::Join {
                player_name,
                room_code,
            } => Self::handle_join(session, pending, player_name, room_code),
            PeerMessage::Welcome {
                message,
                player_name,
                room_code,
            } => Self::handle_welcome(session, pending, message, player_name, room_code),
            PeerMessage::ColorAssignment {
                player_name,
                is_host,
                is_black,
                current_player,
            } => Self::handle_color_assignment(
                session,
                pending,
                connection,
                epoch,
                player_name,
                is_host,
                is_black,
                current_player,
            ),
            PeerMessage::PlayerInfo {
                player_name,
                is_host,
                game_started,
            } => Self::handle_player_info(session, pending, player_name, is_host, game_started),
            PeerMessage::Move { row, col, player } => {
                Self::handle_move(session, pending, row, col, player)
            }
            PeerMessage::Surrender { winner } => Self::handle_surrender(session, pending, winner),
            PeerMessage::DrawRequest => Self::handle_draw_request(session, pending),
            PeerMessage::DrawAccepted => Self::handle_draw_answer(session, pending, true),
            PeerMessage::DrawRejected => Self::handle_draw_answer(session, pending, false),
            PeerMessage::Restart => Self::handle_restart(session, pending, epoch),
            PeerMessage::Chat {
                message,
                player_name,
            } => Self::handle_chat(session, pending, message, player_name),
            PeerMessage::RoomCode {
                room_code,
                player_name,
            } => Self::handle_room_code(session, pending, room_code, player_name),
        }
    }

    /// 处理加入请求（房主）
    fn handle_join(
        session: &mut Session,
        pending: &mut Pending,
        player_name: String,
        room_code: String,
    ) {
        if !session.role().is_host() {
            warn!("guest received join, ignoring");
            return;
        }

        if session.identity.set_opponent_name(&player_name) {
            pending.notify(SessionEvent::OpponentJoined {
                name: session.identity.opponent_display().to_string(),
            });
        }

        // 房主的房间号就是绑定地址，以本地为准并告知对方
        let own = session.identity.room_code().clone();
        if RoomCode::parse(&room_code).ok().as_ref() != Some(&own) {
            warn!(
                "guest joined with room code '{}', keeping {}",
                room_code, own
            );
            pending.send(
                session.epoch(),
                PeerMessage::RoomCode {
                    room_code: own.to_string(),
                    player_name: session.identity.local_name().to_string(),
                },
            );
        }
    }

    /// 处理欢迎消息（客人）
    fn handle_welcome(
        session: &mut Session,
        pending: &mut Pending,
        message: String,
        player_name: String,
        room_code: String,
    ) {
        if session.role().is_host() {
            warn!("host received welcome, ignoring");
            return;
        }
        debug!("welcome: {}", message);

        if session.identity.set_opponent_name(&player_name) {
            pending.notify(SessionEvent::OpponentJoined {
                name: session.identity.opponent_display().to_string(),
            });
        }
        Self::reconcile_room_code(session, pending, &room_code);
    }

    /// 处理棋色分配（客人）
    #[allow(clippy::too_many_arguments)]
    fn handle_color_assignment(
        session: &mut Session,
        pending: &mut Pending,
        connection: ConnectionId,
        epoch: Epoch,
        player_name: String,
        is_host: bool,
        is_black: bool,
        current_player: Stone,
    ) {
        if session.role().is_host() || !is_host {
            warn!("color assignment must come from the host, ignoring");
            return;
        }

        let local_epoch = session.epoch();
        if epoch < local_epoch {
            warn!(
                "dropping stale color assignment from epoch {} (current {})",
                epoch, local_epoch
            );
            return;
        }
        if epoch > local_epoch {
            // 对方已经重新开始，跟上它的轮次
            session.reset_match(epoch);
        }
        if current_player != Stone::Black {
            warn!("host announced {} to move first, black always starts", current_player);
        }

        session.identity.set_opponent_name(&player_name);

        let assignment = ColorAssignment::new(is_black);
        if !session.state.try_start(connection, assignment) {
            debug!("match already started for epoch {}, ignoring", epoch);
            return;
        }
        session.board.reset();

        let local_color = assignment.local_color(session.role());
        pending.notify(SessionEvent::MatchStarted {
            epoch,
            local_color,
            host_is_black: is_black,
        });
        pending.send(
            epoch,
            PeerMessage::PlayerInfo {
                player_name: session.identity.local_name().to_string(),
                is_host: false,
                game_started: true,
            },
        );
    }

    /// 处理玩家信息同步，只更新显示信息
    fn handle_player_info(
        session: &mut Session,
        pending: &mut Pending,
        player_name: String,
        is_host: bool,
        game_started: bool,
    ) {
        if is_host == session.role().is_host() {
            warn!("opponent claims the same role as us (is_host = {})", is_host);
        }
        session.identity.set_opponent_name(&player_name);
        pending.notify(SessionEvent::OpponentInfo {
            name: session.identity.opponent_display().to_string(),
            is_host,
            game_started,
        });
    }

    /// 处理对手落子
    fn handle_move(session: &mut Session, pending: &mut Pending, row: u8, col: u8, player: Stone) {
        match session.state.status() {
            MatchStatus::Active => {}
            MatchStatus::Unassigned => {
                warn!("move ({}, {}) before the match started, ignoring", row, col);
                return;
            }
            MatchStatus::Ended { .. } => {
                debug!("move ({}, {}) after the match ended, ignoring", row, col);
                return;
            }
        }

        if session.remote_color() != Some(player) {
            warn!("opponent sent a move for {}, which is not their color", player);
            return;
        }
        if let Err(e) = session.state.ensure_turn(player) {
            warn!("move for {} out of turn: {}", player, e);
            return;
        }
        let Some(pos) = Position::new(row, col) else {
            warn!("move ({}, {}) is off the board", row, col);
            return;
        };
        if let Err(e) = session.apply_move(pos, player) {
            warn!("ignoring conflicting move: {}", e);
            return;
        }

        pending.notify(SessionEvent::StonePlaced {
            row,
            col,
            color: player,
            local: false,
        });
        if let Some(outcome) = session.state.outcome() {
            pending.notify(SessionEvent::MatchEnded { outcome });
        }
    }

    /// 处理对手认输，以消息中的胜方为准
    fn handle_surrender(session: &mut Session, pending: &mut Pending, winner: Stone) {
        if !session.state.is_active() {
            debug!("surrender while not active, ignoring");
            return;
        }
        if session.local_color() != Some(winner) {
            warn!("opponent surrendered naming {} as winner", winner);
        }
        let outcome = Outcome::Win {
            winner,
            reason: WinReason::Surrender,
        };
        session.state.end(outcome);
        pending.notify(SessionEvent::MatchEnded { outcome });
    }

    /// 处理和棋请求
    fn handle_draw_request(session: &mut Session, pending: &mut Pending) {
        if !session.state.receive_draw_request() {
            debug!("ignoring draw request (not active or already pending)");
            return;
        }
        pending.notify(SessionEvent::DrawOffered {
            from: session.identity.opponent_display().to_string(),
        });
    }

    /// 处理对手对我方和棋请求的回应
    fn handle_draw_answer(session: &mut Session, pending: &mut Pending, accepted: bool) {
        if !session.state.draw_answered(accepted) {
            warn!("draw answer without an outstanding request, ignoring");
            return;
        }
        if accepted {
            pending.notify(SessionEvent::MatchEnded {
                outcome: Outcome::Draw,
            });
        } else {
            pending.notify(SessionEvent::DrawDeclined);
        }
    }

    /// 处理重新开始；轮次不新于本地时说明双方同时发起，已经处理过
    fn handle_restart(session: &mut Session, pending: &mut Pending, epoch: Epoch) {
        let local_epoch = session.epoch();
        if epoch <= local_epoch {
            debug!(
                "restart for epoch {} already applied (current {})",
                epoch, local_epoch
            );
            return;
        }

        session.reset_match(epoch);
        pending.notify(SessionEvent::Restarted {
            epoch,
            local: false,
        });
        session.start_as_host(pending);
    }

    /// 处理聊天消息，只记录不影响对局
    fn handle_chat(
        session: &mut Session,
        pending: &mut Pending,
        message: String,
        player_name: String,
    ) {
        let message = message.trim();
        if message.is_empty() {
            return;
        }
        let message: String = message.chars().take(MAX_CHAT_LEN).collect();
        let from = match player_name.trim() {
            "" => session.identity.opponent_display().to_string(),
            name => name.to_string(),
        };
        let line = session.record_chat(from, message, false);
        pending.notify(SessionEvent::Chat { line });
    }

    /// 处理房间号同步
    fn handle_room_code(
        session: &mut Session,
        pending: &mut Pending,
        room_code: String,
        player_name: String,
    ) {
        session.identity.set_opponent_name(&player_name);
        if session.role().is_host() {
            if RoomCode::parse(&room_code).ok().as_ref() != Some(session.identity.room_code()) {
                warn!("guest reports room code '{}', keeping ours", room_code);
            }
            return;
        }
        Self::reconcile_room_code(session, pending, &room_code);
    }

    fn reconcile_room_code(session: &mut Session, pending: &mut Pending, room_code: &str) {
        match RoomCode::parse(room_code) {
            Ok(code) => {
                if session.identity.set_room_code(code.clone()) {
                    debug!("room code reconciled to {}", code);
                    pending.notify(SessionEvent::RoomCodeChanged { room_code: code });
                }
            }
            Err(e) => warn!("host sent an invalid room code: {}", e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::identity::{Identity, Role};
    use protocol::GomokuError;

    /// 模拟一条有序信道：为每条发出的消息盖上递增序号
    struct Wire {
        next_seq: u64,
    }

    impl Wire {
        fn new() -> Self {
            Self { next_seq: 1 }
        }

        fn encode(&mut self, pending: &Pending) -> Vec<String> {
            pending
                .messages
                .iter()
                .map(|out| {
                    let env = Envelope::new(self.next_seq, out.epoch, out.message.clone());
                    self.next_seq += 1;
                    env.encode().unwrap()
                })
                .collect()
        }
    }

    struct Pair {
        host: Session,
        guest: Session,
        to_guest: Wire,
        to_host: Wire,
    }

    impl Pair {
        /// 建立连接并完成开局，房主执黑
        fn connected() -> Self {
            let code = RoomCode::parse("AB12C9").unwrap();
            let host = Session::new(Identity::new(Role::Host, "房主", code.clone()).unwrap())
                .with_host_color(Some(Stone::Black));
            let guest = Session::new(Identity::new(Role::Guest, "客人", code).unwrap());
            let mut pair = Self {
                host,
                guest,
                to_guest: Wire::new(),
                to_host: Wire::new(),
            };

            let mut host_out = Pending::new();
            pair.host.on_connected(1, &mut host_out);
            let mut guest_out = Pending::new();
            pair.guest.on_connected(1, &mut guest_out);
            pair.pump_from_host(host_out);
            pair.pump_from_guest(guest_out);
            pair
        }

        /// 把房主发出的消息交给客人，并递归投递回应
        fn pump_from_host(&mut self, pending: Pending) -> Vec<SessionEvent> {
            let mut events = Vec::new();
            for text in self.to_guest.encode(&pending) {
                let reply = MessageHandler::handle(&mut self.guest, &text);
                events.extend(reply.events.iter().cloned());
                self.pump_from_guest(reply);
            }
            events
        }

        fn pump_from_guest(&mut self, pending: Pending) -> Vec<SessionEvent> {
            let mut events = Vec::new();
            for text in self.to_host.encode(&pending) {
                let reply = MessageHandler::handle(&mut self.host, &text);
                events.extend(reply.events.iter().cloned());
                self.pump_from_host(reply);
            }
            events
        }

        fn host_move(&mut self, row: i32, col: i32) -> Vec<SessionEvent> {
            let mut out = Pending::new();
            self.host.place_stone(row, col, &mut out).unwrap();
            self.pump_from_host(out)
        }

        fn guest_move(&mut self, row: i32, col: i32) -> Vec<SessionEvent> {
            let mut out = Pending::new();
            self.guest.place_stone(row, col, &mut out).unwrap();
            self.pump_from_guest(out)
        }
    }

    #[test]
    fn test_handshake_assigns_colors() {
        let pair = Pair::connected();
        assert_eq!(pair.host.local_color(), Some(Stone::Black));
        assert_eq!(pair.guest.local_color(), Some(Stone::White));
        assert!(pair.host.state().is_active());
        assert!(pair.guest.state().is_active());
        assert_eq!(pair.guest.state().turn(), Stone::Black);
        assert_eq!(pair.host.identity().opponent_name(), Some("客人"));
        assert_eq!(pair.guest.identity().opponent_name(), Some("房主"));
    }

    #[test]
    fn test_moves_replicate_and_win() {
        let mut pair = Pair::connected();
        for i in 0..4 {
            pair.host_move(7 + i, 7);
            pair.guest_move(7 + i, 8);
        }
        let events = pair.host_move(11, 7);
        assert!(events.contains(&SessionEvent::MatchEnded {
            outcome: Outcome::Win {
                winner: Stone::Black,
                reason: WinReason::FiveInRow
            }
        }));
        assert_eq!(pair.host.state().outcome(), pair.guest.state().outcome());
        assert_eq!(pair.host.board(), pair.guest.board());
    }

    #[test]
    fn test_move_after_end_is_ignored() {
        let mut pair = Pair::connected();
        let mut out = Pending::new();
        pair.guest.surrender(&mut out).unwrap();
        pair.pump_from_guest(out);
        assert!(pair.host.state().is_ended());

        let board = pair.host.board().clone();
        let status = pair.host.state().status();
        let text = Envelope::new(
            pair.to_host.next_seq,
            0,
            PeerMessage::Move {
                row: 0,
                col: 0,
                player: Stone::White,
            },
        )
        .encode()
        .unwrap();
        let reply = MessageHandler::handle(&mut pair.host, &text);
        assert!(reply.is_empty());
        assert_eq!(pair.host.board(), &board);
        assert_eq!(pair.host.state().status(), status);
    }

    #[test]
    fn test_surrender_winner_agrees() {
        let mut pair = Pair::connected();
        let mut out = Pending::new();
        pair.host.surrender(&mut out).unwrap();
        pair.pump_from_host(out);
        let expected = Some(Outcome::Win {
            winner: Stone::White,
            reason: WinReason::Surrender,
        });
        assert_eq!(pair.host.state().outcome(), expected);
        assert_eq!(pair.guest.state().outcome(), expected);
    }

    #[test]
    fn test_wrong_color_move_dropped() {
        let mut pair = Pair::connected();
        // 客人冒充黑棋落子
        let text = Envelope::new(
            pair.to_host.next_seq,
            0,
            PeerMessage::Move {
                row: 3,
                col: 3,
                player: Stone::Black,
            },
        )
        .encode()
        .unwrap();
        let reply = MessageHandler::handle(&mut pair.host, &text);
        assert!(reply.is_empty());
        assert_eq!(pair.host.board().stone_count(), 0);
        assert_eq!(pair.host.state().turn(), Stone::Black);
    }

    #[test]
    fn test_duplicate_seq_dropped() {
        let mut pair = Pair::connected();
        let mut out = Pending::new();
        pair.host.place_stone(7, 7, &mut out).unwrap();
        let texts = pair.to_guest.encode(&out);
        let first = MessageHandler::handle(&mut pair.guest, &texts[0]);
        assert_eq!(first.events.len(), 1);
        // 同一条消息再次到达
        let again = MessageHandler::handle(&mut pair.guest, &texts[0]);
        assert!(again.is_empty());
        assert_eq!(pair.guest.board().stone_count(), 1);
        assert_eq!(pair.guest.state().turn(), Stone::White);
    }

    #[test]
    fn test_unknown_and_garbage_ignored() {
        let mut pair = Pair::connected();
        assert!(MessageHandler::handle(&mut pair.host, r#"{"v":1,"seq":99,"epoch":0,"type":"spectate"}"#).is_empty());
        assert!(MessageHandler::handle(&mut pair.host, "not json").is_empty());
        assert!(pair.host.state().is_active());
    }

    #[test]
    fn test_draw_accept_flow() {
        let mut pair = Pair::connected();
        let mut out = Pending::new();
        pair.host.request_draw(&mut out).unwrap();
        let events = pair.pump_from_host(out);
        assert_eq!(
            events,
            vec![SessionEvent::DrawOffered {
                from: "房主".to_string()
            }]
        );
        assert!(pair.guest.draw_offer_pending());

        let mut out = Pending::new();
        pair.guest.respond_draw(true, &mut out).unwrap();
        pair.pump_from_guest(out);
        assert_eq!(pair.host.state().outcome(), Some(Outcome::Draw));
        assert_eq!(pair.guest.state().outcome(), Some(Outcome::Draw));
    }

    #[test]
    fn test_draw_reject_flow() {
        let mut pair = Pair::connected();
        let mut out = Pending::new();
        pair.guest.request_draw(&mut out).unwrap();
        pair.pump_from_guest(out);

        let mut out = Pending::new();
        pair.host.respond_draw(false, &mut out).unwrap();
        let events = pair.pump_from_host(out);
        assert_eq!(events, vec![SessionEvent::DrawDeclined]);
        assert!(!pair.guest.state().draw().sent_by_me);
        assert!(!pair.host.state().draw().sent_by_opponent);
        assert!(pair.host.state().is_active());
        assert!(pair.guest.state().is_active());
    }

    #[test]
    fn test_guest_restart_triggers_new_assignment() {
        let mut pair = Pair::connected();
        let mut out = Pending::new();
        pair.guest.surrender(&mut out).unwrap();
        pair.pump_from_guest(out);

        let mut out = Pending::new();
        pair.guest.restart(&mut out).unwrap();
        assert_eq!(pair.guest.state().status(), MatchStatus::Unassigned);
        pair.pump_from_guest(out);

        assert_eq!(pair.host.epoch(), 1);
        assert_eq!(pair.guest.epoch(), 1);
        assert!(pair.host.state().is_active());
        assert!(pair.guest.state().is_active());
        assert_eq!(pair.guest.board().stone_count(), 0);
    }

    #[test]
    fn test_simultaneous_restart_converges() {
        let mut pair = Pair::connected();
        let mut out = Pending::new();
        pair.host.surrender(&mut out).unwrap();
        pair.pump_from_host(out);

        // 双方同时点击重新开始，消息在途中交错
        let mut host_out = Pending::new();
        pair.host.restart(&mut host_out).unwrap();
        let mut guest_out = Pending::new();
        pair.guest.restart(&mut guest_out).unwrap();
        pair.pump_from_host(host_out);
        pair.pump_from_guest(guest_out);

        assert_eq!(pair.host.epoch(), 1);
        assert_eq!(pair.guest.epoch(), 1);
        assert!(pair.host.state().is_active());
        assert!(pair.guest.state().is_active());
        assert_eq!(pair.host.local_color(), Some(Stone::Black));
        assert_eq!(pair.guest.local_color(), Some(Stone::White));
    }

    #[test]
    fn test_stale_draw_request_dropped_after_restart() {
        let mut pair = Pair::connected();
        let mut out = Pending::new();
        pair.host.surrender(&mut out).unwrap();
        pair.pump_from_host(out);
        let mut out = Pending::new();
        pair.host.restart(&mut out).unwrap();
        pair.pump_from_host(out);

        // 上一轮次的和棋请求迟到
        let text = Envelope::new(pair.to_host.next_seq, 0, PeerMessage::DrawRequest)
            .encode()
            .unwrap();
        let reply = MessageHandler::handle(&mut pair.host, &text);
        assert!(reply.is_empty());
        assert!(!pair.host.state().draw().sent_by_opponent);
    }

    #[test]
    fn test_chat_and_room_code_reconcile() {
        let mut pair = Pair::connected();
        let mut out = Pending::new();
        pair.guest.send_chat("你好", &mut out).unwrap();
        let events = pair.pump_from_guest(out);
        assert!(matches!(&events[0], SessionEvent::Chat { line } if line.message == "你好" && !line.local));
        assert_eq!(pair.host.chat()[0].from, "客人");

        // 房主同步一个不同的房间号，客人采用
        let mut out = Pending::new();
        out.send(
            0,
            PeerMessage::RoomCode {
                room_code: "zz99yy".to_string(),
                player_name: "房主".to_string(),
            },
        );
        let events = pair.pump_from_host(out);
        assert_eq!(pair.guest.identity().room_code().as_str(), "ZZ99YY");
        assert!(matches!(&events[0], SessionEvent::RoomCodeChanged { .. }));
    }

    #[test]
    fn test_join_with_wrong_code_keeps_host_code() {
        let code = RoomCode::parse("AB12C9").unwrap();
        let mut host = Session::new(Identity::new(Role::Host, "房主", code).unwrap());
        host.on_connected(1, &mut Pending::new());

        let text = Envelope::new(
            1,
            0,
            PeerMessage::Join {
                player_name: "客人".to_string(),
                room_code: "XXXXXX".to_string(),
            },
        )
        .encode()
        .unwrap();
        let reply = MessageHandler::handle(&mut host, &text);
        assert_eq!(host.identity().room_code().as_str(), "AB12C9");
        assert!(reply
            .messages
            .iter()
            .any(|o| matches!(&o.message, PeerMessage::RoomCode { room_code, .. } if room_code == "AB12C9")));
    }

    #[test]
    fn test_occupied_cell_rejected_locally() {
        let mut pair = Pair::connected();
        pair.host_move(7, 7);
        let mut out = Pending::new();
        assert_eq!(
            pair.guest.place_stone(7, 7, &mut out),
            Err(GomokuError::Occupied { row: 7, col: 7 })
        );
        assert!(out.is_empty());
        assert_eq!(pair.guest.state().turn(), Stone::White);
    }
}

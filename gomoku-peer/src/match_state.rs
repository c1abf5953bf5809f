//! 对局状态机
//!
//! `Unassigned -> Active -> Ended`，结束后只能通过重新开始回到 `Unassigned`。
//! 开局守卫绑定 `(连接 ID, 轮次)`，旧连接或旧轮次的迟到事件不会再次触发开局。

use serde::{Deserialize, Serialize};

use protocol::{ConnectionId, Epoch, GomokuError, Stone};

use crate::identity::ColorAssignment;

/// 获胜方式
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WinReason {
    /// 五子连珠
    FiveInRow,
    /// 对方认输
    Surrender,
}

/// 对局结果
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "result", rename_all = "snake_case")]
pub enum Outcome {
    Win { winner: Stone, reason: WinReason },
    Draw,
}

/// 对局状态
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum MatchStatus {
    /// 等待棋色分配
    Unassigned,
    /// 对局进行中
    Active,
    /// 对局已结束
    Ended { outcome: Outcome },
}

/// 和棋请求标记，每个方向至多一个
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DrawFlags {
    /// 我方已发出请求，等待回应
    pub sent_by_me: bool,
    /// 对方发来请求，等待我方回应
    pub sent_by_opponent: bool,
}

impl DrawFlags {
    pub fn clear(&mut self) {
        *self = Self::default();
    }
}

/// 对局状态
#[derive(Debug, Clone)]
pub struct MatchState {
    status: MatchStatus,
    turn: Stone,
    assignment: Option<ColorAssignment>,
    draw: DrawFlags,
    epoch: Epoch,
    started: Option<(ConnectionId, Epoch)>,
    move_count: u32,
}

impl MatchState {
    pub fn new() -> Self {
        Self {
            status: MatchStatus::Unassigned,
            turn: Stone::Black,
            assignment: None,
            draw: DrawFlags::default(),
            epoch: 0,
            started: None,
            move_count: 0,
        }
    }

    pub fn status(&self) -> MatchStatus {
        self.status
    }

    pub fn is_active(&self) -> bool {
        self.status == MatchStatus::Active
    }

    pub fn is_ended(&self) -> bool {
        matches!(self.status, MatchStatus::Ended { .. })
    }

    pub fn outcome(&self) -> Option<Outcome> {
        match self.status {
            MatchStatus::Ended { outcome } => Some(outcome),
            _ => None,
        }
    }

    pub fn turn(&self) -> Stone {
        self.turn
    }

    pub fn assignment(&self) -> Option<ColorAssignment> {
        self.assignment
    }

    pub fn draw(&self) -> DrawFlags {
        self.draw
    }

    pub fn epoch(&self) -> Epoch {
        self.epoch
    }

    pub fn move_count(&self) -> u32 {
        self.move_count
    }

    /// 清空本局状态，回到等待分配
    fn clear_match(&mut self) {
        self.status = MatchStatus::Unassigned;
        self.turn = Stone::Black;
        self.assignment = None;
        self.draw.clear();
        self.started = None;
        self.move_count = 0;
    }

    /// 新连接建立：轮次归零
    pub fn reset_for_connection(&mut self) {
        self.clear_match();
        self.epoch = 0;
    }

    /// 重新开始：进入下一轮次
    pub fn advance_epoch(&mut self) -> Epoch {
        self.clear_match();
        self.epoch += 1;
        self.epoch
    }

    /// 跟随对方的重新开始进入指定轮次
    pub fn adopt_epoch(&mut self, epoch: Epoch) {
        self.clear_match();
        self.epoch = epoch;
    }

    /// 开局；同一 `(连接, 轮次)` 只会成功一次
    pub fn try_start(&mut self, connection: ConnectionId, assignment: ColorAssignment) -> bool {
        let key = (connection, self.epoch);
        if self.started == Some(key) {
            return false;
        }
        self.started = Some(key);
        self.status = MatchStatus::Active;
        self.turn = Stone::Black;
        self.assignment = Some(assignment);
        self.draw.clear();
        self.move_count = 0;
        true
    }

    /// 是否已对当前连接与轮次开过局
    pub fn has_started(&self, connection: ConnectionId) -> bool {
        self.started == Some((connection, self.epoch))
    }

    /// 检查对局是否允许落子等对局内操作
    pub fn ensure_active(&self) -> Result<(), GomokuError> {
        match self.status {
            MatchStatus::Unassigned => Err(GomokuError::NotStarted),
            MatchStatus::Active => Ok(()),
            MatchStatus::Ended { .. } => Err(GomokuError::GameOver),
        }
    }

    /// 检查指定棋色现在能否落子
    pub fn ensure_turn(&self, color: Stone) -> Result<(), GomokuError> {
        self.ensure_active()?;
        if self.turn != color {
            return Err(GomokuError::NotYourTurn);
        }
        Ok(())
    }

    /// 记录一步已落下的棋：获胜则结束，否则换手
    pub fn record_move(&mut self, color: Stone, won: bool) {
        self.move_count += 1;
        if won {
            self.end(Outcome::Win {
                winner: color,
                reason: WinReason::FiveInRow,
            });
        } else {
            self.turn = color.opponent();
        }
    }

    /// 结束对局，同时清除双方的和棋请求
    pub fn end(&mut self, outcome: Outcome) {
        self.status = MatchStatus::Ended { outcome };
        self.draw.clear();
    }

    /// 我方发出和棋请求
    pub fn request_draw(&mut self) -> Result<(), GomokuError> {
        self.ensure_active()?;
        if self.draw.sent_by_me {
            return Err(GomokuError::DrawAlreadyRequested);
        }
        self.draw.sent_by_me = true;
        Ok(())
    }

    /// 收到对方和棋请求；对局未进行或重复请求时忽略，返回是否记录
    pub fn receive_draw_request(&mut self) -> bool {
        if !self.is_active() || self.draw.sent_by_opponent {
            return false;
        }
        self.draw.sent_by_opponent = true;
        true
    }

    /// 回应对方的和棋请求
    pub fn respond_draw(&mut self, accept: bool) -> Result<(), GomokuError> {
        self.ensure_active()?;
        if !self.draw.sent_by_opponent {
            return Err(GomokuError::NoDrawOffer);
        }
        self.draw.sent_by_opponent = false;
        if accept {
            self.end(Outcome::Draw);
        }
        Ok(())
    }

    /// 对方回应了我方的和棋请求；没有未决请求时返回 false
    pub fn draw_answered(&mut self, accepted: bool) -> bool {
        if !self.is_active() || !self.draw.sent_by_me {
            return false;
        }
        self.draw.sent_by_me = false;
        if accepted {
            self.end(Outcome::Draw);
        }
        true
    }

    /// 检查是否允许重新开始：对局进行中不允许
    pub fn ensure_restartable(&self) -> Result<(), GomokuError> {
        if self.is_active() {
            return Err(GomokuError::GameInProgress);
        }
        Ok(())
    }
}

impl Default for MatchState {
    fn default() -> Self {
        Self::new()
    }
}

//! 文本控制台
//!
//! 命令解析、棋盘与状态渲染，以及把标准输入、会话事件和和棋询问串起来的交互循环。

use std::fmt::Write as _;

use thiserror::Error;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::sync::mpsc;

use protocol::{Stone, BOARD_SIZE};

use crate::driver::SessionHandle;
use crate::match_state::{MatchStatus, Outcome, WinReason};
use crate::prompt::DrawQuestion;
use crate::session::{SessionEvent, SessionSnapshot};

/// 控制台命令
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConsoleCommand {
    Move { row: i32, col: i32 },
    Surrender,
    Draw,
    Accept,
    Decline,
    Restart,
    Chat(String),
    Board,
    Reconnect,
    Help,
    Exit,
}

/// 命令解析错误
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ParseError {
    #[error("请输入命令，输入 help 查看帮助")]
    Empty,
    #[error("未知命令: {0}")]
    Unknown(String),
    #[error("用法: move <行> <列>")]
    MoveUsage,
    #[error("用法: chat <消息>")]
    ChatUsage,
}

/// 解析一行输入
pub fn parse_command(line: &str) -> Result<ConsoleCommand, ParseError> {
    let line = line.trim();
    let (word, rest) = match line.split_once(char::is_whitespace) {
        Some((word, rest)) => (word, rest.trim()),
        None => (line, ""),
    };

    match word.to_ascii_lowercase().as_str() {
        "" => Err(ParseError::Empty),
        "move" | "m" => {
            let mut parts = rest.split_whitespace().map(str::parse::<i32>);
            match (parts.next(), parts.next(), parts.next()) {
                (Some(Ok(row)), Some(Ok(col)), None) => Ok(ConsoleCommand::Move { row, col }),
                _ => Err(ParseError::MoveUsage),
            }
        }
        "surrender" => Ok(ConsoleCommand::Surrender),
        "draw" => Ok(ConsoleCommand::Draw),
        "accept" | "yes" => Ok(ConsoleCommand::Accept),
        "decline" | "no" => Ok(ConsoleCommand::Decline),
        "restart" => Ok(ConsoleCommand::Restart),
        "chat" | "say" => {
            if rest.is_empty() {
                Err(ParseError::ChatUsage)
            } else {
                Ok(ConsoleCommand::Chat(rest.to_string()))
            }
        }
        "board" | "b" => Ok(ConsoleCommand::Board),
        "reconnect" | "retry" => Ok(ConsoleCommand::Reconnect),
        "help" | "?" => Ok(ConsoleCommand::Help),
        "exit" | "quit" => Ok(ConsoleCommand::Exit),
        other => Err(ParseError::Unknown(other.to_string())),
    }
}

pub const HELP: &str = "\
命令:
  move <行> <列>   落子 (0-14)
  surrender        认输
  draw             请求和棋
  accept / decline 回应和棋请求
  restart          重新开始（对局结束后）
  chat <消息>      发送聊天
  board            显示棋盘
  reconnect        断线或连接出错后重新连接
  exit             退出";

/// 渲染棋盘
pub fn render_board(snapshot: &SessionSnapshot) -> String {
    let mut out = String::from("   ");
    for col in 0..BOARD_SIZE {
        let _ = write!(out, "{:>2}", col);
    }
    out.push('\n');
    for row in 0..BOARD_SIZE {
        let _ = write!(out, "{:>2} ", row);
        for col in 0..BOARD_SIZE {
            let ch = snapshot.cell(row, col).map_or('·', |s| s.display_char());
            let _ = write!(out, " {}", ch);
        }
        out.push('\n');
    }
    out
}

fn color_name(color: Option<Stone>) -> &'static str {
    color.map_or("未分配", |c| c.display_name())
}

fn describe_outcome(outcome: &Outcome, local: Option<Stone>) -> String {
    match outcome {
        Outcome::Draw => "和棋".to_string(),
        Outcome::Win { winner, reason } => {
            let how = match reason {
                WinReason::FiveInRow => "五子连珠",
                WinReason::Surrender => "对方认输",
            };
            let who = if Some(*winner) == local { "你赢了" } else { "你输了" };
            format!("{}胜（{}），{}", winner.display_name(), how, who)
        }
    }
}

/// 渲染状态行
pub fn render_status(snapshot: &SessionSnapshot) -> String {
    let opponent = snapshot.opponent_name.as_deref().unwrap_or("等待对手");
    let mut out = format!(
        "房间 {} | {} {}（{}） vs {}（{}）",
        snapshot.room_code,
        snapshot.role.display_name(),
        snapshot.local_name,
        color_name(snapshot.local_color),
        opponent,
        color_name(snapshot.remote_color),
    );
    let state = match &snapshot.status {
        MatchStatus::Unassigned => "等待分配棋色".to_string(),
        MatchStatus::Active if snapshot.is_my_turn() => "轮到你落子".to_string(),
        MatchStatus::Active => format!("等待对手（{}）落子", snapshot.turn.display_name()),
        MatchStatus::Ended { outcome } => describe_outcome(outcome, snapshot.local_color),
    };
    let _ = write!(out, "\n{}", state);
    if snapshot.draw.sent_by_me {
        out.push_str(" | 已请求和棋");
    }
    if snapshot.draw.sent_by_opponent {
        out.push_str(" | 对手请求和棋");
    }
    if !snapshot.connected {
        out.push_str(" | 未连接");
    }
    out
}

/// 把事件渲染为一行提示，不需要提示的事件返回 `None`
pub fn render_event(event: &SessionEvent) -> Option<String> {
    let text = match event {
        SessionEvent::Connected { .. } => "对手已连接".to_string(),
        SessionEvent::OpponentJoined { name } => format!("{} 加入了房间", name),
        SessionEvent::OpponentInfo { .. } => return None,
        SessionEvent::RoomCodeChanged { room_code } => format!("房间号更新为 {}", room_code),
        SessionEvent::MatchStarted { local_color, .. } => {
            format!("对局开始，你执{}，黑棋先行", local_color.display_name())
        }
        SessionEvent::StonePlaced { local: true, .. } => return None,
        SessionEvent::StonePlaced { row, col, color, .. } => {
            format!("对手{}落子 ({}, {})", color.display_name(), row, col)
        }
        SessionEvent::DrawOffered { from } => format!("{} 请求和棋，输入 accept 或 decline", from),
        SessionEvent::DrawDeclined => "对手拒绝了和棋".to_string(),
        SessionEvent::MatchEnded { outcome } => match outcome {
            Outcome::Draw => "对局结束：和棋".to_string(),
            Outcome::Win { winner, .. } => format!("对局结束：{}胜", winner.display_name()),
        },
        SessionEvent::Restarted { local: true, .. } => "已重新开始".to_string(),
        SessionEvent::Restarted { .. } => "对手重新开始了对局".to_string(),
        SessionEvent::Chat { line } => {
            format!("[{}] {}: {}", line.at.format("%H:%M:%S"), line.from, line.message)
        }
        SessionEvent::Disconnected => "对手已断开连接".to_string(),
        SessionEvent::TransportFailed {
            kind,
            reason,
            retryable,
        } => {
            if *retryable {
                format!("连接错误 ({}): {}，输入 reconnect 重试", kind, reason)
            } else {
                format!("连接已关闭 ({}): {}", kind, reason)
            }
        }
    };
    Some(text)
}

/// 交互循环：读取标准输入、显示事件、转交和棋询问，直到退出
pub async fn run_console(
    mut handle: SessionHandle,
    mut questions: mpsc::Receiver<DrawQuestion>,
) -> anyhow::Result<()> {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut stdout = tokio::io::stdout();
    let mut question: Option<DrawQuestion> = None;

    print(&mut stdout, &render_status(&handle.snapshot())).await?;
    print(&mut stdout, "输入 help 查看命令").await?;

    loop {
        tokio::select! {
            line = lines.next_line() => {
                let Some(line) = line? else {
                    handle.exit().await.ok();
                    break;
                };
                let command = match parse_command(&line) {
                    Ok(command) => command,
                    Err(e) => {
                        print(&mut stdout, &e.to_string()).await?;
                        continue;
                    }
                };
                let result = match command {
                    ConsoleCommand::Move { row, col } => handle.place(row, col).await,
                    ConsoleCommand::Surrender => handle.surrender().await,
                    ConsoleCommand::Draw => handle.request_draw().await,
                    ConsoleCommand::Accept => answer_draw(&handle, &mut question, true).await,
                    ConsoleCommand::Decline => answer_draw(&handle, &mut question, false).await,
                    ConsoleCommand::Restart => handle.restart().await,
                    ConsoleCommand::Chat(text) => handle.chat(text).await,
                    ConsoleCommand::Reconnect => handle.reconnect().await,
                    ConsoleCommand::Board => {
                        let snapshot = handle.snapshot();
                        print(&mut stdout, &render_board(&snapshot)).await?;
                        print(&mut stdout, &render_status(&snapshot)).await?;
                        Ok(())
                    }
                    ConsoleCommand::Help => {
                        print(&mut stdout, HELP).await?;
                        Ok(())
                    }
                    ConsoleCommand::Exit => {
                        handle.exit().await.ok();
                        break;
                    }
                };
                if let Err(e) = result {
                    print(&mut stdout, &format!("操作失败: {}", e)).await?;
                }
            }
            event = handle.next_event() => {
                let Some(event) = event else {
                    break;
                };
                if let Some(text) = render_event(&event) {
                    print(&mut stdout, &text).await?;
                }
                if event == SessionEvent::Disconnected && !handle.snapshot().role.is_host() {
                    print(&mut stdout, "输入 reconnect 重新连接房主").await?;
                }
                if matches!(event, SessionEvent::StonePlaced { .. } | SessionEvent::MatchEnded { .. }) {
                    let snapshot = handle.snapshot();
                    print(&mut stdout, &render_board(&snapshot)).await?;
                    print(&mut stdout, &render_status(&snapshot)).await?;
                }
            }
            Some(q) = questions.recv() => {
                question = Some(q);
            }
        }
    }
    Ok(())
}

/// 优先回答正在进行的询问，否则直接下达回应命令
async fn answer_draw(
    handle: &SessionHandle,
    question: &mut Option<DrawQuestion>,
    accept: bool,
) -> crate::error::Result<()> {
    match question.take() {
        Some(q) => {
            q.answer(accept);
            Ok(())
        }
        None => handle.respond_draw(accept).await,
    }
}

async fn print(stdout: &mut tokio::io::Stdout, text: &str) -> std::io::Result<()> {
    stdout.write_all(text.as_bytes()).await?;
    stdout.write_all(b"\n").await?;
    stdout.flush().await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::identity::{Identity, Role};
    use crate::session::{Pending, Session};
    use protocol::RoomCode;

    #[test]
    fn test_parse_commands() {
        assert_eq!(parse_command("move 7 8"), Ok(ConsoleCommand::Move { row: 7, col: 8 }));
        assert_eq!(parse_command("  M 0 14 "), Ok(ConsoleCommand::Move { row: 0, col: 14 }));
        assert_eq!(parse_command("move 7"), Err(ParseError::MoveUsage));
        assert_eq!(parse_command("move a b"), Err(ParseError::MoveUsage));
        assert_eq!(parse_command("move 1 2 3"), Err(ParseError::MoveUsage));
        assert_eq!(parse_command("chat 你好 世界"), Ok(ConsoleCommand::Chat("你好 世界".to_string())));
        assert_eq!(parse_command("chat"), Err(ParseError::ChatUsage));
        assert_eq!(parse_command("DRAW"), Ok(ConsoleCommand::Draw));
        assert_eq!(parse_command("retry"), Ok(ConsoleCommand::Reconnect));
        assert_eq!(parse_command(""), Err(ParseError::Empty));
        assert_eq!(parse_command("fly"), Err(ParseError::Unknown("fly".to_string())));
    }

    #[test]
    fn test_render_board_marks_stones() {
        let identity = Identity::new(Role::Host, "房主", RoomCode::parse("AB12C9").unwrap()).unwrap();
        let mut session = Session::new(identity).with_host_color(Some(Stone::Black));
        session.on_connected(1, &mut Pending::new());
        session.place_stone(0, 0, &mut Pending::new()).unwrap();

        let snapshot = session.snapshot();
        let board = render_board(&snapshot);
        assert_eq!(board.lines().count(), BOARD_SIZE + 1);
        assert!(board.lines().nth(1).unwrap().contains('●'));

        let status = render_status(&snapshot);
        assert!(status.contains("AB12C9"));
        assert!(status.contains("等待对手（白棋）落子"));
    }

    #[test]
    fn test_render_events() {
        assert!(render_event(&SessionEvent::DrawDeclined).is_some());
        assert!(render_event(&SessionEvent::StonePlaced {
            row: 1,
            col: 2,
            color: Stone::Black,
            local: true
        })
        .is_none());
        let text = render_event(&SessionEvent::MatchEnded {
            outcome: Outcome::Win {
                winner: Stone::White,
                reason: WinReason::Surrender,
            },
        })
        .unwrap();
        assert!(text.contains("白棋胜"));
    }
}

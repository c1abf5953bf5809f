//! 和棋询问
//!
//! 对手请求和棋时，驱动层通过 [`DrawPrompt`] 异步询问本地玩家，
//! 等待期间照常处理网络事件与本地操作。

use async_trait::async_trait;
use tokio::sync::{mpsc, oneshot};
use tracing::debug;

/// 询问本地玩家是否同意和棋
#[async_trait]
pub trait DrawPrompt: Send + Sync {
    /// 返回 `true` 表示同意
    async fn ask_draw(&self, opponent: &str) -> bool;
}

/// 固定回答，用于测试与无人值守
#[derive(Debug, Clone, Copy)]
pub struct AutoPrompt {
    accept: bool,
}

impl AutoPrompt {
    pub fn accept() -> Self {
        Self { accept: true }
    }

    pub fn decline() -> Self {
        Self { accept: false }
    }
}

#[async_trait]
impl DrawPrompt for AutoPrompt {
    async fn ask_draw(&self, opponent: &str) -> bool {
        debug!("auto-answering draw request from {}: {}", opponent, self.accept);
        self.accept
    }
}

/// 一次待回答的和棋询问
#[derive(Debug)]
pub struct DrawQuestion {
    pub opponent: String,
    reply: oneshot::Sender<bool>,
}

impl DrawQuestion {
    /// 回答询问；对方已不再等待时忽略
    pub fn answer(self, accept: bool) {
        let _ = self.reply.send(accept);
    }
}

/// 把询问转交给界面，通过通道取回答案
///
/// 界面丢弃询问或关闭通道视为拒绝。
#[derive(Debug, Clone)]
pub struct ChannelPrompt {
    questions: mpsc::Sender<DrawQuestion>,
}

impl ChannelPrompt {
    pub fn new(buffer: usize) -> (Self, mpsc::Receiver<DrawQuestion>) {
        let (questions, rx) = mpsc::channel(buffer);
        (Self { questions }, rx)
    }
}

#[async_trait]
impl DrawPrompt for ChannelPrompt {
    async fn ask_draw(&self, opponent: &str) -> bool {
        let (reply, answer) = oneshot::channel();
        let question = DrawQuestion {
            opponent: opponent.to_string(),
            reply,
        };
        if self.questions.send(question).await.is_err() {
            return false;
        }
        answer.await.unwrap_or(false)
    }
}

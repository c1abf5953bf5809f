//! 会话错误类型

use protocol::{GomokuError, TransportError};
use thiserror::Error;

/// 会话操作错误
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SessionError {
    /// 规则或输入错误，状态未改变
    #[error(transparent)]
    Rule(#[from] GomokuError),

    /// 传输层错误
    #[error(transparent)]
    Transport(#[from] TransportError),

    /// 会话已退出
    #[error("Session has exited")]
    Exited,
}

impl SessionError {
    /// 是否应提示用户手动重试
    pub fn is_retryable(&self) -> bool {
        match self {
            SessionError::Transport(e) => e.is_retryable(),
            _ => false,
        }
    }
}

/// 会话操作结果类型
pub type Result<T> = std::result::Result<T, SessionError>;

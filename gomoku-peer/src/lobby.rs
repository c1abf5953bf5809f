//! 建房与加入
//!
//! 房主随机生成房间号并把端点绑定到这个号码；客人用任意 ID 打开端点后连接房间号，
//! 在限定时间内等不到连接打开就放弃这次尝试。
//! 失败不会自动重试，是否重试由用户决定。

use std::sync::Arc;

use tokio::time::timeout;
use tracing::{info, warn};

use protocol::{Endpoint, Link, LinkEvent, RoomCode, Transport, TransportError, TransportErrorKind};

use crate::config::PeerConfig;
use crate::driver::{SessionDriver, SessionHandle};
use crate::error::{Result, SessionError};
use crate::identity::{validate_name, Identity, Role};
use crate::prompt::DrawPrompt;
use crate::session::Session;

/// 大厅：持有传输实现与配置
pub struct Lobby<T: Transport> {
    transport: T,
    config: PeerConfig,
}

impl<T: Transport> Lobby<T> {
    pub fn new(transport: T, config: PeerConfig) -> Self {
        Self { transport, config }
    }

    pub fn config(&self) -> &PeerConfig {
        &self.config
    }

    /// 创建房间
    ///
    /// 房间号被占用时按配置的次数换号重试，次数用尽后把冲突报告给调用方。
    pub async fn create_room(
        &self,
        name: &str,
        prompt: Arc<dyn DrawPrompt>,
    ) -> Result<(SessionDriver<T::Endpoint>, SessionHandle)> {
        let name = validate_name(name)?;
        let attempts = self.config.max_room_code_attempts.max(1);

        let mut attempt = 1;
        loop {
            let code = RoomCode::generate(&mut rand::thread_rng());
            match self.host_room(&name, code.clone(), Arc::clone(&prompt)).await {
                Err(SessionError::Transport(e))
                    if e.kind == TransportErrorKind::IdTaken && attempt < attempts =>
                {
                    warn!(
                        "room code {} is taken, trying another ({}/{})",
                        code, attempt, attempts
                    );
                    attempt += 1;
                }
                result => return result,
            }
        }
    }

    /// 以指定房间号开房，号码已被占用时返回 `IdTaken`
    pub async fn host_room(
        &self,
        name: &str,
        code: RoomCode,
        prompt: Arc<dyn DrawPrompt>,
    ) -> Result<(SessionDriver<T::Endpoint>, SessionHandle)> {
        let identity = Identity::new(Role::Host, name, code.clone())?;
        let endpoint = match self.transport.open(Some(code.as_str())).await {
            Ok(endpoint) => endpoint,
            Err(e) => {
                warn!("failed to open room {}: {}", code, e);
                return Err(e.into());
            }
        };

        info!("room {} created by {}", code, identity.local_name());
        let session = Session::new(identity).with_host_color(self.config.preferred_color);
        Ok(SessionDriver::new(session, endpoint, None, prompt))
    }

    /// 加入房间
    ///
    /// 房间号先做格式校验再发起连接；超时后丢弃这次连接并关闭端点。
    pub async fn join_room(
        &self,
        name: &str,
        room_code: &str,
        prompt: Arc<dyn DrawPrompt>,
    ) -> Result<(SessionDriver<T::Endpoint>, SessionHandle)> {
        let name = validate_name(name)?;
        let code = RoomCode::parse(room_code)?;

        let mut endpoint = self.transport.open(None).await?;
        let mut link = match endpoint.connect_to(code.as_str()).await {
            Ok(link) => link,
            Err(e) => {
                warn!("cannot reach room {}: {}", code, e);
                endpoint.close().await;
                return Err(e.into());
            }
        };

        let wait = self.config.connect_timeout();
        match timeout(wait, wait_opened(&mut link)).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => {
                warn!("connection to room {} failed: {}", code, e);
                drop(link);
                endpoint.close().await;
                return Err(e.into());
            }
            Err(_) => {
                warn!("connection to room {} not opened within {:?}", code, wait);
                drop(link);
                endpoint.close().await;
                return Err(TransportError::timeout().into());
            }
        }

        info!("{} joined room {} as {}", name, code, endpoint.id());
        let identity = Identity::new(Role::Guest, &name, code)?;
        let session = Session::new(identity);
        let (driver, handle) = SessionDriver::new(session, endpoint, Some(link), prompt);
        Ok((driver.with_connect_timeout(wait), handle))
    }
}

/// 等待连接打开
async fn wait_opened<L: Link>(link: &mut L) -> std::result::Result<(), TransportError> {
    loop {
        match link.next_event().await {
            LinkEvent::Opened => return Ok(()),
            LinkEvent::Errored(e) => return Err(e),
            LinkEvent::Closed => {
                return Err(TransportError::remote_unavailable(
                    "connection closed before it opened",
                ))
            }
            LinkEvent::Data(_) => warn!("data received before the connection opened, dropping"),
        }
    }
}

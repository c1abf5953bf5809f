//! 会话驱动
//!
//! 每个对等端只有一个驱动任务，依次处理传输事件、本地操作和和棋询问的回答，
//! 同一时刻只有一个事件在修改会话状态。
//! 界面通过 [`SessionHandle`] 下达操作、读取快照、订阅事件。

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tokio::time::Sleep;
use tracing::{debug, error, info, warn};

use protocol::{
    Connection, ConnectionId, Endpoint, GomokuError, Link, LinkEvent, TransportError,
    CONNECT_TIMEOUT,
};

use crate::dispatcher::MessageHandler;
use crate::error::{Result, SessionError};
use crate::prompt::DrawPrompt;
use crate::session::{Pending, Session, SessionEvent, SessionSnapshot};

/// 命令通道容量
const COMMAND_BUFFER: usize = 32;

type PromptFuture = Pin<Box<dyn Future<Output = bool> + Send>>;
type Deadline = Pin<Box<Sleep>>;

/// 本地玩家操作
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LocalCommand {
    Place { row: i32, col: i32 },
    Surrender,
    RequestDraw,
    RespondDraw { accept: bool },
    Restart,
    Chat(String),
    /// 连接断开或出错后重新连接房主
    Reconnect,
    Exit,
}

struct CommandRequest {
    command: LocalCommand,
    reply: oneshot::Sender<Result<()>>,
}

/// 下达本地操作，可克隆后交给多个任务
#[derive(Clone)]
pub struct SessionCommander {
    commands: mpsc::Sender<CommandRequest>,
}

impl SessionCommander {
    /// 执行一个操作并等待结果
    pub async fn execute(&self, command: LocalCommand) -> Result<()> {
        let (reply, result) = oneshot::channel();
        self.commands
            .send(CommandRequest { command, reply })
            .await
            .map_err(|_| SessionError::Exited)?;
        result.await.map_err(|_| SessionError::Exited)?
    }

    pub async fn place(&self, row: i32, col: i32) -> Result<()> {
        self.execute(LocalCommand::Place { row, col }).await
    }

    pub async fn surrender(&self) -> Result<()> {
        self.execute(LocalCommand::Surrender).await
    }

    pub async fn request_draw(&self) -> Result<()> {
        self.execute(LocalCommand::RequestDraw).await
    }

    pub async fn respond_draw(&self, accept: bool) -> Result<()> {
        self.execute(LocalCommand::RespondDraw { accept }).await
    }

    pub async fn restart(&self) -> Result<()> {
        self.execute(LocalCommand::Restart).await
    }

    pub async fn chat(&self, text: impl Into<String>) -> Result<()> {
        self.execute(LocalCommand::Chat(text.into())).await
    }

    /// 客人重新连接房间；房主恢复接受连入
    pub async fn reconnect(&self) -> Result<()> {
        self.execute(LocalCommand::Reconnect).await
    }

    /// 退出会话：关闭连接与端点，丢弃全部状态
    pub async fn exit(&self) -> Result<()> {
        self.execute(LocalCommand::Exit).await
    }
}

/// 界面持有的会话句柄
pub struct SessionHandle {
    commander: SessionCommander,
    snapshot: watch::Receiver<SessionSnapshot>,
    events: mpsc::UnboundedReceiver<SessionEvent>,
}

impl SessionHandle {
    /// 当前状态快照
    pub fn snapshot(&self) -> SessionSnapshot {
        self.snapshot.borrow().clone()
    }

    /// 等待快照满足条件
    pub async fn wait_for(
        &mut self,
        condition: impl FnMut(&SessionSnapshot) -> bool,
    ) -> Result<SessionSnapshot> {
        self.snapshot
            .wait_for(condition)
            .await
            .map(|snapshot| snapshot.clone())
            .map_err(|_| SessionError::Exited)
    }

    /// 下一个界面事件，会话结束后返回 `None`
    pub async fn next_event(&mut self) -> Option<SessionEvent> {
        self.events.recv().await
    }

    pub async fn place(&self, row: i32, col: i32) -> Result<()> {
        self.commander.place(row, col).await
    }

    pub async fn surrender(&self) -> Result<()> {
        self.commander.surrender().await
    }

    pub async fn request_draw(&self) -> Result<()> {
        self.commander.request_draw().await
    }

    pub async fn respond_draw(&self, accept: bool) -> Result<()> {
        self.commander.respond_draw(accept).await
    }

    pub async fn restart(&self) -> Result<()> {
        self.commander.restart().await
    }

    pub async fn chat(&self, text: impl Into<String>) -> Result<()> {
        self.commander.chat(text).await
    }

    pub async fn reconnect(&self) -> Result<()> {
        self.commander.reconnect().await
    }

    pub async fn exit(&self) -> Result<()> {
        self.commander.exit().await
    }
}

/// 会话驱动
pub struct SessionDriver<E: Endpoint> {
    session: Session,
    endpoint: E,
    connection: Option<Connection<E::Link>>,
    next_connection_id: ConnectionId,
    accepting: bool,
    prompt: Arc<dyn DrawPrompt>,
    draw_question: Option<PromptFuture>,
    connect_timeout: Duration,
    open_deadline: Option<Deadline>,
    commands: mpsc::Receiver<CommandRequest>,
    events: mpsc::UnboundedSender<SessionEvent>,
    snapshot: watch::Sender<SessionSnapshot>,
}

impl<E: Endpoint> SessionDriver<E> {
    /// 创建驱动；客人传入已打开的连接，房主传 `None` 等待客人连入
    pub fn new(
        session: Session,
        endpoint: E,
        link: Option<E::Link>,
        prompt: Arc<dyn DrawPrompt>,
    ) -> (Self, SessionHandle) {
        let (commands_tx, commands) = mpsc::channel(COMMAND_BUFFER);
        let (events, events_rx) = mpsc::unbounded_channel();
        let (snapshot, snapshot_rx) = watch::channel(session.snapshot());

        let accepting = session.role().is_host();
        let connection = link.map(|link| Connection::new(1, link));
        let driver = Self {
            session,
            endpoint,
            connection,
            next_connection_id: 2,
            accepting,
            prompt,
            draw_question: None,
            connect_timeout: CONNECT_TIMEOUT,
            open_deadline: None,
            commands,
            events,
            snapshot,
        };
        let handle = SessionHandle {
            commander: SessionCommander {
                commands: commands_tx,
            },
            snapshot: snapshot_rx,
            events: events_rx,
        };
        (driver, handle)
    }

    /// 重新连接时等待连接打开的时间
    pub fn with_connect_timeout(mut self, wait: Duration) -> Self {
        self.connect_timeout = wait;
        self
    }

    pub fn endpoint(&self) -> &E {
        &self.endpoint
    }

    /// 事件循环，直到收到退出命令或所有句柄被丢弃
    pub async fn run(mut self) {
        info!(
            "session driver started: {:?} in room {} (endpoint {})",
            self.session.role(),
            self.session.identity().room_code(),
            self.endpoint.id()
        );

        if self.connection.as_ref().is_some_and(|c| c.is_open()) {
            self.on_opened().await;
        }

        let exit_reply = loop {
            let accepting = self.accepting;
            tokio::select! {
                accepted = self.endpoint.accept(), if accepting => {
                    self.on_accepted(accepted).await;
                }
                event = next_link_event(&mut self.connection) => {
                    self.on_link_event(event).await;
                }
                accept = next_answer(&mut self.draw_question) => {
                    self.draw_question = None;
                    self.on_draw_answer(accept).await;
                }
                _ = next_deadline(&mut self.open_deadline) => {
                    self.open_deadline = None;
                    self.on_open_timeout().await;
                }
                request = self.commands.recv() => match request {
                    Some(CommandRequest { command: LocalCommand::Exit, reply }) => break Some(reply),
                    Some(request) => self.on_command(request).await,
                    None => break None,
                },
            }
        };

        self.shutdown().await;
        if let Some(reply) = exit_reply {
            let _ = reply.send(Ok(()));
        }
    }

    /// 在后台任务中运行
    pub fn spawn(self) -> JoinHandle<()>
    where
        E: 'static,
    {
        tokio::spawn(self.run())
    }

    async fn on_accepted(&mut self, accepted: std::result::Result<E::Link, TransportError>) {
        let link = match accepted {
            Ok(link) => link,
            Err(e) => {
                error!("endpoint stopped accepting: {}", e);
                self.accepting = false;
                self.report_transport_error(&e);
                self.publish();
                return;
            }
        };

        if let Some(mut old) = self.connection.take() {
            info!(
                "replacing connection {} with new guest {}",
                old.id(),
                link.remote_id()
            );
            old.close().await;
            let mut pending = Pending::new();
            self.session.on_disconnected(&mut pending);
            self.flush(pending).await;
        }

        let id = self.next_connection_id;
        self.next_connection_id += 1;
        info!("guest {} connecting as connection {}", link.remote_id(), id);
        self.connection = Some(Connection::new(id, link));
        self.publish();
    }

    async fn on_link_event(&mut self, event: LinkEvent) {
        match event {
            LinkEvent::Opened => self.on_opened().await,
            LinkEvent::Data(text) => {
                let pending = MessageHandler::handle(&mut self.session, &text);
                self.flush(pending).await;
            }
            LinkEvent::Closed => self.on_closed().await,
            LinkEvent::Errored(e) => {
                error!("connection error: {}", e);
                self.report_transport_error(&e);
                // 尚未打开的连接出错后直接丢弃，等待用户重试
                let opened = self.connection.as_ref().is_some_and(|c| c.is_open());
                if !e.is_retryable() || !opened {
                    self.on_closed().await;
                } else {
                    self.publish();
                }
            }
        }
    }

    async fn on_opened(&mut self) {
        self.open_deadline = None;
        let Some(id) = self.connection.as_ref().map(|c| c.id()) else {
            return;
        };
        let mut pending = Pending::new();
        self.session.on_connected(id, &mut pending);
        self.flush(pending).await;
    }

    async fn on_closed(&mut self) {
        self.open_deadline = None;
        if let Some(mut connection) = self.connection.take() {
            debug!("connection {} closed", connection.id());
            connection.close().await;
        }
        self.draw_question = None;
        let mut pending = Pending::new();
        self.session.on_disconnected(&mut pending);
        self.flush(pending).await;
    }

    /// 重新连接的连接没有在限定时间内打开
    async fn on_open_timeout(&mut self) {
        if self.connection.as_ref().is_some_and(|c| c.is_open()) {
            return;
        }
        if let Some(mut connection) = self.connection.take() {
            warn!(
                "connection {} not opened within {:?}, dropping it",
                connection.id(),
                self.connect_timeout
            );
            connection.close().await;
        }
        self.report_transport_error(&TransportError::timeout());
        self.publish();
    }

    /// 客人用同一个房间号重新发起连接；房主恢复接受连入
    async fn reconnect(&mut self) -> Result<()> {
        if self.session.role().is_host() {
            if !self.accepting {
                info!("resuming accepting guests");
                self.accepting = true;
            }
            return Ok(());
        }
        if self.connection.as_ref().is_some_and(|c| c.is_open()) {
            return Err(GomokuError::AlreadyConnected.into());
        }

        if let Some(mut old) = self.connection.take() {
            old.close().await;
        }
        self.open_deadline = None;

        let room_code = self.session.identity().room_code().clone();
        let link = match self.endpoint.connect_to(room_code.as_str()).await {
            Ok(link) => link,
            Err(e) => {
                warn!("cannot reach room {}: {}", room_code, e);
                return Err(e.into());
            }
        };

        let id = self.next_connection_id;
        self.next_connection_id += 1;
        info!("reconnecting to room {} as connection {}", room_code, id);
        self.connection = Some(Connection::new(id, link));
        self.open_deadline = Some(Box::pin(tokio::time::sleep(self.connect_timeout)));
        Ok(())
    }

    async fn on_draw_answer(&mut self, accept: bool) {
        if !self.session.draw_offer_pending() {
            debug!("draw offer no longer pending, dropping answer");
            return;
        }
        let mut pending = Pending::new();
        if let Err(e) = self.session.respond_draw(accept, &mut pending) {
            warn!("failed to answer draw offer: {}", e);
        }
        self.flush(pending).await;
    }

    async fn on_command(&mut self, request: CommandRequest) {
        let CommandRequest { command, reply } = request;
        debug!("local command: {:?}", command);

        if command == LocalCommand::Reconnect {
            let result = self.reconnect().await;
            self.publish();
            let _ = reply.send(result);
            return;
        }

        let mut pending = Pending::new();
        let result = match command {
            LocalCommand::Place { row, col } => self.session.place_stone(row, col, &mut pending),
            LocalCommand::Surrender => self.session.surrender(&mut pending),
            LocalCommand::RequestDraw => self.session.request_draw(&mut pending),
            LocalCommand::RespondDraw { accept } => {
                self.draw_question = None;
                self.session.respond_draw(accept, &mut pending)
            }
            LocalCommand::Restart => self.session.restart(&mut pending),
            LocalCommand::Chat(text) => self.session.send_chat(&text, &mut pending),
            LocalCommand::Reconnect | LocalCommand::Exit => Ok(()),
        };
        self.flush(pending).await;
        let _ = reply.send(result.map_err(SessionError::from));
    }

    /// 发出消息、推送事件并更新快照
    async fn flush(&mut self, pending: Pending) {
        for out in pending.messages {
            let kind = out.message.kind();
            match self.connection.as_mut() {
                Some(connection) => {
                    debug!("send {} epoch={}", kind, out.epoch);
                    if let Err(e) = connection.send(out.epoch, out.message).await {
                        error!("failed to send {}: {}", kind, e);
                        self.report_transport_error(&e);
                    }
                }
                None => warn!("no connection, dropping outgoing {}", kind),
            }
        }

        for event in pending.events {
            if matches!(event, SessionEvent::DrawOffered { .. }) {
                self.start_draw_prompt();
            }
            let _ = self.events.send(event);
        }
        if !self.session.draw_offer_pending() {
            self.draw_question = None;
        }
        self.publish();
    }

    fn start_draw_prompt(&mut self) {
        let prompt = Arc::clone(&self.prompt);
        let opponent = self.session.identity().opponent_display().to_string();
        self.draw_question = Some(Box::pin(async move { prompt.ask_draw(&opponent).await }));
    }

    fn report_transport_error(&self, e: &TransportError) {
        let _ = self.events.send(SessionEvent::TransportFailed {
            kind: e.kind,
            reason: e.reason.clone(),
            retryable: e.is_retryable(),
        });
    }

    fn publish(&self) {
        self.snapshot.send_replace(self.session.snapshot());
    }

    async fn shutdown(&mut self) {
        if let Some(mut connection) = self.connection.take() {
            connection.close().await;
        }
        self.endpoint.close().await;
        self.draw_question = None;
        self.open_deadline = None;
        info!(
            "session for room {} closed",
            self.session.identity().room_code()
        );
    }
}

async fn next_link_event<L: Link>(connection: &mut Option<Connection<L>>) -> LinkEvent {
    match connection {
        Some(connection) => connection.next_event().await,
        None => std::future::pending().await,
    }
}

async fn next_deadline(deadline: &mut Option<Deadline>) {
    match deadline {
        Some(sleep) => sleep.as_mut().await,
        None => std::future::pending().await,
    }
}

async fn next_answer(question: &mut Option<PromptFuture>) -> bool {
    match question {
        Some(future) => future.as_mut().await,
        None => std::future::pending().await,
    }
}

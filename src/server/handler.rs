// Copyright 2025 Lablup Inc. and Jeongkyu Shin
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! SSH handler implementation for the russh server.
//!
//! This module implements the `russh::server::Handler` trait which handles
//! all SSH protocol events for a single connection: the authentication
//! gate, channel bookkeeping, and the hand-off of started sessions to the
//! [`Router`](super::router::Router).

use std::borrow::Cow;
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;

use russh::keys::ssh_key;
use russh::server::{Auth, Handle, Msg, Response, Session as SshSession};
use russh::{Channel, ChannelId, CryptoVec, Pty};
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;

use super::auth::{AuthPolicy, ChallengeExchange, ChallengeStep};
use super::router::{self, RouteState, Router};
use super::session::{
    ChannelState, OutputReceiver, PtyConfig, Session, SessionId, SessionInfo, SessionOutput,
    WindowSize,
};
use crate::directory::ListenerConfig;
use crate::shared::auth_types::{AuthContext, AuthResult};
use crate::shared::error::AuthError;

/// Shared state of one listening server instance.
#[derive(Debug)]
pub struct ListenerContext {
    pub config: ListenerConfig,
    pub router: Arc<Router>,
}

impl ListenerContext {
    pub fn new(config: ListenerConfig, router: Arc<Router>) -> Self {
        Self { config, router }
    }

    fn auth(&self) -> &AuthPolicy {
        &self.config.auth
    }
}

/// SSH handler for a single client connection.
pub struct SshHandler {
    /// Remote address of the connected client.
    peer_addr: Option<SocketAddr>,

    listener: Arc<ListenerContext>,

    session_info: SessionInfo,

    /// Active channels for this connection.
    channels: HashMap<ChannelId, ChannelState>,

    /// Route state of each started channel.
    routes: HashMap<ChannelId, watch::Receiver<RouteState>>,

    /// Keyboard-interactive conversation awaiting the client's answers.
    challenge: Option<ChallengeExchange>,

    state: RouteState,

    /// Parent of every channel token; cancelled when the connection drops.
    cancel: CancellationToken,
}

impl SshHandler {
    /// Create a new SSH handler for a client connection.
    pub fn new(peer_addr: Option<SocketAddr>, listener: Arc<ListenerContext>) -> Self {
        Self {
            peer_addr,
            listener,
            session_info: SessionInfo::new(peer_addr),
            channels: HashMap::new(),
            routes: HashMap::new(),
            challenge: None,
            state: RouteState::Connecting,
            cancel: CancellationToken::new(),
        }
    }

    pub fn peer_addr(&self) -> Option<SocketAddr> {
        self.peer_addr
    }

    pub fn session_id(&self) -> SessionId {
        self.session_info.id
    }

    pub fn is_authenticated(&self) -> bool {
        self.session_info.authenticated
    }

    pub fn username(&self) -> Option<&str> {
        self.session_info.user.as_deref()
    }

    pub fn state(&self) -> RouteState {
        self.state
    }

    fn auth_context(&self, user: &str) -> AuthContext {
        AuthContext::new(user)
            .with_peer(self.peer_addr)
            .with_listener(self.listener.config.name())
    }

    /// Count an attempt; returns `false` once the limit is exceeded.
    fn begin_attempt(&mut self) -> bool {
        if self.state == RouteState::Connecting {
            self.state = RouteState::Authenticating;
        }
        self.session_info.increment_auth_attempts();
        let allowed = self.session_info.auth_attempts as usize
            <= self.listener.config.limits.max_auth_attempts;
        if !allowed {
            tracing::warn!(
                session = %self.session_info.id,
                peer = ?self.peer_addr,
                attempts = self.session_info.auth_attempts,
                "Max authentication attempts exceeded"
            );
        }
        allowed
    }

    fn accept(&mut self, user: &str, method: &str) -> Auth {
        self.session_info.authenticate(user);
        tracing::info!(
            session = %self.session_info.id,
            user = %user,
            peer = ?self.peer_addr,
            listener = %self.listener.config.name(),
            method = %method,
            "Authentication succeeded"
        );
        Auth::Accept
    }

    /// Reject, advertising the methods still worth trying.
    fn reject(&self) -> Auth {
        let methods = self.listener.auth().methods();
        let exhausted = self.session_info.auth_attempts as usize
            >= self.listener.config.limits.max_auth_attempts;
        Auth::Reject {
            proceed_with_methods: (!exhausted && !methods.is_empty()).then_some(methods),
            partial_success: false,
        }
    }

    fn reject_final() -> Auth {
        Auth::Reject {
            proceed_with_methods: None,
            partial_success: false,
        }
    }

    /// Turn a challenge step into an auth reply, keeping the exchange alive
    /// while prompts are outstanding.
    fn settle_challenge(&mut self, user: &str, exchange: ChallengeExchange, step: ChallengeStep) -> Auth {
        match step {
            ChallengeStep::Prompt(challenge) => {
                self.challenge = Some(exchange);
                let prompts: Vec<(Cow<'static, str>, bool)> = challenge
                    .prompts
                    .into_iter()
                    .map(|p| (Cow::Owned(p.text), p.echo))
                    .collect();
                Auth::Partial {
                    name: Cow::Owned(challenge.name),
                    instructions: Cow::Owned(challenge.instruction),
                    prompts: Cow::Owned(prompts),
                }
            }
            ChallengeStep::Done(AuthResult::Accept) => self.accept(user, "keyboard-interactive"),
            ChallengeStep::Done(AuthResult::Reject) => self.reject(),
        }
    }

    /// Build the session for a shell or exec request and hand it to the router.
    fn start_session(
        &mut self,
        channel_id: ChannelId,
        command: Option<String>,
        session: &mut SshSession,
    ) -> bool {
        let Some(channel) = self.channels.get_mut(&channel_id) else {
            tracing::warn!(channel = ?channel_id, "Session request for unknown channel");
            return false;
        };
        if channel.started {
            tracing::warn!(channel = ?channel_id, "Channel already running a session");
            return false;
        }

        let user = self.session_info.user.clone().unwrap_or_default();
        let (local, peer) = Session::builder(user)
            .id(self.session_info.id)
            .peer_addr(self.peer_addr)
            .listener(self.listener.config.name())
            .pty(channel.pty.clone())
            .command(command)
            .env(channel.env.clone())
            .cancel_token(channel.cancel.clone())
            .build();
        channel.attach(peer.input, peer.window);

        let (state_tx, state_rx) = watch::channel(RouteState::MenuOrDirect);
        self.routes.insert(channel_id, state_rx);
        self.state = RouteState::Dispatching;

        tokio::spawn(pump_output(session.handle(), channel_id, peer.output));
        tokio::spawn(router::supervise(
            Arc::clone(&self.listener.router),
            self.listener.config.role.clone(),
            local,
            state_tx,
        ));
        true
    }
}

/// Keyboard-interactive answers as text. Answers are UTF-8 on the wire.
fn decode_answers<I>(response: I) -> Result<Vec<String>, AuthError>
where
    I: IntoIterator,
    I::Item: AsRef<[u8]>,
{
    response
        .into_iter()
        .enumerate()
        .map(|(i, answer)| {
            String::from_utf8(answer.as_ref().to_vec()).map_err(|_| {
                AuthError::MalformedResponse(format!("answer {} is not valid UTF-8", i + 1))
            })
        })
        .collect()
}

/// Forward session output to the client until the session closes the
/// channel or the channel goes away.
async fn pump_output(
    handle: Handle,
    channel_id: ChannelId,
    mut output: OutputReceiver,
) {
    let mut exited = false;
    while let Some(message) = output.recv().await {
        let delivered = match message {
            SessionOutput::Stdout(data) => handle
                .data(channel_id, CryptoVec::from_slice(&data))
                .await
                .is_ok(),
            SessionOutput::Stderr(data) => handle
                .extended_data(channel_id, 1, CryptoVec::from_slice(&data))
                .await
                .is_ok(),
            SessionOutput::Exit(code) => {
                exited = true;
                handle.exit_status_request(channel_id, code).await.is_ok()
            }
            SessionOutput::Close => break,
        };
        if !delivered {
            tracing::trace!(channel = ?channel_id, "Channel gone, dropping session output");
            return;
        }
    }

    if !exited {
        let _ = handle.exit_status_request(channel_id, 0).await;
    }
    let _ = handle.eof(channel_id).await;
    let _ = handle.close(channel_id).await;
}

impl russh::server::Handler for SshHandler {
    type Error = anyhow::Error;

    /// Called when a new session channel is created.
    fn channel_open_session(
        &mut self,
        channel: Channel<Msg>,
        _session: &mut SshSession,
    ) -> impl std::future::Future<Output = Result<bool, Self::Error>> + Send {
        let channel_id = channel.id();
        tracing::debug!(
            session = %self.session_info.id,
            channel = ?channel_id,
            "Channel opened for session"
        );

        self.channels.insert(
            channel_id,
            ChannelState::new(channel_id, self.cancel.child_token()),
        );
        async { Ok(true) }
    }

    fn authentication_banner(
        &mut self,
    ) -> impl std::future::Future<Output = Result<Option<String>, Self::Error>> + Send {
        let banner = self.listener.config.banner.clone();
        async move { Ok(banner) }
    }

    /// Handle 'none' authentication.
    ///
    /// Accepted only when the listener has no authentication strategies.
    fn auth_none(
        &mut self,
        user: &str,
    ) -> impl std::future::Future<Output = Result<Auth, Self::Error>> + Send {
        tracing::debug!(
            user = %user,
            peer = ?self.peer_addr,
            "Auth none attempt"
        );
        if self.state == RouteState::Connecting {
            self.state = RouteState::Authenticating;
        }

        let reply = if self.listener.auth().is_open() {
            self.accept(user, "none")
        } else {
            tracing::debug!(
                methods = ?self.listener.auth().method_names(),
                "Rejecting auth_none, advertising methods"
            );
            self.reject()
        };
        async { Ok(reply) }
    }

    /// Let the client sign only with keys that would be accepted.
    fn auth_publickey_offered(
        &mut self,
        user: &str,
        public_key: &ssh_key::PublicKey,
    ) -> impl std::future::Future<Output = Result<Auth, Self::Error>> + Send {
        let ctx = self.auth_context(user);
        let public_key = public_key.clone();
        async move {
            if !self.listener.auth().allows_publickey() {
                return Ok(self.reject());
            }
            match self.listener.auth().check_publickey(&ctx, &public_key).await {
                AuthResult::Accept => Ok(Auth::Accept),
                AuthResult::Reject => Ok(self.reject()),
            }
        }
    }

    /// Handle public key authentication once the signature checked out.
    fn auth_publickey(
        &mut self,
        user: &str,
        public_key: &ssh_key::PublicKey,
    ) -> impl std::future::Future<Output = Result<Auth, Self::Error>> + Send {
        tracing::debug!(
            user = %user,
            peer = ?self.peer_addr,
            key_type = %public_key.algorithm(),
            "Public key authentication attempt"
        );
        let user = user.to_string();
        let ctx = self.auth_context(&user);
        let public_key = public_key.clone();
        let allowed = self.begin_attempt();

        async move {
            if !allowed {
                return Ok(Self::reject_final());
            }
            match self.listener.auth().check_publickey(&ctx, &public_key).await {
                AuthResult::Accept => Ok(self.accept(&user, "publickey")),
                AuthResult::Reject => Ok(self.reject()),
            }
        }
    }

    /// Handle password authentication.
    fn auth_password(
        &mut self,
        user: &str,
        password: &str,
    ) -> impl std::future::Future<Output = Result<Auth, Self::Error>> + Send {
        tracing::debug!(
            user = %user,
            peer = ?self.peer_addr,
            "Password authentication attempt"
        );
        let user = user.to_string();
        let ctx = self.auth_context(&user);
        let password = zeroize::Zeroizing::new(password.to_string());
        let allowed = self.begin_attempt();

        async move {
            if !allowed {
                return Ok(Self::reject_final());
            }
            match self.listener.auth().check_password(&ctx, &password).await {
                AuthResult::Accept => Ok(self.accept(&user, "password")),
                AuthResult::Reject => Ok(self.reject()),
            }
        }
    }

    /// Handle keyboard-interactive authentication.
    ///
    /// The first call starts a [`ChallengeExchange`]; every later call
    /// carries the answers to the prompts it produced.
    fn auth_keyboard_interactive<'a>(
        &'a mut self,
        user: &str,
        _submethods: &str,
        response: Option<Response<'a>>,
    ) -> impl std::future::Future<Output = Result<Auth, Self::Error>> + Send {
        let user = user.to_string();
        let answers = response.map(decode_answers);

        async move {
            let Some(strategy) = self.listener.auth().keyboard_interactive() else {
                return Ok(self.reject());
            };

            let exchange = match (self.challenge.take(), answers) {
                (Some(mut exchange), Some(answers)) => {
                    let delivered = match answers {
                        Ok(answers) => exchange.answer(answers),
                        Err(e) => {
                            tracing::debug!(user = %user, error = %e, "Unusable keyboard-interactive response");
                            exchange.fail(e)
                        }
                    };
                    if !delivered {
                        return Ok(self.reject());
                    }
                    exchange
                }
                _ => {
                    if !self.begin_attempt() {
                        return Ok(Self::reject_final());
                    }
                    tracing::debug!(
                        user = %user,
                        peer = ?self.peer_addr,
                        "Keyboard-interactive authentication attempt"
                    );
                    ChallengeExchange::start(
                        strategy,
                        self.auth_context(&user),
                        self.listener.config.limits.challenge_timeout,
                    )
                }
            };

            let mut exchange = exchange;
            let step = exchange.next().await;
            Ok(self.settle_challenge(&user, exchange, step))
        }
    }

    fn auth_succeeded(
        &mut self,
        _session: &mut SshSession,
    ) -> impl std::future::Future<Output = Result<(), Self::Error>> + Send {
        self.challenge = None;
        self.state = RouteState::MenuOrDirect;
        async { Ok(()) }
    }

    /// Handle PTY request.
    #[allow(clippy::too_many_arguments)]
    fn pty_request(
        &mut self,
        channel_id: ChannelId,
        term: &str,
        col_width: u32,
        row_height: u32,
        pix_width: u32,
        pix_height: u32,
        _modes: &[(Pty, u32)],
        session: &mut SshSession,
    ) -> impl std::future::Future<Output = Result<(), Self::Error>> + Send {
        tracing::debug!(
            term = %term,
            cols = %col_width,
            rows = %row_height,
            "PTY request"
        );

        if let Some(channel) = self.channels.get_mut(&channel_id) {
            let window = WindowSize {
                cols: col_width,
                rows: row_height,
                pix_width,
                pix_height,
            };
            channel.pty = Some(PtyConfig::new(term, window));
            let _ = session.channel_success(channel_id);
        } else {
            tracing::warn!("PTY request for unknown channel");
            let _ = session.channel_failure(channel_id);
        }

        async { Ok(()) }
    }

    fn env_request(
        &mut self,
        channel_id: ChannelId,
        variable_name: &str,
        variable_value: &str,
        _session: &mut SshSession,
    ) -> impl std::future::Future<Output = Result<(), Self::Error>> + Send {
        tracing::trace!(name = %variable_name, "Env request");
        if let Some(channel) = self.channels.get_mut(&channel_id) {
            channel
                .env
                .push((variable_name.to_string(), variable_value.to_string()));
        }
        async { Ok(()) }
    }

    fn window_change_request(
        &mut self,
        channel_id: ChannelId,
        col_width: u32,
        row_height: u32,
        pix_width: u32,
        pix_height: u32,
        _session: &mut SshSession,
    ) -> impl std::future::Future<Output = Result<(), Self::Error>> + Send {
        if let Some(channel) = self.channels.get_mut(&channel_id) {
            channel.resize(WindowSize {
                cols: col_width,
                rows: row_height,
                pix_width,
                pix_height,
            });
        }
        async { Ok(()) }
    }

    /// Handle exec request. The command may name an endpoint on the main
    /// listener.
    fn exec_request(
        &mut self,
        channel_id: ChannelId,
        data: &[u8],
        session: &mut SshSession,
    ) -> impl std::future::Future<Output = Result<(), Self::Error>> + Send {
        let command = String::from_utf8_lossy(data).into_owned();
        tracing::debug!(command = %command, "Exec request");

        if self.start_session(channel_id, Some(command), session) {
            let _ = session.channel_success(channel_id);
        } else {
            let _ = session.channel_failure(channel_id);
        }
        async { Ok(()) }
    }

    /// Handle shell request.
    fn shell_request(
        &mut self,
        channel_id: ChannelId,
        session: &mut SshSession,
    ) -> impl std::future::Future<Output = Result<(), Self::Error>> + Send {
        tracing::debug!("Shell request");

        if self.start_session(channel_id, None, session) {
            let _ = session.channel_success(channel_id);
        } else {
            let _ = session.channel_failure(channel_id);
        }
        async { Ok(()) }
    }

    /// Subsystems such as SFTP are not served by the directory.
    fn subsystem_request(
        &mut self,
        channel_id: ChannelId,
        name: &str,
        session: &mut SshSession,
    ) -> impl std::future::Future<Output = Result<(), Self::Error>> + Send {
        tracing::debug!(subsystem = %name, "Rejecting subsystem request");
        let _ = session.channel_failure(channel_id);
        async { Ok(()) }
    }

    /// Handle incoming data from the client.
    ///
    /// Never waits on the input queue: this runs on the connection's event
    /// loop, which must stay free to see the client disconnect. Input for a
    /// session that stopped reading is dropped once the queue is full.
    fn data(
        &mut self,
        channel_id: ChannelId,
        data: &[u8],
        _session: &mut SshSession,
    ) -> impl std::future::Future<Output = Result<(), Self::Error>> + Send {
        if let Some(channel) = self.channels.get_mut(&channel_id) {
            channel.push_input(data.to_vec());
        }
        async { Ok(()) }
    }

    /// Handle channel EOF from the client.
    fn channel_eof(
        &mut self,
        channel_id: ChannelId,
        _session: &mut SshSession,
    ) -> impl std::future::Future<Output = Result<(), Self::Error>> + Send {
        tracing::debug!(channel = ?channel_id, "Channel EOF received");

        if let Some(channel) = self.channels.get_mut(&channel_id) {
            channel.mark_eof();
        }
        async { Ok(()) }
    }

    /// Handle channel close from the client. Dropping the channel state
    /// cancels its session.
    fn channel_close(
        &mut self,
        channel_id: ChannelId,
        _session: &mut SshSession,
    ) -> impl std::future::Future<Output = Result<(), Self::Error>> + Send {
        let state = self
            .routes
            .remove(&channel_id)
            .map(|rx| *rx.borrow());
        tracing::debug!(channel = ?channel_id, state = ?state, "Channel closed");

        self.channels.remove(&channel_id);
        async { Ok(()) }
    }
}

impl Drop for SshHandler {
    fn drop(&mut self) {
        self.cancel.cancel();
        tracing::info!(
            session = %self.session_info.id,
            peer = ?self.peer_addr,
            user = self.session_info.user.as_deref().unwrap_or("-"),
            duration_ms = self.session_info.duration().as_millis() as u64,
            authenticated = %self.session_info.authenticated,
            "Connection closed"
        );
    }
}

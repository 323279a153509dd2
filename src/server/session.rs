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

//! Per-connection and per-channel session state.
//!
//! # Types
//!
//! - [`SessionId`]: unique identifier of an SSH connection
//! - [`SessionInfo`]: metadata the connection handler keeps about its client
//! - [`Session`]: the handle given to middlewares, local handlers and the proxy
//! - [`SessionPeer`]: the transport side of a [`Session`], owned by the
//!   connection handler (or by a test)
//! - [`ChannelState`]: bookkeeping for one SSH session channel
//!
//! A [`Session`] never touches the SSH transport directly. Input arrives on a
//! bounded queue fed by the connection handler, output goes to a queue
//! drained by a single pump task, and window size changes are published on a
//! `watch` channel. Closing the transport cancels the session token, which
//! wakes every pending [`Session::read`].
//!
//! Output written with [`Session::write_all`] is charged against a byte
//! budget of [`OUTPUT_BUFFER_BYTES`]. The budget is returned as the pump takes
//! data off the queue, and the pump only takes more once the client's SSH
//! window accepted the previous chunk, so a slow client stalls the writer
//! instead of growing the queue. [`Session::write`] is for short status text
//! and is not charged.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use russh::ChannelId;
use tokio::sync::mpsc::error::TryRecvError;
use tokio::sync::{mpsc, watch, Mutex, Semaphore};
use tokio_util::sync::CancellationToken;

/// Capacity of the per-session input queue.
pub const INPUT_QUEUE_CAPACITY: usize = 256;

/// Bytes of charged output allowed to wait for the client.
pub const OUTPUT_BUFFER_BYTES: usize = 256 * 1024;

/// Global counter for generating unique session IDs.
static SESSION_COUNTER: AtomicU64 = AtomicU64::new(1);

/// Unique identifier for an SSH connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SessionId(u64);

impl SessionId {
    /// Create a new unique session ID.
    pub fn new() -> Self {
        Self(SESSION_COUNTER.fetch_add(1, Ordering::Relaxed))
    }

    /// Get the raw ID value.
    pub fn as_u64(&self) -> u64 {
        self.0
    }
}

impl Default for SessionId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for SessionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "session-{}", self.0)
    }
}

/// Information the connection handler tracks about its client.
#[derive(Debug, Clone)]
pub struct SessionInfo {
    pub id: SessionId,
    pub user: Option<String>,
    pub peer_addr: Option<SocketAddr>,
    pub started_at: Instant,
    pub authenticated: bool,
    pub auth_attempts: u32,
}

impl SessionInfo {
    /// Create a new session info for a freshly accepted connection.
    pub fn new(peer_addr: Option<SocketAddr>) -> Self {
        Self {
            id: SessionId::new(),
            user: None,
            peer_addr,
            started_at: Instant::now(),
            authenticated: false,
            auth_attempts: 0,
        }
    }

    /// Mark the connection as authenticated.
    pub fn authenticate(&mut self, username: impl Into<String>) {
        self.user = Some(username.into());
        self.authenticated = true;
    }

    /// Count one more authentication attempt.
    pub fn increment_auth_attempts(&mut self) {
        self.auth_attempts += 1;
    }

    /// Connection age.
    pub fn duration(&self) -> Duration {
        self.started_at.elapsed()
    }
}

/// Terminal requested by the client.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PtyConfig {
    /// Terminal type (e.g., "xterm-256color").
    pub term: String,

    /// Initial window size.
    pub window: WindowSize,
}

impl PtyConfig {
    pub fn new(term: impl Into<String>, window: WindowSize) -> Self {
        Self {
            term: term.into(),
            window,
        }
    }
}

/// Terminal window size in characters and pixels.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WindowSize {
    pub cols: u32,
    pub rows: u32,
    pub pix_width: u32,
    pub pix_height: u32,
}

impl WindowSize {
    pub fn new(cols: u32, rows: u32) -> Self {
        Self {
            cols,
            rows,
            pix_width: 0,
            pix_height: 0,
        }
    }
}

impl Default for WindowSize {
    fn default() -> Self {
        Self::new(80, 24)
    }
}

/// Output produced by a session handler.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionOutput {
    Stdout(Vec<u8>),
    Stderr(Vec<u8>),
    /// Exit status to report to the client.
    Exit(u32),
    /// The handler is done; close the channel.
    Close,
}

/// Immutable identity of a session.
#[derive(Debug)]
struct SessionContext {
    id: SessionId,
    user: String,
    peer_addr: Option<SocketAddr>,
    listener: String,
    started_at: Instant,
}

/// Handle given to middlewares and handlers.
///
/// Cloning is cheap. All clones share the same input queue, output sink and
/// cancellation token.
#[derive(Clone)]
pub struct Session {
    context: Arc<SessionContext>,
    endpoint: Option<Arc<str>>,
    pty: Option<PtyConfig>,
    command: Option<String>,
    env: Arc<Vec<(String, String)>>,
    window: watch::Receiver<WindowSize>,
    input: Arc<Mutex<mpsc::Receiver<Vec<u8>>>>,
    output: mpsc::UnboundedSender<QueuedOutput>,
    budget: Arc<Semaphore>,
    exited: Arc<AtomicBool>,
    cancel: CancellationToken,
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("id", &self.context.id)
            .field("user", &self.context.user)
            .field("endpoint", &self.endpoint)
            .field("pty", &self.pty)
            .field("command", &self.command)
            .finish()
    }
}

impl Session {
    /// Start building a session for `user`.
    pub fn builder(user: impl Into<String>) -> SessionBuilder {
        SessionBuilder::new(user)
    }

    pub fn id(&self) -> SessionId {
        self.context.id
    }

    /// The authenticated local username.
    pub fn user(&self) -> &str {
        &self.context.user
    }

    pub fn peer_addr(&self) -> Option<SocketAddr> {
        self.context.peer_addr
    }

    /// Name of the listener that accepted the connection.
    pub fn listener(&self) -> &str {
        &self.context.listener
    }

    /// Name of the endpoint the session was dispatched to, if any.
    pub fn endpoint(&self) -> Option<&str> {
        self.endpoint.as_deref()
    }

    /// Return a handle bound to the named endpoint.
    pub fn with_endpoint(&self, name: &str) -> Session {
        let mut session = self.clone();
        session.endpoint = Some(Arc::from(name));
        session
    }

    /// Return a handle with the exec command replaced.
    pub fn with_command(&self, command: Option<String>) -> Session {
        let mut session = self.clone();
        session.command = command;
        session
    }

    pub fn pty(&self) -> Option<&PtyConfig> {
        self.pty.as_ref()
    }

    pub fn has_pty(&self) -> bool {
        self.pty.is_some()
    }

    /// Current window size.
    pub fn window(&self) -> WindowSize {
        *self.window.borrow()
    }

    /// A receiver that observes window size changes.
    pub fn window_changes(&self) -> watch::Receiver<WindowSize> {
        self.window.clone()
    }

    /// The exec command, or `None` for an interactive shell.
    pub fn command(&self) -> Option<&str> {
        self.command.as_deref()
    }

    /// Environment variables sent by the client.
    pub fn env(&self) -> &[(String, String)] {
        &self.env
    }

    /// Time since the connection was accepted.
    pub fn elapsed(&self) -> Duration {
        self.context.started_at.elapsed()
    }

    /// Read the next chunk of client input.
    ///
    /// Returns `None` after the client sent EOF or the session was cancelled.
    pub async fn read(&self) -> Option<Vec<u8>> {
        if self.cancel.is_cancelled() {
            return None;
        }
        let mut input = self.input.lock().await;
        tokio::select! {
            _ = self.cancel.cancelled() => None,
            data = input.recv() => data,
        }
    }

    /// Write to the client's stdout. Returns `false` once the channel is gone.
    pub fn write(&self, data: impl AsRef<[u8]>) -> bool {
        self.send(SessionOutput::Stdout(data.as_ref().to_vec()))
    }

    /// Write to the client's stderr. Returns `false` once the channel is gone.
    pub fn write_stderr(&self, data: impl AsRef<[u8]>) -> bool {
        self.send(SessionOutput::Stderr(data.as_ref().to_vec()))
    }

    /// Write to the client's stdout, waiting while the output budget is
    /// used up. Returns `false` once the channel is gone or the session was
    /// cancelled.
    pub async fn write_all(&self, data: impl AsRef<[u8]>) -> bool {
        self.send_charged(SessionOutput::Stdout(data.as_ref().to_vec()))
            .await
    }

    /// Like [`Session::write_all`], for stderr.
    pub async fn write_stderr_all(&self, data: impl AsRef<[u8]>) -> bool {
        self.send_charged(SessionOutput::Stderr(data.as_ref().to_vec()))
            .await
    }

    /// Record the exit status. Only the first call has an effect.
    pub fn exit(&self, code: u32) {
        if !self.exited.swap(true, Ordering::SeqCst) {
            self.send(SessionOutput::Exit(code));
        }
    }

    /// Whether an exit status was already recorded.
    pub fn has_exited(&self) -> bool {
        self.exited.load(Ordering::SeqCst)
    }

    /// Ask the transport to close the channel.
    pub fn close(&self) {
        self.send(SessionOutput::Close);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled() || self.output.is_closed()
    }

    /// Resolves when the transport side goes away.
    pub async fn cancelled(&self) {
        self.cancel.cancelled().await
    }

    /// The token cancelled when the transport closes.
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    fn send(&self, output: SessionOutput) -> bool {
        self.output
            .send(QueuedOutput { output, charge: 0 })
            .is_ok()
    }

    async fn send_charged(&self, output: SessionOutput) -> bool {
        let len = match &output {
            SessionOutput::Stdout(data) | SessionOutput::Stderr(data) => data.len(),
            _ => 0,
        };
        // A chunk larger than the whole budget waits for an empty queue.
        let charge = len.min(OUTPUT_BUFFER_BYTES) as u32;
        if charge > 0 {
            let permit = tokio::select! {
                permit = self.budget.acquire_many(charge) => permit,
                _ = self.cancel.cancelled() => return false,
            };
            match permit {
                Ok(permit) => permit.forget(),
                // The receiver is gone.
                Err(_) => return false,
            }
        }
        self.output.send(QueuedOutput { output, charge }).is_ok()
    }
}

/// An output item and the budget it holds.
#[derive(Debug)]
struct QueuedOutput {
    output: SessionOutput,
    charge: u32,
}

/// Receiving end of a session's output queue.
#[derive(Debug)]
pub struct OutputReceiver {
    rx: mpsc::UnboundedReceiver<QueuedOutput>,
    budget: Arc<Semaphore>,
}

impl OutputReceiver {
    /// Next output item, in write order. Taking an item returns its budget.
    pub async fn recv(&mut self) -> Option<SessionOutput> {
        let queued = self.rx.recv().await?;
        Some(self.release(queued))
    }

    pub fn try_recv(&mut self) -> Result<SessionOutput, TryRecvError> {
        self.rx.try_recv().map(|queued| self.release(queued))
    }

    fn release(&self, queued: QueuedOutput) -> SessionOutput {
        if queued.charge > 0 {
            self.budget.add_permits(queued.charge as usize);
        }
        queued.output
    }
}

impl Drop for OutputReceiver {
    fn drop(&mut self) {
        // Wakes writers waiting for budget.
        self.budget.close();
    }
}

/// The transport side of a [`Session`].
pub struct SessionPeer {
    /// Feeds client input to [`Session::read`]. Dropping it signals EOF.
    pub input: mpsc::Sender<Vec<u8>>,

    /// Publishes window size changes.
    pub window: watch::Sender<WindowSize>,

    /// Everything the handler writes, in order.
    pub output: OutputReceiver,

    /// Cancels the session.
    pub cancel: CancellationToken,
}

/// Builder for [`Session`].
#[derive(Debug)]
pub struct SessionBuilder {
    user: String,
    peer_addr: Option<SocketAddr>,
    listener: String,
    id: Option<SessionId>,
    pty: Option<PtyConfig>,
    command: Option<String>,
    env: Vec<(String, String)>,
    cancel: Option<CancellationToken>,
}

impl SessionBuilder {
    fn new(user: impl Into<String>) -> Self {
        Self {
            user: user.into(),
            peer_addr: None,
            listener: "main".to_string(),
            id: None,
            pty: None,
            command: None,
            env: Vec::new(),
            cancel: None,
        }
    }

    pub fn id(mut self, id: SessionId) -> Self {
        self.id = Some(id);
        self
    }

    pub fn peer_addr(mut self, peer_addr: Option<SocketAddr>) -> Self {
        self.peer_addr = peer_addr;
        self
    }

    pub fn listener(mut self, listener: impl Into<String>) -> Self {
        self.listener = listener.into();
        self
    }

    pub fn pty(mut self, pty: Option<PtyConfig>) -> Self {
        self.pty = pty;
        self
    }

    pub fn command(mut self, command: Option<String>) -> Self {
        self.command = command;
        self
    }

    pub fn env(mut self, env: Vec<(String, String)>) -> Self {
        self.env = env;
        self
    }

    /// Use a token derived from the connection so that closing the
    /// connection cancels this session.
    pub fn cancel_token(mut self, token: CancellationToken) -> Self {
        self.cancel = Some(token);
        self
    }

    pub fn build(self) -> (Session, SessionPeer) {
        let (input_tx, input_rx) = mpsc::channel(INPUT_QUEUE_CAPACITY);
        let (output_tx, output_rx) = mpsc::unbounded_channel();
        let budget = Arc::new(Semaphore::new(OUTPUT_BUFFER_BYTES));
        let initial = self.pty.as_ref().map(|p| p.window).unwrap_or_default();
        let (window_tx, window_rx) = watch::channel(initial);
        let cancel = self.cancel.unwrap_or_default();

        let session = Session {
            context: Arc::new(SessionContext {
                id: self.id.unwrap_or_default(),
                user: self.user,
                peer_addr: self.peer_addr,
                listener: self.listener,
                started_at: Instant::now(),
            }),
            endpoint: None,
            pty: self.pty,
            command: self.command,
            env: Arc::new(self.env),
            window: window_rx,
            input: Arc::new(Mutex::new(input_rx)),
            output: output_tx,
            budget: Arc::clone(&budget),
            exited: Arc::new(AtomicBool::new(false)),
            cancel: cancel.clone(),
        };

        let peer = SessionPeer {
            input: input_tx,
            window: window_tx,
            output: OutputReceiver {
                rx: output_rx,
                budget,
            },
            cancel,
        };

        (session, peer)
    }
}

/// Non-blocking writer into a session's input queue.
///
/// The connection handler cannot wait for a session to read: while it waits
/// it does not see the client disconnect. Input that does not fit is dropped.
#[derive(Debug)]
pub struct InputFeed {
    tx: mpsc::Sender<Vec<u8>>,
    /// Bytes dropped since the session last accepted input.
    dropped: u64,
}

impl InputFeed {
    pub fn new(tx: mpsc::Sender<Vec<u8>>) -> Self {
        Self { tx, dropped: 0 }
    }

    /// Queue `data`. Returns `false` if it was dropped.
    pub fn push(&mut self, data: Vec<u8>) -> bool {
        match self.tx.try_send(data) {
            Ok(()) => {
                self.dropped = 0;
                true
            }
            Err(mpsc::error::TrySendError::Full(data)) => {
                if self.dropped == 0 {
                    tracing::warn!("Session is not reading its input, dropping client data");
                }
                self.dropped += data.len() as u64;
                false
            }
            // The session already finished.
            Err(mpsc::error::TrySendError::Closed(_)) => false,
        }
    }

    /// Bytes dropped since the session last accepted input.
    pub fn dropped(&self) -> u64 {
        self.dropped
    }
}

/// Bookkeeping for one SSH session channel on the server side.
#[derive(Debug)]
pub struct ChannelState {
    pub channel_id: ChannelId,
    pub pty: Option<PtyConfig>,
    pub env: Vec<(String, String)>,
    /// Input queue of the running session; `None` before start or after EOF.
    pub input: Option<InputFeed>,
    /// Window publisher of the running session.
    pub window: Option<watch::Sender<WindowSize>>,
    pub cancel: CancellationToken,
    pub started: bool,
}

impl ChannelState {
    pub fn new(channel_id: ChannelId, cancel: CancellationToken) -> Self {
        Self {
            channel_id,
            pty: None,
            env: Vec::new(),
            input: None,
            window: None,
            cancel,
            started: false,
        }
    }

    pub fn has_pty(&self) -> bool {
        self.pty.is_some()
    }

    /// Attach the transport side of a started session.
    pub fn attach(&mut self, input: mpsc::Sender<Vec<u8>>, window: watch::Sender<WindowSize>) {
        self.input = Some(InputFeed::new(input));
        self.window = Some(window);
        self.started = true;
    }

    /// Record a window change, before or after the session started.
    pub fn resize(&mut self, size: WindowSize) {
        if let Some(pty) = self.pty.as_mut() {
            pty.window = size;
        }
        if let Some(window) = &self.window {
            let _ = window.send(size);
        }
    }

    /// Queue client input without waiting. Returns `false` if the data was
    /// dropped.
    pub fn push_input(&mut self, data: Vec<u8>) -> bool {
        match self.input.as_mut() {
            Some(feed) => feed.push(data),
            None => false,
        }
    }

    /// The client will send no more data.
    pub fn mark_eof(&mut self) {
        self.input = None;
    }
}

impl Drop for ChannelState {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

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

//! Bidirectional relay between a local session and a remote channel.

use std::time::Duration;

use async_trait::async_trait;
use russh::client;
use russh::{Channel, ChannelMsg};

use crate::server::session::{Session, WindowSize};
use crate::shared::error::ProxyError;

/// How long to wait for the remote to close its channel after it sent EOF.
pub const REMOTE_CLOSE_GRACE: Duration = Duration::from_secs(2);

/// Exit status reported when the remote process was killed by a signal.
pub const SIGNAL_EXIT_STATUS: u32 = 255;

/// Something that happened on the remote channel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RemoteEvent {
    Data(Vec<u8>),
    Stderr(Vec<u8>),
    ExitStatus(u32),
    ExitSignal(String),
    /// The remote will send no more data.
    Eof,
    /// The remote refused a channel request (shell, exec).
    Refused,
    /// The remote closed the channel.
    Closed,
}

/// The remote end of a proxied session.
#[async_trait]
pub trait RemoteChannel: Send {
    /// Next event, or `None` once the connection is gone.
    async fn recv(&mut self) -> Option<RemoteEvent>;
    async fn send_data(&mut self, data: &[u8]) -> Result<(), ProxyError>;
    async fn send_eof(&mut self) -> Result<(), ProxyError>;
    async fn resize(&mut self, size: WindowSize) -> Result<(), ProxyError>;
    async fn close(&mut self) -> Result<(), ProxyError>;
}

#[async_trait]
impl RemoteChannel for Channel<client::Msg> {
    async fn recv(&mut self) -> Option<RemoteEvent> {
        loop {
            let event = match self.wait().await? {
                ChannelMsg::Data { data } => RemoteEvent::Data(data.to_vec()),
                ChannelMsg::ExtendedData { data, .. } => RemoteEvent::Stderr(data.to_vec()),
                ChannelMsg::ExitStatus { exit_status } => RemoteEvent::ExitStatus(exit_status),
                ChannelMsg::ExitSignal { signal_name, .. } => {
                    RemoteEvent::ExitSignal(format!("{signal_name:?}"))
                }
                ChannelMsg::Eof => RemoteEvent::Eof,
                ChannelMsg::Close => RemoteEvent::Closed,
                ChannelMsg::Failure => RemoteEvent::Refused,
                _ => continue,
            };
            return Some(event);
        }
    }

    async fn send_data(&mut self, data: &[u8]) -> Result<(), ProxyError> {
        Ok(self.data(data).await?)
    }

    async fn send_eof(&mut self) -> Result<(), ProxyError> {
        Ok(self.eof().await?)
    }

    async fn resize(&mut self, size: WindowSize) -> Result<(), ProxyError> {
        Ok(self
            .window_change(size.cols, size.rows, size.pix_width, size.pix_height)
            .await?)
    }

    async fn close(&mut self) -> Result<(), ProxyError> {
        Ok(Channel::close(self).await?)
    }
}

/// Which side ended the relay.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RelayEnd {
    /// The remote closed the channel (or sent EOF and went quiet).
    RemoteClosed,
    /// The local session was cancelled.
    LocalClosed,
}

/// Result of a finished relay.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RelayOutcome {
    pub exit_status: Option<u32>,
    pub end: RelayEnd,
}

/// Pump bytes between `session` and `remote` until either side closes.
///
/// Remote stdout and stderr go to the session, session input and window
/// changes go to the remote. Local EOF is forwarded and the relay keeps
/// running until the remote closes. If the connection drops before the
/// remote reported how it ended, the relay fails with
/// [`ProxyError::Transport`].
pub async fn relay<C>(session: &Session, remote: &mut C) -> Result<RelayOutcome, ProxyError>
where
    C: RemoteChannel + ?Sized,
{
    let mut window = session.window_changes();
    let mut window_open = true;
    let mut local_open = true;
    let mut exit_status = None;
    let mut remote_eof = false;
    // Armed once the remote sends EOF.
    let grace = tokio::time::sleep(Duration::from_secs(24 * 60 * 60));
    tokio::pin!(grace);

    let end = loop {
        tokio::select! {
            event = remote.recv() => match event {
                // Waiting for output budget stops reads from the remote,
                // which leaves its SSH window closed until the client drains.
                Some(RemoteEvent::Data(data)) => {
                    session.write_all(data).await;
                }
                Some(RemoteEvent::Stderr(data)) => {
                    session.write_stderr_all(data).await;
                }
                Some(RemoteEvent::ExitStatus(code)) => exit_status = Some(code),
                Some(RemoteEvent::ExitSignal(signal)) => {
                    tracing::debug!(session = %session.id(), signal = %signal, "Remote process killed by signal");
                    exit_status.get_or_insert(SIGNAL_EXIT_STATUS);
                }
                Some(RemoteEvent::Eof) => {
                    if !remote_eof {
                        remote_eof = true;
                        grace.as_mut().reset(tokio::time::Instant::now() + REMOTE_CLOSE_GRACE);
                    }
                }
                Some(RemoteEvent::Refused) => {
                    return Err(ProxyError::Channel("remote refused the session request".to_string()));
                }
                Some(RemoteEvent::Closed) => break RelayEnd::RemoteClosed,
                None if remote_eof || exit_status.is_some() => break RelayEnd::RemoteClosed,
                None => return Err(ProxyError::Transport("connection closed unexpectedly".to_string())),
            },
            input = session.read(), if local_open => match input {
                Some(data) => remote.send_data(&data).await?,
                None if session.is_cancelled() => {
                    let _ = remote.close().await;
                    break RelayEnd::LocalClosed;
                }
                None => {
                    local_open = false;
                    remote.send_eof().await?;
                }
            },
            changed = window.changed(), if window_open => match changed {
                Ok(()) => {
                    let size = *window.borrow_and_update();
                    remote.resize(size).await?;
                }
                Err(_) => window_open = false,
            },
            _ = &mut grace, if remote_eof => break RelayEnd::RemoteClosed,
            _ = session.cancelled() => {
                let _ = remote.close().await;
                break RelayEnd::LocalClosed;
            }
        }
    };

    tracing::debug!(session = %session.id(), ?end, ?exit_status, "Relay finished");
    Ok(RelayOutcome { exit_status, end })
}

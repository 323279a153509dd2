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

//! Outbound SSH connections to remote endpoints.
//!
//! Authentication tries, in order:
//!
//! 1. `none`, for open servers such as another directory
//! 2. each identity file that exists and can be decoded without a passphrase
//! 3. every identity held by the SSH agent (`SSH_AUTH_SOCK`), on Unix

use std::sync::Arc;

use russh::client::{self, Handle};
use russh::keys::{PrivateKeyWithHashAlg, PublicKey};
use russh::{Channel, Disconnect};

use super::{HostKeyCheck, ProxyTarget};
use crate::server::session::Session;
use crate::shared::error::ProxyError;

/// Verifies the remote host key according to a [`HostKeyCheck`].
pub struct ClientHandler {
    host: String,
    port: u16,
    check: HostKeyCheck,
}

impl client::Handler for ClientHandler {
    type Error = russh::Error;

    async fn check_server_key(
        &mut self,
        server_public_key: &PublicKey,
    ) -> Result<bool, Self::Error> {
        let verdict = match &self.check {
            HostKeyCheck::AcceptAny => Ok(true),
            HostKeyCheck::KnownHostsFile(path) => russh::keys::check_known_hosts_path(
                &self.host,
                self.port,
                server_public_key,
                path,
            ),
            HostKeyCheck::DefaultKnownHosts => {
                russh::keys::check_known_hosts(&self.host, self.port, server_public_key)
            }
        };

        match verdict {
            Ok(known) => {
                if !known {
                    tracing::warn!(host = %self.host, port = self.port, "Remote host key is not known");
                }
                Ok(known)
            }
            Err(e) => {
                tracing::warn!(host = %self.host, port = self.port, error = %e, "Remote host key check failed");
                Ok(false)
            }
        }
    }
}

/// An authenticated connection to a remote endpoint.
pub struct RemoteClient {
    handle: Handle<ClientHandler>,
    address: String,
}

impl RemoteClient {
    /// Connect and authenticate as `target.user`.
    pub async fn connect(target: &ProxyTarget) -> Result<Self, ProxyError> {
        let config = Arc::new(client::Config {
            keepalive_interval: target.keepalive_interval,
            ..Default::default()
        });
        let handler = ClientHandler {
            host: target.host.clone(),
            port: target.port,
            check: target.host_key_check.clone(),
        };

        tracing::debug!(address = %target.address, user = %target.user, "Connecting to remote endpoint");

        let connect = client::connect(config, (target.host.as_str(), target.port), handler);
        let mut handle = match tokio::time::timeout(target.connect_timeout, connect).await {
            Err(_) => {
                return Err(ProxyError::Timeout {
                    address: target.address.clone(),
                    timeout: target.connect_timeout,
                })
            }
            Ok(Err(russh::Error::UnknownKey)) => {
                return Err(ProxyError::HostKeyRejected(target.address.clone()))
            }
            Ok(Err(e)) => {
                return Err(ProxyError::Unreachable {
                    address: target.address.clone(),
                    reason: e.to_string(),
                })
            }
            Ok(Ok(handle)) => handle,
        };

        authenticate(&mut handle, target).await?;
        tracing::info!(address = %target.address, user = %target.user, "Authenticated to remote endpoint");

        Ok(Self {
            handle,
            address: target.address.clone(),
        })
    }

    /// Open a session channel mirroring `session`: environment, pty, then
    /// a shell or the command.
    pub async fn open_session(
        &self,
        target: &ProxyTarget,
        session: &Session,
    ) -> Result<Channel<client::Msg>, ProxyError> {
        let channel = self
            .handle
            .channel_open_session()
            .await
            .map_err(|e| ProxyError::Channel(e.to_string()))?;

        for (name, value) in target.env.iter().map(|(k, v)| (k.as_str(), v.as_str())) {
            channel.set_env(false, name, value).await?;
        }

        if let Some(pty) = session.pty() {
            let window = session.window();
            channel
                .request_pty(
                    false,
                    &pty.term,
                    window.cols,
                    window.rows,
                    window.pix_width,
                    window.pix_height,
                    &[],
                )
                .await?;
        }

        match target.command.as_deref().or(session.command()) {
            Some(command) => channel.exec(true, command).await?,
            None => channel.request_shell(true).await?,
        }

        Ok(channel)
    }

    pub async fn disconnect(self) {
        if let Err(e) = self
            .handle
            .disconnect(Disconnect::ByApplication, "", "en")
            .await
        {
            tracing::debug!(address = %self.address, error = %e, "Disconnect from remote failed");
        }
    }
}

async fn authenticate(
    handle: &mut Handle<ClientHandler>,
    target: &ProxyTarget,
) -> Result<(), ProxyError> {
    let user = target.user.as_str();

    if handle.authenticate_none(user).await?.success() {
        return Ok(());
    }

    for path in &target.identities {
        if !path.exists() {
            continue;
        }
        let key = match russh::keys::load_secret_key(path, None) {
            Ok(key) => key,
            Err(e) => {
                tracing::debug!(path = %path.display(), error = %e, "Skipping identity file");
                continue;
            }
        };

        let hash_alg = handle.best_supported_rsa_hash().await?.flatten();
        let result = handle
            .authenticate_publickey(user, PrivateKeyWithHashAlg::new(Arc::new(key), hash_alg))
            .await?;
        if result.success() {
            tracing::debug!(path = %path.display(), "Authenticated with identity file");
            return Ok(());
        }
    }

    #[cfg(unix)]
    if target.use_agent && authenticate_with_agent(handle, user).await? {
        return Ok(());
    }

    Err(ProxyError::AuthFailed {
        user: target.user.clone(),
        address: target.address.clone(),
    })
}

#[cfg(unix)]
async fn authenticate_with_agent(
    handle: &mut Handle<ClientHandler>,
    user: &str,
) -> Result<bool, ProxyError> {
    let mut agent = match russh::keys::agent::client::AgentClient::connect_env().await {
        Ok(agent) => agent,
        Err(e) => {
            tracing::debug!(error = %e, "SSH agent not available");
            return Ok(false);
        }
    };

    let identities = match agent.request_identities().await {
        Ok(identities) => identities,
        Err(e) => {
            tracing::debug!(error = %e, "SSH agent refused to list identities");
            return Ok(false);
        }
    };

    for identity in identities {
        let hash_alg = handle.best_supported_rsa_hash().await?.flatten();
        let result = handle
            .authenticate_publickey_with(user, identity, hash_alg, &mut agent)
            .await;
        if let Ok(result) = result {
            if result.success() {
                tracing::debug!("Authenticated with SSH agent identity");
                return Ok(true);
            }
        }
    }

    Ok(false)
}

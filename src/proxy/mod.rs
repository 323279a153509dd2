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

//! Proxying sessions to remote SSH servers.
//!
//! [`ProxyTunnel`] turns a remote [`Endpoint`] into a session handler: it
//! connects to the endpoint's address as the endpoint's `user` (or the local
//! user when no override is set), opens a channel shaped like the local
//! session, and relays until either side closes. Connections are never
//! retried; every failure is reported to the client and ends only that
//! session.

pub mod client;
pub mod relay;

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use crate::directory::Endpoint;
use crate::middleware::{handler_fn, Handler};
use crate::server::session::Session;
use crate::shared::error::ProxyError;
use crate::shared::validation::parse_address;

pub use client::RemoteClient;
pub use relay::{relay, RelayEnd, RelayOutcome, RemoteChannel, RemoteEvent};

/// How to verify remote host keys.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum HostKeyCheck {
    /// Trust any key.
    AcceptAny,
    /// Check against a specific known_hosts file.
    KnownHostsFile(PathBuf),
    /// Check against `~/.ssh/known_hosts`.
    #[default]
    DefaultKnownHosts,
}

/// Directory-wide settings for outbound connections.
#[derive(Debug, Clone)]
pub struct ProxyConfig {
    /// Keys tried after an endpoint's own identity files.
    pub identity_files: Vec<PathBuf>,
    pub use_agent: bool,
    pub connect_timeout: Duration,
    pub host_key_check: HostKeyCheck,
    pub keepalive_interval: Option<Duration>,
}

impl Default for ProxyConfig {
    fn default() -> Self {
        Self {
            identity_files: default_identity_files(),
            use_agent: true,
            connect_timeout: Duration::from_secs(10),
            host_key_check: HostKeyCheck::default(),
            keepalive_interval: Some(Duration::from_secs(30)),
        }
    }
}

/// `~/.ssh/id_ed25519`, `~/.ssh/id_ecdsa` and `~/.ssh/id_rsa`.
pub fn default_identity_files() -> Vec<PathBuf> {
    let Some(home) = dirs::home_dir() else {
        return Vec::new();
    };
    ["id_ed25519", "id_ecdsa", "id_rsa"]
        .iter()
        .map(|name| home.join(".ssh").join(name))
        .collect()
}

/// Everything needed to reach one remote endpoint for one local user.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProxyTarget {
    pub endpoint: String,
    pub host: String,
    pub port: u16,
    /// `host:port`, for messages.
    pub address: String,
    /// Remote login name.
    pub user: String,
    pub identities: Vec<PathBuf>,
    pub use_agent: bool,
    pub connect_timeout: Duration,
    pub keepalive_interval: Option<Duration>,
    pub host_key_check: HostKeyCheck,
    /// Overrides the local session's command.
    pub command: Option<String>,
    pub env: Vec<(String, String)>,
}

/// Forwards sessions to remote endpoints.
#[derive(Debug, Clone, Default)]
pub struct ProxyTunnel {
    config: ProxyConfig,
}

impl ProxyTunnel {
    pub fn new(config: ProxyConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &ProxyConfig {
        &self.config
    }

    /// Work out where and as whom `local_user` connects for `endpoint`.
    pub fn target(&self, endpoint: &Endpoint, local_user: &str) -> Result<ProxyTarget, ProxyError> {
        let address = endpoint
            .address
            .as_deref()
            .filter(|_| endpoint.is_remote())
            .ok_or_else(|| ProxyError::NotRemote(endpoint.name.clone()))?;

        let parsed = parse_address(address).map_err(|e| ProxyError::Unreachable {
            address: address.to_string(),
            reason: e.to_string(),
        })?;

        let identities = endpoint
            .identity_files
            .iter()
            .chain(&self.config.identity_files)
            .cloned()
            .collect();

        Ok(ProxyTarget {
            endpoint: endpoint.name.clone(),
            address: parsed.to_string(),
            host: parsed.host,
            port: parsed.port,
            user: endpoint
                .user
                .clone()
                .unwrap_or_else(|| local_user.to_string()),
            identities,
            use_agent: self.config.use_agent,
            connect_timeout: endpoint
                .connect_timeout
                .unwrap_or(self.config.connect_timeout),
            keepalive_interval: self.config.keepalive_interval,
            host_key_check: self.config.host_key_check.clone(),
            command: endpoint.remote_command.clone(),
            env: endpoint.env.clone(),
        })
    }

    /// Connect `session` to `endpoint` and relay until one side closes.
    ///
    /// Returns the remote exit status.
    pub async fn open(&self, endpoint: &Endpoint, session: &Session) -> Result<u32, ProxyError> {
        let target = self.target(endpoint, session.user())?;

        let client = tokio::select! {
            client = RemoteClient::connect(&target) => client?,
            _ = session.cancelled() => return Ok(0),
        };

        let result = async {
            let mut channel = client.open_session(&target, session).await?;
            relay(session, &mut channel).await
        }
        .await;
        client.disconnect().await;

        let outcome = result?;
        tracing::info!(
            session = %session.id(),
            endpoint = %target.endpoint,
            address = %target.address,
            remote_user = %target.user,
            exit_status = ?outcome.exit_status,
            "Proxied session ended"
        );
        Ok(outcome.exit_status.unwrap_or(0))
    }

    /// The base handler of a remote endpoint.
    pub fn handler(self: &Arc<Self>, endpoint: Arc<Endpoint>) -> Handler {
        let tunnel = Arc::clone(self);
        handler_fn(move |session: Session| {
            let tunnel = Arc::clone(&tunnel);
            let endpoint = Arc::clone(&endpoint);
            async move {
                match tunnel.open(&endpoint, &session).await {
                    Ok(code) => session.exit(code),
                    Err(e) => {
                        tracing::warn!(
                            session = %session.id(),
                            endpoint = %endpoint.name,
                            error = %e,
                            "Proxy failed"
                        );
                        session.write_stderr(format!("{}: {e}\r\n", endpoint.name));
                        session.exit(1);
                    }
                }
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::middleware::builtin;
    use crate::server::session::SessionOutput;

    fn tunnel() -> ProxyTunnel {
        ProxyTunnel::new(ProxyConfig {
            identity_files: vec![PathBuf::from("/etc/sshlist/id_ed25519")],
            ..ProxyConfig::default()
        })
    }

    #[test]
    fn test_user_override_is_per_endpoint() {
        let server1 = Endpoint::remote("server1", "server1:22");
        let server2 = Endpoint::remote("server2", "server1:22").with_user("override_user");
        let tunnel = tunnel();

        let t1 = tunnel.target(&server1, "alice").unwrap();
        let t2 = tunnel.target(&server2, "alice").unwrap();

        assert_eq!(t1.address, t2.address);
        assert_eq!(t1.user, "alice");
        assert_eq!(t2.user, "override_user");
    }

    #[test]
    fn test_identity_order() {
        let endpoint =
            Endpoint::remote("app2", "app.addr:2222").with_identity_file("/keys/app2");
        let target = tunnel().target(&endpoint, "bob").unwrap();
        assert_eq!(
            target.identities,
            vec![
                PathBuf::from("/keys/app2"),
                PathBuf::from("/etc/sshlist/id_ed25519")
            ]
        );
        assert_eq!(target.port, 2222);
    }

    #[test]
    fn test_local_endpoint_is_not_proxied() {
        let endpoint = Endpoint::local("simple", vec![builtin::hello()]).with_address("127.0.0.1:2234");
        assert!(matches!(
            tunnel().target(&endpoint, "bob"),
            Err(ProxyError::NotRemote(_))
        ));
    }

    #[test]
    fn test_endpoint_overrides() {
        let endpoint = Endpoint::remote("db", "db.internal")
            .with_connect_timeout(Duration::from_secs(3))
            .with_remote_command("psql")
            .with_env("PGDATABASE", "app");
        let target = tunnel().target(&endpoint, "bob").unwrap();
        assert_eq!(target.connect_timeout, Duration::from_secs(3));
        assert_eq!(target.command.as_deref(), Some("psql"));
        assert_eq!(target.address, "db.internal:22");
        assert_eq!(target.env, vec![("PGDATABASE".to_string(), "app".to_string())]);
    }

    #[tokio::test]
    async fn test_unreachable_remote_reports_to_client() {
        // Bind and drop a listener to get a port nothing listens on.
        let port = {
            let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
            listener.local_addr().unwrap().port()
        };
        let endpoint = Arc::new(Endpoint::remote("gone", format!("127.0.0.1:{port}")));
        let tunnel = Arc::new(ProxyTunnel::new(ProxyConfig {
            identity_files: Vec::new(),
            use_agent: false,
            connect_timeout: Duration::from_secs(2),
            host_key_check: HostKeyCheck::AcceptAny,
            keepalive_interval: None,
        }));

        let (session, mut peer) = Session::builder("alice").build();
        tunnel.handler(endpoint)(session).await;

        let Some(SessionOutput::Stderr(message)) = peer.output.recv().await else {
            panic!("expected an error message");
        };
        assert!(String::from_utf8_lossy(&message).starts_with("gone: "));
        assert_eq!(peer.output.recv().await, Some(SessionOutput::Exit(1)));
    }
}

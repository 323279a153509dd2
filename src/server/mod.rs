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

//! SSH server implementation using russh.
//!
//! # Overview
//!
//! - [`DirectoryServer`]: validates a [`DirectoryConfig`], binds every
//!   listener it plans, then serves them
//! - [`SshHandler`]: handles SSH protocol events for each connection
//! - [`Router`]: sends started sessions to the menu or an endpoint pipeline
//! - [`auth`]: the authentication gate
//!
//! Startup is all-or-nothing. Host keys are loaded and every listener is
//! bound before the first connection is accepted, so a bad address or an
//! unreadable key aborts the launch.
//!
//! # Example
//!
//! ```no_run
//! use sshlist::directory::{DirectoryConfig, Endpoint};
//! use sshlist::server::DirectoryServer;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = DirectoryConfig::new("SSH Directories")
//!         .with_listen("0.0.0.0", 2233)
//!         .with_endpoint(Endpoint::remote("app1", "app1.addr:22"));
//!
//!     DirectoryServer::new(config)?.run().await
//! }
//! ```

pub mod auth;
pub mod handler;
pub mod menu;
pub mod router;
pub mod session;

use std::collections::HashSet;
use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use russh::server::Server;
use tokio::net::TcpListener;
use tokio::task::JoinSet;

use crate::directory::{Directory, DirectoryConfig, Endpoint, Limits, ListenerConfig, Registry};
use crate::keygen;
use crate::shared::error::ConfigError;

pub use self::handler::{ListenerContext, SshHandler};
pub use self::router::{RouteState, Router};
pub use self::session::{PtyConfig, Session, SessionId, SessionInfo, WindowSize};

/// The directory server.
///
/// Owns the validated configuration and the live endpoint [`Directory`].
pub struct DirectoryServer {
    config: DirectoryConfig,
    directory: Arc<Directory>,
    listeners: Vec<ListenerConfig>,
}

impl std::fmt::Debug for DirectoryServer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DirectoryServer")
            .field("title", &self.config.title)
            .field("listeners", &self.listeners.len())
            .field("endpoints", &self.directory.snapshot().len())
            .finish()
    }
}

impl DirectoryServer {
    /// Validate `config` and plan its listeners.
    ///
    /// # Errors
    ///
    /// Returns a [`ConfigError`] for duplicate endpoint names, unparsable
    /// endpoint addresses or a port range overflow.
    pub fn new(config: DirectoryConfig) -> Result<Self, ConfigError> {
        let registry = config.registry()?;
        let listeners = config.listener_plan(&registry)?;
        tracing::debug!(
            endpoints = registry.len(),
            listeners = listeners.len(),
            "Directory configured"
        );

        Ok(Self {
            config,
            directory: Arc::new(Directory::new(registry)),
            listeners,
        })
    }

    pub fn config(&self) -> &DirectoryConfig {
        &self.config
    }

    /// The live endpoint set. Swap it with [`DirectoryServer::reload`].
    pub fn directory(&self) -> &Arc<Directory> {
        &self.directory
    }

    pub fn listeners(&self) -> &[ListenerConfig] {
        &self.listeners
    }

    /// Replace the endpoint set. Sessions already dispatched keep running;
    /// new sessions see the new set. Listeners are not re-planned.
    pub fn reload(&self, endpoints: Vec<Endpoint>) -> Result<u64, ConfigError> {
        let registry = Registry::register(endpoints)?;
        let count = registry.len();
        let version = self.directory.replace(registry);
        tracing::info!(version, endpoints = count, "Endpoint directory reloaded");
        Ok(version)
    }

    /// Run until the process is stopped.
    pub async fn run(&self) -> Result<()> {
        self.run_until(std::future::pending()).await
    }

    /// Run until `shutdown` resolves.
    pub async fn run_until(&self, shutdown: impl Future<Output = ()>) -> Result<()> {
        let bound = self.bind().await?;
        bound.serve(shutdown).await
    }

    /// Load host keys and bind every planned listener without serving yet.
    pub async fn bind(&self) -> Result<BoundServer> {
        let keys = load_host_keys(&self.config)?;
        tracing::info!(key_count = keys.len(), "Loaded host keys");

        let router = Arc::new(Router::from_config(
            &self.config,
            Arc::clone(&self.directory),
        ));

        let mut seen = HashSet::new();
        let mut listeners = Vec::with_capacity(self.listeners.len());
        for listener in &self.listeners {
            let address = resolve_listen_address(&listener.address).await?;
            // Port 0 binds a fresh port every time.
            if address.port() != 0 && !seen.insert(address) {
                return Err(ConfigError::DuplicateListener(address).into());
            }
            let socket = TcpListener::bind(address)
                .await
                .map_err(|source| ConfigError::Bind { address, source })?;

            listeners.push(BoundListener {
                russh_config: Arc::new(build_russh_config(keys.clone(), &listener.limits)),
                context: Arc::new(ListenerContext::new(listener.clone(), Arc::clone(&router))),
                socket,
            });
        }

        Ok(BoundServer { listeners })
    }
}

/// Listeners that are bound but not yet accepting.
pub struct BoundServer {
    listeners: Vec<BoundListener>,
}

struct BoundListener {
    context: Arc<ListenerContext>,
    socket: TcpListener,
    russh_config: Arc<russh::server::Config>,
}

impl BoundServer {
    /// Listener names with their bound addresses.
    pub fn local_addrs(&self) -> Vec<(String, SocketAddr)> {
        self.listeners
            .iter()
            .filter_map(|l| {
                let addr = l.socket.local_addr().ok()?;
                Some((l.context.config.name().to_string(), addr))
            })
            .collect()
    }

    /// Serve every listener until `shutdown` resolves or one of them fails.
    pub async fn serve(self, shutdown: impl Future<Output = ()>) -> Result<()> {
        let mut tasks = JoinSet::new();

        for listener in self.listeners {
            let name = listener.context.config.name().to_string();
            tracing::info!(
                listener = %name,
                local_addr = ?listener.socket.local_addr(),
                "SSH server listening"
            );

            tasks.spawn(async move {
                let mut runner = ListenerRunner {
                    context: listener.context,
                };
                let result = runner
                    .run_on_socket(listener.russh_config, &listener.socket)
                    .await;
                (name, result)
            });
        }

        tokio::pin!(shutdown);
        let outcome = tokio::select! {
            _ = &mut shutdown => {
                tracing::info!("Shutting down listeners");
                Ok(())
            }
            Some(joined) = tasks.join_next() => match joined {
                Ok((name, Ok(()))) => Err(anyhow::anyhow!("Listener '{name}' stopped unexpectedly")),
                Ok((name, Err(e))) => Err(anyhow::anyhow!("Listener '{name}' failed: {e}")),
                Err(e) => Err(anyhow::anyhow!("Listener task failed: {e}")),
            },
        };

        tasks.abort_all();
        outcome
    }
}

/// Internal struct that implements the russh::server::Server trait.
#[derive(Clone)]
struct ListenerRunner {
    context: Arc<ListenerContext>,
}

impl russh::server::Server for ListenerRunner {
    type Handler = SshHandler;

    fn new_client(&mut self, peer_addr: Option<SocketAddr>) -> Self::Handler {
        tracing::info!(
            peer = ?peer_addr,
            listener = %self.context.config.name(),
            "New client connection"
        );
        SshHandler::new(peer_addr, Arc::clone(&self.context))
    }

    fn handle_session_error(&mut self, error: <Self::Handler as russh::server::Handler>::Error) {
        tracing::error!(
            error = %error,
            listener = %self.context.config.name(),
            "Session error"
        );
    }
}

/// Build the russh server configuration for one listener.
fn build_russh_config(keys: Vec<russh::keys::PrivateKey>, limits: &Limits) -> russh::server::Config {
    russh::server::Config {
        keys,
        auth_rejection_time: limits.auth_rejection_time,
        auth_rejection_time_initial: Some(Duration::from_secs(0)),
        max_auth_attempts: limits.max_auth_attempts,
        inactivity_timeout: limits.idle_timeout,
        ..Default::default()
    }
}

/// Load every configured host key, generating missing ones.
fn load_host_keys(config: &DirectoryConfig) -> Result<Vec<russh::keys::PrivateKey>, ConfigError> {
    if config.host_keys.is_empty() {
        return Err(ConfigError::NoHostKeys);
    }

    config
        .host_keys
        .iter()
        .map(|path| {
            keygen::load_or_generate(path).map_err(|e| ConfigError::HostKey {
                path: path.clone(),
                reason: format!("{e:#}"),
            })
        })
        .collect()
}

async fn resolve_listen_address(address: &str) -> Result<SocketAddr, ConfigError> {
    let mut addrs = tokio::net::lookup_host(address)
        .await
        .map_err(|e| ConfigError::ListenAddress {
            address: address.to_string(),
            reason: e.to_string(),
        })?;
    addrs.next().ok_or_else(|| ConfigError::ListenAddress {
        address: address.to_string(),
        reason: "no addresses found".to_string(),
    })
}

/// Build and run a directory server until the process is stopped.
pub async fn serve(config: DirectoryConfig) -> Result<()> {
    DirectoryServer::new(config)
        .context("Invalid directory configuration")?
        .run()
        .await
}

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

//! Directory configuration and the listener plan derived from it.
//!
//! A [`DirectoryConfig`] is built once at startup and never mutated. The
//! listeners to open are computed by applying its [`ServerFactory`], a plain
//! function, to the main server endpoint and to each local endpoint.
//!
//! ```
//! use sshlist::directory::{DirectoryConfig, Endpoint, ListenerRole};
//! use sshlist::middleware::builtin;
//!
//! let config = DirectoryConfig::new("SSH Directories")
//!     .with_listen("127.0.0.1", 2233)
//!     .with_endpoint(Endpoint::local("simple", vec![builtin::hello()]))
//!     .with_endpoint(Endpoint::remote("server1", "server1:22"));
//!
//! let registry = config.registry().unwrap();
//! let listeners = config.listener_plan(&registry).unwrap();
//! assert_eq!(listeners.len(), 2);
//! assert_eq!(listeners[0].role, ListenerRole::Main);
//! assert_eq!(listeners[1].address, "127.0.0.1:2234");
//! ```

use std::path::PathBuf;
use std::time::Duration;

use super::endpoint::Endpoint;
use super::registry::Registry;
use crate::middleware::{self, Middleware};
use crate::proxy::ProxyConfig;
use crate::server::auth::AuthPolicy;
use crate::shared::error::ConfigError;

/// Derives the configuration of one listener from the endpoint it serves.
pub type ServerFactory = fn(&DirectoryConfig, &Endpoint) -> ListenerConfig;

/// Connection limits applied to every listener.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Limits {
    pub max_auth_attempts: usize,
    /// Delay before a rejected authentication attempt is answered.
    pub auth_rejection_time: Duration,
    /// Bound on each keyboard-interactive round trip.
    pub challenge_timeout: Duration,
    /// Disconnect after this long without traffic.
    pub idle_timeout: Option<Duration>,
}

impl Default for Limits {
    fn default() -> Self {
        Self {
            max_auth_attempts: 6,
            auth_rejection_time: Duration::from_secs(1),
            challenge_timeout: Duration::from_secs(60),
            idle_timeout: Some(Duration::from_secs(3600)),
        }
    }
}

/// What a listener serves.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ListenerRole {
    /// The directory menu.
    Main,
    /// A single local endpoint, addressed directly.
    Endpoint(String),
}

/// Configuration of one listening server instance.
#[derive(Debug, Clone)]
pub struct ListenerConfig {
    pub role: ListenerRole,
    /// `host:port` to bind.
    pub address: String,
    pub auth: AuthPolicy,
    pub limits: Limits,
    pub banner: Option<String>,
}

impl ListenerConfig {
    /// `main` or the endpoint name, for logs.
    pub fn name(&self) -> &str {
        match &self.role {
            ListenerRole::Main => "main",
            ListenerRole::Endpoint(name) => name,
        }
    }
}

/// The default [`ServerFactory`]: the main server gets `main_auth`, endpoint
/// listeners get `endpoint_auth`.
pub fn default_server_config(config: &DirectoryConfig, endpoint: &Endpoint) -> ListenerConfig {
    let (role, auth) = if endpoint.is_main_server {
        (ListenerRole::Main, config.main_auth.clone())
    } else {
        (
            ListenerRole::Endpoint(endpoint.name.clone()),
            config.endpoint_auth.clone(),
        )
    };

    ListenerConfig {
        role,
        address: endpoint.address.clone().unwrap_or_default(),
        auth,
        limits: config.limits.clone(),
        banner: config.banner.clone(),
    }
}

/// Everything needed to run a directory server.
#[derive(Clone)]
pub struct DirectoryConfig {
    pub title: String,
    pub bind_address: String,
    pub listen_port: u16,
    pub host_keys: Vec<PathBuf>,
    pub factory: ServerFactory,
    pub endpoints: Vec<Endpoint>,
    pub main_auth: AuthPolicy,
    pub endpoint_auth: AuthPolicy,
    /// Wrapped around every endpoint's own middlewares.
    pub shared_middlewares: Vec<Middleware>,
    pub proxy: ProxyConfig,
    pub limits: Limits,
    pub banner: Option<String>,
    /// Open a listener for each local endpoint as well.
    pub serve_endpoints: bool,
}

impl std::fmt::Debug for DirectoryConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DirectoryConfig")
            .field("title", &self.title)
            .field("bind_address", &self.bind_address)
            .field("listen_port", &self.listen_port)
            .field("host_keys", &self.host_keys)
            .field("endpoints", &self.endpoints)
            .field("main_auth", &self.main_auth)
            .field("endpoint_auth", &self.endpoint_auth)
            .field("shared_middlewares", &self.shared_middlewares.len())
            .field("proxy", &self.proxy)
            .field("limits", &self.limits)
            .field("serve_endpoints", &self.serve_endpoints)
            .finish()
    }
}

impl DirectoryConfig {
    pub const DEFAULT_PORT: u16 = 2233;

    pub fn new(title: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            bind_address: "0.0.0.0".to_string(),
            listen_port: Self::DEFAULT_PORT,
            host_keys: vec![PathBuf::from(".ssh_keys/server")],
            factory: default_server_config,
            endpoints: Vec::new(),
            main_auth: AuthPolicy::open(),
            endpoint_auth: AuthPolicy::open(),
            shared_middlewares: middleware::shared(),
            proxy: ProxyConfig::default(),
            limits: Limits::default(),
            banner: None,
            serve_endpoints: true,
        }
    }

    pub fn with_listen(mut self, bind_address: impl Into<String>, port: u16) -> Self {
        self.bind_address = bind_address.into();
        self.listen_port = port;
        self
    }

    pub fn with_host_key(mut self, path: impl Into<PathBuf>) -> Self {
        self.host_keys = vec![path.into()];
        self
    }

    pub fn with_endpoint(mut self, endpoint: Endpoint) -> Self {
        self.endpoints.push(endpoint);
        self
    }

    pub fn with_endpoints(mut self, endpoints: impl IntoIterator<Item = Endpoint>) -> Self {
        self.endpoints.extend(endpoints);
        self
    }

    pub fn with_factory(mut self, factory: ServerFactory) -> Self {
        self.factory = factory;
        self
    }

    pub fn with_main_auth(mut self, auth: AuthPolicy) -> Self {
        self.main_auth = auth;
        self
    }

    pub fn with_endpoint_auth(mut self, auth: AuthPolicy) -> Self {
        self.endpoint_auth = auth;
        self
    }

    pub fn with_shared_middlewares(mut self, middlewares: Vec<Middleware>) -> Self {
        self.shared_middlewares = middlewares;
        self
    }

    pub fn with_proxy(mut self, proxy: ProxyConfig) -> Self {
        self.proxy = proxy;
        self
    }

    pub fn with_limits(mut self, limits: Limits) -> Self {
        self.limits = limits;
        self
    }

    pub fn with_serve_endpoints(mut self, serve: bool) -> Self {
        self.serve_endpoints = serve;
        self
    }

    /// Validate the configured endpoints.
    pub fn registry(&self) -> Result<Registry, ConfigError> {
        Registry::register(self.endpoints.iter().cloned())
    }

    /// Address of the main listener.
    pub fn main_address(&self) -> String {
        join_host_port(&self.bind_address, self.listen_port)
    }

    /// One listener for the main server, then one per local endpoint when
    /// `serve_endpoints` is set. Local endpoints without an address are
    /// given consecutive ports after the main one, in configuration order.
    /// With a main port of 0 they are given port 0 as well, so each one gets
    /// its own port from the OS.
    pub fn listener_plan(&self, registry: &Registry) -> Result<Vec<ListenerConfig>, ConfigError> {
        let main = Endpoint::main_server(self.title.clone(), self.main_address());
        let mut listeners = vec![(self.factory)(self, &main)];

        if !self.serve_endpoints {
            return Ok(listeners);
        }

        for (i, endpoint) in registry.local_endpoints().enumerate() {
            let address = match &endpoint.address {
                Some(address) => address.clone(),
                None if self.listen_port == 0 => join_host_port(&self.bind_address, 0),
                None => {
                    let port = u16::try_from(usize::from(self.listen_port) + 1 + i)
                        .map_err(|_| {
                            ConfigError::Invalid(format!(
                                "no free port left for endpoint '{}'",
                                endpoint.name
                            ))
                        })?;
                    join_host_port(&self.bind_address, port)
                }
            };

            let mut endpoint = Endpoint::clone(endpoint);
            endpoint.address = Some(address);
            listeners.push((self.factory)(self, &endpoint));
        }

        Ok(listeners)
    }
}

fn join_host_port(host: &str, port: u16) -> String {
    if host.contains(':') {
        format!("[{host}]:{port}")
    } else {
        format!("{host}:{port}")
    }
}

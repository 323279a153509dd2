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

//! Named destinations listed in the directory.

use std::path::PathBuf;
use std::time::Duration;

use crate::middleware::Middleware;

/// How an endpoint is served.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EndpointKind {
    /// Runs its middlewares in-process. `address`, if set, is where its own
    /// listener binds.
    Local,
    /// Proxied to the SSH server at `address`.
    Remote,
}

/// A selectable destination.
///
/// An endpoint with middlewares is [`EndpointKind::Local`]; one with only an
/// address is [`EndpointKind::Remote`]. An endpoint with neither, or without a
/// name, is not reachable and is dropped when the registry is built.
///
/// ```
/// use sshlist::directory::{Endpoint, EndpointKind};
///
/// let server2 = Endpoint::remote("server2", "server1:22").with_user("override_user");
/// assert_eq!(server2.kind(), Some(EndpointKind::Remote));
/// assert_eq!(server2.user.as_deref(), Some("override_user"));
///
/// assert_eq!(Endpoint::new("nothing").kind(), None);
/// ```
#[derive(Clone, Default)]
pub struct Endpoint {
    pub name: String,
    pub address: Option<String>,
    /// Remote login name; defaults to the local user.
    pub user: Option<String>,
    pub middlewares: Vec<Middleware>,
    /// Set on the synthetic endpoint that describes the directory's own
    /// listener.
    pub is_main_server: bool,
    pub description: Option<String>,
    /// Command to run on the remote host instead of a login shell.
    pub remote_command: Option<String>,
    /// Keys tried before the directory-wide identities.
    pub identity_files: Vec<PathBuf>,
    pub connect_timeout: Option<Duration>,
    /// Variables set on the remote session.
    pub env: Vec<(String, String)>,
}

impl std::fmt::Debug for Endpoint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Endpoint")
            .field("name", &self.name)
            .field("address", &self.address)
            .field("user", &self.user)
            .field("middlewares", &self.middlewares.len())
            .field("is_main_server", &self.is_main_server)
            .field("description", &self.description)
            .field("remote_command", &self.remote_command)
            .field("identity_files", &self.identity_files)
            .field("connect_timeout", &self.connect_timeout)
            .finish()
    }
}

impl Endpoint {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Default::default()
        }
    }

    /// An endpoint proxied to `address`.
    pub fn remote(name: impl Into<String>, address: impl Into<String>) -> Self {
        Self::new(name).with_address(address)
    }

    /// An endpoint served locally by `middlewares`.
    pub fn local(name: impl Into<String>, middlewares: Vec<Middleware>) -> Self {
        Self {
            middlewares,
            ..Self::new(name)
        }
    }

    /// The endpoint describing the directory's own listener.
    pub fn main_server(title: impl Into<String>, address: impl Into<String>) -> Self {
        Self {
            is_main_server: true,
            ..Self::remote(title, address)
        }
    }

    pub fn with_address(mut self, address: impl Into<String>) -> Self {
        self.address = Some(address.into());
        self
    }

    pub fn with_user(mut self, user: impl Into<String>) -> Self {
        self.user = Some(user.into());
        self
    }

    pub fn with_middleware(mut self, middleware: Middleware) -> Self {
        self.middlewares.push(middleware);
        self
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    pub fn with_remote_command(mut self, command: impl Into<String>) -> Self {
        self.remote_command = Some(command.into());
        self
    }

    pub fn with_identity_file(mut self, path: impl Into<PathBuf>) -> Self {
        self.identity_files.push(path.into());
        self
    }

    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = Some(timeout);
        self
    }

    pub fn with_env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.push((key.into(), value.into()));
        self
    }

    /// `None` when the endpoint has neither middlewares nor an address.
    pub fn kind(&self) -> Option<EndpointKind> {
        if !self.middlewares.is_empty() {
            Some(EndpointKind::Local)
        } else if self.address.as_deref().is_some_and(|a| !a.trim().is_empty()) {
            Some(EndpointKind::Remote)
        } else {
            None
        }
    }

    pub fn is_local(&self) -> bool {
        self.kind() == Some(EndpointKind::Local)
    }

    pub fn is_remote(&self) -> bool {
        self.kind() == Some(EndpointKind::Remote)
    }

    /// The text shown next to the name in listings.
    pub fn summary(&self) -> String {
        if let Some(description) = &self.description {
            return description.clone();
        }
        match (self.kind(), &self.address) {
            (Some(EndpointKind::Remote), Some(address)) => match &self.user {
                Some(user) => format!("{user}@{address}"),
                None => address.clone(),
            },
            (Some(EndpointKind::Local), _) => "local".to_string(),
            _ => String::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::middleware::Handler;
    use std::sync::Arc;

    #[test]
    fn test_kind() {
        let passthrough: Middleware = Arc::new(|next: Handler| next);
        assert_eq!(
            Endpoint::local("app", vec![passthrough.clone()]).kind(),
            Some(EndpointKind::Local)
        );
        // Middlewares win over an address: the address is the local listener.
        assert_eq!(
            Endpoint::local("app", vec![passthrough])
                .with_address("127.0.0.1:2234")
                .kind(),
            Some(EndpointKind::Local)
        );
        assert_eq!(
            Endpoint::remote("server1", "server1:22").kind(),
            Some(EndpointKind::Remote)
        );
        assert_eq!(Endpoint::remote("blank", "  ").kind(), None);
    }

    #[test]
    fn test_summary() {
        assert_eq!(
            Endpoint::remote("s2", "server1:22")
                .with_user("override_user")
                .summary(),
            "override_user@server1:22"
        );
        assert_eq!(
            Endpoint::remote("s1", "server1:22")
                .with_description("Primary box")
                .summary(),
            "Primary box"
        );
    }

    #[test]
    fn test_main_server() {
        let main = Endpoint::main_server("SSH Directories", "0.0.0.0:2233");
        assert!(main.is_main_server);
        assert!(main.is_remote());
    }
}

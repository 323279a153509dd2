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

//! Authentication types shared by the gate and its providers.

use std::net::SocketAddr;

/// The result of a single authentication check.
///
/// ```
/// use sshlist::shared::auth_types::AuthResult;
///
/// fn check(answer: &str) -> AuthResult {
///     if answer == "5" { AuthResult::Accept } else { AuthResult::Reject }
/// }
/// assert!(check("5").is_accepted());
/// assert!(check("4").is_rejected());
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum AuthResult {
    /// The credential was accepted.
    Accept,

    /// The credential was rejected.
    #[default]
    Reject,
}

impl AuthResult {
    /// Returns `true` if the authentication was successful.
    pub fn is_accepted(&self) -> bool {
        matches!(self, AuthResult::Accept)
    }

    /// Returns `true` if the authentication was rejected.
    pub fn is_rejected(&self) -> bool {
        matches!(self, AuthResult::Reject)
    }
}

impl From<bool> for AuthResult {
    fn from(accepted: bool) -> Self {
        if accepted {
            AuthResult::Accept
        } else {
            AuthResult::Reject
        }
    }
}

/// What an authentication provider knows about the connection being checked.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthContext {
    /// The username requested by the client.
    pub user: String,

    /// The client's address, when known.
    pub peer_addr: Option<SocketAddr>,

    /// Name of the listener handling the connection (`main` or an endpoint name).
    pub listener: String,
}

impl AuthContext {
    /// Create a context for the given user on the main listener.
    pub fn new(user: impl Into<String>) -> Self {
        Self {
            user: user.into(),
            peer_addr: None,
            listener: "main".to_string(),
        }
    }

    /// Set the peer address.
    pub fn with_peer(mut self, peer_addr: Option<SocketAddr>) -> Self {
        self.peer_addr = peer_addr;
        self
    }

    /// Set the listener name.
    pub fn with_listener(mut self, listener: impl Into<String>) -> Self {
        self.listener = listener.into();
        self
    }
}

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

//! Error taxonomy for the directory server.
//!
//! Errors fall into two scopes:
//!
//! - [`ConfigError`]: startup and configuration failures. These are fatal
//!   and abort the launch before any listener serves a connection.
//! - [`AuthError`], [`ProxyError`] and [`RegistryError`]: failures scoped to a
//!   single connection. They close or deny that connection only.

use std::io;
use std::net::SocketAddr;
use std::path::PathBuf;
use thiserror::Error;

/// Fatal configuration and startup errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Two endpoints share the same name.
    #[error("duplicate endpoint name '{0}'")]
    DuplicateEndpoint(String),

    /// An endpoint address could not be parsed as `host[:port]`.
    #[error("endpoint '{endpoint}' has invalid address '{address}': {reason}")]
    InvalidAddress {
        endpoint: String,
        address: String,
        reason: String,
    },

    /// A configuration file names a local handler that does not exist.
    #[error("endpoint '{endpoint}' references unknown handler '{handler}'")]
    UnknownHandler { endpoint: String, handler: String },

    /// Two listeners resolve to the same socket address.
    #[error("listen address {0} is used by more than one listener")]
    DuplicateListener(SocketAddr),

    /// A listener address could not be resolved.
    #[error("cannot resolve listen address '{address}': {reason}")]
    ListenAddress { address: String, reason: String },

    /// Binding a listener failed.
    #[error("failed to bind {address}: {source}")]
    Bind {
        address: SocketAddr,
        #[source]
        source: io::Error,
    },

    /// No host key was configured.
    #[error("no host keys configured")]
    NoHostKeys,

    /// A host key could not be loaded or generated.
    #[error("host key {path}: {reason}")]
    HostKey { path: PathBuf, reason: String },

    /// Any other invalid setting.
    #[error("invalid configuration: {0}")]
    Invalid(String),
}

/// Lookup failures against the endpoint registry.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RegistryError {
    /// No endpoint with the given name exists in the current snapshot.
    #[error("no endpoint named '{0}'")]
    NotFound(String),
}

/// Authentication failures.
///
/// None of these are fatal to the server; each one denies a single
/// connection attempt.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AuthError {
    /// The client went away while a challenge was outstanding.
    #[error("challenge channel closed")]
    ChallengeClosed,

    /// The client did not answer a challenge in time.
    #[error("challenge timed out after {0:?}")]
    ChallengeTimeout(std::time::Duration),

    /// The client answered with a response that could not be interpreted.
    #[error("malformed challenge response: {0}")]
    MalformedResponse(String),
}

/// Failures of a proxied session.
///
/// The message of each variant is written verbatim to the client before the
/// local session is closed, so it avoids internal detail.
#[derive(Debug, Error)]
pub enum ProxyError {
    /// The endpoint has no remote address.
    #[error("endpoint '{0}' has no remote address")]
    NotRemote(String),

    /// Connecting to the remote host failed.
    #[error("could not connect to {address}: {reason}")]
    Unreachable { address: String, reason: String },

    /// Connecting to the remote host took too long.
    #[error("connection to {address} timed out after {timeout:?}")]
    Timeout {
        address: String,
        timeout: std::time::Duration,
    },

    /// The remote host key did not pass verification.
    #[error("host key verification failed for {0}")]
    HostKeyRejected(String),

    /// Every configured authentication method was refused.
    #[error("authentication as {user} on {address} failed")]
    AuthFailed { user: String, address: String },

    /// A channel request on the remote side was refused or failed.
    #[error("remote channel error: {0}")]
    Channel(String),

    /// The transport dropped while the session was active.
    #[error("connection to remote lost: {0}")]
    Transport(String),
}

impl From<russh::Error> for ProxyError {
    fn from(err: russh::Error) -> Self {
        ProxyError::Transport(err.to_string())
    }
}

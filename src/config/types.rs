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

//! Configuration types for sshlist.
//!
//! This module defines the YAML schema of the directory configuration file.
//! Every section is optional and falls back to its defaults.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::PathBuf;

/// Root of the configuration file.
///
/// # Example YAML
///
/// ```yaml
/// title: "SSH Directories"
/// server:
///   bind_address: "0.0.0.0"
///   port: 2233
/// endpoints:
///   - name: app1
///     address: app1.addr:22
///   - name: server2
///     address: server1:22
///     user: override_user
///   - name: simple
///     handlers: [hello]
/// ```
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct DirectoryFileConfig {
    /// Heading of the menu.
    pub title: String,

    /// Listener settings.
    pub server: ServerSettings,

    /// Connection limits.
    pub limits: LimitsConfig,

    /// Authentication for the main listener and for endpoint listeners.
    pub auth: AuthConfig,

    /// Outbound connection settings for remote endpoints.
    pub proxy: ProxySettings,

    /// Middlewares wrapped around every endpoint, outermost first.
    pub middlewares: Vec<String>,

    /// The directory entries, in menu order.
    pub endpoints: Vec<EndpointConfig>,
}

impl Default for DirectoryFileConfig {
    fn default() -> Self {
        Self {
            title: default_title(),
            server: ServerSettings::default(),
            limits: LimitsConfig::default(),
            auth: AuthConfig::default(),
            proxy: ProxySettings::default(),
            middlewares: default_middlewares(),
            endpoints: Vec::new(),
        }
    }
}

/// Listener settings.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ServerSettings {
    /// Address to bind to (e.g., "0.0.0.0" or "127.0.0.1").
    ///
    /// Default: "0.0.0.0"
    pub bind_address: String,

    /// Port of the main listener. Local endpoints without an address
    /// listen on the following ports.
    ///
    /// Default: 2233
    pub port: u16,

    /// Host private keys. Missing files are generated as Ed25519 keys.
    ///
    /// Default: [".ssh_keys/server"]
    pub host_keys: Vec<PathBuf>,

    /// Also open a listener for each local endpoint.
    ///
    /// Default: true
    pub serve_endpoints: bool,

    /// Text shown to clients before authentication.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub banner: Option<String>,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            bind_address: default_bind_address(),
            port: default_port(),
            host_keys: vec![PathBuf::from(".ssh_keys/server")],
            serve_endpoints: true,
            banner: None,
        }
    }
}

/// Connection limits. Durations are in seconds.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct LimitsConfig {
    /// Default: 6
    pub max_auth_attempts: usize,

    /// Delay before answering a rejected authentication attempt.
    ///
    /// Default: 1
    pub auth_rejection_time: u64,

    /// Time allowed for each keyboard-interactive round trip.
    ///
    /// Default: 60
    pub challenge_timeout: u64,

    /// Disconnect idle clients after this long. 0 disables the timeout.
    ///
    /// Default: 3600
    pub idle_timeout: u64,
}

impl Default for LimitsConfig {
    fn default() -> Self {
        Self {
            max_auth_attempts: 6,
            auth_rejection_time: 1,
            challenge_timeout: 60,
            idle_timeout: 3600,
        }
    }
}

/// Authentication for both kinds of listener.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct AuthConfig {
    /// The directory menu.
    pub main: AuthSection,

    /// Listeners of local endpoints.
    pub endpoints: AuthSection,
}

/// Strategies of one listener. A section with none of them lets every
/// client in.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct AuthSection {
    /// Public keys in authorized_keys format.
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub authorized_keys: Vec<String>,

    /// authorized_keys files to read at startup.
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub authorized_keys_files: Vec<PathBuf>,

    /// User name to Argon2id hash, as printed by `sshlist hash-password`.
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub passwords: BTreeMap<String, String>,

    /// A fixed keyboard-interactive questionnaire.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub keyboard_interactive: Option<ChallengeConfig>,
}

impl AuthSection {
    pub fn is_open(&self) -> bool {
        self.authorized_keys.is_empty()
            && self.authorized_keys_files.is_empty()
            && self.passwords.is_empty()
            && self.keyboard_interactive.is_none()
    }
}

/// Keyboard-interactive questions; every answer must match.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct ChallengeConfig {
    pub name: String,
    pub instruction: String,
    pub questions: Vec<QuestionConfig>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct QuestionConfig {
    pub prompt: String,
    pub answer: String,
    /// Show what the user types.
    #[serde(default = "default_true")]
    pub echo: bool,
}

/// How remote host keys are verified.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum HostKeyPolicy {
    /// Check `known_hosts_file`, or `~/.ssh/known_hosts` when unset.
    #[default]
    KnownHosts,
    /// Trust every key. Only for lab setups.
    AcceptAny,
}

/// Outbound connection settings.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ProxySettings {
    /// Keys tried after an endpoint's own. Empty means the usual
    /// `~/.ssh/id_*` files.
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub identity_files: Vec<PathBuf>,

    /// Try keys from the SSH agent last.
    ///
    /// Default: true
    pub use_agent: bool,

    /// Seconds.
    ///
    /// Default: 10
    pub connect_timeout: u64,

    /// Seconds; 0 disables keepalives.
    ///
    /// Default: 30
    pub keepalive_interval: u64,

    pub host_key_policy: HostKeyPolicy,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub known_hosts_file: Option<PathBuf>,
}

impl Default for ProxySettings {
    fn default() -> Self {
        Self {
            identity_files: Vec::new(),
            use_agent: true,
            connect_timeout: 10,
            keepalive_interval: 30,
            host_key_policy: HostKeyPolicy::default(),
            known_hosts_file: None,
        }
    }
}

/// One directory entry.
///
/// An entry with `handlers` is served in-process; an entry with only an
/// `address` is proxied to that host.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct EndpointConfig {
    pub name: String,

    /// `host[:port]` of the remote host, or the listen address of a local
    /// endpoint.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub address: Option<String>,

    /// Remote login name; defaults to the connecting user's name.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,

    /// Builtin handlers, outermost first.
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub handlers: Vec<String>,

    /// Run this instead of a login shell on the remote host.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub remote_command: Option<String>,

    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub identity_files: Vec<PathBuf>,

    /// Seconds; overrides `proxy.connect_timeout`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub connect_timeout: Option<u64>,

    /// Variables set on the remote session.
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub env: BTreeMap<String, String>,
}

fn default_title() -> String {
    "SSH Directories".to_string()
}

fn default_bind_address() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    2233
}

fn default_middlewares() -> Vec<String> {
    vec!["logging".to_string(), "activeterm".to_string()]
}

fn default_true() -> bool {
    true
}

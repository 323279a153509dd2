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

//! Configuration loader for sshlist.
//!
//! This module handles loading configuration from multiple sources with
//! the following precedence (highest to lowest):
//! 1. CLI arguments
//! 2. Environment variables
//! 3. Configuration file (YAML)
//! 4. Default values

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};

use super::types::{AuthSection, DirectoryFileConfig, EndpointConfig, HostKeyPolicy};
use crate::directory::{DirectoryConfig, Endpoint, Limits};
use crate::middleware::{self, Middleware};
use crate::proxy::{default_identity_files, HostKeyCheck, ProxyConfig};
use crate::server::auth::{AuthPolicy, AuthorizedKeys, ExpectedAnswers, PasswordUsers, Prompt};
use crate::shared::error::ConfigError;

/// Load configuration from file and environment.
///
/// # Default Locations
///
/// If no config path is specified, searches in order:
/// 1. `./sshlist.yaml` (current directory)
/// 2. `$XDG_CONFIG_HOME/sshlist/config.yaml` or `~/.config/sshlist/config.yaml`
/// 3. `/etc/sshlist/config.yaml` (system-wide)
///
/// Defaults are used when none exists.
///
/// # Environment Variables
///
/// - `SSHLIST_BIND_ADDRESS` - Bind address (e.g., "0.0.0.0")
/// - `SSHLIST_PORT` - Port of the main listener
/// - `SSHLIST_HOST_KEY` - Comma-separated host key paths
/// - `SSHLIST_TITLE` - Menu title
///
/// # Errors
///
/// Returns an error if the file cannot be read or parsed, an environment
/// variable has an invalid value, or validation fails.
pub fn load_config(config_path: Option<&Path>) -> Result<DirectoryFileConfig> {
    let mut config = DirectoryFileConfig::default();

    if let Some(path) = config_path {
        config = load_config_file(path).context("Failed to load configuration file")?;
        tracing::info!(path = %path.display(), "Loaded configuration from file");
    } else if let Some(path) = default_config_paths().into_iter().find(|p| p.exists()) {
        config = load_config_file(&path).context("Failed to load configuration file")?;
        tracing::info!(path = %path.display(), "Loaded configuration from file");
    } else {
        tracing::info!("No configuration file found, using defaults");
    }

    config = apply_env_overrides(config)?;
    validate_config(&config)?;

    Ok(config)
}

/// Generate a commented configuration template.
pub fn generate_config_template() -> String {
    let mut config = DirectoryFileConfig::default();
    config.endpoints = vec![
        EndpointConfig {
            name: "app1".to_string(),
            address: Some("app1.addr:22".to_string()),
            description: Some("Application server".to_string()),
            ..Default::default()
        },
        EndpointConfig {
            name: "server2".to_string(),
            address: Some("server1:22".to_string()),
            user: Some("override_user".to_string()),
            ..Default::default()
        },
        EndpointConfig {
            name: "simple".to_string(),
            handlers: vec!["hello".to_string()],
            ..Default::default()
        },
    ];

    let mut yaml = String::new();
    yaml.push_str("# sshlist configuration file\n");
    yaml.push_str("#\n");
    yaml.push_str("# Configuration hierarchy (highest to lowest precedence):\n");
    yaml.push_str("# 1. CLI arguments\n");
    yaml.push_str("# 2. Environment variables (SSHLIST_* prefix)\n");
    yaml.push_str("# 3. This configuration file\n");
    yaml.push_str("# 4. Default values\n");
    yaml.push_str("#\n");
    yaml.push_str("# Endpoints with `handlers` are served in-process; available handlers:\n");
    yaml.push_str(&format!("#   {}\n", middleware::builtin::NAMES.join(", ")));
    yaml.push_str("# Endpoints with only an `address` are proxied to that host.\n");
    yaml.push_str("#\n");
    yaml.push_str("# Authentication (per listener, under auth.main / auth.endpoints):\n");
    yaml.push_str("#   authorized_keys: [\"ssh-ed25519 AAAA... user@host\"]\n");
    yaml.push_str("#   authorized_keys_files: [/home/user/.ssh/authorized_keys]\n");
    yaml.push_str("#   passwords: { alice: \"$argon2id$...\" }   # sshlist hash-password\n");
    yaml.push_str("#   keyboard_interactive:\n");
    yaml.push_str("#     questions:\n");
    yaml.push_str("#       - { prompt: \"How much is 2+3: \", answer: \"5\" }\n\n");

    yaml.push_str(&serde_yaml::to_string(&config).unwrap_or_default());
    yaml
}

/// Load configuration from a YAML file.
pub fn load_config_file(path: &Path) -> Result<DirectoryFileConfig> {
    let content =
        std::fs::read_to_string(path).with_context(|| format!("Failed to read {}", path.display()))?;

    serde_yaml::from_str(&content).with_context(|| format!("Failed to parse {}", path.display()))
}

/// Configuration file search paths, in order.
pub fn default_config_paths() -> Vec<PathBuf> {
    let mut paths = vec![PathBuf::from("./sshlist.yaml")];

    if let Some(config_dir) = dirs::config_dir() {
        paths.push(config_dir.join("sshlist").join("config.yaml"));
    }

    paths.push(PathBuf::from("/etc/sshlist/config.yaml"));
    paths
}

/// Apply environment variable overrides to configuration.
pub fn apply_env_overrides(mut config: DirectoryFileConfig) -> Result<DirectoryFileConfig> {
    if let Ok(addr) = std::env::var("SSHLIST_BIND_ADDRESS") {
        tracing::debug!(address = %addr, "Applied SSHLIST_BIND_ADDRESS override");
        config.server.bind_address = addr;
    }

    if let Ok(port_str) = std::env::var("SSHLIST_PORT") {
        config.server.port = port_str
            .parse()
            .with_context(|| format!("Invalid SSHLIST_PORT value: {port_str}"))?;
        tracing::debug!(port = config.server.port, "Applied SSHLIST_PORT override");
    }

    // Comma-separated list
    if let Ok(keys) = std::env::var("SSHLIST_HOST_KEY") {
        config.server.host_keys = keys
            .split(',')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(PathBuf::from)
            .collect();
        tracing::debug!(
            key_count = config.server.host_keys.len(),
            "Applied SSHLIST_HOST_KEY override"
        );
    }

    if let Ok(title) = std::env::var("SSHLIST_TITLE") {
        tracing::debug!(title = %title, "Applied SSHLIST_TITLE override");
        config.title = title;
    }

    Ok(config)
}

/// Validate configuration for correctness.
pub fn validate_config(config: &DirectoryFileConfig) -> Result<()> {
    if config.server.host_keys.is_empty() {
        anyhow::bail!(
            "At least one host key must be configured (server.host_keys or SSHLIST_HOST_KEY)"
        );
    }

    if config.server.port == 0 {
        anyhow::bail!("Server port cannot be 0");
    }

    if config.limits.max_auth_attempts == 0 {
        anyhow::bail!("max_auth_attempts must be greater than 0");
    }

    if config.limits.challenge_timeout == 0 {
        anyhow::bail!("challenge_timeout must be greater than 0");
    }

    if config.proxy.connect_timeout == 0 {
        anyhow::bail!("proxy.connect_timeout must be greater than 0");
    }

    for name in &config.middlewares {
        if middleware::named(name).is_none() {
            anyhow::bail!("Unknown middleware '{name}' in middlewares");
        }
    }

    for (label, section) in [("auth.main", &config.auth.main), ("auth.endpoints", &config.auth.endpoints)] {
        if let Some(challenge) = &section.keyboard_interactive {
            if challenge.questions.is_empty() {
                anyhow::bail!("{label}.keyboard_interactive needs at least one question");
            }
        }
    }

    tracing::debug!("Configuration validation passed");
    Ok(())
}

/// Turn endpoint entries into [`Endpoint`]s, resolving handler names.
pub fn build_endpoints(entries: &[EndpointConfig]) -> Result<Vec<Endpoint>, ConfigError> {
    entries.iter().map(build_endpoint).collect()
}

fn build_endpoint(entry: &EndpointConfig) -> Result<Endpoint, ConfigError> {
    let mut endpoint = Endpoint::new(entry.name.clone());
    endpoint.address = entry.address.clone();
    endpoint.user = entry.user.clone();
    endpoint.description = entry.description.clone();
    endpoint.remote_command = entry.remote_command.clone();
    endpoint.identity_files = entry.identity_files.clone();
    endpoint.connect_timeout = entry.connect_timeout.map(Duration::from_secs);
    endpoint.env = entry
        .env
        .iter()
        .map(|(k, v)| (k.clone(), v.clone()))
        .collect();

    for handler in &entry.handlers {
        let middleware =
            middleware::builtin::lookup(handler).ok_or_else(|| ConfigError::UnknownHandler {
                endpoint: entry.name.clone(),
                handler: handler.clone(),
            })?;
        endpoint.middlewares.push(middleware);
    }

    Ok(endpoint)
}

/// Build the authentication policy of one listener kind.
pub fn build_auth_policy(section: &AuthSection) -> Result<AuthPolicy> {
    let mut policy = AuthPolicy::open();

    let mut keys = AuthorizedKeys::parse(&section.authorized_keys.join("\n"))
        .context("Invalid entry in authorized_keys")?;
    for path in &section.authorized_keys_files {
        keys.extend(AuthorizedKeys::from_file(path)?);
    }
    if !keys.is_empty() {
        policy = policy.with_publickey(keys);
    }

    if !section.passwords.is_empty() {
        let users = PasswordUsers::new(
            section
                .passwords
                .iter()
                .map(|(user, hash)| (user.clone(), hash.clone())),
        )?;
        policy = policy.with_password(users);
    }

    if let Some(challenge) = &section.keyboard_interactive {
        let (prompts, answers): (Vec<Prompt>, Vec<String>) = challenge
            .questions
            .iter()
            .map(|q| (Prompt::new(q.prompt.clone(), q.echo), q.answer.clone()))
            .unzip();
        let quiz = ExpectedAnswers::new(prompts, answers)
            .with_name(challenge.name.clone())
            .with_instruction(challenge.instruction.clone());
        policy = policy.with_keyboard_interactive(quiz);
    }

    Ok(policy)
}

fn build_proxy_config(config: &DirectoryFileConfig) -> ProxyConfig {
    let settings = &config.proxy;
    let host_key_check = match (settings.host_key_policy, &settings.known_hosts_file) {
        (HostKeyPolicy::AcceptAny, _) => HostKeyCheck::AcceptAny,
        (HostKeyPolicy::KnownHosts, Some(path)) => HostKeyCheck::KnownHostsFile(path.clone()),
        (HostKeyPolicy::KnownHosts, None) => HostKeyCheck::DefaultKnownHosts,
    };

    ProxyConfig {
        identity_files: if settings.identity_files.is_empty() {
            default_identity_files()
        } else {
            settings.identity_files.clone()
        },
        use_agent: settings.use_agent,
        connect_timeout: Duration::from_secs(settings.connect_timeout),
        host_key_check,
        keepalive_interval: (settings.keepalive_interval > 0)
            .then(|| Duration::from_secs(settings.keepalive_interval)),
    }
}

/// Convert a loaded file configuration into a [`DirectoryConfig`].
pub fn build_directory_config(config: &DirectoryFileConfig) -> Result<DirectoryConfig> {
    let shared: Vec<Middleware> = config
        .middlewares
        .iter()
        .map(|name| {
            middleware::named(name)
                .ok_or_else(|| ConfigError::Invalid(format!("unknown middleware '{name}'")))
        })
        .collect::<Result<_, _>>()?;

    let limits = Limits {
        max_auth_attempts: config.limits.max_auth_attempts,
        auth_rejection_time: Duration::from_secs(config.limits.auth_rejection_time),
        challenge_timeout: Duration::from_secs(config.limits.challenge_timeout),
        idle_timeout: (config.limits.idle_timeout > 0)
            .then(|| Duration::from_secs(config.limits.idle_timeout)),
    };

    let mut directory = DirectoryConfig::new(config.title.clone())
        .with_listen(config.server.bind_address.clone(), config.server.port)
        .with_endpoints(build_endpoints(&config.endpoints)?)
        .with_main_auth(build_auth_policy(&config.auth.main).context("Invalid auth.main")?)
        .with_endpoint_auth(
            build_auth_policy(&config.auth.endpoints).context("Invalid auth.endpoints")?,
        )
        .with_shared_middlewares(shared)
        .with_proxy(build_proxy_config(config))
        .with_limits(limits)
        .with_serve_endpoints(config.server.serve_endpoints);
    directory.host_keys = config.server.host_keys.clone();
    directory.banner = config.server.banner.clone();

    Ok(directory)
}

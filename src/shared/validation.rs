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

//! Validation of hostnames, usernames and endpoint addresses.

use anyhow::Result;

/// Default SSH port used when an address omits one.
pub const DEFAULT_SSH_PORT: u16 = 22;

/// A parsed `host[:port]` pair.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct HostPort {
    pub host: String,
    pub port: u16,
}

impl std::fmt::Display for HostPort {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.host.contains(':') {
            write!(f, "[{}]:{}", self.host, self.port)
        } else {
            write!(f, "{}:{}", self.host, self.port)
        }
    }
}

/// Parse an endpoint address of the form `host`, `host:port` or `[v6]:port`.
///
/// # Examples
///
/// ```
/// use sshlist::shared::validation::parse_address;
///
/// let addr = parse_address("server1:22").unwrap();
/// assert_eq!(addr.host, "server1");
/// assert_eq!(addr.port, 22);
///
/// assert_eq!(parse_address("app.addr").unwrap().port, 22);
/// assert!(parse_address("host:0").is_err());
/// ```
pub fn parse_address(address: &str) -> Result<HostPort> {
    let address = address.trim();
    if address.is_empty() {
        anyhow::bail!("Address cannot be empty");
    }

    let (host, port) = if let Some(rest) = address.strip_prefix('[') {
        let (host, tail) = rest
            .split_once(']')
            .ok_or_else(|| anyhow::anyhow!("Unterminated IPv6 literal"))?;
        let port = match tail.strip_prefix(':') {
            Some(port) => Some(port),
            None if tail.is_empty() => None,
            None => anyhow::bail!("Unexpected characters after IPv6 literal"),
        };
        (host, port)
    } else if address.matches(':').count() > 1 {
        // Bare IPv6 literal without a port.
        (address, None)
    } else {
        match address.split_once(':') {
            Some((host, port)) => (host, Some(port)),
            None => (address, None),
        }
    };

    let port = match port {
        Some(port) => {
            let port: u16 = port
                .parse()
                .map_err(|_| anyhow::anyhow!("Invalid port '{port}'"))?;
            if port == 0 {
                anyhow::bail!("Port cannot be 0");
            }
            port
        }
        None => DEFAULT_SSH_PORT,
    };

    let host = validate_hostname(host)?;
    Ok(HostPort { host, port })
}

/// Validate a hostname to prevent injection into logs and remote commands.
///
/// ```
/// use sshlist::shared::validation::validate_hostname;
///
/// assert!(validate_hostname("example.com").is_ok());
/// assert!(validate_hostname("192.168.1.1").is_ok());
/// assert!(validate_hostname("example..com").is_err());
/// assert!(validate_hostname("example.com; ls").is_err());
/// ```
pub fn validate_hostname(hostname: &str) -> Result<String> {
    if hostname.is_empty() {
        anyhow::bail!("Hostname cannot be empty");
    }

    // RFC 1123
    const MAX_HOSTNAME_LENGTH: usize = 253;
    if hostname.len() > MAX_HOSTNAME_LENGTH {
        anyhow::bail!("Hostname too long (max {MAX_HOSTNAME_LENGTH} characters)");
    }

    let valid_chars = hostname
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || c == '.' || c == '-' || c == ':' || c == '_');
    if !valid_chars {
        anyhow::bail!("Hostname contains invalid characters");
    }

    if hostname.contains("..") || hostname.starts_with('-') {
        anyhow::bail!("Hostname is malformed");
    }

    Ok(hostname.to_string())
}

/// Validate a username used to log in to a remote endpoint.
///
/// ```
/// use sshlist::shared::validation::validate_username;
///
/// assert!(validate_username("override_user").is_ok());
/// assert!(validate_username("-user").is_err());
/// assert!(validate_username("user@domain").is_err());
/// ```
pub fn validate_username(username: &str) -> Result<String> {
    if username.is_empty() {
        anyhow::bail!("Username cannot be empty");
    }

    const MAX_USERNAME_LENGTH: usize = 32;
    if username.len() > MAX_USERNAME_LENGTH {
        anyhow::bail!("Username too long (max {MAX_USERNAME_LENGTH} characters)");
    }

    // POSIX portable filename characters
    let valid_chars = username
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-' || c == '.');
    if !valid_chars {
        anyhow::bail!("Username contains invalid characters");
    }

    if username.starts_with('-') {
        anyhow::bail!("Username cannot start with a hyphen");
    }

    Ok(username.to_string())
}

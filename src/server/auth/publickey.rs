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

//! Public key authentication from an authorized_keys list.

use std::path::Path;

use anyhow::{Context, Result};
use async_trait::async_trait;
use russh::keys::PublicKey;

use super::policy::PublicKeyAuth;
use crate::shared::auth_types::{AuthContext, AuthResult};

/// A single authorized key.
#[derive(Debug, Clone)]
pub struct AuthorizedKey {
    pub key: PublicKey,
    pub comment: Option<String>,
}

/// Keys allowed to log in, regardless of username.
#[derive(Debug, Clone, Default)]
pub struct AuthorizedKeys {
    keys: Vec<AuthorizedKey>,
}

impl AuthorizedKeys {
    /// Parse authorized_keys content. Blank lines and `#` comments are
    /// skipped; a malformed line is an error.
    pub fn parse(content: &str) -> Result<Self> {
        let mut keys = Vec::new();
        for (line_num, line) in content.lines().enumerate() {
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            let key = parse_authorized_key_line(line)
                .with_context(|| format!("authorized key on line {}", line_num + 1))?;
            keys.push(key);
        }
        Ok(Self { keys })
    }

    /// Load an authorized_keys file.
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read authorized keys from {}", path.display()))?;
        Self::parse(&content)
    }

    /// Merge another set of keys into this one.
    pub fn extend(&mut self, other: AuthorizedKeys) {
        self.keys.extend(other.keys);
    }

    pub fn len(&self) -> usize {
        self.keys.len()
    }

    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }

    pub fn contains(&self, key: &PublicKey) -> bool {
        self.keys
            .iter()
            .any(|authorized| authorized.key.key_data() == key.key_data())
    }
}

#[async_trait]
impl PublicKeyAuth for AuthorizedKeys {
    async fn verify_publickey(&self, ctx: &AuthContext, key: &PublicKey) -> Result<AuthResult> {
        let accepted = self.contains(key);
        tracing::debug!(user = %ctx.user, accepted, "Checked offered public key");
        Ok(accepted.into())
    }
}

/// Parse `[options] type base64 [comment]`. Options are ignored.
fn parse_authorized_key_line(line: &str) -> Result<AuthorizedKey> {
    let parts: Vec<&str> = line.split_whitespace().collect();
    let key_type_idx = parts
        .iter()
        .position(|part| is_key_type(part))
        .ok_or_else(|| anyhow::anyhow!("Missing key type"))?;

    let key_data = parts
        .get(key_type_idx + 1)
        .ok_or_else(|| anyhow::anyhow!("Missing key data"))?;

    let key = russh::keys::parse_public_key_base64(key_data)
        .map_err(|e| anyhow::anyhow!("Failed to parse public key: {e}"))?;

    let comment = if parts.len() > key_type_idx + 2 {
        Some(parts[key_type_idx + 2..].join(" "))
    } else {
        None
    };

    Ok(AuthorizedKey { key, comment })
}

fn is_key_type(s: &str) -> bool {
    s.starts_with("ssh-") || s.starts_with("ecdsa-") || s.starts_with("sk-")
}

#[cfg(test)]
mod tests {
    use super::*;

    const ED25519: &str =
        "ssh-ed25519 AAAAC3NzaC1lZDI1NTE5AAAAIOMqqnkVzrm0SdG6UOoqKLsabgH5C9okWi0dh2l9GKJl test@example";

    #[test]
    fn test_parse_skips_comments() {
        let keys = AuthorizedKeys::parse("# comment\n\n").unwrap();
        assert!(keys.is_empty());
    }

    #[test]
    fn test_parse_with_options_and_comment() {
        let keys = AuthorizedKeys::parse(&format!("no-pty {ED25519}\n{ED25519}\n")).unwrap();
        assert_eq!(keys.len(), 2);
        assert_eq!(keys.keys[0].comment.as_deref(), Some("test@example"));
    }

    #[test]
    fn test_parse_rejects_garbage() {
        assert!(AuthorizedKeys::parse("ssh-ed25519 notbase64!@#$").is_err());
        assert!(AuthorizedKeys::parse("just words").is_err());
    }

    #[tokio::test]
    async fn test_verify_publickey() {
        let keys = AuthorizedKeys::parse(ED25519).unwrap();
        let offered = russh::keys::parse_public_key_base64(
            "AAAAC3NzaC1lZDI1NTE5AAAAIOMqqnkVzrm0SdG6UOoqKLsabgH5C9okWi0dh2l9GKJl",
        )
        .unwrap();
        let ctx = AuthContext::new("anyone");
        assert!(keys
            .verify_publickey(&ctx, &offered)
            .await
            .unwrap()
            .is_accepted());

        let empty = AuthorizedKeys::default();
        assert!(empty
            .verify_publickey(&ctx, &offered)
            .await
            .unwrap()
            .is_rejected());
    }

    #[test]
    fn test_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("authorized_keys");
        std::fs::write(&path, ED25519).unwrap();
        assert_eq!(AuthorizedKeys::from_file(&path).unwrap().len(), 1);
    }
}

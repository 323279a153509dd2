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

//! Password authentication against Argon2id hashes.
//!
//! Hashes are produced by `sshlist hash-password` (or [`hash_password`]) and
//! stored in the configuration file. Unknown users are verified against a
//! dummy hash so that response timing does not reveal which users exist.

use std::collections::HashMap;

use anyhow::Result;
use argon2::{
    password_hash::{rand_core::OsRng, PasswordHash, PasswordHasher, PasswordVerifier as _},
    Algorithm, Argon2, Params, Version,
};
use async_trait::async_trait;
use zeroize::Zeroizing;

use super::policy::PasswordAuth;
use crate::shared::auth_types::{AuthContext, AuthResult};

/// Users allowed to log in with a password.
pub struct PasswordUsers {
    users: HashMap<String, String>,
    dummy_hash: String,
}

impl std::fmt::Debug for PasswordUsers {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut names: Vec<&String> = self.users.keys().collect();
        names.sort();
        f.debug_struct("PasswordUsers").field("users", &names).finish()
    }
}

impl PasswordUsers {
    /// Build from `(username, argon2 hash)` pairs.
    ///
    /// Fails if any hash is not a valid PHC string.
    pub fn new<I>(users: I) -> Result<Self>
    where
        I: IntoIterator<Item = (String, String)>,
    {
        let mut map = HashMap::new();
        for (name, hash) in users {
            PasswordHash::new(&hash)
                .map_err(|e| anyhow::anyhow!("Invalid password hash for user '{name}': {e}"))?;
            map.insert(name, hash);
        }

        Ok(Self {
            users: map,
            dummy_hash: hash_password("dummy_password_for_timing_attack_mitigation")?,
        })
    }

    pub fn len(&self) -> usize {
        self.users.len()
    }

    pub fn is_empty(&self) -> bool {
        self.users.is_empty()
    }

    fn verify(&self, username: &str, password: &Zeroizing<String>) -> Result<bool> {
        match self.users.get(username) {
            Some(hash) => verify_password_hash(password, hash),
            None => {
                let _ = verify_password_hash(password, &self.dummy_hash);
                Ok(false)
            }
        }
    }
}

#[async_trait]
impl PasswordAuth for PasswordUsers {
    async fn verify_password(&self, ctx: &AuthContext, password: &str) -> Result<AuthResult> {
        let password = Zeroizing::new(password.to_string());
        Ok(self.verify(&ctx.user, &password)?.into())
    }
}

/// Hash a password with Argon2id.
///
/// ```no_run
/// use sshlist::server::auth::hash_password;
///
/// let hash = hash_password("my_secure_password").unwrap();
/// assert!(hash.starts_with("$argon2id$"));
/// ```
pub fn hash_password(password: &str) -> Result<String> {
    use argon2::password_hash::SaltString;

    let salt = SaltString::generate(&mut OsRng);

    // m=19 MiB, t=2, p=1
    let params = Params::new(19456, 2, 1, None)
        .map_err(|e| anyhow::anyhow!("Invalid Argon2 parameters: {e}"))?;
    let argon2 = Argon2::new(Algorithm::Argon2id, Version::V0x13, params);

    let hash = argon2
        .hash_password(password.as_bytes(), &salt)
        .map_err(|e| anyhow::anyhow!("Failed to hash password: {e}"))?;

    Ok(hash.to_string())
}

/// Verify a password against an Argon2 hash.
pub fn verify_password_hash(password: &str, hash: &str) -> Result<bool> {
    let parsed_hash =
        PasswordHash::new(hash).map_err(|e| anyhow::anyhow!("Invalid hash format: {e}"))?;

    match Argon2::default().verify_password(password.as_bytes(), &parsed_hash) {
        Ok(()) => Ok(true),
        Err(argon2::password_hash::Error::Password) => Ok(false),
        Err(e) => Err(anyhow::anyhow!("Verification error: {e}")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hash_and_verify() {
        let hash = hash_password("test_password_123").unwrap();
        assert!(hash.starts_with("$argon2id$"));
        assert!(verify_password_hash("test_password_123", &hash).unwrap());
        assert!(!verify_password_hash("wrong", &hash).unwrap());
    }

    #[test]
    fn test_invalid_hash_rejected_at_load() {
        let result = PasswordUsers::new(vec![("bob".to_string(), "plaintext".to_string())]);
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn test_password_users() {
        let hash = hash_password("hunter2").unwrap();
        let users = PasswordUsers::new(vec![("alice".to_string(), hash)]).unwrap();
        assert_eq!(users.len(), 1);

        let alice = AuthContext::new("alice");
        let mallory = AuthContext::new("mallory");

        assert!(users
            .verify_password(&alice, "hunter2")
            .await
            .unwrap()
            .is_accepted());
        assert!(users
            .verify_password(&alice, "hunter3")
            .await
            .unwrap()
            .is_rejected());
        assert!(users
            .verify_password(&mallory, "hunter2")
            .await
            .unwrap()
            .is_rejected());
    }
}

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

//! Authentication strategy traits and the per-listener policy.

use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use russh::keys::PublicKey;
use russh::{MethodKind, MethodSet};

use super::challenge::ChallengeResponder;
use crate::shared::auth_types::{AuthContext, AuthResult};

/// Verifies public keys offered by clients.
#[async_trait]
pub trait PublicKeyAuth: Send + Sync {
    async fn verify_publickey(&self, ctx: &AuthContext, key: &PublicKey) -> Result<AuthResult>;
}

/// Verifies passwords.
#[async_trait]
pub trait PasswordAuth: Send + Sync {
    async fn verify_password(&self, ctx: &AuthContext, password: &str) -> Result<AuthResult>;
}

/// Runs a keyboard-interactive conversation with the client.
///
/// Implementations send one or more challenges through `responder` and decide
/// on the answers. An `Err` from the responder means the client is gone or
/// too slow, and should be returned as-is.
#[async_trait]
pub trait KeyboardInteractiveAuth: Send + Sync {
    async fn authenticate(
        &self,
        ctx: &AuthContext,
        responder: &mut dyn ChallengeResponder,
    ) -> Result<AuthResult>;
}

/// The set of strategies a listener accepts.
#[derive(Clone, Default)]
pub struct AuthPolicy {
    publickey: Option<Arc<dyn PublicKeyAuth>>,
    password: Option<Arc<dyn PasswordAuth>>,
    keyboard_interactive: Option<Arc<dyn KeyboardInteractiveAuth>>,
}

impl std::fmt::Debug for AuthPolicy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AuthPolicy")
            .field("methods", &self.method_names())
            .finish()
    }
}

impl AuthPolicy {
    /// A policy without strategies: everyone is let in.
    pub fn open() -> Self {
        Self::default()
    }

    pub fn with_publickey(mut self, provider: impl PublicKeyAuth + 'static) -> Self {
        self.publickey = Some(Arc::new(provider));
        self
    }

    pub fn with_password(mut self, provider: impl PasswordAuth + 'static) -> Self {
        self.password = Some(Arc::new(provider));
        self
    }

    pub fn with_keyboard_interactive(
        mut self,
        provider: impl KeyboardInteractiveAuth + 'static,
    ) -> Self {
        self.keyboard_interactive = Some(Arc::new(provider));
        self
    }

    /// Whether `none` authentication is accepted.
    pub fn is_open(&self) -> bool {
        self.publickey.is_none() && self.password.is_none() && self.keyboard_interactive.is_none()
    }

    pub fn allows_publickey(&self) -> bool {
        self.publickey.is_some()
    }

    pub fn allows_password(&self) -> bool {
        self.password.is_some()
    }

    pub fn allows_keyboard_interactive(&self) -> bool {
        self.keyboard_interactive.is_some()
    }

    /// Methods advertised to clients.
    pub fn methods(&self) -> MethodSet {
        let mut methods = MethodSet::empty();
        if self.publickey.is_some() {
            methods.push(MethodKind::PublicKey);
        }
        if self.password.is_some() {
            methods.push(MethodKind::Password);
        }
        if self.keyboard_interactive.is_some() {
            methods.push(MethodKind::KeyboardInteractive);
        }
        methods
    }

    /// Method names, for logs and configuration checks.
    pub fn method_names(&self) -> Vec<&'static str> {
        let mut names = Vec::new();
        if self.publickey.is_some() {
            names.push("publickey");
        }
        if self.password.is_some() {
            names.push("password");
        }
        if self.keyboard_interactive.is_some() {
            names.push("keyboard-interactive");
        }
        if names.is_empty() {
            names.push("none");
        }
        names
    }

    pub(crate) fn keyboard_interactive(&self) -> Option<Arc<dyn KeyboardInteractiveAuth>> {
        self.keyboard_interactive.clone()
    }

    pub async fn check_publickey(&self, ctx: &AuthContext, key: &PublicKey) -> AuthResult {
        let Some(provider) = &self.publickey else {
            return AuthResult::Reject;
        };
        settle("publickey", ctx, provider.verify_publickey(ctx, key).await)
    }

    pub async fn check_password(&self, ctx: &AuthContext, password: &str) -> AuthResult {
        let Some(provider) = &self.password else {
            return AuthResult::Reject;
        };
        settle("password", ctx, provider.verify_password(ctx, password).await)
    }
}

/// Collapse a provider outcome into accept or reject, logging either way.
pub(crate) fn settle(method: &str, ctx: &AuthContext, outcome: Result<AuthResult>) -> AuthResult {
    match outcome {
        Ok(AuthResult::Accept) => {
            tracing::info!(user = %ctx.user, listener = %ctx.listener, method, "Authentication accepted");
            AuthResult::Accept
        }
        Ok(AuthResult::Reject) => {
            tracing::info!(user = %ctx.user, listener = %ctx.listener, method, "Authentication rejected");
            AuthResult::Reject
        }
        Err(e) => {
            tracing::warn!(
                user = %ctx.user,
                listener = %ctx.listener,
                method,
                error = %e,
                "Authentication failed with error, denying"
            );
            AuthResult::Reject
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct StaticPassword(&'static str);

    #[async_trait]
    impl PasswordAuth for StaticPassword {
        async fn verify_password(&self, _ctx: &AuthContext, password: &str) -> Result<AuthResult> {
            Ok((password == self.0).into())
        }
    }

    struct Broken;

    #[async_trait]
    impl PasswordAuth for Broken {
        async fn verify_password(&self, _ctx: &AuthContext, _password: &str) -> Result<AuthResult> {
            anyhow::bail!("backend offline")
        }
    }

    #[test]
    fn test_open_policy() {
        let policy = AuthPolicy::open();
        assert!(policy.is_open());
        assert_eq!(policy.method_names(), vec!["none"]);
    }

    #[tokio::test]
    async fn test_password_policy() {
        let policy = AuthPolicy::open().with_password(StaticPassword("secret"));
        let ctx = AuthContext::new("alice");

        assert!(!policy.is_open());
        assert!(policy.allows_password());
        assert_eq!(policy.method_names(), vec!["password"]);
        assert!(policy.check_password(&ctx, "secret").await.is_accepted());
        assert!(policy.check_password(&ctx, "nope").await.is_rejected());
    }

    #[tokio::test]
    async fn test_provider_error_denies() {
        let policy = AuthPolicy::open().with_password(Broken);
        let ctx = AuthContext::new("alice");
        assert!(policy.check_password(&ctx, "anything").await.is_rejected());
    }

    #[tokio::test]
    async fn test_missing_strategy_rejects() {
        let policy = AuthPolicy::open().with_password(StaticPassword("x"));
        let ctx = AuthContext::new("alice");
        let key = russh::keys::parse_public_key_base64(
            "AAAAC3NzaC1lZDI1NTE5AAAAIOMqqnkVzrm0SdG6UOoqKLsabgH5C9okWi0dh2l9GKJl",
        )
        .unwrap();
        assert!(policy.check_publickey(&ctx, &key).await.is_rejected());
    }
}

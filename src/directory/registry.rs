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

//! The validated endpoint set and its atomically swapped holder.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use arc_swap::ArcSwap;

use super::endpoint::Endpoint;
use crate::shared::error::{ConfigError, RegistryError};
use crate::shared::validation::{parse_address, validate_username};

/// An immutable, validated set of endpoints in configuration order.
#[derive(Debug, Clone, Default)]
pub struct Registry {
    endpoints: Vec<Arc<Endpoint>>,
    index: HashMap<String, usize>,
}

impl Registry {
    /// Validate `endpoints` and build a registry.
    ///
    /// Entries without a name, or without both an address and middlewares,
    /// are skipped with a warning. Duplicate names, unparsable addresses and
    /// invalid user overrides are configuration errors.
    pub fn register<I>(endpoints: I) -> Result<Self, ConfigError>
    where
        I: IntoIterator<Item = Endpoint>,
    {
        let mut registry = Registry::default();

        for (position, mut endpoint) in endpoints.into_iter().enumerate() {
            endpoint.name = endpoint.name.trim().to_string();
            if endpoint.name.is_empty() {
                tracing::warn!(position, "Skipping endpoint without a name");
                continue;
            }

            if endpoint.address.as_deref().is_some_and(|a| a.trim().is_empty()) {
                endpoint.address = None;
            }

            if endpoint.kind().is_none() {
                tracing::warn!(
                    endpoint = %endpoint.name,
                    "Skipping endpoint without address or middlewares"
                );
                continue;
            }

            if let Some(address) = &endpoint.address {
                parse_address(address).map_err(|e| ConfigError::InvalidAddress {
                    endpoint: endpoint.name.clone(),
                    address: address.clone(),
                    reason: e.to_string(),
                })?;
            }

            if let Some(user) = &endpoint.user {
                validate_username(user).map_err(|e| {
                    ConfigError::Invalid(format!("endpoint '{}' user: {e}", endpoint.name))
                })?;
            }

            if registry.index.contains_key(&endpoint.name) {
                return Err(ConfigError::DuplicateEndpoint(endpoint.name));
            }

            registry
                .index
                .insert(endpoint.name.clone(), registry.endpoints.len());
            registry.endpoints.push(Arc::new(endpoint));
        }

        Ok(registry)
    }

    /// Look up an endpoint by name.
    pub fn resolve(&self, name: &str) -> Result<Arc<Endpoint>, RegistryError> {
        self.index
            .get(name)
            .map(|&i| Arc::clone(&self.endpoints[i]))
            .ok_or_else(|| RegistryError::NotFound(name.to_string()))
    }

    /// Selectable endpoints in configuration order.
    pub fn endpoints(&self) -> &[Arc<Endpoint>] {
        &self.endpoints
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.endpoints.iter().map(|e| e.name.as_str())
    }

    pub fn local_endpoints(&self) -> impl Iterator<Item = &Arc<Endpoint>> {
        self.endpoints.iter().filter(|e| e.is_local())
    }

    pub fn len(&self) -> usize {
        self.endpoints.len()
    }

    pub fn is_empty(&self) -> bool {
        self.endpoints.is_empty()
    }
}

/// Holds the current [`Registry`] behind an atomic pointer.
///
/// Readers take a snapshot without locking. [`Directory::replace`] publishes a
/// new registry; sessions already dispatched keep the endpoint they resolved.
#[derive(Debug)]
pub struct Directory {
    current: ArcSwap<Registry>,
    version: AtomicU64,
}

impl Directory {
    pub fn new(registry: Registry) -> Self {
        Self {
            current: ArcSwap::from_pointee(registry),
            version: AtomicU64::new(1),
        }
    }

    /// The registry as of now.
    pub fn snapshot(&self) -> Arc<Registry> {
        self.current.load_full()
    }

    pub fn resolve(&self, name: &str) -> Result<Arc<Endpoint>, RegistryError> {
        self.current.load().resolve(name)
    }

    /// Publish a new registry and return its version.
    pub fn replace(&self, registry: Registry) -> u64 {
        self.current.store(Arc::new(registry));
        let version = self.version.fetch_add(1, Ordering::SeqCst) + 1;
        tracing::info!(version, "Endpoint registry replaced");
        version
    }

    pub fn version(&self) -> u64 {
        self.version.load(Ordering::SeqCst)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::middleware::{builtin, Handler, Middleware};

    fn passthrough() -> Middleware {
        Arc::new(|next: Handler| next)
    }

    #[test]
    fn test_drops_invalid_entries() {
        let registry = Registry::register(vec![
            Endpoint::remote("app2", "app.addr:2222"),
            Endpoint::new("no address nor middlewares"),
            Endpoint::remote("", "nope.addr:2234"),
            Endpoint::local("simple", vec![builtin::hello()]),
        ])
        .unwrap();

        assert_eq!(registry.names().collect::<Vec<_>>(), vec!["app2", "simple"]);
        assert!(registry.resolve("no address nor middlewares").is_err());
    }

    #[test]
    fn test_duplicate_names_fail() {
        let result = Registry::register(vec![
            Endpoint::remote("server1", "server1:22"),
            Endpoint::remote("server1", "server2:22"),
        ]);
        assert!(matches!(result, Err(ConfigError::DuplicateEndpoint(name)) if name == "server1"));
    }

    #[test]
    fn test_invalid_address_fails() {
        let result = Registry::register(vec![Endpoint::remote("bad", "host:notaport")]);
        assert!(matches!(result, Err(ConfigError::InvalidAddress { .. })));
    }

    #[test]
    fn test_invalid_user_fails() {
        let result =
            Registry::register(vec![Endpoint::remote("bad", "host:22").with_user("root;rm")]);
        assert!(matches!(result, Err(ConfigError::Invalid(_))));
    }

    #[test]
    fn test_resolve_not_found() {
        let registry = Registry::register(vec![Endpoint::local("a", vec![passthrough()])]).unwrap();
        assert_eq!(
            registry.resolve("b").unwrap_err(),
            RegistryError::NotFound("b".to_string())
        );
        assert_eq!(registry.local_endpoints().count(), 1);
    }

    #[test]
    fn test_directory_replace_bumps_version() {
        let directory = Directory::new(
            Registry::register(vec![Endpoint::remote("old", "old.host:22")]).unwrap(),
        );
        let before = directory.snapshot();
        assert_eq!(directory.version(), 1);

        let version = directory.replace(
            Registry::register(vec![Endpoint::remote("new", "new.host:22")]).unwrap(),
        );
        assert_eq!(version, 2);
        assert!(directory.resolve("new").is_ok());
        assert!(directory.resolve("old").is_err());
        // Old snapshots stay valid.
        assert!(before.resolve("old").is_ok());
    }
}

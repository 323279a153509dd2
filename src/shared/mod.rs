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

//! Types and helpers used across the directory, server and proxy modules.
//!
//! - [`validation`]: hostname, username and endpoint address validation
//! - [`auth_types`]: authentication results and contexts
//! - [`error`]: the error taxonomy

pub mod auth_types;
pub mod error;
pub mod validation;

pub use auth_types::{AuthContext, AuthResult};
pub use error::{AuthError, ConfigError, ProxyError, RegistryError};
pub use validation::{parse_address, validate_hostname, validate_username, HostPort};

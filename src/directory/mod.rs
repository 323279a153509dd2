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

//! The endpoint directory.
//!
//! - [`Endpoint`]: a named destination, local or remote
//! - [`Registry`]: the validated endpoint set
//! - [`Directory`]: the current registry behind an atomic pointer
//! - [`DirectoryConfig`]: everything needed to start a directory server,
//!   plus the [`ServerFactory`] that derives one [`ListenerConfig`] per
//!   listening address

pub mod config;
pub mod endpoint;
pub mod registry;

pub use config::{
    default_server_config, DirectoryConfig, Limits, ListenerConfig, ListenerRole, ServerFactory,
};
pub use endpoint::{Endpoint, EndpointKind};
pub use registry::{Directory, Registry};

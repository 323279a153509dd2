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

//! sshlist: an SSH server that lists named SSH endpoints and routes each
//! session to a local handler pipeline or a proxied remote host.

pub mod config;
pub mod directory;
pub mod keygen;
pub mod middleware;
pub mod proxy;
pub mod server;
pub mod shared;
pub mod utils;

pub use directory::{DirectoryConfig, Endpoint};
pub use server::DirectoryServer;

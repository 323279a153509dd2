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

//! Authentication gate for directory listeners.
//!
//! Every listener carries an [`AuthPolicy`] listing the strategies it
//! accepts. A policy with no strategies lets every client in through the
//! `none` method.
//!
//! # Strategies
//!
//! - **Public key**: [`AuthorizedKeys`], an in-memory or file-backed list
//! - **Password**: [`PasswordUsers`], Argon2id hashes per user
//! - **Keyboard-interactive**: [`ExpectedAnswers`], a fixed set of prompts
//!   whose answers must all match
//!
//! Strategies are trait objects ([`PublicKeyAuth`], [`PasswordAuth`],
//! [`KeyboardInteractiveAuth`]), so applications can plug in their own.
//!
//! # Failure handling
//!
//! Provider errors and challenge I/O failures never propagate. They are
//! logged and the attempt is denied.
//!
//! # Example
//!
//! ```
//! use sshlist::server::auth::{AuthPolicy, ExpectedAnswers, Prompt};
//!
//! let quiz = ExpectedAnswers::new(
//!     vec![
//!         Prompt::new("♦ How much is 2+3: ", true),
//!         Prompt::new("♦ Which editor is best, vim or emacs? ", true),
//!     ],
//!     vec!["5".to_string(), "vim".to_string()],
//! );
//! let policy = AuthPolicy::open().with_keyboard_interactive(quiz);
//! assert!(!policy.is_open());
//! ```

pub mod challenge;
pub mod password;
pub mod policy;
pub mod publickey;

pub use challenge::{
    Challenge, ChallengeExchange, ChallengeResponder, ChallengeStep, ExpectedAnswers, Prompt,
};
pub use password::{hash_password, verify_password_hash, PasswordUsers};
pub use policy::{AuthPolicy, KeyboardInteractiveAuth, PasswordAuth, PublicKeyAuth};
pub use publickey::AuthorizedKeys;

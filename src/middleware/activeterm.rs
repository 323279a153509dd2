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

//! Rejects sessions that did not request a terminal.

use std::sync::Arc;

use super::{BoxFuture, Handler, Middleware};
use crate::server::session::Session;

pub const NO_PTY_MESSAGE: &str = "Requires an active PTY\n";

pub fn middleware() -> Middleware {
    Arc::new(|next: Handler| {
        Arc::new(move |session: Session| -> BoxFuture<'static, ()> {
            let next = Arc::clone(&next);
            Box::pin(async move {
                if session.has_pty() {
                    next(session).await;
                } else {
                    tracing::debug!(session = %session.id(), "Rejecting session without PTY");
                    session.write(NO_PTY_MESSAGE);
                    session.exit(1);
                }
            })
        }) as Handler
    })
}

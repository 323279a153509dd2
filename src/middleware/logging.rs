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

//! Connection logging middleware.

use std::sync::Arc;

use super::{BoxFuture, Handler, Middleware};
use crate::server::session::Session;

/// Log when a session enters and leaves the wrapped handler.
pub fn middleware() -> Middleware {
    Arc::new(|next: Handler| {
        Arc::new(move |session: Session| -> BoxFuture<'static, ()> {
            let next = Arc::clone(&next);
            Box::pin(async move {
                log_connect(&session);
                next(session.clone()).await;
                tracing::info!(
                    session = %session.id(),
                    user = %session.user(),
                    endpoint = session.endpoint().unwrap_or("-"),
                    duration_ms = session.elapsed().as_millis() as u64,
                    "Session disconnected"
                );
            })
        }) as Handler
    })
}

fn log_connect(session: &Session) {
    let window = session.window();
    let peer = session
        .peer_addr()
        .map(|addr| addr.to_string())
        .unwrap_or_else(|| "unknown".to_string());

    tracing::info!(
        session = %session.id(),
        user = %session.user(),
        peer = %peer,
        endpoint = session.endpoint().unwrap_or("-"),
        term = session.pty().map(|p| p.term.as_str()).unwrap_or("none"),
        cols = window.cols,
        rows = window.rows,
        command = session.command().unwrap_or(""),
        "Session connected"
    );
}

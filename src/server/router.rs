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

//! Session routing.
//!
//! A started session is routed by the role of the listener that accepted it.
//! On the main listener the client either names an endpoint as the first
//! word of its exec command, or picks one from the menu. Endpoint listeners
//! dispatch straight to their endpoint.
//!
//! Dispatching composes `endpoint.middlewares ++ shared` around a base
//! handler: a no-op for local endpoints, the proxy tunnel for remote ones.
//! [`supervise`] runs the result on its own task so that a panic in one
//! session never reaches another.

use std::sync::Arc;

use tokio::sync::watch;

use super::menu::{self, Menu, MenuOutcome};
use super::session::Session;
use crate::directory::{Directory, DirectoryConfig, Endpoint, ListenerRole};
use crate::middleware::{self, Handler, Middleware};
use crate::proxy::ProxyTunnel;

/// Message shown when a handler panics.
pub const INTERNAL_ERROR_MESSAGE: &str = "internal error, closing session\r\n";

/// Lifecycle of a connection through the router.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RouteState {
    Connecting,
    Authenticating,
    /// Authenticated; waiting for the client to pick or name an endpoint.
    MenuOrDirect,
    Dispatching,
    Active,
    Closed,
}

impl std::fmt::Display for RouteState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            RouteState::Connecting => "connecting",
            RouteState::Authenticating => "authenticating",
            RouteState::MenuOrDirect => "menu-or-direct",
            RouteState::Dispatching => "dispatching",
            RouteState::Active => "active",
            RouteState::Closed => "closed",
        };
        f.write_str(name)
    }
}

/// Picks the endpoint for a session and runs its pipeline.
pub struct Router {
    directory: Arc<Directory>,
    shared: Vec<Middleware>,
    tunnel: Arc<ProxyTunnel>,
    title: String,
}

impl std::fmt::Debug for Router {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Router")
            .field("title", &self.title)
            .field("shared", &self.shared.len())
            .field("version", &self.directory.version())
            .finish()
    }
}

impl Router {
    pub fn new(
        directory: Arc<Directory>,
        shared: Vec<Middleware>,
        tunnel: Arc<ProxyTunnel>,
        title: impl Into<String>,
    ) -> Self {
        Self {
            directory,
            shared,
            tunnel,
            title: title.into(),
        }
    }

    pub fn from_config(config: &DirectoryConfig, directory: Arc<Directory>) -> Self {
        Self::new(
            directory,
            config.shared_middlewares.clone(),
            Arc::new(ProxyTunnel::new(config.proxy.clone())),
            config.title.clone(),
        )
    }

    pub fn directory(&self) -> &Arc<Directory> {
        &self.directory
    }

    /// The composed handler for `endpoint`.
    pub fn pipeline(&self, endpoint: &Arc<Endpoint>) -> Handler {
        let base = if endpoint.is_local() {
            middleware::noop()
        } else {
            self.tunnel.handler(Arc::clone(endpoint))
        };
        let chain: Vec<Middleware> = endpoint
            .middlewares
            .iter()
            .chain(self.shared.iter())
            .cloned()
            .collect();
        middleware::compose(&chain, base)
    }

    /// Route `session` according to the listener it arrived on.
    pub async fn route(&self, role: &ListenerRole, session: Session, state: &watch::Sender<RouteState>) {
        match role {
            ListenerRole::Endpoint(name) => self.dispatch_by_name(name, session, state).await,
            ListenerRole::Main => self.route_main(session, state).await,
        }
    }

    async fn route_main(&self, session: Session, state: &watch::Sender<RouteState>) {
        if let Some(command) = session.command() {
            let (name, rest) = split_command(command);
            if !name.is_empty() {
                let session = session.with_command(rest);
                return self.dispatch_by_name(name, session, state).await;
            }
        }

        let registry = self.directory.snapshot();
        if !session.has_pty() {
            session.write(menu::render_plain(&self.title, &registry));
            session.exit(0);
            return;
        }

        match Menu::new(self.title.clone(), registry).run(&session).await {
            MenuOutcome::Selected(endpoint) => self.dispatch(endpoint, session, state).await,
            MenuOutcome::Quit => session.exit(0),
        }
    }

    async fn dispatch_by_name(&self, name: &str, session: Session, state: &watch::Sender<RouteState>) {
        match self.directory.resolve(name) {
            Ok(endpoint) => self.dispatch(endpoint, session, state).await,
            Err(e) => {
                tracing::info!(session = %session.id(), endpoint = %name, "Unknown endpoint requested");
                session.write_stderr(format!("{e}\r\n"));
                session.exit(1);
            }
        }
    }

    async fn dispatch(&self, endpoint: Arc<Endpoint>, session: Session, state: &watch::Sender<RouteState>) {
        state.send_replace(RouteState::Dispatching);
        let session = session.with_endpoint(&endpoint.name);
        tracing::debug!(
            session = %session.id(),
            endpoint = %endpoint.name,
            local = endpoint.is_local(),
            "Dispatching session"
        );

        let handler = self.pipeline(&endpoint);
        state.send_replace(RouteState::Active);
        handler(session).await;
    }
}

/// Split an exec command into the endpoint name and the remaining command.
fn split_command(command: &str) -> (&str, Option<String>) {
    let command = command.trim();
    match command.split_once(char::is_whitespace) {
        Some((name, rest)) => {
            let rest = rest.trim();
            (name, (!rest.is_empty()).then(|| rest.to_string()))
        }
        None => (command, None),
    }
}

/// Run the session on its own task until it finishes or the transport goes
/// away, then close the channel.
///
/// A panicking handler is reported to the client with exit status 1.
pub async fn supervise(
    router: Arc<Router>,
    role: ListenerRole,
    session: Session,
    state: watch::Sender<RouteState>,
) {
    let state = Arc::new(state);
    let mut task = tokio::spawn({
        let session = session.clone();
        let state = Arc::clone(&state);
        async move { router.route(&role, session, &state).await }
    });

    let joined = tokio::select! {
        joined = &mut task => Some(joined),
        _ = session.cancelled() => {
            task.abort();
            None
        }
    };

    match joined {
        Some(Ok(())) => {}
        Some(Err(e)) if e.is_panic() => {
            tracing::error!(
                session = %session.id(),
                endpoint = session.endpoint().unwrap_or("-"),
                "Session handler panicked"
            );
            session.write_stderr(INTERNAL_ERROR_MESSAGE);
            session.exit(1);
        }
        Some(Err(_)) => {}
        None => {
            tracing::debug!(session = %session.id(), "Session cancelled by transport");
        }
    }

    state.send_replace(RouteState::Closed);
    session.close();
}

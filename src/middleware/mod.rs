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

//! Composable session handlers.
//!
//! A [`Handler`] runs a [`Session`] to completion. A [`Middleware`] turns one
//! handler into another, so cross-cutting behaviour (logging, terminal
//! checks, greetings) can be layered around a base handler without touching
//! it.
//!
//! [`compose`] applies a list of middlewares so that the first element is the
//! outermost wrapper:
//!
//! ```
//! use sshlist::middleware::{compose, handler_fn, middleware_fn, Handler};
//!
//! let base = handler_fn(|session| async move {
//!     session.write("base\r\n");
//! });
//! let greet = middleware_fn(|next: Handler, session| async move {
//!     session.write("hello\r\n");
//!     next(session).await;
//! });
//! let handler = compose(&[greet], base);
//! # let _ = handler;
//! ```
//!
//! Middlewares must call through to `next` unless they intend to end the
//! session early, as [`activeterm`] does for clients without a terminal.

pub mod activeterm;
pub mod builtin;
pub mod logging;

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use crate::server::session::Session;

/// A boxed, sendable future.
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Runs a session to completion.
pub type Handler = Arc<dyn Fn(Session) -> BoxFuture<'static, ()> + Send + Sync>;

/// Wraps a handler with additional behaviour.
pub type Middleware = Arc<dyn Fn(Handler) -> Handler + Send + Sync>;

/// Build a [`Handler`] from an async closure.
pub fn handler_fn<F, Fut>(f: F) -> Handler
where
    F: Fn(Session) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = ()> + Send + 'static,
{
    Arc::new(move |session| Box::pin(f(session)))
}

/// Build a [`Middleware`] from an async closure receiving the wrapped
/// handler and the session.
pub fn middleware_fn<F, Fut>(f: F) -> Middleware
where
    F: Fn(Handler, Session) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = ()> + Send + 'static,
{
    let f = Arc::new(f);
    Arc::new(move |next: Handler| {
        let f = Arc::clone(&f);
        Arc::new(move |session: Session| -> BoxFuture<'static, ()> {
            Box::pin(f(Arc::clone(&next), session))
        }) as Handler
    })
}

/// A handler that does nothing. Used as the base of local endpoints, whose
/// behaviour lives entirely in their middlewares.
pub fn noop() -> Handler {
    handler_fn(|_session| async {})
}

/// Wrap `base` with `middlewares`; the first middleware runs first.
pub fn compose(middlewares: &[Middleware], base: Handler) -> Handler {
    middlewares
        .iter()
        .rev()
        .fold(base, |handler, middleware| middleware(handler))
}

/// The middlewares every dispatched session passes through after the
/// endpoint's own: connection logging, then the terminal check.
pub fn shared() -> Vec<Middleware> {
    vec![logging::middleware(), activeterm::middleware()]
}

/// Look up a middleware by the name used in configuration files: the
/// shared `logging` and `activeterm`, or one of the [`builtin`] handlers.
pub fn named(name: &str) -> Option<Middleware> {
    match name {
        "logging" => Some(logging::middleware()),
        "activeterm" => Some(activeterm::middleware()),
        other => builtin::lookup(other),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    fn recorder(name: &'static str, log: Arc<Mutex<Vec<&'static str>>>) -> Middleware {
        middleware_fn(move |next: Handler, session| {
            let log = Arc::clone(&log);
            async move {
                log.lock().unwrap().push(name);
                next(session).await;
            }
        })
    }

    #[tokio::test]
    async fn test_compose_order() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let base = {
            let log = Arc::clone(&log);
            handler_fn(move |_session| {
                let log = Arc::clone(&log);
                async move {
                    log.lock().unwrap().push("base");
                }
            })
        };

        let chain = vec![
            recorder("A", Arc::clone(&log)),
            recorder("B", Arc::clone(&log)),
        ];
        let handler = compose(&chain, base);

        let (session, _peer) = Session::builder("test").build();
        handler(session).await;

        assert_eq!(*log.lock().unwrap(), vec!["A", "B", "base"]);
    }

    #[tokio::test]
    async fn test_compose_empty_is_base() {
        let (session, mut peer) = Session::builder("test").build();
        let handler = compose(
            &[],
            handler_fn(|session| async move {
                session.write("only base");
            }),
        );
        handler(session).await;
        assert!(matches!(
            peer.output.recv().await,
            Some(crate::server::session::SessionOutput::Stdout(_))
        ));
    }

    #[tokio::test]
    async fn test_short_circuit_skips_inner() {
        let reached = Arc::new(Mutex::new(false));
        let stop = middleware_fn(|_next: Handler, session| async move {
            session.exit(1);
        });
        let base = {
            let reached = Arc::clone(&reached);
            handler_fn(move |_session| {
                let reached = Arc::clone(&reached);
                async move {
                    *reached.lock().unwrap() = true;
                }
            })
        };

        let (session, _peer) = Session::builder("test").build();
        compose(&[stop], base)(session).await;
        assert!(!*reached.lock().unwrap());
    }

    #[test]
    fn test_named_lookup() {
        for name in ["logging", "activeterm", "hello", "echo", "whoami"] {
            assert!(named(name).is_some(), "{name}");
        }
        assert!(named("bubbletea").is_none());
    }
}

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

//! A failing or stuck session must not affect the others.

use std::sync::Arc;
use std::time::Duration;

use sshlist::directory::{Directory, Endpoint, ListenerRole, Registry};
use sshlist::middleware::{middleware_fn, Handler};
use sshlist::proxy::{ProxyConfig, ProxyTunnel};
use sshlist::server::router::{self, RouteState, Router, INTERNAL_ERROR_MESSAGE};
use sshlist::server::session::{SessionOutput, SessionPeer};
use sshlist::server::Session;
use tokio::sync::watch;

fn router() -> Arc<Router> {
    let boom = middleware_fn(|_next: Handler, session: Session| async move {
        if session.user() == "mallory" {
            panic!("handler blew up");
        }
        session.write("fine");
        session.exit(0);
    });
    let stuck = middleware_fn(|_next: Handler, _session: Session| async move {
        std::future::pending::<()>().await;
    });
    let echo = middleware_fn(|_next: Handler, session: Session| async move {
        if let Some(data) = session.read().await {
            session.write(data);
        }
        session.exit(0);
    });

    let registry = Registry::register(vec![
        Endpoint::local("boom", vec![boom]),
        Endpoint::local("stuck", vec![stuck]),
        Endpoint::local("echo", vec![echo]),
    ])
    .unwrap();
    Arc::new(Router::new(
        Arc::new(Directory::new(registry)),
        Vec::new(),
        Arc::new(ProxyTunnel::new(ProxyConfig::default())),
        "SSH Directories",
    ))
}

fn start(
    router: &Arc<Router>,
    user: &str,
    endpoint: &str,
) -> (tokio::task::JoinHandle<()>, SessionPeer, watch::Receiver<RouteState>) {
    let (session, peer) = Session::builder(user).build();
    let (state, rx) = watch::channel(RouteState::MenuOrDirect);
    let task = tokio::spawn(router::supervise(
        Arc::clone(router),
        ListenerRole::Endpoint(endpoint.to_string()),
        session,
        state,
    ));
    (task, peer, rx)
}

async fn collect(peer: &mut SessionPeer) -> (String, Option<u32>) {
    let mut out = String::new();
    let mut exit = None;
    while let Some(msg) = peer.output.recv().await {
        match msg {
            SessionOutput::Stdout(d) | SessionOutput::Stderr(d) => {
                out.push_str(&String::from_utf8_lossy(&d))
            }
            SessionOutput::Exit(code) => exit = Some(code),
            SessionOutput::Close => break,
        }
    }
    (out, exit)
}

#[tokio::test]
async fn test_panicking_session_does_not_affect_others() {
    let router = router();

    let mut sessions = Vec::new();
    for i in 0..8 {
        let user = if i == 3 { "mallory" } else { "alice" };
        sessions.push((user, start(&router, user, "boom")));
    }

    for (user, (task, mut peer, state)) in sessions {
        task.await.unwrap();
        let (out, exit) = collect(&mut peer).await;
        if user == "mallory" {
            assert_eq!(out, INTERNAL_ERROR_MESSAGE);
            assert_eq!(exit, Some(1));
        } else {
            assert_eq!(out, "fine");
            assert_eq!(exit, Some(0));
        }
        assert_eq!(*state.borrow(), RouteState::Closed);
    }
}

#[tokio::test]
async fn test_stuck_session_does_not_block_others() {
    let router = router();
    let (stuck_task, stuck_peer, _stuck_state) = start(&router, "alice", "stuck");

    let (task, mut peer, _state) = start(&router, "bob", "echo");
    peer.input.send(b"ping".to_vec()).await.unwrap();
    tokio::time::timeout(Duration::from_secs(5), task)
        .await
        .unwrap()
        .unwrap();
    let (out, exit) = collect(&mut peer).await;
    assert_eq!(out, "ping");
    assert_eq!(exit, Some(0));

    // Closing the transport releases the stuck one.
    stuck_peer.cancel.cancel();
    tokio::time::timeout(Duration::from_secs(5), stuck_task)
        .await
        .unwrap()
        .unwrap();
}

#[tokio::test]
async fn test_route_states_progress_to_active() {
    let router = router();
    let (task, mut peer, mut state) = start(&router, "alice", "stuck");

    tokio::time::timeout(
        Duration::from_secs(5),
        state.wait_for(|s| *s == RouteState::Active),
    )
    .await
    .unwrap()
    .unwrap();

    peer.cancel.cancel();
    task.await.unwrap();
    collect(&mut peer).await;
    assert_eq!(*state.borrow(), RouteState::Closed);
}

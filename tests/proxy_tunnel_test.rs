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

//! Proxy tunnel targets and connection failures.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use sshlist::directory::{Directory, Endpoint, ListenerRole, Registry};
use sshlist::middleware::builtin;
use sshlist::proxy::{HostKeyCheck, ProxyConfig, ProxyTunnel};
use sshlist::server::router::{self, RouteState, Router};
use sshlist::server::session::SessionOutput;
use sshlist::server::Session;
use sshlist::shared::ProxyError;
use tokio::sync::watch;

fn tunnel(timeout: Duration) -> ProxyTunnel {
    ProxyTunnel::new(ProxyConfig {
        identity_files: Vec::new(),
        use_agent: false,
        connect_timeout: timeout,
        host_key_check: HostKeyCheck::AcceptAny,
        keepalive_interval: None,
    })
}

/// A local port nothing listens on.
fn closed_port() -> u16 {
    let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    listener.local_addr().unwrap().port()
}

#[test]
fn test_target_inherits_local_user() {
    let endpoint = Endpoint::remote("app1", "app1.addr");
    let target = tunnel(Duration::from_secs(10)).target(&endpoint, "alice").unwrap();

    assert_eq!(target.user, "alice");
    assert_eq!(target.host, "app1.addr");
    assert_eq!(target.port, 22);
    assert_eq!(target.address, "app1.addr:22");
    assert_eq!(target.connect_timeout, Duration::from_secs(10));
}

#[test]
fn test_target_endpoint_settings_take_precedence() {
    let endpoint = Endpoint::remote("app2", "app.addr:2222")
        .with_user("override_user")
        .with_identity_file("/keys/app2")
        .with_connect_timeout(Duration::from_secs(3))
        .with_remote_command("tmux attach")
        .with_env("LANG", "C.UTF-8");
    let tunnel = ProxyTunnel::new(ProxyConfig {
        identity_files: vec![PathBuf::from("/keys/shared")],
        ..ProxyConfig::default()
    });
    let target = tunnel.target(&endpoint, "alice").unwrap();

    assert_eq!(target.user, "override_user");
    assert_eq!(target.port, 2222);
    assert_eq!(
        target.identities,
        [PathBuf::from("/keys/app2"), PathBuf::from("/keys/shared")]
    );
    assert_eq!(target.connect_timeout, Duration::from_secs(3));
    assert_eq!(target.command.as_deref(), Some("tmux attach"));
    assert_eq!(target.env, [("LANG".to_string(), "C.UTF-8".to_string())]);
}

#[test]
fn test_local_endpoint_has_no_target() {
    let endpoint = Endpoint::local("simple", vec![builtin::hello()]).with_address("0.0.0.0:2234");
    let err = tunnel(Duration::from_secs(1))
        .target(&endpoint, "alice")
        .unwrap_err();
    assert!(matches!(err, ProxyError::NotRemote(name) if name == "simple"));
}

#[tokio::test]
async fn test_refused_connection_is_unreachable() {
    let endpoint = Endpoint::remote("gone", format!("127.0.0.1:{}", closed_port()));
    let (session, _peer) = Session::builder("alice").build();

    let err = tunnel(Duration::from_secs(5))
        .open(&endpoint, &session)
        .await
        .unwrap_err();
    assert!(matches!(err, ProxyError::Unreachable { .. }), "got {err:?}");
}

#[tokio::test]
async fn test_silent_server_times_out() {
    // Accepts TCP but never speaks SSH.
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let address = listener.local_addr().unwrap();
    let endpoint = Endpoint::remote("silent", address.to_string())
        .with_connect_timeout(Duration::from_millis(200));
    let (session, _peer) = Session::builder("alice").build();

    let err = tunnel(Duration::from_secs(10))
        .open(&endpoint, &session)
        .await
        .unwrap_err();
    assert!(matches!(err, ProxyError::Timeout { .. }), "got {err:?}");
    drop(listener);
}

#[tokio::test]
async fn test_proxy_failure_is_reported_to_client() {
    let endpoint = Endpoint::remote("gone", format!("127.0.0.1:{}", closed_port()));
    let registry = Registry::register(vec![endpoint]).unwrap();
    let router = Arc::new(Router::new(
        Arc::new(Directory::new(registry)),
        Vec::new(),
        Arc::new(tunnel(Duration::from_secs(5))),
        "SSH Directories",
    ));

    let (session, mut peer) = Session::builder("alice")
        .command(Some("gone".to_string()))
        .build();
    let (state, _rx) = watch::channel(RouteState::MenuOrDirect);
    router::supervise(router, ListenerRole::Main, session, state).await;

    let mut stderr = String::new();
    let mut exit = None;
    while let Some(msg) = peer.output.recv().await {
        match msg {
            SessionOutput::Stderr(d) => stderr.push_str(&String::from_utf8_lossy(&d)),
            SessionOutput::Exit(code) => exit = Some(code),
            SessionOutput::Close => break,
            SessionOutput::Stdout(_) => {}
        }
    }
    assert!(stderr.starts_with("gone: could not connect to 127.0.0.1:"));
    assert_eq!(exit, Some(1));
}

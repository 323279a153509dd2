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

//! End-to-end tests: a real SSH client against a running directory.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use russh::client::{self, KeyboardInteractiveAuthResponse};
use russh::keys::PublicKey;
use russh::{ChannelMsg, Disconnect};
use sshlist::directory::{DirectoryConfig, Endpoint, Limits};
use sshlist::middleware::{self, builtin, logging, middleware_fn, Handler};
use sshlist::proxy::{HostKeyCheck, ProxyConfig};
use sshlist::server::auth::{hash_password, AuthPolicy, ExpectedAnswers, PasswordUsers, Prompt};
use sshlist::server::session::{Session, INPUT_QUEUE_CAPACITY};
use sshlist::server::DirectoryServer;
use tempfile::TempDir;
use tokio::sync::oneshot;

struct TrustingClient;

impl client::Handler for TrustingClient {
    type Error = russh::Error;

    async fn check_server_key(&mut self, _key: &PublicKey) -> Result<bool, Self::Error> {
        Ok(true)
    }
}

/// A directory serving in the background until the guard is dropped.
struct Running {
    main: SocketAddr,
    addrs: Vec<(String, SocketAddr)>,
    _stop: oneshot::Sender<()>,
    _keys: TempDir,
}

fn base_config(keys: &TempDir) -> DirectoryConfig {
    DirectoryConfig::new("SSH Directories")
        .with_listen("127.0.0.1", 0)
        .with_host_key(keys.path().join("server"))
        .with_serve_endpoints(false)
        .with_limits(Limits {
            auth_rejection_time: Duration::from_millis(10),
            ..Limits::default()
        })
}

async fn start(build: impl FnOnce(DirectoryConfig) -> DirectoryConfig) -> Running {
    let keys = tempfile::tempdir().unwrap();
    let config = build(base_config(&keys));
    let server = DirectoryServer::new(config).unwrap();
    let bound = server.bind().await.unwrap();
    let addrs = bound.local_addrs();
    let main = addrs.iter().find(|(name, _)| name == "main").unwrap().1;

    let (stop, stopped) = oneshot::channel::<()>();
    tokio::spawn(async move {
        let _ = bound
            .serve(async {
                let _ = stopped.await;
            })
            .await;
    });

    Running {
        main,
        addrs,
        _stop: stop,
        _keys: keys,
    }
}

async fn connect(addr: SocketAddr) -> client::Handle<TrustingClient> {
    client::connect(Arc::new(client::Config::default()), addr, TrustingClient)
        .await
        .unwrap()
}

async fn connect_open(addr: SocketAddr, user: &str) -> client::Handle<TrustingClient> {
    let mut handle = connect(addr).await;
    assert!(handle.authenticate_none(user).await.unwrap().success());
    handle
}

/// Run a channel to completion and return (stdout, stderr, exit status).
async fn run(
    handle: &client::Handle<TrustingClient>,
    pty: bool,
    command: Option<&str>,
    input: &[u8],
) -> (String, String, Option<u32>) {
    let mut channel = handle.channel_open_session().await.unwrap();
    if pty {
        channel
            .request_pty(false, "xterm", 80, 24, 0, 0, &[])
            .await
            .unwrap();
    }
    match command {
        Some(command) => channel.exec(true, command).await.unwrap(),
        None => channel.request_shell(true).await.unwrap(),
    }
    if !input.is_empty() {
        channel.data(input).await.unwrap();
    }

    let mut stdout = String::new();
    let mut stderr = String::new();
    let mut exit = None;
    let collect = async {
        while let Some(msg) = channel.wait().await {
            match msg {
                ChannelMsg::Data { data } => stdout.push_str(&String::from_utf8_lossy(&data)),
                ChannelMsg::ExtendedData { data, .. } => {
                    stderr.push_str(&String::from_utf8_lossy(&data))
                }
                ChannelMsg::ExitStatus { exit_status } => exit = Some(exit_status),
                ChannelMsg::Close => break,
                _ => {}
            }
        }
    };
    tokio::time::timeout(Duration::from_secs(10), collect)
        .await
        .unwrap();
    (stdout, stderr, exit)
}

#[tokio::test]
async fn test_listing_without_pty() {
    let dir = start(|c| {
        c.with_endpoint(Endpoint::remote("app1", "app1.addr:22"))
            .with_endpoint(Endpoint::remote("app2", "app.addr:2222").with_description("second"))
    })
    .await;

    let handle = connect_open(dir.main, "alice").await;
    let (stdout, _, exit) = run(&handle, false, None, b"").await;

    assert!(stdout.contains("SSH Directories"));
    assert!(stdout.contains("app1"));
    assert!(stdout.contains("app2"));
    assert_eq!(exit, Some(0));
}

#[tokio::test]
async fn test_unknown_endpoint_exits_one() {
    let dir = start(|c| c.with_endpoint(Endpoint::remote("app1", "app1.addr:22"))).await;

    let handle = connect_open(dir.main, "alice").await;
    let (_, stderr, exit) = run(&handle, false, Some("missing"), b"").await;

    assert!(stderr.contains("no endpoint named 'missing'"));
    assert_eq!(exit, Some(1));
}

#[tokio::test]
async fn test_local_endpoint_requires_pty() {
    let dir = start(|c| c.with_endpoint(Endpoint::local("who", vec![builtin::whoami()]))).await;

    let handle = connect_open(dir.main, "alice").await;
    let (stdout, _, exit) = run(&handle, false, Some("who"), b"").await;

    // The endpoint's own handler runs before the shared terminal check.
    assert!(stdout.contains("term:     none"));
    assert!(stdout.ends_with(middleware::activeterm::NO_PTY_MESSAGE));
    assert_eq!(exit, Some(1));
}

#[tokio::test]
async fn test_local_endpoint_with_pty() {
    let dir = start(|c| c.with_endpoint(Endpoint::local("who", vec![builtin::whoami()]))).await;

    let handle = connect_open(dir.main, "alice").await;
    let (stdout, _, exit) = run(&handle, true, Some("who"), b"").await;

    assert!(stdout.contains("user:     alice"));
    assert!(stdout.contains("endpoint: who"));
    assert!(stdout.contains("term:     xterm (80x24)"));
    assert_eq!(exit, Some(0));
}

#[tokio::test]
async fn test_menu_selection_over_ssh() {
    let dir = start(|c| {
        c.with_endpoint(Endpoint::remote("app1", "app1.addr:22"))
            .with_endpoint(Endpoint::local("who", vec![builtin::whoami()]))
    })
    .await;

    let handle = connect_open(dir.main, "alice").await;
    // Down, then Enter.
    let (stdout, _, exit) = run(&handle, true, None, b"\x1b[B\r").await;

    assert!(stdout.contains("app1"));
    assert!(stdout.contains("endpoint: who"));
    assert_eq!(exit, Some(0));
}

#[tokio::test]
async fn test_menu_quit() {
    let dir = start(|c| c.with_endpoint(Endpoint::remote("app1", "app1.addr:22"))).await;

    let handle = connect_open(dir.main, "alice").await;
    let (_, _, exit) = run(&handle, true, None, b"q").await;
    assert_eq!(exit, Some(0));
}

#[tokio::test]
async fn test_endpoint_listener_dispatches_directly() {
    let port = {
        let free = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        free.local_addr().unwrap().port()
    };
    let dir = start(|c| {
        c.with_serve_endpoints(true).with_endpoint(
            Endpoint::local("who", vec![builtin::whoami()])
                .with_address(format!("127.0.0.1:{port}")),
        )
    })
    .await;

    let who = dir.addrs.iter().find(|(name, _)| name == "who").unwrap().1;
    let handle = connect_open(who, "bob").await;
    let (stdout, _, exit) = run(&handle, true, None, b"").await;

    assert!(stdout.contains("user:     bob"));
    assert!(stdout.contains("endpoint: who"));
    assert_eq!(exit, Some(0));
}

#[tokio::test]
async fn test_password_auth() {
    let users = PasswordUsers::new([(
        "alice".to_string(),
        hash_password("correct horse").unwrap(),
    )])
    .unwrap();
    let dir = start(|c| {
        c.with_main_auth(AuthPolicy::open().with_password(users))
            .with_endpoint(Endpoint::remote("app1", "app1.addr:22"))
    })
    .await;

    let mut handle = connect(dir.main).await;
    assert!(!handle.authenticate_none("alice").await.unwrap().success());
    assert!(!handle
        .authenticate_password("alice", "wrong")
        .await
        .unwrap()
        .success());
    assert!(handle
        .authenticate_password("alice", "correct horse")
        .await
        .unwrap()
        .success());

    let (stdout, _, exit) = run(&handle, false, None, b"").await;
    assert!(stdout.contains("app1"));
    assert_eq!(exit, Some(0));
}

#[tokio::test]
async fn test_keyboard_interactive_quiz() {
    let quiz = ExpectedAnswers::new(
        vec![
            Prompt::new("♦ How much is 2+3: ", true),
            Prompt::new("♦ Which editor is best, vim or emacs? ", true),
        ],
        vec!["5".to_string(), "vim".to_string()],
    );
    let dir = start(|c| c.with_main_auth(AuthPolicy::open().with_keyboard_interactive(quiz))).await;

    let mut handle = connect(dir.main).await;
    let response = handle
        .authenticate_keyboard_interactive_start("alice", None::<String>)
        .await
        .unwrap();
    let KeyboardInteractiveAuthResponse::InfoRequest { prompts, .. } = response else {
        panic!("expected prompts");
    };
    assert_eq!(prompts.len(), 2);
    assert_eq!(prompts[0].prompt, "♦ How much is 2+3: ");
    assert!(prompts[0].echo);

    let response = handle
        .authenticate_keyboard_interactive_respond(vec!["5".to_string(), "vim".to_string()])
        .await
        .unwrap();
    assert!(matches!(response, KeyboardInteractiveAuthResponse::Success));
}

#[tokio::test]
async fn test_keyboard_interactive_wrong_answer() {
    let quiz = ExpectedAnswers::new(
        vec![Prompt::new("♦ How much is 2+3: ", true)],
        vec!["5".to_string()],
    );
    let dir = start(|c| c.with_main_auth(AuthPolicy::open().with_keyboard_interactive(quiz))).await;

    let mut handle = connect(dir.main).await;
    let response = handle
        .authenticate_keyboard_interactive_start("alice", None::<String>)
        .await
        .unwrap();
    assert!(matches!(
        response,
        KeyboardInteractiveAuthResponse::InfoRequest { .. }
    ));

    let response = handle
        .authenticate_keyboard_interactive_respond(vec!["4".to_string()])
        .await
        .unwrap();
    assert!(matches!(
        response,
        KeyboardInteractiveAuthResponse::Failure { .. }
    ));
}

/// Flags its drop so a test can tell the session task is gone.
struct ReleaseFlag(Arc<AtomicBool>);

impl Drop for ReleaseFlag {
    fn drop(&mut self) {
        self.0.store(true, Ordering::SeqCst);
    }
}

/// Opens a session on an endpoint that never reads its input, sends
/// `packets` one-byte packets, disconnects, and reports whether the
/// endpoint's handler was released.
async fn released_after_disconnect(packets: usize) -> bool {
    let released = Arc::new(AtomicBool::new(false));
    let flag = Arc::clone(&released);
    let stall = middleware_fn(move |_next: Handler, _session: Session| {
        let guard = ReleaseFlag(Arc::clone(&flag));
        async move {
            let _guard = guard;
            std::future::pending::<()>().await;
        }
    });
    let dir = start(|c| c.with_endpoint(Endpoint::local("stall", vec![stall]))).await;

    let handle = connect_open(dir.main, "alice").await;
    let channel = handle.channel_open_session().await.unwrap();
    channel
        .request_pty(false, "xterm", 80, 24, 0, 0, &[])
        .await
        .unwrap();
    channel.exec(true, "stall").await.unwrap();
    for _ in 0..packets {
        channel.data(&b"x"[..]).await.unwrap();
    }
    handle
        .disconnect(Disconnect::ByApplication, "", "en")
        .await
        .unwrap();
    drop(channel);
    drop(handle);

    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    while tokio::time::Instant::now() < deadline {
        if released.load(Ordering::SeqCst) {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    false
}

#[tokio::test]
async fn test_disconnect_releases_handler_that_ignores_input() {
    assert!(released_after_disconnect(10).await);
}

#[tokio::test]
async fn test_disconnect_releases_handler_with_full_input_queue() {
    assert!(released_after_disconnect(INPUT_QUEUE_CAPACITY + 144).await);
}

#[tokio::test]
async fn test_proxy_to_another_directory() {
    let upstream = start(|c| {
        c.with_endpoint(Endpoint::remote("deep", "deep.addr:22"))
            .with_endpoint(Endpoint::local("who", vec![builtin::whoami()]))
    })
    .await;
    let upstream_addr = upstream.main;

    let front = start(move |c| {
        c.with_shared_middlewares(vec![logging::middleware()])
            .with_proxy(ProxyConfig {
                identity_files: Vec::new(),
                use_agent: false,
                connect_timeout: Duration::from_secs(5),
                host_key_check: HostKeyCheck::AcceptAny,
                keepalive_interval: None,
            })
            .with_endpoint(Endpoint::remote("upstream", upstream_addr.to_string()))
            .with_endpoint(
                Endpoint::remote("upstream-as-carol", upstream_addr.to_string())
                    .with_user("carol"),
            )
    })
    .await;

    let handle = connect_open(front.main, "alice").await;
    let (stdout, _, exit) = run(&handle, false, Some("upstream"), b"").await;

    // The upstream directory printed its own listing.
    assert!(stdout.contains("deep"));
    assert!(stdout.contains("deep.addr:22"));
    assert_eq!(exit, Some(0));

    // Same upstream host, each endpoint logs in as its own user.
    let (stdout, _, exit) = run(&handle, true, Some("upstream who"), b"").await;
    assert!(stdout.contains("user:     alice"), "{stdout}");
    assert!(stdout.contains("endpoint: who"));
    assert_eq!(exit, Some(0));

    let (stdout, _, exit) = run(&handle, true, Some("upstream-as-carol who"), b"").await;
    assert!(stdout.contains("user:     carol"), "{stdout}");
    assert!(!stdout.contains("user:     alice"));
    assert_eq!(exit, Some(0));
}

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

//! Local handlers that can be referenced by name from a configuration file.
//!
//! | Name | Behaviour |
//! |---|---|
//! | `hello` | greets the user, then waits up to five seconds or for a key |
//! | `echo` | echoes input back until Ctrl-D or EOF |
//! | `whoami` | prints what the server knows about the session |

use std::time::Duration;

use super::{middleware_fn, Handler, Middleware};
use crate::server::session::Session;

/// Names accepted by [`lookup`].
pub const NAMES: &[&str] = &["hello", "echo", "whoami"];

const HELLO_WAIT: Duration = Duration::from_secs(5);
const CTRL_C: u8 = 0x03;
const CTRL_D: u8 = 0x04;

/// Find a builtin handler by name.
pub fn lookup(name: &str) -> Option<Middleware> {
    match name {
        "hello" => Some(hello()),
        "echo" => Some(echo()),
        "whoami" => Some(whoami()),
        _ => None,
    }
}

pub fn hello() -> Middleware {
    middleware_fn(|next: Handler, session: Session| async move {
        session.write("hello, world\r\n");
        tokio::select! {
            _ = tokio::time::sleep(HELLO_WAIT) => {}
            _ = session.read() => {}
        }
        next(session).await;
    })
}

pub fn echo() -> Middleware {
    middleware_fn(|next: Handler, session: Session| async move {
        session.write("echo mode, Ctrl-D to leave\r\n");
        while let Some(data) = session.read().await {
            if data.contains(&CTRL_D) || data.contains(&CTRL_C) {
                break;
            }
            // Terminals send CR for Enter.
            let echoed: Vec<u8> = data
                .iter()
                .flat_map(|&b| if b == b'\r' { vec![b'\r', b'\n'] } else { vec![b] })
                .collect();
            if !session.write_all(echoed).await {
                break;
            }
        }
        session.write("\r\n");
        next(session).await;
    })
}

pub fn whoami() -> Middleware {
    middleware_fn(|next: Handler, session: Session| async move {
        session.write(describe(&session));
        next(session).await;
    })
}

fn describe(session: &Session) -> String {
    let window = session.window();
    let mut out = format!(
        "user:     {}\r\nendpoint: {}\r\nsession:  {}\r\n",
        session.user(),
        session.endpoint().unwrap_or("-"),
        session.id()
    );
    if let Some(peer) = session.peer_addr() {
        out.push_str(&format!("peer:     {peer}\r\n"));
    }
    match session.pty() {
        Some(pty) => out.push_str(&format!(
            "term:     {} ({}x{})\r\n",
            pty.term, window.cols, window.rows
        )),
        None => out.push_str("term:     none\r\n"),
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::middleware::{compose, noop};
    use crate::server::session::{PtyConfig, SessionOutput, WindowSize};

    async fn drain(peer: &mut crate::server::session::SessionPeer) -> Vec<u8> {
        let mut out = Vec::new();
        while let Ok(item) = peer.output.try_recv() {
            if let SessionOutput::Stdout(data) = item {
                out.extend(data);
            }
        }
        out
    }

    #[test]
    fn test_lookup() {
        for name in NAMES {
            assert!(lookup(name).is_some(), "{name} should resolve");
        }
        assert!(lookup("bubbletea").is_none());
    }

    #[tokio::test]
    async fn test_hello_returns_on_keypress() {
        let (session, mut peer) = Session::builder("alice").build();
        peer.input.send(b"x".to_vec()).await.unwrap();

        tokio::time::timeout(
            Duration::from_secs(1),
            compose(&[hello()], noop())(session),
        )
        .await
        .unwrap();

        let out = drain(&mut peer).await;
        assert!(String::from_utf8_lossy(&out).contains("hello, world"));
    }

    #[tokio::test]
    async fn test_echo_until_ctrl_d() {
        let (session, mut peer) = Session::builder("alice").build();
        peer.input.send(b"abc\r".to_vec()).await.unwrap();
        peer.input.send(vec![CTRL_D]).await.unwrap();

        compose(&[echo()], noop())(session).await;

        let out = String::from_utf8(drain(&mut peer).await).unwrap();
        assert!(out.contains("abc\r\n"));
    }

    #[tokio::test]
    async fn test_whoami_describes_session() {
        let pty = PtyConfig::new("xterm-256color", WindowSize::new(132, 43));
        let (session, mut peer) = Session::builder("alice").pty(Some(pty)).build();
        let session = session.with_endpoint("simple");

        compose(&[whoami()], noop())(session).await;

        let out = String::from_utf8(drain(&mut peer).await).unwrap();
        assert!(out.contains("user:     alice"));
        assert!(out.contains("endpoint: simple"));
        assert!(out.contains("xterm-256color (132x43)"));
    }
}

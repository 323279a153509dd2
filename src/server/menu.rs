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

//! The endpoint selection menu shown on the main listener.
//!
//! Keys: `↑`/`k` and `↓`/`j` move, digits jump to an entry by number,
//! `Enter` connects, `q`, `Ctrl-C` or `Ctrl-D` leaves.

use std::sync::Arc;

use crate::directory::{Endpoint, Registry};
use crate::server::session::{Session, WindowSize};

const CLEAR_SCREEN: &str = "\x1b[2J\x1b[H";
const BOLD: &str = "\x1b[1m";
const DIM: &str = "\x1b[2m";
const REVERSE: &str = "\x1b[7m";
const RESET: &str = "\x1b[0m";

/// How the menu ended.
#[derive(Debug, Clone)]
pub enum MenuOutcome {
    Selected(Arc<Endpoint>),
    Quit,
}

/// A decoded key press.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Key {
    Up,
    Down,
    Enter,
    Quit,
    Backspace,
    Digit(u8),
}

/// Decode terminal input into menu keys. Unknown bytes are dropped.
pub fn parse_keys(input: &[u8]) -> Vec<Key> {
    let mut keys = Vec::new();
    let mut i = 0;
    while i < input.len() {
        match input[i] {
            0x1b if i + 2 < input.len() && matches!(input[i + 1], b'[' | b'O') => {
                match input[i + 2] {
                    b'A' => keys.push(Key::Up),
                    b'B' => keys.push(Key::Down),
                    _ => {}
                }
                i += 3;
                continue;
            }
            b'k' => keys.push(Key::Up),
            b'j' => keys.push(Key::Down),
            b'\r' | b'\n' => keys.push(Key::Enter),
            b'q' | 0x03 | 0x04 => keys.push(Key::Quit),
            0x7f | 0x08 => keys.push(Key::Backspace),
            b @ b'0'..=b'9' => keys.push(Key::Digit(b - b'0')),
            _ => {}
        }
        i += 1;
    }
    keys
}

/// Interactive selection over a registry snapshot.
#[derive(Debug)]
pub struct Menu {
    title: String,
    registry: Arc<Registry>,
    cursor: usize,
    typed: String,
}

impl Menu {
    pub fn new(title: impl Into<String>, registry: Arc<Registry>) -> Self {
        Self {
            title: title.into(),
            registry,
            cursor: 0,
            typed: String::new(),
        }
    }

    pub fn cursor(&self) -> usize {
        self.cursor
    }

    /// Apply one key; returns the outcome once the menu is done.
    pub fn handle(&mut self, key: Key) -> Option<MenuOutcome> {
        let len = self.registry.len();
        match key {
            Key::Up => {
                self.typed.clear();
                self.cursor = self.cursor.checked_sub(1).unwrap_or(len.saturating_sub(1));
            }
            Key::Down => {
                self.typed.clear();
                self.cursor = if self.cursor + 1 >= len { 0 } else { self.cursor + 1 };
            }
            Key::Digit(d) => {
                self.typed.push(char::from(b'0' + d));
                match self.typed.parse::<usize>() {
                    Ok(n) if (1..=len).contains(&n) => self.cursor = n - 1,
                    _ => {
                        // Start over from this digit.
                        self.typed = char::from(b'0' + d).to_string();
                        if let Some(n) = usize::from(d).checked_sub(1).filter(|n| *n < len) {
                            self.cursor = n;
                        }
                    }
                }
            }
            Key::Backspace => {
                self.typed.pop();
            }
            Key::Enter => {
                return self
                    .registry
                    .endpoints()
                    .get(self.cursor)
                    .cloned()
                    .map(MenuOutcome::Selected);
            }
            Key::Quit => return Some(MenuOutcome::Quit),
        }
        None
    }

    /// Full-screen rendering for a terminal of the given size.
    pub fn render(&self, window: WindowSize) -> String {
        let width = (window.cols as usize).max(20);
        let mut out = String::from(CLEAR_SCREEN);
        out.push_str(&format!("{BOLD}{}{RESET}\r\n\r\n", truncate(&self.title, width)));

        let number_width = self.registry.len().to_string().len();
        let name_width = self
            .registry
            .names()
            .map(|n| n.chars().count())
            .max()
            .unwrap_or(0);

        for (i, endpoint) in self.registry.endpoints().iter().enumerate() {
            let line = format!(
                "{:>nw$}. {:<w$}  {}",
                i + 1,
                endpoint.name,
                endpoint.summary(),
                nw = number_width,
                w = name_width
            );
            let line = truncate(&line, width.saturating_sub(2));
            if i == self.cursor {
                out.push_str(&format!("{REVERSE}> {line}{RESET}\r\n"));
            } else {
                out.push_str(&format!("  {line}\r\n"));
            }
        }

        out.push_str(&format!(
            "\r\n{DIM}{}{RESET}\r\n",
            truncate("↑/↓ move • 1-9 jump • enter connect • q quit", width)
        ));
        out
    }

    /// Drive the menu from session input until a choice is made.
    pub async fn run(mut self, session: &Session) -> MenuOutcome {
        if self.registry.is_empty() {
            session.write("No endpoints configured.\r\n");
            return MenuOutcome::Quit;
        }

        let mut window = session.window_changes();
        session.write(self.render(session.window()));

        loop {
            tokio::select! {
                input = session.read() => {
                    let Some(input) = input else {
                        return MenuOutcome::Quit;
                    };
                    for key in parse_keys(&input) {
                        if let Some(outcome) = self.handle(key) {
                            session.write(CLEAR_SCREEN);
                            return outcome;
                        }
                    }
                    session.write(self.render(session.window()));
                }
                changed = window.changed() => {
                    if changed.is_err() {
                        return MenuOutcome::Quit;
                    }
                    let size = *window.borrow_and_update();
                    session.write(self.render(size));
                }
            }
        }
    }
}

/// Listing for clients without a terminal.
pub fn render_plain(title: &str, registry: &Registry) -> String {
    let mut out = format!("{title}\r\n\r\n");
    for endpoint in registry.endpoints() {
        out.push_str(&format!("  {}\t{}\r\n", endpoint.name, endpoint.summary()));
    }
    out.push_str("\r\nConnect with: ssh -t <this host> <endpoint>\r\n");
    out
}

fn truncate(s: &str, max: usize) -> String {
    if s.chars().count() <= max {
        s.to_string()
    } else {
        let mut out: String = s.chars().take(max.saturating_sub(1)).collect();
        out.push('…');
        out
    }
}

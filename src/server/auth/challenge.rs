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

//! Keyboard-interactive challenges.
//!
//! The SSH transport delivers keyboard-interactive authentication as a
//! sequence of callbacks: one to start, then one per client response. A
//! [`KeyboardInteractiveAuth`] strategy, on the other hand, is written as a
//! single async conversation. [`ChallengeExchange`] bridges the two: the
//! strategy runs on its own task and talks to the connection handler through
//! channels, and every wait is bounded by a timeout.
//!
//! ```text
//! handler                         exchange task
//!   start() ──────────────────────▶ strategy.authenticate()
//!   next() ◀─── Prompt(challenge) ─ responder.respond()
//!   answer(answers) ──────────────▶   ... compares answers
//!   next() ◀────────── Done(result)
//! ```

use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;

use super::policy::{settle, KeyboardInteractiveAuth};
use crate::shared::auth_types::{AuthContext, AuthResult};
use crate::shared::error::AuthError;

/// Default bound on each step of a challenge exchange.
pub const DEFAULT_CHALLENGE_TIMEOUT: Duration = Duration::from_secs(60);

/// A single prompt shown to the client.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Prompt {
    pub text: String,
    /// Whether the client should echo what the user types.
    pub echo: bool,
}

impl Prompt {
    pub fn new(text: impl Into<String>, echo: bool) -> Self {
        Self {
            text: text.into(),
            echo,
        }
    }
}

/// One round of keyboard-interactive prompts.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Challenge {
    pub name: String,
    pub instruction: String,
    pub prompts: Vec<Prompt>,
}

/// The client side of a challenge, as seen by a strategy.
#[async_trait]
pub trait ChallengeResponder: Send {
    /// Present `challenge` and wait for one answer per prompt.
    async fn respond(&mut self, challenge: Challenge) -> Result<Vec<String>, AuthError>;
}

/// A strategy that asks fixed questions and expects fixed answers.
#[derive(Debug, Clone)]
pub struct ExpectedAnswers {
    challenge: Challenge,
    answers: Vec<String>,
}

impl ExpectedAnswers {
    pub fn new(prompts: Vec<Prompt>, answers: Vec<String>) -> Self {
        Self {
            challenge: Challenge {
                name: String::new(),
                instruction: String::new(),
                prompts,
            },
            answers,
        }
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.challenge.name = name.into();
        self
    }

    pub fn with_instruction(mut self, instruction: impl Into<String>) -> Self {
        self.challenge.instruction = instruction.into();
        self
    }

    pub fn challenge(&self) -> &Challenge {
        &self.challenge
    }

    /// Exactly as many answers as expected, each one matching.
    pub fn check(&self, answers: &[String]) -> bool {
        answers.len() == self.answers.len()
            && answers
                .iter()
                .zip(&self.answers)
                .all(|(given, expected)| given == expected)
    }
}

#[async_trait]
impl KeyboardInteractiveAuth for ExpectedAnswers {
    async fn authenticate(
        &self,
        _ctx: &AuthContext,
        responder: &mut dyn ChallengeResponder,
    ) -> Result<AuthResult> {
        let answers = responder.respond(self.challenge.clone()).await?;
        Ok(self.check(&answers).into())
    }
}

/// What the connection handler should do next.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChallengeStep {
    /// Send these prompts to the client.
    Prompt(Challenge),
    /// The conversation is over.
    Done(AuthResult),
}

enum ExchangeEvent {
    Challenge(Challenge, oneshot::Sender<Result<Vec<String>, AuthError>>),
    Done(AuthResult),
}

/// Responder that forwards challenges to the connection handler.
struct ChannelResponder {
    events: mpsc::Sender<ExchangeEvent>,
    timeout: Duration,
}

#[async_trait]
impl ChallengeResponder for ChannelResponder {
    async fn respond(&mut self, challenge: Challenge) -> Result<Vec<String>, AuthError> {
        let (tx, rx) = oneshot::channel();
        self.events
            .send(ExchangeEvent::Challenge(challenge, tx))
            .await
            .map_err(|_| AuthError::ChallengeClosed)?;

        match tokio::time::timeout(self.timeout, rx).await {
            Ok(Ok(answers)) => answers,
            Ok(Err(_)) => Err(AuthError::ChallengeClosed),
            Err(_) => Err(AuthError::ChallengeTimeout(self.timeout)),
        }
    }
}

/// A keyboard-interactive conversation in progress.
///
/// Dropping the exchange aborts the strategy task.
pub struct ChallengeExchange {
    events: mpsc::Receiver<ExchangeEvent>,
    pending: Option<oneshot::Sender<Result<Vec<String>, AuthError>>>,
    timeout: Duration,
    task: JoinHandle<()>,
}

impl ChallengeExchange {
    /// Start running `strategy` for `ctx` on a separate task.
    pub fn start(
        strategy: Arc<dyn KeyboardInteractiveAuth>,
        ctx: AuthContext,
        timeout: Duration,
    ) -> Self {
        let (tx, rx) = mpsc::channel(1);
        let task = tokio::spawn(async move {
            let mut responder = ChannelResponder {
                events: tx.clone(),
                timeout,
            };
            let outcome = strategy.authenticate(&ctx, &mut responder).await;
            let result = settle("keyboard-interactive", &ctx, outcome);
            let _ = tx.send(ExchangeEvent::Done(result)).await;
        });

        Self {
            events: rx,
            pending: None,
            timeout,
            task,
        }
    }

    /// Wait for the strategy's next prompt or its verdict.
    pub async fn next(&mut self) -> ChallengeStep {
        match tokio::time::timeout(self.timeout, self.events.recv()).await {
            Ok(Some(ExchangeEvent::Challenge(challenge, reply))) => {
                self.pending = Some(reply);
                ChallengeStep::Prompt(challenge)
            }
            Ok(Some(ExchangeEvent::Done(result))) => ChallengeStep::Done(result),
            Ok(None) => {
                tracing::warn!("Keyboard-interactive task ended without a verdict");
                ChallengeStep::Done(AuthResult::Reject)
            }
            Err(_) => {
                tracing::warn!(timeout = ?self.timeout, "Keyboard-interactive strategy timed out");
                ChallengeStep::Done(AuthResult::Reject)
            }
        }
    }

    /// Hand the client's answers to the waiting strategy.
    ///
    /// Returns `false` if no prompt was outstanding.
    pub fn answer(&mut self, answers: Vec<String>) -> bool {
        self.reply(Ok(answers))
    }

    /// Tell the waiting strategy the client's response was unusable.
    pub fn fail(&mut self, error: AuthError) -> bool {
        self.reply(Err(error))
    }

    fn reply(&mut self, answers: Result<Vec<String>, AuthError>) -> bool {
        match self.pending.take() {
            Some(reply) => reply.send(answers).is_ok(),
            None => false,
        }
    }
}

impl Drop for ChallengeExchange {
    fn drop(&mut self) {
        self.task.abort();
    }
}

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

//! Keyboard-interactive challenge exchanges with custom strategies.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use sshlist::server::auth::{
    AuthPolicy, Challenge, ChallengeExchange, ChallengeResponder, ChallengeStep, ExpectedAnswers,
    KeyboardInteractiveAuth, Prompt,
};
use sshlist::shared::{AuthContext, AuthError, AuthResult};

fn quiz() -> ExpectedAnswers {
    ExpectedAnswers::new(
        vec![
            Prompt::new("♦ How much is 2+3: ", true),
            Prompt::new("♦ Which editor is best, vim or emacs? ", true),
        ],
        vec!["5".to_string(), "vim".to_string()],
    )
    .with_name("Quiz")
    .with_instruction("Answer both questions")
}

/// Asks for a one-time code after a password, in two rounds.
struct TwoStep;

#[async_trait]
impl KeyboardInteractiveAuth for TwoStep {
    async fn authenticate(
        &self,
        ctx: &AuthContext,
        responder: &mut dyn ChallengeResponder,
    ) -> Result<AuthResult> {
        let first = responder
            .respond(Challenge {
                name: "Login".to_string(),
                instruction: format!("Hello {}", ctx.user),
                prompts: vec![Prompt::new("Password: ", false)],
            })
            .await?;
        if first != ["secret"] {
            return Ok(AuthResult::Reject);
        }

        let second = responder
            .respond(Challenge {
                prompts: vec![Prompt::new("Code: ", true)],
                ..Challenge::default()
            })
            .await?;
        Ok((second == ["123456"]).into())
    }
}

/// A provider whose backend is down.
struct Broken;

#[async_trait]
impl KeyboardInteractiveAuth for Broken {
    async fn authenticate(
        &self,
        _ctx: &AuthContext,
        _responder: &mut dyn ChallengeResponder,
    ) -> Result<AuthResult> {
        anyhow::bail!("directory service unavailable")
    }
}

fn start(strategy: impl KeyboardInteractiveAuth + 'static, timeout: Duration) -> ChallengeExchange {
    ChallengeExchange::start(
        Arc::new(strategy),
        AuthContext::new("alice").with_listener("main"),
        timeout,
    )
}

fn answers(items: &[&str]) -> Vec<String> {
    items.iter().map(|s| s.to_string()).collect()
}

#[tokio::test]
async fn test_quiz_prompts_carry_echo_flags() {
    let mut exchange = start(quiz(), Duration::from_secs(5));

    let ChallengeStep::Prompt(challenge) = exchange.next().await else {
        panic!("expected a prompt");
    };
    assert_eq!(challenge.name, "Quiz");
    assert_eq!(challenge.instruction, "Answer both questions");
    assert_eq!(challenge.prompts.len(), 2);
    assert!(challenge.prompts.iter().all(|p| p.echo));

    assert!(exchange.answer(answers(&["5", "vim"])));
    assert_eq!(exchange.next().await, ChallengeStep::Done(AuthResult::Accept));
}

#[tokio::test]
async fn test_quiz_rejects_partial_answers() {
    let mut exchange = start(quiz(), Duration::from_secs(5));
    assert!(matches!(exchange.next().await, ChallengeStep::Prompt(_)));

    exchange.answer(answers(&["5"]));
    assert_eq!(exchange.next().await, ChallengeStep::Done(AuthResult::Reject));
}

#[tokio::test]
async fn test_malformed_response_denies() {
    let mut exchange = start(quiz(), Duration::from_secs(5));
    assert!(matches!(exchange.next().await, ChallengeStep::Prompt(_)));

    assert!(exchange.fail(AuthError::MalformedResponse(
        "answer 1 is not valid UTF-8".to_string()
    )));
    assert_eq!(exchange.next().await, ChallengeStep::Done(AuthResult::Reject));
}

#[tokio::test]
async fn test_multi_round_strategy() {
    let mut exchange = start(TwoStep, Duration::from_secs(5));

    let ChallengeStep::Prompt(first) = exchange.next().await else {
        panic!("expected the password prompt");
    };
    assert_eq!(first.instruction, "Hello alice");
    assert!(!first.prompts[0].echo);
    exchange.answer(answers(&["secret"]));

    let ChallengeStep::Prompt(second) = exchange.next().await else {
        panic!("expected the code prompt");
    };
    assert_eq!(second.prompts[0].text, "Code: ");
    exchange.answer(answers(&["123456"]));

    assert_eq!(exchange.next().await, ChallengeStep::Done(AuthResult::Accept));
}

#[tokio::test]
async fn test_provider_error_denies() {
    let mut exchange = start(Broken, Duration::from_secs(5));
    assert_eq!(exchange.next().await, ChallengeStep::Done(AuthResult::Reject));
}

#[tokio::test]
async fn test_unanswered_challenge_times_out() {
    let mut exchange = start(quiz(), Duration::from_millis(50));
    assert!(matches!(exchange.next().await, ChallengeStep::Prompt(_)));

    // No answer: the strategy gives up and the attempt is denied.
    assert_eq!(exchange.next().await, ChallengeStep::Done(AuthResult::Reject));
}

#[test]
fn test_policy_advertises_keyboard_interactive() {
    let policy = AuthPolicy::open().with_keyboard_interactive(quiz());
    assert!(policy.allows_keyboard_interactive());
    assert!(!policy.allows_password());
    assert_eq!(policy.method_names(), ["keyboard-interactive"]);
}

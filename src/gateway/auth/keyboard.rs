//! Keyboard-interactive authentication answered with the session secret.
//!
//! Many servers disable the `password` method but still accept the same
//! password through keyboard-interactive prompts. Every prompt in every round
//! is answered with the secret.

use async_trait::async_trait;
use russh::client::{self, KeyboardInteractiveAuthResponse};
use tracing::debug;

use crate::gateway::session::SshClientHandler;

use super::traits::AuthStrategy;

/// Upper bound on prompt rounds before giving up.
const MAX_ROUNDS: usize = 4;

pub struct KeyboardInteractiveAuth {
    secret: String,
}

impl KeyboardInteractiveAuth {
    pub fn new(secret: impl Into<String>) -> Self {
        Self {
            secret: secret.into(),
        }
    }

    fn answers(&self, prompts: usize) -> Vec<String> {
        vec![self.secret.clone(); prompts]
    }
}

#[async_trait]
impl AuthStrategy for KeyboardInteractiveAuth {
    async fn authenticate(
        &self,
        handle: &mut client::Handle<SshClientHandler>,
        username: &str,
    ) -> Result<bool, String> {
        let mut response = handle
            .authenticate_keyboard_interactive_start(username, None::<String>)
            .await
            .map_err(|e| format!("keyboard-interactive start failed: {}", e))?;

        for round in 0..MAX_ROUNDS {
            match response {
                KeyboardInteractiveAuthResponse::Success => return Ok(true),
                KeyboardInteractiveAuthResponse::Failure { .. } => return Ok(false),
                KeyboardInteractiveAuthResponse::InfoRequest { prompts, .. } => {
                    debug!(
                        "keyboard-interactive round {} with {} prompt(s)",
                        round + 1,
                        prompts.len()
                    );
                    response = handle
                        .authenticate_keyboard_interactive_respond(self.answers(prompts.len()))
                        .await
                        .map_err(|e| format!("keyboard-interactive respond failed: {}", e))?;
                }
            }
        }

        Ok(matches!(response, KeyboardInteractiveAuthResponse::Success))
    }

    fn name(&self) -> &'static str {
        "keyboard-interactive"
    }
}

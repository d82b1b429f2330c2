//! Authentication gate.
//!
//! The gate is the single suspension point of the engine: it shows the
//! platform prompt, waits for the outcome, and converts success into a
//! short-lived [`AuthProof`]. Proofs are never cached; every gated
//! operation prompts again.

use async_trait::async_trait;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::StorageOptions;
use sealbox_common::{Error, Result};
use sealbox_crypto::AuthProof;

/// Default time the user has to answer a prompt.
pub const DEFAULT_PROMPT_TIMEOUT: Duration = Duration::from_secs(60);

/// Default validity of an issued proof.
pub const DEFAULT_PROOF_VALIDITY: Duration = Duration::from_secs(10);

/// Result reported by the platform prompt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AuthOutcome {
    /// The user authenticated.
    Authenticated,
    /// The user declined or failed to authenticate.
    Denied(String),
    /// The prompt could not be shown or crashed.
    Error(String),
}

/// Text shown by the prompt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PromptInfo {
    pub title: String,
    pub subtitle: String,
}

impl PromptInfo {
    /// Prompt text configured for a namespace.
    pub fn from_options(options: &StorageOptions) -> Self {
        Self {
            title: options.biometric_prompt_title.clone(),
            subtitle: options.biometric_prompt_subtitle.clone(),
        }
    }
}

/// Platform biometric / device-credential prompt.
#[async_trait]
pub trait Authenticator: Send + Sync {
    /// Show the prompt and wait for the user.
    async fn authenticate(&self, prompt: &PromptInfo) -> AuthOutcome;
}

/// Gate state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GateState {
    Idle,
    Prompting,
    Authenticated,
    Denied,
    Error,
    Cancelled,
}

/// Obtains authentication proofs from the platform prompt.
pub struct AuthenticationGate {
    authenticator: Option<Arc<dyn Authenticator>>,
    state: Mutex<GateState>,
    in_flight: Mutex<Option<CancellationToken>>,
    timeout: Duration,
    proof_validity: Duration,
}

impl AuthenticationGate {
    /// Gate over `authenticator`. Without one, every authorization fails.
    pub fn new(authenticator: Option<Arc<dyn Authenticator>>) -> Self {
        Self {
            authenticator,
            state: Mutex::new(GateState::Idle),
            in_flight: Mutex::new(None),
            timeout: DEFAULT_PROMPT_TIMEOUT,
            proof_validity: DEFAULT_PROOF_VALIDITY,
        }
    }

    /// Use a different prompt timeout.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Use a different proof validity window.
    pub fn with_proof_validity(mut self, validity: Duration) -> Self {
        self.proof_validity = validity;
        self
    }

    /// State after the most recent transition.
    pub fn state(&self) -> GateState {
        self.state.lock().map(|s| *s).unwrap_or(GateState::Error)
    }

    fn set_state(&self, state: GateState) {
        if let Ok(mut current) = self.state.lock() {
            *current = state;
        }
    }

    /// Cancel the prompt in flight, if any.
    ///
    /// Returns whether a prompt was cancelled.
    pub fn cancel(&self) -> bool {
        let token = self.in_flight.lock().ok().and_then(|mut t| t.take());
        match token {
            Some(token) => {
                token.cancel();
                info!("Authentication prompt cancelled");
                true
            }
            None => false,
        }
    }

    /// Prompt the user and issue a proof on success.
    ///
    /// # Errors
    /// - `AuthenticationFailed` if no authenticator is configured, the user
    ///   denies, the prompt errors, or it times out
    /// - `OperationCancelled` if [`cancel`](Self::cancel) is called meanwhile
    pub async fn authorize(&self, prompt: &PromptInfo) -> Result<AuthProof> {
        let authenticator = self.authenticator.as_ref().ok_or_else(|| {
            self.set_state(GateState::Error);
            Error::AuthenticationFailed("No authenticator available".to_string())
        })?;

        let token = CancellationToken::new();
        if let Ok(mut in_flight) = self.in_flight.lock() {
            *in_flight = Some(token.clone());
        }
        self.set_state(GateState::Prompting);
        debug!(title = %prompt.title, "Prompting for authentication");

        let outcome = tokio::select! {
            biased;
            _ = token.cancelled() => None,
            result = tokio::time::timeout(self.timeout, authenticator.authenticate(prompt)) => {
                Some(result.unwrap_or_else(|_| AuthOutcome::Error("Prompt timed out".to_string())))
            }
        };

        if let Ok(mut in_flight) = self.in_flight.lock() {
            in_flight.take();
        }

        match outcome {
            Some(AuthOutcome::Authenticated) => {
                self.set_state(GateState::Authenticated);
                Ok(AuthProof::issue(self.proof_validity))
            }
            Some(AuthOutcome::Denied(reason)) => {
                self.set_state(GateState::Denied);
                warn!(%reason, "Authentication denied");
                Err(Error::AuthenticationFailed(reason))
            }
            Some(AuthOutcome::Error(reason)) => {
                self.set_state(GateState::Error);
                warn!(%reason, "Authentication error");
                Err(Error::AuthenticationFailed(reason))
            }
            None => {
                self.set_state(GateState::Cancelled);
                Err(Error::OperationCancelled(
                    "Authentication prompt cancelled".to_string(),
                ))
            }
        }
    }
}

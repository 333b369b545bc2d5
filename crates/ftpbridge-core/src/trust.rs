//! # Trust Policy
//!
//! Answers the prompts an SSH session raises while it is being established.
//!
//! ```text
//! ┌───────────────────────────────┬─────────────────────────────────────────┐
//! │ prompt                        │ response                                │
//! ├───────────────────────────────┼─────────────────────────────────────────┤
//! │ unknown / changed host key    │ accept (optionally persist)             │
//! │ key passphrase                │ none                                    │
//! │ password                      │ configured password                     │
//! │ keyboard-interactive          │ [password] or no response               │
//! └───────────────────────────────┴─────────────────────────────────────────┘
//! ```
//!
//! The policy is stateless and re-derived from the active endpoint for every
//! session. Accepting changed host keys favours availability over host
//! pinning; deployments that need pinning must check keys before the policy
//! is consulted.

use serde::{Deserialize, Serialize};

use crate::endpoint::EndpointConfig;

/// Outcome of a host-identity confirmation prompt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrustDecision {
    /// Continue the handshake.
    pub accept: bool,
    /// Record the presented key as the host's known key.
    pub persist: bool,
}

/// Session prompt responses for one endpoint.
#[derive(Clone, PartialEq, Eq)]
pub struct TrustPolicy {
    password: Option<String>,
    persist_host_keys: bool,
}

impl TrustPolicy {
    /// Builds the policy for a resolved endpoint.
    pub fn for_endpoint(endpoint: &EndpointConfig, persist_host_keys: bool) -> Self {
        Self {
            password: endpoint.password().map(str::to_string),
            persist_host_keys,
        }
    }

    /// Host identity confirmation. Always accepted.
    pub fn confirm_host_identity(&self, _message: &str) -> TrustDecision {
        TrustDecision {
            accept: true,
            persist: self.persist_host_keys,
        }
    }

    /// Private-key passphrase. Key-based auth is not configured.
    pub fn passphrase(&self) -> Option<&str> {
        None
    }

    pub fn password(&self) -> Option<&str> {
        self.password.as_deref()
    }

    /// Responses to a keyboard-interactive challenge.
    ///
    /// The password is answered once; without a password the response is empty.
    pub fn keyboard_interactive(&self, _prompts: &[&str]) -> Vec<String> {
        match &self.password {
            Some(password) => vec![password.clone()],
            None => Vec::new(),
        }
    }
}

impl std::fmt::Debug for TrustPolicy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TrustPolicy")
            .field("password", &self.password.is_some())
            .field("persist_host_keys", &self.persist_host_keys)
            .finish()
    }
}

//! Storage trait definitions for per-session target state.
//!
//! The router depends on this trait rather than a concrete map so the registry
//! can be injected and replaced in tests.

use serde::Serialize;

use crate::gateway::error::GatewayError;
use crate::gateway::types::{CredentialRecord, Credentials};

/// Result of a claim attempt that did not hit a hard error.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClaimOutcome {
    /// The address was free and now belongs to the caller.
    Claimed,
    /// The caller already holds this address; nothing changed.
    AlreadyHeld,
    /// Another session holds the address; the caller's record was reset.
    Conflict { holder: String },
}

/// Read-only view of one registry entry.
#[derive(Debug, Clone, Serialize)]
pub struct SessionSnapshot {
    pub session_id: String,
    /// Claimed target address, if any.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub target: Option<String>,
    /// When the transport connected (RFC3339)
    pub connected_at: String,
}

/// Trait for session registry operations.
///
/// Implementations must be thread-safe (`Send + Sync`): sessions are served
/// concurrently and only `claim` needs to be atomic across them.
pub trait SessionRegistry: Send + Sync {
    /// Insert an empty record for a newly connected session.
    fn create(&self, session_id: &str) -> Result<(), GatewayError>;

    /// Return a copy of the session's record.
    fn lookup(&self, session_id: &str) -> Result<CredentialRecord, GatewayError>;

    /// Claim the credentials' address for this session.
    ///
    /// At most one session holds a given address. On conflict the caller's
    /// record is reset to empty and [`ClaimOutcome::Conflict`] is returned.
    fn claim(
        &self,
        session_id: &str,
        credentials: Credentials,
    ) -> Result<ClaimOutcome, GatewayError>;

    /// Remove the session and release its address. Idempotent.
    fn evict(&self, session_id: &str) -> Option<SessionSnapshot>;

    /// Session currently holding `address`.
    fn holder_of(&self, address: &str) -> Option<String>;

    /// List all sessions.
    fn list(&self) -> Vec<SessionSnapshot>;

    /// Number of connected sessions.
    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

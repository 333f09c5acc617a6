//! DashMap-based session registry implementation.
//!
//! Uses two `DashMap` instances:
//! - Primary storage: session_id -> SessionEntry
//! - Address index: target address -> session_id
//!
//! The address index is the arbiter of target ownership. Its entry API locks
//! the address's shard for the check-and-insert, so two sessions racing for one
//! address cannot both win. A guard on one map is never held while touching
//! the other.

use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use tracing::{debug, warn};

use crate::gateway::error::GatewayError;
use crate::gateway::types::{CredentialRecord, Credentials};

use super::traits::{ClaimOutcome, SessionRegistry, SessionSnapshot};

struct SessionEntry {
    record: CredentialRecord,
    connected_at: String,
}

impl SessionEntry {
    fn snapshot(&self, session_id: &str) -> SessionSnapshot {
        SessionSnapshot {
            session_id: session_id.to_string(),
            target: self.record.address().map(str::to_string),
            connected_at: self.connected_at.clone(),
        }
    }
}

/// DashMap-based implementation of [`SessionRegistry`].
pub struct DashMapSessionRegistry {
    sessions: DashMap<String, SessionEntry>,
    holders: DashMap<String, String>,
}

impl DashMapSessionRegistry {
    /// Create a new, empty registry.
    pub fn new() -> Self {
        Self {
            sessions: DashMap::new(),
            holders: DashMap::new(),
        }
    }

    /// Swap the session's record, returning the previous one.
    fn replace_record(
        &self,
        session_id: &str,
        record: CredentialRecord,
    ) -> Result<CredentialRecord, GatewayError> {
        let mut entry = self
            .sessions
            .get_mut(session_id)
            .ok_or_else(|| GatewayError::UnknownSession(session_id.to_string()))?;
        Ok(std::mem::replace(&mut entry.record, record))
    }

    /// Drop `address` from the index if `session_id` still holds it.
    fn release(&self, address: &str, session_id: &str) {
        if self
            .holders
            .remove_if(address, |_, holder| holder == session_id)
            .is_some()
        {
            debug!(sid = session_id, "Released target {}", address);
        }
    }
}

impl Default for DashMapSessionRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl SessionRegistry for DashMapSessionRegistry {
    fn create(&self, session_id: &str) -> Result<(), GatewayError> {
        match self.sessions.entry(session_id.to_string()) {
            Entry::Occupied(_) => Err(GatewayError::DuplicateSession(session_id.to_string())),
            Entry::Vacant(vacant) => {
                vacant.insert(SessionEntry {
                    record: CredentialRecord::empty(),
                    connected_at: chrono::Utc::now().to_rfc3339(),
                });
                Ok(())
            }
        }
    }

    fn lookup(&self, session_id: &str) -> Result<CredentialRecord, GatewayError> {
        self.sessions
            .get(session_id)
            .map(|entry| entry.record.clone())
            .ok_or_else(|| GatewayError::UnknownSession(session_id.to_string()))
    }

    fn claim(
        &self,
        session_id: &str,
        credentials: Credentials,
    ) -> Result<ClaimOutcome, GatewayError> {
        if !self.sessions.contains_key(session_id) {
            return Err(GatewayError::UnknownSession(session_id.to_string()));
        }

        let address = credentials.address.clone();
        let outcome = match self.holders.entry(address.clone()) {
            Entry::Occupied(held) if held.get() == session_id => ClaimOutcome::AlreadyHeld,
            Entry::Occupied(held) => ClaimOutcome::Conflict {
                holder: held.get().clone(),
            },
            Entry::Vacant(vacant) => {
                vacant.insert(session_id.to_string());
                ClaimOutcome::Claimed
            }
        };

        match &outcome {
            ClaimOutcome::AlreadyHeld => {}
            ClaimOutcome::Conflict { holder } => {
                warn!(
                    sid = session_id,
                    "Target {} already held by session {}, resetting record", address, holder
                );
                let previous = self.replace_record(session_id, CredentialRecord::empty())?;
                if let Some(old) = previous.address() {
                    self.release(old, session_id);
                }
            }
            ClaimOutcome::Claimed => {
                // The session may have been evicted since the check above.
                let previous =
                    match self.replace_record(session_id, CredentialRecord::populated(credentials)) {
                        Ok(previous) => previous,
                        Err(e) => {
                            self.release(&address, session_id);
                            return Err(e);
                        }
                    };
                if let Some(old) = previous.address()
                    && old != address
                {
                    self.release(old, session_id);
                }
            }
        }

        Ok(outcome)
    }

    fn evict(&self, session_id: &str) -> Option<SessionSnapshot> {
        let (_, entry) = self.sessions.remove(session_id)?;
        if let Some(address) = entry.record.address() {
            self.release(address, session_id);
        }
        Some(entry.snapshot(session_id))
    }

    fn holder_of(&self, address: &str) -> Option<String> {
        self.holders.get(address).map(|h| h.value().clone())
    }

    fn list(&self) -> Vec<SessionSnapshot> {
        self.sessions
            .iter()
            .map(|entry| entry.value().snapshot(entry.key()))
            .collect()
    }

    fn len(&self) -> usize {
        self.sessions.len()
    }
}

//! Pending operations and dead letters.

use crate::classifier::ErrorClass;
use serde::{Deserialize, Serialize};
use std::time::{SystemTime, UNIX_EPOCH};

/// Milliseconds since the Unix epoch.
pub fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or_default()
}

/// Kind of mutation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum OperationType {
    /// Entity was created.
    Create,
    /// Entity was updated.
    Update,
    /// Entity was deleted.
    Delete,
}

impl OperationType {
    /// Lower-case name, as used in logs and the CLI.
    pub fn as_str(&self) -> &'static str {
        match self {
            OperationType::Create => "create",
            OperationType::Update => "update",
            OperationType::Delete => "delete",
        }
    }
}

impl std::fmt::Display for OperationType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A mutation waiting to be delivered to the remote store.
///
/// # Invariants
///
/// - `id` is unique and never changes
/// - `attempt_count` starts at 0 and only grows after a failed delivery
/// - The record leaves the queue only after the remote store acknowledged
///   it, or after it was dead-lettered
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PendingOperation {
    /// Unique operation id (UUID v4).
    pub id: String,
    /// Kind of mutation.
    pub op_type: OperationType,
    /// Kind of entity (e.g. `"trade"`).
    pub entity_type: String,
    /// Entity identifier; delivery order is preserved per entity id.
    pub entity_id: String,
    /// Opaque payload handed to the remote store.
    pub payload: Vec<u8>,
    /// Owner of the entity.
    pub owner_id: String,
    /// Enqueue time, milliseconds since the Unix epoch.
    pub enqueued_at: u64,
    /// Number of failed delivery attempts.
    pub attempt_count: u32,
    /// Earliest time an automatic pass may retry, if backing off.
    #[serde(default)]
    pub next_attempt_at: Option<u64>,
    /// Message of the most recent failure.
    #[serde(default)]
    pub last_error: Option<String>,
}

impl PendingOperation {
    /// Returns true if an automatic pass at `now` must skip this operation.
    pub fn is_backing_off(&self, now: u64) -> bool {
        self.next_attempt_at.is_some_and(|at| at > now)
    }
}

/// What a caller hands to the queue; id and timestamps are assigned on
/// enqueue.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingOperationInput {
    /// Kind of mutation.
    pub op_type: OperationType,
    /// Kind of entity.
    pub entity_type: String,
    /// Entity identifier.
    pub entity_id: String,
    /// Opaque payload.
    pub payload: Vec<u8>,
    /// Owner of the entity; empty means the engine's default owner.
    pub owner_id: String,
}

impl PendingOperationInput {
    /// Creates an input.
    pub fn new(
        op_type: OperationType,
        entity_type: impl Into<String>,
        entity_id: impl Into<String>,
        payload: impl Into<Vec<u8>>,
    ) -> Self {
        Self {
            op_type,
            entity_type: entity_type.into(),
            entity_id: entity_id.into(),
            payload: payload.into(),
            owner_id: String::new(),
        }
    }

    /// Creates a `Create` input.
    pub fn create(
        entity_type: impl Into<String>,
        entity_id: impl Into<String>,
        payload: impl Into<Vec<u8>>,
    ) -> Self {
        Self::new(OperationType::Create, entity_type, entity_id, payload)
    }

    /// Creates an `Update` input.
    pub fn update(
        entity_type: impl Into<String>,
        entity_id: impl Into<String>,
        payload: impl Into<Vec<u8>>,
    ) -> Self {
        Self::new(OperationType::Update, entity_type, entity_id, payload)
    }

    /// Creates a `Delete` input with an empty payload.
    pub fn delete(entity_type: impl Into<String>, entity_id: impl Into<String>) -> Self {
        Self::new(OperationType::Delete, entity_type, entity_id, Vec::new())
    }

    /// Sets the owner.
    pub fn with_owner(mut self, owner_id: impl Into<String>) -> Self {
        self.owner_id = owner_id.into();
        self
    }
}

/// An operation that will never be delivered, kept for reporting.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeadLetter {
    /// The operation as it was when it was given up.
    pub operation: PendingOperation,
    /// Why it was given up.
    pub reason: String,
    /// Class of the final failure.
    pub class: ErrorClass,
    /// When it was given up, milliseconds since the Unix epoch.
    pub dead_lettered_at: u64,
}

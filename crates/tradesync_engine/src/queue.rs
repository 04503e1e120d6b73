//! Durable FIFO queue of pending operations.
//!
//! The queue keeps its records in memory and mirrors every mutation to a
//! [`KeyValueStore`] as one CBOR document:
//!
//! ```text
//! <namespace>.queue         { version: 1, operations: [PendingOperation, ...] }
//! <namespace>.dead_letters  { version: 1, dead_letters: [DeadLetter, ...] }
//! ```
//!
//! A mutation is applied in memory, written, and rolled back if the write
//! fails, so memory and storage never disagree about what is pending.

use crate::classifier::ErrorClass;
use crate::error::{SyncError, SyncResult};
use crate::operation::{now_millis, DeadLetter, PendingOperation, PendingOperationInput};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tradesync_storage::{KeyValueStore, StorageError};
use uuid::Uuid;

/// Version of the persisted documents.
pub const FORMAT_VERSION: u32 = 1;

#[derive(Serialize)]
struct QueueDocumentRef<'a> {
    version: u32,
    operations: &'a [PendingOperation],
}

#[derive(Deserialize)]
struct QueueDocument {
    version: u32,
    operations: Vec<PendingOperation>,
}

#[derive(Serialize)]
struct DeadLetterDocumentRef<'a> {
    version: u32,
    dead_letters: &'a [DeadLetter],
}

#[derive(Deserialize)]
struct DeadLetterDocument {
    version: u32,
    dead_letters: Vec<DeadLetter>,
}

/// Ordered store of pending mutations.
///
/// Operations are kept in enqueue order and never reordered. The queue is
/// the only writer of its storage keys.
pub struct OperationQueue<S: KeyValueStore> {
    store: S,
    queue_key: String,
    dead_letter_key: String,
    operations: Vec<PendingOperation>,
    dead_letters: Vec<DeadLetter>,
}

impl<S: KeyValueStore> OperationQueue<S> {
    /// Opens the queue stored under `namespace`, loading any persisted
    /// operations and dead letters.
    ///
    /// # Errors
    ///
    /// Returns an error if the store cannot be read or a document is
    /// corrupted or from an unknown format version.
    pub fn open(store: S, namespace: &str) -> SyncResult<Self> {
        let queue_key = format!("{namespace}.queue");
        let dead_letter_key = format!("{namespace}.dead_letters");

        let operations = match store.get(&queue_key)? {
            Some(bytes) => {
                let doc: QueueDocument = decode(&bytes)?;
                check_version(doc.version, &queue_key)?;
                doc.operations
            }
            None => Vec::new(),
        };

        let dead_letters = match store.get(&dead_letter_key)? {
            Some(bytes) => {
                let doc: DeadLetterDocument = decode(&bytes)?;
                check_version(doc.version, &dead_letter_key)?;
                doc.dead_letters
            }
            None => Vec::new(),
        };

        Ok(Self {
            store,
            queue_key,
            dead_letter_key,
            operations,
            dead_letters,
        })
    }

    /// Assigns an id and timestamp to `input`, persists it at the tail and
    /// returns the stored record.
    ///
    /// # Errors
    ///
    /// Returns [`SyncError::Capacity`] if the store is full, or another
    /// error if the write fails. In both cases nothing was queued.
    pub fn enqueue(&mut self, input: PendingOperationInput) -> SyncResult<PendingOperation> {
        let op = PendingOperation {
            id: Uuid::new_v4().to_string(),
            op_type: input.op_type,
            entity_type: input.entity_type,
            entity_id: input.entity_id,
            payload: input.payload,
            owner_id: input.owner_id,
            enqueued_at: now_millis(),
            attempt_count: 0,
            next_attempt_at: None,
            last_error: None,
        };

        self.operations.push(op.clone());
        if let Err(e) = self.persist_operations() {
            self.operations.pop();
            return Err(e);
        }
        Ok(op)
    }

    /// Returns all pending operations in enqueue order.
    pub fn peek_batch(&self) -> Vec<PendingOperation> {
        self.operations.clone()
    }

    /// Returns the pending operation with this id.
    pub fn get(&self, id: &str) -> Option<&PendingOperation> {
        self.operations.iter().find(|op| op.id == id)
    }

    /// Removes an acknowledged operation.
    ///
    /// # Errors
    ///
    /// Returns [`SyncError::UnknownOperation`] if no operation has this id,
    /// or a storage error if the write fails (the operation stays queued).
    pub fn remove(&mut self, id: &str) -> SyncResult<PendingOperation> {
        let index = self.index_of(id)?;
        let op = self.operations.remove(index);
        if let Err(e) = self.persist_operations() {
            self.operations.insert(index, op);
            return Err(e);
        }
        Ok(op)
    }

    /// Records a failed delivery attempt: increments `attempt_count`,
    /// remembers `reason`, and backs the operation off for `retry_delay`.
    ///
    /// Returns the new attempt count.
    ///
    /// # Errors
    ///
    /// Returns [`SyncError::UnknownOperation`] or a storage error; on error
    /// the operation is unchanged.
    pub fn mark_attempt_failed(
        &mut self,
        id: &str,
        reason: &str,
        retry_delay: Duration,
    ) -> SyncResult<u32> {
        let index = self.index_of(id)?;
        let previous = self.operations[index].clone();

        let op = &mut self.operations[index];
        op.attempt_count = op.attempt_count.saturating_add(1);
        op.last_error = Some(reason.to_string());
        let delay_ms = u64::try_from(retry_delay.as_millis()).unwrap_or(u64::MAX);
        op.next_attempt_at = Some(now_millis().saturating_add(delay_ms));
        let attempt_count = op.attempt_count;

        if let Err(e) = self.persist_operations() {
            self.operations[index] = previous;
            return Err(e);
        }
        Ok(attempt_count)
    }

    /// Moves an operation out of the queue into the dead-letter ledger.
    ///
    /// # Errors
    ///
    /// Returns [`SyncError::UnknownOperation`] or a storage error; on error
    /// the operation stays queued.
    pub fn dead_letter(
        &mut self,
        id: &str,
        reason: &str,
        class: ErrorClass,
    ) -> SyncResult<DeadLetter> {
        let index = self.index_of(id)?;
        let letter = DeadLetter {
            operation: self.operations[index].clone(),
            reason: reason.to_string(),
            class,
            dead_lettered_at: now_millis(),
        };

        // Ledger first: a crash in between leaves a duplicate report, never
        // a lost operation.
        self.dead_letters.push(letter.clone());
        if let Err(e) = self.persist_dead_letters() {
            self.dead_letters.pop();
            return Err(e);
        }

        let op = self.operations.remove(index);
        if let Err(e) = self.persist_operations() {
            self.operations.insert(index, op);
            self.dead_letters.pop();
            // Best effort: the ledger entry is a duplicate once the
            // operation is retried and dead-lettered again.
            let _ = self.persist_dead_letters();
            return Err(e);
        }

        Ok(letter)
    }

    /// Number of pending operations.
    pub fn len(&self) -> usize {
        self.operations.len()
    }

    /// Returns true if nothing is pending.
    pub fn is_empty(&self) -> bool {
        self.operations.is_empty()
    }

    /// Removes every pending operation.
    ///
    /// # Errors
    ///
    /// Returns a storage error if the document cannot be deleted; the
    /// queue is unchanged in that case.
    pub fn clear(&mut self) -> SyncResult<()> {
        self.store.delete(&self.queue_key)?;
        self.operations.clear();
        Ok(())
    }

    /// Dead letters recorded so far, oldest first.
    pub fn dead_letters(&self) -> &[DeadLetter] {
        &self.dead_letters
    }

    /// Forgets all dead letters.
    ///
    /// # Errors
    ///
    /// Returns a storage error if the document cannot be deleted.
    pub fn clear_dead_letters(&mut self) -> SyncResult<()> {
        self.store.delete(&self.dead_letter_key)?;
        self.dead_letters.clear();
        Ok(())
    }

    /// The underlying store.
    pub fn store(&self) -> &S {
        &self.store
    }

    fn index_of(&self, id: &str) -> SyncResult<usize> {
        self.operations
            .iter()
            .position(|op| op.id == id)
            .ok_or_else(|| SyncError::UnknownOperation(id.to_string()))
    }

    fn persist_operations(&self) -> SyncResult<()> {
        let bytes = encode(&QueueDocumentRef {
            version: FORMAT_VERSION,
            operations: &self.operations,
        })?;
        self.store.set(&self.queue_key, &bytes)?;
        Ok(())
    }

    fn persist_dead_letters(&self) -> SyncResult<()> {
        let bytes = encode(&DeadLetterDocumentRef {
            version: FORMAT_VERSION,
            dead_letters: &self.dead_letters,
        })?;
        self.store.set(&self.dead_letter_key, &bytes)?;
        Ok(())
    }
}

fn encode<T: Serialize>(value: &T) -> SyncResult<Vec<u8>> {
    let mut bytes = Vec::new();
    ciborium::into_writer(value, &mut bytes).map_err(|e| SyncError::Codec(e.to_string()))?;
    Ok(bytes)
}

fn decode<T: for<'de> Deserialize<'de>>(bytes: &[u8]) -> SyncResult<T> {
    ciborium::from_reader(bytes)
        .map_err(|e| SyncError::Storage(StorageError::Corrupted(e.to_string())))
}

fn check_version(version: u32, key: &str) -> SyncResult<()> {
    if version == FORMAT_VERSION {
        Ok(())
    } else {
        Err(SyncError::Storage(StorageError::Corrupted(format!(
            "{key}: unsupported format version {version}"
        ))))
    }
}

//! Inspect command implementation.

use super::{age, open_queue};
use serde::Serialize;
use std::path::Path;
use tradesync_engine::PendingOperation;
use tradesync_storage::KeyValueStore;

/// Queue inspection result.
#[derive(Debug, Serialize)]
pub struct InspectResult {
    /// Data directory.
    pub path: String,
    /// Storage namespace.
    pub namespace: String,
    /// Number of pending operations.
    pub queue_length: usize,
    /// Number of dead letters.
    pub dead_letter_count: usize,
    /// Bytes used by all stored values.
    pub used_bytes: u64,
    /// Every key in the store.
    pub keys: Vec<String>,
    /// Pending operations in queue order.
    pub operations: Vec<OperationSummary>,
}

/// One pending operation, without its payload.
#[derive(Debug, Serialize)]
pub struct OperationSummary {
    /// Operation id.
    pub id: String,
    /// Kind of mutation.
    pub op_type: String,
    /// Kind of entity.
    pub entity_type: String,
    /// Entity identifier.
    pub entity_id: String,
    /// Owner.
    pub owner_id: String,
    /// Enqueue time, Unix milliseconds.
    pub enqueued_at: u64,
    /// Failed delivery attempts.
    pub attempt_count: u32,
    /// Earliest automatic retry, Unix milliseconds.
    pub next_attempt_at: Option<u64>,
    /// Most recent failure.
    pub last_error: Option<String>,
    /// Payload size in bytes.
    pub payload_size: usize,
}

impl From<&PendingOperation> for OperationSummary {
    fn from(op: &PendingOperation) -> Self {
        Self {
            id: op.id.clone(),
            op_type: op.op_type.to_string(),
            entity_type: op.entity_type.clone(),
            entity_id: op.entity_id.clone(),
            owner_id: op.owner_id.clone(),
            enqueued_at: op.enqueued_at,
            attempt_count: op.attempt_count,
            next_attempt_at: op.next_attempt_at,
            last_error: op.last_error.clone(),
            payload_size: op.payload.len(),
        }
    }
}

/// Collects the inspection result.
pub fn inspect(path: &Path, namespace: &str) -> Result<InspectResult, Box<dyn std::error::Error>> {
    let queue = open_queue(path, namespace)?;
    let mut keys = queue.store().keys()?;
    keys.sort();

    Ok(InspectResult {
        path: path.display().to_string(),
        namespace: namespace.to_string(),
        queue_length: queue.len(),
        dead_letter_count: queue.dead_letters().len(),
        used_bytes: queue.store().used_bytes(),
        keys,
        operations: queue.peek_batch().iter().map(OperationSummary::from).collect(),
    })
}

/// Runs the inspect command.
pub fn run(path: &Path, namespace: &str, format: &str) -> Result<(), Box<dyn std::error::Error>> {
    let result = inspect(path, namespace)?;

    match format {
        "json" => {
            println!("{}", serde_json::to_string_pretty(&result)?);
        }
        _ => {
            print_text_output(&result);
        }
    }

    Ok(())
}

fn print_text_output(result: &InspectResult) {
    println!("TradeSync Offline Data");
    println!("======================");
    println!("Path:         {}", result.path);
    println!("Namespace:    {}", result.namespace);
    println!("Used:         {} bytes", result.used_bytes);
    println!("Keys:         {}", result.keys.join(", "));
    println!();
    println!("Pending:      {}", result.queue_length);
    println!("Dead letters: {}", result.dead_letter_count);

    if result.operations.is_empty() {
        return;
    }

    println!();
    println!(
        "{:<36}  {:<6}  {:<24}  {:>8}  {:>10}  ERROR",
        "ID", "TYPE", "ENTITY", "ATTEMPTS", "QUEUED"
    );
    for op in &result.operations {
        println!(
            "{:<36}  {:<6}  {:<24}  {:>8}  {:>10}  {}",
            op.id,
            op.op_type,
            format!("{}/{}", op.entity_type, op.entity_id),
            op.attempt_count,
            age(op.enqueued_at),
            op.last_error.as_deref().unwrap_or("-"),
        );
    }
}

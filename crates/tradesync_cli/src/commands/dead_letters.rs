//! Dead-letters command implementation.

use super::{age, open_queue};
use std::path::Path;
use tradesync_engine::DeadLetter;

/// Loads the dead-letter ledger.
pub fn list(path: &Path, namespace: &str) -> Result<Vec<DeadLetter>, Box<dyn std::error::Error>> {
    let queue = open_queue(path, namespace)?;
    Ok(queue.dead_letters().to_vec())
}

/// Runs the dead-letters command.
pub fn run(path: &Path, namespace: &str, format: &str) -> Result<(), Box<dyn std::error::Error>> {
    let letters = list(path, namespace)?;

    match format {
        "json" => {
            println!("{}", serde_json::to_string_pretty(&letters)?);
        }
        _ => {
            if letters.is_empty() {
                println!("No dead letters.");
                return Ok(());
            }
            for letter in &letters {
                let op = &letter.operation;
                println!(
                    "{} {} {}/{} ({:?}, {} attempt(s), {})",
                    op.id,
                    op.op_type,
                    op.entity_type,
                    op.entity_id,
                    letter.class,
                    op.attempt_count + 1,
                    age(letter.dead_lettered_at),
                );
                println!("    {}", letter.reason);
            }
        }
    }

    Ok(())
}

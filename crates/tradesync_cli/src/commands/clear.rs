//! Clear command implementation.

use super::open_queue;
use std::path::Path;
use tracing::info;

/// Discards pending operations, and dead letters if asked. Returns the
/// number of operations and dead letters removed.
pub fn clear(
    path: &Path,
    namespace: &str,
    dead_letters: bool,
) -> Result<(usize, usize), Box<dyn std::error::Error>> {
    let mut queue = open_queue(path, namespace)?;

    let operations = queue.len();
    queue.clear()?;

    let letters = if dead_letters {
        let count = queue.dead_letters().len();
        queue.clear_dead_letters()?;
        count
    } else {
        0
    };

    info!(namespace, operations, dead_letters = letters, "offline data cleared");
    Ok((operations, letters))
}

/// Runs the clear command.
pub fn run(path: &Path, namespace: &str, dead_letters: bool) -> Result<(), Box<dyn std::error::Error>> {
    let (operations, letters) = clear(path, namespace, dead_letters)?;
    println!("Discarded {operations} pending operation(s)");
    if dead_letters {
        println!("Discarded {letters} dead letter(s)");
    }
    Ok(())
}

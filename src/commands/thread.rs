use std::path::Path;

use anyhow::Result;
use colored::*;

pub fn run(
    root: &Path,
    thread_id: &str,
    context: bool,
    max: Option<usize>,
    json: bool,
) -> Result<()> {
    let vault = super::open_vault(root)?;

    if context {
        let text = vault.thread_context(thread_id, max)?;
        if json {
            return super::print_json(&serde_json::json!({
                "thread_id": thread_id,
                "context": text,
            }));
        }
        println!("{}", text);
        return Ok(());
    }

    let messages = vault.store().get_thread_messages(thread_id)?;
    if json {
        return super::print_json(&messages);
    }

    println!("{} {}", "Thread".bold(), thread_id.cyan());
    println!("{}", "=".repeat(60));
    if messages.is_empty() {
        println!("{}", "No messages in this thread.".yellow());
    }
    for msg in &messages {
        super::print_message_line(msg);
    }
    Ok(())
}

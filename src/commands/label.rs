use std::path::Path;

use anyhow::Result;
use colored::*;

pub fn run(root: &Path, name: &str, limit: usize, offset: usize, json: bool) -> Result<()> {
    let vault = super::open_vault(root)?;
    let messages = vault.store().get_by_label(name, limit, offset)?;

    if json {
        return super::print_json(&messages);
    }

    println!("{} {}", "Label".bold(), name.cyan());
    println!("{}", "=".repeat(60));
    if messages.is_empty() {
        println!("{}", "No messages.".yellow());
    }
    for msg in &messages {
        super::print_message_line(msg);
    }
    if messages.len() == limit {
        println!();
        println!(
            "{}",
            format!("More may follow: --offset {}", offset + limit).dimmed()
        );
    }
    Ok(())
}

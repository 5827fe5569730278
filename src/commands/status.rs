use std::path::Path;

use anyhow::Result;
use colored::*;

pub fn run(root: &Path, json: bool) -> Result<()> {
    let vault = super::open_vault(root)?;
    let status = vault.status()?;

    if json {
        return super::print_json(&status);
    }

    let store = &status.store;
    let index = &status.index;

    println!("{}", "mailvault Status".bold());
    println!("{}", "=".repeat(50));
    println!();
    println!("{}", "Store".cyan());
    println!("  Messages:    {}", store.messages);
    println!("  Threads:     {}", store.threads);
    println!("  Users:       {}", store.users);
    println!("  Attachments: {}", store.attachments);
    println!("  Labels:      {}", store.labels);
    if let Some(latest) = store.latest_message {
        println!("  Latest:      {}", latest.format("%Y-%m-%d %H:%M"));
    }
    println!();
    println!("{}", "Vector index".cyan());
    println!("  Dimension:   {}", index.dimension);
    println!("  Live:        {}", index.live);
    println!("  Tombstoned:  {}", index.tombstoned);
    println!("  Raw size:    {}", index.size);

    let unindexed = store.messages.saturating_sub(index.live + index.tombstoned);
    if unindexed > 0 {
        let warning = format!("⚠ {} messages have no vector", unindexed);
        println!();
        println!("{}", warning.yellow());
        println!("  {}", "No body, or indexing failed.".dimmed());
    }
    Ok(())
}

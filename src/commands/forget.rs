use std::path::Path;

use anyhow::Result;
use colored::*;
use mailvault::MessageId;

pub fn run(root: &Path, id: MessageId) -> Result<()> {
    let mut vault = super::open_vault(root)?;

    match vault.forget(id)? {
        Some(slots) => {
            println!("{} Message {} marked deleted", "✓".green(), id);
            println!("  {} {} vectors tombstoned", "→".dimmed(), slots);
            Ok(())
        }
        None => {
            eprintln!("{} Message {} not found", "✗".red(), id);
            std::process::exit(1);
        }
    }
}

use std::path::Path;

use anyhow::Result;
use colored::*;
use mailvault::{IngestStatus, MessageId};

/// Requested changes; `None` leaves a flag alone
#[derive(Debug, Default)]
pub struct Changes {
    pub read: Option<bool>,
    pub archived: Option<bool>,
    pub deleted: Option<bool>,
    pub add_labels: Vec<String>,
    pub remove_labels: Vec<String>,
}

impl Changes {
    fn is_empty(&self) -> bool {
        self.read.is_none()
            && self.archived.is_none()
            && self.deleted.is_none()
            && self.add_labels.is_empty()
            && self.remove_labels.is_empty()
    }
}

pub fn run(root: &Path, id: MessageId, changes: &Changes) -> Result<()> {
    if changes.is_empty() {
        println!("{}", "Nothing to change.".yellow());
        return Ok(());
    }

    let mut vault = super::open_vault(root)?;

    if !vault.store().message_exists(id)? {
        eprintln!("{} Message {} not found", "✗".red(), id);
        std::process::exit(1);
    }

    // Restore re-embeds, so it runs before the shared `store` borrow
    if changes.deleted == Some(false) {
        match vault.restore(id)? {
            Some(IngestStatus::Indexed { slot }) => {
                println!("{} restored, re-indexed at slot {}", "✓".green(), slot);
            }
            Some(IngestStatus::StoredOnly { reason }) => {
                println!("{} restored, not re-indexed: {}", "!".yellow(), reason);
            }
            _ => println!("{} restored", "✓".green()),
        }
    }

    let store = vault.store();

    if let Some(read) = changes.read {
        store.set_read(id, read)?;
        println!("{} {}", "✓".green(), if read { "read" } else { "unread" });
    }
    if let Some(archived) = changes.archived {
        store.set_archived(id, archived)?;
        let state = if archived { "archived" } else { "unarchived" };
        println!("{} {}", "✓".green(), state);
    }
    if changes.deleted == Some(true) {
        store.set_deleted(id, true)?;
        println!("{} deleted", "✓".green());
    }
    for label in &changes.add_labels {
        store.add_label(id, label)?;
        println!("{} +{}", "✓".green(), label);
    }
    for label in &changes.remove_labels {
        if store.remove_label(id, label)? {
            println!("{} -{}", "✓".green(), label);
        } else {
            println!("{} {} was not set", "→".dimmed(), label);
        }
    }

    Ok(())
}

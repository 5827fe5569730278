use std::path::Path;

use anyhow::{bail, Result};
use colored::*;
use mailvault::core::schema::RecipientKind;
use mailvault::{MessageId, MessageRecord};

pub fn run(
    root: &Path,
    id: Option<MessageId>,
    provider_id: Option<&str>,
    json: bool,
) -> Result<()> {
    let vault = super::open_vault(root)?;

    let message = match (id, provider_id) {
        (Some(id), _) => vault.store().get_by_id(id)?,
        (None, Some(pid)) => vault.store().get_by_provider_id(pid)?,
        (None, None) => bail!("Give a message id or --provider-id"),
    };

    let Some(message) = message else {
        if json {
            println!("null");
        } else {
            println!("{}", "Message not found.".yellow());
        }
        std::process::exit(1);
    };

    if json {
        return super::print_json(&message);
    }

    print_message(&message);
    Ok(())
}

fn print_message(msg: &MessageRecord) {
    println!("{}", msg.subject.bold());
    println!("{}", "=".repeat(60));
    println!("{:<9} {}", "Id:".dimmed(), msg.id);
    println!("{:<9} {}", "Provider:".dimmed(), msg.provider_message_id);
    println!("{:<9} {}", "Thread:".dimmed(), msg.provider_thread_id);
    println!("{:<9} {}", "From:".dimmed(), msg.sender_display());
    for kind in RecipientKind::ALL {
        let recipients = msg.recipients_of(kind);
        if !recipients.is_empty() {
            let list: Vec<String> = recipients.iter().map(|c| c.display()).collect();
            let header = format!("{}:", kind.header_name());
            println!("{:<9} {}", header.dimmed(), list.join(", "));
        }
    }
    println!("{:<9} {}", "Date:".dimmed(), msg.timestamp.to_rfc2822());
    if !msg.labels.is_empty() {
        println!("{:<9} {}", "Labels:".dimmed(), msg.labels.join(", "));
    }

    let mut flags = Vec::new();
    if !msg.flags.is_read {
        flags.push("unread".yellow());
    }
    if msg.flags.is_archived {
        flags.push("archived".normal());
    }
    if msg.flags.is_deleted {
        flags.push("deleted".red());
    }
    if !flags.is_empty() {
        let flags: Vec<String> = flags.iter().map(|f| f.to_string()).collect();
        println!("{:<9} {}", "Flags:".dimmed(), flags.join(" "));
    }

    for att in &msg.attachments {
        println!(
            "{} {} ({}, {} bytes)",
            "📎".dimmed(),
            att.filename,
            att.content_type,
            att.size
        );
    }

    println!();
    println!("{}", msg.preferred_body());
}

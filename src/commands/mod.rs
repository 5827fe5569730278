//! CLI command implementations

pub mod forget;
pub mod ingest;
pub mod init;
pub mod label;
pub mod mark;
pub mod search;
pub mod show;
pub mod status;
pub mod thread;

use std::path::Path;

use anyhow::{Context, Result};
use colored::*;
use mailvault::{MailVault, MessageRecord};
use serde::Serialize;
use unicode_width::{UnicodeWidthChar, UnicodeWidthStr};

const SENDER_WIDTH: usize = 28;
const SUBJECT_WIDTH: usize = 60;

pub(crate) fn open_vault(root: &Path) -> Result<MailVault> {
    MailVault::open(root).with_context(|| format!("Failed to open vault at {}", root.display()))
}

pub(crate) fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

/// `  12  2024-01-01 09:00  Ann <a@x.com>   Subject`
pub(crate) fn print_message_line(msg: &MessageRecord) {
    let sender = msg.sender_display();
    let sender = if sender.is_empty() {
        "(unknown)".to_string()
    } else {
        sender
    };
    let subject = truncate(&msg.subject, SUBJECT_WIDTH);
    let subject = if msg.flags.is_read {
        subject.normal()
    } else {
        subject.bold()
    };

    println!(
        "{:>5}  {}  {}  {}",
        msg.id.to_string().cyan(),
        msg.timestamp.format("%Y-%m-%d %H:%M").to_string().dimmed(),
        pad(&truncate(&sender, SENDER_WIDTH), SENDER_WIDTH),
        subject
    );
}

/// Cut to `max_width` terminal columns, marking the cut with "…"
pub(crate) fn truncate(s: &str, max_width: usize) -> String {
    if s.width() <= max_width {
        return s.to_string();
    }

    let mut out = String::new();
    let mut width = 0;
    for c in s.chars() {
        let w = c.width().unwrap_or(0);
        if width + w + 1 > max_width {
            break;
        }
        out.push(c);
        width += w;
    }
    out.push('…');
    out
}

/// Right-pad to `width` terminal columns
pub(crate) fn pad(s: &str, width: usize) -> String {
    format!("{}{}", s, " ".repeat(width.saturating_sub(s.width())))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_truncate_counts_columns() {
        assert_eq!(truncate("short", 10), "short");
        assert_eq!(truncate("abcdefghij", 5), "abcd…");
        // Wide characters take two columns each
        assert_eq!(truncate("한국어메일", 6), "한국…");
    }

    #[test]
    fn test_pad_wide() {
        assert_eq!(pad("ab", 4), "ab  ");
        assert_eq!(pad("한", 4), "한  ");
        assert_eq!(pad("toolong", 3), "toolong");
    }
}

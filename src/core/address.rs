//! Email address parsing
//!
//! `"Display Name <addr@host>"` splits into (name, address), a bare address
//! yields an empty name, anything else yields an empty pair.

use lazy_static::lazy_static;
use regex::Regex;

lazy_static! {
    // Name <addr>
    static ref ANGLE_ADDR_RE: Regex = Regex::new(r"^\s*([^<]*)<([^>]*)>").unwrap();
}

/// A parsed mailbox. Both fields empty means "no address".
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Mailbox {
    pub name: String,
    pub email: String,
}

impl Mailbox {
    pub fn is_empty(&self) -> bool {
        self.email.is_empty()
    }
}

pub fn format_mailbox(name: &str, email: &str) -> String {
    if name.is_empty() {
        email.to_string()
    } else {
        format!("{} <{}>", name, email)
    }
}

pub fn parse_address(raw: &str) -> Mailbox {
    let raw = raw.trim();
    if raw.is_empty() {
        return Mailbox::default();
    }

    let (name, email) = match ANGLE_ADDR_RE.captures(raw) {
        Some(caps) => (
            caps[1].trim().trim_matches('"').trim().to_string(),
            caps[2].trim().to_string(),
        ),
        None => (String::new(), raw.to_string()),
    };

    if !is_plausible_address(&email) {
        return Mailbox::default();
    }

    Mailbox { name, email }
}

fn is_plausible_address(email: &str) -> bool {
    match email.split_once('@') {
        Some((local, host)) => {
            !local.is_empty() && !host.is_empty() && !email.contains(char::is_whitespace)
        }
        None => false,
    }
}

/// Split a header value like `"Doe, Jane" <j@x.com>, b@y.com` into mailboxes.
///
/// Commas inside quotes or angle brackets do not separate entries. Malformed
/// entries are dropped.
pub fn parse_address_list(raw: &str) -> Vec<Mailbox> {
    let mut entries = Vec::new();
    let mut current = String::new();
    let mut in_quotes = false;
    let mut in_angle = false;

    for c in raw.chars() {
        match c {
            '"' => in_quotes = !in_quotes,
            '<' if !in_quotes => in_angle = true,
            '>' if !in_quotes => in_angle = false,
            ',' if !in_quotes && !in_angle => {
                entries.push(std::mem::take(&mut current));
                continue;
            }
            _ => {}
        }
        current.push(c);
    }
    entries.push(current);

    entries
        .iter()
        .map(|entry| parse_address(entry))
        .filter(|mailbox| !mailbox.is_empty())
        .collect()
}

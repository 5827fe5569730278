use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::Serialize;

use super::address::format_mailbox;
use super::schema::{MessageFlags, RecipientKind};

/// Store-assigned surrogate key of a message row
pub type MessageId = i64;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Contact {
    pub email: String,
    pub name: Option<String>,
}

impl Contact {
    pub fn display(&self) -> String {
        format_mailbox(self.name.as_deref().unwrap_or(""), &self.email)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AttachmentRecord {
    pub id: i64,
    pub filename: String,
    pub content_type: String,
    pub size: i64,
    pub provider_attachment_id: String,
}

/// A fully hydrated message: row, sender, thread, recipients, attachments, labels
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MessageRecord {
    pub id: MessageId,
    pub provider_message_id: String,
    pub provider_thread_id: String,
    pub sender: Option<Contact>,
    pub subject: String,
    pub body_text: String,
    pub body_html: String,
    pub snippet: String,
    pub timestamp: DateTime<Utc>,
    pub in_reply_to: Option<String>,
    /// RFC 5322 `Message-ID` header, what `in_reply_to` of a reply points at
    pub message_id_header: Option<String>,
    #[serde(flatten)]
    pub flags: MessageFlags,
    pub recipients: BTreeMap<RecipientKind, Vec<Contact>>,
    pub attachments: Vec<AttachmentRecord>,
    pub labels: Vec<String>,
}

impl MessageRecord {
    pub fn has_body(&self) -> bool {
        !self.body_text.is_empty() || !self.body_html.is_empty()
    }

    /// Plain text when present, HTML otherwise
    pub fn preferred_body(&self) -> &str {
        if self.body_text.is_empty() {
            &self.body_html
        } else {
            &self.body_text
        }
    }

    pub fn sender_email(&self) -> &str {
        self.sender.as_ref().map(|s| s.email.as_str()).unwrap_or("")
    }

    pub fn sender_display(&self) -> String {
        match &self.sender {
            Some(sender) => sender.display(),
            None => String::new(),
        }
    }

    pub fn recipients_of(&self, kind: RecipientKind) -> &[Contact] {
        self.recipients.get(&kind).map(Vec::as_slice).unwrap_or(&[])
    }
}

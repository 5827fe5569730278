use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Provider system labels that drive the message flags
pub const LABEL_UNREAD: &str = "UNREAD";
pub const LABEL_INBOX: &str = "INBOX";
pub const LABEL_TRASH: &str = "TRASH";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RecipientKind {
    To,
    Cc,
    Bcc,
}

impl RecipientKind {
    pub const ALL: [RecipientKind; 3] = [RecipientKind::To, RecipientKind::Cc, RecipientKind::Bcc];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::To => "to",
            Self::Cc => "cc",
            Self::Bcc => "bcc",
        }
    }

    /// Header that carries this kind of recipient
    pub fn header_name(&self) -> &'static str {
        match self {
            Self::To => "To",
            Self::Cc => "Cc",
            Self::Bcc => "Bcc",
        }
    }
}

impl fmt::Display for RecipientKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RecipientKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "to" => Ok(Self::To),
            "cc" => Ok(Self::Cc),
            "bcc" => Ok(Self::Bcc),
            other => Err(format!("Invalid recipient kind '{}' (to|cc|bcc)", other)),
        }
    }
}

/// Message state flags
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MessageFlags {
    pub is_read: bool,
    pub is_archived: bool,
    pub is_deleted: bool,
}

impl MessageFlags {
    /// Initial flags for a freshly ingested message
    pub fn from_labels(labels: &[String]) -> Self {
        let has = |name: &str| labels.iter().any(|l| l == name);
        Self {
            is_read: !has(LABEL_UNREAD),
            is_archived: !has(LABEL_INBOX),
            is_deleted: has(LABEL_TRASH),
        }
    }
}

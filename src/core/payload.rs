//! Provider message payloads
//!
//! The provider hands us a JSON tree: headers plus a body that is either inline
//! (`payload.body.data`) or spread over nested `parts`. The wire shape is
//! deserialized as-is, then turned into a [`BodyNode`] tree for traversal.

use base64::alphabet;
use base64::engine::{DecodePaddingMode, GeneralPurpose, GeneralPurposeConfig};
use base64::Engine;
use lazy_static::lazy_static;
use serde::{Deserialize, Serialize};
use tracing::warn;

use super::degraded::{Degraded, OrFallback};

lazy_static! {
    // base64url, padding optional
    static ref BASE64_URL: GeneralPurpose = GeneralPurpose::new(
        &alphabet::URL_SAFE,
        GeneralPurposeConfig::new().with_decode_padding_mode(DecodePaddingMode::Indifferent),
    );
}

const DEFAULT_ATTACHMENT_TYPE: &str = "application/octet-stream";

/// A message as fetched from the mail provider
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProviderMessage {
    pub id: String,
    #[serde(default)]
    pub thread_id: String,
    #[serde(default)]
    pub snippet: String,
    #[serde(default)]
    pub label_ids: Vec<String>,
    #[serde(default)]
    pub payload: PayloadPart,
}

/// One node of the provider's MIME tree
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PayloadPart {
    #[serde(default)]
    pub mime_type: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub filename: Option<String>,
    #[serde(default)]
    pub headers: Vec<Header>,
    #[serde(default)]
    pub body: PartBody,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parts: Option<Vec<PayloadPart>>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PartBody {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<String>,
    #[serde(default)]
    pub size: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub attachment_id: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Header {
    pub name: String,
    pub value: String,
}

/// Typed view of a payload part
#[derive(Debug, Clone, PartialEq)]
pub enum BodyNode {
    Leaf {
        mime_type: String,
        filename: Option<String>,
        data: Option<String>,
        size: i64,
        attachment_id: Option<String>,
    },
    Multipart {
        mime_type: String,
        children: Vec<BodyNode>,
    },
}

/// Attachment descriptor extracted from a leaf part. Content stays remote.
#[derive(Debug, Clone, PartialEq)]
pub struct AttachmentPart {
    pub filename: String,
    pub content_type: String,
    pub size: i64,
    pub provider_attachment_id: String,
}

impl From<&PayloadPart> for BodyNode {
    fn from(part: &PayloadPart) -> Self {
        match &part.parts {
            Some(children) => BodyNode::Multipart {
                mime_type: part.mime_type.clone(),
                children: children.iter().map(BodyNode::from).collect(),
            },
            None => BodyNode::Leaf {
                mime_type: part.mime_type.clone(),
                filename: part.filename.clone().filter(|f| !f.is_empty()),
                data: part.body.data.clone(),
                size: part.body.size,
                attachment_id: part.body.attachment_id.clone(),
            },
        }
    }
}

impl ProviderMessage {
    /// Parse one message, or an array of messages, from JSON text
    pub fn parse_many(json: &str) -> crate::Result<Vec<ProviderMessage>> {
        let value: serde_json::Value = serde_json::from_str(json)?;
        let messages = match value {
            serde_json::Value::Array(_) => serde_json::from_value(value)?,
            _ => vec![serde_json::from_value(value)?],
        };
        Ok(messages)
    }

    /// First header with the given name, compared case-insensitively
    pub fn header(&self, name: &str) -> Option<&str> {
        self.payload
            .headers
            .iter()
            .find(|h| h.name.eq_ignore_ascii_case(name))
            .map(|h| h.value.as_str())
    }

    pub fn body_tree(&self) -> BodyNode {
        BodyNode::from(&self.payload)
    }

    /// Decoded `(text, html)` bodies, empty strings when absent
    pub fn bodies(&self) -> (String, String) {
        extract_bodies(&self.body_tree())
    }

    pub fn attachments(&self) -> Vec<AttachmentPart> {
        let mut out = Vec::new();
        collect_attachments(&self.body_tree(), &mut out);
        out
    }
}

/// Depth-first descent; the first `text/plain` and first `text/html` leaves win.
///
/// A single-part message keeps its body whatever the type: HTML when it says
/// `text/html`, text otherwise.
pub fn extract_bodies(node: &BodyNode) -> (String, String) {
    if let BodyNode::Leaf {
        mime_type,
        filename: None,
        data: Some(data),
        ..
    } = node
    {
        let body = decode_body(data).or_fallback();
        return if base_mime(mime_type) == "text/html" {
            (String::new(), body)
        } else {
            (body, String::new())
        };
    }

    let mut text: Option<String> = None;
    let mut html: Option<String> = None;
    walk_bodies(node, &mut text, &mut html);
    (text.unwrap_or_default(), html.unwrap_or_default())
}

fn walk_bodies(node: &BodyNode, text: &mut Option<String>, html: &mut Option<String>) {
    if text.is_some() && html.is_some() {
        return;
    }

    match node {
        BodyNode::Multipart { children, .. } => {
            for child in children {
                walk_bodies(child, text, html);
            }
        }
        BodyNode::Leaf {
            mime_type,
            filename: None,
            data: Some(data),
            ..
        } => {
            let slot = match base_mime(mime_type).as_str() {
                "text/html" => html,
                "text/plain" | "" => text,
                _ => return,
            };
            if slot.is_none() {
                *slot = Some(decode_body(data).or_fallback());
            }
        }
        BodyNode::Leaf { .. } => {}
    }
}

fn collect_attachments(node: &BodyNode, out: &mut Vec<AttachmentPart>) {
    match node {
        BodyNode::Multipart { children, .. } => {
            for child in children {
                collect_attachments(child, out);
            }
        }
        BodyNode::Leaf {
            mime_type,
            filename: Some(filename),
            size,
            attachment_id,
            ..
        } => out.push(AttachmentPart {
            filename: filename.clone(),
            content_type: if mime_type.is_empty() {
                DEFAULT_ATTACHMENT_TYPE.to_string()
            } else {
                mime_type.clone()
            },
            size: *size,
            provider_attachment_id: attachment_id.clone().unwrap_or_default(),
        }),
        BodyNode::Leaf { .. } => {}
    }
}

/// `text/plain; charset=UTF-8` -> `text/plain`
fn base_mime(mime_type: &str) -> String {
    mime_type
        .split(';')
        .next()
        .unwrap_or("")
        .trim()
        .to_ascii_lowercase()
}

/// Decode base64url body data. Undecodable input degrades to an empty body.
pub fn decode_body(data: &str) -> Result<String, Degraded<String>> {
    let cleaned: String = data.chars().filter(|c| !c.is_whitespace()).collect();
    match BASE64_URL.decode(cleaned.as_bytes()) {
        Ok(bytes) => Ok(String::from_utf8_lossy(&bytes).into_owned()),
        Err(e) => {
            warn!("Dropping undecodable body part: {}", e);
            Err(Degraded::new(String::new(), e.to_string()))
        }
    }
}

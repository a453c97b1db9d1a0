//! RFC 822 / MIME parsing into the tree the tokeniser consumes.
//!
//! Header extraction is done by hand (unfolding, RFC 2047, `Status:` flags);
//! body and attachment structure comes from `mail-parser`. The output is a
//! [`MessageTree`]: the headers of interest plus a flat list of parts, where
//! embedded `message/rfc822` attachments recurse into nested trees.

pub mod headers;

use std::path::Path;

use mail_parser::{MessageParser, MimeHeaders};
use thiserror::Error;
use tracing::debug;

use crate::model::MessageFlags;

/// Nesting limit for embedded `message/rfc822` parts.
const MAX_NESTING: usize = 10;

/// Why a message failed to parse. Parse failures are recoverable: the
/// caller keeps the message slot with zero tokens.
#[derive(Error, Debug)]
pub enum MessageParseError {
    #[error("corrupt headers")]
    BadHeaders,
    #[error("multipart body without a boundary")]
    MultipartSansBoundary,
    #[error("corrupt attachment")]
    BadAttachment,
    #[error("missing body end marker")]
    MissingEnd,
    #[error("cannot read message: {0}")]
    Io(#[from] std::io::Error),
}

/// Headers of interest for indexing.
#[derive(Debug, Clone, Default)]
pub struct Headers {
    pub to: Option<String>,
    pub cc: Option<String>,
    pub from: Option<String>,
    pub subject: Option<String>,
    pub message_id: Option<String>,
    pub in_reply_to: Option<String>,
    pub references: Option<String>,
    /// `Date:` as seconds since the epoch, 0 when unparseable.
    pub date: i64,
    pub flags: MessageFlags,
}

/// Content classes the tokeniser distinguishes.
#[derive(Debug)]
pub enum PartContent {
    TextPlain(String),
    TextHtml(String),
    Rfc822(Box<MessageTree>),
    Other,
}

/// One attachment (or inline body part).
#[derive(Debug)]
pub struct Part {
    pub content: PartContent,
    pub filename: Option<String>,
}

/// A parsed message: headers plus its attachment tree.
#[derive(Debug)]
pub struct MessageTree {
    pub headers: Headers,
    pub parts: Vec<Part>,
}

/// Parse a message held in memory.
pub fn parse_message(data: &[u8]) -> Result<MessageTree, MessageParseError> {
    parse_message_at_depth(data, 0)
}

/// Read and parse a file-per-message source.
pub fn parse_file(path: &Path) -> Result<MessageTree, MessageParseError> {
    let data = std::fs::read(path)?;
    parse_message(&data)
}

fn parse_message_at_depth(data: &[u8], depth: usize) -> Result<MessageTree, MessageParseError> {
    let headers = extract_headers(data);

    let parsed = MessageParser::default()
        .parse(data)
        .ok_or(MessageParseError::BadHeaders)?;

    let mut parts = Vec::new();

    // Inline text bodies. `body_text` also covers single-part non-MIME
    // messages.
    let mut i = 0;
    while let Some(text) = parsed.body_text(i) {
        parts.push(Part {
            content: PartContent::TextPlain(text.into_owned()),
            filename: None,
        });
        i += 1;
    }
    let mut i = 0;
    while let Some(html) = parsed.body_html(i) {
        parts.push(Part {
            content: PartContent::TextHtml(html.into_owned()),
            filename: None,
        });
        i += 1;
    }

    for attachment in parsed.attachments() {
        let filename = attachment.attachment_name().map(String::from);
        let (ctype, subtype) = attachment
            .content_type()
            .map(|ct| {
                (
                    ct.ctype().to_lowercase(),
                    ct.subtype().map(|s| s.to_lowercase()),
                )
            })
            .unwrap_or_else(|| ("application".to_string(), None));

        let content = match (ctype.as_str(), subtype.as_deref()) {
            ("message", Some("rfc822")) if depth < MAX_NESTING => {
                match parse_message_at_depth(attachment.contents(), depth + 1) {
                    Ok(tree) => PartContent::Rfc822(Box::new(tree)),
                    Err(e) => {
                        debug!(error = %e, "Skipping unparseable embedded message");
                        PartContent::Other
                    }
                }
            }
            ("text", Some("plain")) => {
                PartContent::TextPlain(String::from_utf8_lossy(attachment.contents()).into_owned())
            }
            ("text", Some("html")) => {
                PartContent::TextHtml(String::from_utf8_lossy(attachment.contents()).into_owned())
            }
            _ => PartContent::Other,
        };

        parts.push(Part { content, filename });
    }

    Ok(MessageTree { headers, parts })
}

/// Extract the headers of interest from the raw header block.
fn extract_headers(data: &[u8]) -> Headers {
    let header_bytes = raw_header_block(data);
    let text = headers::decode_header_bytes(header_bytes);
    let unfolded = headers::unfold_headers(&text);

    let decode = |v: Option<String>| v.map(|s| headers::decode_encoded_words(&s));

    Headers {
        to: decode(headers::get_header_combined(&unfolded, "to")),
        cc: decode(headers::get_header_combined(&unfolded, "cc")),
        from: decode(headers::get_header_combined(&unfolded, "from")),
        subject: decode(headers::get_header(&unfolded, "subject")),
        message_id: headers::get_header(&unfolded, "message-id"),
        in_reply_to: headers::get_header(&unfolded, "in-reply-to"),
        references: headers::get_header(&unfolded, "references"),
        date: headers::get_header(&unfolded, "date")
            .map(|d| headers::parse_date(&d))
            .unwrap_or(0),
        flags: headers::flags_from_status(&unfolded),
    }
}

/// Everything before the first blank line.
fn raw_header_block(data: &[u8]) -> &[u8] {
    if let Some(pos) = memchr::memmem::find(data, b"\n\n") {
        return &data[..pos];
    }
    if let Some(pos) = memchr::memmem::find(data, b"\r\n\r\n") {
        return &data[..pos];
    }
    data
}

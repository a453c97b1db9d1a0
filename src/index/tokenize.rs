//! Tokenisation of a parsed message tree into the database's word tables.

use crate::parser::{MessageTree, PartContent};

use super::database::Database;

/// Word-character mask for plain text.
pub const MASK_WORD: u8 = 1;
/// Word-character mask for whole-address scanning of `To`/`Cc`/`From`.
pub const MASK_ADDRESS: u8 = 2;

/// Is `b` a token character under `mask`?
///
/// Alphanumerics always are. `+ - . @` additionally count inside
/// address-like strings, and `_` counts under both masks.
fn char_valid(b: u8, mask: u8) -> bool {
    if b.is_ascii_alphanumeric() {
        return true;
    }
    let special: u8 = match b {
        b'+' | b'-' | b'.' | b'@' => MASK_ADDRESS,
        b'_' => MASK_WORD | MASK_ADDRESS,
        _ => 0,
    };
    special & mask != 0
}

/// Split `data` into maximal runs of token characters and feed each to `emit`.
fn tokenise_string(data: &str, mask: u8, mut emit: impl FnMut(&str)) {
    let bytes = data.as_bytes();
    let mut ss = 0;
    while ss < bytes.len() {
        while ss < bytes.len() && !char_valid(bytes[ss], mask) {
            ss += 1;
        }
        if ss >= bytes.len() {
            break;
        }
        let mut es = ss + 1;
        while es < bytes.len() && char_valid(bytes[es], mask) {
            es += 1;
        }
        // Token characters are ASCII, so the slice is valid UTF-8.
        emit(std::str::from_utf8(&bytes[ss..es]).unwrap_or(""));
        ss = es;
    }
}

/// Like [`tokenise_string`] but skipping HTML tags: everything from `<` to
/// the next `>` is ignored. Comments and CDATA get no special treatment.
fn tokenise_html_string(data: &str, mut emit: impl FnMut(&str)) {
    let bytes = data.as_bytes();
    let mut ss = 0;
    while ss < bytes.len() {
        while ss < bytes.len() && !char_valid(bytes[ss], MASK_WORD) {
            if bytes[ss] == b'<' {
                ss += 1;
                while ss < bytes.len() && bytes[ss] != b'>' {
                    ss += 1;
                }
                if ss >= bytes.len() {
                    return;
                }
            }
            ss += 1;
        }
        if ss >= bytes.len() {
            break;
        }
        let mut es = ss + 1;
        while es < bytes.len() && char_valid(bytes[es], MASK_WORD) {
            es += 1;
        }
        emit(std::str::from_utf8(&bytes[ss..es]).unwrap_or(""));
        ss = es;
    }
}

/// Feed every `<...>` substring of `s` into `emit` with the angles stripped.
fn angled_terms(s: &str, mut emit: impl FnMut(&str)) {
    let mut rest = s;
    while let Some(left) = rest.find('<') {
        let after = &rest[left + 1..];
        match after.find('>') {
            Some(right) => {
                emit(&after[..right]);
                rest = &after[right + 1..];
            }
            None => break,
        }
    }
}

/// Tokenise one parsed message into the tables of `db` under message
/// index `n`.
///
/// `To`/`Cc`/`From` are scanned twice, once with the plain word mask and
/// once with the whole-address mask, so searches can match either a full
/// address atom or any word embedded in it. Embedded `message/rfc822`
/// parts are tokenised recursively under the same index.
pub fn tokenise_message(n: u32, db: &mut Database, msg: &MessageTree) {
    let key = db.hash_key;

    if let Some(to) = &msg.headers.to {
        tokenise_string(to, MASK_WORD, |t| db.to.add(n, t, key));
        tokenise_string(to, MASK_ADDRESS, |t| db.to.add(n, t, key));
    }
    if let Some(cc) = &msg.headers.cc {
        tokenise_string(cc, MASK_WORD, |t| db.cc.add(n, t, key));
        tokenise_string(cc, MASK_ADDRESS, |t| db.cc.add(n, t, key));
    }
    if let Some(from) = &msg.headers.from {
        tokenise_string(from, MASK_WORD, |t| db.from.add(n, t, key));
        tokenise_string(from, MASK_ADDRESS, |t| db.from.add(n, t, key));
    }
    if let Some(subject) = &msg.headers.subject {
        tokenise_string(subject, MASK_WORD, |t| db.subject.add(n, t, key));
    }

    for part in &msg.parts {
        match &part.content {
            PartContent::TextPlain(text) => {
                tokenise_string(text, MASK_WORD, |t| db.body.add(n, t, key));
            }
            PartContent::TextHtml(html) => {
                tokenise_html_string(html, |t| db.body.add(n, t, key));
            }
            PartContent::Rfc822(inner) => {
                tokenise_message(n, db, inner);
            }
            PartContent::Other => {}
        }
        if let Some(filename) = &part.filename {
            // Attachment names are indexed whole, without word splitting.
            db.attachment_name.add(n, filename, key);
        }
    }

    if let Some(mid) = &msg.headers.message_id {
        angled_terms(mid, |t| db.msg_ids.add2(n, t, key, true));
    }
    if let Some(irt) = &msg.headers.in_reply_to {
        angled_terms(irt, |t| db.msg_ids.add2(n, t, key, false));
    }
    if let Some(refs) = &msg.headers.references {
        angled_terms(refs, |t| db.msg_ids.add2(n, t, key, false));
    }
}

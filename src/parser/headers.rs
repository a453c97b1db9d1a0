//! RFC 5322 header handling: unfolding, RFC 2047 encoded-words, dates, flags.

use chrono::{DateTime, NaiveDateTime, TimeZone, Utc};
use tracing::debug;

use crate::model::MessageFlags;

/// Decode raw header bytes to a string.
///
/// Tries UTF-8 first, then falls back to Windows-1252 (which accepts every
/// byte).
pub fn decode_header_bytes(bytes: &[u8]) -> String {
    let bytes = if bytes.starts_with(&[0xEF, 0xBB, 0xBF]) {
        &bytes[3..]
    } else {
        bytes
    };
    match std::str::from_utf8(bytes) {
        Ok(s) => s.to_string(),
        Err(_) => {
            let (decoded, _, _) = encoding_rs::WINDOWS_1252.decode(bytes);
            decoded.into_owned()
        }
    }
}

/// Unfold headers: join continuation lines (starting with space or tab) with
/// the previous header. Returns `(lowercase_name, raw_value)` pairs.
pub fn unfold_headers(text: &str) -> Vec<(String, String)> {
    let mut result: Vec<(String, String)> = Vec::new();
    for line in text.lines() {
        if line.starts_with(' ') || line.starts_with('\t') {
            if let Some(last) = result.last_mut() {
                last.1.push(' ');
                last.1.push_str(line.trim());
            }
        } else if let Some(colon_pos) = line.find(':') {
            let name = line[..colon_pos].trim().to_lowercase();
            let value = line[colon_pos + 1..].trim().to_string();
            result.push((name, value));
        }
    }
    result
}

/// First value for a header name.
pub fn get_header(headers: &[(String, String)], name: &str) -> Option<String> {
    headers
        .iter()
        .find(|(k, _)| k == name)
        .map(|(_, v)| v.clone())
}

/// All values for a header name, combined with `", "`. Repeated `To:`/`Cc:`
/// headers are treated as one long recipient list.
pub fn get_header_combined(headers: &[(String, String)], name: &str) -> Option<String> {
    let values: Vec<&str> = headers
        .iter()
        .filter(|(k, _)| k == name)
        .map(|(_, v)| v.as_str())
        .collect();
    if values.is_empty() {
        None
    } else {
        Some(values.join(", "))
    }
}

/// Extract flags from `Status:` and `X-Status:` header values.
///
/// `R`/`S` mark the message seen, `A` replied, `F` flagged.
pub fn flags_from_status(headers: &[(String, String)]) -> MessageFlags {
    let mut flags = MessageFlags::default();
    for (name, value) in headers {
        if name == "status" || name == "x-status" {
            for c in value.chars() {
                match c {
                    'R' | 'S' => flags.seen = true,
                    'A' => flags.replied = true,
                    'F' => flags.flagged = true,
                    _ => {}
                }
            }
        }
    }
    flags
}

/// Decode RFC 2047 encoded-words in a header value.
///
/// Whitespace between two adjacent encoded words is swallowed (RFC 2047
/// §6.2). Tokens that fail to decode are preserved verbatim.
pub fn decode_encoded_words(input: &str) -> String {
    let mut result = String::with_capacity(input.len());
    let mut remaining = input;
    let mut last_was_encoded = false;

    while let Some(start) = remaining.find("=?") {
        let before = &remaining[..start];
        if !last_was_encoded || !before.trim().is_empty() {
            result.push_str(before);
        }
        let after = &remaining[start + 2..];
        match try_decode_one_word(after) {
            Some((text, consumed)) => {
                result.push_str(&text);
                remaining = &after[consumed..];
                last_was_encoded = true;
            }
            None => {
                result.push_str("=?");
                remaining = after;
                last_was_encoded = false;
            }
        }
    }
    result.push_str(remaining);
    result
}

/// Decode one `charset?encoding?text?=` tail. Returns the decoded text and
/// the number of bytes consumed.
fn try_decode_one_word(s: &str) -> Option<(String, usize)> {
    let first_q = s.find('?')?;
    let charset = &s[..first_q];
    let rest = &s[first_q + 1..];
    let second_q = rest.find('?')?;
    let encoding = &rest[..second_q];
    let rest2 = &rest[second_q + 1..];
    let end = rest2.find("?=")?;
    let encoded_text = &rest2[..end];
    let consumed = first_q + 1 + second_q + 1 + end + 2;

    let bytes = match encoding {
        "B" | "b" => decode_base64(encoded_text)?,
        "Q" | "q" => decode_q_encoding(encoded_text),
        _ => return None,
    };
    Some((decode_charset(charset, &bytes), consumed))
}

/// Minimal base64 decoder tolerant of embedded whitespace.
fn decode_base64(input: &str) -> Option<Vec<u8>> {
    fn val(c: u8) -> Option<u8> {
        match c {
            b'A'..=b'Z' => Some(c - b'A'),
            b'a'..=b'z' => Some(c - b'a' + 26),
            b'0'..=b'9' => Some(c - b'0' + 52),
            b'+' => Some(62),
            b'/' => Some(63),
            _ => None,
        }
    }

    let mut out = Vec::with_capacity(input.len() * 3 / 4);
    let mut quad = [0u8; 4];
    let mut qi = 0;
    let mut pad = 0;
    for &b in input.as_bytes() {
        match b {
            b' ' | b'\t' | b'\r' | b'\n' => continue,
            b'=' => {
                quad[qi] = 0;
                qi += 1;
                pad += 1;
            }
            _ => {
                quad[qi] = val(b)?;
                qi += 1;
            }
        }
        if qi == 4 {
            out.push((quad[0] << 2) | (quad[1] >> 4));
            out.push((quad[1] << 4) | (quad[2] >> 2));
            out.push((quad[2] << 6) | quad[3]);
            qi = 0;
        }
    }
    if qi != 0 {
        return None;
    }
    out.truncate(out.len() - pad.min(2));
    Some(out)
}

/// Decode Q-encoding: underscores become spaces, `=XX` a raw byte.
fn decode_q_encoding(input: &str) -> Vec<u8> {
    let bytes = input.as_bytes();
    let mut result = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        match bytes[i] {
            b'_' => {
                result.push(b' ');
                i += 1;
            }
            b'=' if i + 2 < bytes.len() => {
                let hex = std::str::from_utf8(&bytes[i + 1..i + 3]).unwrap_or("");
                if let Ok(byte) = u8::from_str_radix(hex, 16) {
                    result.push(byte);
                    i += 3;
                } else {
                    result.push(b'=');
                    i += 1;
                }
            }
            b => {
                result.push(b);
                i += 1;
            }
        }
    }
    result
}

/// Decode bytes using a named charset, falling back to lossy UTF-8.
fn decode_charset(charset: &str, bytes: &[u8]) -> String {
    if charset.eq_ignore_ascii_case("utf-8") || charset.eq_ignore_ascii_case("utf8") {
        return String::from_utf8_lossy(bytes).into_owned();
    }
    match encoding_rs::Encoding::for_label(charset.as_bytes()) {
        Some(encoding) => {
            let (decoded, _, _) = encoding.decode(bytes);
            decoded.into_owned()
        }
        None => {
            debug!(charset = charset, "Unknown charset, using UTF-8 lossy");
            String::from_utf8_lossy(bytes).into_owned()
        }
    }
}

/// Parse a `Date:` header to seconds since the epoch. Returns 0 when the
/// value cannot be understood, which excludes the message from any
/// strictly-positive date range.
pub fn parse_date(date_str: &str) -> i64 {
    let trimmed = date_str.trim();
    if trimmed.is_empty() {
        return 0;
    }
    if let Ok(dt) = DateTime::parse_from_rfc2822(trimmed) {
        return dt.timestamp();
    }
    if let Ok(dt) = DateTime::parse_from_rfc3339(trimmed) {
        return dt.timestamp();
    }

    let no_dow = strip_day_of_week(trimmed);
    let formats = [
        "%d %b %Y %H:%M:%S %z",
        "%d %b %Y %H:%M:%S",
        "%d %b %Y %H:%M %z",
        "%b %d %H:%M:%S %Y",
        "%Y-%m-%d %H:%M:%S",
    ];
    for fmt in &formats {
        if let Ok(dt) = DateTime::parse_from_str(no_dow, fmt) {
            return dt.timestamp();
        }
        if let Ok(ndt) = NaiveDateTime::parse_from_str(no_dow, fmt) {
            return Utc.from_utc_datetime(&ndt).timestamp();
        }
    }
    debug!(date = trimmed, "Could not parse Date: header");
    0
}

/// Strip a leading day-of-week prefix like `"Thu, "` or `"Thu "`.
fn strip_day_of_week(s: &str) -> &str {
    for day in ["Mon", "Tue", "Wed", "Thu", "Fri", "Sat", "Sun"] {
        if let Some(rest) = s.strip_prefix(day) {
            return rest.trim_start_matches([',', ' ']);
        }
    }
    s
}

//! Mbox reconciliation: detect modified mbox files, find message
//! boundaries, checksum messages, and index the new ones.

use std::fs::File;
use std::path::Path;

use md5::{Digest, Md5};
use memmap2::Mmap;
use tracing::{debug, warn};

use crate::error::{MairixError, Result};
use crate::model::{Checksum, MboxEntry, MboxMessage, MessageEntry};
use crate::parser;
use crate::scan::ScannedFile;

use super::database::Database;
use super::tokenize::tokenise_message;

/// MD5 over the message bytes as stored in the mbox.
pub fn compute_checksum(data: &[u8]) -> Checksum {
    let mut hasher = Md5::new();
    hasher.update(data);
    hasher.finalize().into()
}

/// Map a mail source read-only for the duration of one reconciliation pass.
/// An empty file yields `None`.
fn map_file(path: &Path) -> Result<Option<Mmap>> {
    let file = File::open(path).map_err(|e| MairixError::source_io(path, e))?;
    let len = file
        .metadata()
        .map_err(|e| MairixError::source_io(path, e))?
        .len();
    if len == 0 {
        return Ok(None);
    }
    // Safety: sources are only read; a concurrent writer shows up as a
    // checksum failure on the next pass.
    let map = unsafe { Mmap::map(&file) }.map_err(|e| MairixError::source_io(path, e))?;
    Ok(Some(map))
}

/// Reconcile the database's mbox table against the live candidate list.
///
/// `candidates` must be sorted by path; a duplicate path is a hard error.
/// Matching entries pick up the current mtime/size; missing ones die;
/// new ones are appended. Each live mbox whose mtime or size changed is
/// then rescanned to find how many old messages survive and what has been
/// appended.
pub fn build_mbox_lists(db: &mut Database, candidates: &[ScannedFile]) -> Result<()> {
    for pair in candidates.windows(2) {
        if pair[0].path == pair[1].path {
            return Err(MairixError::DuplicateInput(pair[0].path.clone()));
        }
    }

    // Marry existing entries against the candidate list by exact path.
    use std::os::unix::ffi::OsStrExt;
    let mut matched = vec![false; candidates.len()];
    for mb in db.mboxen.iter_mut() {
        let Some(path) = mb.path.clone() else { continue };
        match candidates.binary_search_by(|c| {
            c.path
                .as_os_str()
                .as_bytes()
                .cmp(path.as_os_str().as_bytes())
        }) {
            Ok(idx) => {
                matched[idx] = true;
                mb.current_mtime = candidates[idx].mtime;
                mb.current_size = candidates[idx].size;
            }
            Err(_) => {
                debug!(path = %path.display(), "mbox no longer listed, marking dead");
                mb.deaden();
            }
        }
    }
    for (idx, candidate) in candidates.iter().enumerate() {
        if !matched[idx] {
            db.mboxen.push(MboxEntry::new(
                candidate.path.clone(),
                candidate.mtime,
                candidate.size,
            ));
        }
    }

    // Find how many of the old messages are still valid, and scan the rest.
    for mb in db.mboxen.iter_mut() {
        let Some(path) = mb.path.clone() else { continue };
        if mb.current_mtime == mb.file_mtime && mb.current_size == mb.file_size {
            mb.n_old_msgs_valid = mb.msgs.len();
            continue;
        }
        match map_file(&path) {
            Ok(Some(map)) => rescan_mbox(mb, &map),
            Ok(None) => {
                debug!(path = %path.display(), "mbox is empty, marking dead");
                mb.deaden();
            }
            Err(e) => {
                warn!(error = %e, "cannot map mbox, marking dead");
                mb.deaden();
            }
        }
    }
    Ok(())
}

/// Is message `idx` still byte-identical in the current file contents?
fn message_is_intact(mb: &MboxEntry, idx: usize, data: &[u8]) -> bool {
    let m = &mb.msgs[idx];
    let end = m.start + m.len;
    if end > data.len() as u64 {
        return false;
    }
    compute_checksum(&data[m.start as usize..end as usize]) == m.checksum
}

/// How many messages at the head of the file are still valid.
///
/// The common case is pure append: the last known message is intact, so all
/// of them are. If the first message is gone, none are. Otherwise binary
/// chop for the highest valid message, assuming validity is monotone
/// non-increasing through the file.
fn find_number_intact(mb: &MboxEntry, data: &[u8]) -> usize {
    let n = mb.msgs.len();
    if n == 0 {
        return 0;
    }
    if message_is_intact(mb, n - 1, data) {
        return n;
    }
    if !message_is_intact(mb, 0, data) {
        return 0;
    }
    let mut l = 0;
    let mut h = n;
    // Invariant: message[l] is intact, message[h] is not.
    while l < h {
        let m = (l + h) >> 1;
        if m == l {
            break;
        }
        if message_is_intact(mb, m, data) {
            l = m;
        } else {
            h = m;
        }
    }
    l + 1
}

/// The mbox has changed on disk: find the valid prefix, then locate and
/// checksum every message past it.
fn rescan_mbox(mb: &mut MboxEntry, data: &[u8]) {
    mb.n_old_msgs_valid = find_number_intact(mb, data);
    mb.msgs.truncate(mb.n_old_msgs_valid);

    // Start from the newline terminating the last valid message so the
    // next `From ` line is seen at a line start.
    let scan_from = match mb.msgs.last() {
        Some(m) => (m.start + m.len - 1) as usize,
        None => 0,
    };

    let mut from_pos = find_next_from(data, scan_from);
    while let Some(fp) = from_pos {
        let Some(start) = start_of_next_line(data, fp) else {
            break;
        };
        let next_from = find_next_from(data, start);
        let end = next_from.unwrap_or(data.len());
        mb.msgs.push(MboxMessage {
            start: start as u64,
            len: (end - start) as u64,
            checksum: compute_checksum(&data[start..end]),
        });
        from_pos = next_from;
    }
    mb.file_mtime = mb.current_mtime;
    mb.file_size = mb.current_size;
    debug!(
        path = %mb.path.as_deref().unwrap_or(Path::new("?")).display(),
        valid = mb.n_old_msgs_valid,
        total = mb.msgs.len(),
        "Rescanned mbox"
    );
}

/// Find the next `From ` at the start of a line, from byte `n` onwards,
/// that also passes the separator grammar check. Returns the position of
/// the `F`.
fn find_next_from(data: &[u8], mut n: usize) -> Option<usize> {
    if n == 0 && data.len() >= 5 && &data[..5] == b"From " {
        return Some(0);
    }
    loop {
        let rel = memchr::memmem::find(&data[n..], b"\nFrom ")?;
        let f = n + rel + 1;
        if looks_like_from_separator(data, f + 4) {
            return Some(f);
        }
        n = f;
    }
}

/// Position just past the newline ending the line at `n`.
fn start_of_next_line(data: &[u8], n: usize) -> Option<usize> {
    let lf = memchr::memchr(b'\n', &data[n..])?;
    let pos = n + lf + 1;
    (pos < data.len()).then_some(pos)
}

/// Check the text after `From ` against the separator grammar
/// `[sender] weekday month day time [zone [zone]] year`, where the sender
/// is optional and the timezone may be one or two words. Deliberately
/// loose; tightening it would reshuffle previously indexed mboxen.
fn looks_like_from_separator(data: &[u8], space_idx: usize) -> bool {
    let rest = data.get(space_idx + 1..).unwrap_or(&[]);
    // Hitting end of file before a newline means this is not a separator.
    let Some(eol) = memchr::memchr(b'\n', rest) else {
        return false;
    };
    let mut line = &rest[..eol];
    if line.last() == Some(&b'\r') {
        line = &line[..line.len() - 1];
    }

    let fields: Vec<&[u8]> = line
        .split(|&b| b == b' ' || b == b'\t')
        .filter(|f| !f.is_empty())
        .collect();

    let is_alpha3 = |f: &[u8]| f.len() == 3 && f.iter().all(|b| b.is_ascii_alphabetic());
    let is_day = |f: &[u8]| (1..=2).contains(&f.len()) && f.iter().all(|b| b.is_ascii_digit());
    let is_time = |f: &[u8]| {
        let parts: Vec<&[u8]> = f.split(|&b| b == b':').collect();
        (2..=3).contains(&parts.len())
            && parts
                .iter()
                .all(|p| !p.is_empty() && p.len() <= 2 && p.iter().all(|b| b.is_ascii_digit()))
    };
    let is_year = |f: &[u8]| (2..=4).contains(&f.len()) && f.iter().all(|b| b.is_ascii_digit());
    let is_zone = |f: &[u8]| {
        !f.is_empty()
            && f.iter().all(|b| {
                b.is_ascii_uppercase() || b.is_ascii_digit() || *b == b'+' || *b == b'-'
            })
    };

    // Skip an optional sender word when the line is long enough to still
    // hold the date fields after it.
    let mut i = 0;
    if fields.len() > i && !is_alpha3(fields[i]) {
        i += 1;
    } else if fields.len() >= 6 && is_alpha3(fields[i]) && is_alpha3(fields[i + 1])
        && is_alpha3(fields[i + 2])
    {
        // Three leading alphabetic words: the first must be a sender name.
        i += 1;
    }

    if fields.len() < i + 5 {
        return false;
    }
    if !is_alpha3(fields[i]) || !is_alpha3(fields[i + 1]) {
        return false;
    }
    if !is_day(fields[i + 2]) || !is_time(fields[i + 3]) {
        return false;
    }
    let tail = &fields[i + 4..];
    let Some((year, zones)) = tail.split_last() else {
        return false;
    };
    is_year(year) && zones.len() <= 2 && zones.iter().all(|z| is_zone(z))
}

/// Index every newly discovered mbox message: append a message entry,
/// parse the bytes straight out of the mapping, and tokenise. A message
/// that fails to parse keeps its slot with zero tokens.
///
/// Returns true when any message was added.
pub fn add_mbox_messages(db: &mut Database) -> Result<bool> {
    let mut any_new = false;
    for mbox_index in 0..db.mboxen.len() {
        let (path, first_new, spans) = {
            let mb = &db.mboxen[mbox_index];
            let Some(path) = mb.path.clone() else { continue };
            let spans: Vec<(u64, u64)> = mb.msgs[mb.n_old_msgs_valid..]
                .iter()
                .map(|m| (m.start, m.len))
                .collect();
            (path, mb.n_old_msgs_valid, spans)
        };
        if spans.is_empty() {
            continue;
        }
        let map = map_file(&path)?.ok_or_else(|| {
            MairixError::source_io(
                &path,
                std::io::Error::new(std::io::ErrorKind::UnexpectedEof, "mbox became empty"),
            )
        })?;

        for (j, (start, len)) in spans.iter().enumerate() {
            let msg_index = first_new + j;
            let n = db.append_msg(MessageEntry::new_mbox(mbox_index, msg_index));
            any_new = true;

            let lo = *start as usize;
            let hi = (start + len).min(map.len() as u64) as usize;
            match parser::parse_message(&map[lo..hi]) {
                Ok(tree) => {
                    debug!(
                        mbox = %path.display(),
                        msg = msg_index,
                        start = lo,
                        "Scanning mbox message"
                    );
                    let idx = n as usize;
                    db.msgs[idx].date = tree.headers.date;
                    db.msgs[idx].flags = tree.headers.flags;
                    tokenise_message(n, db, &tree);
                }
                Err(e) => {
                    warn!(
                        mbox = %path.display(),
                        start = lo,
                        error = %e,
                        "Message is misformatted, indexing with zero tokens"
                    );
                }
            }
        }
    }
    Ok(any_new)
}

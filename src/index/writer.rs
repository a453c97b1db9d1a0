//! Serialise the database back to disk.
//!
//! The file is sized exactly, mapped read-write, filled in one pass and
//! fsync'd. Tokens are written in table order: searchers do not need them
//! sorted, so sorting would cost a qsort for no benefit.

use std::fs::OpenOptions;

use byteorder::{ByteOrder, LittleEndian};
use memmap2::MmapMut;
use tracing::debug;

use crate::error::{MairixError, Result};
use crate::model::MessageSource;

use super::database::Database;
use super::format::*;
use super::postings::TERMINATOR;
use super::tokens::Token;

/// Word offsets of every table, computed before any byte is written.
struct WriteMap {
    msg_path: usize,
    msg_mtime: usize,
    msg_date: usize,
    msg_size: usize,
    msg_tid: usize,
    mbox_paths: usize,
    mbox_entries: usize,
    mbox_mtime: usize,
    mbox_size: usize,
    mbox_cksum: usize,
    /// Per word-table: (tok_offsets, enc_offsets).
    tables: [(usize, usize); 6],
    msgid_tok: usize,
    msgid_enc0: usize,
    msgid_enc1: usize,
    /// First word past the offset arrays; the character region starts at
    /// `4 * beyond_last_ui_offset`.
    beyond_last_ui_offset: usize,
}

fn compute_mapping(db: &Database) -> WriteMap {
    let n = db.msgs.len();
    let nm = db.mboxen.len();
    let mut total = UI_HEADER_LEN;
    let mut take = |count: usize| {
        let at = total;
        total += count;
        at
    };

    let msg_path = take(n);
    let msg_mtime = take(n);
    let msg_date = take(n);
    let msg_size = take(n);
    let msg_tid = take(n);

    let mbox_paths = take(nm);
    let mbox_entries = take(nm);
    let mbox_mtime = take(nm);
    let mbox_size = take(nm);
    let mbox_cksum = take(nm);

    let word_tables = [
        db.to.len(),
        db.cc.len(),
        db.from.len(),
        db.subject.len(),
        db.body.len(),
        db.attachment_name.len(),
    ];
    let mut tables = [(0, 0); 6];
    for (slot, len) in tables.iter_mut().zip(word_tables) {
        *slot = (take(len), take(len));
    }
    let msgid_tok = take(db.msg_ids.len());
    let msgid_enc0 = take(db.msg_ids.len());
    let msgid_enc1 = take(db.msg_ids.len());

    WriteMap {
        msg_path,
        msg_mtime,
        msg_date,
        msg_size,
        msg_tid,
        mbox_paths,
        mbox_entries,
        mbox_mtime,
        mbox_size,
        mbox_cksum,
        tables,
        msgid_tok,
        msgid_enc0,
        msgid_enc1,
        beyond_last_ui_offset: total,
    }
}

/// Total length of the character region.
fn char_length(db: &Database) -> usize {
    let mut result = db.msgs.len(); // type-and-flags table

    for m in &db.msgs {
        if let MessageSource::File { path, .. } = &m.source {
            result += path.as_os_str().len() + 1;
        }
    }
    for mb in &db.mboxen {
        result += mb.msgs.len() * 16;
        if let Some(path) = &mb.path {
            result += path.as_os_str().len() + 1;
        }
    }

    for table in [
        &db.to,
        &db.cc,
        &db.from,
        &db.subject,
        &db.body,
        &db.attachment_name,
    ] {
        for tok in table.iter() {
            result += tok.text.len() + 1;
            result += tok.match0.encoded_len() + 1;
        }
    }
    for tok in db.msg_ids.iter() {
        result += tok.text.len() + 1;
        result += tok.match0.encoded_len() + 1;
        result += tok.match1.encoded_len() + 1;
    }
    result
}

struct Out<'a> {
    buf: &'a mut [u8],
    /// Next free byte in the character region.
    cpos: usize,
}

impl Out<'_> {
    fn put_word(&mut self, word_idx: usize, value: u32) {
        LittleEndian::write_u32(&mut self.buf[word_idx * 4..word_idx * 4 + 4], value);
    }

    /// Append to the character region, returning the byte offset written.
    fn put_cdata(&mut self, data: &[u8]) -> usize {
        let at = self.cpos;
        self.buf[at..at + data.len()].copy_from_slice(data);
        self.cpos += data.len();
        at
    }

    /// Append a NUL-terminated string.
    fn put_cstring(&mut self, s: &[u8]) -> usize {
        let at = self.put_cdata(s);
        self.buf[self.cpos] = 0;
        self.cpos += 1;
        at
    }
}

fn clamp_u32(v: i64) -> u32 {
    v.clamp(0, u32::MAX as i64) as u32
}

/// Write the database to its index file: exact-size the file, map it
/// read-write, lay out header, tables and character data, and fsync.
pub fn write_database(db: &Database, do_integrity_checks: bool) -> Result<()> {
    if do_integrity_checks {
        db.check_integrity()?;
    }
    db.verify_mbox_size_constraints()?;

    let map_info = compute_mapping(db);
    let file_len = map_info.beyond_last_ui_offset * 4 + char_length(db);

    let file = OpenOptions::new()
        .read(true)
        .write(true)
        .create(true)
        .truncate(false)
        .open(&db.path)
        .map_err(|e| MairixError::index_io(&db.path, e))?;
    file.set_len(file_len as u64)
        .map_err(|e| MairixError::index_io(&db.path, e))?;
    // Safety: the file is exclusively owned via the database lock while
    // mapped writable.
    let mut map =
        unsafe { MmapMut::map_mut(&file) }.map_err(|e| MairixError::index_io(&db.path, e))?;

    let mut out = Out {
        buf: &mut map,
        cpos: map_info.beyond_last_ui_offset * 4,
    };

    write_header(db, &map_info, &mut out);
    write_type_and_flag_table(db, &mut out);
    write_messages(db, &map_info, &mut out);
    write_mbox_headers(db, &map_info, &mut out);
    write_mbox_checksums(db, &map_info, &mut out);
    for (i, table) in [
        &db.to,
        &db.cc,
        &db.from,
        &db.subject,
        &db.body,
        &db.attachment_name,
    ]
    .into_iter()
    .enumerate()
    {
        let (tok_off, enc_off) = map_info.tables[i];
        write_toktable(table.iter(), tok_off, enc_off, &mut out);
    }
    write_toktable2(db, &map_info, &mut out);

    debug_assert_eq!(out.cpos, file_len);

    map.flush()
        .map_err(|e| MairixError::index_io(&db.path, e))?;
    drop(map);
    file.sync_all()
        .map_err(|e| MairixError::index_io(&db.path, e))?;
    debug!(path = %db.path.display(), bytes = file_len, msgs = db.msgs.len(), "Wrote database");
    Ok(())
}

fn write_header(db: &Database, m: &WriteMap, out: &mut Out<'_>) {
    out.buf[..4].copy_from_slice(&MAGIC);
    out.put_word(UI_ENDIAN, ENDIAN_SENTINEL);
    out.put_word(UI_N_MSGS, db.msgs.len() as u32);
    out.put_word(UI_MSG_CDATA, m.msg_path as u32);
    out.put_word(UI_MSG_MTIME, m.msg_mtime as u32);
    out.put_word(UI_MSG_DATE, m.msg_date as u32);
    out.put_word(UI_MSG_SIZE, m.msg_size as u32);
    out.put_word(UI_MSG_TID, m.msg_tid as u32);

    out.put_word(UI_MBOX_N, db.mboxen.len() as u32);
    out.put_word(UI_MBOX_PATHS, m.mbox_paths as u32);
    out.put_word(UI_MBOX_ENTRIES, m.mbox_entries as u32);
    out.put_word(UI_MBOX_MTIME, m.mbox_mtime as u32);
    out.put_word(UI_MBOX_SIZE, m.mbox_size as u32);
    out.put_word(UI_MBOX_CKSUM, m.mbox_cksum as u32);

    out.put_word(UI_HASH_KEY, db.hash_key);

    let table_lens = [
        db.to.len(),
        db.cc.len(),
        db.from.len(),
        db.subject.len(),
        db.body.len(),
        db.attachment_name.len(),
    ];
    let bases = [
        UI_TO_BASE,
        UI_CC_BASE,
        UI_FROM_BASE,
        UI_SUBJECT_BASE,
        UI_BODY_BASE,
        UI_ATTACHMENT_NAME_BASE,
    ];
    for i in 0..6 {
        out.put_word(bases[i], table_lens[i] as u32);
        out.put_word(bases[i] + 1, m.tables[i].0 as u32);
        out.put_word(bases[i] + 2, m.tables[i].1 as u32);
    }
    out.put_word(UI_MSGID_BASE, db.msg_ids.len() as u32);
    out.put_word(UI_MSGID_BASE + 1, m.msgid_tok as u32);
    out.put_word(UI_MSGID_BASE + 2, m.msgid_enc0 as u32);
    out.put_word(UI_MSGID_BASE + 3, m.msgid_enc1 as u32);
}

fn write_type_and_flag_table(db: &Database, out: &mut Out<'_>) {
    let at = out.cpos;
    out.put_word(UI_MSG_TYPE_AND_FLAGS, at as u32);
    for m in &db.msgs {
        let mut byte = match m.source {
            MessageSource::File { .. } => DB_MSG_FILE,
            MessageSource::Mbox { .. } => DB_MSG_MBOX,
            MessageSource::Dead => DB_MSG_DEAD,
        };
        if m.flags.seen {
            byte |= FLAG_SEEN;
        }
        if m.flags.replied {
            byte |= FLAG_REPLIED;
        }
        if m.flags.flagged {
            byte |= FLAG_FLAGGED;
        }
        out.put_cdata(&[byte]);
    }
}

fn write_messages(db: &Database, m: &WriteMap, out: &mut Out<'_>) {
    use std::os::unix::ffi::OsStrExt;
    for (i, msg) in db.msgs.iter().enumerate() {
        match &msg.source {
            MessageSource::File { path, mtime, size } => {
                let at = out.put_cstring(path.as_os_str().as_bytes());
                out.put_word(m.msg_path + i, at as u32);
                out.put_word(m.msg_mtime + i, clamp_u32(*mtime));
                out.put_word(m.msg_size + i, *size as u32);
            }
            MessageSource::Mbox {
                mbox_index,
                msg_index,
            } => {
                let span = db.mboxen[*mbox_index].msgs[*msg_index];
                out.put_word(m.msg_path + i, encode_mbox_indices(*mbox_index, *msg_index));
                out.put_word(m.msg_mtime + i, span.start as u32);
                out.put_word(m.msg_size + i, span.len as u32);
            }
            MessageSource::Dead => {
                out.put_word(m.msg_path + i, 0);
                out.put_word(m.msg_mtime + i, 0);
                out.put_word(m.msg_size + i, 0);
            }
        }
        out.put_word(m.msg_date + i, clamp_u32(msg.date));
        out.put_word(m.msg_tid + i, msg.tid);
    }
}

fn write_mbox_headers(db: &Database, m: &WriteMap, out: &mut Out<'_>) {
    use std::os::unix::ffi::OsStrExt;
    for (i, mb) in db.mboxen.iter().enumerate() {
        out.put_word(m.mbox_entries + i, mb.msgs.len() as u32);
        out.put_word(m.mbox_mtime + i, clamp_u32(mb.current_mtime));
        out.put_word(m.mbox_size + i, mb.current_size as u32);
        match &mb.path {
            Some(path) => {
                let at = out.put_cstring(path.as_os_str().as_bytes());
                out.put_word(m.mbox_paths + i, at as u32);
            }
            None => out.put_word(m.mbox_paths + i, 0),
        }
    }
}

fn write_mbox_checksums(db: &Database, m: &WriteMap, out: &mut Out<'_>) {
    for (i, mb) in db.mboxen.iter().enumerate() {
        let at = out.cpos;
        out.put_word(m.mbox_cksum + i, at as u32);
        for msg in &mb.msgs {
            out.put_cdata(&msg.checksum);
        }
    }
}

fn write_toktable<'a>(
    tokens: impl Iterator<Item = &'a Token> + Clone,
    tok_off: usize,
    enc_off: usize,
    out: &mut Out<'_>,
) {
    for (i, tok) in tokens.clone().enumerate() {
        let at = out.put_cstring(tok.text.as_bytes());
        out.put_word(tok_off + i, at as u32);
    }
    for (i, tok) in tokens.enumerate() {
        let at = out.put_cdata(tok.match0.as_bytes());
        out.put_word(enc_off + i, at as u32);
        out.put_cdata(&[TERMINATOR]);
    }
}

fn write_toktable2(db: &Database, m: &WriteMap, out: &mut Out<'_>) {
    for (i, tok) in db.msg_ids.iter().enumerate() {
        let at = out.put_cstring(tok.text.as_bytes());
        out.put_word(m.msgid_tok + i, at as u32);
    }
    for (i, tok) in db.msg_ids.iter().enumerate() {
        let at = out.put_cdata(tok.match0.as_bytes());
        out.put_word(m.msgid_enc0 + i, at as u32);
        out.put_cdata(&[TERMINATOR]);
    }
    for (i, tok) in db.msg_ids.iter().enumerate() {
        let at = out.put_cdata(tok.match1.as_bytes());
        out.put_word(m.msgid_enc1 + i, at as u32);
        out.put_cdata(&[TERMINATOR]);
    }
}

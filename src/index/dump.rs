//! Human-readable dump of an index file, for debugging and post-mortems.

use std::io::Write;
use std::path::Path;

use crate::error::Result;

use super::format::{decode_mbox_indices, DB_MSG_FILE, DB_MSG_MBOX};
use super::postings::PostingIter;
use super::reader::IndexReader;

fn dump_token_chain(
    out: &mut impl Write,
    n: usize,
    text: impl Fn(usize) -> Result<String>,
    postings: impl Fn(usize) -> Result<Vec<u32>>,
) -> Result<()> {
    let _ = writeln!(out, "{n} entries");
    for i in 0..n {
        let _ = writeln!(out, "Word {i} : <{}>", text(i)?);
        let hits = postings(i)?;
        let mut line = String::from("  ");
        for (k, idx) in hits.iter().enumerate() {
            if k > 0 && k % 16 == 0 {
                let _ = writeln!(out, "{line}");
                line = String::from("  ");
            }
            line.push_str(&format!("{idx} "));
        }
        let _ = writeln!(out, "{line}");
    }
    Ok(())
}

/// Dump the whole database to `out`.
pub fn dump_database(db_path: &Path, out: &mut impl Write) -> Result<()> {
    let db = IndexReader::open(db_path)?;

    let _ = writeln!(out, "Dump of database {}", db_path.display());
    let _ = writeln!(out, "{} messages, {} mboxen", db.n_msgs(), db.n_mboxen());
    let _ = writeln!(out, "hash_key = 0x{:08x}", db.hash_key());
    let _ = writeln!(out);

    for i in 0..db.n_msgs() {
        let flags_byte = db.msg_type_and_flags(i);
        match db.msg_type(i) {
            DB_MSG_FILE => {
                let _ = writeln!(
                    out,
                    "Message {i} : file <{}> mtime={} size={} date={} tid={} flags=0x{:02x}",
                    db.string_at(db.msg_cdata(i) as usize)?,
                    db.msg_mtime(i),
                    db.msg_size(i),
                    db.msg_date(i),
                    db.msg_tid(i),
                    flags_byte >> 3
                );
            }
            DB_MSG_MBOX => {
                let (mbi, msgi) = decode_mbox_indices(db.msg_cdata(i));
                let _ = writeln!(
                    out,
                    "Message {i} : mbox {mbi} msg {msgi} start={} len={} date={} tid={}",
                    db.msg_mtime(i),
                    db.msg_size(i),
                    db.msg_date(i),
                    db.msg_tid(i),
                );
            }
            _ => {
                let _ = writeln!(out, "Message {i} : dead");
            }
        }
    }
    let _ = writeln!(out);

    for i in 0..db.n_mboxen() {
        let path_off = db.mbox_path_offset(i);
        if path_off == 0 {
            let _ = writeln!(out, "Mbox {i} : dead");
        } else {
            let _ = writeln!(
                out,
                "Mbox {i} : <{}> {} messages mtime={} size={}",
                db.string_at(path_off as usize)?,
                db.mbox_entries(i),
                db.mbox_mtime(i),
                db.mbox_size(i),
            );
        }
    }
    let _ = writeln!(out);

    let tables = [
        ("To", db.to_table()),
        ("Cc", db.cc_table()),
        ("From", db.from_table()),
        ("Subject", db.subject_table()),
        ("Body", db.body_table()),
        ("Attachment name", db.attachment_name_table()),
    ];
    for (title, view) in tables {
        let _ = writeln!(out, "Contents of <{title}> table");
        dump_token_chain(
            out,
            view.n(),
            |i| Ok(view.token_text(i)?.to_string()),
            |i| Ok(PostingIter::new(view.postings(i)?).collect()),
        )?;
        let _ = writeln!(out);
    }

    let ids = db.msg_ids_table();
    let _ = writeln!(out, "Contents of <Message-Id> table");
    let _ = writeln!(out, "Chain 0");
    dump_token_chain(
        out,
        ids.n(),
        |i| Ok(ids.token_text(i)?.to_string()),
        |i| Ok(PostingIter::new(ids.postings0(i)?).collect()),
    )?;
    let _ = writeln!(out, "Chain 1");
    dump_token_chain(
        out,
        ids.n(),
        |i| Ok(ids.token_text(i)?.to_string()),
        |i| Ok(PostingIter::new(ids.postings1(i)?).collect()),
    )?;
    Ok(())
}

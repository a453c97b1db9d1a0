//! Incremental update: reconcile the database against the live filesystem
//! listing, index new messages, and regroup threads.

use std::os::unix::ffi::OsStrExt;

use tracing::{debug, info, warn};

use crate::error::Result;
use crate::model::{maildir_flags_from_path, MessageEntry, MessageSource};
use crate::parser;
use crate::scan::ScannedFile;

use super::database::Database;
use super::mboxscan::add_mbox_messages;
use super::tokenize::tokenise_message;

/// Reconcile the database against `sorted_paths`, the current
/// file-per-message listing (sorted by path bytes).
///
/// Entries whose path has vanished, or whose mtime changed, die; new paths
/// are appended and scanned. With `fast_index`, the presence of a matching
/// path is taken as good enough without comparing mtimes. Mbox-backed
/// messages past their mbox's valid prefix die here too, and the newly
/// discovered mbox messages are indexed.
///
/// Returns true when anything was added or killed, i.e. the database needs
/// writing.
pub fn update_database(
    db: &mut Database,
    sorted_paths: &[ScannedFile],
    fast_index: bool,
) -> Result<bool> {
    let mut file_in_db = vec![false; sorted_paths.len()];
    let mut file_in_new_list = vec![false; db.msgs.len()];

    for (i, msg) in db.msgs.iter().enumerate() {
        if let MessageSource::File { path, mtime, .. } = &msg.source {
            let found = sorted_paths
                .binary_search_by(|c| c.path.as_os_str().as_bytes().cmp(path.as_os_str().as_bytes()));
            if let Ok(idx) = found {
                if fast_index || sorted_paths[idx].mtime == *mtime {
                    file_in_db[idx] = true;
                    file_in_new_list[i] = true;
                }
            }
        }
    }

    // Weed dead entries.
    let mut n_newly_pruned = 0usize;
    let mut n_already_dead = 0usize;
    for i in 0..db.msgs.len() {
        match &db.msgs[i].source {
            MessageSource::File { .. } => {
                if !file_in_new_list[i] {
                    db.msgs[i].kill();
                    n_newly_pruned += 1;
                }
            }
            MessageSource::Mbox {
                mbox_index,
                msg_index,
            } => {
                let mb = &db.mboxen[*mbox_index];
                if mb.is_dead() || *msg_index >= mb.n_old_msgs_valid {
                    db.msgs[i].kill();
                    n_newly_pruned += 1;
                }
            }
            MessageSource::Dead => n_already_dead += 1,
        }
    }
    debug!(
        newly_dead = n_newly_pruned,
        total_dead = n_newly_pruned + n_already_dead,
        "Weeded dead messages"
    );

    // Append new file-per-message entries. Only paths that still stat as
    // regular files make it in.
    let new_entries_start = db.msgs.len();
    let mut any_new = false;
    for (idx, candidate) in sorted_paths.iter().enumerate() {
        if file_in_db[idx] {
            continue;
        }
        any_new = true;
        match std::fs::metadata(&candidate.path) {
            Ok(meta) if meta.is_file() => {
                use std::os::unix::fs::MetadataExt;
                db.append_msg(MessageEntry::new_file(
                    candidate.path.clone(),
                    meta.mtime(),
                    meta.size(),
                ));
            }
            _ => {
                warn!(path = %candidate.path.display(), "Cannot add to database; stat failed");
            }
        }
    }

    if any_new {
        scan_new_messages(db, new_entries_start);
    }

    any_new |= add_mbox_messages(db)?;

    if any_new {
        find_threading(db);
    } else {
        info!("No new messages found");
    }

    Ok(any_new || n_newly_pruned > 0)
}

/// Parse and tokenise every message from `start_at` onwards. A message that
/// fails to parse is logged and left with zero tokens.
fn scan_new_messages(db: &mut Database, start_at: usize) {
    for i in start_at..db.msgs.len() {
        let MessageSource::File { path, .. } = &db.msgs[i].source else {
            continue;
        };
        let path = path.clone();
        if path.as_os_str().as_bytes().ends_with(b"/.gitignore") {
            continue;
        }
        debug!(path = %path.display(), "Scanning");
        match parser::parse_file(&path) {
            Ok(tree) => {
                db.msgs[i].date = tree.headers.date;
                db.msgs[i].flags =
                    maildir_flags_from_path(&path).unwrap_or(tree.headers.flags);
                tokenise_message(i as u32, db, &tree);
            }
            Err(e) => {
                warn!(path = %path.display(), error = %e, "Skipping (could not parse message)");
            }
        }
    }
}

/// Chase parent pointers to the set representative.
fn find_base(ix: &[usize], mut a: usize) -> usize {
    while ix[a] != a {
        a = ix[a];
    }
    a
}

/// Union-find over the message-id relation, then assign dense thread ids.
///
/// Every message starts in a thread of its own. For each message-id token,
/// all messages on its chain-0 posting list are merged, taking the lowest
/// message index as the representative.
pub fn find_threading(db: &mut Database) {
    let n = db.msgs.len();
    let mut ix: Vec<usize> = (0..n).collect();

    for tok in db.msg_ids.iter() {
        let mut base: Option<usize> = None;
        for idx in tok.match0.iter() {
            let cur = idx as usize;
            match base {
                None => base = Some(find_base(&ix, cur)),
                Some(b) => {
                    let old = find_base(&ix, cur);
                    if old < b {
                        ix[b] = old;
                        base = Some(old);
                    } else if old > b {
                        ix[old] = b;
                    }
                }
            }
        }
    }

    // Point every slot directly at its base. Safe in one ascending pass
    // because representatives always have lower indices.
    for i in 0..n {
        if ix[i] != i {
            ix[i] = ix[ix[i]];
        }
    }

    let mut next_tid = 0u32;
    for i in 0..n {
        if ix[i] == i {
            db.msgs[i].tid = next_tid;
            next_tid += 1;
        } else {
            db.msgs[i].tid = db.msgs[ix[i]].tid;
        }
    }
    debug!(threads = next_tid, messages = n, "Assigned thread ids");
}

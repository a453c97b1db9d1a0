//! The in-memory database: message and mbox tables plus the token tables.

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

use tracing::{debug, info};

use crate::error::{MairixError, Result};
use crate::model::{MboxEntry, MboxMessage, MessageEntry, MessageFlags, MessageSource};

use super::format::{DB_MSG_DEAD, DB_MSG_FILE, DB_MSG_MBOX, FLAG_FLAGGED, FLAG_REPLIED, FLAG_SEEN,
    MBOX_INDEX_LIMIT};
use super::postings::{PostingIter, PostingList};
use super::reader::{IndexReader, TokTable2View, TokTableView};
use super::tokens::{token_hash, Token, Token2, TokenTable, TokenTable2};

/// The whole mapping between messages and the tokens occurring in them.
pub struct Database {
    /// Path of the index file this database loads from and writes to.
    pub path: PathBuf,
    pub msgs: Vec<MessageEntry>,
    pub mboxen: Vec<MboxEntry>,
    /// Seed for token hashing, chosen at random for each new database and
    /// preserved across loads.
    pub hash_key: u32,
    pub to: TokenTable,
    pub cc: TokenTable,
    pub from: TokenTable,
    pub subject: TokenTable,
    pub body: TokenTable,
    pub attachment_name: TokenTable,
    pub msg_ids: TokenTable2,
}

/// Seed material for a fresh database's hash key.
fn random_hash_key() -> u32 {
    let now = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default();
    (now.as_secs() as u32) ^ (std::process::id().wrapping_shl(15)) ^ now.subsec_micros()
}

impl Database {
    /// An empty database bound to `path`.
    pub fn new(path: &Path) -> Self {
        Self {
            path: path.to_path_buf(),
            msgs: Vec::new(),
            mboxen: Vec::new(),
            hash_key: random_hash_key(),
            to: TokenTable::new(),
            cc: TokenTable::new(),
            from: TokenTable::new(),
            subject: TokenTable::new(),
            body: TokenTable::new(),
            attachment_name: TokenTable::new(),
            msg_ids: TokenTable2::new(),
        }
    }

    /// Load the database from `path`, or create an empty one when the file
    /// does not exist yet.
    pub fn open_or_create(path: &Path, do_integrity_checks: bool) -> Result<Self> {
        if !path.exists() {
            info!(path = %path.display(), "No existing index, creating a new database");
            return Ok(Self::new(path));
        }
        let reader = IndexReader::open(path)?;
        let db = Self::load(path, &reader)?;
        drop(reader);
        if do_integrity_checks {
            db.check_integrity()?;
        }
        Ok(db)
    }

    fn load(path: &Path, reader: &IndexReader) -> Result<Self> {
        let mut db = Self::new(path);
        db.hash_key = reader.hash_key();

        let corrupt = |reason: String| MairixError::corrupt(path, reason);

        // Mbox descriptors first; the per-message loop below fills in the
        // start/length of each of their messages.
        let n_mboxen = reader.n_mboxen();
        for i in 0..n_mboxen {
            let path_off = reader.mbox_path_offset(i);
            let n = reader.mbox_entries(i) as usize;
            let mut entry = MboxEntry::default();
            if path_off != 0 {
                entry.path = Some(PathBuf::from(reader.string_at(path_off as usize)?));
            }
            entry.file_mtime = reader.mbox_mtime(i) as i64;
            entry.file_size = reader.mbox_size(i) as u64;
            let cksum_base = reader.mbox_checksum_offset(i) as usize;
            let cksums = reader.bytes_at(cksum_base)?;
            if cksums.len() < n * 16 {
                return Err(corrupt(format!("checksum block for mbox {i} truncated")));
            }
            for j in 0..n {
                let mut checksum = [0u8; 16];
                checksum.copy_from_slice(&cksums[j * 16..j * 16 + 16]);
                entry.msgs.push(MboxMessage {
                    start: 0,
                    len: 0,
                    checksum,
                });
            }
            db.mboxen.push(entry);
        }

        // Track how many messages of each mbox have been seen; the file
        // stores them in order.
        let mut n_so_far = vec![0usize; n_mboxen];

        let n_msgs = reader.n_msgs();
        for i in 0..n_msgs {
            let type_and_flags = reader.msg_type_and_flags(i);
            let source = match type_and_flags & 0x7 {
                DB_MSG_DEAD => MessageSource::Dead,
                DB_MSG_FILE => MessageSource::File {
                    path: PathBuf::from(reader.string_at(reader.msg_cdata(i) as usize)?),
                    mtime: reader.msg_mtime(i) as i64,
                    size: reader.msg_size(i) as u64,
                },
                DB_MSG_MBOX => {
                    let (mbox_index, msg_index) =
                        super::format::decode_mbox_indices(reader.msg_cdata(i));
                    let mb = db.mboxen.get_mut(mbox_index).ok_or_else(|| {
                        corrupt(format!("message {i} references mbox {mbox_index}"))
                    })?;
                    if msg_index != n_so_far[mbox_index] || msg_index >= mb.msgs.len() {
                        return Err(corrupt(format!(
                            "message {i} has out-of-order mbox slot {msg_index}"
                        )));
                    }
                    mb.msgs[msg_index].start = reader.msg_mtime(i) as u64;
                    mb.msgs[msg_index].len = reader.msg_size(i) as u64;
                    n_so_far[mbox_index] += 1;
                    MessageSource::Mbox {
                        mbox_index,
                        msg_index,
                    }
                }
                other => {
                    return Err(corrupt(format!("message {i} has unknown type {other}")));
                }
            };
            db.msgs.push(MessageEntry {
                source,
                date: reader.msg_date(i) as i64,
                tid: reader.msg_tid(i),
                flags: MessageFlags {
                    seen: type_and_flags & FLAG_SEEN != 0,
                    replied: type_and_flags & FLAG_REPLIED != 0,
                    flagged: type_and_flags & FLAG_FLAGGED != 0,
                },
            });
        }

        import_table(path, reader.to_table(), db.hash_key, n_msgs, &mut db.to)?;
        import_table(path, reader.cc_table(), db.hash_key, n_msgs, &mut db.cc)?;
        import_table(path, reader.from_table(), db.hash_key, n_msgs, &mut db.from)?;
        import_table(path, reader.subject_table(), db.hash_key, n_msgs, &mut db.subject)?;
        import_table(path, reader.body_table(), db.hash_key, n_msgs, &mut db.body)?;
        import_table(
            path,
            reader.attachment_name_table(),
            db.hash_key,
            n_msgs,
            &mut db.attachment_name,
        )?;
        import_table2(path, reader.msg_ids_table(), db.hash_key, n_msgs, &mut db.msg_ids)?;

        debug!(
            msgs = db.msgs.len(),
            mboxen = db.mboxen.len(),
            "Loaded database"
        );
        Ok(db)
    }

    /// Append a message entry, returning its index.
    pub fn append_msg(&mut self, entry: MessageEntry) -> u32 {
        self.msgs.push(entry);
        (self.msgs.len() - 1) as u32
    }

    /// Verify the database invariants. Fails with `CorruptDatabase`.
    pub fn check_integrity(&self) -> Result<()> {
        let fail = |reason: String| Err(MairixError::corrupt(&self.path, reason));

        // No two live file messages may share a path.
        let mut paths = HashSet::new();
        for m in &self.msgs {
            if let MessageSource::File { path, .. } = &m.source {
                if !paths.insert(path.as_path()) {
                    return fail(format!("path <{}> repeated", path.display()));
                }
            }
        }

        // Every mbox message must point at a live mbox slot, and the mbox
        // message counts must agree with the message table.
        let mut per_mbox = vec![0usize; self.mboxen.len()];
        for (i, m) in self.msgs.iter().enumerate() {
            if let MessageSource::Mbox { mbox_index, .. } = m.source {
                match self.mboxen.get(mbox_index) {
                    None => return fail(format!("message {i} references mbox {mbox_index}")),
                    Some(mb) if mb.is_dead() => {
                        return fail(format!("message {i} references dead mbox {mbox_index}"));
                    }
                    Some(_) => per_mbox[mbox_index] += 1,
                }
            }
        }
        for (i, mb) in self.mboxen.iter().enumerate() {
            if !mb.is_dead() && per_mbox[i] != mb.msgs.len() {
                return fail(format!(
                    "mbox {i} lists {} messages but {} message entries reference it",
                    mb.msgs.len(),
                    per_mbox[i]
                ));
            }
        }

        let n = self.msgs.len();
        for (name, table) in [
            ("to", &self.to),
            ("cc", &self.cc),
            ("from", &self.from),
            ("subject", &self.subject),
            ("body", &self.body),
            ("attachment_name", &self.attachment_name),
        ] {
            debug!(table = name, "Checking token table");
            if let Err(reason) = table.check_integrity(n) {
                return fail(format!("{name} table: {reason}"));
            }
        }
        if let Err(reason) = self.msg_ids.check_integrity(n) {
            return fail(format!("msg_ids table: {reason}"));
        }
        Ok(())
    }

    /// The 16/16-bit packed mbox reference caps both the number of mboxen
    /// and the number of messages within one mbox.
    pub fn verify_mbox_size_constraints(&self) -> Result<()> {
        if self.mboxen.len() > MBOX_INDEX_LIMIT {
            return Err(MairixError::Config(format!(
                "too many mboxen (max {MBOX_INDEX_LIMIT}, you have {})",
                self.mboxen.len()
            )));
        }
        for mb in &self.mboxen {
            if mb.msgs.len() > MBOX_INDEX_LIMIT {
                return Err(MairixError::Config(format!(
                    "too many messages in mbox {} (max {MBOX_INDEX_LIMIT}, you have {})",
                    mb.path.as_deref().unwrap_or(Path::new("?")).display(),
                    mb.msgs.len()
                )));
            }
        }
        Ok(())
    }

    /// Rebuild the index without `Dead` entries. Every posting list is
    /// re-encoded through the translation table, empty tokens are removed
    /// (closing probe gaps), the message array is compacted in place, and
    /// dead mboxen are dropped with the surviving ones renumbered.
    ///
    /// Returns true when anything was culled.
    pub fn cull_dead_messages(&mut self, do_integrity_checks: bool) -> Result<bool> {
        if do_integrity_checks {
            self.check_integrity()?;
        }
        debug!("Culling dead messages");

        let mut new_idx = Vec::with_capacity(self.msgs.len());
        let mut next = 0i64;
        let mut any_culled = false;
        for m in &self.msgs {
            if m.is_dead() {
                new_idx.push(-1);
                any_culled = true;
            } else {
                new_idx.push(next);
                next += 1;
            }
        }

        self.to.recode_indices(&new_idx);
        self.cc.recode_indices(&new_idx);
        self.from.recode_indices(&new_idx);
        self.subject.recode_indices(&new_idx);
        self.body.recode_indices(&new_idx);
        self.attachment_name.recode_indices(&new_idx);
        self.msg_ids.recode_indices(&new_idx);

        self.msgs.retain(|m| !m.is_dead());

        self.cull_dead_mboxen();
        Ok(any_culled)
    }

    /// Drop dead mbox descriptors and renumber the survivors, remapping
    /// every mbox-backed message through the translation table.
    fn cull_dead_mboxen(&mut self) {
        if self.mboxen.iter().all(|mb| !mb.is_dead()) {
            return;
        }
        let mut old_to_new = vec![usize::MAX; self.mboxen.len()];
        let mut next = 0;
        for (i, mb) in self.mboxen.iter().enumerate() {
            if !mb.is_dead() {
                old_to_new[i] = next;
                next += 1;
            }
        }
        for m in &mut self.msgs {
            if let MessageSource::Mbox { mbox_index, .. } = &mut m.source {
                debug_assert!(old_to_new[*mbox_index] != usize::MAX);
                *mbox_index = old_to_new[*mbox_index];
            }
        }
        self.mboxen.retain(|mb| !mb.is_dead());
    }
}

/// Split a `0xFF`-terminated posting stream into its encoded bytes and the
/// highest index it reaches.
fn split_terminated(stream: &[u8]) -> (Vec<u8>, Option<u32>) {
    let mut iter = PostingIter::new(stream);
    let mut highest = None;
    for idx in iter.by_ref() {
        highest = Some(idx);
    }
    let len = iter.pos();
    (stream[..len].to_vec(), highest)
}

fn import_posting(
    db_path: &Path,
    text: &str,
    stream: &[u8],
    n_msgs: usize,
) -> Result<PostingList> {
    let (bytes, highest) = split_terminated(stream);
    if let Some(h) = highest {
        if h as usize >= n_msgs {
            return Err(MairixError::corrupt(
                db_path,
                format!("posting for <{text}> reaches {h}, beyond {n_msgs} messages"),
            ));
        }
    }
    Ok(PostingList::from_encoded(bytes, highest.unwrap_or(0)))
}

fn import_table(
    db_path: &Path,
    view: TokTableView<'_>,
    hash_key: u32,
    n_msgs: usize,
    out: &mut TokenTable,
) -> Result<()> {
    let n = view.n();
    *out = TokenTable::with_loaded_capacity(n);
    for i in 0..n {
        let text = view.token_text(i)?;
        let match0 = import_posting(db_path, text, view.postings(i)?, n_msgs)?;
        let token = Token {
            text: text.to_string(),
            hash: token_hash(text.as_bytes(), hash_key),
            match0,
        };
        out.insert_loaded(token)
            .map_err(|reason| MairixError::corrupt(db_path, reason))?;
    }
    Ok(())
}

fn import_table2(
    db_path: &Path,
    view: TokTable2View<'_>,
    hash_key: u32,
    n_msgs: usize,
    out: &mut TokenTable2,
) -> Result<()> {
    let n = view.n();
    *out = TokenTable2::with_loaded_capacity(n);
    for i in 0..n {
        let text = view.token_text(i)?;
        let match0 = import_posting(db_path, text, view.postings0(i)?, n_msgs)?;
        let match1 = import_posting(db_path, text, view.postings1(i)?, n_msgs)?;
        let token = Token2 {
            text: text.to_string(),
            hash: token_hash(text.as_bytes(), hash_key),
            match0,
            match1,
        };
        out.insert_loaded(token)
            .map_err(|reason| MairixError::corrupt(db_path, reason))?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_db() -> Database {
        Database::new(Path::new("/tmp/test.db"))
    }

    #[test]
    fn test_cull_renumbers_postings() {
        let mut db = test_db();
        for i in 0..4u32 {
            db.append_msg(MessageEntry::new_file(
                PathBuf::from(format!("/m/{i}")),
                0,
                100,
            ));
            db.subject.add(i, &format!("word{i}"), db.hash_key);
            db.subject.add(i, "common", db.hash_key);
        }
        db.msgs[1].kill();
        db.msgs[2].kill();

        let culled = db.cull_dead_messages(true).unwrap();
        assert!(culled);
        assert_eq!(db.msgs.len(), 2);

        let common = db.subject.lookup("common", db.hash_key).unwrap();
        assert_eq!(common.match0.iter().collect::<Vec<_>>(), vec![0, 1]);
        assert!(db.subject.lookup("word1", db.hash_key).is_none());
        let word3 = db.subject.lookup("word3", db.hash_key).unwrap();
        assert_eq!(word3.match0.iter().collect::<Vec<_>>(), vec![1]);
        db.check_integrity().unwrap();
    }

    #[test]
    fn test_cull_dead_mboxen_renumbers_messages() {
        let mut db = test_db();
        db.mboxen.push(MboxEntry::new(PathBuf::from("/mb/a"), 0, 0));
        db.mboxen.push(MboxEntry::new(PathBuf::from("/mb/b"), 0, 0));
        db.mboxen[0].deaden();
        db.mboxen[1].msgs.push(MboxMessage {
            start: 0,
            len: 5,
            checksum: [0; 16],
        });
        db.append_msg(MessageEntry::new_mbox(1, 0));

        let culled = db.cull_dead_messages(false).unwrap();
        assert!(!culled); // no dead messages, only a dead mbox
        assert_eq!(db.mboxen.len(), 1);
        match db.msgs[0].source {
            MessageSource::Mbox { mbox_index, .. } => assert_eq!(mbox_index, 0),
            _ => panic!("expected mbox message"),
        }
    }

    #[test]
    fn test_integrity_rejects_duplicate_paths() {
        let mut db = test_db();
        db.append_msg(MessageEntry::new_file(PathBuf::from("/m/same"), 0, 1));
        db.append_msg(MessageEntry::new_file(PathBuf::from("/m/same"), 0, 1));
        assert!(db.check_integrity().is_err());
    }
}

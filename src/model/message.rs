//! Per-message descriptors.
//!
//! Message indices are stable: a slot never moves or changes meaning except
//! during an explicit cull, because the posting lists refer to messages by
//! index.

use std::path::PathBuf;

/// Where the bytes of a message live.
#[derive(Debug, Clone)]
pub enum MessageSource {
    /// One file per message (maildir, MH).
    File {
        path: PathBuf,
        /// mtime of the message file, seconds since the epoch.
        mtime: i64,
        /// Size of the message file in bytes.
        size: u64,
    },
    /// A span inside an mbox file: `(mbox index, message index within it)`.
    Mbox { mbox_index: usize, msg_index: usize },
    /// The message no longer exists. Invisible to searches; the slot is
    /// reclaimed only by an explicit cull.
    Dead,
}

/// The three per-message status flags.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MessageFlags {
    pub seen: bool,
    pub replied: bool,
    pub flagged: bool,
}

/// One slot in the message table.
#[derive(Debug, Clone)]
pub struct MessageEntry {
    pub source: MessageSource,
    /// `Date:` header as seconds since the epoch, 0 when unparseable.
    pub date: i64,
    /// Dense thread id assigned by the thread grouper.
    pub tid: u32,
    pub flags: MessageFlags,
}

impl MessageEntry {
    /// A fresh file-per-message entry. Flags and date are filled in when the
    /// message is scanned.
    pub fn new_file(path: PathBuf, mtime: i64, size: u64) -> Self {
        Self {
            source: MessageSource::File { path, mtime, size },
            date: 0,
            tid: 0,
            flags: MessageFlags::default(),
        }
    }

    /// A fresh mbox-backed entry.
    pub fn new_mbox(mbox_index: usize, msg_index: usize) -> Self {
        Self {
            source: MessageSource::Mbox {
                mbox_index,
                msg_index,
            },
            date: 0,
            tid: 0,
            flags: MessageFlags::default(),
        }
    }

    pub fn is_dead(&self) -> bool {
        matches!(self.source, MessageSource::Dead)
    }

    /// Kill the entry, dropping any owned path.
    pub fn kill(&mut self) {
        self.source = MessageSource::Dead;
    }
}

/// Recover maildir flags from the `:2,<flags>` filename suffix.
///
/// Returns `None` when the path carries no maildir info suffix (e.g. MH
/// messages), leaving whatever flags were parsed from the headers.
pub fn maildir_flags_from_path(path: &std::path::Path) -> Option<MessageFlags> {
    let name = path.file_name()?.to_str()?;
    let (_, suffix) = name.rsplit_once(":2,")?;
    let mut flags = MessageFlags::default();
    for c in suffix.chars() {
        match c {
            'F' => flags.flagged = true,
            'R' => flags.replied = true,
            'S' => flags.seen = true,
            _ => {}
        }
    }
    Some(flags)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::Path;

    #[test]
    fn test_maildir_flags_from_path() {
        let f = maildir_flags_from_path(Path::new("/m/cur/123.host:2,FS")).unwrap();
        assert!(f.flagged && f.seen && !f.replied);

        let f = maildir_flags_from_path(Path::new("/m/cur/123.host:2,")).unwrap();
        assert_eq!(f, MessageFlags::default());

        assert!(maildir_flags_from_path(Path::new("/m/cur/123.host")).is_none());
        assert!(maildir_flags_from_path(Path::new("/mh/45")).is_none());
    }

    #[test]
    fn test_kill_drops_source() {
        let mut e = MessageEntry::new_file(PathBuf::from("/m/new/1"), 10, 100);
        e.kill();
        assert!(e.is_dead());
    }
}

//! Per-mbox descriptors.

use std::path::PathBuf;

/// MD5 digest of the raw bytes of one message as stored in its mbox.
pub type Checksum = [u8; 16];

/// Location and checksum of one message inside an mbox file.
///
/// `start` points at the first header line, not at the `From ` separator;
/// `len` runs up to the byte before the next separator (or end of file) and
/// so includes the terminating newline.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MboxMessage {
    pub start: u64,
    pub len: u64,
    pub checksum: Checksum,
}

/// One slot in the mbox table.
///
/// `path == None` marks the mbox dead: its message list is freed and the
/// descriptor survives only to keep indices stable until the next cull.
#[derive(Debug, Clone, Default)]
pub struct MboxEntry {
    pub path: Option<PathBuf>,
    /// mtime/size recorded in the database at the last successful scan.
    pub file_mtime: i64,
    pub file_size: u64,
    /// mtime/size observed in the filesystem during the current run.
    pub current_mtime: i64,
    pub current_size: u64,
    /// How many of the previously known messages are still byte-identical
    /// at the head of the file. Transient, set during reconciliation.
    pub n_old_msgs_valid: usize,
    /// Known messages, in file order.
    pub msgs: Vec<MboxMessage>,
}

impl MboxEntry {
    /// A newly discovered mbox, not yet scanned.
    pub fn new(path: PathBuf, mtime: i64, size: u64) -> Self {
        Self {
            path: Some(path),
            file_mtime: 0,
            file_size: 0,
            current_mtime: mtime,
            current_size: size,
            n_old_msgs_valid: 0,
            msgs: Vec::new(),
        }
    }

    pub fn is_dead(&self) -> bool {
        self.path.is_none()
    }

    /// Mark the mbox dead and free its message list.
    pub fn deaden(&mut self) {
        self.path = None;
        self.n_old_msgs_valid = 0;
        self.msgs = Vec::new();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_deaden_clears_messages() {
        let mut mb = MboxEntry::new(PathBuf::from("/mail/box"), 5, 10);
        mb.msgs.push(MboxMessage {
            start: 0,
            len: 10,
            checksum: [0; 16],
        });
        mb.deaden();
        assert!(mb.is_dead());
        assert!(mb.msgs.is_empty());
    }
}

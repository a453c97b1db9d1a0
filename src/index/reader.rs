//! Memory-mapped, zero-copy access to an index file.

use std::fs::File;
use std::path::{Path, PathBuf};

use byteorder::{ByteOrder, LittleEndian};
use memmap2::Mmap;

use crate::error::{MairixError, Result};

use super::format::{
    ENDIAN_REVERSED, ENDIAN_SENTINEL, MAGIC, UC_HEADER_LEN, UI_ATTACHMENT_NAME_BASE, UI_BODY_BASE,
    UI_CC_BASE, UI_ENDIAN, UI_FROM_BASE, UI_HASH_KEY, UI_MBOX_CKSUM, UI_MBOX_ENTRIES,
    UI_MBOX_MTIME, UI_MBOX_N, UI_MBOX_PATHS, UI_MBOX_SIZE, UI_MSGID_BASE, UI_MSG_CDATA,
    UI_MSG_DATE, UI_MSG_MTIME, UI_MSG_SIZE, UI_MSG_TID, UI_MSG_TYPE_AND_FLAGS, UI_N_MSGS,
    UI_SUBJECT_BASE, UI_TO_BASE,
};

/// A validated, memory-mapped index file. No data is copied at open time;
/// accessors read straight out of the mapping.
pub struct IndexReader {
    path: PathBuf,
    map: Mmap,
}

/// View over one on-disk word table: a count plus parallel arrays of token
/// text offsets and posting list offsets.
#[derive(Clone, Copy)]
pub struct TokTableView<'a> {
    reader: &'a IndexReader,
    /// Header word index of the table triple.
    base: usize,
}

/// View over the two-chain message-id table.
#[derive(Clone, Copy)]
pub struct TokTable2View<'a> {
    reader: &'a IndexReader,
    base: usize,
}

impl IndexReader {
    /// Open and validate an index file.
    pub fn open(path: &Path) -> Result<Self> {
        let file = File::open(path).map_err(|e| MairixError::index_io(path, e))?;
        // Safety: the mapping is read-only and the file is owned by the
        // process holding the database lock for the duration of the run.
        let map = unsafe { Mmap::map(&file) }.map_err(|e| MairixError::index_io(path, e))?;

        let reader = Self {
            path: path.to_path_buf(),
            map,
        };
        reader.validate()?;
        Ok(reader)
    }

    /// The index file this reader maps.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// A `CorruptDatabase` error tagged with this file's path.
    pub fn corrupt(&self, reason: impl Into<String>) -> MairixError {
        MairixError::corrupt(&self.path, reason)
    }

    fn validate(&self) -> Result<()> {
        if self.map.len() < UC_HEADER_LEN {
            return Err(self.corrupt(format!(
                "file too short ({} bytes, minimum {UC_HEADER_LEN})",
                self.map.len()
            )));
        }
        if self.map[0] != MAGIC[0] || self.map[1] != MAGIC[1] || self.map[2] != MAGIC[2] {
            return Err(self.corrupt("not an index file (bad magic)"));
        }
        if self.map[3] != MAGIC[3] {
            return Err(self.corrupt(format!(
                "schema version mismatch (found 0x{:02x}, want 0x{:02x}); please rebuild",
                self.map[3], MAGIC[3]
            )));
        }
        match self.word(UI_ENDIAN) {
            ENDIAN_SENTINEL => {}
            ENDIAN_REVERSED => {
                return Err(self.corrupt("file written with reversed endianness"));
            }
            other => {
                return Err(self.corrupt(format!("bad endianness sentinel 0x{other:08x}")));
            }
        }

        let n_msgs = self.n_msgs();
        let n_mboxen = self.n_mboxen();
        self.check_byte_table(self.word(UI_MSG_TYPE_AND_FLAGS) as usize, n_msgs)?;
        for slot in [UI_MSG_CDATA, UI_MSG_MTIME, UI_MSG_SIZE, UI_MSG_DATE, UI_MSG_TID] {
            self.check_word_table(self.word(slot) as usize, n_msgs)?;
        }
        for slot in [
            UI_MBOX_PATHS,
            UI_MBOX_ENTRIES,
            UI_MBOX_MTIME,
            UI_MBOX_SIZE,
            UI_MBOX_CKSUM,
        ] {
            self.check_word_table(self.word(slot) as usize, n_mboxen)?;
        }
        for base in [
            UI_TO_BASE,
            UI_CC_BASE,
            UI_FROM_BASE,
            UI_SUBJECT_BASE,
            UI_BODY_BASE,
            UI_ATTACHMENT_NAME_BASE,
        ] {
            let n = self.word(base) as usize;
            self.check_word_table(self.word(base + 1) as usize, n)?;
            self.check_word_table(self.word(base + 2) as usize, n)?;
        }
        let n = self.word(UI_MSGID_BASE) as usize;
        for off in 1..=3 {
            self.check_word_table(self.word(UI_MSGID_BASE + off) as usize, n)?;
        }
        Ok(())
    }

    /// A word-offset table of `count` u32s must lie inside the file.
    fn check_word_table(&self, word_offset: usize, count: usize) -> Result<()> {
        let end = (word_offset + count) * 4;
        if end > self.map.len() {
            return Err(self.corrupt(format!(
                "table at word {word_offset} ({count} entries) runs past end of file"
            )));
        }
        Ok(())
    }

    fn check_byte_table(&self, byte_offset: usize, count: usize) -> Result<()> {
        if byte_offset + count > self.map.len() {
            return Err(self.corrupt(format!(
                "byte table at {byte_offset} ({count} entries) runs past end of file"
            )));
        }
        Ok(())
    }

    /// Read the 32-bit word at word index `i`.
    pub fn word(&self, i: usize) -> u32 {
        LittleEndian::read_u32(&self.map[i * 4..i * 4 + 4])
    }

    /// Element `i` of the word table whose word offset is stored in header
    /// slot `header_slot`.
    fn table_word(&self, header_slot: usize, i: usize) -> u32 {
        self.word(self.word(header_slot) as usize + i)
    }

    pub fn n_msgs(&self) -> usize {
        self.word(UI_N_MSGS) as usize
    }

    pub fn hash_key(&self) -> u32 {
        self.word(UI_HASH_KEY)
    }

    /// The full type-and-flags byte for message `i`.
    pub fn msg_type_and_flags(&self, i: usize) -> u8 {
        self.map[self.word(UI_MSG_TYPE_AND_FLAGS) as usize + i]
    }

    /// The message type (low three bits of the type byte).
    pub fn msg_type(&self, i: usize) -> u8 {
        self.msg_type_and_flags(i) & 0x7
    }

    /// Path string offset (file messages) or packed mbox indices (mbox
    /// messages).
    pub fn msg_cdata(&self, i: usize) -> u32 {
        self.table_word(UI_MSG_CDATA, i)
    }

    /// File mtime (file messages) or start offset in the mbox.
    pub fn msg_mtime(&self, i: usize) -> u32 {
        self.table_word(UI_MSG_MTIME, i)
    }

    /// File size (file messages) or byte length in the mbox.
    pub fn msg_size(&self, i: usize) -> u32 {
        self.table_word(UI_MSG_SIZE, i)
    }

    pub fn msg_date(&self, i: usize) -> u32 {
        self.table_word(UI_MSG_DATE, i)
    }

    pub fn msg_tid(&self, i: usize) -> u32 {
        self.table_word(UI_MSG_TID, i)
    }

    pub fn n_mboxen(&self) -> usize {
        self.word(UI_MBOX_N) as usize
    }

    /// Byte offset of the mbox path string; 0 marks a dead mbox.
    pub fn mbox_path_offset(&self, i: usize) -> u32 {
        self.table_word(UI_MBOX_PATHS, i)
    }

    pub fn mbox_entries(&self, i: usize) -> u32 {
        self.table_word(UI_MBOX_ENTRIES, i)
    }

    pub fn mbox_mtime(&self, i: usize) -> u32 {
        self.table_word(UI_MBOX_MTIME, i)
    }

    pub fn mbox_size(&self, i: usize) -> u32 {
        self.table_word(UI_MBOX_SIZE, i)
    }

    pub fn mbox_checksum_offset(&self, i: usize) -> u32 {
        self.table_word(UI_MBOX_CKSUM, i)
    }

    /// The byte slice from `byte_offset` to the end of the file.
    pub fn bytes_at(&self, byte_offset: usize) -> Result<&[u8]> {
        self.map
            .get(byte_offset..)
            .ok_or_else(|| self.corrupt(format!("offset {byte_offset} outside file")))
    }

    /// A NUL-terminated string in the character region.
    pub fn string_at(&self, byte_offset: usize) -> Result<&str> {
        let tail = self.bytes_at(byte_offset)?;
        let end = memchr::memchr(0, tail)
            .ok_or_else(|| self.corrupt(format!("unterminated string at {byte_offset}")))?;
        std::str::from_utf8(&tail[..end])
            .map_err(|_| self.corrupt(format!("invalid UTF-8 string at {byte_offset}")))
    }

    pub fn to_table(&self) -> TokTableView<'_> {
        TokTableView {
            reader: self,
            base: UI_TO_BASE,
        }
    }

    pub fn cc_table(&self) -> TokTableView<'_> {
        TokTableView {
            reader: self,
            base: UI_CC_BASE,
        }
    }

    pub fn from_table(&self) -> TokTableView<'_> {
        TokTableView {
            reader: self,
            base: UI_FROM_BASE,
        }
    }

    pub fn subject_table(&self) -> TokTableView<'_> {
        TokTableView {
            reader: self,
            base: UI_SUBJECT_BASE,
        }
    }

    pub fn body_table(&self) -> TokTableView<'_> {
        TokTableView {
            reader: self,
            base: UI_BODY_BASE,
        }
    }

    pub fn attachment_name_table(&self) -> TokTableView<'_> {
        TokTableView {
            reader: self,
            base: UI_ATTACHMENT_NAME_BASE,
        }
    }

    pub fn msg_ids_table(&self) -> TokTable2View<'_> {
        TokTable2View {
            reader: self,
            base: UI_MSGID_BASE,
        }
    }
}

impl<'a> TokTableView<'a> {
    pub fn n(&self) -> usize {
        self.reader.word(self.base) as usize
    }

    /// Token text of entry `i`.
    pub fn token_text(&self, i: usize) -> Result<&'a str> {
        let off = self.reader.table_word(self.base + 1, i) as usize;
        self.reader.string_at(off)
    }

    /// The `0xFF`-terminated posting byte stream of entry `i`.
    pub fn postings(&self, i: usize) -> Result<&'a [u8]> {
        let off = self.reader.table_word(self.base + 2, i) as usize;
        self.reader.bytes_at(off)
    }
}

impl<'a> TokTable2View<'a> {
    pub fn n(&self) -> usize {
        self.reader.word(self.base) as usize
    }

    pub fn token_text(&self, i: usize) -> Result<&'a str> {
        let off = self.reader.table_word(self.base + 1, i) as usize;
        self.reader.string_at(off)
    }

    /// Chain 0: every message-id seen.
    pub fn postings0(&self, i: usize) -> Result<&'a [u8]> {
        let off = self.reader.table_word(self.base + 2, i) as usize;
        self.reader.bytes_at(off)
    }

    /// Chain 1: ids from `Message-ID:` headers only.
    pub fn postings1(&self, i: usize) -> Result<&'a [u8]> {
        let off = self.reader.table_word(self.base + 3, i) as usize;
        self.reader.bytes_at(off)
    }
}

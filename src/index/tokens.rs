//! Open-addressed token tables.
//!
//! Each table maps lowercased token text to one posting list (word tables)
//! or two (the message-id table, whose chain 0 holds every id seen and
//! chain 1 only ids from `Message-ID:` headers). Tables are insert-only
//! between rebuilds; deletion happens only in the cull pass, which closes
//! probe gaps afterwards so every surviving token stays reachable from its
//! natural bucket.

use super::postings::PostingList;

/// Initial table size on first insertion. Always a power of two.
const INITIAL_SIZE: usize = 1024;

/// Seeded 32-bit hash over the lowercased token bytes (Jenkins
/// one-at-a-time). The seed is the database `hash_key`, chosen at random
/// when the database is created so crafted messages cannot degenerate the
/// tables.
pub fn token_hash(data: &[u8], key: u32) -> u32 {
    let mut h = key;
    for &b in data {
        h = h.wrapping_add(b as u32);
        h = h.wrapping_add(h << 10);
        h ^= h >> 6;
    }
    h = h.wrapping_add(h << 3);
    h ^= h >> 11;
    h = h.wrapping_add(h << 15);
    h
}

/// A word-table record: text, retained hash, one posting chain.
#[derive(Debug, Clone)]
pub struct Token {
    pub text: String,
    pub hash: u32,
    pub match0: PostingList,
}

/// A message-id record: text, retained hash, two posting chains.
#[derive(Debug, Clone)]
pub struct Token2 {
    pub text: String,
    pub hash: u32,
    pub match0: PostingList,
    pub match1: PostingList,
}

/// Behaviour shared by the two record shapes.
pub trait TokenRecord {
    fn new(text: String, hash: u32) -> Self;
    fn text(&self) -> &str;
    fn hash(&self) -> u32;
    /// Visit every posting chain of the record.
    fn for_each_chain(&self, f: impl FnMut(&PostingList));
    /// Re-encode every chain through the index translation; returns true
    /// when all chains came out empty (the record is dead).
    fn recode(&mut self, new_idx: &[i64]) -> bool;
}

impl TokenRecord for Token {
    fn new(text: String, hash: u32) -> Self {
        Self {
            text,
            hash,
            match0: PostingList::new(),
        }
    }

    fn text(&self) -> &str {
        &self.text
    }

    fn hash(&self) -> u32 {
        self.hash
    }

    fn for_each_chain(&self, mut f: impl FnMut(&PostingList)) {
        f(&self.match0);
    }

    fn recode(&mut self, new_idx: &[i64]) -> bool {
        self.match0 = recode_postings(&self.match0, new_idx);
        self.match0.is_empty()
    }
}

impl TokenRecord for Token2 {
    fn new(text: String, hash: u32) -> Self {
        Self {
            text,
            hash,
            match0: PostingList::new(),
            match1: PostingList::new(),
        }
    }

    fn text(&self) -> &str {
        &self.text
    }

    fn hash(&self) -> u32 {
        self.hash
    }

    fn for_each_chain(&self, mut f: impl FnMut(&PostingList)) {
        f(&self.match0);
        f(&self.match1);
    }

    fn recode(&mut self, new_idx: &[i64]) -> bool {
        self.match0 = recode_postings(&self.match0, new_idx);
        self.match1 = recode_postings(&self.match1, new_idx);
        self.match0.is_empty() && self.match1.is_empty()
    }
}

/// Decode a posting list and re-encode it through `new_idx` (`-1` drops the
/// entry).
fn recode_postings(old: &PostingList, new_idx: &[i64]) -> PostingList {
    let mut fresh = PostingList::new();
    for idx in old.iter() {
        let mapped = new_idx[idx as usize];
        if mapped >= 0 {
            fresh.insert(mapped as u32);
        }
    }
    fresh
}

/// Open-addressed hash table with linear probing; size always a power of
/// two, load held below 3/8.
#[derive(Debug, Clone)]
pub struct Table<T> {
    slots: Vec<Option<T>>,
    n: usize,
    hwm: usize,
}

pub type TokenTable = Table<Token>;
pub type TokenTable2 = Table<Token2>;

impl<T: TokenRecord> Default for Table<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: TokenRecord> Table<T> {
    pub fn new() -> Self {
        Self {
            slots: Vec::new(),
            n: 0,
            hwm: 0,
        }
    }

    /// Table sized for a bulk load of `n` records with headroom to grow:
    /// twice the next power of two at or above `n`.
    pub fn with_loaded_capacity(n: usize) -> Self {
        let mut size = 1;
        while size < n.max(1) {
            size <<= 1;
        }
        size <<= 1;
        Self {
            slots: std::iter::repeat_with(|| None).take(size).collect(),
            n: 0,
            hwm: (n + size) >> 1,
        }
    }

    /// Number of records in use.
    pub fn len(&self) -> usize {
        self.n
    }

    pub fn is_empty(&self) -> bool {
        self.n == 0
    }

    fn mask(&self) -> usize {
        self.slots.len() - 1
    }

    /// Double the table (or make the initial allocation), reinserting the
    /// survivors in table order using their retained hash values.
    fn enlarge(&mut self) {
        if self.slots.is_empty() {
            self.slots = std::iter::repeat_with(|| None).take(INITIAL_SIZE).collect();
        } else {
            let old: Vec<Option<T>> = std::mem::take(&mut self.slots);
            self.slots = std::iter::repeat_with(|| None).take(old.len() << 1).collect();
            let mask = self.mask();
            for rec in old.into_iter().flatten() {
                let mut index = rec.hash() as usize & mask;
                while self.slots[index].is_some() {
                    index = (index + 1) & mask;
                }
                self.slots[index] = Some(rec);
            }
        }
        // allow 3/8 of the slots to be used
        self.hwm = (self.slots.len() >> 2) + (self.slots.len() >> 3);
    }

    /// Probe from the natural bucket to the slot holding `text`, or to the
    /// first empty slot.
    fn probe(&self, text: &str, hash: u32) -> usize {
        let mask = self.mask();
        let mut index = hash as usize & mask;
        while let Some(rec) = &self.slots[index] {
            if rec.text() == text {
                return index;
            }
            index = (index + 1) & mask;
        }
        index
    }

    /// Find the record for `text` (already lowercased), inserting an empty
    /// one if absent. `hash` must be `token_hash(text, hash_key)`.
    fn find_or_insert(&mut self, text: &str, hash: u32) -> &mut T {
        if self.n >= self.hwm {
            self.enlarge();
        }
        let index = self.probe(text, hash);
        if self.slots[index].is_none() {
            self.slots[index] = Some(T::new(text.to_string(), hash));
            self.n += 1;
        }
        self.slots[index].as_mut().expect("slot just filled")
    }

    /// Insert a fully built record during a database load. Fails on
    /// duplicated token text, which indicates a corrupt file.
    pub fn insert_loaded(&mut self, rec: T) -> Result<(), String> {
        let mask = self.mask();
        let mut index = rec.hash() as usize & mask;
        while let Some(existing) = &self.slots[index] {
            if existing.text() == rec.text() {
                return Err(format!("token <{}> duplicated", rec.text()));
            }
            index = (index + 1) & mask;
        }
        self.slots[index] = Some(rec);
        self.n += 1;
        Ok(())
    }

    /// Exact lookup by (lowercased) text.
    pub fn lookup(&self, text: &str, hash_key: u32) -> Option<&T> {
        if self.slots.is_empty() {
            return None;
        }
        let index = self.probe(text, token_hash(text.as_bytes(), hash_key));
        self.slots[index].as_ref().filter(|rec| rec.text() == text)
    }

    /// Records in table order (the order they are written to disk).
    pub fn iter(&self) -> impl Iterator<Item = &T> + Clone {
        self.slots.iter().flatten()
    }

    /// Remap every posting list through `new_idx`, dropping records whose
    /// chains all become empty, then close probe gaps so the survivors
    /// remain reachable from their natural buckets.
    pub fn recode_indices(&mut self, new_idx: &[i64]) {
        let mut any_dead = false;
        for slot in self.slots.iter_mut() {
            if let Some(rec) = slot {
                if rec.recode(new_idx) {
                    *slot = None;
                    self.n -= 1;
                    any_dead = true;
                }
            }
        }
        if any_dead {
            self.close_gaps();
        }
    }

    /// Iteratively move displaced records towards their natural buckets
    /// until a pass makes no move. Restores the invariant that the probe
    /// sequence from the natural bucket to the occupied slot has no holes.
    fn close_gaps(&mut self) {
        let mask = self.mask();
        loop {
            let mut any_moved = false;
            for i in 0..self.slots.len() {
                let Some(rec) = &self.slots[i] else { continue };
                let natural = rec.hash() as usize & mask;
                if natural == i {
                    continue;
                }
                let mut j = natural;
                while j != i {
                    if self.slots[j].is_none() {
                        self.slots[j] = self.slots[i].take();
                        any_moved = true;
                        break;
                    }
                    j = (j + 1) & mask;
                }
            }
            if !any_moved {
                break;
            }
        }
    }

    /// Verify the table invariants: ascending postings whose decoded end
    /// matches the recorded highest index, `highest < n_msgs`, no duplicate
    /// texts, and probe-chain reachability for every record.
    pub fn check_integrity(&self, n_msgs: usize) -> Result<(), String> {
        let mut texts = std::collections::HashSet::new();
        if self.slots.is_empty() {
            return Ok(());
        }
        let mask = self.mask();
        for (i, slot) in self.slots.iter().enumerate() {
            let Some(rec) = slot else { continue };

            let mut check_chain = |m: &PostingList| -> Result<(), String> {
                let mut last: Option<u32> = None;
                for idx in m.iter() {
                    if let Some(prev) = last {
                        if idx <= prev {
                            return Err(format!(
                                "posting list for <{}> is not strictly ascending",
                                rec.text()
                            ));
                        }
                    }
                    last = Some(idx);
                }
                if let Some(end) = last {
                    if end != m.highest() {
                        return Err(format!(
                            "broken posting chain for <{}>: decoded end {} != highest {}",
                            rec.text(),
                            end,
                            m.highest()
                        ));
                    }
                    if end as usize >= n_msgs {
                        return Err(format!(
                            "posting for <{}> references message {} beyond {}",
                            rec.text(),
                            end,
                            n_msgs
                        ));
                    }
                }
                Ok(())
            };
            let mut chain_result = Ok(());
            rec.for_each_chain(|m| {
                if chain_result.is_ok() {
                    chain_result = check_chain(m);
                }
            });
            chain_result?;

            if !texts.insert(rec.text().to_string()) {
                return Err(format!("token <{}> duplicated", rec.text()));
            }

            let mut j = rec.hash() as usize & mask;
            while j != i {
                if self.slots[j].is_none() {
                    return Err(format!(
                        "token <{}> unreachable: hole in probe chain at {}",
                        rec.text(),
                        j
                    ));
                }
                j = (j + 1) & mask;
            }
        }
        Ok(())
    }
}

impl TokenTable {
    /// Record that message `idx` contains `text`. The text is ASCII
    /// case-folded before hashing and insertion.
    pub fn add(&mut self, idx: u32, text: &str, hash_key: u32) {
        let lower = text.to_ascii_lowercase();
        let hash = token_hash(lower.as_bytes(), hash_key);
        let rec = self.find_or_insert(&lower, hash);
        rec.match0.insert(idx);
    }
}

impl TokenTable2 {
    /// Record `text` in chain 0 and, when `also_chain1` is set, in chain 1.
    pub fn add2(&mut self, idx: u32, text: &str, hash_key: u32, also_chain1: bool) {
        let lower = text.to_ascii_lowercase();
        let hash = token_hash(lower.as_bytes(), hash_key);
        let rec = self.find_or_insert(&lower, hash);
        rec.match0.insert(idx);
        if also_chain1 {
            rec.match1.insert(idx);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const KEY: u32 = 0xdeadbeef;

    #[test]
    fn test_add_lowercases_and_dedups() {
        let mut t = TokenTable::new();
        t.add(0, "Alpha", KEY);
        t.add(0, "ALPHA", KEY);
        t.add(1, "alpha", KEY);
        assert_eq!(t.len(), 1);
        let rec = t.lookup("alpha", KEY).unwrap();
        assert_eq!(rec.match0.iter().collect::<Vec<_>>(), vec![0, 1]);
        assert!(t.lookup("beta", KEY).is_none());
    }

    #[test]
    fn test_growth_preserves_lookup() {
        let mut t = TokenTable::new();
        // 3/8 of 1024 = 384; push past the high-water mark.
        for i in 0..500u32 {
            t.add(i, &format!("token{i}"), KEY);
        }
        assert_eq!(t.len(), 500);
        for i in (0..500u32).step_by(17) {
            let rec = t.lookup(&format!("token{i}"), KEY).unwrap();
            assert_eq!(rec.match0.iter().next(), Some(i));
        }
        t.check_integrity(500).unwrap();
    }

    #[test]
    fn test_chain1_subset() {
        let mut t = TokenTable2::new();
        t.add2(0, "a@x", KEY, true);
        t.add2(1, "a@x", KEY, false);
        let rec = t.lookup("a@x", KEY).unwrap();
        assert_eq!(rec.match0.iter().collect::<Vec<_>>(), vec![0, 1]);
        assert_eq!(rec.match1.iter().collect::<Vec<_>>(), vec![0]);
    }

    #[test]
    fn test_recode_drops_and_closes_gaps() {
        let mut t = TokenTable::new();
        for i in 0..40u32 {
            t.add(i, &format!("word{i}"), KEY);
        }
        // Kill even-indexed messages: tokens word0, word2, ... die.
        let new_idx: Vec<i64> = (0..40i64)
            .map(|i| if i % 2 == 1 { i / 2 } else { -1 })
            .collect();
        t.recode_indices(&new_idx);
        assert_eq!(t.len(), 20);
        for i in (1..40u32).step_by(2) {
            let rec = t
                .lookup(&format!("word{i}"), KEY)
                .unwrap_or_else(|| panic!("word{i} lost after recode"));
            assert_eq!(rec.match0.iter().collect::<Vec<_>>(), vec![i / 2]);
        }
        t.check_integrity(20).unwrap();
    }

    #[test]
    fn test_insert_loaded_detects_duplicates() {
        let mut t = TokenTable::with_loaded_capacity(2);
        let mk = |text: &str| Token::new(text.to_string(), token_hash(text.as_bytes(), KEY));
        t.insert_loaded(mk("x")).unwrap();
        assert!(t.insert_loaded(mk("x")).is_err());
    }
}

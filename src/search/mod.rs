//! Query evaluation over a mapped index.
//!
//! Arguments are AND-combined; within one argument, comma-separated terms
//! OR together. Evaluation keeps one boolean per message at each level:
//! `hit0` collects the matches of a single term, `hit1` applies negation,
//! `hit2` accumulates the OR across terms, and `hit3` is the running AND
//! across arguments.

pub mod dates;
pub mod matcher;
pub mod output;
pub mod query;

use std::io::Write;
use std::path::Path;

use tracing::info;

use crate::error::Result;
use crate::index::format::{decode_mbox_indices, DB_MSG_DEAD, DB_MSG_FILE, DB_MSG_MBOX,
    FLAG_FLAGGED, FLAG_REPLIED, FLAG_SEEN};
use crate::index::postings::PostingIter;
use crate::index::reader::{IndexReader, TokTableView};

use matcher::PatternMatcher;
use output::{materialise, prepare_folder, OutputFormat};
use query::{parse_arg, parse_flag_expr, parse_size_range, FieldSet, Payload, Term};

/// Options carried from the command line into one search run.
#[derive(Debug, Clone, Copy, Default)]
pub struct SearchOptions {
    /// Expand the hit set to whole threads.
    pub threads: bool,
    /// Add to the output folder instead of clearing it first.
    pub augment: bool,
    /// Hard-link instead of symlinking into maildir/MH output.
    pub hardlinks: bool,
}

/// Merge the postings of a matched token into the per-term hit vector.
fn mark_hits(db: &IndexReader, stream: &[u8], hits: &mut [bool]) -> Result<()> {
    let n_msgs = db.n_msgs();
    for idx in PostingIter::new(stream) {
        let idx = idx as usize;
        if idx >= n_msgs {
            return Err(db.corrupt(format!("posting index {idx} out of range")));
        }
        hits[idx] = true;
    }
    Ok(())
}

/// Exact token lookup: the on-disk tables are unsorted, so scan.
fn match_string_in_table(
    db: &IndexReader,
    view: TokTableView<'_>,
    key: &str,
    hits: &mut [bool],
) -> Result<()> {
    for i in 0..view.n() {
        if view.token_text(i)? == key {
            mark_hits(db, view.postings(i)?, hits)?;
        }
    }
    Ok(())
}

fn match_substring_in_table(
    db: &IndexReader,
    view: TokTableView<'_>,
    matcher: &PatternMatcher,
    hits: &mut [bool],
) -> Result<()> {
    for i in 0..view.n() {
        if matcher.matches(view.token_text(i)?.as_bytes()) {
            mark_hits(db, view.postings(i)?, hits)?;
        }
    }
    Ok(())
}

/// Substring-match against message paths (mbox messages match on their
/// mbox's path). Case-sensitive, unlike token matching.
fn match_substring_in_paths(
    db: &IndexReader,
    matcher: &PatternMatcher,
    hits: &mut [bool],
) -> Result<()> {
    for i in 0..db.n_msgs() {
        let token = match db.msg_type(i) {
            DB_MSG_FILE => db.string_at(db.msg_cdata(i) as usize)?,
            DB_MSG_MBOX => {
                let (mbi, _) = decode_mbox_indices(db.msg_cdata(i));
                db.string_at(db.mbox_path_offset(mbi) as usize)?
            }
            _ => continue,
        };
        if matcher.matches(token.as_bytes()) {
            hits[i] = true;
        }
    }
    Ok(())
}

/// Evaluate one term over the selected word tables into `hit0`.
fn eval_term(db: &IndexReader, fields: &FieldSet, term: &Term, hit0: &mut [bool]) -> Result<()> {
    // Tokens are stored lowercased; path matching is the exception and
    // stays case-sensitive.
    let lower = term.word.to_ascii_lowercase();

    if let Some(max_errors) = term.max_errors {
        let matcher = PatternMatcher::new(lower.as_bytes(), max_errors, term.left_anchor)?;
        if fields.to {
            match_substring_in_table(db, db.to_table(), &matcher, hit0)?;
        }
        if fields.cc {
            match_substring_in_table(db, db.cc_table(), &matcher, hit0)?;
        }
        if fields.from {
            match_substring_in_table(db, db.from_table(), &matcher, hit0)?;
        }
        if fields.subject {
            match_substring_in_table(db, db.subject_table(), &matcher, hit0)?;
        }
        if fields.body {
            match_substring_in_table(db, db.body_table(), &matcher, hit0)?;
        }
        if fields.attachment_name {
            match_substring_in_table(db, db.attachment_name_table(), &matcher, hit0)?;
        }
        if fields.path {
            let path_matcher =
                PatternMatcher::new(term.word.as_bytes(), max_errors, term.left_anchor)?;
            match_substring_in_paths(db, &path_matcher, hit0)?;
        }
    } else {
        if fields.to {
            match_string_in_table(db, db.to_table(), &lower, hit0)?;
        }
        if fields.cc {
            match_string_in_table(db, db.cc_table(), &lower, hit0)?;
        }
        if fields.from {
            match_string_in_table(db, db.from_table(), &lower, hit0)?;
        }
        if fields.subject {
            match_string_in_table(db, db.subject_table(), &lower, hit0)?;
        }
        if fields.body {
            match_string_in_table(db, db.body_table(), &lower, hit0)?;
        }
        if fields.attachment_name {
            match_string_in_table(db, db.attachment_name_table(), &lower, hit0)?;
        }
        if fields.path {
            let path_matcher = PatternMatcher::new(term.word.as_bytes(), 0, term.left_anchor)?;
            match_substring_in_paths(db, &path_matcher, hit0)?;
        }
    }
    Ok(())
}

fn find_date_matches(db: &IndexReader, expr: &str, hit0: &mut [bool]) -> Result<()> {
    let (mut start, mut end) = dates::scan_date_string(expr)?;
    if let (Some(s), Some(e)) = (start, end) {
        if s > e {
            // Allow the endpoints in backwards order.
            (start, end) = (Some(e), Some(s));
        }
    }
    for (i, hit) in hit0.iter_mut().enumerate() {
        let date = db.msg_date(i) as i64;
        let start_cond = start.map(|s| date > s).unwrap_or(true);
        let end_cond = end.map(|e| date < e).unwrap_or(true);
        if start_cond && end_cond {
            *hit = true;
        }
    }
    Ok(())
}

fn find_size_matches(db: &IndexReader, expr: &str, hit0: &mut [bool]) -> Result<()> {
    let (mut start, mut end) = parse_size_range(expr)?;
    if let (Some(s), Some(e)) = (start, end) {
        if s > e {
            (start, end) = (Some(e), Some(s));
        }
    }
    for (i, hit) in hit0.iter_mut().enumerate() {
        let size = db.msg_size(i) as i64;
        let start_cond = start.map(|s| size > s).unwrap_or(true);
        let end_cond = end.map(|e| size < e).unwrap_or(true);
        if start_cond && end_cond {
            *hit = true;
        }
    }
    Ok(())
}

fn find_flag_matches(db: &IndexReader, expr: &str, hit0: &mut [bool]) -> Result<()> {
    let filter = parse_flag_expr(expr)?;
    for (i, hit) in hit0.iter_mut().enumerate() {
        let b = db.msg_type_and_flags(i);
        let seen = b & FLAG_SEEN != 0;
        let replied = b & FLAG_REPLIED != 0;
        let flagged = b & FLAG_FLAGGED != 0;
        if (!filter.pos_seen || seen)
            && (!filter.neg_seen || !seen)
            && (!filter.pos_replied || replied)
            && (!filter.neg_replied || !replied)
            && (!filter.pos_flagged || flagged)
            && (!filter.neg_flagged || !flagged)
        {
            *hit = true;
        }
    }
    Ok(())
}

/// Exact lookup in message-id chain 1.
fn find_msgid_matches(db: &IndexReader, word: &str, hit0: &mut [bool]) -> Result<()> {
    let key = word.to_ascii_lowercase();
    let view = db.msg_ids_table();
    for i in 0..view.n() {
        if view.token_text(i)? == key {
            mark_hits(db, view.postings1(i)?, hit0)?;
        }
    }
    Ok(())
}

/// Compute the hit bitmap for a whole query.
pub fn evaluate(db: &IndexReader, args: &[String], expand_threads: bool) -> Result<Vec<bool>> {
    let n = db.n_msgs();
    let mut hit3 = vec![true; n];

    for arg in args {
        let payload = parse_arg(arg)?;
        let mut hit2 = vec![false; n];

        match &payload {
            Payload::Date(expr) => {
                let mut hit1 = vec![false; n];
                find_date_matches(db, expr, &mut hit1)?;
                or_into(&mut hit2, &hit1);
            }
            Payload::Size(expr) => {
                let mut hit1 = vec![false; n];
                find_size_matches(db, expr, &mut hit1)?;
                or_into(&mut hit2, &hit1);
            }
            Payload::Flags(expr) => {
                let mut hit1 = vec![false; n];
                find_flag_matches(db, expr, &mut hit1)?;
                or_into(&mut hit2, &hit1);
            }
            Payload::MsgId(word) => {
                let mut hit1 = vec![false; n];
                find_msgid_matches(db, word, &mut hit1)?;
                or_into(&mut hit2, &hit1);
            }
            Payload::Words(fields, terms) => {
                for term in terms {
                    let mut hit1 = vec![true; n];
                    let mut hit0 = vec![false; n];
                    eval_term(db, fields, term, &mut hit0)?;
                    for i in 0..n {
                        if term.negate {
                            hit1[i] &= !hit0[i];
                        } else {
                            hit1[i] &= hit0[i];
                        }
                    }
                    or_into(&mut hit2, &hit1);
                }
            }
        }

        for i in 0..n {
            hit3[i] &= hit2[i];
        }
    }

    if expand_threads {
        expand_to_threads(db, &mut hit3);
    }

    // Dead slots never surface.
    for i in 0..n {
        if db.msg_type(i) == DB_MSG_DEAD {
            hit3[i] = false;
        }
    }
    Ok(hit3)
}

fn or_into(dst: &mut [bool], src: &[bool]) {
    for (d, s) in dst.iter_mut().zip(src) {
        *d |= s;
    }
}

/// Set every message whose thread contains a hit.
fn expand_to_threads(db: &IndexReader, hits: &mut [bool]) {
    let n = db.n_msgs();
    let mut tids = vec![false; n];
    for i in 0..n {
        if hits[i] {
            tids[db.msg_tid(i) as usize] = true;
        }
    }
    for (i, hit) in hits.iter_mut().enumerate() {
        if tids[db.msg_tid(i) as usize] {
            *hit = true;
        }
    }
}

/// Run a whole search: open the index, evaluate, prepare the output folder
/// and materialise the hits. Returns the process exit code (0 for at least
/// one hit, 1 for none).
pub fn search_top(
    database_path: &Path,
    args: &[String],
    output_path: &Path,
    format: OutputFormat,
    opts: SearchOptions,
    out: &mut dyn Write,
) -> Result<i32> {
    let db = IndexReader::open(database_path)?;

    prepare_folder(format, output_path, opts.augment)?;

    let hits = evaluate(&db, args, opts.threads)?;
    let stats = materialise(&db, &hits, format, output_path, opts.hardlinks, out)?;

    if format != OutputFormat::Raw && format != OutputFormat::Excerpt {
        let _ = writeln!(out, "Matched {} messages", stats.n_hits);
    }
    if stats.had_failed_checksum {
        info!(
            "Matches were found in mbox folders but the message checksums failed; \
             reindex and repeat the search"
        );
        eprintln!(
            "WARNING:\n\
             Matches were found in mbox folders but the message checksums failed.\n\
             You may need to run mairix in indexing mode then repeat your search."
        );
    }

    Ok(if stats.n_hits == 0 { 1 } else { 0 })
}

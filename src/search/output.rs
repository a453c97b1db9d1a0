//! Materialise search hits as a virtual folder: maildir/MH links, a
//! concatenated mbox, raw paths, or header excerpts.

use std::fs::{self, File};
use std::io::Write;
use std::path::Path;

use chrono::{TimeZone, Utc};
use tracing::{debug, warn};

use crate::error::{MairixError, Result};
use crate::index::format::{decode_mbox_indices, DB_MSG_FILE, DB_MSG_MBOX, FLAG_FLAGGED,
    FLAG_REPLIED, FLAG_SEEN};
use crate::index::mboxscan::compute_checksum;
use crate::index::IndexReader;
use crate::parser;

/// The synthetic separator used when hits are concatenated into an mbox;
/// we do not know the envelope sender, so the line is artificial anyway.
const MBOX_FROM_LINE: &str = "From mairix@mairix Mon Jan  1 12:34:56 1970\n";

/// Supported result views.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputFormat {
    Maildir,
    Mh,
    Mbox,
    Raw,
    Excerpt,
}

impl OutputFormat {
    pub fn from_name(name: &str) -> Result<Self> {
        match name {
            "maildir" => Ok(Self::Maildir),
            "mh" => Ok(Self::Mh),
            "mbox" => Ok(Self::Mbox),
            "raw" => Ok(Self::Raw),
            "excerpt" => Ok(Self::Excerpt),
            other => Err(MairixError::Config(format!("unrecognized mformat <{other}>"))),
        }
    }
}

/// Outcome of one materialisation pass.
#[derive(Debug, Default)]
pub struct MaterialiseStats {
    pub n_hits: usize,
    /// Set when an mbox-backed hit failed its checksum; the user needs to
    /// reindex and search again.
    pub had_failed_checksum: bool,
}

/// If `path` exists as a non-directory, remove it; then make sure the
/// directory exists.
fn ensure_dir(path: &Path) -> Result<()> {
    match fs::symlink_metadata(path) {
        Ok(meta) if meta.is_dir() => return Ok(()),
        Ok(_) => {
            fs::remove_file(path).map_err(|e| MairixError::source_io(path, e))?;
        }
        Err(_) => {}
    }
    fs::create_dir_all(path).map_err(|e| MairixError::source_io(path, e))?;
    debug!(path = %path.display(), "Created directory");
    Ok(())
}

/// Remove symlinks and regular files from one maildir subfolder.
fn clear_maildir_subfolder(path: &Path, subdir: &str) {
    let dir = path.join(subdir);
    let Ok(entries) = fs::read_dir(&dir) else {
        return;
    };
    for entry in entries.flatten() {
        let p = entry.path();
        if let Ok(meta) = fs::symlink_metadata(&p) {
            if meta.file_type().is_symlink() || meta.is_file() {
                if let Err(e) = fs::remove_file(&p) {
                    warn!(path = %p.display(), error = %e, "Unlinking failed");
                }
            }
        }
    }
}

/// Remove entries whose names are decimal integers.
fn clear_mh_folder(path: &Path) {
    let Ok(entries) = fs::read_dir(path) else {
        return;
    };
    for entry in entries.flatten() {
        let name = entry.file_name();
        let numeric = name
            .to_str()
            .map(|n| !n.is_empty() && n.bytes().all(|b| b.is_ascii_digit()))
            .unwrap_or(false);
        if !numeric {
            continue;
        }
        let p = entry.path();
        if let Ok(meta) = fs::symlink_metadata(&p) {
            if meta.file_type().is_symlink() || meta.is_file() {
                if let Err(e) = fs::remove_file(&p) {
                    warn!(path = %p.display(), error = %e, "Unlinking failed");
                }
            }
        }
    }
}

/// Create the output folder (as needed) and clear previous results unless
/// augmenting.
pub fn prepare_folder(format: OutputFormat, path: &Path, augment: bool) -> Result<()> {
    match format {
        OutputFormat::Maildir => {
            ensure_dir(path)?;
            for sub in ["cur", "new", "tmp"] {
                ensure_dir(&path.join(sub))?;
            }
            if !augment {
                clear_maildir_subfolder(path, "new");
                clear_maildir_subfolder(path, "cur");
            }
        }
        OutputFormat::Mh => {
            ensure_dir(path)?;
            if !augment {
                clear_mh_folder(path);
            }
        }
        OutputFormat::Mbox => {
            if !augment && path.exists() {
                fs::remove_file(path).map_err(|e| MairixError::source_io(path, e))?;
            }
        }
        OutputFormat::Raw | OutputFormat::Excerpt => {}
    }
    Ok(())
}

/// The maildir filename for hit `idx` with its flag suffix.
fn mk_maildir_name(idx: usize, seen: bool, replied: bool, flagged: bool) -> String {
    let mut name = format!("123456789.{idx}.mairix");
    if seen || replied || flagged {
        name.push_str(":2,");
        if flagged {
            name.push('F');
        }
        if replied {
            name.push('R');
        }
        if seen {
            name.push('S');
        }
    }
    name
}

/// Does the source path live in a maildir `new/` subdirectory?
fn looks_like_maildir_new(path: &str) -> bool {
    let mut components = path.rsplit('/');
    components.next(); // filename
    components.next() == Some("new")
}

fn create_link(target: &str, link: &Path, hardlink: bool) {
    let status = if hardlink {
        fs::hard_link(target, link)
    } else {
        std::os::unix::fs::symlink(target, link)
    };
    if let Err(e) = status {
        debug!(target = target, link = %link.display(), error = %e, "Failed to link");
    }
}

/// An mbox-backed message read back out of its mbox and verified against
/// the stored checksum.
enum ValidatedMsg {
    Ok { mbox_path: String, bytes: Vec<u8> },
    ChecksumMismatch,
    Unavailable,
}

fn get_validated_mbox_msg(db: &IndexReader, msg_index: usize) -> Result<ValidatedMsg> {
    let (mbi, msgi) = decode_mbox_indices(db.msg_cdata(msg_index));
    let mbox_path = db.string_at(db.mbox_path_offset(mbi) as usize)?.to_string();

    let Ok(data) = fs::read(&mbox_path) else {
        return Ok(ValidatedMsg::Unavailable);
    };

    let start = db.msg_mtime(msg_index) as usize;
    let len = db.msg_size(msg_index) as usize;
    if start >= data.len() {
        return Ok(ValidatedMsg::ChecksumMismatch);
    }
    let end = (start + len).min(data.len());
    let bytes = &data[start..end];

    let stored = db.bytes_at(db.mbox_checksum_offset(mbi) as usize + msgi * 16)?;
    if stored.len() < 16 || compute_checksum(bytes) != stored[..16] {
        return Ok(ValidatedMsg::ChecksumMismatch);
    }
    Ok(ValidatedMsg::Ok {
        mbox_path,
        bytes: bytes.to_vec(),
    })
}

/// Ensure mbox-sink output for one message ends with a blank line.
fn mbox_terminate(data: &[u8], out: &mut impl Write) -> std::io::Result<()> {
    match data.len() {
        0 => out.write_all(b"\n"),
        1 if data[0] != b'\n' => out.write_all(b"\n"),
        1 => Ok(()),
        n if data[n - 1] != b'\n' => out.write_all(b"\n\n"),
        n if data[n - 2] != b'\n' => out.write_all(b"\n"),
        _ => Ok(()),
    }
}

/// Write one copied-out-of-mbox message to a standalone file, tagging it
/// with its source folder and trimming the trailing separator newline.
fn copy_msg_to_file(target: &Path, mbox_path: &str, bytes: &[u8]) {
    let body = if bytes.is_empty() {
        bytes
    } else {
        &bytes[..bytes.len() - 1]
    };
    let write = || -> std::io::Result<()> {
        let mut f = File::create(target)?;
        write!(f, "X-source-folder: {mbox_path}\n")?;
        f.write_all(body)?;
        Ok(())
    };
    if let Err(e) = write() {
        warn!(path = %target.display(), error = %e, "Cannot write matched message");
    }
}

fn flags_of(db: &IndexReader, i: usize) -> (bool, bool, bool) {
    let b = db.msg_type_and_flags(i);
    (
        b & FLAG_SEEN != 0,
        b & FLAG_REPLIED != 0,
        b & FLAG_FLAGGED != 0,
    )
}

/// Produce the result view for `hits`, writing raw/excerpt listings to
/// `out`.
pub fn materialise(
    db: &IndexReader,
    hits: &[bool],
    format: OutputFormat,
    output_path: &Path,
    hardlinks: bool,
    out: &mut dyn Write,
) -> Result<MaterialiseStats> {
    let mut stats = MaterialiseStats::default();

    let mut mbox_sink = match format {
        OutputFormat::Mbox => Some(
            fs::OpenOptions::new()
                .create(true)
                .append(true)
                .open(output_path)
                .map_err(|e| MairixError::source_io(output_path, e))?,
        ),
        _ => None,
    };

    for i in 0..db.n_msgs() {
        if !hits[i] {
            continue;
        }
        let msg_type = db.msg_type(i);
        if msg_type != DB_MSG_FILE && msg_type != DB_MSG_MBOX {
            continue;
        }
        stats.n_hits += 1;
        let (seen, replied, flagged) = flags_of(db, i);

        match format {
            OutputFormat::Maildir => {
                if msg_type == DB_MSG_FILE {
                    let source = db.string_at(db.msg_cdata(i) as usize)?;
                    let sub = if looks_like_maildir_new(source) {
                        "new"
                    } else {
                        "cur"
                    };
                    let target = output_path
                        .join(sub)
                        .join(mk_maildir_name(i, seen, replied, flagged));
                    create_link(source, &target, hardlinks);
                } else {
                    let sub = if seen { "cur" } else { "new" };
                    let target = output_path
                        .join(sub)
                        .join(mk_maildir_name(i, seen, replied, flagged));
                    match get_validated_mbox_msg(db, i)? {
                        ValidatedMsg::Ok { mbox_path, bytes } => {
                            copy_msg_to_file(&target, &mbox_path, &bytes);
                        }
                        ValidatedMsg::ChecksumMismatch => stats.had_failed_checksum = true,
                        ValidatedMsg::Unavailable => {}
                    }
                }
            }
            OutputFormat::Mh => {
                let target = output_path.join(format!("{}", i + 1));
                if msg_type == DB_MSG_FILE {
                    create_link(db.string_at(db.msg_cdata(i) as usize)?, &target, hardlinks);
                } else {
                    match get_validated_mbox_msg(db, i)? {
                        ValidatedMsg::Ok { mbox_path, bytes } => {
                            copy_msg_to_file(&target, &mbox_path, &bytes);
                        }
                        ValidatedMsg::ChecksumMismatch => stats.had_failed_checksum = true,
                        ValidatedMsg::Unavailable => {}
                    }
                }
            }
            OutputFormat::Mbox => {
                let sink = mbox_sink.as_mut().expect("mbox sink open");
                if msg_type == DB_MSG_FILE {
                    let source = db.string_at(db.msg_cdata(i) as usize)?;
                    match fs::read(source) {
                        Ok(data) => {
                            let emit = |sink: &mut File| -> std::io::Result<()> {
                                sink.write_all(MBOX_FROM_LINE.as_bytes())?;
                                write!(sink, "X-source-folder: {source}\n")?;
                                sink.write_all(&data)?;
                                mbox_terminate(&data, sink)
                            };
                            emit(sink).map_err(|e| MairixError::source_io(output_path, e))?;
                        }
                        Err(e) => {
                            warn!(path = source, error = %e, "Cannot read source message");
                        }
                    }
                } else {
                    match get_validated_mbox_msg(db, i)? {
                        ValidatedMsg::Ok { mbox_path, bytes } => {
                            let emit = |sink: &mut File| -> std::io::Result<()> {
                                sink.write_all(MBOX_FROM_LINE.as_bytes())?;
                                write!(sink, "X-source-folder: {mbox_path}\n")?;
                                sink.write_all(&bytes)?;
                                mbox_terminate(&bytes, sink)
                            };
                            emit(sink).map_err(|e| MairixError::source_io(output_path, e))?;
                        }
                        ValidatedMsg::ChecksumMismatch => stats.had_failed_checksum = true,
                        ValidatedMsg::Unavailable => {}
                    }
                }
            }
            OutputFormat::Raw => {
                if msg_type == DB_MSG_FILE {
                    let _ = writeln!(out, "{}", db.string_at(db.msg_cdata(i) as usize)?);
                } else {
                    let (mbi, _) = decode_mbox_indices(db.msg_cdata(i));
                    let start = db.msg_mtime(i);
                    let len = db.msg_size(i);
                    let _ = writeln!(
                        out,
                        "mbox:{} [{},{})",
                        db.string_at(db.mbox_path_offset(mbi) as usize)?,
                        start,
                        start + len
                    );
                }
            }
            OutputFormat::Excerpt => {
                let _ = writeln!(out, "---------------------------------");
                let parsed = if msg_type == DB_MSG_FILE {
                    let source = db.string_at(db.msg_cdata(i) as usize)?;
                    let _ = writeln!(out, "{source}");
                    parser::parse_file(Path::new(source)).ok()
                } else {
                    let (mbi, _) = decode_mbox_indices(db.msg_cdata(i));
                    let start = db.msg_mtime(i);
                    let len = db.msg_size(i);
                    let _ = writeln!(
                        out,
                        "mbox:{} [{},{})",
                        db.string_at(db.mbox_path_offset(mbi) as usize)?,
                        start,
                        start + len
                    );
                    match get_validated_mbox_msg(db, i)? {
                        ValidatedMsg::Ok { bytes, .. } => parser::parse_message(&bytes).ok(),
                        ValidatedMsg::ChecksumMismatch => {
                            stats.had_failed_checksum = true;
                            None
                        }
                        ValidatedMsg::Unavailable => None,
                    }
                };
                if let Some(tree) = parsed {
                    print_excerpt_headers(&tree, out);
                }
            }
        }
    }
    Ok(stats)
}

fn print_excerpt_headers(tree: &parser::MessageTree, out: &mut dyn Write) {
    let h = &tree.headers;
    if let Some(to) = &h.to {
        let _ = writeln!(out, "  To:         {to}");
    }
    if let Some(cc) = &h.cc {
        let _ = writeln!(out, "  Cc:         {cc}");
    }
    if let Some(from) = &h.from {
        let _ = writeln!(out, "  From:       {from}");
    }
    if let Some(subject) = &h.subject {
        let _ = writeln!(out, "  Subject:    {subject}");
    }
    if let Some(mid) = &h.message_id {
        let _ = writeln!(out, "  Message-ID: {mid}");
    }
    if let Some(irt) = &h.in_reply_to {
        let _ = writeln!(out, "  In-Reply-To:{irt}");
    }
    if let Some(dt) = Utc.timestamp_opt(h.date, 0).earliest() {
        let _ = writeln!(out, "  Date:        {}", dt.format("%a, %d %b %Y"));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mk_maildir_name() {
        assert_eq!(mk_maildir_name(7, false, false, false), "123456789.7.mairix");
        assert_eq!(
            mk_maildir_name(7, true, true, true),
            "123456789.7.mairix:2,FRS"
        );
        assert_eq!(mk_maildir_name(0, true, false, false), "123456789.0.mairix:2,S");
    }

    #[test]
    fn test_looks_like_maildir_new() {
        assert!(looks_like_maildir_new("/mail/inbox/new/12345.host"));
        assert!(!looks_like_maildir_new("/mail/inbox/cur/12345.host"));
        assert!(!looks_like_maildir_new("12345.host"));
    }

    #[test]
    fn test_mbox_terminate() {
        let cases: [(&[u8], &[u8]); 5] = [
            (b"", b"\n"),
            (b"x", b"\n"),
            (b"\n", b""),
            (b"body\n", b"\n"),
            (b"body\n\n", b""),
        ];
        for (data, expect) in cases {
            let mut out = Vec::new();
            mbox_terminate(data, &mut out).unwrap();
            assert_eq!(out, expect, "input {data:?}");
        }
    }
}

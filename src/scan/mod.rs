//! Filesystem scanning: expand folder specifications into message and mbox
//! candidate lists.
//!
//! A folder specification is a colon-separated list (with `\:` escaping) of
//! paths relative to the folder base. A trailing `...` means "this
//! directory and everything beneath it"; the last path component may
//! contain shell-style wildcards.

pub mod glob;

use std::os::unix::ffi::OsStrExt;
use std::os::unix::fs::MetadataExt;
use std::path::{Path, PathBuf};

use tracing::{debug, warn};

pub use glob::{Glob, GlobSet};

/// A candidate file with the stat data the update driver needs.
#[derive(Debug, Clone)]
pub struct ScannedFile {
    pub path: PathBuf,
    pub mtime: i64,
    pub size: u64,
}

/// Which kind of file-per-message folder a specification names.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FolderKind {
    Maildir,
    Mh,
}

/// Split a folder specification on unescaped colons; `\:` produces a
/// literal colon inside a name.
pub fn split_on_colons(spec: &str) -> Vec<String> {
    let mut out = Vec::new();
    let mut current = String::new();
    let mut chars = spec.chars().peekable();
    while let Some(c) = chars.next() {
        match c {
            '\\' if chars.peek() == Some(&':') => {
                current.push(':');
                chars.next();
            }
            ':' => out.push(std::mem::take(&mut current)),
            _ => current.push(c),
        }
    }
    out.push(current);
    out.retain(|s| !s.is_empty());
    out
}

fn is_maildir(path: &Path) -> bool {
    path.is_dir()
        && path.join("new").is_dir()
        && path.join("cur").is_dir()
        && path.join("tmp").is_dir()
}

fn path_has_wildcard(component: &str) -> bool {
    component.contains(['*', '?', '['])
}

/// Does `path` (full or relative to the base) match any omit pattern?
fn is_omitted(folder_base: &Path, path: &Path, omit: &GlobSet) -> bool {
    if omit.is_empty() {
        return false;
    }
    let full = path.to_string_lossy();
    if omit.matches(&full) {
        return true;
    }
    path.strip_prefix(folder_base)
        .map(|rel| omit.matches(&rel.to_string_lossy()))
        .unwrap_or(false)
}

/// Expand one colon-separated folder specification into concrete paths
/// accepted by `filter`.
fn expand_paths(
    folder_base: &Path,
    specs: &[String],
    filter: &dyn Fn(&Path) -> bool,
    omit: &GlobSet,
) -> Vec<PathBuf> {
    let mut out: Vec<PathBuf> = Vec::new();

    let mut accept = |path: &Path, out: &mut Vec<PathBuf>| {
        if !is_omitted(folder_base, path, omit) && filter(path) {
            out.push(path.to_path_buf());
        }
    };

    fn descend(
        path: &Path,
        accept: &mut dyn FnMut(&Path, &mut Vec<PathBuf>),
        out: &mut Vec<PathBuf>,
    ) {
        accept(path, out);
        if path.is_dir() {
            let Ok(entries) = std::fs::read_dir(path) else {
                return;
            };
            for entry in entries.flatten() {
                let child = entry.path();
                match entry.file_type() {
                    Ok(ft) if ft.is_dir() => descend(&child, accept, out),
                    Ok(ft) if ft.is_file() => accept(&child, out),
                    _ => {}
                }
            }
        }
    }

    for spec in specs {
        let (spec, deep) = match spec.strip_suffix("...") {
            Some(stripped) => (stripped, true),
            None => (spec.as_str(), false),
        };
        let full = if spec.starts_with('/') {
            PathBuf::from(spec)
        } else {
            folder_base.join(spec)
        };

        let last = full
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();

        let mut roots: Vec<PathBuf> = Vec::new();
        if path_has_wildcard(&last) {
            let parent = full.parent().unwrap_or(Path::new("."));
            let g = Glob::new(&last);
            if let Ok(entries) = std::fs::read_dir(parent) {
                for entry in entries.flatten() {
                    let name = entry.file_name();
                    if g.matches(&name.to_string_lossy()) {
                        roots.push(entry.path());
                    }
                }
            }
        } else {
            roots.push(full);
        }

        for root in roots {
            if deep {
                descend(&root, &mut accept, &mut out);
            } else {
                accept(&root, &mut out);
            }
        }
    }
    out
}

fn stat_file(path: &Path) -> Option<ScannedFile> {
    match std::fs::metadata(path) {
        Ok(meta) if meta.is_file() => Some(ScannedFile {
            path: path.to_path_buf(),
            mtime: meta.mtime(),
            size: meta.size(),
        }),
        Ok(_) => None,
        Err(e) => {
            warn!(path = %path.display(), error = %e, "cannot stat candidate");
            None
        }
    }
}

fn sort_by_path(files: &mut [ScannedFile]) {
    files.sort_by(|a, b| a.path.as_os_str().as_bytes().cmp(b.path.as_os_str().as_bytes()));
}

/// Expand a maildir or MH folder specification and list every message file
/// inside the matching folders. The result is sorted by path bytes.
pub fn build_message_list(
    folder_base: &Path,
    folders: &str,
    kind: FolderKind,
    omit: &GlobSet,
) -> Vec<ScannedFile> {
    let specs = split_on_colons(folders);
    let filter: fn(&Path) -> bool = match kind {
        FolderKind::Maildir => is_maildir,
        FolderKind::Mh => Path::is_dir,
    };
    let folders = expand_paths(folder_base, &specs, &filter, omit);

    let mut out = Vec::new();
    for folder in &folders {
        match kind {
            FolderKind::Maildir => {
                for sub in ["new", "cur"] {
                    let dir = folder.join(sub);
                    let Ok(entries) = std::fs::read_dir(&dir) else {
                        continue;
                    };
                    for entry in entries.flatten() {
                        if let Some(f) = stat_file(&entry.path()) {
                            out.push(f);
                        }
                    }
                }
            }
            FolderKind::Mh => {
                let Ok(entries) = std::fs::read_dir(folder) else {
                    continue;
                };
                for entry in entries.flatten() {
                    let name = entry.file_name();
                    let is_numeric = name
                        .to_str()
                        .map(|n| !n.is_empty() && n.bytes().all(|b| b.is_ascii_digit()))
                        .unwrap_or(false);
                    if is_numeric {
                        if let Some(f) = stat_file(&entry.path()) {
                            out.push(f);
                        }
                    }
                }
            }
        }
    }
    sort_by_path(&mut out);
    debug!(count = out.len(), "Built message candidate list");
    out
}

/// Expand an mbox specification into the sorted list of candidate files.
pub fn expand_mbox_paths(folder_base: &Path, mboxen: &str, omit: &GlobSet) -> Vec<ScannedFile> {
    let specs = split_on_colons(mboxen);
    let paths = expand_paths(folder_base, &specs, &|p: &Path| p.is_file(), omit);
    let mut out: Vec<ScannedFile> = paths.iter().filter_map(|p| stat_file(p)).collect();
    sort_by_path(&mut out);
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    fn mkmaildir(base: &Path, name: &str) -> PathBuf {
        let dir = base.join(name);
        for sub in ["new", "cur", "tmp"] {
            fs::create_dir_all(dir.join(sub)).unwrap();
        }
        dir
    }

    #[test]
    fn test_split_on_colons() {
        assert_eq!(split_on_colons("a:b:c"), ["a", "b", "c"]);
        assert_eq!(split_on_colons("one"), ["one"]);
        assert_eq!(split_on_colons(r"we\:ird:x"), ["we:ird", "x"]);
        assert!(split_on_colons("").is_empty());
    }

    #[test]
    fn test_maildir_scan() {
        let tmp = tempfile::tempdir().unwrap();
        let md = mkmaildir(tmp.path(), "inbox");
        fs::write(md.join("new/msg1"), "x").unwrap();
        fs::write(md.join("cur/msg2:2,S"), "y").unwrap();
        fs::write(md.join("tmp/ignored"), "z").unwrap();

        let files = build_message_list(
            tmp.path(),
            "inbox",
            FolderKind::Maildir,
            &GlobSet::default(),
        );
        assert_eq!(files.len(), 2);
        assert!(files.windows(2).all(|w| w[0].path <= w[1].path));
    }

    #[test]
    fn test_maildir_recursion_and_omit() {
        let tmp = tempfile::tempdir().unwrap();
        let top = mkmaildir(tmp.path(), "mail");
        fs::write(top.join("new/a"), "x").unwrap();
        let nested = mkmaildir(&top, "lists");
        fs::write(nested.join("cur/b"), "y").unwrap();
        let spam = mkmaildir(&top, "spam");
        fs::write(spam.join("cur/c"), "y").unwrap();

        let all = build_message_list(
            tmp.path(),
            "mail...",
            FolderKind::Maildir,
            &GlobSet::default(),
        );
        assert_eq!(all.len(), 3);

        let omit = GlobSet::new(&["*spam*".to_string()]);
        let filtered = build_message_list(tmp.path(), "mail...", FolderKind::Maildir, &omit);
        assert_eq!(filtered.len(), 2);
    }

    #[test]
    fn test_mh_numeric_only() {
        let tmp = tempfile::tempdir().unwrap();
        let mh = tmp.path().join("mh");
        fs::create_dir_all(&mh).unwrap();
        fs::write(mh.join("1"), "x").unwrap();
        fs::write(mh.join("23"), "y").unwrap();
        fs::write(mh.join("notes"), "z").unwrap();

        let files = build_message_list(tmp.path(), "mh", FolderKind::Mh, &GlobSet::default());
        assert_eq!(files.len(), 2);
    }

    #[test]
    fn test_mbox_wildcard_expansion() {
        let tmp = tempfile::tempdir().unwrap();
        fs::write(tmp.path().join("a.mbox"), "").unwrap();
        fs::write(tmp.path().join("b.mbox"), "").unwrap();
        fs::write(tmp.path().join("c.txt"), "").unwrap();

        let files = expand_mbox_paths(tmp.path(), "*.mbox", &GlobSet::default());
        assert_eq!(files.len(), 2);
    }
}

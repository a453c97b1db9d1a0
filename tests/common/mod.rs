//! Shared scaffolding for the integration tests: build small mail
//! hierarchies in temp directories and drive full index/search passes
//! through the public API.

use std::fs;
use std::path::{Path, PathBuf};

use mairix::index::database::Database;
use mairix::index::mboxscan::build_mbox_lists;
use mairix::index::update::update_database;
use mairix::index::writer::write_database;
use mairix::index::IndexReader;
use mairix::scan::{build_message_list, expand_mbox_paths, FolderKind, GlobSet};
use mairix::search::evaluate;

/// Render a message from header pairs and a body.
pub fn message(headers: &[(&str, &str)], body: &str) -> String {
    let mut s = String::new();
    for (k, v) in headers {
        s.push_str(k);
        s.push_str(": ");
        s.push_str(v);
        s.push('\n');
    }
    s.push('\n');
    s.push_str(body);
    s
}

/// Create an empty maildir under `base`.
pub fn make_maildir(base: &Path, name: &str) -> PathBuf {
    let dir = base.join(name);
    for sub in ["new", "cur", "tmp"] {
        fs::create_dir_all(dir.join(sub)).unwrap();
    }
    dir
}

/// Concatenate messages into mbox format with valid separator lines.
pub fn mbox_contents(messages: &[String]) -> String {
    let mut out = String::new();
    for (i, msg) in messages.iter().enumerate() {
        out.push_str(&format!(
            "From sender@example.com Thu Jan  4 10:{:02}:00 2024\n",
            i % 60
        ));
        out.push_str(msg);
        if !msg.ends_with('\n') {
            out.push('\n');
        }
        out.push('\n');
    }
    out
}

/// Run one full index pass (the same steps as the CLI's index mode) and
/// write the database. Returns whether anything changed.
pub fn run_index(
    folder_base: &Path,
    maildir: Option<&str>,
    mbox: Option<&str>,
    db_path: &Path,
    purge: bool,
) -> bool {
    let omit = GlobSet::default();
    let mut db = Database::open_or_create(db_path, true).unwrap();

    let mbox_candidates = mbox
        .map(|spec| expand_mbox_paths(folder_base, spec, &omit))
        .unwrap_or_default();
    build_mbox_lists(&mut db, &mbox_candidates).unwrap();

    let messages = maildir
        .map(|spec| build_message_list(folder_base, spec, FolderKind::Maildir, &omit))
        .unwrap_or_default();

    let changed = update_database(&mut db, &messages, false).unwrap();
    if purge {
        db.cull_dead_messages(true).unwrap();
    }
    write_database(&db, true).unwrap();
    changed
}

/// Evaluate a query against a written index, returning the hit indices.
pub fn run_query(db_path: &Path, args: &[&str], threads: bool) -> Vec<usize> {
    let reader = IndexReader::open(db_path).unwrap();
    let args: Vec<String> = args.iter().map(|s| s.to_string()).collect();
    let hits = evaluate(&reader, &args, threads).unwrap();
    hits.iter()
        .enumerate()
        .filter_map(|(i, h)| h.then_some(i))
        .collect()
}

/// The source file names (final path component) of the given hits.
pub fn hit_names(db_path: &Path, hits: &[usize]) -> Vec<String> {
    let reader = IndexReader::open(db_path).unwrap();
    let mut names = Vec::new();
    for &i in hits {
        let path = reader.string_at(reader.msg_cdata(i) as usize).unwrap();
        names.push(
            path.rsplit('/')
                .next()
                .unwrap_or(path)
                .to_string(),
        );
    }
    names
}

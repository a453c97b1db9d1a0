//! End-to-end indexing behaviour: incremental updates, mbox edit
//! detection, purging, and threading.

mod common;

use std::fs;

use common::{make_maildir, mbox_contents, message, run_index, run_query};
use mairix::index::format::{DB_MSG_DEAD, DB_MSG_MBOX};
use mairix::index::IndexReader;

#[test]
fn test_index_maildir_and_reindex_is_noop() {
    let tmp = tempfile::tempdir().unwrap();
    let base = tmp.path();
    let md = make_maildir(base, "inbox");
    for i in 0..3 {
        fs::write(
            md.join(format!("new/m{i}")),
            message(
                &[
                    ("From", "alice@example.com"),
                    ("Subject", &format!("note {i}")),
                    ("Message-ID", &format!("<n{i}@example.com>")),
                ],
                "hello world\n",
            ),
        )
        .unwrap();
    }
    let db_path = base.join("index.db");

    let changed = run_index(base, Some("inbox"), None, &db_path, false);
    assert!(changed);

    let reader = IndexReader::open(&db_path).unwrap();
    assert_eq!(reader.n_msgs(), 3);
    drop(reader);

    // No filesystem change: the second pass must be a no-op, and the
    // rewritten file keeps exactly the same contents (token ordering
    // within a table aside, which cannot change the length).
    let changed = run_index(base, Some("inbox"), None, &db_path, false);
    assert!(!changed);
    let after_second = fs::read(&db_path).unwrap();

    let changed = run_index(base, Some("inbox"), None, &db_path, false);
    assert!(!changed);
    let after_third = fs::read(&db_path).unwrap();
    assert_eq!(after_second.len(), after_third.len());

    let reader = IndexReader::open(&db_path).unwrap();
    assert_eq!(reader.n_msgs(), 3);
    assert!(run_query(&db_path, &["s:note"], false).len() == 3);
}

#[test]
fn test_deleted_file_message_dies_then_culls() {
    let tmp = tempfile::tempdir().unwrap();
    let base = tmp.path();
    let md = make_maildir(base, "inbox");
    for i in 0..2 {
        fs::write(
            md.join(format!("new/m{i}")),
            message(
                &[("Subject", &format!("keep{i}")), ("From", "x@y.com")],
                "body\n",
            ),
        )
        .unwrap();
    }
    let db_path = base.join("index.db");
    run_index(base, Some("inbox"), None, &db_path, false);

    fs::remove_file(md.join("new/m0")).unwrap();
    let changed = run_index(base, Some("inbox"), None, &db_path, false);
    assert!(changed);

    let reader = IndexReader::open(&db_path).unwrap();
    assert_eq!(reader.n_msgs(), 2);
    assert_eq!(reader.msg_type(0), DB_MSG_DEAD);
    drop(reader);

    // Dead slots are invisible to searches even though the slot remains.
    assert_eq!(run_query(&db_path, &["s:keep0"], false), Vec::<usize>::new());
    assert_eq!(run_query(&db_path, &["s:keep1"], false), vec![1]);

    // Purge renumbers.
    run_index(base, Some("inbox"), None, &db_path, true);
    let reader = IndexReader::open(&db_path).unwrap();
    assert_eq!(reader.n_msgs(), 1);
    drop(reader);
    assert_eq!(run_query(&db_path, &["s:keep1"], false), vec![0]);
}

#[test]
fn test_mbox_indexing_and_edit_detection() {
    let tmp = tempfile::tempdir().unwrap();
    let base = tmp.path();
    let msgs: Vec<String> = (0..3)
        .map(|i| {
            message(
                &[
                    ("From", "sender@example.com"),
                    ("Subject", &format!("mboxmsg{i}")),
                    ("Message-ID", &format!("<mb{i}@example.com>")),
                ],
                &format!("mbox body {i}\n"),
            )
        })
        .collect();
    let mbox_path = base.join("archive.mbox");
    fs::write(&mbox_path, mbox_contents(&msgs)).unwrap();

    let db_path = base.join("index.db");
    run_index(base, None, Some("archive.mbox"), &db_path, false);

    let reader = IndexReader::open(&db_path).unwrap();
    assert_eq!(reader.n_msgs(), 3);
    assert_eq!(reader.n_mboxen(), 1);
    assert_eq!(reader.mbox_entries(0), 3);
    for i in 0..3 {
        assert_eq!(reader.msg_type(i), DB_MSG_MBOX);
    }
    drop(reader);

    assert_eq!(run_query(&db_path, &["s:mboxmsg1"], false), vec![1]);

    // Delete the second message in place: the file shrinks, message 1
    // dies, and the old message 2 is rediscovered as a new entry.
    let edited = mbox_contents(&[msgs[0].clone(), msgs[2].clone()]);
    fs::write(&mbox_path, edited).unwrap();
    let changed = run_index(base, None, Some("archive.mbox"), &db_path, false);
    assert!(changed);

    let reader = IndexReader::open(&db_path).unwrap();
    assert_eq!(reader.n_msgs(), 4);
    assert_eq!(reader.msg_type(0), DB_MSG_MBOX);
    assert_eq!(reader.msg_type(1), DB_MSG_DEAD);
    assert_eq!(reader.msg_type(2), DB_MSG_DEAD);
    assert_eq!(reader.msg_type(3), DB_MSG_MBOX);
    assert_eq!(reader.mbox_entries(0), 2);
    drop(reader);

    assert_eq!(run_query(&db_path, &["s:mboxmsg0"], false), vec![0]);
    assert_eq!(run_query(&db_path, &["s:mboxmsg1"], false), Vec::<usize>::new());
    assert_eq!(run_query(&db_path, &["s:mboxmsg2"], false), vec![3]);

    // After a purge the dead slots are culled and indices renumber.
    run_index(base, None, Some("archive.mbox"), &db_path, true);
    let reader = IndexReader::open(&db_path).unwrap();
    assert_eq!(reader.n_msgs(), 2);
    drop(reader);
    assert_eq!(run_query(&db_path, &["s:mboxmsg2"], false), vec![1]);
}

#[test]
fn test_mbox_append_keeps_existing_entries() {
    let tmp = tempfile::tempdir().unwrap();
    let base = tmp.path();
    let first_two: Vec<String> = (0..2)
        .map(|i| message(&[("Subject", &format!("orig{i}"))], "body\n"))
        .collect();
    let mbox_path = base.join("in.mbox");
    fs::write(&mbox_path, mbox_contents(&first_two)).unwrap();

    let db_path = base.join("index.db");
    run_index(base, None, Some("in.mbox"), &db_path, false);

    let mut all = first_two.clone();
    all.push(message(&[("Subject", "appended")], "fresh\n"));
    fs::write(&mbox_path, mbox_contents(&all)).unwrap();
    run_index(base, None, Some("in.mbox"), &db_path, false);

    let reader = IndexReader::open(&db_path).unwrap();
    assert_eq!(reader.n_msgs(), 3);
    assert!((0..3).all(|i| reader.msg_type(i) == DB_MSG_MBOX));
    drop(reader);
    assert_eq!(run_query(&db_path, &["s:orig0"], false), vec![0]);
    assert_eq!(run_query(&db_path, &["s:appended"], false), vec![2]);
}

#[test]
fn test_threading_assigned_through_update() {
    let tmp = tempfile::tempdir().unwrap();
    let base = tmp.path();
    let md = make_maildir(base, "inbox");
    fs::write(
        md.join("new/a"),
        message(
            &[("Subject", "start"), ("Message-ID", "<a@x>")],
            "first\n",
        ),
    )
    .unwrap();
    fs::write(
        md.join("new/b"),
        message(
            &[
                ("Subject", "Re: start"),
                ("Message-ID", "<b@x>"),
                ("In-Reply-To", "<a@x>"),
            ],
            "second\n",
        ),
    )
    .unwrap();
    fs::write(
        md.join("new/c"),
        message(
            &[
                ("Subject", "Re: Re: start"),
                ("Message-ID", "<c@x>"),
                ("References", "<b@x>"),
            ],
            "third\n",
        ),
    )
    .unwrap();
    fs::write(
        md.join("new/d"),
        message(&[("Subject", "other"), ("Message-ID", "<d@x>")], "apart\n"),
    )
    .unwrap();

    let db_path = base.join("index.db");
    run_index(base, Some("inbox"), None, &db_path, false);

    let reader = IndexReader::open(&db_path).unwrap();
    let tid_a = reader.msg_tid(0);
    assert_eq!(reader.msg_tid(1), tid_a);
    assert_eq!(reader.msg_tid(2), tid_a);
    assert_ne!(reader.msg_tid(3), tid_a);
}

#[test]
fn test_maildir_filename_flags_are_indexed() {
    let tmp = tempfile::tempdir().unwrap();
    let base = tmp.path();
    let md = make_maildir(base, "inbox");
    fs::write(
        md.join("cur/1000.host:2,S"),
        message(&[("Subject", "readone")], "x\n"),
    )
    .unwrap();
    fs::write(
        md.join("cur/1001.host:2,FR"),
        message(&[("Subject", "busy")], "x\n"),
    )
    .unwrap();
    fs::write(md.join("new/1002.host"), message(&[("Subject", "fresh")], "x\n")).unwrap();

    let db_path = base.join("index.db");
    run_index(base, Some("inbox"), None, &db_path, false);

    let seen = run_query(&db_path, &["F:s"], false);
    assert_eq!(seen.len(), 1);
    let unseen = run_query(&db_path, &["F:-s"], false);
    assert_eq!(unseen.len(), 2);
    let replied_flagged = run_query(&db_path, &["F:rf"], false);
    assert_eq!(replied_flagged.len(), 1);
}

#[test]
fn test_duplicate_mbox_is_rejected() {
    let tmp = tempfile::tempdir().unwrap();
    let base = tmp.path();
    fs::write(base.join("one.mbox"), "").unwrap();

    let mut db = mairix::index::Database::new(&base.join("index.db"));
    let omit = mairix::scan::GlobSet::default();
    // The same file named twice in the spec resolves to a duplicate.
    let candidates =
        mairix::scan::expand_mbox_paths(base, "one.mbox:one.mbox", &omit);
    let result = mairix::index::mboxscan::build_mbox_lists(&mut db, &candidates);
    assert!(matches!(
        result,
        Err(mairix::error::MairixError::DuplicateInput(_))
    ));
}

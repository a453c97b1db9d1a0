//! End-to-end search behaviour over a freshly built index.

mod common;

use std::fs;
use std::path::{Path, PathBuf};

use common::{hit_names, make_maildir, mbox_contents, message, run_index, run_query};
use mairix::error::MairixError;
use mairix::index::IndexReader;
use mairix::search::output::{materialise, prepare_folder, OutputFormat};
use mairix::search::{evaluate, search_top, SearchOptions};

/// Index three messages with distinct subjects and senders.
fn subjects_fixture(base: &Path) -> PathBuf {
    let md = make_maildir(base, "inbox");
    fs::write(
        md.join("new/m0"),
        message(
            &[
                ("From", "alice@example.com"),
                ("To", "bob@example.com"),
                ("Subject", "Project Alpha update"),
            ],
            "status is green\n",
        ),
    )
    .unwrap();
    fs::write(
        md.join("new/m1"),
        message(
            &[
                ("From", "bob@example.com"),
                ("To", "alice@example.com"),
                ("Subject", "ALPHA release notes"),
            ],
            "ship it\n",
        ),
    )
    .unwrap();
    fs::write(
        md.join("new/m2"),
        message(
            &[
                ("From", "carol@example.com"),
                ("To", "alice@example.com"),
                ("Subject", "meeting notes"),
            ],
            "see agenda\n",
        ),
    )
    .unwrap();
    let db_path = base.join("index.db");
    run_index(base, Some("inbox"), None, &db_path, false);
    db_path
}

#[test]
fn test_exact_subject_word() {
    let tmp = tempfile::tempdir().unwrap();
    let db = subjects_fixture(tmp.path());
    // Case-folded at both index and query time.
    assert_eq!(run_query(&db, &["s:alpha"], false), vec![0, 1]);
    assert_eq!(run_query(&db, &["s:ALPHA"], false), vec![0, 1]);
    assert_eq!(run_query(&db, &["s:meeting"], false), vec![2]);
    assert_eq!(run_query(&db, &["s:nothere"], false), Vec::<usize>::new());
}

#[test]
fn test_approximate_body_match() {
    let tmp = tempfile::tempdir().unwrap();
    let base = tmp.path();
    let md = make_maildir(base, "inbox");
    fs::write(
        md.join("new/m0"),
        message(&[("Subject", "call me")], "the telephone rang\n"),
    )
    .unwrap();
    let db = base.join("index.db");
    run_index(base, Some("inbox"), None, &db, false);

    // One substitution away.
    assert_eq!(run_query(&db, &["b:telephome=1"], false), vec![0]);
    assert_eq!(run_query(&db, &["b:telephome=0"], false), Vec::<usize>::new());
    // Substitution plus deletion needs an error budget of two.
    assert_eq!(run_query(&db, &["b:telefone=1"], false), Vec::<usize>::new());
    assert_eq!(run_query(&db, &["b:telefone=2"], false), vec![0]);
    // Bare `=` is an exact substring match.
    assert_eq!(run_query(&db, &["b:eleph="], false), vec![0]);
    // Left anchor restricts to the start of a token.
    assert_eq!(run_query(&db, &["b:^tele="], false), vec![0]);
    assert_eq!(run_query(&db, &["b:^phone="], false), Vec::<usize>::new());
}

#[test]
fn test_thread_expansion() {
    let tmp = tempfile::tempdir().unwrap();
    let base = tmp.path();
    let md = make_maildir(base, "inbox");
    fs::write(
        md.join("new/a"),
        message(&[("Subject", "root"), ("Message-ID", "<a@x>")], "one\n"),
    )
    .unwrap();
    fs::write(
        md.join("new/b"),
        message(
            &[
                ("Subject", "reply"),
                ("In-Reply-To", "<a@x>"),
                ("Message-ID", "<b@x>"),
            ],
            "two\n",
        ),
    )
    .unwrap();
    fs::write(
        md.join("new/c"),
        message(
            &[
                ("Subject", "deeper"),
                ("References", "<b@x>"),
                ("Message-ID", "<c@x>"),
            ],
            "three\n",
        ),
    )
    .unwrap();
    let db = base.join("index.db");
    run_index(base, Some("inbox"), None, &db, false);

    // A non-matching query stays empty with or without expansion.
    assert_eq!(run_query(&db, &["s:unrelated"], false), Vec::<usize>::new());
    assert_eq!(run_query(&db, &["s:unrelated"], true), Vec::<usize>::new());

    // The angles are stripped on insertion, so the token is a@x.
    assert_eq!(run_query(&db, &["m:a@x"], false), vec![0]);
    assert_eq!(run_query(&db, &["m:a@x"], true), vec![0, 1, 2]);

    // m: only consults Message-ID headers (chain 1): b@x appears in C's
    // References but only B has it as its id.
    assert_eq!(run_query(&db, &["m:b@x"], false), vec![1]);
}

#[test]
fn test_size_ranges() {
    let tmp = tempfile::tempdir().unwrap();
    let base = tmp.path();
    let md = make_maildir(base, "inbox");
    for (name, size) in [("m0", 800usize), ("m1", 4500), ("m2", 12000)] {
        let mut data = message(&[("Subject", name)], "");
        while data.len() < size {
            data.push('x');
        }
        fs::write(md.join(format!("new/{name}")), data).unwrap();
    }
    let db = base.join("index.db");
    run_index(base, Some("inbox"), None, &db, false);

    assert_eq!(run_query(&db, &["z:1k-10k"], false), vec![1]);
    assert_eq!(run_query(&db, &["z:-10k"], false), vec![0, 1]);
    assert_eq!(run_query(&db, &["z:1k-"], false), vec![1, 2]);
}

#[test]
fn test_and_or_combination() {
    let tmp = tempfile::tempdir().unwrap();
    let base = tmp.path();
    let md = make_maildir(base, "inbox");
    fs::write(
        md.join("new/m1"),
        message(
            &[("From", "alice@example.com"), ("Subject", "report")],
            "q1 numbers\n",
        ),
    )
    .unwrap();
    fs::write(
        md.join("new/m2"),
        message(
            &[("From", "bob@example.com"), ("Subject", "report")],
            "q2 numbers\n",
        ),
    )
    .unwrap();
    fs::write(
        md.join("new/m3"),
        message(
            &[("From", "alice@example.com"), ("Subject", "chat")],
            "lunch?\n",
        ),
    )
    .unwrap();
    let db = base.join("index.db");
    run_index(base, Some("inbox"), None, &db, false);

    let names = |hits: &[usize]| hit_names(&db, hits);

    let hits = run_query(&db, &["f:alice", "s:report,chat"], false);
    assert_eq!(names(&hits), ["m1", "m3"]);

    let hits = run_query(&db, &["f:alice", "s:report"], false);
    assert_eq!(names(&hits), ["m1"]);

    let hits = run_query(&db, &["f:alice,bob", "s:report"], false);
    assert_eq!(names(&hits), ["m1", "m2"]);

    // Negation within an argument.
    let hits = run_query(&db, &["f:alice", "s:~report"], false);
    assert_eq!(names(&hits), ["m3"]);
}

#[test]
fn test_address_and_word_tokens_both_match() {
    let tmp = tempfile::tempdir().unwrap();
    let base = tmp.path();
    let md = make_maildir(base, "inbox");
    fs::write(
        md.join("new/m0"),
        message(
            &[("To", "alice.smith@example.com"), ("Subject", "hi")],
            "x\n",
        ),
    )
    .unwrap();
    let db = base.join("index.db");
    run_index(base, Some("inbox"), None, &db, false);

    // Whole address atom and each embedded word.
    assert_eq!(run_query(&db, &["t:alice.smith@example.com"], false), vec![0]);
    assert_eq!(run_query(&db, &["t:alice"], false), vec![0]);
    assert_eq!(run_query(&db, &["t:smith"], false), vec![0]);
    assert_eq!(run_query(&db, &["t:example"], false), vec![0]);
}

#[test]
fn test_pattern_length_boundary() {
    let tmp = tempfile::tempdir().unwrap();
    let db = subjects_fixture(tmp.path());
    let reader = IndexReader::open(&db).unwrap();

    let ok = format!("s:{}=", "a".repeat(31));
    assert!(evaluate(&reader, &[ok], false).is_ok());

    let too_long = format!("s:{}=", "a".repeat(32));
    assert!(matches!(
        evaluate(&reader, &[too_long], false),
        Err(MairixError::InvalidQuery(_))
    ));

    assert!(matches!(
        evaluate(&reader, &["y:word".to_string()], false),
        Err(MairixError::InvalidQuery(_))
    ));
}

#[test]
fn test_date_range_excludes_unparseable_dates() {
    let tmp = tempfile::tempdir().unwrap();
    let base = tmp.path();
    let md = make_maildir(base, "inbox");
    fs::write(
        md.join("new/dated"),
        message(
            &[
                ("Subject", "dated"),
                ("Date", "Thu, 04 Jan 2024 10:00:00 +0000"),
            ],
            "x\n",
        ),
    )
    .unwrap();
    fs::write(
        md.join("new/undated"),
        message(&[("Subject", "undated"), ("Date", "gibberish")], "x\n"),
    )
    .unwrap();
    let db = base.join("index.db");
    run_index(base, Some("inbox"), None, &db, false);

    let hits = run_query(&db, &["d:2023-2025"], false);
    assert_eq!(hit_names(&db, &hits), ["dated"]);
}

#[test]
fn test_raw_output_lists_paths() {
    let tmp = tempfile::tempdir().unwrap();
    let db = subjects_fixture(tmp.path());

    let mut out: Vec<u8> = Vec::new();
    let code = search_top(
        &db,
        &["s:alpha".to_string()],
        Path::new(""),
        OutputFormat::Raw,
        SearchOptions::default(),
        &mut out,
    )
    .unwrap();
    assert_eq!(code, 0);
    let text = String::from_utf8(out).unwrap();
    assert_eq!(text.lines().count(), 2);
    assert!(text.contains("/inbox/new/m0"));
    assert!(text.contains("/inbox/new/m1"));

    let mut out: Vec<u8> = Vec::new();
    let code = search_top(
        &db,
        &["s:absent".to_string()],
        Path::new(""),
        OutputFormat::Raw,
        SearchOptions::default(),
        &mut out,
    )
    .unwrap();
    assert_eq!(code, 1);
}

#[test]
fn test_maildir_output_creates_links() {
    let tmp = tempfile::tempdir().unwrap();
    let db = subjects_fixture(tmp.path());
    let out_dir = tmp.path().join("mf");

    let reader = IndexReader::open(&db).unwrap();
    let hits = evaluate(&reader, &["s:alpha".to_string()], false).unwrap();
    prepare_folder(OutputFormat::Maildir, &out_dir, false).unwrap();
    let mut sink: Vec<u8> = Vec::new();
    let stats = materialise(
        &reader,
        &hits,
        OutputFormat::Maildir,
        &out_dir,
        false,
        &mut sink,
    )
    .unwrap();
    assert_eq!(stats.n_hits, 2);
    assert!(!stats.had_failed_checksum);

    // Source messages live in new/, so the links land in new/.
    let entries: Vec<String> = fs::read_dir(out_dir.join("new"))
        .unwrap()
        .flatten()
        .map(|e| e.file_name().to_string_lossy().into_owned())
        .collect();
    assert_eq!(entries.len(), 2);
    assert!(entries.iter().all(|n| n.starts_with("123456789.")));
    assert!(entries.iter().all(|n| n.ends_with(".mairix")));

    // Clearing removes them; augmenting keeps them.
    prepare_folder(OutputFormat::Maildir, &out_dir, true).unwrap();
    assert_eq!(fs::read_dir(out_dir.join("new")).unwrap().count(), 2);
    prepare_folder(OutputFormat::Maildir, &out_dir, false).unwrap();
    assert_eq!(fs::read_dir(out_dir.join("new")).unwrap().count(), 0);
}

#[test]
fn test_mbox_output_terminates_messages() {
    let tmp = tempfile::tempdir().unwrap();
    let base = tmp.path();
    let md = make_maildir(base, "inbox");
    // Final message is missing its trailing newline.
    fs::write(
        md.join("new/m0"),
        "Subject: truncated\n\nno final newline here",
    )
    .unwrap();
    let db = base.join("index.db");
    run_index(base, Some("inbox"), None, &db, false);

    let out_mbox = base.join("results.mbox");
    let mut out: Vec<u8> = Vec::new();
    let code = search_top(
        &db,
        &["s:truncated".to_string()],
        &out_mbox,
        OutputFormat::Mbox,
        SearchOptions::default(),
        &mut out,
    )
    .unwrap();
    assert_eq!(code, 0);

    let written = fs::read(&out_mbox).unwrap();
    assert!(written.starts_with(b"From mairix@mairix Mon Jan  1 12:34:56 1970\n"));
    let text = String::from_utf8_lossy(&written);
    assert!(text.contains("X-source-folder:"));
    assert!(written.ends_with(b"\n\n"), "mbox sink must end with a blank line");
}

#[test]
fn test_mbox_backed_hits_roundtrip_through_mbox_sink() {
    let tmp = tempfile::tempdir().unwrap();
    let base = tmp.path();
    let msgs = vec![
        message(&[("Subject", "wanted")], "pick me\n"),
        message(&[("Subject", "other")], "not me\n"),
    ];
    fs::write(base.join("src.mbox"), mbox_contents(&msgs)).unwrap();
    let db = base.join("index.db");
    run_index(base, None, Some("src.mbox"), &db, false);

    let out_mbox = base.join("results.mbox");
    let mut out: Vec<u8> = Vec::new();
    let code = search_top(
        &db,
        &["s:wanted".to_string()],
        &out_mbox,
        OutputFormat::Mbox,
        SearchOptions::default(),
        &mut out,
    )
    .unwrap();
    assert_eq!(code, 0);
    let text = fs::read_to_string(&out_mbox).unwrap();
    assert!(text.contains("Subject: wanted"));
    assert!(text.contains("X-source-folder:"));
    assert!(!text.contains("Subject: other"));
}

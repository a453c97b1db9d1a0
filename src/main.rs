//! CLI entry point for `mairix`.
//!
//! With no query arguments the index is brought up to date; with query
//! arguments a search runs against the existing index. Exit status: 0 on
//! success (for searches: at least one hit), 1 for a search with no hits,
//! 2 for any fatal error.

use std::path::PathBuf;
use std::process::ExitCode;

use clap::Parser;
use tracing::debug;

use mairix::config::{load_config, Config};
use mairix::error::MairixError;
use mairix::index::database::Database;
use mairix::index::dump::dump_database;
use mairix::index::mboxscan::build_mbox_lists;
use mairix::index::update::update_database;
use mairix::index::writer::write_database;
use mairix::lock::Lock;
use mairix::scan::{build_message_list, expand_mbox_paths, FolderKind, GlobSet, ScannedFile};
use mairix::search::output::OutputFormat;
use mairix::search::{search_top, SearchOptions};

#[derive(Parser)]
#[command(name = "mairix", version, about = "Index and search mail folders")]
struct Cli {
    /// Use an alternative config file
    #[arg(short = 'f', long = "rcfile", value_name = "FILE")]
    rcfile: Option<PathBuf>,

    /// Include all messages in the same threads as matching messages
    #[arg(short = 't', long = "threads")]
    threads: bool,

    /// Add new matches to the match folder instead of clearing it first
    #[arg(short = 'a', long = "augment")]
    augment: bool,

    /// Override the mfolder setting from the config file
    #[arg(short = 'o', long = "mfolder", value_name = "FOLDER")]
    mfolder: Option<String>,

    /// Purge messages that no longer exist
    #[arg(short = 'p', long = "purge")]
    purge: bool,

    /// Dump the database to stdout and exit
    #[arg(short = 'd', long = "dump")]
    dump: bool,

    /// Force raw output regardless of the mformat setting
    #[arg(short = 'r', long = "raw-output")]
    raw_output: bool,

    /// Force excerpt output regardless of the mformat setting
    #[arg(short = 'x', long = "excerpt-output")]
    excerpt_output: bool,

    /// Use hard links rather than symbolic links in maildir/MH output
    #[arg(short = 'H', long = "hardlinks")]
    hardlinks: bool,

    /// Skip the database integrity checks
    #[arg(short = 'Q', long = "no-integrity-checks")]
    no_integrity_checks: bool,

    /// Trust path presence alone when reconciling, without comparing mtimes
    #[arg(short = 'F', long = "fast-index")]
    fast_index: bool,

    /// Clear a stale database lock left by a dead process
    #[arg(long = "force-unlock")]
    force_unlock: bool,

    /// Verbose output
    #[arg(short = 'v', long = "verbose")]
    verbose: bool,

    /// Search expressions; leave empty to update the index
    #[arg(value_name = "QUERY")]
    query: Vec<String>,
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    setup_logging(cli.verbose);

    match run(&cli) {
        Ok(code) => ExitCode::from(code),
        Err(e) => {
            eprintln!("mairix: {e}");
            ExitCode::from(2)
        }
    }
}

fn setup_logging(verbose: bool) {
    let default_level = if verbose { "debug" } else { "warn" };
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_level));
    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_writer(std::io::stderr)
        .init();
}

fn run(cli: &Cli) -> anyhow::Result<u8> {
    let config = load_config(cli.rcfile.as_deref())?;
    let database_path = config.database_path()?;

    if cli.dump {
        dump_database(&database_path, &mut std::io::stdout().lock())?;
        return Ok(0);
    }

    let _lock = Lock::acquire(&database_path, cli.force_unlock)?;

    if cli.query.is_empty() {
        cmd_index(cli, &config)?;
        Ok(0)
    } else {
        let format = if cli.raw_output {
            OutputFormat::Raw
        } else if cli.excerpt_output {
            OutputFormat::Excerpt
        } else {
            OutputFormat::from_name(config.mformat.as_deref().unwrap_or("maildir"))?
        };
        let output_path = match format {
            OutputFormat::Raw | OutputFormat::Excerpt => PathBuf::new(),
            _ => config.resolve_mfolder(cli.mfolder.as_deref())?,
        };
        let opts = SearchOptions {
            threads: cli.threads,
            augment: cli.augment,
            hardlinks: cli.hardlinks,
        };
        let code = search_top(
            &database_path,
            &cli.query,
            &output_path,
            format,
            opts,
            &mut std::io::stdout().lock(),
        )?;
        Ok(code as u8)
    }
}

/// Bring the index up to date with the configured folders.
fn cmd_index(cli: &Cli, config: &Config) -> anyhow::Result<()> {
    if !config.has_any_folders() {
        return Err(MairixError::Config(
            "no maildir/mh/mbox folders (or MAIRIX_* equivalents) set".to_string(),
        )
        .into());
    }
    let folder_base = config.folder_base()?;
    let database_path = config.database_path()?;
    let omit = GlobSet::new(&config.omit);
    let do_checks = !cli.no_integrity_checks;

    let mut db = Database::open_or_create(&database_path, do_checks)?;

    let mbox_candidates = match &config.mbox {
        Some(spec) => expand_mbox_paths(&folder_base, spec, &omit),
        None => Vec::new(),
    };
    build_mbox_lists(&mut db, &mbox_candidates)?;

    let mut messages: Vec<ScannedFile> = Vec::new();
    if let Some(spec) = &config.maildir {
        messages.extend(build_message_list(
            &folder_base,
            spec,
            FolderKind::Maildir,
            &omit,
        ));
    }
    if let Some(spec) = &config.mh {
        messages.extend(build_message_list(&folder_base, spec, FolderKind::Mh, &omit));
    }
    {
        use std::os::unix::ffi::OsStrExt;
        messages.sort_by(|a, b| {
            a.path
                .as_os_str()
                .as_bytes()
                .cmp(b.path.as_os_str().as_bytes())
        });
    }
    for pair in messages.windows(2) {
        if pair[0].path == pair[1].path {
            return Err(MairixError::DuplicateInput(pair[0].path.clone()).into());
        }
    }

    let changed = update_database(&mut db, &messages, cli.fast_index)?;
    debug!(changed = changed, "Update pass finished");

    if cli.purge {
        db.cull_dead_messages(do_checks)?;
    }

    write_database(&db, do_checks)?;
    Ok(())
}

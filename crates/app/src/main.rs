use std::fmt;
use std::io::{BufRead, Write};
use std::path::{Path, PathBuf};

use services::{
    AppServices, AutoConfirm, Clock, IntegrityStatus, RestoreOutcome, TrackerConfig, UserPrompt,
};
use study_core::model::{PageScope, TopicId};
use tracing::{debug, info};

#[derive(Debug)]
enum ArgsError {
    MissingValue { flag: &'static str },
    MissingArgument { command: &'static str, what: &'static str },
    UnknownArg(String),
    InvalidDbUrl { raw: String },
}

impl fmt::Display for ArgsError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ArgsError::MissingValue { flag } => write!(f, "{flag} requires a value"),
            ArgsError::MissingArgument { command, what } => {
                write!(f, "{command} requires {what}")
            }
            ArgsError::UnknownArg(arg) => write!(f, "unknown argument: {arg}"),
            ArgsError::InvalidDbUrl { raw } => {
                write!(f, "not a progress database URL: {raw} (use sqlite://<path>)")
            }
        }
    }
}

impl std::error::Error for ArgsError {}

fn require_value(
    args: &mut impl Iterator<Item = String>,
    flag: &'static str,
) -> Result<String, ArgsError> {
    args.next().ok_or(ArgsError::MissingValue { flag })
}

/// Asks on stderr and reads the answer from stdin.
struct StdinPrompt;

impl UserPrompt for StdinPrompt {
    fn confirm(&self, message: &str) -> bool {
        eprint!("{message} [y/N] ");
        let _ = std::io::stderr().flush();
        let mut answer = String::new();
        if std::io::stdin().lock().read_line(&mut answer).is_err() {
            return false;
        }
        matches!(answer.trim().to_ascii_lowercase().as_str(), "y" | "yes")
    }

    fn alert(&self, message: &str) {
        eprintln!("{message}");
    }
}

fn print_usage() {
    eprintln!("Usage:");
    eprintln!("  study <command> [--db <sqlite_url>] [--page <file>] [--yes]");
    eprintln!();
    eprintln!("Commands:");
    eprintln!("  status                     show progress for the page (default)");
    eprintln!("  complete <topic>           mark a topic complete");
    eprintln!("  uncomplete <topic>         mark a topic pending");
    eprintln!("  note <topic> <text>        save a note for a topic");
    eprintln!("  export                     write study-data-<date>.json");
    eprintln!("  export-progress            write study-progress-<date>.json");
    eprintln!("  export-notes               write study-notes-<date>.json");
    eprintln!("  import <file>              replace progress from a data export");
    eprintln!("  import-notes <file>        merge notes from a notes export");
    eprintln!("  backup                     copy progress to the backup slot");
    eprintln!("  restore                    restore progress from the backup");
    eprintln!("  check                      verify progress, restoring if corrupt");
    eprintln!("  reset                      delete all progress and notes");
    eprintln!("  clear                      delete progress, keeping a backup");
    eprintln!("  watch                      back up periodically until Ctrl-C");
    eprintln!();
    eprintln!("Defaults:");
    eprintln!("  --db sqlite://study.sqlite3");
    eprintln!("  --page: every topic already tracked");
    eprintln!();
    eprintln!("Environment:");
    eprintln!("  STUDY_DB_URL, STUDY_KEY_PREFIX, STUDY_EXPORT_DIR,");
    eprintln!("  STUDY_BACKUP_INTERVAL_SECS, STUDY_NOTES_DEBOUNCE_MS, RUST_LOG");
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Command {
    Status,
    Complete(TopicId),
    Uncomplete(TopicId),
    Note(TopicId, String),
    Export,
    ExportProgress,
    ExportNotes,
    Import(PathBuf),
    ImportNotes(PathBuf),
    Backup,
    Restore,
    Check,
    Reset,
    Clear,
    Watch,
}

impl Command {
    fn parse(name: &str, mut rest: Vec<String>) -> Result<Self, ArgsError> {
        let mut take = |command: &'static str, what: &'static str| {
            if rest.is_empty() {
                Err(ArgsError::MissingArgument { command, what })
            } else {
                Ok(rest.remove(0))
            }
        };

        let command = match name {
            "status" => Self::Status,
            "complete" => Self::Complete(take("complete", "a topic id")?.into()),
            "uncomplete" => Self::Uncomplete(take("uncomplete", "a topic id")?.into()),
            "note" => {
                let topic = take("note", "a topic id")?.into();
                let text = take("note", "the note text")?;
                Self::Note(topic, text)
            }
            "export" => Self::Export,
            "export-progress" => Self::ExportProgress,
            "export-notes" => Self::ExportNotes,
            "import" => Self::Import(take("import", "a file")?.into()),
            "import-notes" => Self::ImportNotes(take("import-notes", "a file")?.into()),
            "backup" => Self::Backup,
            "restore" => Self::Restore,
            "check" => Self::Check,
            "reset" => Self::Reset,
            "clear" => Self::Clear,
            "watch" => Self::Watch,
            other => return Err(ArgsError::UnknownArg(other.to_owned())),
        };

        match rest.into_iter().next() {
            Some(extra) => Err(ArgsError::UnknownArg(extra)),
            None => Ok(command),
        }
    }
}

struct Args {
    command: Command,
    db_url: String,
    page: Option<PathBuf>,
    yes: bool,
}

impl Args {
    fn parse(args: impl IntoIterator<Item = String>) -> Result<Option<Self>, ArgsError> {
        let mut db_url = std::env::var("STUDY_DB_URL")
            .ok()
            .map_or_else(|| "sqlite://study.sqlite3".into(), normalize_sqlite_url);
        let mut page = None;
        let mut yes = false;
        let mut positional = Vec::new();

        let mut args = args.into_iter();
        while let Some(arg) = args.next() {
            match arg.as_str() {
                "--db" => {
                    let value = require_value(&mut args, "--db")?;
                    if value.trim().is_empty() {
                        return Err(ArgsError::InvalidDbUrl { raw: value });
                    }
                    db_url = normalize_sqlite_url(value);
                }
                "--page" => page = Some(PathBuf::from(require_value(&mut args, "--page")?)),
                "--yes" | "-y" => yes = true,
                "--help" | "-h" => return Ok(None),
                _ if arg.starts_with("--") => return Err(ArgsError::UnknownArg(arg)),
                _ => positional.push(arg),
            }
        }

        let command = if positional.is_empty() {
            Command::Status
        } else {
            let name = positional.remove(0);
            Command::parse(&name, positional)?
        };

        Ok(Some(Self {
            command,
            db_url,
            page,
            yes,
        }))
    }
}

const MEMORY_URL: &str = "sqlite::memory:";

/// Accepts a bare path, `sqlite:<path>` or a full `sqlite://` URL.
fn normalize_sqlite_url(raw: String) -> String {
    let raw = raw.trim();
    if raw == MEMORY_URL || raw.starts_with("sqlite://") {
        return raw.to_owned();
    }
    let path = Path::new(raw.strip_prefix("sqlite:").unwrap_or(raw));
    let path = std::path::absolute(path).unwrap_or_else(|_| path.to_path_buf());
    format!("sqlite://{}", path.display())
}

/// The database file behind `db_url`; `None` for in-memory databases.
fn sqlite_file(db_url: &str) -> Result<Option<&Path>, ArgsError> {
    if db_url == MEMORY_URL || db_url.contains("mode=memory") {
        return Ok(None);
    }
    db_url
        .strip_prefix("sqlite://")
        .and_then(|rest| rest.split('?').next())
        .filter(|path| !path.is_empty())
        .map(|path| Some(Path::new(path)))
        .ok_or_else(|| ArgsError::InvalidDbUrl {
            raw: db_url.to_owned(),
        })
}

/// Make sure the progress database file exists so the pool can open it.
fn prepare_sqlite_file(db_url: &str) -> Result<(), Box<dyn std::error::Error>> {
    let Some(path) = sqlite_file(db_url)? else {
        return Ok(());
    };
    if let Some(dir) = path.parent().filter(|dir| !dir.as_os_str().is_empty()) {
        std::fs::create_dir_all(dir)?;
    }
    std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)?;
    debug!(path = %path.display(), "progress database ready");
    Ok(())
}

fn load_page(path: Option<&Path>) -> Result<Option<PageScope>, Box<dyn std::error::Error>> {
    let Some(path) = path else {
        return Ok(None);
    };
    let manifest = std::fs::read_to_string(path)?;
    let page = PageScope::parse(&manifest);
    debug!(path = %path.display(), topics = page.len(), "page manifest loaded");
    Ok(Some(page))
}

async fn run() -> Result<(), Box<dyn std::error::Error>> {
    let Some(args) = Args::parse(std::env::args().skip(1)).map_err(|e| {
        eprintln!("{e}");
        print_usage();
        e
    })?
    else {
        print_usage();
        return Ok(());
    };

    let config = TrackerConfig::from_env()?;
    let page = load_page(args.page.as_deref())?;

    prepare_sqlite_file(&args.db_url)?;
    let services =
        AppServices::new_sqlite(&args.db_url, Clock::system(), config, page).await?;
    let status = services.bootstrap().await?;
    if status == IntegrityStatus::Unrecoverable {
        eprintln!("stored progress is damaged and no usable backup exists");
    }

    let prompt: &dyn UserPrompt = if args.yes { &AutoConfirm } else { &StdinPrompt };
    let export_dir = services.config().export_dir.clone();
    let progress = services.progress();
    let sync = services.sync();
    // reset never backs up, clear takes its own, watch backs up as it stops.
    let backup_on_exit = !matches!(
        args.command,
        Command::Reset | Command::Clear | Command::Watch
    );

    match args.command {
        Command::Status => {
            println!("{}", progress.dashboard());
            if let Some(at) = sync.last_sync().await? {
                println!("last backup: {}", at.to_rfc3339());
            }
        }
        Command::Complete(topic) => {
            let toggled = progress.toggle_topic_completion(topic, true).await?;
            println!("{}", toggled.dashboard);
        }
        Command::Uncomplete(topic) => {
            let toggled = progress.toggle_topic_completion(topic, false).await?;
            println!("{}", toggled.dashboard);
        }
        Command::Note(topic, text) => {
            progress.save_note(topic.clone(), text).await?;
            println!("saved note for {topic}");
        }
        Command::Export => {
            let path = sync.export_data(&export_dir).await?;
            println!("{}", path.display());
        }
        Command::ExportProgress => {
            let path = progress.export_progress(&export_dir).await?;
            println!("{}", path.display());
        }
        Command::ExportNotes => {
            let path = services.notes().export_notes(&export_dir).await?;
            println!("{}", path.display());
        }
        Command::Import(path) => {
            let outcome = sync.import_data(&path).await?;
            println!(
                "imported {} topic(s) and {} note(s)",
                outcome.topics, outcome.notes
            );
        }
        Command::ImportNotes(path) => {
            let count = services.notes().import_notes(&path).await?;
            println!("imported {count} note(s)");
        }
        Command::Backup => match sync.create_backup().await? {
            Some(at) => println!("backup taken at {}", at.to_rfc3339()),
            None => println!("nothing to back up"),
        },
        Command::Restore => {
            if sync.restore_from_backup(prompt).await? == RestoreOutcome::Restored {
                progress.reload().await?;
                println!("{}", progress.dashboard());
            }
        }
        Command::Check => println!("{status:?}"),
        Command::Reset => {
            if progress.reset_progress(prompt).await? {
                println!("progress reset");
            }
        }
        Command::Clear => {
            if sync.clear_all_data(prompt).await? {
                println!("progress cleared; restore brings it back");
            }
        }
        Command::Watch => {
            let backups = sync.spawn_periodic_backup(services.config().backup_interval);
            let watcher = sync.watch_changes(progress);
            info!("watching for changes; press Ctrl-C to stop");

            tokio::signal::ctrl_c().await?;
            watcher.abort();
            services.notes().flush_pending().await?;
            backups.shutdown().await;
        }
    }

    if backup_on_exit {
        services.shutdown().await?;
    }
    Ok(())
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "warn".into()),
        )
        .init();

    if let Err(err) = run().await {
        eprintln!("{err}");
        std::process::exit(2);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(args: &[&str]) -> Result<Option<Args>, ArgsError> {
        Args::parse(args.iter().map(|a| (*a).to_owned()))
    }

    #[test]
    fn no_arguments_shows_status() {
        let args = parse(&[]).unwrap().unwrap();
        assert_eq!(args.command, Command::Status);
        assert!(!args.yes);
    }

    #[test]
    fn flags_mix_with_positionals() {
        let args = parse(&["note", "--yes", "part1-01", "traits", "--page", "page.txt"])
            .unwrap()
            .unwrap();
        assert_eq!(
            args.command,
            Command::Note(TopicId::new("part1-01"), "traits".into())
        );
        assert!(args.yes);
        assert_eq!(args.page, Some(PathBuf::from("page.txt")));
    }

    #[test]
    fn missing_topic_is_an_error() {
        assert!(matches!(
            parse(&["complete"]),
            Err(ArgsError::MissingArgument { command: "complete", .. })
        ));
        assert!(matches!(parse(&["backup", "extra"]), Err(ArgsError::UnknownArg(_))));
        assert!(matches!(parse(&["--db"]), Err(ArgsError::MissingValue { flag: "--db" })));
    }

    #[test]
    fn relative_db_path_becomes_absolute_url() {
        let url = normalize_sqlite_url("data/study.sqlite3".into());
        assert!(url.starts_with("sqlite:///"));
        assert!(url.ends_with("data/study.sqlite3"));
        assert_eq!(normalize_sqlite_url("sqlite::memory:".into()), "sqlite::memory:");
    }

    #[test]
    fn sqlite_file_strips_query_and_skips_memory() {
        assert_eq!(
            sqlite_file("sqlite:///tmp/study.sqlite3?mode=rwc").unwrap(),
            Some(Path::new("/tmp/study.sqlite3"))
        );
        assert_eq!(sqlite_file("sqlite::memory:").unwrap(), None);
        assert_eq!(
            sqlite_file("sqlite:file:memdb?mode=memory&cache=shared").unwrap(),
            None
        );
        assert!(matches!(
            sqlite_file("postgres://db"),
            Err(ArgsError::InvalidDbUrl { .. })
        ));
        assert!(sqlite_file("sqlite://").is_err());
    }
}

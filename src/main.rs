//! CLI entry point for `mailsink`.

use std::io::Read;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use clap::{CommandFactory, Parser, Subcommand};
use indicatif::{ProgressBar, ProgressStyle};

use mailsink::config::Config;
use mailsink::error::SinkError;
use mailsink::forward::SpoolForwarder;
use mailsink::ingest::{self, Ingestor};
use mailsink::model::mail::{Envelope, StoredMessage};
use mailsink::store::repository::Repository;

#[derive(Parser)]
#[command(name = "mailsink", version, about = "Capture, store and search test mail")]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// SQLite database path (overrides the config file)
    #[arg(long, global = true, env = "MAILSINK_DB", value_name = "PATH")]
    db: Option<PathBuf>,

    /// Verbose logging (-v info, -vv debug, -vvv trace)
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    verbose: u8,
}

#[derive(Subcommand)]
enum Commands {
    /// Store one message read from FILE (or stdin)
    Ingest {
        /// Envelope sender
        #[arg(long = "from", value_name = "ADDR")]
        sender: String,
        /// Envelope recipient (repeatable)
        #[arg(long = "to", value_name = "ADDR", required = true)]
        recipients: Vec<String>,
        /// Raw message file; stdin when absent
        file: Option<PathBuf>,
    },
    /// Store every .eml file in a directory, envelope taken from headers
    Import { dir: PathBuf },
    /// List the most recent messages
    List {
        #[arg(short, long)]
        limit: Option<usize>,
        #[arg(long)]
        json: bool,
    },
    /// Search messages
    Search {
        query: String,
        #[arg(short, long)]
        limit: Option<usize>,
        #[arg(long)]
        json: bool,
    },
    /// Show a single message
    Show {
        id: i64,
        #[arg(long, conflicts_with = "raw")]
        json: bool,
        /// Print the raw source exactly as received
        #[arg(long)]
        raw: bool,
    },
    /// Delete a message
    Delete { id: i64 },
    /// Recompute subject and bodies of a message from its raw source
    Rederive { id: i64 },
    /// Print the full-text expression a search query compiles to
    Compile { query: String },
    /// Show store statistics
    Stats {
        #[arg(long)]
        json: bool,
    },
    /// Write the default configuration file
    InitConfig,
    /// Generate shell completions
    Completions {
        #[arg(value_enum)]
        shell: clap_complete::Shell,
    },
    /// Generate a man page
    Manpage,
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let config = mailsink::config::load_config();

    let log_level = match cli.verbose {
        0 => config.general.log_level.as_str(),
        1 => "info",
        2 => "debug",
        _ => "trace",
    };
    setup_logging(log_level, &config);

    let db_path = cli
        .db
        .clone()
        .unwrap_or_else(|| config.storage.db_path.clone());

    match cli.command {
        Commands::Ingest {
            sender,
            recipients,
            file,
        } => cmd_ingest(&config, &db_path, sender, recipients, file.as_deref()),
        Commands::Import { dir } => cmd_import(&config, &db_path, &dir),
        Commands::List { limit, json } => {
            let repo = open_repo(&config, &db_path)?;
            let limit = limit.unwrap_or_else(|| config.search.limit());
            print_messages(&repo.list_recent(limit)?, json)
        }
        Commands::Search { query, limit, json } => {
            let repo = open_repo(&config, &db_path)?;
            let limit = limit.unwrap_or_else(|| config.search.limit());
            let results =
                mailsink::search::execute(&repo, Some(&query), limit).map_err(user_error)?;
            print_messages(&results, json)
        }
        Commands::Show { id, json, raw } => cmd_show(&config, &db_path, id, json, raw),
        Commands::Delete { id } => {
            let mut repo = open_repo(&config, &db_path)?;
            repo.delete(id).map_err(user_error)?;
            println!("  Deleted email {id}");
            Ok(())
        }
        Commands::Rederive { id } => {
            let mut repo = open_repo(&config, &db_path)?;
            let msg = repo.rederive(id).map_err(user_error)?;
            println!("  Re-derived email {id}: {}", msg.subject);
            Ok(())
        }
        Commands::Compile { query } => {
            let compiled = mailsink::search::query::compile(&query)
                .map_err(|e| user_error(e.into()))?;
            println!("{compiled}");
            if cli.verbose > 0 {
                for term in compiled.terms() {
                    let field = term.field.map(|f| f.column()).unwrap_or("*");
                    println!("  {:<9} {:<10} {}", format!("{:?}", term.kind), field, term.text);
                }
            }
            Ok(())
        }
        Commands::Stats { json } => cmd_stats(&config, &db_path, json),
        Commands::InitConfig => {
            mailsink::config::save_config(&config)?;
            if let Some(path) = mailsink::config::config_file_path() {
                println!("  Wrote {}", path.display());
            }
            Ok(())
        }
        Commands::Completions { shell } => cmd_completions(shell),
        Commands::Manpage => cmd_manpage(),
    }
}

/// Set up tracing with stderr output and optional file logging.
fn setup_logging(level: &str, config: &Config) {
    use tracing_subscriber::layer::SubscriberExt;
    use tracing_subscriber::util::SubscriberInitExt;

    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(level));

    let stderr_layer = tracing_subscriber::fmt::layer().with_writer(std::io::stderr);

    let log_dir = mailsink::config::cache_dir(config);
    if std::fs::create_dir_all(&log_dir).is_ok() {
        let file_appender = tracing_appender::rolling::never(&log_dir, "mailsink.log");
        let file_layer = tracing_subscriber::fmt::layer()
            .with_ansi(false)
            .with_writer(file_appender);

        tracing_subscriber::registry()
            .with(env_filter)
            .with(stderr_layer)
            .with(file_layer)
            .init();
    } else {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(stderr_layer)
            .init();
    }
}

fn open_repo(config: &Config, db_path: &Path) -> anyhow::Result<Repository> {
    Ok(Repository::open_with_timeout(
        db_path,
        config.storage.busy_timeout(),
    )?)
}

fn ingestor(config: &Config, db_path: &Path) -> anyhow::Result<Ingestor> {
    let mut ingestor = Ingestor::new(open_repo(config, db_path)?);
    if let Some(dir) = &config.forward.spool_dir {
        ingestor = ingestor.with_forwarder(Arc::new(SpoolForwarder::new(dir)));
    }
    Ok(ingestor)
}

/// Rephrase request errors (missing message, bad query) for the user.
fn user_error(e: SinkError) -> anyhow::Error {
    match e {
        SinkError::NotFound(id) => anyhow::anyhow!("Email {id} not found"),
        SinkError::InvalidQuery(q) => anyhow::anyhow!("Invalid search query: {q}"),
        other => other.into(),
    }
}

fn cmd_ingest(
    config: &Config,
    db_path: &Path,
    sender: String,
    recipients: Vec<String>,
    file: Option<&Path>,
) -> anyhow::Result<()> {
    let raw = match file {
        Some(path) => std::fs::read(path)
            .map_err(|e| anyhow::anyhow!("Cannot read {}: {e}", path.display()))?,
        None => {
            let mut buf = Vec::new();
            std::io::stdin().read_to_end(&mut buf)?;
            buf
        }
    };

    let mut ingestor = ingestor(config, db_path)?;
    let id = ingestor.ingest(&Envelope::new(sender, recipients, raw))?;
    println!("{id}");
    Ok(())
}

fn cmd_import(config: &Config, db_path: &Path, dir: &Path) -> anyhow::Result<()> {
    if !dir.is_dir() {
        anyhow::bail!("Not a directory: {}", dir.display());
    }

    let mut ingestor = ingestor(config, db_path)?;
    let pb = ProgressBar::new(0);
    pb.set_style(
        ProgressStyle::default_bar()
            .template("{spinner:.green} Importing [{bar:40.cyan/blue}] {pos}/{len}")
            .expect("valid template")
            .progress_chars("#>-"),
    );

    let stats = ingest::import_dir(&mut ingestor, dir, &|current, total| {
        pb.set_length(total as u64);
        pb.set_position(current as u64);
    })?;
    pb.finish_and_clear();

    println!("  Imported {} message(s)", stats.imported);
    if !stats.skipped.is_empty() {
        println!("  Skipped {} file(s) without recipients:", stats.skipped.len());
        for path in &stats.skipped {
            println!("    {}", path.display());
        }
    }
    Ok(())
}

fn cmd_show(
    config: &Config,
    db_path: &Path,
    id: i64,
    json: bool,
    raw: bool,
) -> anyhow::Result<()> {
    let repo = open_repo(config, db_path)?;
    let msg = repo.get(id).map_err(user_error)?;

    if raw {
        print!("{}", msg.raw);
    } else if json {
        println!("{}", serde_json::to_string_pretty(&msg)?);
    } else {
        println!("  {:<10} {}", "Id", msg.id);
        println!("  {:<10} {}", "Date", msg.timestamp.format("%Y-%m-%d %H:%M:%S"));
        println!("  {:<10} {}", "From", msg.from);
        for (i, rcpt) in msg.recipients().iter().enumerate() {
            let label = if i == 0 { "To" } else { "" };
            println!("  {:<10} {}", label, rcpt);
        }
        println!("  {:<10} {}", "Subject", msg.subject);
        println!("  {:<10} {}", "Type", msg.content_type.as_str());
        println!();
        let body = if msg.body.is_empty() { &msg.html } else { &msg.body };
        println!("{body}");
    }
    Ok(())
}

fn cmd_stats(config: &Config, db_path: &Path, json: bool) -> anyhow::Result<()> {
    use humansize::{format_size, BINARY};

    let repo = open_repo(config, db_path)?;
    let count = repo.count()?;
    let newest = repo.list_recent(1)?.into_iter().next().map(|m| m.timestamp);
    let db_path = repo.path();
    let db_size = std::fs::metadata(db_path).map(|m| m.len()).unwrap_or(0);
    let log_file = mailsink::config::log_file_path(config);

    if json {
        let stats = serde_json::json!({
            "database": db_path.to_string_lossy(),
            "database_size": db_size,
            "message_count": count,
            "newest": newest.map(|t| t.to_rfc3339()),
            "log_file": log_file.to_string_lossy(),
        });
        println!("{}", serde_json::to_string_pretty(&stats)?);
        return Ok(());
    }

    println!();
    println!("  {:<20} {}", "Database", db_path.display());
    println!("  {:<20} {}", "Database size", format_size(db_size, BINARY));
    println!("  {:<20} {}", "Messages", count);
    if let Some(t) = newest {
        println!("  {:<20} {}", "Newest", t.format("%Y-%m-%d %H:%M:%S"));
    }
    println!("  {:<20} {}", "Log file", log_file.display());
    println!();
    Ok(())
}

/// Print messages as a table or as the JSON array the API returns.
fn print_messages(messages: &[StoredMessage], json: bool) -> anyhow::Result<()> {
    use humansize::{format_size, BINARY};

    if json {
        println!("{}", serde_json::to_string_pretty(messages)?);
        return Ok(());
    }

    println!();
    println!("  {} message(s)", messages.len());
    println!();
    if messages.is_empty() {
        return Ok(());
    }

    println!(
        "  {:<6} {:<19} {:<25} {:<40} {:>8}",
        "Id", "Date", "From", "Subject", "Size"
    );
    println!("  {}", "-".repeat(102));

    for msg in messages {
        let from: String = msg.from.chars().take(24).collect();
        let subject: String = msg.subject.chars().take(39).collect();
        println!(
            "  {:<6} {:<19} {:<25} {:<40} {:>8}",
            msg.id,
            msg.timestamp.format("%Y-%m-%d %H:%M:%S"),
            from,
            subject,
            format_size(msg.raw.len() as u64, BINARY)
        );
    }
    println!();
    Ok(())
}

/// Generate shell completions and print to stdout.
fn cmd_completions(shell: clap_complete::Shell) -> anyhow::Result<()> {
    let mut cmd = Cli::command();
    clap_complete::generate(shell, &mut cmd, "mailsink", &mut std::io::stdout());
    Ok(())
}

/// Generate a man page and print to stdout.
fn cmd_manpage() -> anyhow::Result<()> {
    let cmd = Cli::command();
    let man = clap_mangen::Man::new(cmd);
    let mut buf = Vec::new();
    man.render(&mut buf)?;
    std::io::Write::write_all(&mut std::io::stdout(), &buf)?;
    Ok(())
}

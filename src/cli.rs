//! Inspection CLI for conversations and saved compaction state.
//!
//! No generation capability is wired in here, so scoring and compaction
//! always take the deterministic fallback path.

use crate::compaction::{ContextManager, ConversationSegment};
use crate::config::Config;
use crate::provider::Message;
use crate::session::new_session_id;
use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::process::ExitCode;

#[derive(Parser, Debug)]
#[command(name = "workset", version, about)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Config file (default: <config_dir>/workset/config.toml)
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    /// Debug logging to stderr
    #[arg(short, long, global = true)]
    pub verbose: bool,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Estimate where a conversation stands against the budget
    Analyze(AnalyzeArgs),
    /// Compact a conversation and save the resulting state
    Compact(CompactArgs),
    /// Show segment statistics for a saved session
    Stats(StatsArgs),
    /// Search a saved session's compacted segments
    Search(SearchArgs),
}

#[derive(Parser, Debug)]
pub struct AnalyzeArgs {
    /// JSON array of messages
    pub messages: PathBuf,

    /// System prompt text
    #[arg(short, long, default_value = "")]
    pub system: String,

    /// Output format
    #[arg(short = 'o', long, default_value = "text", value_enum)]
    pub output_format: OutputFormat,
}

#[derive(Parser, Debug)]
pub struct CompactArgs {
    /// JSON array of messages
    pub messages: PathBuf,

    /// Session id for snapshots and state (default: a new id)
    #[arg(long)]
    pub session: Option<String>,

    /// System prompt text
    #[arg(short, long, default_value = "")]
    pub system: String,

    /// Compact every message instead of only what the budget requires
    #[arg(long)]
    pub all: bool,
}

#[derive(Parser, Debug)]
pub struct StatsArgs {
    #[arg(long)]
    pub session: String,
}

#[derive(Parser, Debug)]
pub struct SearchArgs {
    #[arg(long)]
    pub session: String,

    /// Case-insensitive text to look for
    pub query: String,

    #[arg(short = 'o', long, default_value = "text", value_enum)]
    pub output_format: OutputFormat,
}

#[derive(Debug, Clone, Copy, Default, ValueEnum)]
pub enum OutputFormat {
    #[default]
    Text,
    Json,
}

pub async fn run(cli: Cli) -> ExitCode {
    init_tracing(cli.verbose);

    match run_inner(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("Error: {e:#}");
            ExitCode::from(1)
        }
    }
}

async fn run_inner(cli: Cli) -> Result<()> {
    let config = Config::load(cli.config).context("Failed to load config")?;

    match cli.command {
        Commands::Analyze(args) => analyze(&config, args),
        Commands::Compact(args) => compact(&config, args).await,
        Commands::Stats(args) => {
            let manager = load_session(&config, &args.session).await?;
            println!("{}", serde_json::to_string_pretty(&manager.stats())?);
            Ok(())
        }
        Commands::Search(args) => {
            let manager = load_session(&config, &args.session).await?;
            print_segments(&manager.search(&args.query), args.output_format)
        }
    }
}

fn analyze(config: &Config, args: AnalyzeArgs) -> Result<()> {
    let messages = read_messages(&args.messages)?;
    let manager = ContextManager::new(config.context.clone(), None, None)?;
    let window = manager.analyze_context(&messages, &args.system);

    match args.output_format {
        OutputFormat::Text => {
            println!("{}", window.to_log_string());
            if window.total_tokens > config.context.target_context_tokens {
                println!(
                    "Over target ({}): compaction would run",
                    config.context.target_context_tokens
                );
            }
        }
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&window)?),
    }
    Ok(())
}

async fn compact(config: &Config, args: CompactArgs) -> Result<()> {
    let messages = read_messages(&args.messages)?;
    let session_id = args.session.unwrap_or_else(new_session_id);
    let mut manager = session_manager(config, &session_id)?;
    manager
        .load_state(&session_id)
        .await
        .context("Failed to load saved state")?;

    let before = manager.analyze_context(&messages, &args.system);
    let result = if args.all {
        manager.force_summarize_all(&messages).await
    } else {
        manager.manage_context(&messages, &args.system).await
    };
    let after = manager.analyze_context(&result, &args.system);

    let path = manager
        .save_state(&session_id)
        .await
        .context("Failed to save state")?;

    eprintln!("session: {session_id}");
    eprintln!("before:  {}", before.to_log_string());
    eprintln!("after:   {}", after.to_log_string());
    eprintln!("state:   {}", path.display());

    let mut stdout = std::io::stdout().lock();
    serde_json::to_writer_pretty(&mut stdout, &result)?;
    writeln!(stdout)?;
    Ok(())
}

fn session_manager(config: &Config, session_id: &str) -> Result<ContextManager> {
    let context = config
        .context
        .clone()
        .with_snapshot_dir(config.snapshot_dir());
    Ok(ContextManager::new(context, None, None)?.with_session(session_id))
}

async fn load_session(config: &Config, session_id: &str) -> Result<ContextManager> {
    let mut manager = session_manager(config, session_id)?;
    let found = manager
        .load_state(session_id)
        .await
        .context("Failed to load saved state")?;
    if !found {
        anyhow::bail!("No saved state for session {session_id}");
    }
    Ok(manager)
}

/// Read a JSON array of messages. `null` entries are skipped.
fn read_messages(path: &Path) -> Result<Vec<Message>> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read {}", path.display()))?;
    let items: Vec<Option<Message>> = serde_json::from_str(&content)
        .with_context(|| format!("Invalid message list in {}", path.display()))?;
    Ok(items.into_iter().flatten().collect())
}

fn print_segments(segments: &[&ConversationSegment], format: OutputFormat) -> Result<()> {
    match format {
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(segments)?),
        OutputFormat::Text => {
            if segments.is_empty() {
                println!("No matching segments");
            }
            for segment in segments {
                println!(
                    "{} [{:?}] {}",
                    segment.id,
                    segment.importance,
                    segment.summary.as_deref().unwrap_or("(not compacted)")
                );
            }
        }
    }
    Ok(())
}

/// `WORKSET_LOG=<file>` writes debug logs to that file; otherwise `RUST_LOG`
/// or `--verbose` log to stderr.
fn init_tracing(verbose: bool) {
    if let Ok(path) = std::env::var("WORKSET_LOG") {
        use std::fs::File;
        use tracing_subscriber::prelude::*;
        match File::create(&path) {
            Ok(file) => {
                let file_layer = tracing_subscriber::fmt::layer()
                    .with_writer(file)
                    .with_ansi(false);
                let filter = tracing_subscriber::EnvFilter::new("workset=debug");
                let _ = tracing_subscriber::registry()
                    .with(file_layer.with_filter(filter))
                    .try_init();
            }
            Err(err) => {
                eprintln!("Failed to create log file {path}: {err}");
            }
        }
    } else if std::env::var("RUST_LOG").is_ok() {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
            .with_writer(std::io::stderr)
            .try_init();
    } else if verbose {
        let _ = tracing_subscriber::fmt()
            .with_max_level(tracing::Level::DEBUG)
            .with_writer(std::io::stderr)
            .try_init();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_parse_compact_command() {
        let cli = Cli::try_parse_from([
            "workset",
            "compact",
            "messages.json",
            "--session",
            "abc",
            "--all",
        ])
        .unwrap();
        match cli.command {
            Commands::Compact(args) => {
                assert_eq!(args.messages, PathBuf::from("messages.json"));
                assert_eq!(args.session.as_deref(), Some("abc"));
                assert!(args.all);
            }
            other => panic!("Expected compact, got {other:?}"),
        }
    }

    #[test]
    fn test_search_requires_session() {
        assert!(Cli::try_parse_from(["workset", "search", "deploy"]).is_err());
        assert!(Cli::try_parse_from(["workset", "search", "--session", "s", "deploy"]).is_ok());
    }

    #[test]
    fn test_read_messages_skips_nulls() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("messages.json");
        std::fs::write(
            &path,
            r#"[null, {"role": "user", "content": [{"type": "text", "text": "hi"}]}]"#,
        )
        .unwrap();

        let messages = read_messages(&path).unwrap();
        assert_eq!(messages, vec![Message::user("hi")]);
    }

    #[test]
    fn test_read_messages_rejects_garbage() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("messages.json");
        std::fs::write(&path, "not json").unwrap();
        assert!(read_messages(&path).is_err());
    }
}

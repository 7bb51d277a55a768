use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::Context;
use clap::{Parser, Subcommand};
use image_budget::{
    BudgetConfig, BudgetSession, BudgetSnapshot, ConversationMessage, HostPorts, InMemoryTranscript,
    JsonFileSettingsStore, SessionOptions,
};

mod logging;

use logging::init_logging;

#[derive(Parser)]
#[command(name = "image-budget")]
#[command(about = "Inspect and configure the per-turn image tool budget")]
#[command(version)]
struct Cli {
    /// Settings file (defaults to the user config directory)
    #[arg(long, env = "IMAGE_BUDGET_SETTINGS")]
    settings: Option<PathBuf>,

    /// Enable debug mode
    #[arg(long, short, default_value = "false")]
    debug: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Count image tool calls in the current turn of a transcript
    Scan {
        /// JSON array of messages, or one JSON message per line
        transcript: PathBuf,

        /// Override the configured limit for this scan only
        #[arg(long)]
        limit: Option<i64>,
    },
    /// Show or change budget settings
    Settings {
        #[command(subcommand)]
        action: SettingsCommand,
    },
}

#[derive(Subcommand)]
enum SettingsCommand {
    /// Print the current settings
    Show,
    /// Set the number of image tool calls allowed per turn (0 or 1)
    SetLimit { limit: i64 },
    /// Toggle diagnostics logging
    SetDiagnostics {
        #[arg(action = clap::ArgAction::Set)]
        enabled: bool,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_logging(cli.debug);

    let settings_path = match cli.settings {
        Some(path) => path,
        None => default_settings_path()?,
    };
    log::debug!("settings file: {}", settings_path.display());

    match cli.command {
        Commands::Scan { transcript, limit } => scan(&settings_path, &transcript, limit).await,
        Commands::Settings { action } => settings(&settings_path, action).await,
    }
}

fn default_settings_path() -> anyhow::Result<PathBuf> {
    let dir = dirs::config_dir().context("no user config directory available")?;
    Ok(dir
        .join("image-budget")
        .join(JsonFileSettingsStore::DEFAULT_FILENAME))
}

fn session_for(settings_path: &Path, messages: Option<Vec<ConversationMessage>>) -> Arc<BudgetSession> {
    let mut ports =
        HostPorts::new().with_settings(Arc::new(JsonFileSettingsStore::new(settings_path)));
    if let Some(messages) = messages {
        ports = ports.with_transcript(Arc::new(InMemoryTranscript::from_messages(messages)));
    }
    BudgetSession::new(ports, SessionOptions::default())
}

async fn scan(settings_path: &Path, transcript: &Path, limit: Option<i64>) -> anyhow::Result<()> {
    let messages = load_transcript(transcript)?;
    log::info!("loaded {} messages from {}", messages.len(), transcript.display());

    let snapshot = scan_snapshot(settings_path, messages, limit)?;
    println!("{}", serde_json::to_string_pretty(&snapshot)?);
    Ok(())
}

/// Evaluate the budget for a transcript without writing the settings file.
fn scan_snapshot(
    settings_path: &Path,
    messages: Vec<ConversationMessage>,
    limit: Option<i64>,
) -> anyhow::Result<BudgetSnapshot> {
    let session = session_for(settings_path, Some(messages));
    let settings = session.settings();

    let stored = settings
        .read()
        .with_context(|| format!("cannot read {}", settings_path.display()))?
        .unwrap_or_default();
    settings.apply(BudgetConfig {
        limit_per_turn: limit.unwrap_or(stored.limit_per_turn),
        ..stored
    });

    Ok(session.oracle().snapshot())
}

async fn settings(settings_path: &Path, action: SettingsCommand) -> anyhow::Result<()> {
    let session = session_for(settings_path, None);
    let settings = session.settings();
    if matches!(action, SettingsCommand::Show) {
        settings
            .read()
            .with_context(|| format!("cannot read {}", settings_path.display()))?;
    }
    settings.load().await;

    let config = match action {
        SettingsCommand::Show => settings.current(),
        SettingsCommand::SetLimit { limit } => settings.set_limit_per_turn(limit).await,
        SettingsCommand::SetDiagnostics { enabled } => settings.set_show_diagnostics(enabled).await,
    };

    println!("{}", serde_json::to_string_pretty(&config)?);
    if config.limit_per_turn != i64::from(config.effective_limit()) {
        log::warn!(
            "limit_per_turn {} is treated as {}",
            config.limit_per_turn,
            config.effective_limit()
        );
    }
    Ok(())
}

/// Accepts a JSON array of messages or JSON Lines.
fn load_transcript(path: &Path) -> anyhow::Result<Vec<ConversationMessage>> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read {}", path.display()))?;

    if let Ok(messages) = serde_json::from_str::<Vec<ConversationMessage>>(&content) {
        return Ok(messages);
    }

    content
        .lines()
        .enumerate()
        .filter(|(_, line)| !line.trim().is_empty())
        .map(|(index, line)| {
            serde_json::from_str(line)
                .with_context(|| format!("{}:{}: invalid message", path.display(), index + 1))
        })
        .collect()
}

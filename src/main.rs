//! `agora` command line: inspect effective settings, registered pipelines
//! and stored room messages.

#![deny(unsafe_code)]

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};

use agora_core::ids::SessionId;
use agora_engine::PipelineKind;
use agora_settings::{load_settings, load_settings_from_path, AgoraSettings};
use agora_store::{Database, MessageRepo, RoomSessionRepo};
use agora_telemetry::{init_telemetry, TelemetryConfig};

#[derive(Parser, Debug)]
#[command(name = "agora", about = "Moderated discussion room engine")]
struct Cli {
    /// Settings file (defaults to ~/.agora/settings.json).
    #[arg(long, global = true)]
    settings: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Print the effective settings as JSON.
    Settings,
    /// List the accepted pipeline names.
    Pipelines,
    /// Print the stored messages of a room session.
    Messages {
        #[arg(long)]
        session: String,
        /// Database path (overrides settings).
        #[arg(long)]
        db_path: Option<PathBuf>,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    let settings = match &cli.settings {
        Some(path) => load_settings_from_path(path),
        None => load_settings(),
    }
    .context("failed to load settings")?;

    let _telemetry = init_telemetry(TelemetryConfig::from_levels(
        &settings.logging.level,
        settings.logging.modules.iter().map(|(m, l)| (m.as_str(), l.as_str())),
        settings.logging.json,
    ));

    match cli.command {
        Command::Settings => print_settings(&settings),
        Command::Pipelines => {
            for name in PipelineKind::registered_names() {
                println!("{name}\t{}", PipelineKind::from_name(name));
            }
            Ok(())
        }
        Command::Messages { session, db_path } => {
            let path = db_path.unwrap_or_else(|| PathBuf::from(&settings.store.db_path));
            print_messages(&path, &SessionId::from_raw(session))
        }
    }
}

fn print_settings(settings: &AgoraSettings) -> Result<()> {
    let json = serde_json::to_string_pretty(settings).context("failed to serialize settings")?;
    println!("{json}");
    Ok(())
}

fn print_messages(db_path: &Path, session_id: &SessionId) -> Result<()> {
    if !db_path.exists() {
        anyhow::bail!("database not found: {}", db_path.display());
    }
    let db = Database::open(db_path)
        .with_context(|| format!("failed to open {}", db_path.display()))?;
    let session = RoomSessionRepo::new(db.clone())
        .get(session_id)
        .with_context(|| format!("unknown session {session_id}"))?;
    tracing::debug!(session = %session.id, room = %session.room_id, "listing messages");

    let messages = MessageRepo::new(db).list_for_session(session_id)?;
    let out = serde_json::json!({
        "session": session,
        "messages": messages,
    });
    println!("{}", serde_json::to_string_pretty(&out)?);
    Ok(())
}

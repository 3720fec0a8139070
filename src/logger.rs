use std::fs;
use std::path::PathBuf;
use std::sync::OnceLock;

use anyhow::{Context, Result};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_appender::rolling;
use tracing_subscriber::prelude::*;
use tracing_subscriber::{EnvFilter, fmt};

const LOG_FILE: &str = "repotree.log";

static GUARD: OnceLock<WorkerGuard> = OnceLock::new();

/// Install the crate's tracing subscriber: `RUST_LOG`-style env filter
/// and a non-blocking appender writing to `repotree.log` under the
/// user's state directory.
///
/// Hosts that install their own subscriber should skip this; a second
/// initialization (ours or theirs) is a quiet no-op.
pub fn init() -> Result<()> {
    if GUARD.get().is_some() {
        return Ok(());
    }

    let dir = state_dir();
    fs::create_dir_all(&dir)
        .with_context(|| format!("failed to create log directory {}", dir.display()))?;

    let (writer, guard) = tracing_appender::non_blocking(rolling::never(&dir, LOG_FILE));
    let _ = GUARD.set(guard);

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = tracing_subscriber::registry()
        .with(filter)
        .with(
            fmt::layer()
                .with_writer(writer)
                .with_ansi(false)
                .with_target(false),
        )
        .try_init();

    Ok(())
}

/// `$XDG_STATE_HOME/repotree`, falling back to `~/.local/state/repotree`,
/// falling back to the current directory.
fn state_dir() -> PathBuf {
    if let Ok(state_home) = std::env::var("XDG_STATE_HOME")
        && !state_home.is_empty()
    {
        return PathBuf::from(state_home).join("repotree");
    }
    if let Some(home_dir) = home::home_dir() {
        return home_dir.join(".local").join("state").join("repotree");
    }
    PathBuf::from(".")
}

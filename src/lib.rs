pub mod types;
pub mod error;
pub mod config;
pub mod annexe;
pub mod slots;
pub mod bracket;
pub mod tournament;
pub mod predictions;

pub use annexe::{CollisionPolicy, GroupSetKey, ThirdPlaceAssignment, ThirdPlaceSlotSpec, ThirdPlaceTable};
pub use bracket::{Bracket, BracketLayout, BracketSession, MatchState, MatchView, Selections, WinnerChange};
pub use config::TournamentConfig;
pub use error::{ConfigError, InputError, SelectionError};
pub use predictions::{PredictionInputs, PredictionKind, PredictionRecord};
pub use slots::{BracketSlotReference, QualifiedTeams, SlotResolution, SlotResolver};
pub use tournament::Tournament;
pub use types::{Group, GroupStandings, Position, QualifiedTeam, Round, TeamId};

use std::{
    fs,
    io,
    path::{Path, PathBuf},
};
use tracing::info;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::EnvFilter;

// ── Logging ────────────────────────────────────────────────────────────

pub fn default_logs_dir() -> PathBuf {
    config::crate_root().join("logs")
}

/// Daily-rolling file log filtered by `RUST_LOG` (default `info`). Keep the
/// returned guard alive or buffered lines are lost. Calling this again once
/// a subscriber is installed is harmless.
pub fn init_logging(logs_dir: &Path) -> io::Result<WorkerGuard> {
    fs::create_dir_all(logs_dir)?;
    let file_appender = tracing_appender::rolling::daily(logs_dir, "bracket.log");
    let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);
    let installed = tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(non_blocking)
        .with_ansi(false)
        .try_init()
        .is_ok();
    if installed {
        info!("Cup bracket logging to {}", logs_dir.display());
    }
    Ok(guard)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn logging_can_be_initialized_twice() {
        let dir = TempDir::new().unwrap();
        let logs = dir.path().join("logs");
        let first = init_logging(&logs).unwrap();
        let second = init_logging(&logs).unwrap();
        assert!(logs.is_dir());
        drop(second);
        drop(first);
    }

    #[test]
    fn logs_live_next_to_the_manifest() {
        assert!(default_logs_dir().ends_with("logs"));
    }
}

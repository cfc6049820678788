use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::{
  collections::BTreeMap,
  env,
  fs,
  path::{Path, PathBuf},
};
use tracing::info;

use crate::annexe::{CollisionPolicy, ThirdPlaceSlotSpec};
use crate::error::ConfigError;
use crate::types::{Group, Round};

pub const CONFIG_PATH_ENV: &str = "KNOCKOUT_CONFIG_PATH";
pub const DEFAULT_CONFIG_FILE: &str = "tournament.json";

/// 2026-06-11T20:00:00Z, kick-off of the opening match.
const OFFICIAL_DEADLINE_TS: i64 = 1_781_208_000;

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ThirdPlaceSlotConfig {
  #[serde(rename = "match")]
  pub match_number: u16,
  /// Candidate group letters, e.g. `ABCDF`.
  pub candidates: String,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MatchConfig {
  pub id: String,
  pub number: u16,
  pub round: Round,
  /// Slot source code: `1A`, `2F`, `3rd-ABCDF`, `W:<match id>` or `L:<match id>`.
  pub home: String,
  pub away: String,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TournamentConfig {
  pub third_place_slots: Vec<ThirdPlaceSlotConfig>,
  pub matches: Vec<MatchConfig>,
  #[serde(default)]
  pub collision_policy: CollisionPolicy,
  #[serde(default, skip_serializing_if = "Vec::is_empty")]
  pub third_place_table: Vec<BTreeMap<u16, Group>>,
  #[serde(default)]
  pub prediction_deadline: Option<DateTime<Utc>>,
}

impl TournamentConfig {
  /// The 48-team format: 12 groups, 8 best thirds, 32-team knockout.
  pub fn official() -> Self {
    let third_place_slots = vec![
      slot(74, "ABCDF"),
      slot(77, "CDFGH"),
      slot(79, "CEFHI"),
      slot(80, "EHIJK"),
      slot(81, "BEFIJ"),
      slot(82, "AEHIJ"),
      slot(85, "EFGIJ"),
      slot(87, "DEIJL"),
    ];

    let r32 = Round::RoundOf32;
    let r16 = Round::RoundOf16;
    let qf = Round::QuarterFinal;
    let sf = Round::SemiFinal;
    let matches = vec![
      fixture("r32-1", 73, r32, "2A", "2B"),
      fixture("r32-2", 74, r32, "1E", "3rd-ABCDF"),
      fixture("r32-3", 75, r32, "1F", "2C"),
      fixture("r32-4", 76, r32, "1C", "2F"),
      fixture("r32-5", 77, r32, "1I", "3rd-CDFGH"),
      fixture("r32-6", 78, r32, "2E", "2I"),
      fixture("r32-7", 79, r32, "1A", "3rd-CEFHI"),
      fixture("r32-8", 80, r32, "1L", "3rd-EHIJK"),
      fixture("r32-9", 81, r32, "1D", "3rd-BEFIJ"),
      fixture("r32-10", 82, r32, "1G", "3rd-AEHIJ"),
      fixture("r32-11", 83, r32, "2K", "2L"),
      fixture("r32-12", 84, r32, "1H", "2J"),
      fixture("r32-13", 85, r32, "1B", "3rd-EFGIJ"),
      fixture("r32-14", 86, r32, "1J", "2H"),
      fixture("r32-15", 87, r32, "1K", "3rd-DEIJL"),
      fixture("r32-16", 88, r32, "2D", "2G"),
      fixture("r16-1", 89, r16, "W:r32-2", "W:r32-5"),
      fixture("r16-2", 90, r16, "W:r32-1", "W:r32-3"),
      fixture("r16-3", 91, r16, "W:r32-4", "W:r32-6"),
      fixture("r16-4", 92, r16, "W:r32-7", "W:r32-8"),
      fixture("r16-5", 93, r16, "W:r32-11", "W:r32-12"),
      fixture("r16-6", 94, r16, "W:r32-9", "W:r32-10"),
      fixture("r16-7", 95, r16, "W:r32-14", "W:r32-16"),
      fixture("r16-8", 96, r16, "W:r32-13", "W:r32-15"),
      fixture("qf-1", 97, qf, "W:r16-1", "W:r16-2"),
      fixture("qf-2", 98, qf, "W:r16-5", "W:r16-6"),
      fixture("qf-3", 99, qf, "W:r16-3", "W:r16-4"),
      fixture("qf-4", 100, qf, "W:r16-7", "W:r16-8"),
      fixture("sf-1", 101, sf, "W:qf-1", "W:qf-2"),
      fixture("sf-2", 102, sf, "W:qf-3", "W:qf-4"),
      fixture("third", 103, Round::ThirdPlace, "L:sf-1", "L:sf-2"),
      fixture("final", 104, Round::Final, "W:sf-1", "W:sf-2"),
    ];

    TournamentConfig {
      third_place_slots,
      matches,
      // Every eight-group set admits several assignments under these
      // candidate lists; the first one in search order is served.
      collision_policy: CollisionPolicy::FirstFound,
      third_place_table: Vec::new(),
      prediction_deadline: DateTime::from_timestamp(OFFICIAL_DEADLINE_TS, 0),
    }
  }

  pub fn third_place_slot_specs(&self) -> Result<Vec<ThirdPlaceSlotSpec>, ConfigError> {
    self
      .third_place_slots
      .iter()
      .map(|slot| {
        let candidates = Group::parse_letters(&slot.candidates).map_err(|reason| ConfigError::InvalidSlot {
          slot: slot.match_number,
          reason,
        })?;
        Ok(ThirdPlaceSlotSpec::new(slot.match_number, candidates))
      })
      .collect()
  }

  /// Predictions are accepted strictly before the deadline. No deadline
  /// means they never close.
  pub fn predictions_open_at(&self, now: DateTime<Utc>) -> bool {
    match self.prediction_deadline {
      Some(deadline) => now < deadline,
      None => true,
    }
  }
}

fn slot(match_number: u16, candidates: &str) -> ThirdPlaceSlotConfig {
  ThirdPlaceSlotConfig {
    match_number,
    candidates: candidates.to_string(),
  }
}

fn fixture(id: &str, number: u16, round: Round, home: &str, away: &str) -> MatchConfig {
  MatchConfig {
    id: id.to_string(),
    number,
    round,
    home: home.to_string(),
    away: away.to_string(),
  }
}

// ── Paths and loading ──────────────────────────────────────────────────

pub fn crate_root() -> PathBuf {
  PathBuf::from(env!("CARGO_MANIFEST_DIR"))
}

pub fn env_default(key: &str) -> Option<String> {
  env::var(key)
    .ok()
    .map(|value| value.trim().to_string())
    .filter(|value| !value.is_empty())
}

pub fn resolve_config_path(raw: &str) -> PathBuf {
  let path = PathBuf::from(raw.trim());
  if path.is_absolute() {
    path
  } else {
    crate_root().join(path)
  }
}

pub fn tournament_config_path() -> PathBuf {
  match env_default(CONFIG_PATH_ENV) {
    Some(raw) => resolve_config_path(&raw),
    None => crate_root().join(DEFAULT_CONFIG_FILE),
  }
}

/// Loads the tournament rules from `KNOCKOUT_CONFIG_PATH` (or
/// `tournament.json` next to the manifest), falling back to the built-in
/// official rules when no file exists.
pub fn load_tournament_config() -> Result<TournamentConfig, ConfigError> {
  let path = tournament_config_path();
  if !path.is_file() {
    info!("no tournament config at {}, using official rules", path.display());
    return Ok(TournamentConfig::official());
  }
  load_tournament_config_from(&path)
}

pub fn load_tournament_config_from(path: &Path) -> Result<TournamentConfig, ConfigError> {
  let data = fs::read_to_string(path).map_err(|source| ConfigError::Io {
    path: path.to_path_buf(),
    source,
  })?;
  let config = serde_json::from_str::<TournamentConfig>(&data).map_err(|source| ConfigError::Parse {
    path: path.to_path_buf(),
    source,
  })?;
  info!(
    "loaded tournament config {} ({} matches)",
    path.display(),
    config.matches.len()
  );
  Ok(config)
}

pub fn save_tournament_config(config: &TournamentConfig, path: &Path) -> Result<(), ConfigError> {
  let payload = serde_json::to_string_pretty(config).map_err(|source| ConfigError::Parse {
    path: path.to_path_buf(),
    source,
  })?;
  fs::write(path, payload).map_err(|source| ConfigError::Io {
    path: path.to_path_buf(),
    source,
  })
}

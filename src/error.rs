use serde::Serialize;
use std::path::PathBuf;
use thiserror::Error;

use crate::annexe::{GroupSetKey, ThirdPlaceAssignment};
use crate::types::{Group, Position, Round, TeamId};

/// Problems with the static tournament rules. These abort initialization;
/// nothing is served from a partially built table or layout.
#[derive(Debug, Error)]
pub enum ConfigError {
  #[error("third-place rule set yields no valid eight-group assignment")]
  NoAssignments,

  #[error("combination {key} maps to two different assignments: {first} vs {second}")]
  Collision {
    key: GroupSetKey,
    first: ThirdPlaceAssignment,
    second: ThirdPlaceAssignment,
  },

  #[error("expected {expected} third-place slots, found {found}")]
  SlotCount { expected: usize, found: usize },

  #[error("third-place slot {slot}: {reason}")]
  InvalidSlot { slot: u16, reason: String },

  #[error("table row {row}: {reason}")]
  InvalidRow { row: usize, reason: String },

  #[error("duplicate match id {0}")]
  DuplicateMatch(String),

  #[error("match {id}: {reason}")]
  InvalidMatch { id: String, reason: String },

  #[error("{round} needs {expected} matches, found {found}")]
  RoundSize {
    round: Round,
    expected: usize,
    found: usize,
  },

  #[error("read tournament config {}: {source}", .path.display())]
  Io {
    path: PathBuf,
    #[source]
    source: std::io::Error,
  },

  #[error("parse tournament config {}: {source}", .path.display())]
  Parse {
    path: PathBuf,
    #[source]
    source: serde_json::Error,
  },
}

/// Incomplete or malformed per-call input. Slots affected by one of these
/// stay unresolved so a partial bracket can still be shown.
#[derive(Clone, Debug, PartialEq, Eq, Error, Serialize)]
#[serde(tag = "kind", rename_all = "camelCase")]
pub enum InputError {
  #[error("exactly {expected} advancing third-place groups are required, found {found}")]
  WrongThirdCount { expected: usize, found: usize },

  #[error("combination {key} is not covered by the third-place table")]
  UnknownCombination { key: String },

  /// The slots are filled, but the rules admit more than one assignment
  /// for this combination and the first one found was used.
  #[error("combination {key} has several valid slot assignments; the first found was used")]
  AmbiguousCombination { key: String },

  #[error("no third-place slot draws from groups {candidates}")]
  UnknownThirdPlaceSlot { candidates: String },

  #[error("group {group} has no predicted {position} place team")]
  MissingStanding { group: Group, position: Position },

  #[error("group {group} lists {found} teams")]
  TooManyTeams { group: Group, found: usize },

  #[error("group {group} lists team {team} more than once")]
  DuplicateTeam { group: Group, team: TeamId },

  #[error("prediction record is malformed: {reason}")]
  MalformedRecord { reason: String },
}

/// Rejected winner declaration. The bracket is left untouched.
#[derive(Clone, Debug, PartialEq, Eq, Error)]
pub enum SelectionError {
  #[error("unknown match {0}")]
  UnknownMatch(String),

  #[error("match {0} does not have both teams yet")]
  TeamsUnresolved(String),

  #[error("team {team} is not playing in match {match_id}")]
  NotAParticipant { match_id: String, team: TeamId },
}

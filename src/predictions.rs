use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use tracing::debug;

use crate::bracket::{Bracket, BracketSession, Selections, WinnerChange};
use crate::error::InputError;
use crate::tournament::Tournament;
use crate::types::{Group, GroupStandings, Position, TeamId};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum PredictionKind {
  Group,
  Thirds,
  Knockout,
}

/// One saved prediction as the application stores it. `teamOrder` is the
/// predicted finishing order for GROUP, the chosen third-placed teams for
/// THIRDS and a single winner for KNOCKOUT.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PredictionRecord {
  #[serde(rename = "type")]
  pub kind: PredictionKind,
  #[serde(default)]
  pub group_name: Option<String>,
  #[serde(default)]
  pub knockout_round: Option<String>,
  #[serde(default)]
  pub team_order: Vec<TeamId>,
}

impl PredictionRecord {
  pub fn group(group: Group, teams: Vec<TeamId>) -> Self {
    PredictionRecord {
      kind: PredictionKind::Group,
      group_name: Some(group.to_string()),
      knockout_round: None,
      team_order: teams,
    }
  }

  pub fn thirds(teams: Vec<TeamId>) -> Self {
    PredictionRecord {
      kind: PredictionKind::Thirds,
      group_name: None,
      knockout_round: None,
      team_order: teams,
    }
  }

  pub fn knockout(match_id: &str, winner: TeamId) -> Self {
    PredictionRecord {
      kind: PredictionKind::Knockout,
      group_name: None,
      knockout_round: Some(match_id.to_string()),
      team_order: vec![winner],
    }
  }
}

/// Engine inputs rebuilt from saved records.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct PredictionInputs {
  pub standings: GroupStandings,
  pub advancing_thirds: BTreeSet<Group>,
  pub selections: Selections,
  /// Records that could not be used. The rest still apply.
  pub issues: Vec<InputError>,
}

impl PredictionInputs {
  /// Later records of the same group or match replace earlier ones. THIRDS
  /// entries naming a team that is not a predicted third place are dropped.
  pub fn from_records(records: &[PredictionRecord]) -> Self {
    let mut inputs = PredictionInputs::default();

    for record in records.iter().filter(|r| r.kind == PredictionKind::Group) {
      let Some(raw) = record.group_name.as_deref() else {
        inputs.malformed("group prediction without a group name");
        continue;
      };
      let group = match raw.parse::<Group>() {
        Ok(group) => group,
        Err(reason) => {
          inputs.malformed(reason);
          continue;
        }
      };
      if let Err(issue) = inputs.standings.set(group, record.team_order.clone()) {
        inputs.issues.push(issue);
      }
    }

    if let Some(record) = records.iter().rev().find(|r| r.kind == PredictionKind::Thirds) {
      for team in &record.team_order {
        match inputs.standings.third_place_group_of(team) {
          Some(group) => {
            inputs.advancing_thirds.insert(group);
          }
          None => debug!(%team, "dropping third-place pick that is no longer a predicted third"),
        }
      }
    }

    for record in records.iter().filter(|r| r.kind == PredictionKind::Knockout) {
      let match_id = record.knockout_round.as_deref().map(str::trim).unwrap_or_default();
      match (match_id.is_empty(), record.team_order.first()) {
        (false, Some(winner)) => {
          inputs.selections.insert(match_id.to_string(), winner.clone());
        }
        _ => inputs.malformed("knockout prediction needs a match id and a winner"),
      }
    }

    inputs
  }

  /// Opens a session on `tournament`, dropping saved winners that no longer
  /// fit the predicted standings.
  pub fn into_session(self, tournament: &Tournament) -> (BracketSession<'_>, WinnerChange) {
    let mut session = tournament.session(self.standings, self.advancing_thirds);
    let change = session.restore_selections(self.selections);
    (session, change)
  }

  fn malformed(&mut self, reason: impl Into<String>) {
    self.issues.push(InputError::MalformedRecord { reason: reason.into() });
  }
}

pub fn group_records(standings: &GroupStandings) -> Vec<PredictionRecord> {
  standings
    .standings()
    .map(|standing| PredictionRecord::group(standing.group, standing.teams))
    .collect()
}

/// THIRDS stores team ids, not groups. Advancing groups without a predicted
/// third place are skipped.
pub fn thirds_record(standings: &GroupStandings, advancing_thirds: &BTreeSet<Group>) -> PredictionRecord {
  let teams = advancing_thirds
    .iter()
    .filter_map(|group| standings.team_at(*group, Position::Third).cloned())
    .collect();
  PredictionRecord::thirds(teams)
}

impl Bracket {
  /// One KNOCKOUT record per decided match.
  pub fn knockout_records(&self) -> Vec<PredictionRecord> {
    self
      .matches
      .iter()
      .filter_map(|view| {
        view
          .state
          .winner()
          .map(|winner| PredictionRecord::knockout(&view.id, winner.clone()))
      })
      .collect()
  }
}

impl BracketSession<'_> {
  /// Everything needed to restore this session later.
  pub fn records(&self) -> Vec<PredictionRecord> {
    let mut records = group_records(self.standings());
    records.push(thirds_record(self.standings(), self.advancing_thirds()));
    records.extend(self.bracket().knockout_records());
    records
  }
}

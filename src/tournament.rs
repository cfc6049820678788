use chrono::{DateTime, Utc};
use once_cell::sync::OnceCell;
use std::collections::BTreeSet;
use tracing::info;

use crate::annexe::ThirdPlaceTable;
use crate::bracket::{Bracket, BracketLayout, BracketSession, Selections};
use crate::config::{load_tournament_config, TournamentConfig};
use crate::error::ConfigError;
use crate::slots::{QualifiedTeams, SlotResolution};
use crate::types::{Group, GroupStandings};

static OFFICIAL: OnceCell<Tournament> = OnceCell::new();

/// Compiled tournament rules: the third-place table and the bracket layout.
/// Read-only once built.
#[derive(Debug)]
pub struct Tournament {
  config: TournamentConfig,
  table: ThirdPlaceTable,
  layout: BracketLayout,
}

impl Tournament {
  pub fn from_config(config: TournamentConfig) -> Result<Self, ConfigError> {
    let slots = config.third_place_slot_specs()?;
    let table = if config.third_place_table.is_empty() {
      ThirdPlaceTable::enumerate(slots, config.collision_policy)?
    } else {
      ThirdPlaceTable::from_rows(slots, &config.third_place_table)?
    };
    let layout = BracketLayout::from_config(&config.matches, &table)?;
    info!(
      matches = layout.len(),
      combinations = table.len(),
      "tournament rules compiled"
    );
    Ok(Tournament { config, table, layout })
  }

  /// The built-in 2026 rules, compiled on first use and shared afterwards.
  pub fn official() -> Result<&'static Tournament, ConfigError> {
    OFFICIAL.get_or_try_init(|| Tournament::from_config(TournamentConfig::official()))
  }

  /// Rules from `KNOCKOUT_CONFIG_PATH` or the default file, falling back to
  /// the built-in rules when neither exists.
  pub fn load() -> Result<Self, ConfigError> {
    Tournament::from_config(load_tournament_config()?)
  }

  pub fn config(&self) -> &TournamentConfig {
    &self.config
  }

  pub fn table(&self) -> &ThirdPlaceTable {
    &self.table
  }

  pub fn layout(&self) -> &BracketLayout {
    &self.layout
  }

  pub fn qualified_teams(&self, standings: &GroupStandings, advancing_thirds: &BTreeSet<Group>) -> QualifiedTeams {
    QualifiedTeams::derive(standings, advancing_thirds)
  }

  pub fn resolve_round_of_32(&self, standings: &GroupStandings, advancing_thirds: &BTreeSet<Group>) -> SlotResolution {
    let qualified = self.qualified_teams(standings, advancing_thirds);
    self.layout.resolve_slots(&self.table, &qualified)
  }

  pub fn build_bracket(
    &self,
    standings: &GroupStandings,
    advancing_thirds: &BTreeSet<Group>,
    selections: &Selections,
  ) -> Bracket {
    let resolution = self.resolve_round_of_32(standings, advancing_thirds);
    Bracket::build(&self.layout, &resolution, selections)
  }

  pub fn session(&self, standings: GroupStandings, advancing_thirds: BTreeSet<Group>) -> BracketSession<'_> {
    BracketSession::new(&self.layout, &self.table, standings, advancing_thirds)
  }

  pub fn predictions_open_at(&self, now: DateTime<Utc>) -> bool {
    self.config.predictions_open_at(now)
  }
}

use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use tracing::debug;

use crate::annexe::ThirdPlaceTable;
use crate::config::MatchConfig;
use crate::error::{ConfigError, InputError, SelectionError};
use crate::slots::{BracketSlotReference, QualifiedTeams, SlotResolution, SlotResolver};
use crate::types::{Group, GroupStandings, Round, TeamId};

/// Chosen winner per match id.
pub type Selections = BTreeMap<String, TeamId>;

// ── Layout ─────────────────────────────────────────────────────────────

/// Where a team slot gets its occupant. Feeder matches are referenced by
/// their position in the layout.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum SlotSource {
  Reference(BracketSlotReference),
  Winner(usize),
  Loser(usize),
}

impl SlotSource {
  fn parse(code: &str, index: &HashMap<String, usize>) -> Result<Self, String> {
    let code = code.trim();
    let feeder = |id: &str| {
      let id = id.trim();
      index
        .get(id)
        .copied()
        .ok_or_else(|| format!("feeder '{id}' is not an earlier match"))
    };
    if let Some(id) = code.strip_prefix("W:") {
      return Ok(SlotSource::Winner(feeder(id)?));
    }
    if let Some(id) = code.strip_prefix("L:") {
      return Ok(SlotSource::Loser(feeder(id)?));
    }
    code.parse().map(SlotSource::Reference)
  }

  pub fn feeder(&self) -> Option<usize> {
    match self {
      SlotSource::Winner(index) | SlotSource::Loser(index) => Some(*index),
      SlotSource::Reference(_) => None,
    }
  }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct MatchSpec {
  pub id: String,
  pub number: u16,
  pub round: Round,
  pub sources: [SlotSource; 2],
}

/// Immutable match adjacency, validated once when the rules are loaded.
#[derive(Clone, Debug)]
pub struct BracketLayout {
  matches: Vec<MatchSpec>,
  index: HashMap<String, usize>,
  dependents: Vec<Vec<usize>>,
}

impl BracketLayout {
  pub fn from_config(configs: &[MatchConfig], table: &ThirdPlaceTable) -> Result<Self, ConfigError> {
    let mut matches: Vec<MatchSpec> = Vec::with_capacity(configs.len());
    let mut index = HashMap::new();
    let mut feeds: HashMap<SlotSource, String> = HashMap::new();

    for config in configs {
      let id = config.id.trim().to_string();
      if id.is_empty() {
        return Err(invalid_match(&id, "match id is empty"));
      }
      if index.contains_key(&id) {
        return Err(ConfigError::DuplicateMatch(id));
      }

      let mut sources = Vec::with_capacity(2);
      for code in [&config.home, &config.away] {
        let source = SlotSource::parse(code, &index).map_err(|reason| invalid_match(&id, reason))?;
        check_source(config.round, &source, &matches, table).map_err(|reason| invalid_match(&id, reason))?;
        if let Some(previous) = feeds.get(&source) {
          return Err(invalid_match(
            &id,
            format!("{} already feeds match {previous}", code.trim()),
          ));
        }
        feeds.insert(source.clone(), id.clone());
        sources.push(source);
      }
      let [home, away]: [SlotSource; 2] = match sources.try_into() {
        Ok(pair) => pair,
        Err(_) => return Err(invalid_match(&id, "a match needs exactly two slots")),
      };

      index.insert(id.clone(), matches.len());
      matches.push(MatchSpec {
        id,
        number: config.number,
        round: config.round,
        sources: [home, away],
      });
    }

    for round in Round::ALL {
      let found = matches.iter().filter(|spec| spec.round == round).count();
      if found != round.expected_matches() {
        return Err(ConfigError::RoundSize {
          round,
          expected: round.expected_matches(),
          found,
        });
      }
    }

    let mut dependents = vec![Vec::new(); matches.len()];
    for (position, spec) in matches.iter().enumerate() {
      for source in &spec.sources {
        if let Some(feeder) = source.feeder() {
          dependents[feeder].push(position);
        }
      }
    }

    Ok(BracketLayout {
      matches,
      index,
      dependents,
    })
  }

  pub fn matches(&self) -> &[MatchSpec] {
    &self.matches
  }

  pub fn len(&self) -> usize {
    self.matches.len()
  }

  pub fn is_empty(&self) -> bool {
    self.matches.is_empty()
  }

  pub fn index_of(&self, match_id: &str) -> Option<usize> {
    self.index.get(match_id).copied()
  }

  pub fn get(&self, match_id: &str) -> Option<&MatchSpec> {
    self.matches.get(self.index_of(match_id)?)
  }

  /// Every slot reference seeding the opening round, in layout order.
  pub fn references(&self) -> impl Iterator<Item = &BracketSlotReference> {
    self.matches.iter().flat_map(|spec| {
      spec.sources.iter().filter_map(|source| match source {
        SlotSource::Reference(reference) => Some(reference),
        _ => None,
      })
    })
  }

  pub fn resolve_slots(&self, table: &ThirdPlaceTable, qualified: &QualifiedTeams) -> SlotResolution {
    SlotResolver::new(table, qualified).resolve_all(self.references())
  }

  /// `root` plus every match whose teams depend on it, directly or through
  /// later rounds.
  pub fn collect_dependents(&self, root: usize) -> BTreeSet<usize> {
    let mut affected = BTreeSet::new();
    let mut stack = vec![root];
    while let Some(current) = stack.pop() {
      if !affected.insert(current) {
        continue;
      }
      if let Some(children) = self.dependents.get(current) {
        stack.extend(children.iter().copied());
      }
    }
    affected
  }

  pub fn source_code(&self, source: &SlotSource) -> String {
    match source {
      SlotSource::Reference(reference) => reference.to_string(),
      SlotSource::Winner(feeder) => format!("W:{}", self.matches[*feeder].id),
      SlotSource::Loser(feeder) => format!("L:{}", self.matches[*feeder].id),
    }
  }
}

fn invalid_match(id: &str, reason: impl Into<String>) -> ConfigError {
  ConfigError::InvalidMatch {
    id: id.to_string(),
    reason: reason.into(),
  }
}

fn check_source(
  round: Round,
  source: &SlotSource,
  earlier: &[MatchSpec],
  table: &ThirdPlaceTable,
) -> Result<(), String> {
  match source {
    SlotSource::Reference(reference) => {
      if round != Round::RoundOf32 {
        return Err(format!("{reference} can only seed the {}", Round::RoundOf32));
      }
      if let BracketSlotReference::BestThird { candidates } = reference {
        if table.slot_for_candidates(candidates).is_none() {
          return Err(format!("{reference} matches no third-place slot"));
        }
      }
      Ok(())
    }
    SlotSource::Winner(feeder) | SlotSource::Loser(feeder) => {
      let feeder = &earlier[*feeder];
      if round.feeder_round() != Some(feeder.round) {
        return Err(format!("{round} cannot be fed from {} match {}", feeder.round, feeder.id));
      }
      let takes_losers = round == Round::ThirdPlace;
      let is_loser = matches!(source, SlotSource::Loser(_));
      if takes_losers && !is_loser {
        return Err("the third-place match is played by the semi-final losers".to_string());
      }
      if !takes_losers && is_loser {
        return Err("only the third-place match takes losers".to_string());
      }
      Ok(())
    }
  }
}

// ── Match state ────────────────────────────────────────────────────────

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(tag = "state", rename_all = "camelCase")]
pub enum MatchState {
  Unresolved {
    team1: Option<TeamId>,
    team2: Option<TeamId>,
  },
  ResolvedPending {
    team1: TeamId,
    team2: TeamId,
  },
  Decided {
    team1: TeamId,
    team2: TeamId,
    winner: TeamId,
  },
}

impl MatchState {
  /// Applies a recorded selection to the derived teams. The flag is set when
  /// the selection names a team that is not in the match.
  fn settle(team1: Option<TeamId>, team2: Option<TeamId>, selection: Option<&TeamId>) -> (MatchState, bool) {
    match (team1, team2) {
      (Some(team1), Some(team2)) => match selection {
        Some(winner) if *winner == team1 || *winner == team2 => (
          MatchState::Decided {
            winner: winner.clone(),
            team1,
            team2,
          },
          false,
        ),
        selection => (MatchState::ResolvedPending { team1, team2 }, selection.is_some()),
      },
      (team1, team2) => (MatchState::Unresolved { team1, team2 }, selection.is_some()),
    }
  }

  pub fn teams(&self) -> (Option<&TeamId>, Option<&TeamId>) {
    match self {
      MatchState::Unresolved { team1, team2 } => (team1.as_ref(), team2.as_ref()),
      MatchState::ResolvedPending { team1, team2 } | MatchState::Decided { team1, team2, .. } => {
        (Some(team1), Some(team2))
      }
    }
  }

  pub fn winner(&self) -> Option<&TeamId> {
    match self {
      MatchState::Decided { winner, .. } => Some(winner),
      _ => None,
    }
  }

  pub fn loser(&self) -> Option<&TeamId> {
    match self {
      MatchState::Decided { team1, team2, winner } => Some(if winner == team1 { team2 } else { team1 }),
      _ => None,
    }
  }
}

// ── Bracket view ───────────────────────────────────────────────────────

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MatchView {
  pub id: String,
  pub number: u16,
  pub round: Round,
  pub home: String,
  pub away: String,
  #[serde(flatten)]
  pub state: MatchState,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Bracket {
  pub matches: Vec<MatchView>,
  /// Why opening-round slots are still unresolved, or were filled from an
  /// ambiguous third-place combination.
  pub issues: Vec<InputError>,
  /// Selections that name a team no longer in their match, then selections
  /// for match ids the layout does not have. They are ignored.
  pub stale_selections: Vec<String>,
}

impl Bracket {
  /// Threads resolved slots and selections through the layout. Pure: the
  /// same inputs always produce the same bracket.
  pub fn build(layout: &BracketLayout, resolution: &SlotResolution, selections: &Selections) -> Bracket {
    let mut matches: Vec<MatchView> = Vec::with_capacity(layout.len());
    let mut stale_selections = Vec::new();

    for spec in layout.matches() {
      let [home, away] = &spec.sources;
      let team1 = slot_team(home, resolution, &matches);
      let team2 = slot_team(away, resolution, &matches);
      let (state, stale) = MatchState::settle(team1, team2, selections.get(&spec.id));
      if stale {
        stale_selections.push(spec.id.clone());
      }
      matches.push(MatchView {
        id: spec.id.clone(),
        number: spec.number,
        round: spec.round,
        home: layout.source_code(home),
        away: layout.source_code(away),
        state,
      });
    }
    stale_selections.extend(
      selections
        .keys()
        .filter(|match_id| layout.index_of(match_id).is_none())
        .cloned(),
    );

    Bracket {
      matches,
      issues: resolution.issues().to_vec(),
      stale_selections,
    }
  }

  pub fn round(&self, round: Round) -> impl Iterator<Item = &MatchView> {
    self.matches.iter().filter(move |view| view.round == round)
  }

  pub fn match_by_id(&self, match_id: &str) -> Option<&MatchView> {
    self.matches.iter().find(|view| view.id == match_id)
  }

  pub fn champion(&self) -> Option<&TeamId> {
    self.round(Round::Final).next()?.state.winner()
  }
}

fn slot_team(source: &SlotSource, resolution: &SlotResolution, built: &[MatchView]) -> Option<TeamId> {
  match source {
    SlotSource::Reference(reference) => resolution.team(reference).cloned(),
    SlotSource::Winner(feeder) => built.get(*feeder)?.state.winner().cloned(),
    SlotSource::Loser(feeder) => built.get(*feeder)?.state.loser().cloned(),
  }
}

// ── Session ────────────────────────────────────────────────────────────

/// Selections dropped as a side effect of an update.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct WinnerChange {
  pub cleared: Vec<String>,
}

/// Holds one user's inputs and keeps the derived bracket in step with them.
/// Whenever the teams of a match change, its selection and every selection
/// downstream of it are dropped.
pub struct BracketSession<'a> {
  layout: &'a BracketLayout,
  table: &'a ThirdPlaceTable,
  standings: GroupStandings,
  advancing_thirds: BTreeSet<Group>,
  selections: Selections,
  bracket: Bracket,
}

impl<'a> BracketSession<'a> {
  pub fn new(
    layout: &'a BracketLayout,
    table: &'a ThirdPlaceTable,
    standings: GroupStandings,
    advancing_thirds: BTreeSet<Group>,
  ) -> Self {
    let mut session = BracketSession {
      layout,
      table,
      standings,
      advancing_thirds,
      selections: Selections::new(),
      bracket: Bracket {
        matches: Vec::new(),
        issues: Vec::new(),
        stale_selections: Vec::new(),
      },
    };
    session.bracket = session.compute();
    session
  }

  pub fn bracket(&self) -> &Bracket {
    &self.bracket
  }

  pub fn selections(&self) -> &Selections {
    &self.selections
  }

  pub fn standings(&self) -> &GroupStandings {
    &self.standings
  }

  pub fn advancing_thirds(&self) -> &BTreeSet<Group> {
    &self.advancing_thirds
  }

  /// Loads previously saved selections, dropping any that no longer fit.
  pub fn restore_selections(&mut self, selections: Selections) -> WinnerChange {
    self.selections = selections;
    self.bracket = self.compute();
    let (cleared, unknown) = self.prune_stale();
    self.finish(cleared, unknown)
  }

  pub fn declare_winner(&mut self, match_id: &str, team: &TeamId) -> Result<WinnerChange, SelectionError> {
    let view = self
      .bracket
      .match_by_id(match_id)
      .ok_or_else(|| SelectionError::UnknownMatch(match_id.to_string()))?;
    let (Some(team1), Some(team2)) = view.state.teams() else {
      debug!(match_id, %team, "winner rejected, teams unresolved");
      return Err(SelectionError::TeamsUnresolved(match_id.to_string()));
    };
    if team != team1 && team != team2 {
      debug!(match_id, %team, %team1, %team2, "winner rejected, not a participant");
      return Err(SelectionError::NotAParticipant {
        match_id: match_id.to_string(),
        team: team.clone(),
      });
    }
    if view.state.winner() == Some(team) {
      return Ok(WinnerChange::default());
    }

    debug!(match_id, %team, "winner declared");
    self.selections.insert(match_id.to_string(), team.clone());
    Ok(self.rebuild())
  }

  pub fn clear_winner(&mut self, match_id: &str) -> Result<WinnerChange, SelectionError> {
    if self.layout.index_of(match_id).is_none() {
      return Err(SelectionError::UnknownMatch(match_id.to_string()));
    }
    if self.selections.remove(match_id).is_none() {
      return Ok(WinnerChange::default());
    }
    debug!(match_id, "winner cleared");
    Ok(self.rebuild())
  }

  pub fn update_standings(&mut self, standings: GroupStandings) -> WinnerChange {
    self.standings = standings;
    self.rebuild()
  }

  pub fn update_advancing_thirds(&mut self, advancing_thirds: BTreeSet<Group>) -> WinnerChange {
    self.advancing_thirds = advancing_thirds;
    self.rebuild()
  }

  fn compute(&self) -> Bracket {
    let qualified = QualifiedTeams::derive(&self.standings, &self.advancing_thirds);
    let resolution = self.layout.resolve_slots(self.table, &qualified);
    Bracket::build(self.layout, &resolution, &self.selections)
  }

  fn rebuild(&mut self) -> WinnerChange {
    let next = self.compute();
    let previous = std::mem::replace(&mut self.bracket, next);

    let mut cleared = BTreeSet::new();
    for (position, (before, after)) in previous.matches.iter().zip(&self.bracket.matches).enumerate() {
      if before.state.teams() == after.state.teams() {
        continue;
      }
      for affected in self.layout.collect_dependents(position) {
        if self.selections.remove(&self.layout.matches[affected].id).is_some() {
          cleared.insert(affected);
        }
      }
    }
    if !cleared.is_empty() {
      self.bracket = self.compute();
    }
    let (stale, unknown) = self.prune_stale();
    cleared.extend(stale);
    self.finish(cleared, unknown)
  }

  /// Drops every selection the last build ignored. Returns the layout
  /// positions cleared and, separately, the ids that match nothing.
  fn prune_stale(&mut self) -> (BTreeSet<usize>, Vec<String>) {
    let mut cleared = BTreeSet::new();
    let mut unknown = Vec::new();
    for match_id in &self.bracket.stale_selections {
      if self.selections.remove(match_id).is_none() {
        continue;
      }
      match self.layout.index_of(match_id) {
        Some(position) => {
          cleared.insert(position);
        }
        None => unknown.push(match_id.clone()),
      }
    }
    if !cleared.is_empty() || !unknown.is_empty() {
      self.bracket = self.compute();
    }
    (cleared, unknown)
  }

  fn finish(&self, cleared: BTreeSet<usize>, unknown: Vec<String>) -> WinnerChange {
    let cleared: Vec<String> = cleared
      .into_iter()
      .map(|position| self.layout.matches[position].id.clone())
      .chain(unknown)
      .collect();
    if !cleared.is_empty() {
      debug!(?cleared, "downstream selections cleared");
    }
    WinnerChange { cleared }
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::config::TournamentConfig;
  use crate::tournament::Tournament;

  fn official() -> &'static Tournament {
    Tournament::official().unwrap()
  }

  fn full_standings() -> GroupStandings {
    let mut standings = GroupStandings::new();
    for group in Group::ALL {
      let lower = group.letter().to_ascii_lowercase();
      let teams = (1..=4).map(|place| TeamId::new(format!("{lower}{place}"))).collect();
      standings.set(group, teams).unwrap();
    }
    standings
  }

  fn groups(letters: &str) -> BTreeSet<Group> {
    Group::parse_letters(letters).unwrap().into_iter().collect()
  }

  fn session() -> BracketSession<'static> {
    official().session(full_standings(), groups("ABCDEFGH"))
  }

  fn teams(session: &BracketSession<'_>, match_id: &str) -> (Option<TeamId>, Option<TeamId>) {
    let (team1, team2) = session.bracket().match_by_id(match_id).unwrap().state.teams();
    (team1.cloned(), team2.cloned())
  }

  fn winner(session: &BracketSession<'_>, match_id: &str) -> Option<TeamId> {
    session.bracket().match_by_id(match_id).unwrap().state.winner().cloned()
  }

  fn pick_home_everywhere(session: &mut BracketSession<'_>) {
    let ids: Vec<String> = session.bracket().matches.iter().map(|view| view.id.clone()).collect();
    for id in ids {
      let home = teams(session, &id).0.unwrap();
      session.declare_winner(&id, &home).unwrap();
    }
  }

  fn round_sizes(bracket: &Bracket) -> Vec<usize> {
    Round::ALL.iter().map(|round| bracket.round(*round).count()).collect()
  }

  #[test]
  fn rounds_have_fixed_sizes_for_any_input() {
    let tournament = official();
    let empty = tournament.build_bracket(&GroupStandings::new(), &BTreeSet::new(), &Selections::new());
    assert_eq!(round_sizes(&empty), vec![16, 8, 4, 2, 1, 1]);
    assert!(empty.matches.iter().all(|view| matches!(
      view.state,
      MatchState::Unresolved {
        team1: None,
        team2: None
      }
    )));

    let full = tournament.build_bracket(&full_standings(), &groups("ABCDEFGH"), &Selections::new());
    assert_eq!(round_sizes(&full), vec![16, 8, 4, 2, 1, 1]);
    // Every official combination is ambiguous; the slots are still filled.
    assert_eq!(
      full.issues,
      vec![InputError::AmbiguousCombination {
        key: "ABCDEFGH".to_string()
      }]
    );
    assert!(full
      .round(Round::RoundOf32)
      .all(|view| matches!(view.state, MatchState::ResolvedPending { .. })));
  }

  #[test]
  fn opening_round_uses_group_places_and_third_table() {
    let session = session();
    assert_eq!(teams(&session, "r32-1"), (Some("a2".into()), Some("b2".into())));
    // ABCDEFGH puts A's third into match 74.
    assert_eq!(teams(&session, "r32-2"), (Some("e1".into()), Some("a3".into())));
    let view = session.bracket().match_by_id("r32-2").unwrap();
    assert_eq!(view.home, "1E");
    assert_eq!(view.away, "3rd-ABCDF");
  }

  #[test]
  fn wrong_third_count_leaves_third_slots_tbd() {
    let bracket = official().build_bracket(&full_standings(), &groups("ABCDEFG"), &Selections::new());
    let r32_2 = bracket.match_by_id("r32-2").unwrap();
    assert_eq!(r32_2.state.teams(), (Some(&"e1".into()), None));
    assert_eq!(
      bracket.issues,
      vec![InputError::WrongThirdCount {
        expected: 8,
        found: 7
      }]
    );
    assert!(matches!(
      bracket.match_by_id("r32-1").unwrap().state,
      MatchState::ResolvedPending { .. }
    ));
  }

  #[test]
  fn later_rounds_stay_tbd_until_feeders_are_decided() {
    let mut session = session();
    assert_eq!(teams(&session, "r16-1"), (None, None));
    session.declare_winner("r32-2", &"e1".into()).unwrap();
    assert_eq!(teams(&session, "r16-1"), (Some("e1".into()), None));
    assert!(matches!(
      session.bracket().match_by_id("r16-1").unwrap().state,
      MatchState::Unresolved { .. }
    ));
  }

  #[test]
  fn invalid_declarations_leave_state_unchanged() {
    let mut session = session();
    session.declare_winner("r32-1", &"a2".into()).unwrap();
    let before = session.bracket().clone();
    let selections_before = session.selections().clone();

    let err = session.declare_winner("r32-1", &"c1".into()).unwrap_err();
    assert_eq!(
      err,
      SelectionError::NotAParticipant {
        match_id: "r32-1".to_string(),
        team: "c1".into()
      }
    );
    let err = session.declare_winner("r16-2", &"a2".into()).unwrap_err();
    assert_eq!(err, SelectionError::TeamsUnresolved("r16-2".to_string()));
    let err = session.declare_winner("r99", &"a2".into()).unwrap_err();
    assert_eq!(err, SelectionError::UnknownMatch("r99".to_string()));

    assert_eq!(session.bracket(), &before);
    assert_eq!(session.selections(), &selections_before);
    assert_eq!(winner(&session, "r32-1"), Some("a2".into()));
  }

  #[test]
  fn changing_an_early_winner_resets_everything_downstream() {
    let mut session = session();
    pick_home_everywhere(&mut session);
    assert_eq!(winner(&session, "r16-1"), Some("e1".into()));
    assert!(session.bracket().champion().is_some());

    let change = session.declare_winner("r32-2", &"a3".into()).unwrap();
    assert_eq!(change.cleared, vec!["r16-1", "qf-1", "sf-1", "third", "final"]);
    assert_eq!(winner(&session, "r16-1"), None);
    assert_eq!(teams(&session, "r16-1").0, Some("a3".into()));
    assert_eq!(teams(&session, "qf-1").0, None);
    assert!(session.bracket().champion().is_none());
    assert!(!session.selections().contains_key("final"));
    // The other half of the draw is untouched.
    assert!(winner(&session, "sf-2").is_some());
  }

  #[test]
  fn semi_final_feeds_winner_to_final_and_loser_to_third_place() {
    let mut session = session();
    pick_home_everywhere(&mut session);
    let (p, q) = teams(&session, "sf-1");
    let (p, q) = (p.unwrap(), q.unwrap());
    assert_eq!(winner(&session, "sf-1"), Some(p.clone()));
    assert_eq!(teams(&session, "final").0, Some(p.clone()));
    assert_eq!(teams(&session, "third").0, Some(q.clone()));

    let change = session.declare_winner("sf-1", &q).unwrap();
    assert_eq!(change.cleared, vec!["third", "final"]);
    assert_eq!(teams(&session, "final").0, Some(q));
    assert_eq!(teams(&session, "third").0, Some(p));
    assert_eq!(winner(&session, "final"), None);
  }

  #[test]
  fn redeclaring_the_same_winner_is_a_no_op() {
    let mut session = session();
    pick_home_everywhere(&mut session);
    let change = session.declare_winner("r32-2", &"e1".into()).unwrap();
    assert!(change.cleared.is_empty());
    assert!(session.bracket().champion().is_some());
  }

  #[test]
  fn clearing_a_winner_cascades() {
    let mut session = session();
    pick_home_everywhere(&mut session);
    let change = session.clear_winner("qf-4").unwrap();
    assert_eq!(change.cleared, vec!["sf-2", "third", "final"]);
    assert_eq!(winner(&session, "qf-4"), None);
    assert_eq!(teams(&session, "sf-2").1, None);
    assert_eq!(session.clear_winner("qf-4").unwrap(), WinnerChange::default());
    assert!(session.clear_winner("nope").is_err());
  }

  #[test]
  fn standings_change_clears_matches_whose_teams_moved() {
    let mut session = session();
    pick_home_everywhere(&mut session);
    let untouched = winner(&session, "r32-3");

    // Swap A's top two: r32-1 (2A) and r32-7 (1A) both change.
    let standings = full_standings().with(Group::A, &["a2", "a1", "a3", "a4"]).unwrap();
    let change = session.update_standings(standings);
    assert!(change.cleared.contains(&"r32-1".to_string()));
    assert!(change.cleared.contains(&"r32-7".to_string()));
    assert!(change.cleared.contains(&"final".to_string()));
    assert_eq!(winner(&session, "r32-3"), untouched);
    assert!(session.bracket().stale_selections.is_empty());
  }

  #[test]
  fn changing_thirds_below_eight_clears_third_slot_matches() {
    let mut session = session();
    pick_home_everywhere(&mut session);
    let change = session.update_advancing_thirds(groups("ABCDEFG"));
    for id in ["r32-2", "r32-5", "r32-7", "r32-8"] {
      assert!(change.cleared.contains(&id.to_string()), "{id}");
    }
    assert!(!change.cleared.contains(&"r32-1".to_string()));
    assert_eq!(session.bracket().issues.len(), 1);
  }

  #[test]
  fn pure_build_reports_and_ignores_stale_selections() {
    let tournament = official();
    let mut selections = Selections::new();
    selections.insert("r32-1".to_string(), "a2".into());
    selections.insert("r32-3".to_string(), "zz".into());
    selections.insert("r16-1".to_string(), "e1".into());
    selections.insert("r99".to_string(), "a1".into());
    let bracket = tournament.build_bracket(&full_standings(), &groups("ABCDEFGH"), &selections);
    assert_eq!(bracket.match_by_id("r32-1").unwrap().state.winner(), Some(&"a2".into()));
    assert_eq!(bracket.match_by_id("r32-3").unwrap().state.winner(), None);
    assert_eq!(bracket.stale_selections, vec!["r32-3", "r16-1", "r99"]);

    let again = tournament.build_bracket(&full_standings(), &groups("ABCDEFGH"), &selections);
    assert_eq!(bracket, again);
  }

  #[test]
  fn restoring_selections_prunes_the_stale_ones() {
    let mut session = session();
    let mut selections = Selections::new();
    selections.insert("r32-1".to_string(), "a2".into());
    selections.insert("r32-3".to_string(), "zz".into());
    let change = session.restore_selections(selections);
    assert_eq!(change.cleared, vec!["r32-3"]);
    assert_eq!(session.selections().len(), 1);
    assert!(session.bracket().stale_selections.is_empty());
  }

  #[test]
  fn restoring_selections_drops_unknown_match_ids() {
    let mut session = session();
    let mut selections = Selections::new();
    selections.insert("r32-1".to_string(), "a2".into());
    selections.insert("r32-3".to_string(), "zz".into());
    selections.insert("r99".to_string(), "a1".into());
    let change = session.restore_selections(selections);
    assert_eq!(change.cleared, vec!["r32-3", "r99"]);
    assert!(!session.selections().contains_key("r99"));
    assert_eq!(winner(&session, "r32-1"), Some("a2".into()));
    assert!(session.bracket().stale_selections.is_empty());
  }

  #[test]
  fn match_state_serializes_with_a_tag() {
    let state = MatchState::Decided {
      team1: "a".into(),
      team2: "b".into(),
      winner: "b".into(),
    };
    let json = serde_json::to_value(&state).unwrap();
    assert_eq!(json["state"], "decided");
    assert_eq!(json["winner"], "b");
    assert_eq!(state.loser(), Some(&"a".into()));
  }

  fn layout_error(edit: impl FnOnce(&mut TournamentConfig)) -> ConfigError {
    let mut config = TournamentConfig::official();
    edit(&mut config);
    let tournament = official();
    BracketLayout::from_config(&config.matches, tournament.table()).unwrap_err()
  }

  fn set_match(config: &mut TournamentConfig, id: &str, home: &str, away: &str) {
    let fixture = config.matches.iter_mut().find(|m| m.id == id).unwrap();
    fixture.home = home.to_string();
    fixture.away = away.to_string();
  }

  #[test]
  fn layout_rejects_broken_adjacency() {
    let err = layout_error(|config| config.matches[1].id = "r32-1".to_string());
    assert!(matches!(err, ConfigError::DuplicateMatch(id) if id == "r32-1"));

    let err = layout_error(|config| set_match(config, "final", "L:sf-1", "L:sf-2"));
    assert!(matches!(err, ConfigError::InvalidMatch { id, .. } if id == "final"));

    let err = layout_error(|config| set_match(config, "third", "W:sf-1", "W:sf-2"));
    assert!(matches!(err, ConfigError::InvalidMatch { id, .. } if id == "third"));

    let err = layout_error(|config| set_match(config, "qf-1", "W:r32-1", "W:r16-2"));
    assert!(matches!(err, ConfigError::InvalidMatch { id, .. } if id == "qf-1"));

    let err = layout_error(|config| set_match(config, "r16-1", "1A", "W:r32-5"));
    assert!(matches!(err, ConfigError::InvalidMatch { id, .. } if id == "r16-1"));

    let err = layout_error(|config| set_match(config, "r32-2", "1E", "3rd-ABCDE"));
    assert!(matches!(err, ConfigError::InvalidMatch { id, .. } if id == "r32-2"));

    let err = layout_error(|config| set_match(config, "r16-2", "W:r32-2", "W:r32-3"));
    assert!(matches!(err, ConfigError::InvalidMatch { id, .. } if id == "r16-2"));

    let err = layout_error(|config| set_match(config, "r32-1", "1A", "2B"));
    assert!(matches!(err, ConfigError::InvalidMatch { .. }));

    let err = layout_error(|config| {
      config.matches.pop();
    });
    assert!(matches!(err, ConfigError::RoundSize { round: Round::Final, .. }));
  }

  #[test]
  fn dependents_follow_both_winner_and_loser_feeds() {
    let layout = official().layout();
    let sf1 = layout.index_of("sf-1").unwrap();
    let ids: BTreeSet<&str> = layout
      .collect_dependents(sf1)
      .into_iter()
      .map(|position| layout.matches()[position].id.as_str())
      .collect();
    assert_eq!(ids, BTreeSet::from(["sf-1", "third", "final"]));
  }
}

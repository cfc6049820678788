use serde::Serialize;
use std::{
  collections::{BTreeMap, BTreeSet},
  fmt,
  str::FromStr,
};
use tracing::debug;

use crate::annexe::{GroupSetKey, ThirdPlaceTable};
use crate::error::InputError;
use crate::types::{Group, GroupStandings, Position, QualifiedTeam, TeamId, ADVANCING_THIRDS};

/// Compact position code from the Round-of-32 template.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum BracketSlotReference {
  /// `1A`, `2F`: winner or runner-up of a group.
  GroupPlace { position: Position, group: Group },
  /// `3rd-ABCDF`: the third-place slot drawing from exactly these groups.
  BestThird { candidates: Vec<Group> },
}

impl BracketSlotReference {
  pub fn group_place(position: Position, group: Group) -> Self {
    BracketSlotReference::GroupPlace { position, group }
  }

  pub fn best_third(candidates: &[Group]) -> Self {
    let sorted: BTreeSet<Group> = candidates.iter().copied().collect();
    BracketSlotReference::BestThird {
      candidates: sorted.into_iter().collect(),
    }
  }
}

impl fmt::Display for BracketSlotReference {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self {
      BracketSlotReference::GroupPlace { position, group } => write!(f, "{}{}", position.number(), group),
      BracketSlotReference::BestThird { candidates } => write!(f, "3rd-{}", Group::letters(candidates)),
    }
  }
}

impl FromStr for BracketSlotReference {
  type Err = String;

  fn from_str(s: &str) -> Result<Self, Self::Err> {
    let trimmed = s.trim();
    if let Some(letters) = trimmed.strip_prefix("3rd-") {
      let candidates = Group::parse_letters(letters)?;
      let distinct: BTreeSet<Group> = candidates.iter().copied().collect();
      if candidates.is_empty() || distinct.len() != candidates.len() {
        return Err(format!("Invalid third-place slot '{trimmed}'."));
      }
      return Ok(BracketSlotReference::best_third(&candidates));
    }
    let mut chars = trimmed.chars();
    let position = match chars.next() {
      Some('1') => Position::First,
      Some('2') => Position::Second,
      _ => return Err(format!("Invalid slot reference '{trimmed}'.")),
    };
    let group = chars.as_str().parse::<Group>()?;
    Ok(BracketSlotReference::GroupPlace { position, group })
  }
}

// ── Qualified teams ────────────────────────────────────────────────────

/// Teams through to the knockout stage, derived fresh from the predicted
/// standings and the user's choice of advancing third places.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct QualifiedTeams {
  teams: Vec<QualifiedTeam>,
  advancing_thirds: BTreeSet<Group>,
}

impl QualifiedTeams {
  pub fn derive(standings: &GroupStandings, advancing_thirds: &BTreeSet<Group>) -> Self {
    let mut teams = Vec::new();
    for standing in standings.standings() {
      for position in [Position::First, Position::Second, Position::Third] {
        if position == Position::Third && !advancing_thirds.contains(&standing.group) {
          continue;
        }
        if let Some(team) = standing.team_at(position) {
          teams.push(QualifiedTeam {
            team: team.clone(),
            group: standing.group,
            position,
          });
        }
      }
    }
    QualifiedTeams {
      teams,
      advancing_thirds: advancing_thirds.clone(),
    }
  }

  pub fn find(&self, group: Group, position: Position) -> Option<&QualifiedTeam> {
    self
      .teams
      .iter()
      .find(|qualified| qualified.group == group && qualified.position == position)
  }

  pub fn teams(&self) -> &[QualifiedTeam] {
    &self.teams
  }

  pub fn advancing_thirds(&self) -> &BTreeSet<Group> {
    &self.advancing_thirds
  }

  /// Key for the third-place table. Fails unless exactly eight groups were
  /// chosen.
  pub fn advancing_key(&self) -> Result<GroupSetKey, InputError> {
    if self.advancing_thirds.len() != ADVANCING_THIRDS {
      return Err(InputError::WrongThirdCount {
        expected: ADVANCING_THIRDS,
        found: self.advancing_thirds.len(),
      });
    }
    Ok(GroupSetKey::from_groups(&self.advancing_thirds))
  }
}

// ── Resolver ───────────────────────────────────────────────────────────

pub struct SlotResolver<'a> {
  table: &'a ThirdPlaceTable,
  qualified: &'a QualifiedTeams,
}

impl<'a> SlotResolver<'a> {
  pub fn new(table: &'a ThirdPlaceTable, qualified: &'a QualifiedTeams) -> Self {
    SlotResolver { table, qualified }
  }

  pub fn resolve(&self, reference: &BracketSlotReference) -> Result<&'a QualifiedTeam, InputError> {
    match reference {
      BracketSlotReference::GroupPlace { position, group } => {
        self
          .qualified
          .find(*group, *position)
          .ok_or(InputError::MissingStanding {
            group: *group,
            position: *position,
          })
      }
      BracketSlotReference::BestThird { candidates } => {
        let key = self.qualified.advancing_key()?;
        let assignment = self
          .table
          .lookup(&key)
          .ok_or_else(|| InputError::UnknownCombination {
            key: key.to_string(),
          })?;
        let slot = self
          .table
          .slot_for_candidates(candidates)
          .ok_or_else(|| InputError::UnknownThirdPlaceSlot {
            candidates: Group::letters(candidates),
          })?;
        let group = assignment
          .group_for_slot(slot.match_number)
          .ok_or_else(|| InputError::UnknownThirdPlaceSlot {
            candidates: Group::letters(candidates),
          })?;
        self
          .qualified
          .find(group, Position::Third)
          .ok_or(InputError::MissingStanding {
            group,
            position: Position::Third,
          })
      }
    }
  }

  /// Resolves every reference, collecting the distinct problems instead of
  /// stopping at the first one. A third-place slot served from an ambiguous
  /// combination is filled and also reported.
  pub fn resolve_all<'r>(&self, references: impl IntoIterator<Item = &'r BracketSlotReference>) -> SlotResolution {
    let mut resolution = SlotResolution::default();
    let mut served_third = false;
    for reference in references {
      match self.resolve(reference) {
        Ok(qualified) => {
          if matches!(reference, BracketSlotReference::BestThird { .. }) {
            served_third = true;
          }
          resolution.slots.insert(reference.clone(), Some(qualified.clone()));
        }
        Err(issue) => {
          debug!(slot = %reference, %issue, "slot left unresolved");
          resolution.slots.insert(reference.clone(), None);
          resolution.push_issue(issue);
        }
      }
    }
    if served_third {
      if let Ok(key) = self.qualified.advancing_key() {
        if self.table.is_ambiguous(&key) {
          debug!(%key, "third-place slots served from an ambiguous combination");
          resolution.push_issue(InputError::AmbiguousCombination { key: key.to_string() });
        }
      }
    }
    resolution
  }
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct SlotResolution {
  slots: BTreeMap<BracketSlotReference, Option<QualifiedTeam>>,
  issues: Vec<InputError>,
}

impl SlotResolution {
  pub fn qualified(&self, reference: &BracketSlotReference) -> Option<&QualifiedTeam> {
    self.slots.get(reference)?.as_ref()
  }

  pub fn team(&self, reference: &BracketSlotReference) -> Option<&TeamId> {
    self.qualified(reference).map(|qualified| &qualified.team)
  }

  pub fn issues(&self) -> &[InputError] {
    &self.issues
  }

  pub fn is_ambiguous(&self) -> bool {
    self
      .issues
      .iter()
      .any(|issue| matches!(issue, InputError::AmbiguousCombination { .. }))
  }

  fn push_issue(&mut self, issue: InputError) {
    if !self.issues.contains(&issue) {
      self.issues.push(issue);
    }
  }

  pub fn is_complete(&self) -> bool {
    self.slots.values().all(Option::is_some)
  }

  pub fn iter(&self) -> impl Iterator<Item = (&BracketSlotReference, Option<&QualifiedTeam>)> {
    self.slots.iter().map(|(reference, team)| (reference, team.as_ref()))
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::annexe::CollisionPolicy;
  use crate::config::TournamentConfig;
  use once_cell::sync::Lazy;
  use proptest::prelude::*;

  static TABLE: Lazy<ThirdPlaceTable> = Lazy::new(|| {
    let slots = TournamentConfig::official().third_place_slot_specs().unwrap();
    ThirdPlaceTable::enumerate(slots, CollisionPolicy::FirstFound).unwrap()
  });

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

  fn reference(raw: &str) -> BracketSlotReference {
    raw.parse().unwrap()
  }

  #[test]
  fn references_parse_and_print_canonically() {
    assert_eq!(
      reference("1A"),
      BracketSlotReference::group_place(Position::First, Group::A)
    );
    assert_eq!(reference("2f").to_string(), "2F");
    assert_eq!(reference("3rd-FDCBA").to_string(), "3rd-ABCDF");
    assert!("3A".parse::<BracketSlotReference>().is_err());
    assert!("1".parse::<BracketSlotReference>().is_err());
    assert!("3rd-AAB".parse::<BracketSlotReference>().is_err());
    assert!("3rd-".parse::<BracketSlotReference>().is_err());
  }

  #[test]
  fn group_places_resolve_directly() {
    let standings = full_standings();
    let qualified = QualifiedTeams::derive(&standings, &BTreeSet::new());
    let resolver = SlotResolver::new(&TABLE, &qualified);
    assert_eq!(resolver.resolve(&reference("1A")).unwrap().team, TeamId::from("a1"));
    assert_eq!(resolver.resolve(&reference("2L")).unwrap().team, TeamId::from("l2"));
  }

  #[test]
  fn missing_group_is_unresolved_not_guessed() {
    let mut standings = full_standings();
    standings.remove(Group::C);
    let qualified = QualifiedTeams::derive(&standings, &BTreeSet::new());
    let resolver = SlotResolver::new(&TABLE, &qualified);
    let err = resolver.resolve(&reference("1C")).unwrap_err();
    assert_eq!(
      err,
      InputError::MissingStanding {
        group: Group::C,
        position: Position::First
      }
    );
  }

  #[test]
  fn best_third_follows_the_table_assignment() {
    let standings = full_standings();
    let advancing = groups("ABCDFGHI");
    let qualified = QualifiedTeams::derive(&standings, &advancing);
    let resolver = SlotResolver::new(&TABLE, &qualified);

    let key = qualified.advancing_key().unwrap();
    let assignment = TABLE.lookup(&key).unwrap();
    let expected = assignment.group_for_slot(74).unwrap();
    assert!(groups("ABCDF").contains(&expected));

    let team = resolver.resolve(&reference("3rd-ABCDF")).unwrap();
    assert_eq!(team.group, expected);
    assert_eq!(team.position, Position::Third);
    assert_eq!(team.team, TeamId::new(format!("{}3", expected.letter().to_ascii_lowercase())));
  }

  #[test]
  fn all_eight_third_slots_use_distinct_advancing_groups() {
    let standings = full_standings();
    let advancing = groups("ACEGIJKL");
    let qualified = QualifiedTeams::derive(&standings, &advancing);
    let resolver = SlotResolver::new(&TABLE, &qualified);
    let mut seen = BTreeSet::new();
    for slot in TABLE.slots() {
      let team = resolver
        .resolve(&BracketSlotReference::best_third(&slot.candidates))
        .unwrap();
      assert!(advancing.contains(&team.group));
      assert!(slot.allows(team.group));
      assert!(seen.insert(team.group));
    }
    assert_eq!(seen, advancing);
  }

  #[test]
  fn wrong_number_of_thirds_leaves_every_third_slot_unresolved() {
    let standings = full_standings();
    let third_refs: Vec<BracketSlotReference> = TABLE
      .slots()
      .iter()
      .map(|slot| BracketSlotReference::best_third(&slot.candidates))
      .collect();
    for letters in ["ABCDEFG", "ABCDEFGHI", ""] {
      let qualified = QualifiedTeams::derive(&standings, &groups(letters));
      let resolution = SlotResolver::new(&TABLE, &qualified).resolve_all(&third_refs);
      assert!(third_refs.iter().all(|r| resolution.team(r).is_none()));
      assert_eq!(
        resolution.issues(),
        &[InputError::WrongThirdCount {
          expected: 8,
          found: letters.len()
        }]
      );
    }
  }

  #[test]
  fn advancing_group_without_a_third_is_reported() {
    let mut standings = full_standings();
    standings
      .set(Group::A, vec!["a1".into(), "a2".into()])
      .unwrap();
    let advancing = groups("ABCDEFGH");
    let qualified = QualifiedTeams::derive(&standings, &advancing);
    let resolver = SlotResolver::new(&TABLE, &qualified);
    // 74:A in the first-found assignment for this set.
    let err = resolver.resolve(&reference("3rd-ABCDF")).unwrap_err();
    assert_eq!(
      err,
      InputError::MissingStanding {
        group: Group::A,
        position: Position::Third
      }
    );
  }

  #[test]
  fn ambiguous_combinations_are_flagged_per_call() {
    let standings = full_standings();
    let advancing = groups("ABCDEFGH");
    let qualified = QualifiedTeams::derive(&standings, &advancing);
    let third_refs: Vec<BracketSlotReference> = TABLE
      .slots()
      .iter()
      .map(|slot| BracketSlotReference::best_third(&slot.candidates))
      .collect();

    let resolution = SlotResolver::new(&TABLE, &qualified).resolve_all(&third_refs);
    assert!(resolution.is_complete());
    assert!(resolution.is_ambiguous());
    assert_eq!(
      resolution.issues(),
      &[InputError::AmbiguousCombination {
        key: "ABCDEFGH".to_string()
      }]
    );

    // Group places alone never touch the table.
    let firsts = [reference("1A"), reference("2B")];
    let resolution = SlotResolver::new(&TABLE, &qualified).resolve_all(&firsts);
    assert!(resolution.issues().is_empty());

    let key = qualified.advancing_key().unwrap();
    let row: BTreeMap<u16, Group> = TABLE.lookup(&key).unwrap().iter().collect();
    let published = ThirdPlaceTable::from_rows(TABLE.slots().to_vec(), &[row]).unwrap();
    let resolution = SlotResolver::new(&published, &qualified).resolve_all(&third_refs);
    assert!(resolution.is_complete());
    assert!(!resolution.is_ambiguous());
    assert!(resolution.issues().is_empty());
  }

  #[test]
  fn unknown_slot_candidates_are_not_guessed() {
    let standings = full_standings();
    let qualified = QualifiedTeams::derive(&standings, &groups("ABCDEFGH"));
    let resolver = SlotResolver::new(&TABLE, &qualified);
    let err = resolver.resolve(&reference("3rd-ABCDE")).unwrap_err();
    assert!(matches!(err, InputError::UnknownThirdPlaceSlot { .. }));
  }

  proptest! {
    #[test]
    fn resolution_is_deterministic(
      thirds in prop::sample::subsequence(Group::ALL.to_vec(), 0..=12),
      dropped in prop::sample::subsequence(Group::ALL.to_vec(), 0..=3),
    ) {
      let mut standings = full_standings();
      for group in &dropped {
        standings.remove(*group);
      }
      let advancing: BTreeSet<Group> = thirds.into_iter().collect();
      let mut references: Vec<BracketSlotReference> = TABLE
        .slots()
        .iter()
        .map(|slot| BracketSlotReference::best_third(&slot.candidates))
        .collect();
      for group in Group::ALL {
        references.push(BracketSlotReference::group_place(Position::First, group));
        references.push(BracketSlotReference::group_place(Position::Second, group));
      }

      let first = SlotResolver::new(&TABLE, &QualifiedTeams::derive(&standings, &advancing)).resolve_all(&references);
      let second = SlotResolver::new(&TABLE, &QualifiedTeams::derive(&standings, &advancing)).resolve_all(&references);
      prop_assert_eq!(&first, &second);
      if advancing.len() != 8 {
        let wrong_count = first
          .issues()
          .iter()
          .any(|issue| matches!(issue, InputError::WrongThirdCount { .. }));
        prop_assert!(wrong_count);
      }
    }
  }
}

use serde::{Deserialize, Serialize};
use std::{
  collections::{BTreeMap, BTreeSet},
  fmt,
  str::FromStr,
};

use crate::error::InputError;

// ── Constants ──────────────────────────────────────────────────────────

pub const GROUP_COUNT: usize = 12;
pub const TEAMS_PER_GROUP: usize = 4;
pub const ADVANCING_THIRDS: usize = 8;
pub const THIRD_PLACE_SLOT_COUNT: usize = 8;
pub const CANDIDATES_PER_SLOT: usize = 5;

// ── Groups and teams ───────────────────────────────────────────────────

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum Group {
  A,
  B,
  C,
  D,
  E,
  F,
  G,
  H,
  I,
  J,
  K,
  L,
}

impl Group {
  pub const ALL: [Group; GROUP_COUNT] = [
    Group::A,
    Group::B,
    Group::C,
    Group::D,
    Group::E,
    Group::F,
    Group::G,
    Group::H,
    Group::I,
    Group::J,
    Group::K,
    Group::L,
  ];

  pub fn index(self) -> usize {
    self as usize
  }

  pub fn letter(self) -> char {
    (b'A' + self as u8) as char
  }

  pub fn from_letter(letter: char) -> Option<Group> {
    let upper = letter.to_ascii_uppercase();
    if !upper.is_ascii_uppercase() {
      return None;
    }
    Group::ALL.get((upper as u8 - b'A') as usize).copied()
  }

  /// Parses a run of group letters such as `ABCDF`, keeping input order.
  pub fn parse_letters(raw: &str) -> Result<Vec<Group>, String> {
    raw
      .trim()
      .chars()
      .map(|c| Group::from_letter(c).ok_or_else(|| format!("Unknown group letter '{c}'.")))
      .collect()
  }

  pub fn letters<'a>(groups: impl IntoIterator<Item = &'a Group>) -> String {
    groups.into_iter().map(|g| g.letter()).collect()
  }
}

impl fmt::Display for Group {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "{}", self.letter())
  }
}

impl FromStr for Group {
  type Err = String;

  fn from_str(s: &str) -> Result<Self, Self::Err> {
    let trimmed = s.trim();
    let mut chars = trimmed.chars();
    match (chars.next(), chars.next()) {
      (Some(c), None) => Group::from_letter(c).ok_or_else(|| format!("Unknown group '{trimmed}'.")),
      _ => Err(format!("Unknown group '{trimmed}'.")),
    }
  }
}

impl TryFrom<String> for Group {
  type Error = String;

  fn try_from(value: String) -> Result<Self, Self::Error> {
    value.parse()
  }
}

impl From<Group> for String {
  fn from(group: Group) -> Self {
    group.letter().to_string()
  }
}

#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TeamId(String);

impl TeamId {
  pub fn new(id: impl Into<String>) -> Self {
    TeamId(id.into())
  }

  pub fn as_str(&self) -> &str {
    &self.0
  }
}

impl fmt::Display for TeamId {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(&self.0)
  }
}

impl From<&str> for TeamId {
  fn from(value: &str) -> Self {
    TeamId(value.to_string())
  }
}

impl From<String> for TeamId {
  fn from(value: String) -> Self {
    TeamId(value)
  }
}

/// Predicted finishing place inside a group. Only the top three matter for
/// the knockout stage.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Position {
  First,
  Second,
  Third,
}

impl Position {
  pub fn index(self) -> usize {
    self as usize
  }

  pub fn number(self) -> u8 {
    self as u8 + 1
  }
}

impl fmt::Display for Position {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    let label = match self {
      Position::First => "1st",
      Position::Second => "2nd",
      Position::Third => "3rd",
    };
    f.write_str(label)
  }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct QualifiedTeam {
  pub team: TeamId,
  pub group: Group,
  pub position: Position,
}

// ── Group standings ────────────────────────────────────────────────────

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GroupStanding {
  pub group: Group,
  pub teams: Vec<TeamId>,
}

impl GroupStanding {
  pub fn team_at(&self, position: Position) -> Option<&TeamId> {
    self.teams.get(position.index())
  }
}

/// Predicted finishing order per group. Groups may be missing and orders may
/// be partial while the user is still filling them in.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct GroupStandings {
  orders: BTreeMap<Group, Vec<TeamId>>,
}

impl GroupStandings {
  pub fn new() -> Self {
    GroupStandings::default()
  }

  pub fn set(&mut self, group: Group, teams: Vec<TeamId>) -> Result<(), InputError> {
    if teams.len() > TEAMS_PER_GROUP {
      return Err(InputError::TooManyTeams {
        group,
        found: teams.len(),
      });
    }
    let mut seen = BTreeSet::new();
    for team in &teams {
      if !seen.insert(team) {
        return Err(InputError::DuplicateTeam {
          group,
          team: team.clone(),
        });
      }
    }
    self.orders.insert(group, teams);
    Ok(())
  }

  pub fn with(mut self, group: Group, teams: &[&str]) -> Result<Self, InputError> {
    self.set(group, teams.iter().map(|t| TeamId::from(*t)).collect())?;
    Ok(self)
  }

  pub fn remove(&mut self, group: Group) {
    self.orders.remove(&group);
  }

  pub fn standing(&self, group: Group) -> Option<GroupStanding> {
    self.orders.get(&group).map(|teams| GroupStanding {
      group,
      teams: teams.clone(),
    })
  }

  pub fn standings(&self) -> impl Iterator<Item = GroupStanding> + '_ {
    self.orders.iter().map(|(group, teams)| GroupStanding {
      group: *group,
      teams: teams.clone(),
    })
  }

  pub fn team_at(&self, group: Group, position: Position) -> Option<&TeamId> {
    self.orders.get(&group)?.get(position.index())
  }

  pub fn is_empty(&self) -> bool {
    self.orders.is_empty()
  }

  /// Every predicted third-placed team, for picking the eight that advance.
  pub fn third_place_candidates(&self) -> Vec<QualifiedTeam> {
    self
      .orders
      .iter()
      .filter_map(|(group, teams)| {
        teams.get(Position::Third.index()).map(|team| QualifiedTeam {
          team: team.clone(),
          group: *group,
          position: Position::Third,
        })
      })
      .collect()
  }

  /// Group whose predicted third place is `team`, if any.
  pub fn third_place_group_of(&self, team: &TeamId) -> Option<Group> {
    self
      .orders
      .iter()
      .find(|(_, teams)| teams.get(Position::Third.index()) == Some(team))
      .map(|(group, _)| *group)
  }
}

// ── Knockout rounds ────────────────────────────────────────────────────

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Round {
  #[serde(rename = "r32")]
  RoundOf32,
  #[serde(rename = "r16")]
  RoundOf16,
  #[serde(rename = "qf")]
  QuarterFinal,
  #[serde(rename = "sf")]
  SemiFinal,
  #[serde(rename = "third")]
  ThirdPlace,
  #[serde(rename = "final")]
  Final,
}

impl Round {
  pub const ALL: [Round; 6] = [
    Round::RoundOf32,
    Round::RoundOf16,
    Round::QuarterFinal,
    Round::SemiFinal,
    Round::ThirdPlace,
    Round::Final,
  ];

  pub fn expected_matches(self) -> usize {
    match self {
      Round::RoundOf32 => 16,
      Round::RoundOf16 => 8,
      Round::QuarterFinal => 4,
      Round::SemiFinal => 2,
      Round::ThirdPlace | Round::Final => 1,
    }
  }

  /// Round whose results feed this one. `None` for the opening round.
  pub fn feeder_round(self) -> Option<Round> {
    match self {
      Round::RoundOf32 => None,
      Round::RoundOf16 => Some(Round::RoundOf32),
      Round::QuarterFinal => Some(Round::RoundOf16),
      Round::SemiFinal => Some(Round::QuarterFinal),
      Round::ThirdPlace | Round::Final => Some(Round::SemiFinal),
    }
  }

  pub fn label(self) -> &'static str {
    match self {
      Round::RoundOf32 => "Round of 32",
      Round::RoundOf16 => "Round of 16",
      Round::QuarterFinal => "Quarter Finals",
      Round::SemiFinal => "Semi Finals",
      Round::ThirdPlace => "Third Place",
      Round::Final => "Final",
    }
  }
}

impl fmt::Display for Round {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(self.label())
  }
}

//! Third-place slot table: which bracket slot each advancing third-placed
//! team occupies, keyed by the set of eight groups whose thirds advance.

use serde::{Deserialize, Serialize};
use std::{
  collections::{BTreeMap, BTreeSet},
  fmt,
};
use tracing::{debug, info, warn};

use crate::error::ConfigError;
use crate::types::{Group, CANDIDATES_PER_SLOT, GROUP_COUNT, THIRD_PLACE_SLOT_COUNT};

/// One bracket position filled by a third-placed team, identified by the
/// number of the Round-of-32 match it plays in.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ThirdPlaceSlotSpec {
  pub match_number: u16,
  pub candidates: Vec<Group>,
}

impl ThirdPlaceSlotSpec {
  pub fn new(match_number: u16, candidates: Vec<Group>) -> Self {
    ThirdPlaceSlotSpec {
      match_number,
      candidates,
    }
  }

  pub fn allows(&self, group: Group) -> bool {
    self.candidates.contains(&group)
  }

  /// True when `groups` names exactly this slot's candidates, in any order.
  pub fn has_candidates(&self, groups: &[Group]) -> bool {
    let mine: BTreeSet<Group> = self.candidates.iter().copied().collect();
    let theirs: BTreeSet<Group> = groups.iter().copied().collect();
    mine == theirs && groups.len() == self.candidates.len()
  }
}

/// Canonical key for a set of groups: letters sorted and concatenated.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(transparent)]
pub struct GroupSetKey(String);

impl GroupSetKey {
  pub fn from_groups<'a>(groups: impl IntoIterator<Item = &'a Group>) -> Self {
    let sorted: BTreeSet<Group> = groups.into_iter().copied().collect();
    GroupSetKey(Group::letters(&sorted))
  }

  pub fn as_str(&self) -> &str {
    &self.0
  }

  pub fn len(&self) -> usize {
    self.0.len()
  }

  pub fn is_empty(&self) -> bool {
    self.0.is_empty()
  }
}

impl fmt::Display for GroupSetKey {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(&self.0)
  }
}

/// Slot number to group, one entry per third-place slot in slot order.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ThirdPlaceAssignment {
  slots: Vec<(u16, Group)>,
}

impl ThirdPlaceAssignment {
  pub fn group_for_slot(&self, match_number: u16) -> Option<Group> {
    self
      .slots
      .iter()
      .find(|(slot, _)| *slot == match_number)
      .map(|(_, group)| *group)
  }

  pub fn key(&self) -> GroupSetKey {
    GroupSetKey::from_groups(self.slots.iter().map(|(_, group)| group))
  }

  pub fn iter(&self) -> impl Iterator<Item = (u16, Group)> + '_ {
    self.slots.iter().copied()
  }
}

impl fmt::Display for ThirdPlaceAssignment {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    let parts = self
      .slots
      .iter()
      .map(|(slot, group)| format!("{slot}:{group}"))
      .collect::<Vec<_>>();
    f.write_str(&parts.join(" "))
  }
}

/// What to do when two different assignments produce the same group set.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum CollisionPolicy {
  /// Abort table construction with [`ConfigError::Collision`].
  #[default]
  Reject,
  /// Keep the assignment found first in search order and record the key as
  /// ambiguous.
  FirstFound,
}

#[derive(Clone, Debug)]
pub struct ThirdPlaceTable {
  slots: Vec<ThirdPlaceSlotSpec>,
  assignments: BTreeMap<GroupSetKey, ThirdPlaceAssignment>,
  ambiguous: BTreeSet<GroupSetKey>,
}

impl ThirdPlaceTable {
  /// Depth-first search over the slots in list order, each slot trying its
  /// candidates in list order, skipping groups already taken.
  pub fn enumerate(slots: Vec<ThirdPlaceSlotSpec>, policy: CollisionPolicy) -> Result<Self, ConfigError> {
    validate_slots(&slots)?;
    let mut search = Search {
      slots: &slots,
      policy,
      chosen: Vec::with_capacity(slots.len()),
      used: [false; GROUP_COUNT],
      assignments: BTreeMap::new(),
      ambiguous: BTreeSet::new(),
      explored: 0,
    };
    search.descend(0)?;
    let Search {
      assignments,
      ambiguous,
      explored,
      ..
    } = search;
    let table = ThirdPlaceTable::finish(slots, assignments, ambiguous)?;
    debug!(explored, "third-place search finished");
    Ok(table)
  }

  /// Builds the table from a published list of rows (slot number to group).
  /// Rows are checked against the slot candidates; two rows for the same
  /// group set must agree.
  pub fn from_rows(slots: Vec<ThirdPlaceSlotSpec>, rows: &[BTreeMap<u16, Group>]) -> Result<Self, ConfigError> {
    validate_slots(&slots)?;
    let mut assignments: BTreeMap<GroupSetKey, ThirdPlaceAssignment> = BTreeMap::new();
    for (row_index, row) in rows.iter().enumerate() {
      let assignment = assignment_from_row(&slots, row)
        .map_err(|reason| ConfigError::InvalidRow { row: row_index, reason })?;
      let key = assignment.key();
      if let Some(existing) = assignments.get(&key) {
        if *existing != assignment {
          return Err(ConfigError::Collision {
            key,
            first: existing.clone(),
            second: assignment,
          });
        }
        continue;
      }
      assignments.insert(key, assignment);
    }
    ThirdPlaceTable::finish(slots, assignments, BTreeSet::new())
  }

  fn finish(
    slots: Vec<ThirdPlaceSlotSpec>,
    assignments: BTreeMap<GroupSetKey, ThirdPlaceAssignment>,
    ambiguous: BTreeSet<GroupSetKey>,
  ) -> Result<Self, ConfigError> {
    if assignments.is_empty() {
      return Err(ConfigError::NoAssignments);
    }
    info!(
      combinations = assignments.len(),
      ambiguous = ambiguous.len(),
      "third-place table ready"
    );
    if !ambiguous.is_empty() {
      warn!(
        "{} of {} group combinations admit more than one slot assignment; serving the first found",
        ambiguous.len(),
        assignments.len()
      );
    }
    Ok(ThirdPlaceTable {
      slots,
      assignments,
      ambiguous,
    })
  }

  pub fn lookup(&self, key: &GroupSetKey) -> Option<&ThirdPlaceAssignment> {
    self.assignments.get(key)
  }

  pub fn slots(&self) -> &[ThirdPlaceSlotSpec] {
    &self.slots
  }

  pub fn slot_for_candidates(&self, candidates: &[Group]) -> Option<&ThirdPlaceSlotSpec> {
    self.slots.iter().find(|slot| slot.has_candidates(candidates))
  }

  pub fn len(&self) -> usize {
    self.assignments.len()
  }

  pub fn is_empty(&self) -> bool {
    self.assignments.is_empty()
  }

  pub fn ambiguous_keys(&self) -> &BTreeSet<GroupSetKey> {
    &self.ambiguous
  }

  pub fn is_ambiguous(&self, key: &GroupSetKey) -> bool {
    self.ambiguous.contains(key)
  }

  pub fn iter(&self) -> impl Iterator<Item = (&GroupSetKey, &ThirdPlaceAssignment)> {
    self.assignments.iter()
  }
}

struct Search<'a> {
  slots: &'a [ThirdPlaceSlotSpec],
  policy: CollisionPolicy,
  chosen: Vec<(u16, Group)>,
  used: [bool; GROUP_COUNT],
  assignments: BTreeMap<GroupSetKey, ThirdPlaceAssignment>,
  ambiguous: BTreeSet<GroupSetKey>,
  explored: u64,
}

impl Search<'_> {
  fn descend(&mut self, depth: usize) -> Result<(), ConfigError> {
    self.explored += 1;
    if depth == self.slots.len() {
      if self.chosen.len() == self.slots.len() {
        self.record()?;
      }
      return Ok(());
    }
    let slots = self.slots;
    let slot = &slots[depth];
    for &group in &slot.candidates {
      if self.used[group.index()] {
        continue;
      }
      self.used[group.index()] = true;
      self.chosen.push((slot.match_number, group));
      let result = self.descend(depth + 1);
      self.chosen.pop();
      self.used[group.index()] = false;
      result?;
    }
    Ok(())
  }

  fn record(&mut self) -> Result<(), ConfigError> {
    let assignment = ThirdPlaceAssignment {
      slots: self.chosen.clone(),
    };
    let key = assignment.key();
    match self.assignments.get(&key) {
      None => {
        self.assignments.insert(key, assignment);
        Ok(())
      }
      Some(existing) if *existing == assignment => Ok(()),
      Some(existing) => match self.policy {
        CollisionPolicy::Reject => Err(ConfigError::Collision {
          key,
          first: existing.clone(),
          second: assignment,
        }),
        CollisionPolicy::FirstFound => {
          self.ambiguous.insert(key);
          Ok(())
        }
      },
    }
  }
}

fn validate_slots(slots: &[ThirdPlaceSlotSpec]) -> Result<(), ConfigError> {
  if slots.len() != THIRD_PLACE_SLOT_COUNT {
    return Err(ConfigError::SlotCount {
      expected: THIRD_PLACE_SLOT_COUNT,
      found: slots.len(),
    });
  }
  let mut numbers = BTreeSet::new();
  for slot in slots {
    if !numbers.insert(slot.match_number) {
      return Err(ConfigError::InvalidSlot {
        slot: slot.match_number,
        reason: "slot listed twice".to_string(),
      });
    }
    let distinct: BTreeSet<Group> = slot.candidates.iter().copied().collect();
    if slot.candidates.len() != CANDIDATES_PER_SLOT || distinct.len() != CANDIDATES_PER_SLOT {
      return Err(ConfigError::InvalidSlot {
        slot: slot.match_number,
        reason: format!(
          "needs {CANDIDATES_PER_SLOT} distinct candidate groups, got {}",
          Group::letters(&slot.candidates)
        ),
      });
    }
  }
  Ok(())
}

fn assignment_from_row(slots: &[ThirdPlaceSlotSpec], row: &BTreeMap<u16, Group>) -> Result<ThirdPlaceAssignment, String> {
  if row.len() != slots.len() {
    return Err(format!("expected {} slots, found {}", slots.len(), row.len()));
  }
  let mut used = BTreeSet::new();
  let mut chosen = Vec::with_capacity(slots.len());
  for slot in slots {
    let group = *row
      .get(&slot.match_number)
      .ok_or_else(|| format!("slot {} is missing", slot.match_number))?;
    if !slot.allows(group) {
      return Err(format!(
        "group {group} is not a candidate for slot {} ({})",
        slot.match_number,
        Group::letters(&slot.candidates)
      ));
    }
    if !used.insert(group) {
      return Err(format!("group {group} is assigned twice"));
    }
    chosen.push((slot.match_number, group));
  }
  Ok(ThirdPlaceAssignment { slots: chosen })
}

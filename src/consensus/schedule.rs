use {
  super::error::ConsensusError,
  crate::primitives::Pubkey,
  chrono::{DateTime, Utc},
  std::{collections::HashMap, sync::Arc, time::Duration},
};

/// Ordered list of witnesses that take turns producing blocks.
///
/// Slot `s` belongs to the witness at position `s mod len`. The list
/// and its inverse lookup are always replaced together, a schedule is
/// never partially mutated. Changes to the witness set only come in
/// through [`WitnessSchedule::update`] after the block carrying them
/// was confirmed.
#[derive(Debug, Clone)]
pub struct WitnessSchedule {
  witnesses: Arc<[Pubkey]>,
  positions: HashMap<Pubkey, usize>,
}

impl WitnessSchedule {
  pub fn new(witnesses: Vec<Pubkey>) -> Result<Self, ConsensusError> {
    if witnesses.is_empty() {
      return Err(ConsensusError::EmptySchedule);
    }

    let mut positions = HashMap::with_capacity(witnesses.len());
    for (i, w) in witnesses.iter().enumerate() {
      if positions.insert(*w, i).is_some() {
        return Err(ConsensusError::DuplicateWitness(*w));
      }
    }

    Ok(Self {
      witnesses: witnesses.into(),
      positions,
    })
  }

  /// The witness that is expected to produce a block in a given slot.
  pub fn producer_for_slot(&self, slot: u64) -> Result<Pubkey, ConsensusError> {
    if self.witnesses.is_empty() {
      return Err(ConsensusError::EmptySchedule);
    }
    let index = (slot % self.witnesses.len() as u64) as usize;
    Ok(self.witnesses[index])
  }

  /// Replaces the entire witness list. An empty list or a list with
  /// duplicates is refused and leaves the current schedule in place.
  pub fn update(
    &mut self,
    witnesses: Vec<Pubkey>,
  ) -> Result<(), ConsensusError> {
    *self = Self::new(witnesses)?;
    Ok(())
  }

  /// Position of a witness in the rotation, None if the identity
  /// is not currently a witness.
  pub fn position_of(&self, witness: &Pubkey) -> Option<usize> {
    self.positions.get(witness).copied()
  }

  pub fn len(&self) -> usize {
    self.witnesses.len()
  }

  pub fn is_empty(&self) -> bool {
    self.witnesses.is_empty()
  }

  pub fn witnesses(&self) -> &[Pubkey] {
    &self.witnesses
  }
}

/// Maps wall-clock time to slot numbers.
///
/// Slots are counted from the genesis time, slot 0 is the genesis
/// slot. Any time before genesis maps to slot 0.
#[derive(Debug, Clone, Copy)]
pub struct SlotClock {
  genesis_time: DateTime<Utc>,
  slot_interval: Duration,
}

impl SlotClock {
  pub fn new(genesis_time: DateTime<Utc>, slot_interval: Duration) -> Self {
    Self {
      genesis_time,
      slot_interval,
    }
  }

  pub fn slot_interval(&self) -> Duration {
    self.slot_interval
  }

  fn slot_millis(&self) -> i64 {
    (self.slot_interval.as_millis() as i64).max(1)
  }

  /// Milliseconds elapsed since genesis, negative before genesis.
  pub fn elapsed_millis(&self, now: DateTime<Utc>) -> i64 {
    (now - self.genesis_time).num_milliseconds()
  }

  pub fn slot_at(&self, now: DateTime<Utc>) -> u64 {
    let elapsed = self.elapsed_millis(now);
    if elapsed < 0 {
      0
    } else {
      (elapsed / self.slot_millis()) as u64
    }
  }

  /// The time at which a slot begins.
  pub fn slot_time(&self, slot: u64) -> DateTime<Utc> {
    self.genesis_time
      + chrono::Duration::milliseconds(slot as i64 * self.slot_millis())
  }

  /// Time left until the start of the next slot.
  ///
  /// Before genesis this is the time left until genesis. Exactly at a
  /// slot boundary this is a full slot, so it is never zero.
  pub fn until_next_slot(&self, now: DateTime<Utc>) -> Duration {
    let elapsed = self.elapsed_millis(now);
    if elapsed < 0 {
      return Duration::from_millis(elapsed.unsigned_abs());
    }
    let slot = self.slot_millis();
    let next = (elapsed / slot + 1) * slot;
    Duration::from_millis((next - elapsed) as u64)
  }
}

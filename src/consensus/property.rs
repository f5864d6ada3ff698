use {
  super::schedule::SlotClock,
  chrono::{DateTime, Utc},
  std::time::Duration,
};

/// Rolling view of the current chain head, used by the
/// production loop to decide how long to sleep.
#[derive(Debug, Clone)]
pub struct DynamicProperty {
  clock: SlotClock,
  head_time: DateTime<Utc>,
  head_number: u64,
}

impl DynamicProperty {
  pub fn new(
    clock: SlotClock,
    head_time: DateTime<Utc>,
    head_number: u64,
  ) -> Self {
    Self {
      clock,
      head_time,
      head_number,
    }
  }

  /// Must only be called with the currently selected head.
  pub fn update(&mut self, head_time: DateTime<Utc>, head_number: u64) {
    self.head_time = head_time;
    self.head_number = head_number;
  }

  pub fn head_time(&self) -> DateTime<Utc> {
    self.head_time
  }

  pub fn head_number(&self) -> u64 {
    self.head_number
  }

  /// How long until the next slot starts. Never zero, at an exact
  /// slot boundary this is one full slot.
  pub fn time_until_next_slot(&self, now: DateTime<Utc>) -> Duration {
    self.clock.until_next_slot(now)
  }
}

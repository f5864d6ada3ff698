use dashmap::DashSet;

/// How often (in slots) old slot records are garbage collected.
pub const GC_PERIOD: u64 = 10;

/// Record of slots for which this node has already produced or
/// accepted a block.
///
/// A witness must never sign two different blocks for the same slot,
/// and a node must never accept two blocks for the same slot. Both
/// are enforced by claiming the slot here before a block is inserted.
#[derive(Debug, Default)]
pub struct SlotGuard {
  used: DashSet<u64>,
}

impl SlotGuard {
  pub fn new() -> Self {
    Self::default()
  }

  /// Atomically claims a slot. Returns false without changing
  /// anything if the slot was already claimed.
  pub fn try_claim(&self, slot: u64) -> bool {
    self.used.insert(slot)
  }

  pub fn is_claimed(&self, slot: u64) -> bool {
    self.used.contains(&slot)
  }

  /// Every [`GC_PERIOD`] slots drops all records at or below the
  /// retired watermark. Slots below the watermark are already behind
  /// the confirmed block and can't be inserted again anyway.
  pub fn garbage_collect(&self, current_slot: u64, watermark: u64) {
    if current_slot % GC_PERIOD != 0 {
      return;
    }
    self.used.retain(|slot| *slot > watermark);
  }

  pub fn len(&self) -> usize {
    self.used.len()
  }

  pub fn is_empty(&self) -> bool {
    self.used.is_empty()
  }
}

#[cfg(test)]
mod test {
  use super::SlotGuard;

  #[test]
  fn claim_once() {
    let guard = SlotGuard::new();
    assert!(guard.try_claim(3));
    assert!(!guard.try_claim(3));
    assert!(guard.try_claim(4));
    assert!(guard.is_claimed(3));
    assert!(!guard.is_claimed(5));
  }

  #[test]
  fn gc_only_on_period() {
    let guard = SlotGuard::new();
    for slot in 1..=15 {
      assert!(guard.try_claim(slot));
    }

    // not a multiple of the period, nothing happens
    guard.garbage_collect(13, 12);
    assert_eq!(guard.len(), 15);

    guard.garbage_collect(20, 12);
    assert_eq!(guard.len(), 3);
    assert!(!guard.is_claimed(12));
    assert!(guard.is_claimed(13));

    // cleared slots can be claimed again
    assert!(guard.try_claim(5));
    assert!(!guard.try_claim(14));
  }
}

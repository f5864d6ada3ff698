use {
  super::schedule::SlotClock,
  crate::primitives::Pubkey,
  chrono::{DateTime, Utc},
  serde::{Deserialize, Serialize},
  std::{
    collections::{BTreeMap, HashSet},
    path::Path,
    time::Duration,
  },
  thiserror::Error,
};

#[derive(Debug, Error)]
pub enum GenesisError {
  #[error("Failed to read the genesis file: {0}")]
  Io(#[from] std::io::Error),

  #[error("Invalid genesis file: {0}")]
  Json(#[from] serde_json::Error),

  #[error("Witness {0} is listed more than once")]
  DuplicateWitness(Pubkey),
}

/// Consensus limits that are fixed for the lifetime of a chain.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Limits {
  /// Blocks carrying more transactions than this are refused,
  /// and producers never pack more than this many.
  pub max_block_transactions: usize,

  /// Upper bound on the number of orphan blocks held while
  /// waiting for their parents.
  pub max_orphans: usize,

  /// How many slots an orphan block is held before it is dropped.
  pub orphan_ttl: u32,

  /// How many slots ahead of the local clock a block may be.
  /// Accounts for clock drift between witnesses.
  pub future_slots: u64,
}

impl Default for Limits {
  fn default() -> Self {
    Self {
      max_block_transactions: 2000,
      max_orphans: 1024,
      orphan_ttl: 60,
      future_slots: 1,
    }
  }
}

/// The genesis configuration of a chain.
///
/// Defines the very first block of a chain with a fixed set of
/// witnesses, initial account balances and a few other settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Genesis {
  /// The globally unique string that identifies this chain.
  /// Nodes of different chains keep their data in different
  /// directories.
  pub chain_id: String,

  /// The timepoint at which slot 0 starts. All slot numbers are
  /// calculated from this point in time.
  pub genesis_time: DateTime<Utc>,

  /// The length of a single slot, during which there is one witness
  /// that is expected to produce a block. The schedule advances to
  /// the next witness when the slot elapses, regardless if a block
  /// was produced or not.
  #[serde(with = "humantime_serde")]
  pub slot_interval: Duration,

  /// The initial witness rotation, in order.
  pub witnesses: Vec<Pubkey>,

  /// Initial token balances.
  #[serde(default)]
  pub balances: BTreeMap<Pubkey, u64>,

  #[serde(default)]
  pub limits: Limits,
}

impl Genesis {
  /// Reads the genesis configuration from its JSON form.
  pub fn load(path: &Path) -> Result<Self, GenesisError> {
    Self::from_json(&std::fs::read_to_string(path)?)
  }

  pub fn from_json(json: &str) -> Result<Self, GenesisError> {
    let genesis: Self = serde_json::from_str(json)?;
    let mut seen = HashSet::with_capacity(genesis.witnesses.len());
    for witness in &genesis.witnesses {
      if !seen.insert(witness) {
        return Err(GenesisError::DuplicateWitness(*witness));
      }
    }
    Ok(genesis)
  }

  pub fn clock(&self) -> SlotClock {
    SlotClock::new(self.genesis_time, self.slot_interval)
  }
}

use {
  super::{Execution, StateError, StateStore},
  crate::{
    consensus::{Action, Genesis, Transaction},
    primitives::{Pubkey, ToBase58String},
  },
  chrono::{DateTime, Utc},
  dashmap::DashMap,
  multihash::{Code as MultihashCode, Multihash, MultihashDigest},
  std::collections::{BTreeMap, HashSet},
  tracing::{debug, trace},
};

const TOKEN_CONTRACT: &str = "token";
const SYSTEM_CONTRACT: &str = "system";

/// Builds an action that moves tokens from the transaction
/// payer to another account.
pub fn transfer(to: Pubkey, amount: u64) -> Result<Action, bincode::Error> {
  Ok(Action::new(
    TOKEN_CONTRACT,
    "transfer",
    bincode::serialize(&(to, amount))?,
  ))
}

/// Builds an action that replaces the witness list. Only current
/// witnesses may publish it.
pub fn set_witnesses(witnesses: &[Pubkey]) -> Result<Action, bincode::Error> {
  Ok(Action::new(
    SYSTEM_CONTRACT,
    "witnesses",
    bincode::serialize(witnesses)?,
  ))
}

/// The full state of the chain at some block.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Snapshot {
  pub balances: BTreeMap<Pubkey, u64>,
  pub witnesses: Vec<Pubkey>,

  /// Hashes of executed transactions that are not expired yet,
  /// with their expiration time. Executing any of them again fails.
  pub executed: BTreeMap<Multihash, DateTime<Utc>>,
}

impl Snapshot {
  pub fn balance(&self, account: &Pubkey) -> u64 {
    self.balances.get(account).copied().unwrap_or_default()
  }

  pub fn commitment(&self) -> Multihash {
    let mut buffer = Vec::with_capacity(
      self.balances.len() * 40
        + self.witnesses.len() * 32
        + self.executed.len() * 42,
    );
    for (account, balance) in &self.balances {
      buffer.extend_from_slice(account);
      buffer.extend_from_slice(&balance.to_le_bytes());
    }
    buffer.push(0);
    for witness in &self.witnesses {
      buffer.extend_from_slice(witness);
    }
    buffer.push(0);
    for (hash, expiration) in &self.executed {
      buffer.extend_from_slice(&hash.to_bytes());
      buffer.extend_from_slice(&expiration.timestamp_millis().to_le_bytes());
    }
    MultihashCode::Sha3_256.digest(&buffer)
  }

  fn apply(&mut self, tx: &Transaction) -> Result<(), StateError> {
    let payer = tx.payer().ok_or(StateError::Unpublished)?;
    let hash = tx.hash();
    if self.executed.contains_key(&hash) {
      return Err(StateError::Replayed(hash.to_b58()));
    }

    for action in &tx.actions {
      match (action.contract.as_str(), action.action_name.as_str()) {
        (TOKEN_CONTRACT, "transfer") => {
          let (to, amount): (Pubkey, u64) =
            bincode::deserialize(&action.data)?;
          let from_balance = self.balance(&payer);
          if from_balance < amount {
            return Err(StateError::InsufficientFunds(payer));
          }
          self.balances.insert(payer, from_balance - amount);
          let to_balance = self.balance(&to);
          self.balances.insert(to, to_balance.saturating_add(amount));
        }
        (SYSTEM_CONTRACT, "witnesses") => {
          if !self.witnesses.contains(&payer) {
            return Err(StateError::Unauthorized(payer));
          }
          let witnesses: Vec<Pubkey> = bincode::deserialize(&action.data)?;
          let unique: HashSet<_> = witnesses.iter().collect();
          if witnesses.is_empty() || unique.len() != witnesses.len() {
            return Err(StateError::InvalidWitnessList);
          }
          self.witnesses = witnesses;
        }
        (contract, action) => {
          return Err(StateError::UnknownAction {
            contract: contract.to_owned(),
            action: action.to_owned(),
          })
        }
      }
    }

    self.executed.insert(hash, tx.expiration);
    Ok(())
  }
}

/// State store that keeps every tagged snapshot in memory.
///
/// Snapshots are full copies of the state, so this is only suitable
/// for chains with small state and for tests. Nothing is persisted,
/// after a restart the state is rebuilt from genesis.
#[derive(Debug, Default)]
pub struct MemoryStore {
  snapshots: DashMap<Multihash, Snapshot>,
}

impl MemoryStore {
  pub fn new() -> Self {
    Self::default()
  }

  pub fn len(&self) -> usize {
    self.snapshots.len()
  }

  pub fn is_empty(&self) -> bool {
    self.snapshots.is_empty()
  }
}

impl StateStore for MemoryStore {
  type View = Snapshot;

  fn genesis(&self, genesis: &Genesis) -> Result<Multihash, StateError> {
    let snapshot = Snapshot {
      balances: genesis.balances.clone(),
      witnesses: genesis.witnesses.clone(),
      executed: BTreeMap::new(),
    };
    Ok(self.tag(snapshot))
  }

  fn checkout(&self, commitment: &Multihash) -> Result<Snapshot, StateError> {
    self
      .snapshots
      .get(commitment)
      .map(|s| s.value().clone())
      .ok_or_else(|| StateError::UnknownCommitment(commitment.to_b58()))
  }

  fn execute(
    &self,
    view: &mut Snapshot,
    transactions: &[Transaction],
  ) -> Result<Execution, StateError> {
    for tx in transactions {
      view.apply(tx)?;
    }
    Ok(Execution {
      commitment: view.commitment(),
      witnesses: view.witnesses.clone(),
    })
  }

  fn expire(&self, view: &mut Snapshot, now: DateTime<Utc>) {
    view.executed.retain(|_, expiration| *expiration > now);
  }

  fn tag(&self, view: Snapshot) -> Multihash {
    let commitment = view.commitment();
    trace!("tagging state {}", commitment.to_b58());
    self.snapshots.insert(commitment, view);
    commitment
  }

  fn retain(&self, live: &HashSet<Multihash>) {
    let before = self.snapshots.len();
    self.snapshots.retain(|commitment, _| live.contains(commitment));
    debug!(
      "dropped {} unreachable state(s)",
      before - self.snapshots.len()
    );
  }

  fn witnesses(
    &self,
    commitment: &Multihash,
  ) -> Result<Vec<Pubkey>, StateError> {
    self
      .snapshots
      .get(commitment)
      .map(|s| s.witnesses.clone())
      .ok_or_else(|| StateError::UnknownCommitment(commitment.to_b58()))
  }
}

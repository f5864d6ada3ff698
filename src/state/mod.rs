mod memory;

use {
  crate::{
    consensus::{Genesis, Transaction},
    primitives::Pubkey,
  },
  chrono::{DateTime, Utc},
  multihash::Multihash,
  std::{collections::HashSet, sync::Arc},
  thiserror::Error,
};

pub use memory::{set_witnesses, transfer, MemoryStore, Snapshot};

#[derive(Debug, Error)]
pub enum StateError {
  #[error("Unknown state commitment {0}")]
  UnknownCommitment(String),

  #[error("Account {0} has insufficient funds")]
  InsufficientFunds(Pubkey),

  #[error("Unknown action {contract}::{action}")]
  UnknownAction { contract: String, action: String },

  #[error("Witness list is empty or contains duplicates")]
  InvalidWitnessList,

  #[error("Account {0} is not allowed to change the witness list")]
  Unauthorized(Pubkey),

  #[error("Transaction was not published")]
  Unpublished,

  #[error("Transaction {0} was already executed")]
  Replayed(String),

  #[error("Malformed action data: {0}")]
  Decode(#[from] bincode::Error),
}

/// The outcome of executing a batch of transactions.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Execution {
  /// Commitment to the resulting state. Two executions that
  /// end up with equal state have equal commitments.
  pub commitment: Multihash,

  /// The witness list recorded in the resulting state.
  pub witnesses: Vec<Pubkey>,
}

/// The replicated state machine as seen by the consensus.
///
/// The consensus never interprets transactions, it only asks the
/// store to check out the state resulting from some block, executes
/// transactions on top of it and records the resulting commitment
/// in block headers.
///
/// Views are mutable copies of a committed state. Executing on a
/// view never affects the state it was checked out from, a view
/// becomes addressable by its commitment only after it is tagged.
pub trait StateStore: Send + Sync + 'static {
  type View: Clone + Send + Sync;

  /// Creates and tags the initial state of a chain.
  fn genesis(&self, genesis: &Genesis) -> Result<Multihash, StateError>;

  /// Gets a mutable copy of a tagged state.
  fn checkout(&self, commitment: &Multihash)
    -> Result<Self::View, StateError>;

  /// Executes transactions in order on top of a view. An empty list
  /// of transactions only computes the commitment of the view.
  ///
  /// If any transaction fails, the view is left in an unspecified
  /// state and should be discarded.
  fn execute(
    &self,
    view: &mut Self::View,
    transactions: &[Transaction],
  ) -> Result<Execution, StateError>;

  /// Forgets replay records of transactions that expired by `now`.
  /// Called with the slot time of a block before executing its
  /// transactions, so every node reaches the same commitment.
  fn expire(&self, view: &mut Self::View, now: DateTime<Utc>);

  /// Makes a view addressable by its commitment.
  fn tag(&self, view: Self::View) -> Multihash;

  /// Drops every tagged state that is not in `live`.
  fn retain(&self, live: &HashSet<Multihash>);

  /// The witness list recorded in a tagged state.
  fn witnesses(&self, commitment: &Multihash)
    -> Result<Vec<Pubkey>, StateError>;
}

impl<S: StateStore> StateStore for Arc<S> {
  type View = S::View;

  fn genesis(&self, genesis: &Genesis) -> Result<Multihash, StateError> {
    (**self).genesis(genesis)
  }

  fn checkout(
    &self,
    commitment: &Multihash,
  ) -> Result<Self::View, StateError> {
    (**self).checkout(commitment)
  }

  fn execute(
    &self,
    view: &mut Self::View,
    transactions: &[Transaction],
  ) -> Result<Execution, StateError> {
    (**self).execute(view, transactions)
  }

  fn expire(&self, view: &mut Self::View, now: DateTime<Utc>) {
    (**self).expire(view, now)
  }

  fn tag(&self, view: Self::View) -> Multihash {
    (**self).tag(view)
  }

  fn retain(&self, live: &HashSet<Multihash>) {
    (**self).retain(live)
  }

  fn witnesses(
    &self,
    commitment: &Multihash,
  ) -> Result<Vec<Pubkey>, StateError> {
    (**self).witnesses(commitment)
  }
}

use {
  crate::{primitives::Pubkey, state::StateError, storage::StorageError},
  thiserror::Error,
};

/// Reasons for which the consensus refuses a block or aborts
/// the production of a block.
///
/// All of those are local to the block being processed. The engine
/// logs them and moves on to the next message or slot, except for
/// [`ConsensusError::EmptySchedule`] that is fatal at startup.
#[derive(Debug, Error)]
pub enum ConsensusError {
  #[error("The witness schedule is empty")]
  EmptySchedule,

  #[error("Witness {0} appears more than once in the schedule")]
  DuplicateWitness(Pubkey),

  #[error("Parent block {0} is not known")]
  UnknownParent(String),

  #[error("Slot {0} was already used")]
  DuplicateSlot(u64),

  #[error("Invalid producer signature")]
  BadSignature,

  #[error("State root does not match the result of executing the block")]
  BadStateRoot,

  #[error("Block forks off the chain before the last confirmed block")]
  ForksBeforeFinality,

  #[error("Transaction execution failed: {0}")]
  ExecutionFailure(#[from] StateError),

  #[error("Producer {producer} is not the witness of slot {slot}")]
  WrongWitness { producer: Pubkey, slot: u64 },

  #[error("Invalid slot {slot}, parent slot is {parent}")]
  InvalidSlot { slot: u64, parent: u64 },

  #[error("Invalid block number {number}, parent number is {parent}")]
  InvalidNumber { number: u64, parent: u64 },

  #[error("Block contains an invalid transaction")]
  InvalidTransaction,

  #[error("Transaction {0} appears more than once in the block")]
  DuplicateTransaction(String),

  #[error("Transaction {0} expired before the block slot")]
  ExpiredTransaction(String),

  #[error("Block has {0} transactions which is above the limit")]
  TooManyTransactions(usize),

  #[error("Confirmed block #{0} is missing from the block store")]
  MissingBlock(u64),

  #[error("Block {0} is already known")]
  KnownBlock(String),

  #[error("Malformed block: {0}")]
  Malformed(#[from] bincode::Error),

  #[error("Storage error: {0}")]
  Storage(#[from] StorageError),

  #[error("Metrics error: {0}")]
  Metrics(#[from] prometheus::Error),
}

//! Proof-of-Believability consensus.
//!
//! A fixed rotation of witnesses produces blocks in time slots, and
//! a block becomes irreversible once more than 2/3 of the witnesses
//! have built on top of it, without any explicit voting messages.

pub mod block;
mod engine;
mod error;
pub mod forktree;
pub mod genesis;
mod orphans;
mod property;
pub mod schedule;
mod slots;
pub mod transaction;

pub use {
  block::{Block, BlockHeader},
  engine::{ConsensusEngine, Mode},
  error::ConsensusError,
  forktree::{BlockCache, BlockStatus, Flushed},
  genesis::{Genesis, GenesisError, Limits},
  property::DynamicProperty,
  schedule::{SlotClock, WitnessSchedule},
  slots::SlotGuard,
  transaction::{Action, Transaction, TransactionError},
};

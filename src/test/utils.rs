use {
  crate::{
    consensus::{Block, Genesis, Limits, SlotClock, Transaction},
    primitives::Keypair,
    state::{MemoryStore, StateStore},
  },
  chrono::{Duration as ChronoDuration, Utc},
  std::{sync::Arc, time::Duration},
};

/// Deterministic keypairs, the same `n` always gives the same keys.
pub fn keypairs(n: usize) -> Vec<Keypair> {
  (0..n)
    .map(|i| Keypair::try_from(&[i as u8 + 1; 32][..]).unwrap())
    .collect()
}

/// A chain where every key is a witness with some initial balance.
///
/// Genesis is an hour in the past with one second slots, so all
/// low slot numbers are already in the past.
pub fn genesis(witnesses: &[Keypair]) -> Genesis {
  Genesis {
    chain_id: "pob-test".to_owned(),
    genesis_time: Utc::now() - ChronoDuration::hours(1),
    slot_interval: Duration::from_secs(1),
    witnesses: witnesses.iter().map(|k| k.public()).collect(),
    balances: witnesses.iter().map(|k| (k.public(), 1000)).collect(),
    limits: Limits::default(),
  }
}

/// Produces valid blocks for a chain independently from any engine.
pub struct BlockFactory {
  store: MemoryStore,
  clock: SlotClock,
  genesis: Arc<Block>,
}

impl BlockFactory {
  pub fn new(genesis: &Genesis) -> Self {
    let store = MemoryStore::new();
    let root = store.genesis(genesis).unwrap();
    Self {
      store,
      clock: genesis.clock(),
      genesis: Arc::new(Block::genesis(genesis.witnesses[0], root)),
    }
  }

  pub fn genesis(&self) -> Arc<Block> {
    self.genesis.clone()
  }

  /// Signs a block on top of `parent`, with a correct state root.
  pub fn block(
    &self,
    producer: &Keypair,
    parent: &Block,
    slot: u64,
    transactions: Vec<Transaction>,
  ) -> Arc<Block> {
    let mut view = self.store.checkout(&parent.header.state_root).unwrap();
    self.store.expire(&mut view, self.clock.slot_time(slot));
    self.store.execute(&mut view, &transactions).unwrap();
    let state_root = self.store.tag(view);
    Arc::new(Block::produce(
      producer,
      slot,
      parent.number() + 1,
      parent.hash(),
      state_root,
      transactions,
    ))
  }
}

use {
  crate::{
    consensus::{Block, Transaction, TransactionError},
    primitives::ToBase58String,
  },
  chrono::Utc,
  indexmap::IndexMap,
  multihash::Multihash,
  std::sync::Mutex,
  thiserror::Error,
  tracing::{debug, trace},
};

#[derive(Debug, Error)]
pub enum PoolError {
  #[error("Invalid transaction: {0}")]
  Invalid(#[from] TransactionError),

  #[error("Transaction {0} is expired")]
  Expired(String),

  #[error("Transaction {0} is already pending")]
  Duplicate(String),

  #[error("Transaction pool is full")]
  Full,
}

/// Source of transactions for block production.
pub trait TransactionPool: Send + Sync + 'static {
  /// Transactions waiting for inclusion, oldest first.
  fn pending_transactions(&self) -> Vec<Transaction>;

  /// Called for every block that joins the fork tree. `is_head`
  /// is true if the block became the new head of the chain.
  fn notify_confirmed(&self, block: &Block, is_head: bool);

  /// Number of transactions currently held, expired ones included.
  fn pending_count(&self) -> usize;
}

/// A bounded in-memory pool of published transactions.
#[derive(Debug)]
pub struct MemPool {
  limit: usize,
  pending: Mutex<IndexMap<Multihash, Transaction>>,
}

impl MemPool {
  pub fn new(limit: usize) -> Self {
    Self {
      limit,
      pending: Mutex::new(IndexMap::new()),
    }
  }

  /// Adds a transaction that is correctly signed and not expired.
  pub fn add(&self, tx: Transaction) -> Result<Multihash, PoolError> {
    tx.verify_self()?;

    let hash = tx.hash();
    if tx.is_expired(Utc::now()) {
      return Err(PoolError::Expired(hash.to_b58()));
    }

    let mut pending = self.pending.lock().unwrap_or_else(|e| e.into_inner());
    if pending.contains_key(&hash) {
      return Err(PoolError::Duplicate(hash.to_b58()));
    }
    if pending.len() >= self.limit {
      return Err(PoolError::Full);
    }

    trace!("transaction {} added to the pool", hash.to_b58());
    pending.insert(hash, tx);
    Ok(hash)
  }

  pub fn len(&self) -> usize {
    self.pending.lock().unwrap_or_else(|e| e.into_inner()).len()
  }

  pub fn is_empty(&self) -> bool {
    self.len() == 0
  }
}

impl TransactionPool for MemPool {
  fn pending_transactions(&self) -> Vec<Transaction> {
    let now = Utc::now();
    let mut pending = self.pending.lock().unwrap_or_else(|e| e.into_inner());
    pending.retain(|_, tx| !tx.is_expired(now));
    pending.values().cloned().collect()
  }

  /// Transactions included in the head chain are no longer pending.
  /// Those in blocks on other forks stay, so they can still be
  /// included in the canonical chain if that fork loses.
  fn notify_confirmed(&self, block: &Block, is_head: bool) {
    if !is_head || block.transactions.is_empty() {
      return;
    }

    let mut pending = self.pending.lock().unwrap_or_else(|e| e.into_inner());
    for tx in &block.transactions {
      pending.shift_remove(&tx.hash());
    }
    debug!(
      "{} transaction(s) included in {block}, {} still pending",
      block.transactions.len(),
      pending.len()
    );
  }

  fn pending_count(&self) -> usize {
    self.len()
  }
}

use {
  crate::{
    consensus::Block,
    primitives::ToBase58String,
  },
  multihash::Multihash,
  sled::{Db, Tree},
  std::path::PathBuf,
  thiserror::Error,
  tracing::debug,
};

#[derive(Debug, Error)]
pub enum StorageError {
  #[error("Serialization Error: {0}")]
  Serialization(#[from] bincode::Error),

  #[error("Storage Engine Error: {0}")]
  StorageEngine(#[from] sled::Error),

  #[error("System IO Error: {0}")]
  SystemIO(#[from] std::io::Error),
}

/// Persistent store of confirmed blocks.
///
/// Blocks end up here once they are evicted from the fork tree
/// and can never be reverted. They are indexed by their number
/// and by their hash, and are used to serve block requests from
/// peers that are behind and to resume the chain after a restart.
#[derive(Debug, Clone)]
pub struct BlockStore {
  db: Db,
  by_number: Tree,
  by_hash: Tree,
}

impl BlockStore {
  pub fn new(directory: PathBuf) -> Result<Self, StorageError> {
    let mut directory = directory;
    directory.push("blocks");
    std::fs::create_dir_all(directory.clone())?;
    Self::from_db(sled::open(directory)?)
  }

  /// A store that is removed when dropped.
  pub fn temporary() -> Result<Self, StorageError> {
    Self::from_db(sled::Config::new().temporary(true).open()?)
  }

  fn from_db(db: Db) -> Result<Self, StorageError> {
    let by_number = db.open_tree("by_number")?;
    let by_hash = db.open_tree("by_hash")?;
    Ok(Self {
      db,
      by_number,
      by_hash,
    })
  }

  /// Appends a confirmed block. Pushing the same block twice is a no-op.
  pub fn push(&self, block: &Block) -> Result<(), StorageError> {
    let key = block.number().to_be_bytes();
    self.by_number.insert(key, bincode::serialize(block)?)?;
    self.by_hash.insert(block.hash().to_bytes(), &key[..])?;
    debug!("persisted confirmed block {block}");
    Ok(())
  }

  pub fn get_by_number(
    &self,
    number: u64,
  ) -> Result<Option<Block>, StorageError> {
    match self.by_number.get(number.to_be_bytes())? {
      Some(bytes) => Ok(Some(bincode::deserialize(&bytes)?)),
      None => Ok(None),
    }
  }

  pub fn get_by_hash(
    &self,
    hash: &Multihash,
  ) -> Result<Option<Block>, StorageError> {
    match self.by_hash.get(hash.to_bytes())? {
      Some(key) => match self.by_number.get(key)? {
        Some(bytes) => Ok(Some(bincode::deserialize(&bytes)?)),
        None => {
          debug!("dangling block index entry for {}", hash.to_b58());
          Ok(None)
        }
      },
      None => Ok(None),
    }
  }

  pub fn contains(&self, hash: &Multihash) -> Result<bool, StorageError> {
    Ok(self.by_hash.contains_key(hash.to_bytes())?)
  }

  /// The most recent confirmed block.
  pub fn top(&self) -> Result<Option<Block>, StorageError> {
    match self.by_number.last()? {
      Some((_, bytes)) => Ok(Some(bincode::deserialize(&bytes)?)),
      None => Ok(None),
    }
  }

  pub fn len(&self) -> usize {
    self.by_number.len()
  }

  pub fn is_empty(&self) -> bool {
    self.by_number.is_empty()
  }

  pub async fn flush(&self) -> Result<(), StorageError> {
    self.db.flush_async().await?;
    Ok(())
  }

  /// Drops the number index, so every following write fails.
  #[cfg(test)]
  pub fn break_writes(&self) -> Result<(), StorageError> {
    self.db.drop_tree("by_number")?;
    Ok(())
  }
}

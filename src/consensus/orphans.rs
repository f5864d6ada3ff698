use {
  super::block::Block,
  crate::primitives::ToBase58String,
  multihash::Multihash,
  std::{
    collections::{hash_map::Entry, HashMap, HashSet},
    time::{Duration, Instant},
  },
  tracing::{debug, warn},
};

struct Node {
  at: Instant,
  block: Block,
}

/// Children waiting for a missing parent.
struct Waiting {
  since: Instant,
  children: Vec<Node>,
}

/// Orphan blocks are blocks that were received by the network
/// gossip but we don't have their parent block, so we can't
/// attach them to any current block in the fork tree.
///
/// This happens more often with shorter slot times as later
/// blocks might arrive before earlier blocks.
///
/// We store those blocks in this data structure, indexed by
/// their parent block. Whenever a block is correctly inserted
/// into the fork tree, its orphaned children are consumed and
/// inserted as well.
pub struct Orphans {
  slot: Duration,
  ttl: Duration,
  capacity: usize,
  blocks: HashMap<Multihash, Waiting>,
  held: HashSet<Multihash>,
}

impl Orphans {
  /// `ttl_slots` is how many slots an orphan is kept before
  /// it is discarded, `capacity` the maximum number of held orphans.
  pub fn new(slot: Duration, ttl_slots: u32, capacity: usize) -> Self {
    Self {
      slot,
      ttl: slot * ttl_slots,
      capacity,
      blocks: HashMap::new(),
      held: HashSet::new(),
    }
  }

  pub fn len(&self) -> usize {
    self.held.len()
  }

  pub fn is_empty(&self) -> bool {
    self.held.is_empty()
  }

  pub fn contains(&self, hash: &Multihash) -> bool {
    self.held.contains(hash)
  }

  /// Holds a block until its parent arrives. Returns false if the
  /// block was already held or the pool is full.
  pub fn add(&mut self, block: Block) -> bool {
    let hash = block.hash();
    if self.held.contains(&hash) {
      return false;
    }

    if self.held.len() >= self.capacity {
      warn!("orphan pool is full, dropping {block}");
      return false;
    }

    warn!(
      "parent block {} for {} not found (or has not arrived yet)",
      block.parent().to_b58(),
      block
    );

    let now = Instant::now();
    self.held.insert(hash);
    match self.blocks.entry(block.parent()) {
      Entry::Occupied(mut waiting) => {
        waiting.get_mut().children.push(Node { at: now, block });
      }
      Entry::Vacant(v) => {
        v.insert(Waiting {
          since: now,
          children: vec![Node { at: now, block }],
        });
      }
    };
    true
  }

  /// Removes and returns all held direct children of a block.
  pub fn consume(&mut self, parent: &Multihash) -> Vec<Block> {
    match self.blocks.remove(parent) {
      Some(waiting) => {
        debug!(
          "found {} orphan(s) of block {}",
          waiting.children.len(),
          parent.to_b58()
        );
        waiting
          .children
          .into_iter()
          .map(|node| {
            self.held.remove(&node.block.hash());
            node.block
          })
          .collect()
      }
      None => vec![],
    }
  }

  /// Drops orphans that can never be attached anymore because they
  /// are at or below the confirmed block number, and orphans that
  /// waited longer than the configured time to live.
  pub fn prune(&mut self, confirmed_number: u64) {
    let ttl = self.ttl;
    let held = &mut self.held;
    self.blocks.retain(|_, waiting| {
      waiting.children.retain(|node| {
        let keep = node.block.number() > confirmed_number
          && node.at.elapsed() < ttl;
        if !keep {
          held.remove(&node.block.hash());
        }
        keep
      });
      !waiting.children.is_empty()
    });
  }

  /// If a parent block is missing for too long, the orphans
  /// waiting for it stall consensus on their branch. Returns
  /// the hashes of parents that were missing for more than two
  /// slots, so they can be requested from peers.
  ///
  /// When a parent is reported, its timer is reset and it will
  /// be reported again after the same interval.
  pub fn missing_blocks(&mut self) -> Vec<Multihash> {
    let threshold = self.slot * 2;
    let mut output = vec![];
    for (parent, waiting) in self.blocks.iter_mut() {
      if waiting.since.elapsed() >= threshold {
        waiting.since = Instant::now();
        output.push(*parent);
      }
    }
    output
  }
}

#[cfg(test)]
mod test {
  use {
    super::Orphans,
    crate::{consensus::block::Block, test::utils::keypairs},
    multihash::{Code, MultihashDigest},
    std::time::Duration,
  };

  fn chain(len: usize) -> Vec<Block> {
    let keys = keypairs(2);
    let root = Code::Sha3_256.digest(b"state");
    let mut blocks = vec![Block::genesis(keys[0].public(), root)];
    for i in 1..len as u64 {
      let parent = blocks.last().unwrap().hash();
      blocks.push(Block::produce(&keys[1], i, i, parent, root, vec![]));
    }
    blocks
  }

  #[test]
  fn hold_and_consume() {
    let blocks = chain(4);
    let mut orphans = Orphans::new(Duration::from_secs(1), 10, 100);

    assert!(orphans.add(blocks[2].clone()));
    assert!(!orphans.add(blocks[2].clone()));
    assert!(orphans.add(blocks[3].clone()));
    assert_eq!(orphans.len(), 2);
    assert!(orphans.contains(&blocks[3].hash()));

    assert!(orphans.consume(&blocks[0].hash()).is_empty());

    let children = orphans.consume(&blocks[1].hash());
    assert_eq!(children.len(), 1);
    assert_eq!(children[0].hash(), blocks[2].hash());
    assert!(!orphans.contains(&blocks[2].hash()));

    let children = orphans.consume(&blocks[2].hash());
    assert_eq!(children[0].hash(), blocks[3].hash());
    assert!(orphans.is_empty());
  }

  #[test]
  fn capacity_and_pruning() {
    let blocks = chain(5);
    let mut orphans = Orphans::new(Duration::from_secs(1), 10, 2);
    assert!(orphans.add(blocks[2].clone()));
    assert!(orphans.add(blocks[3].clone()));
    assert!(!orphans.add(blocks[4].clone()));

    orphans.prune(2);
    assert!(!orphans.contains(&blocks[2].hash()));
    assert!(orphans.contains(&blocks[3].hash()));

    // zero time to live expires everything
    let mut orphans = Orphans::new(Duration::from_secs(1), 0, 10);
    orphans.add(blocks[4].clone());
    orphans.prune(0);
    assert!(orphans.is_empty());
  }

  #[test]
  fn missing_parents_are_reported() {
    let blocks = chain(3);
    let mut orphans = Orphans::new(Duration::ZERO, 10, 10);
    orphans.add(blocks[2].clone());
    assert_eq!(orphans.missing_blocks(), vec![blocks[1].hash()]);
  }
}

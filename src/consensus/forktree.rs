use {
  super::{block::Block, error::ConsensusError},
  crate::primitives::{Pubkey, ToBase58String},
  multihash::Multihash,
  std::{
    cmp::Reverse,
    collections::{HashMap, HashSet},
    sync::Arc,
  },
  tracing::debug,
};

/// Where a block is in its lifecycle.
///
/// Blocks whose parent has not arrived yet are `Pending` and live
/// in the orphan pool, not in the tree. Once attached to the tree
/// they are `Linked`, and after enough distinct witnesses built on
/// top of them they become `Confirmed`, which is irreversible.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlockStatus {
  Pending,
  Linked,
  Confirmed,
}

/// The minimum number of distinct witnesses that need to build on
/// top of a block for it to be confirmed, ceil(2/3 * witnesses).
pub fn confirmation_threshold(witnesses: usize) -> usize {
  ((2 * witnesses + 2) / 3).max(1)
}

/// Represents a single block in the fork tree.
///
/// Nodes are owned by the tree and reference each other by
/// block hash. The parent link is a non-owning back reference,
/// the children list is the set of nodes this node owns.
#[derive(Debug)]
pub struct ForkNode {
  pub block: Arc<Block>,
  pub parent: Option<Multihash>,
  pub children: Vec<Multihash>,
  pub status: BlockStatus,

  /// Size of the witness schedule that was active when this
  /// block was inserted.
  pub witnesses: usize,

  /// The witness list recorded in the state resulting from
  /// this block. Promoted to the active schedule once this
  /// block is confirmed.
  pub pending_witnesses: Arc<[Pubkey]>,

  arrival: u64,
}

impl ForkNode {
  pub fn hash(&self) -> Multihash {
    self.block.hash()
  }

  pub fn number(&self) -> u64 {
    self.block.number()
  }
}

/// Outcome of advancing the confirmed root of the tree.
#[derive(Debug, Default)]
pub struct Flushed {
  /// Newly confirmed blocks ordered from the oldest, excluding
  /// the previous root.
  pub confirmed: Vec<Arc<Block>>,

  /// Hashes of all blocks removed with the branches that forked
  /// off the confirmed path.
  pub pruned: Vec<Multihash>,
}

/// In-memory tree of all blocks that are not pruned yet.
///
/// Ideally under perfect network conditions and abscence of failures
/// this structure would be a linked list of blocks.
///
/// However due to network delays, partitions or malicious actors some
/// blocks might be missed by some witnesses and producers might start
/// building new blocks off an older block, and that creates several
/// histories.
///
/// This data structure represents all known blockchain histories
/// since the last confirmed block, which is always the root.
#[derive(Debug)]
pub struct BlockCache {
  root: Multihash,
  head: Multihash,
  nodes: HashMap<Multihash, ForkNode>,
  arrivals: u64,

  /// Blocks of pruned branches that could still get children above
  /// the root, with their block numbers.
  pruned: HashMap<Multihash, u64>,
}

impl BlockCache {
  /// Creates a tree rooted at an already confirmed block.
  pub fn new(
    root: Arc<Block>,
    witnesses: usize,
    pending_witnesses: Arc<[Pubkey]>,
  ) -> Self {
    let hash = root.hash();
    let mut nodes = HashMap::new();
    nodes.insert(hash, ForkNode {
      block: root,
      parent: None,
      children: vec![],
      status: BlockStatus::Confirmed,
      witnesses,
      pending_witnesses,
      arrival: 0,
    });

    Self {
      root: hash,
      head: hash,
      nodes,
      arrivals: 1,
      pruned: HashMap::new(),
    }
  }

  pub fn root(&self) -> &ForkNode {
    &self.nodes[&self.root]
  }

  /// The tip of the branch with the greatest block number, ties
  /// go to the branch whose tip arrived first.
  pub fn head(&self) -> &ForkNode {
    &self.nodes[&self.head]
  }

  pub fn find(&self, hash: &Multihash) -> Option<&ForkNode> {
    self.nodes.get(hash)
  }

  pub fn len(&self) -> usize {
    self.nodes.len()
  }

  pub fn is_empty(&self) -> bool {
    self.nodes.is_empty()
  }

  /// True if the block was removed with a branch that lost
  /// against a confirmed block.
  pub fn is_pruned(&self, hash: &Multihash) -> bool {
    self.pruned.contains_key(hash)
  }

  /// Remembers a block that descends from a pruned branch, so its
  /// own descendants are refused as well.
  pub fn mark_pruned(&mut self, block: &Block) {
    if block.number() >= self.root().number() {
      self.pruned.insert(block.hash(), block.number());
    }
  }

  /// State commitments referenced by any block in the tree.
  pub fn state_roots(&self) -> HashSet<Multihash> {
    self
      .nodes
      .values()
      .map(|n| n.block.header.state_root)
      .collect()
  }

  /// Checks if a block could be inserted as a child of a node
  /// in this tree without modifying anything.
  pub fn check(&self, block: &Block) -> Result<(), ConsensusError> {
    let hash = block.hash();
    if self.nodes.contains_key(&hash) {
      return Err(ConsensusError::KnownBlock(hash.to_b58()));
    }

    if block.number() <= self.root().number() {
      return Err(ConsensusError::ForksBeforeFinality);
    }

    if self.pruned.contains_key(&block.parent()) {
      return Err(ConsensusError::ForksBeforeFinality);
    }

    if !self.nodes.contains_key(&block.parent()) {
      return Err(ConsensusError::UnknownParent(block.parent().to_b58()));
    }

    Ok(())
  }

  /// Attaches a block as a `Linked` child of its parent node.
  ///
  /// The head moves to the new block if it has a greater block
  /// number than the current head.
  pub fn insert(
    &mut self,
    block: Arc<Block>,
    witnesses: usize,
    pending_witnesses: Arc<[Pubkey]>,
  ) -> Result<&ForkNode, ConsensusError> {
    self.check(&block)?;

    let hash = block.hash();
    let parent = block.parent();
    let number = block.number();

    if let Some(p) = self.nodes.get_mut(&parent) {
      p.children.push(hash);
    }

    self.nodes.insert(hash, ForkNode {
      block,
      parent: Some(parent),
      children: vec![],
      status: BlockStatus::Linked,
      witnesses,
      pending_witnesses,
      arrival: self.arrivals,
    });
    self.arrivals += 1;

    if number > self.head().number() {
      self.head = hash;
    }

    Ok(&self.nodes[&hash])
  }

  /// Walks from a node up towards the root collecting the distinct
  /// producers of the blocks on the way. Returns the first ancestor
  /// whose descendants on this path were produced by at least
  /// ceil(2/3) of the witnesses active at that ancestor.
  ///
  /// Many blocks by the same producer count only once, so a single
  /// witness can't force confirmation by producing a long branch.
  pub fn confirmation(&self, from: &Multihash) -> Option<Multihash> {
    let mut producers = HashSet::new();
    let mut current = self.nodes.get(from)?;
    loop {
      if current.status == BlockStatus::Confirmed {
        return None;
      }

      producers.insert(*current.block.producer());
      let parent_hash = current.parent?;
      let parent = self.nodes.get(&parent_hash)?;
      if parent.status == BlockStatus::Confirmed {
        return None;
      }

      if producers.len() >= confirmation_threshold(parent.witnesses) {
        return Some(parent_hash);
      }
      current = parent;
    }
  }

  /// Blocks that [`BlockCache::flush`] would confirm, ordered from
  /// the oldest and excluding the current root. Empty if the block
  /// is not a descendant of the root.
  pub fn path(&self, hash: &Multihash) -> Vec<Arc<Block>> {
    self
      .ancestry(hash)
      .into_iter()
      .skip(1)
      .map(|h| self.nodes[&h].block.clone())
      .collect()
  }

  /// Hashes from the root down to a node, both included.
  fn ancestry(&self, hash: &Multihash) -> Vec<Multihash> {
    let mut path = vec![];
    let mut cursor = Some(*hash);
    while let Some(hash) = cursor {
      match self.nodes.get(&hash) {
        Some(node) => {
          path.push(hash);
          cursor = node.parent;
        }
        None => return vec![],
      }
    }
    path.reverse();

    if path.first() != Some(&self.root) {
      return vec![];
    }
    path
  }

  /// Confirms a node and all its ancestors.
  ///
  /// Every branch that forks off before the confirmed node is
  /// removed, those can never become canonical again. The confirmed
  /// node becomes the new root and its confirmed ancestors are
  /// evicted from the tree.
  pub fn flush(&mut self, confirmed: &Multihash) -> Flushed {
    let path = self.ancestry(confirmed);
    if path.len() < 2 {
      return Flushed::default();
    }

    // drop all sibling branches forking off the confirmed path
    let mut pruned = vec![];
    for pair in path.windows(2) {
      let (ancestor, keep) = (pair[0], pair[1]);
      let siblings: Vec<_> = self.nodes[&ancestor]
        .children
        .iter()
        .filter(|c| **c != keep)
        .copied()
        .collect();
      for sibling in siblings {
        pruned.extend(self.remove_subtree(&sibling));
      }
    }

    // evict the old root and confirmed ancestors, keep the
    // confirmed node as the new root.
    let mut flushed = Vec::with_capacity(path.len() - 1);
    for hash in &path[..path.len() - 1] {
      if let Some(node) = self.nodes.remove(hash) {
        if *hash != self.root {
          flushed.push(node.block);
        }
      }
    }

    let mut root_number = 0;
    if let Some(node) = self.nodes.get_mut(confirmed) {
      node.status = BlockStatus::Confirmed;
      node.parent = None;
      root_number = node.number();
      flushed.push(node.block.clone());
    }
    self.root = *confirmed;

    // children of anything below the root fail the number check
    self.pruned.retain(|_, number| *number >= root_number);

    if !self.nodes.contains_key(&self.head) {
      self.recompute_head();
    }

    debug!(
      "flushed {} block(s), pruned {}, new root {}, {} block(s) in the \
       fork tree",
      flushed.len(),
      pruned.len(),
      confirmed.to_b58(),
      self.nodes.len()
    );

    Flushed {
      confirmed: flushed,
      pruned,
    }
  }

  fn remove_subtree(&mut self, hash: &Multihash) -> Vec<Multihash> {
    let mut removed = vec![];
    let mut stack = vec![*hash];
    while let Some(hash) = stack.pop() {
      if let Some(node) = self.nodes.remove(&hash) {
        debug!("pruning {}", node.block);
        self.pruned.insert(hash, node.number());
        removed.push(hash);
        stack.extend(node.children);
      }
    }
    removed
  }

  fn recompute_head(&mut self) {
    if let Some(head) = self
      .nodes
      .values()
      .max_by_key(|n| (n.number(), Reverse(n.arrival)))
    {
      self.head = head.hash();
    }
  }
}

#[cfg(test)]
mod test {
  use {
    super::{confirmation_threshold, BlockCache, BlockStatus},
    crate::{
      consensus::{block::Block, ConsensusError},
      primitives::Keypair,
      test::utils::keypairs,
    },
    multihash::{Code, Multihash, MultihashDigest},
    std::sync::Arc,
  };

  fn root(keys: &[Keypair]) -> Arc<Block> {
    Arc::new(Block::genesis(
      keys[0].public(),
      Code::Sha3_256.digest(b"genesis"),
    ))
  }

  fn tree(keys: &[Keypair]) -> BlockCache {
    let witnesses: Vec<_> = keys.iter().map(|k| k.public()).collect();
    BlockCache::new(root(keys), keys.len(), witnesses.into())
  }

  fn child(
    producer: &Keypair,
    parent: &Block,
    slot: u64,
  ) -> Arc<Block> {
    Arc::new(Block::produce(
      producer,
      slot,
      parent.number() + 1,
      parent.hash(),
      parent.header.state_root,
      vec![],
    ))
  }

  fn insert(tree: &mut BlockCache, block: &Arc<Block>) -> Multihash {
    let witnesses = tree.root().witnesses;
    let pending = tree.root().pending_witnesses.clone();
    tree.insert(block.clone(), witnesses, pending).unwrap().hash()
  }

  #[test]
  fn thresholds() {
    assert_eq!(confirmation_threshold(1), 1);
    assert_eq!(confirmation_threshold(3), 2);
    assert_eq!(confirmation_threshold(4), 3);
    assert_eq!(confirmation_threshold(7), 5);
    assert_eq!(confirmation_threshold(21), 14);
  }

  #[test]
  fn insert_find_and_head() {
    let keys = keypairs(3);
    let mut tree = tree(&keys);
    let genesis = tree.root().block.clone();

    let b1 = child(&keys[1], &genesis, 1);
    let b2 = child(&keys[2], &b1, 2);
    let f1 = child(&keys[1], &genesis, 4);
    insert(&mut tree, &b1);
    insert(&mut tree, &b2);
    insert(&mut tree, &f1);

    assert_eq!(tree.len(), 4);
    assert_eq!(tree.head().hash(), b2.hash());
    assert_eq!(tree.find(&b1.hash()).unwrap().status, BlockStatus::Linked);
    assert_eq!(tree.find(&b1.hash()).unwrap().children, vec![b2.hash()]);
    assert_eq!(tree.root().children, vec![b1.hash(), f1.hash()]);

    // same number on another branch, the earlier arrival stays head
    let f2 = child(&keys[2], &f1, 5);
    insert(&mut tree, &f2);
    assert_eq!(tree.head().hash(), b2.hash());

    // longer branch takes over
    let f3 = child(&keys[0], &f2, 6);
    insert(&mut tree, &f3);
    assert_eq!(tree.head().hash(), f3.hash());
  }

  #[test]
  fn insert_rejections() {
    let keys = keypairs(3);
    let mut tree = tree(&keys);
    let genesis = tree.root().block.clone();
    let b1 = child(&keys[1], &genesis, 1);
    let b2 = child(&keys[2], &b1, 2);

    let witnesses = tree.root().witnesses;
    let pending = tree.root().pending_witnesses.clone();
    assert!(matches!(
      tree.insert(b2.clone(), witnesses, pending.clone()),
      Err(ConsensusError::UnknownParent(_))
    ));

    insert(&mut tree, &b1);
    assert!(matches!(
      tree.insert(b1.clone(), witnesses, pending.clone()),
      Err(ConsensusError::KnownBlock(_))
    ));

    // number at or below the root
    let stale = Arc::new(Block::produce(
      &keys[1],
      9,
      0,
      genesis.hash(),
      genesis.header.state_root,
      vec![],
    ));
    assert!(matches!(
      tree.insert(stale, witnesses, pending),
      Err(ConsensusError::ForksBeforeFinality)
    ));
  }

  #[test]
  fn four_distinct_producers_do_not_confirm() {
    let keys = keypairs(7);
    let mut tree = tree(&keys);
    let mut parent = child(&keys[1], &tree.root().block.clone(), 1);
    let first = insert(&mut tree, &parent);

    // many blocks, but only from witnesses 2..=5
    let mut last = first;
    for slot in 2..30u64 {
      let producer = &keys[2 + (slot % 4) as usize];
      let block = child(producer, &parent, slot);
      last = insert(&mut tree, &block);
      parent = block;
      assert_eq!(tree.confirmation(&last), None);
    }
    assert_eq!(tree.find(&first).unwrap().status, BlockStatus::Linked);
    assert_eq!(tree.head().hash(), last);
  }

  #[test]
  fn single_producer_does_not_confirm() {
    let keys = keypairs(7);
    let mut tree = tree(&keys);
    let mut parent = child(&keys[1], &tree.root().block.clone(), 1);
    insert(&mut tree, &parent);

    for slot in 2..8u64 {
      let block = child(&keys[2], &parent, slot * 7 + 2);
      let hash = insert(&mut tree, &block);
      assert_eq!(tree.confirmation(&hash), None);
      parent = block;
    }
  }

  #[test]
  fn five_of_seven_confirm_and_prune() {
    let keys = keypairs(7);
    let mut tree = tree(&keys);
    let genesis = tree.root().block.clone();

    let b1 = child(&keys[1], &genesis, 1);
    insert(&mut tree, &b1);

    // competing branches off genesis and off b1
    let fork_genesis = child(&keys[4], &genesis, 4);
    insert(&mut tree, &fork_genesis);
    let fork_b1 = child(&keys[5], &b1, 5);
    let fork_b1_child = child(&keys[6], &fork_b1, 6);
    insert(&mut tree, &fork_b1);
    insert(&mut tree, &fork_b1_child);

    let mut parent = b1.clone();
    let mut hashes = vec![b1.hash()];
    for slot in 2..=6u64 {
      let block = child(&keys[slot as usize], &parent, slot + 7);
      let hash = insert(&mut tree, &block);
      hashes.push(hash);
      parent = block;

      let confirmed = tree.confirmation(&hash);
      if slot < 6 {
        assert_eq!(confirmed, None);
      } else {
        // b2..b6 come from 5 distinct witnesses
        assert_eq!(confirmed, Some(b1.hash()));
      }
    }

    assert_eq!(tree.path(&b1.hash()), vec![b1.clone()]);
    let flushed = tree.flush(&b1.hash());
    assert_eq!(flushed.confirmed.len(), 1);
    assert_eq!(flushed.confirmed[0].hash(), b1.hash());
    assert_eq!(flushed.pruned, vec![fork_genesis.hash()]);
    assert!(tree.is_pruned(&fork_genesis.hash()));

    assert_eq!(tree.root().hash(), b1.hash());
    assert_eq!(tree.root().status, BlockStatus::Confirmed);
    assert!(tree.find(&genesis.hash()).is_none());
    assert!(tree.find(&fork_genesis.hash()).is_none());

    // branches off the confirmed block itself are still alive
    assert!(tree.find(&fork_b1.hash()).is_some());
    assert!(tree.find(&fork_b1_child.hash()).is_some());
    assert_eq!(tree.len(), 8);
    assert_eq!(tree.head().hash(), *hashes.last().unwrap());

    // confirmation is a ratchet, the path to the root stops there
    assert_eq!(tree.confirmation(&b1.hash()), None);

    // anything forking at or before the root is refused
    let late = child(&keys[2], &genesis, 30);
    let witnesses = tree.root().witnesses;
    let pending = tree.root().pending_witnesses.clone();
    assert!(matches!(
      tree.insert(late, witnesses, pending),
      Err(ConsensusError::ForksBeforeFinality)
    ));
    assert_eq!(tree.head().hash(), *hashes.last().unwrap());
  }

  #[test]
  fn flush_moves_head_off_pruned_branch() {
    let keys = keypairs(4);
    let mut tree = tree(&keys);
    let genesis = tree.root().block.clone();

    let a1 = child(&keys[1], &genesis, 1);
    let a2 = child(&keys[2], &a1, 2);
    insert(&mut tree, &a1);
    insert(&mut tree, &a2);

    // a longer branch that is going to be pruned
    let mut parent = genesis.clone();
    for slot in 5..9u64 {
      let block = child(&keys[1], &parent, slot);
      insert(&mut tree, &block);
      parent = block;
    }
    assert_eq!(tree.head().number(), 4);

    let path = tree.path(&a2.hash());
    assert_eq!(path, vec![a1.clone(), a2.clone()]);
    assert_eq!(tree.path(&parent.hash()).len(), 4);

    let flushed = tree.flush(&a2.hash());
    assert_eq!(flushed.confirmed, path);
    assert_eq!(flushed.pruned.len(), 4);
    assert_eq!(tree.root().hash(), a2.hash());
    assert_eq!(tree.head().hash(), a2.hash());
    assert_eq!(tree.len(), 1);
    assert!(tree.path(&parent.hash()).is_empty());
  }

  #[test]
  fn children_of_pruned_blocks_are_refused() {
    let keys = keypairs(3);
    let mut tree = tree(&keys);
    let genesis = tree.root().block.clone();

    // f1 loses against the main chain, m1 gets confirmed
    let f1 = child(&keys[1], &genesis, 1);
    let m1 = child(&keys[1], &genesis, 4);
    let m2 = child(&keys[2], &m1, 5);
    let m3 = child(&keys[0], &m2, 6);
    for block in [&f1, &m1, &m2, &m3] {
      insert(&mut tree, block);
    }
    let flushed = tree.flush(&m1.hash());
    assert_eq!(flushed.pruned, vec![f1.hash()]);

    // f2 has a number above the root, but extends a pruned block
    let f2 = child(&keys[2], &f1, 7);
    assert!(f2.number() > tree.root().number());
    let witnesses = tree.root().witnesses;
    let pending = tree.root().pending_witnesses.clone();
    assert!(matches!(
      tree.insert(f2.clone(), witnesses, pending.clone()),
      Err(ConsensusError::ForksBeforeFinality)
    ));

    // and so do blocks built on top of it
    tree.mark_pruned(&f2);
    let f3 = child(&keys[0], &f2, 8);
    assert!(matches!(
      tree.check(&f3),
      Err(ConsensusError::ForksBeforeFinality)
    ));
    assert_eq!(tree.head().hash(), m3.hash());

    // once the root passes them, pruned blocks are forgotten
    let m4 = child(&keys[1], &m3, 7);
    insert(&mut tree, &m4);
    tree.flush(&m3.hash());
    assert_eq!(tree.root().number(), 3);
    assert!(!tree.is_pruned(&f1.hash()));
    assert!(!tree.is_pruned(&f2.hash()));
    assert!(matches!(
      tree.check(&f3),
      Err(ConsensusError::ForksBeforeFinality)
    ));
  }

  #[test]
  fn state_roots_of_live_blocks() {
    let keys = keypairs(3);
    let mut tree = tree(&keys);
    let genesis = tree.root().block.clone();

    let b1 = child(&keys[1], &genesis, 1);
    insert(&mut tree, &b1);
    let roots = tree.state_roots();
    assert_eq!(roots.len(), 1);
    assert!(roots.contains(&genesis.header.state_root));
  }
}

use {
  super::{
    block::Block,
    error::ConsensusError,
    forktree::{BlockCache, BlockStatus},
    genesis::{Genesis, Limits},
    orphans::Orphans,
    property::DynamicProperty,
    schedule::{SlotClock, WitnessSchedule},
    slots::SlotGuard,
  },
  crate::{
    metrics::Metrics,
    network::{Message, Network},
    primitives::{Keypair, Pubkey, ToBase58String},
    state::StateStore,
    storage::BlockStore,
    txpool::TransactionPool,
  },
  chrono::Utc,
  futures::future::join_all,
  multihash::Multihash,
  rayon::prelude::*,
  std::{
    collections::{HashSet, VecDeque},
    sync::Arc,
  },
  tokio::{
    sync::{mpsc::UnboundedReceiver, watch, RwLock},
    task::JoinHandle,
    time::sleep,
  },
  tracing::{debug, info, warn},
};

/// Operating mode of a node. While syncing, a node only follows
/// the chain and never produces blocks, even in its own slots.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
  Normal,
  Sync,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Origin {
  Local,
  Remote,
}

/// Everything that is mutated by both workers. Always accessed
/// through a single lock, and never held across a suspension point.
struct ConsensusState {
  tree: BlockCache,
  schedule: WitnessSchedule,
  property: DynamicProperty,
  orphans: Orphans,
  mode: Mode,
}

impl ConsensusState {
  /// Drops held orphans that descend from pruned blocks, together
  /// with their own held descendants.
  fn drop_pruned_orphans(&mut self, pruned: Vec<Multihash>) {
    let mut queue = pruned;
    while let Some(hash) = queue.pop() {
      for orphan in self.orphans.consume(&hash) {
        debug!("dropping orphan {orphan} of a pruned branch");
        self.tree.mark_pruned(&orphan);
        queue.push(orphan.hash());
      }
    }
  }
}

struct Core<S: StateStore> {
  keypair: Keypair,
  clock: SlotClock,
  limits: Limits,
  state: RwLock<ConsensusState>,
  slots: SlotGuard,
  store: S,
  pool: Arc<dyn TransactionPool>,
  network: Arc<dyn Network>,
  blocks: BlockStore,
  metrics: Metrics,
}

/// Proof-of-Believability consensus.
///
/// Witnesses take turns producing blocks in fixed length slots.
/// Blocks from the network are verified against their parent
/// state and attached to the fork tree, and a block is confirmed
/// once more than 2/3 of the witnesses have built on top of it.
///
/// The engine runs two workers, one waking up at every slot to
/// produce blocks when it is our turn and one verifying inbound
/// blocks. Both are started by [`ConsensusEngine::run`] and stopped
/// by [`ConsensusEngine::shutdown`].
pub struct ConsensusEngine<S: StateStore> {
  core: Arc<Core<S>>,
  shutdown: watch::Sender<bool>,
  workers: Vec<JoinHandle<()>>,
}

impl<S: StateStore> ConsensusEngine<S> {
  /// Creates an engine rooted at the most recent confirmed block
  /// in the block store, or at a freshly built genesis block if
  /// the store is empty.
  ///
  /// Confirmed blocks are replayed on top of the genesis state, so
  /// the state store doesn't need to be durable.
  pub fn new(
    genesis: &Genesis,
    keypair: Keypair,
    store: S,
    pool: Arc<dyn TransactionPool>,
    network: Arc<dyn Network>,
    blocks: BlockStore,
  ) -> Result<Self, ConsensusError> {
    if genesis.witnesses.is_empty() {
      return Err(ConsensusError::EmptySchedule);
    }

    let root = restore(genesis, &store, &blocks)?;
    let witnesses = store.witnesses(&root.header.state_root)?;
    let schedule = WitnessSchedule::new(witnesses.clone())?;
    let clock = genesis.clock();

    info!("consensus root: {root}");
    info!(
      "witnesses: [{}]",
      itertools::join(schedule.witnesses().iter(), ", ")
    );

    let property = DynamicProperty::new(
      clock,
      clock.slot_time(root.slot()),
      root.number(),
    );
    let orphans = Orphans::new(
      clock.slot_interval(),
      genesis.limits.orphan_ttl,
      genesis.limits.max_orphans,
    );
    let metrics = Metrics::new()?;
    metrics.confirmed_length.set(root.number() as i64);
    metrics.tx_pool_size.set(pool.pending_count() as i64);

    let tree =
      BlockCache::new(Arc::new(root), schedule.len(), witnesses.into());

    let (shutdown, _) = watch::channel(false);
    Ok(Self {
      core: Arc::new(Core {
        keypair,
        clock,
        limits: genesis.limits.clone(),
        state: RwLock::new(ConsensusState {
          tree,
          schedule,
          property,
          orphans,
          mode: Mode::Normal,
        }),
        slots: SlotGuard::new(),
        store,
        pool,
        network,
        blocks,
        metrics,
      }),
      shutdown,
      workers: vec![],
    })
  }

  /// Starts the production and verification workers.
  pub fn run(&mut self, inbound: UnboundedReceiver<Message>) {
    self.workers.push(tokio::spawn(production_loop(
      self.core.clone(),
      self.shutdown.subscribe(),
    )));
    self.workers.push(tokio::spawn(verification_loop(
      self.core.clone(),
      inbound,
      self.shutdown.subscribe(),
    )));
  }

  /// Signals both workers to stop and waits until they do. Workers
  /// observe the signal while waiting for the next slot or message,
  /// never in the middle of changing the consensus state.
  pub async fn shutdown(self) {
    // fails only if no worker was started
    let _ = self.shutdown.send(true);
    for result in join_all(self.workers).await {
      if let Err(e) = result {
        warn!("consensus worker failed: {e}");
      }
    }
    if let Err(e) = self.core.blocks.flush().await {
      warn!("failed to flush the block store: {e}");
    }
    info!("consensus stopped");
  }

  pub async fn set_mode(&self, mode: Mode) {
    info!("switching to {mode:?} mode");
    self.core.state.write().await.mode = mode;
  }

  pub async fn mode(&self) -> Mode {
    self.core.state.read().await.mode
  }

  /// Attempts to produce a block for a slot. Returns `None` if this
  /// node is not the witness of the slot or is syncing.
  pub async fn produce(
    &self,
    slot: u64,
  ) -> Result<Option<Arc<Block>>, ConsensusError> {
    self.core.produce(slot).await
  }

  /// Handles a single message from the network. For blocks it
  /// returns the resulting status of the block.
  pub async fn process(
    &self,
    message: Message,
  ) -> Result<Option<BlockStatus>, ConsensusError> {
    self.core.process(message).await
  }

  /// The tip of the canonical chain.
  pub async fn head(&self) -> Arc<Block> {
    self.core.state.read().await.tree.head().block.clone()
  }

  /// The most recent confirmed block.
  pub async fn confirmed(&self) -> Arc<Block> {
    self.core.state.read().await.tree.root().block.clone()
  }

  pub async fn status(
    &self,
    hash: &Multihash,
  ) -> Result<Option<BlockStatus>, ConsensusError> {
    self.core.status(hash).await
  }

  /// The active witness schedule.
  pub async fn witnesses(&self) -> Vec<Pubkey> {
    self.core.state.read().await.schedule.witnesses().to_vec()
  }

  pub fn metrics(&self) -> &Metrics {
    &self.core.metrics
  }
}

/// Finds the root of the fork tree and rebuilds its state.
fn restore<S: StateStore>(
  genesis: &Genesis,
  store: &S,
  blocks: &BlockStore,
) -> Result<Block, ConsensusError> {
  let commitment = store.genesis(genesis)?;
  let genesis_block = match blocks.get_by_number(0)? {
    Some(block) => block,
    None => {
      let block = Block::genesis(genesis.witnesses[0], commitment);
      blocks.push(&block)?;
      info!("created genesis block {block}");
      return Ok(block);
    }
  };

  if genesis_block.header.state_root != commitment {
    return Err(ConsensusError::BadStateRoot);
  }

  let clock = genesis.clock();
  let mut root = genesis_block;
  let top = blocks.top()?.map(|b| b.number()).unwrap_or_default();
  for number in 1..=top {
    let block = blocks
      .get_by_number(number)?
      .ok_or(ConsensusError::MissingBlock(number))?;
    let mut view = store.checkout(&root.header.state_root)?;
    store.expire(&mut view, clock.slot_time(block.slot()));
    let execution = store.execute(&mut view, &block.transactions)?;
    if execution.commitment != block.header.state_root {
      return Err(ConsensusError::BadStateRoot);
    }
    store.tag(view);
    root = block;
  }

  if top != 0 {
    info!("replayed {top} confirmed block(s)");
    store.retain(&HashSet::from([root.header.state_root]));
  }
  Ok(root)
}

async fn production_loop<S: StateStore>(
  core: Arc<Core<S>>,
  mut shutdown: watch::Receiver<bool>,
) {
  loop {
    let wait = core
      .state
      .read()
      .await
      .property
      .time_until_next_slot(Utc::now());

    tokio::select! {
      _ = shutdown.changed() => break,
      _ = sleep(wait) => {}
    }

    let slot = core.clock.slot_at(Utc::now());
    core.housekeeping(slot).await;

    match core.produce(slot).await {
      Ok(Some(_)) => {}
      Ok(None) => debug!("not producing in slot {slot}"),
      Err(e) => warn!("block production aborted for slot {slot}: {e}"),
    }
  }
  debug!("production worker stopped");
}

async fn verification_loop<S: StateStore>(
  core: Arc<Core<S>>,
  mut inbound: UnboundedReceiver<Message>,
  mut shutdown: watch::Receiver<bool>,
) {
  loop {
    tokio::select! {
      _ = shutdown.changed() => break,
      message = inbound.recv() => match message {
        Some(message) => {
          if let Err(e) = core.process(message).await {
            warn!("rejected inbound block: {e}");
          }
        }
        None => break,
      }
    }
  }
  debug!("verification worker stopped");
}

impl<S: StateStore> Core<S> {
  async fn produce(
    &self,
    slot: u64,
  ) -> Result<Option<Arc<Block>>, ConsensusError> {
    let parent = {
      let state = self.state.read().await;
      if state.mode != Mode::Normal {
        return Ok(None);
      }
      if state.schedule.producer_for_slot(slot)? != self.keypair.public() {
        return Ok(None);
      }
      state.tree.head().block.clone()
    };

    if self.slots.is_claimed(slot) {
      return Err(ConsensusError::DuplicateSlot(slot));
    }

    if slot <= parent.slot() {
      return Err(ConsensusError::InvalidSlot {
        slot,
        parent: parent.slot(),
      });
    }

    // execute pending transactions one by one, skipping the ones
    // that fail on top of the current head state.
    let slot_time = self.clock.slot_time(slot);
    let mut view = self.store.checkout(&parent.header.state_root)?;
    self.store.expire(&mut view, slot_time);
    let mut included = vec![];
    for tx in self
      .pool
      .pending_transactions()
      .into_iter()
      .filter(|tx| !tx.is_expired(slot_time))
      .take(self.limits.max_block_transactions)
    {
      let mut attempt = view.clone();
      match self.store.execute(&mut attempt, std::slice::from_ref(&tx)) {
        Ok(_) => {
          view = attempt;
          included.push(tx);
        }
        Err(e) => debug!("skipping transaction {}: {e}", tx.hash().to_b58()),
      }
    }
    let execution = self.store.execute(&mut view, &[])?;

    let block = Arc::new(Block::produce(
      &self.keypair,
      slot,
      parent.number() + 1,
      parent.hash(),
      execution.commitment,
      included,
    ));

    if !self.slots.try_claim(slot) {
      return Err(ConsensusError::DuplicateSlot(slot));
    }

    self
      .commit(block.clone(), view, execution.witnesses, Origin::Local)
      .await?;
    self.network.broadcast(Message::NewBlock(block.encode()?));
    self.metrics.generated_blocks.inc();

    info!(
      "produced block {block} with {} transaction(s)",
      block.transactions.len()
    );
    Ok(Some(block))
  }

  async fn process(
    &self,
    message: Message,
  ) -> Result<Option<BlockStatus>, ConsensusError> {
    match message {
      Message::NewBlock(bytes) | Message::SyncBlock(bytes) => {
        let block = Block::decode(&bytes)?;
        self.metrics.received_blocks.inc();
        self.include(block).await.map(Some)
      }
      Message::BlockRequest(hash) => {
        self.respond(&hash).await?;
        Ok(None)
      }
    }
  }

  /// Verifies and inserts an inbound block, then reattaches all
  /// orphans that were waiting for it or its descendants.
  async fn include(&self, block: Block) -> Result<BlockStatus, ConsensusError> {
    let hash = block.hash();
    let status = self.include_one(block).await?;
    if status == BlockStatus::Pending {
      return Ok(status);
    }

    let mut queue: VecDeque<Block> = self.consume_orphans(&hash).await.into();
    while let Some(orphan) = queue.pop_front() {
      let orphan_hash = orphan.hash();
      match self.include_one(orphan).await {
        Ok(BlockStatus::Pending) => {}
        Ok(_) => {
          debug!("reattached orphan {}", orphan_hash.to_b58());
          queue.extend(self.consume_orphans(&orphan_hash).await);
        }
        Err(e) => warn!("rejected orphan {}: {e}", orphan_hash.to_b58()),
      }
    }

    Ok(self.status(&hash).await?.unwrap_or(status))
  }

  async fn consume_orphans(&self, parent: &Multihash) -> Vec<Block> {
    self.state.write().await.orphans.consume(parent)
  }

  async fn include_one(
    &self,
    block: Block,
  ) -> Result<BlockStatus, ConsensusError> {
    let current_slot = self.clock.slot_at(Utc::now());
    let parent = {
      let state = self.state.read().await;
      if state.orphans.contains(&block.hash()) {
        return Ok(BlockStatus::Pending);
      }

      match state.tree.check(&block) {
        Ok(()) => {}
        Err(ConsensusError::UnknownParent(parent)) => {
          self.verify_standalone(&block, &state.schedule, current_slot)?;
          drop(state);
          if self.blocks.contains(&block.parent())? {
            self.discard(&block).await;
            return Err(ConsensusError::ForksBeforeFinality);
          }
          debug!("parent {parent} of {block} is not known yet");
          self.state.write().await.orphans.add(block);
          return Ok(BlockStatus::Pending);
        }
        Err(ConsensusError::ForksBeforeFinality) => {
          self.verify_standalone(&block, &state.schedule, current_slot)?;
          drop(state);
          self.discard(&block).await;
          return Err(ConsensusError::ForksBeforeFinality);
        }
        Err(e) => return Err(e),
      }

      let parent = state
        .tree
        .find(&block.parent())
        .map(|node| node.block.clone())
        .ok_or_else(|| {
          ConsensusError::UnknownParent(block.parent().to_b58())
        })?;
      self.verify_standalone(&block, &state.schedule, current_slot)?;
      parent
    };

    self.verify_linkage(&block, &parent)?;

    // execution happens without holding the consensus lock
    let mut view = self.store.checkout(&parent.header.state_root)?;
    self
      .store
      .expire(&mut view, self.clock.slot_time(block.slot()));
    let execution = self.store.execute(&mut view, &block.transactions)?;
    if execution.commitment != block.header.state_root {
      return Err(ConsensusError::BadStateRoot);
    }

    self
      .commit(Arc::new(block), view, execution.witnesses, Origin::Remote)
      .await
  }

  /// Remembers a block that extends a pruned branch and drops the
  /// orphans that were waiting for it.
  async fn discard(&self, block: &Block) {
    debug!("discarding {block}, it extends a pruned branch");
    let mut state = self.state.write().await;
    state.tree.mark_pruned(block);
    state.drop_pruned_orphans(vec![block.hash()]);
  }

  /// Checks that don't need the parent block: producer, slot
  /// bounds, signature and transactions. Transactions must be
  /// unique within the block and valid at the slot time.
  fn verify_standalone(
    &self,
    block: &Block,
    schedule: &WitnessSchedule,
    current_slot: u64,
  ) -> Result<(), ConsensusError> {
    let expected = schedule.producer_for_slot(block.slot())?;
    if *block.producer() != expected {
      return Err(ConsensusError::WrongWitness {
        producer: *block.producer(),
        slot: block.slot(),
      });
    }

    if block.slot() > current_slot + self.limits.future_slots {
      return Err(ConsensusError::InvalidSlot {
        slot: block.slot(),
        parent: current_slot,
      });
    }

    if !block.verify_signature() {
      return Err(ConsensusError::BadSignature);
    }

    if block.transactions.len() > self.limits.max_block_transactions {
      return Err(ConsensusError::TooManyTransactions(
        block.transactions.len(),
      ));
    }

    let slot_time = self.clock.slot_time(block.slot());
    let mut seen = HashSet::with_capacity(block.transactions.len());
    for tx in &block.transactions {
      let hash = tx.hash();
      if tx.is_expired(slot_time) {
        return Err(ConsensusError::ExpiredTransaction(hash.to_b58()));
      }
      if !seen.insert(hash) {
        return Err(ConsensusError::DuplicateTransaction(hash.to_b58()));
      }
    }

    if !block
      .transactions
      .par_iter()
      .all(|tx| tx.verify_self().is_ok())
    {
      return Err(ConsensusError::InvalidTransaction);
    }

    Ok(())
  }

  fn verify_linkage(
    &self,
    block: &Block,
    parent: &Block,
  ) -> Result<(), ConsensusError> {
    if block.slot() <= parent.slot() {
      return Err(ConsensusError::InvalidSlot {
        slot: block.slot(),
        parent: parent.slot(),
      });
    }

    if block.number() != parent.number() + 1 {
      return Err(ConsensusError::InvalidNumber {
        number: block.number(),
        parent: parent.number(),
      });
    }

    if self.slots.is_claimed(block.slot()) {
      return Err(ConsensusError::DuplicateSlot(block.slot()));
    }

    Ok(())
  }

  /// Inserts a verified block into the fork tree together with its
  /// resulting state and advances confirmation.
  async fn commit(
    &self,
    block: Arc<Block>,
    view: S::View,
    witnesses: Vec<Pubkey>,
    origin: Origin,
  ) -> Result<BlockStatus, ConsensusError> {
    let hash = block.hash();
    let is_head = {
      let mut state = self.state.write().await;
      state.tree.check(&block)?;

      if origin == Origin::Remote && !self.slots.try_claim(block.slot()) {
        return Err(ConsensusError::DuplicateSlot(block.slot()));
      }

      let active = state.schedule.len();
      state.tree.insert(block.clone(), active, witnesses.into())?;
      self.store.tag(view);
      info!("included block {block}");

      if let Some(confirmed) = state.tree.confirmation(&hash) {
        self.confirm(&mut state, &confirmed);
      }

      let head = state.tree.head().block.clone();
      let head_time = self.clock.slot_time(head.slot());
      state.property.update(head_time, head.number());
      head.hash() == hash
    };

    self.pool.notify_confirmed(&block, is_head);
    self.metrics.tx_pool_size.set(self.pool.pending_count() as i64);

    Ok(match self.status(&hash).await? {
      Some(status) => status,
      None => BlockStatus::Linked,
    })
  }

  /// Stores the blocks confirmed by `confirmed`, then makes it the
  /// root of the fork tree and promotes its witness set.
  ///
  /// If storing fails the tree is left untouched, and confirmation
  /// is attempted again with the next block built on this branch.
  fn confirm(&self, state: &mut ConsensusState, confirmed: &Multihash) {
    for block in state.tree.path(confirmed) {
      if let Err(e) = self.blocks.push(&block) {
        warn!("confirmation of {block} deferred, storage failed: {e}");
        return;
      }
    }

    let flushed = state.tree.flush(confirmed);
    for block in &flushed.confirmed {
      info!("confirmed block {block}");
    }
    state.drop_pruned_orphans(flushed.pruned);

    let root = state.tree.root();
    let (root_number, pending) =
      (root.number(), root.pending_witnesses.clone());
    state.orphans.prune(root_number);
    self.store.retain(&state.tree.state_roots());
    self.metrics.confirmed_length.set(root_number as i64);

    if &pending[..] != state.schedule.witnesses() {
      match state.schedule.update(pending.to_vec()) {
        Ok(()) => info!(
          "witness set changed to [{}]",
          itertools::join(pending.iter(), ", ")
        ),
        Err(e) => warn!("witness set not changed: {e}"),
      }
    }
  }

  async fn status(
    &self,
    hash: &Multihash,
  ) -> Result<Option<BlockStatus>, ConsensusError> {
    {
      let state = self.state.read().await;
      if let Some(node) = state.tree.find(hash) {
        return Ok(Some(node.status));
      }
      if state.orphans.contains(hash) {
        return Ok(Some(BlockStatus::Pending));
      }
    }

    if self.blocks.contains(hash)? {
      return Ok(Some(BlockStatus::Confirmed));
    }
    Ok(None)
  }

  /// Answers a block request from a peer that is missing a block.
  async fn respond(&self, hash: &Multihash) -> Result<(), ConsensusError> {
    let cached = self
      .state
      .read()
      .await
      .tree
      .find(hash)
      .map(|node| node.block.clone());

    let bytes = match cached {
      Some(block) => block.encode()?,
      None => match self.blocks.get_by_hash(hash)? {
        Some(block) => block.encode()?,
        None => {
          debug!("requested block {} is not known", hash.to_b58());
          return Ok(());
        }
      },
    };

    debug!("sending block {} to peers", hash.to_b58());
    self.network.broadcast(Message::SyncBlock(bytes));
    Ok(())
  }

  /// Per slot maintenance: expires orphans, forgets old slots and
  /// asks peers for parents that orphans are waiting for.
  async fn housekeeping(&self, slot: u64) {
    let missing = {
      let mut state = self.state.write().await;
      let root = state.tree.root();
      let (root_number, root_slot) = (root.number(), root.block.slot());
      state.orphans.prune(root_number);
      self.slots.garbage_collect(slot, root_slot);
      state.orphans.missing_blocks()
    };
    self.metrics.tx_pool_size.set(self.pool.pending_count() as i64);

    for hash in missing {
      debug!("requesting missing block {}", hash.to_b58());
      self.network.broadcast(Message::BlockRequest(hash));
    }
  }
}

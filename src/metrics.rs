//! Progress metrics of a node in the Prometheus text format.
//!
//! Every engine owns its own registry, so several nodes can run in
//! one process without their series colliding.

use prometheus::{Encoder, IntCounter, IntGauge, Registry, TextEncoder};

pub struct Metrics {
  registry: Registry,

  /// Blocks produced by this node.
  pub generated_blocks: IntCounter,

  /// Blocks decoded from network messages.
  pub received_blocks: IntCounter,

  /// Number of the most recent confirmed block.
  pub confirmed_length: IntGauge,

  /// Transactions waiting in the pool.
  pub tx_pool_size: IntGauge,
}

impl Metrics {
  pub fn new() -> Result<Self, prometheus::Error> {
    let registry = Registry::new_custom(Some("pob".to_owned()), None)?;

    let generated_blocks = IntCounter::new(
      "generated_block_count",
      "Total number of blocks produced by this node",
    )?;
    let received_blocks = IntCounter::new(
      "received_block_count",
      "Total number of blocks received from the network",
    )?;
    let confirmed_length = IntGauge::new(
      "confirmed_blockchain_length",
      "Block number of the last confirmed block",
    )?;
    let tx_pool_size = IntGauge::new(
      "tx_pool_size",
      "Number of transactions pending in the pool",
    )?;

    registry.register(Box::new(generated_blocks.clone()))?;
    registry.register(Box::new(received_blocks.clone()))?;
    registry.register(Box::new(confirmed_length.clone()))?;
    registry.register(Box::new(tx_pool_size.clone()))?;

    Ok(Self {
      registry,
      generated_blocks,
      received_blocks,
      confirmed_length,
      tx_pool_size,
    })
  }

  pub fn registry(&self) -> &Registry {
    &self.registry
  }

  /// Renders all series in the Prometheus text exposition format.
  pub fn encode(&self) -> Result<String, prometheus::Error> {
    let mut buffer = vec![];
    TextEncoder::new().encode(&self.registry.gather(), &mut buffer)?;
    String::from_utf8(buffer)
      .map_err(|e| prometheus::Error::Msg(e.to_string()))
  }
}

impl std::fmt::Debug for Metrics {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    f.debug_struct("Metrics")
      .field("generated_blocks", &self.generated_blocks.get())
      .field("received_blocks", &self.received_blocks.get())
      .field("confirmed_length", &self.confirmed_length.get())
      .field("tx_pool_size", &self.tx_pool_size.get())
      .finish()
  }
}

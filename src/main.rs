mod cli;

use {
  clap::Parser,
  cli::CliOpts,
  pob::{
    consensus::{ConsensusEngine, Genesis, Mode},
    network::MemoryNetwork,
    state::MemoryStore,
    storage::BlockStore,
    txpool::MemPool,
  },
  std::{sync::Arc, time::Duration},
  tracing::{debug, info, warn, Level},
};

fn print_essentials(opts: &CliOpts, genesis: &Genesis) {
  info!("Starting PoB witness node");
  info!("Version: {}", env!("CARGO_PKG_VERSION"));
  info!("Chain identity: {}", opts.keypair);
  info!("Genesis: {:#?}", genesis);
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
  let opts = CliOpts::parse();

  tracing_subscriber::fmt()
    .with_max_level(match opts.verbose {
      1 => Level::DEBUG,
      2 => Level::TRACE,
      _ => Level::INFO,
    })
    .init();

  // read the genesis configuration and print basic
  // information about the node and the blockchain
  let genesis = opts.genesis()?;
  print_essentials(&opts, &genesis);

  let blocks = BlockStore::new(opts.data_dir(&genesis.chain_id)?)?;

  // peer to peer transport is provided by the embedding
  // application, a standalone node talks to an in-process hub.
  let hub = MemoryNetwork::new();
  let (network, inbound) = hub.join();

  let pool = Arc::new(MemPool::new(genesis.limits.max_block_transactions * 4));
  let mut engine = ConsensusEngine::new(
    &genesis,
    opts.keypair.clone(),
    MemoryStore::new(),
    pool,
    Arc::new(network),
    blocks,
  )?;

  if opts.sync {
    engine.set_mode(Mode::Sync).await;
  }

  engine.run(inbound);

  // the metrics are dumped to the debug log until the node stops
  let mut report = tokio::time::interval(Duration::from_secs(60));
  loop {
    tokio::select! {
      result = tokio::signal::ctrl_c() => break result?,
      _ = report.tick() => match engine.metrics().encode() {
        Ok(text) => debug!("metrics:\n{text}"),
        Err(e) => warn!("failed to encode metrics: {e}"),
      },
    }
  }
  info!("shutting down");
  engine.shutdown().await;

  Ok(())
}

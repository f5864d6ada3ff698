use {
  clap::Parser,
  pob::{
    consensus::{Genesis, GenesisError},
    primitives::Keypair,
  },
  std::path::PathBuf,
};

#[derive(Debug, Parser)]
#[clap(version, about)]
pub struct CliOpts {
  #[clap(short, long, help = "secret key of the witness account")]
  pub keypair: Keypair,

  #[clap(
    short,
    long,
    parse(from_occurrences),
    help = "Use verbose output (-vv very verbose output)"
  )]
  pub verbose: u64,

  #[clap(long, parse(from_os_str), help = "path to the chain genesis file")]
  genesis: PathBuf,

  #[clap(
    long,
    parse(from_os_str),
    help = "path to the data directory",
    default_value = "~/.pob/"
  )]
  data_dir: PathBuf,

  #[clap(
    long,
    help = "start in sync mode, following the chain without producing blocks"
  )]
  pub sync: bool,
}

impl CliOpts {
  /// Retreives the genesis config from its JSON serialized
  /// form from the path provided by the user.
  pub fn genesis(&self) -> Result<Genesis, GenesisError> {
    Genesis::load(&self.genesis)
  }

  /// Gets the data directory for this chain.
  /// The chain directory is <top-level-data-dir>/<chain-id>/*
  pub fn data_dir(&self, chain_id: &str) -> Result<PathBuf, std::io::Error> {
    let mut dir: PathBuf =
      shellexpand::full(&self.data_dir.to_string_lossy())
        .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidInput, e))?
        .to_string()
        .into();
    dir.push(chain_id);
    std::fs::create_dir_all(dir.clone())?;
    Ok(dir)
  }
}

use {
  chrono::Utc,
  pob::{
    consensus::{Genesis, Limits},
    primitives::Keypair,
  },
  rand::{rngs::ThreadRng, RngCore},
  std::time::Duration,
};

/// Generates witness keypairs and prints a genesis file
/// template that lists them as the initial witnesses.
fn main() -> anyhow::Result<()> {
  let mut rng = ThreadRng::default();
  let count: usize = std::env::args()
    .nth(1)
    .unwrap_or_else(|| "1".to_owned())
    .parse()?;

  let mut witnesses = Vec::with_capacity(count);
  for _ in 0..count {
    let mut randbytes = [0u8; 32];
    rng.fill_bytes(&mut randbytes);
    let keypair = Keypair::try_from(&randbytes[..])?;

    println!("pubkey: {}", keypair.public());
    let secret = bs58::encode(keypair.secret().as_bytes()).into_string();
    println!("secret: {}", secret);
    println!();
    witnesses.push(keypair.public());
  }

  let genesis = Genesis {
    chain_id: "pob-local".to_owned(),
    genesis_time: Utc::now(),
    slot_interval: Duration::from_secs(3),
    balances: witnesses.iter().map(|w| (*w, 1_000_000)).collect(),
    witnesses,
    limits: Limits::default(),
  };
  println!("{}", serde_json::to_string_pretty(&genesis)?);
  Ok(())
}

use {
  super::transaction::Transaction,
  crate::primitives::{Keypair, Pubkey, ToBase58String},
  ed25519_dalek::Signature,
  multihash::{Code as MultihashCode, Multihash, MultihashDigest},
  once_cell::sync::OnceCell,
  serde::{Deserialize, Serialize},
  std::fmt::{Debug, Display},
};

/// Block header fields, everything that contributes to the block
/// identity. Transactions are committed to through `tx_root`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockHeader {
  /// The witness that produced and signed this block.
  pub producer: Pubkey,

  /// The time slot in which the block was produced.
  pub slot: u64,

  /// Sequence number of the block, parent number + 1.
  pub number: u64,

  /// Hash of the block this block builds on top of.
  pub parent: Multihash,

  /// Commitment to the state after executing all transactions
  /// in this block on top of the parent state.
  pub state_root: Multihash,

  /// Hash over the ordered list of transaction hashes.
  pub tx_root: Multihash,
}

/// A block is immutable once signed. Its identity is the content
/// hash of its header.
#[derive(Clone, Serialize, Deserialize)]
pub struct Block {
  pub header: BlockHeader,
  pub transactions: Vec<Transaction>,

  /// Signature of the producer over the block hash bytes.
  /// The genesis block is trusted and carries no signature.
  pub signature: Option<Signature>,

  #[serde(skip)]
  hashcache: OnceCell<Multihash>,
}

impl Block {
  /// Builds and signs a new block.
  pub fn produce(
    keypair: &Keypair,
    slot: u64,
    number: u64,
    parent: Multihash,
    state_root: Multihash,
    transactions: Vec<Transaction>,
  ) -> Self {
    let mut block = Self {
      header: BlockHeader {
        producer: keypair.public(),
        slot,
        number,
        parent,
        state_root,
        tx_root: tx_root(&transactions),
      },
      transactions,
      signature: None,
      hashcache: OnceCell::new(),
    };
    block.signature = Some(keypair.sign(&block.hash().to_bytes()));
    block
  }

  /// The root of every chain, number 0 at slot 0.
  pub fn genesis(producer: Pubkey, state_root: Multihash) -> Self {
    Self {
      header: BlockHeader {
        producer,
        slot: 0,
        number: 0,
        parent: Multihash::default(),
        state_root,
        tx_root: tx_root(&[]),
      },
      transactions: vec![],
      signature: None,
      hashcache: OnceCell::new(),
    }
  }

  pub fn hash(&self) -> Multihash {
    *self.hashcache.get_or_init(|| {
      let header = &self.header;
      let mut buffer = Vec::new();
      buffer.extend_from_slice(&header.producer);
      buffer.extend_from_slice(&header.slot.to_le_bytes());
      buffer.extend_from_slice(&header.number.to_le_bytes());
      buffer.extend_from_slice(&header.parent.to_bytes());
      buffer.extend_from_slice(&header.state_root.to_bytes());
      buffer.extend_from_slice(&header.tx_root.to_bytes());
      MultihashCode::Sha3_256.digest(&buffer)
    })
  }

  pub fn parent(&self) -> Multihash {
    self.header.parent
  }

  pub fn number(&self) -> u64 {
    self.header.number
  }

  pub fn slot(&self) -> u64 {
    self.header.slot
  }

  pub fn producer(&self) -> &Pubkey {
    &self.header.producer
  }

  /// Checks that the transactions match the header commitment and
  /// that the block was signed by its declared producer.
  pub fn verify_signature(&self) -> bool {
    if tx_root(&self.transactions) != self.header.tx_root {
      return false;
    }
    match &self.signature {
      Some(signature) => self
        .header
        .producer
        .verify(&self.hash().to_bytes(), signature),
      None => false,
    }
  }

  pub fn encode(&self) -> Result<Vec<u8>, bincode::Error> {
    bincode::serialize(self)
  }

  pub fn decode(bytes: &[u8]) -> Result<Self, bincode::Error> {
    bincode::deserialize(bytes)
  }
}

fn tx_root(transactions: &[Transaction]) -> Multihash {
  let mut buffer = Vec::with_capacity(transactions.len() * 34);
  for tx in transactions {
    buffer.extend_from_slice(&tx.hash().to_bytes());
  }
  MultihashCode::Sha3_256.digest(&buffer)
}

impl PartialEq for Block {
  fn eq(&self, other: &Self) -> bool {
    self.header == other.header
      && self.transactions == other.transactions
      && self.signature == other.signature
  }
}

impl Eq for Block {}

impl Display for Block {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    write!(
      f,
      "[{} #{} @slot {} by {}]",
      self.hash().to_b58(),
      self.header.number,
      self.header.slot,
      self.header.producer
    )
  }
}

impl Debug for Block {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    f.debug_struct("Block")
      .field("hash", &self.hash().to_b58())
      .field("producer", &self.header.producer)
      .field("slot", &self.header.slot)
      .field("number", &self.header.number)
      .field("parent", &self.header.parent.to_b58())
      .field("state_root", &self.header.state_root.to_b58())
      .field("transactions", &self.transactions)
      .field("signature", &self.signature.as_ref().map(|s| s.to_b58()))
      .finish()
  }
}

#[cfg(test)]
mod test {
  use {
    super::Block,
    crate::{
      consensus::transaction::{Action, Transaction},
      test::utils::keypairs,
    },
    chrono::{Duration, Utc},
    multihash::{Code, MultihashDigest},
  };

  #[test]
  fn encode_decode_preserves_identity() {
    let keys = keypairs(2);
    let genesis = Block::genesis(keys[0].public(), Code::Sha3_256.digest(b"s"));
    let tx = Transaction::new(
      vec![Action::new("token", "transfer", vec![1, 2, 3])],
      vec![],
      100,
      1,
      Utc::now() + Duration::seconds(30),
    )
    .publish(&keys[0], vec![]);

    let block = Block::produce(
      &keys[1],
      1,
      1,
      genesis.hash(),
      Code::Sha3_256.digest(b"s1"),
      vec![tx],
    );
    assert!(block.verify_signature());

    let decoded = Block::decode(&block.encode().unwrap()).unwrap();
    assert_eq!(decoded.hash(), block.hash());
    assert_eq!(decoded.signature, block.signature);
    assert_eq!(decoded.transactions, block.transactions);
    assert!(decoded.verify_signature());
  }

  #[test]
  fn tampered_block_fails_verification() {
    let keys = keypairs(2);
    let genesis = Block::genesis(keys[0].public(), Code::Sha3_256.digest(b"s"));
    let block = Block::produce(
      &keys[1],
      1,
      1,
      genesis.hash(),
      Code::Sha3_256.digest(b"s1"),
      vec![],
    );

    let mut forged = Block::decode(&block.encode().unwrap()).unwrap();
    forged.header.producer = keys[0].public();
    assert!(!forged.verify_signature());

    let mut stuffed = Block::decode(&block.encode().unwrap()).unwrap();
    stuffed.transactions.push(
      Transaction::new(vec![], vec![], 1, 1, Utc::now())
        .publish(&keys[1], vec![]),
    );
    assert!(!stuffed.verify_signature());

    // genesis is never signed
    assert!(!genesis.verify_signature());
  }
}

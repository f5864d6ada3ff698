use {
  crate::primitives::{Keypair, Pubkey, ToBase58String},
  chrono::{DateTime, Utc},
  ed25519_dalek::Signature,
  multihash::{Code as MultihashCode, Multihash, MultihashDigest},
  serde::{Deserialize, Serialize},
  thiserror::Error,
};

#[derive(Debug, Error, PartialEq, Eq)]
pub enum TransactionError {
  #[error("Account {0} is not in the signers list of this transaction")]
  NotASigner(Pubkey),

  #[error("Missing signature of signer {0}")]
  MissingSignature(Pubkey),

  #[error("Invalid signature of {0}")]
  InvalidSignature(Pubkey),

  #[error("Transaction was not published")]
  Unpublished,
}

/// A single call into the state machine.
///
/// Actions are opaque to consensus, only the state store interprets
/// the `contract`, `action_name` pair and decodes `data`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Action {
  pub contract: String,
  pub action_name: String,
  pub data: Vec<u8>,
}

impl Action {
  pub fn new(
    contract: impl Into<String>,
    action_name: impl Into<String>,
    data: Vec<u8>,
  ) -> Self {
    Self {
      contract: contract.into(),
      action_name: action_name.into(),
      data,
    }
  }
}

/// Represents a single invocation of the state machine.
///
/// A transaction is signed in two stages. First every account listed in
/// `signers` signs the base hash (everything except signatures), then a
/// publisher signs the publish hash which also covers the signer
/// signatures. Only published transactions are accepted by the pool.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Transaction {
  pub time: DateTime<Utc>,
  pub expiration: DateTime<Utc>,
  pub gas_limit: u64,
  pub gas_price: u64,
  pub actions: Vec<Action>,
  pub signers: Vec<Pubkey>,
  pub signatures: Vec<(Pubkey, Signature)>,
  pub publisher: Option<(Pubkey, Signature)>,
}

impl Transaction {
  pub fn new(
    actions: Vec<Action>,
    signers: Vec<Pubkey>,
    gas_limit: u64,
    gas_price: u64,
    expiration: DateTime<Utc>,
  ) -> Self {
    Self {
      time: Utc::now(),
      expiration,
      gas_limit,
      gas_price,
      actions,
      signers,
      signatures: vec![],
      publisher: None,
    }
  }

  /// Signs the transaction content. Only accounts that are listed
  /// as signers of this transaction may do this.
  pub fn sign_content(
    &self,
    keypair: &Keypair,
  ) -> Result<(Pubkey, Signature), TransactionError> {
    let signer = keypair.public();
    if !self.signers.contains(&signer) {
      return Err(TransactionError::NotASigner(signer));
    }
    Ok((signer, keypair.sign(&self.base_hash().to_bytes())))
  }

  /// Attaches the signers signatures and signs the whole transaction
  /// as its publisher.
  pub fn publish(
    mut self,
    keypair: &Keypair,
    signatures: Vec<(Pubkey, Signature)>,
  ) -> Self {
    self.signatures.extend(signatures);
    let signature = keypair.sign(&self.publish_hash().to_bytes());
    self.publisher = Some((keypair.public(), signature));
    self
  }

  /// Hash of the transaction content without any signatures.
  pub fn base_hash(&self) -> Multihash {
    MultihashCode::Sha3_256.digest(&self.base_bytes())
  }

  /// Hash of the content together with signers signatures, this is
  /// what the publisher signs.
  pub fn publish_hash(&self) -> Multihash {
    let mut buffer = self.base_bytes();
    for (signer, signature) in &self.signatures {
      buffer.extend_from_slice(signer);
      buffer.extend_from_slice(&signature.to_bytes());
    }
    MultihashCode::Sha3_256.digest(&buffer)
  }

  /// The identity of a published transaction.
  pub fn hash(&self) -> Multihash {
    let mut buffer = self.publish_hash().to_bytes();
    if let Some((publisher, signature)) = &self.publisher {
      buffer.extend_from_slice(publisher);
      buffer.extend_from_slice(&signature.to_bytes());
    }
    MultihashCode::Sha3_256.digest(&buffer)
  }

  /// Verifies that every listed signer has signed the transaction
  /// content and that the publisher signature is valid.
  pub fn verify_self(&self) -> Result<(), TransactionError> {
    let base = self.base_hash().to_bytes();
    for (signer, signature) in &self.signatures {
      if !signer.verify(&base, signature) {
        return Err(TransactionError::InvalidSignature(*signer));
      }
    }

    for signer in &self.signers {
      if !self.signatures.iter().any(|(s, _)| s == signer) {
        return Err(TransactionError::MissingSignature(*signer));
      }
    }

    let (publisher, signature) =
      self.publisher.as_ref().ok_or(TransactionError::Unpublished)?;
    if !publisher.verify(&self.publish_hash().to_bytes(), signature) {
      return Err(TransactionError::InvalidSignature(*publisher));
    }
    Ok(())
  }

  pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
    self.expiration <= now
  }

  /// The account that pays for and authorizes this transaction.
  pub fn payer(&self) -> Option<Pubkey> {
    self.publisher.as_ref().map(|(p, _)| *p)
  }

  fn base_bytes(&self) -> Vec<u8> {
    let mut buffer = Vec::new();
    buffer.extend_from_slice(&self.time.timestamp_millis().to_le_bytes());
    buffer
      .extend_from_slice(&self.expiration.timestamp_millis().to_le_bytes());
    buffer.extend_from_slice(&self.gas_limit.to_le_bytes());
    buffer.extend_from_slice(&self.gas_price.to_le_bytes());
    for action in &self.actions {
      buffer.extend_from_slice(action.contract.as_bytes());
      buffer.push(0);
      buffer.extend_from_slice(action.action_name.as_bytes());
      buffer.push(0);
      buffer.extend_from_slice(&(action.data.len() as u64).to_le_bytes());
      buffer.extend_from_slice(&action.data);
    }
    for signer in &self.signers {
      buffer.extend_from_slice(signer);
    }
    buffer
  }
}

impl std::fmt::Debug for Transaction {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    f.debug_struct("Transaction")
      .field("hash", &self.hash().to_b58())
      .field("time", &self.time)
      .field("expiration", &self.expiration)
      .field("actions", &self.actions)
      .field("signers", &self.signers)
      .field("publisher", &self.payer())
      .finish()
  }
}

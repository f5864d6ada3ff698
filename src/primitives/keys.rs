use {
  ed25519_dalek::{PublicKey, SecretKey, Signature, Signer, Verifier},
  serde::{
    de::{self, Visitor},
    Deserialize,
    Deserializer,
    Serialize,
  },
  std::{
    fmt::{Debug, Display, Formatter},
    ops::Deref,
    str::FromStr,
  },
  thiserror::Error,
};

/// Identity of a witness or a transaction signer.
///
/// This is the raw bytes of an ed25519 public key. In human readable
/// form (logs, genesis files, CLI) it is always rendered as a base58
/// string, which is also the witness identifier used by the schedule.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Pubkey([u8; 32]);

impl Pubkey {
  /// Checks that `signature` is a valid ed25519 signature made by the
  /// private key of this identity over `message`.
  pub fn verify(&self, message: &[u8], signature: &Signature) -> bool {
    match PublicKey::from_bytes(&self.0) {
      Ok(key) => key.verify(message, signature).is_ok(),
      Err(_) => false,
    }
  }
}

impl Deref for Pubkey {
  type Target = [u8];

  fn deref(&self) -> &Self::Target {
    &self.0
  }
}

impl Display for Pubkey {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    write!(f, "{}", bs58::encode(self.0).into_string())
  }
}

impl Debug for Pubkey {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    write!(f, "Pubkey({})", bs58::encode(self.0).into_string())
  }
}

impl From<Pubkey> for String {
  fn from(pk: Pubkey) -> Self {
    bs58::encode(pk.0).into_string()
  }
}

impl FromStr for Pubkey {
  type Err = bs58::decode::Error;

  fn from_str(s: &str) -> Result<Self, Self::Err> {
    let mut bytes = [0u8; 32];
    bs58::decode(s).into(&mut bytes)?;
    Ok(Self(bytes))
  }
}

impl From<PublicKey> for Pubkey {
  fn from(p: PublicKey) -> Self {
    Self(*p.as_bytes())
  }
}

/// The signing identity of this node.
///
/// Wraps an ed25519 keypair. The consensus core only ever uses it to
/// sign produced blocks, transactions are signed by their own signers.
pub struct Keypair(ed25519_dalek::Keypair);

impl Keypair {
  pub fn public(&self) -> Pubkey {
    self.0.public.into()
  }

  pub fn secret(&self) -> &SecretKey {
    &self.0.secret
  }

  pub fn sign(&self, message: &[u8]) -> Signature {
    self.0.sign(message)
  }
}

impl Clone for Keypair {
  fn clone(&self) -> Self {
    let secret = SecretKey::from_bytes(self.0.secret.as_bytes())
      .expect("secret key bytes come from a valid secret key");
    let public: PublicKey = (&secret).into();
    Self(ed25519_dalek::Keypair { secret, public })
  }
}

impl std::fmt::Debug for Keypair {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    f.debug_tuple("Keypair").field(&self.public()).finish()
  }
}

impl Display for Keypair {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    write!(
      f,
      "Keypair({})",
      bs58::encode(self.0.public.as_bytes()).into_string()
    )
  }
}

impl From<ed25519_dalek::Keypair> for Keypair {
  fn from(k: ed25519_dalek::Keypair) -> Self {
    Self(k)
  }
}

#[derive(Debug, Error)]
pub enum KeypairError {
  #[error("Failed parsing base58 string: {0:?}")]
  Base58ParseError(bs58::decode::Error),

  #[error("{0}")]
  Ed25519Error(#[from] ed25519_dalek::ed25519::Error),
}

impl TryFrom<&[u8]> for Keypair {
  type Error = KeypairError;

  fn try_from(value: &[u8]) -> Result<Self, Self::Error> {
    let secret = SecretKey::from_bytes(value)?;
    let public: PublicKey = (&secret).into();
    Ok(Self(ed25519_dalek::Keypair { secret, public }))
  }
}

impl FromStr for Keypair {
  type Err = KeypairError;

  fn from_str(value: &str) -> Result<Self, Self::Err> {
    let mut secret = [0u8; 32];
    bs58::decode(value)
      .into(&mut secret)
      .map_err(KeypairError::Base58ParseError)?;
    Keypair::try_from(&secret[..])
  }
}

/// Deserialize a pubkey from its user-friendly base58 representation.
impl<'de> Deserialize<'de> for Pubkey {
  fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
  where
    D: Deserializer<'de>,
  {
    struct Base58Str;

    impl<'de> Visitor<'de> for Base58Str {
      type Value = Pubkey;

      fn expecting(&self, formatter: &mut Formatter) -> std::fmt::Result {
        formatter.write_str("base58 encoded ed25519 public key")
      }

      fn visit_str<E>(self, value: &str) -> Result<Pubkey, E>
      where
        E: de::Error,
      {
        FromStr::from_str(value)
          .map_err(|e| de::Error::custom(format!("{e:?}")))
      }
    }

    deserializer.deserialize_str(Base58Str)
  }
}

impl Serialize for Pubkey {
  fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
  where
    S: serde::Serializer,
  {
    serializer.serialize_str(&bs58::encode(self.0).into_string())
  }
}

#[cfg(test)]
mod test {
  use super::{Keypair, Pubkey};

  #[test]
  fn keypair_parse_sign_verify() {
    let keypair: Keypair = "9XhCqH1LxmziWmBb8WnqzuvKFjX7koBuyzwdcFkL1ym7"
      .parse()
      .unwrap();

    let signature = keypair.sign(b"slot 3");
    assert!(keypair.public().verify(b"slot 3", &signature));
    assert!(!keypair.public().verify(b"slot 4", &signature));

    let cloned = keypair.clone();
    assert_eq!(cloned.public(), keypair.public());
  }

  #[test]
  fn pubkey_serde_as_base58() {
    let keypair: Keypair = "9XhCqH1LxmziWmBb8WnqzuvKFjX7koBuyzwdcFkL1ym7"
      .parse()
      .unwrap();
    let pubkey = keypair.public();

    let json = serde_json::to_string(&pubkey).unwrap();
    assert_eq!(json, format!("\"{pubkey}\""));

    let decoded: Pubkey = serde_json::from_str(&json).unwrap();
    assert_eq!(decoded, pubkey);

    let bytes = bincode::serialize(&pubkey).unwrap();
    let decoded: Pubkey = bincode::deserialize(&bytes).unwrap();
    assert_eq!(decoded, pubkey);
  }
}

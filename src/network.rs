use {
  multihash::Multihash,
  serde::{Deserialize, Serialize},
  std::sync::{Arc, Mutex},
  tokio::sync::mpsc::{unbounded_channel, UnboundedReceiver, UnboundedSender},
  tracing::trace,
};

/// Messages exchanged between consensus nodes.
///
/// Blocks travel as opaque encoded bytes, they are decoded and
/// verified only by the receiving consensus engine.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Message {
  /// A block that was just produced.
  NewBlock(Vec<u8>),

  /// A block sent in response to a [`Message::BlockRequest`].
  SyncBlock(Vec<u8>),

  /// Asks peers for a block with a given hash. Sent when
  /// orphans are waiting for a parent for too long.
  BlockRequest(Multihash),
}

/// Outbound side of the peer to peer layer.
pub trait Network: Send + Sync + 'static {
  /// Sends a message to all connected peers. Delivery is best effort.
  fn broadcast(&self, message: Message);
}

type Peers = Arc<Mutex<Vec<(usize, UnboundedSender<Message>)>>>;

/// An in-process network hub. Every peer that joins receives
/// all messages broadcasted by other peers.
#[derive(Debug, Clone, Default)]
pub struct MemoryNetwork {
  peers: Peers,
}

impl MemoryNetwork {
  pub fn new() -> Self {
    Self::default()
  }

  /// Connects a new peer to the hub. Returns the handle used to
  /// broadcast and the stream of messages sent by other peers.
  pub fn join(&self) -> (NetworkHandle, UnboundedReceiver<Message>) {
    let (tx, rx) = unbounded_channel();
    let mut peers = self.peers.lock().unwrap_or_else(|e| e.into_inner());
    let id = peers.len();
    peers.push((id, tx));
    (
      NetworkHandle {
        id,
        peers: self.peers.clone(),
      },
      rx,
    )
  }
}

#[derive(Debug, Clone)]
pub struct NetworkHandle {
  id: usize,
  peers: Peers,
}

impl Network for NetworkHandle {
  fn broadcast(&self, message: Message) {
    let mut peers = self.peers.lock().unwrap_or_else(|e| e.into_inner());
    // peers that dropped their receiver are disconnected
    peers.retain(|(id, peer)| {
      *id == self.id || peer.send(message.clone()).is_ok()
    });
    trace!("peer {} broadcasted to {} peer(s)", self.id, peers.len() - 1);
  }
}

#[cfg(test)]
mod test {
  use {
    super::{MemoryNetwork, Message, Network},
    multihash::{Code, MultihashDigest},
  };

  #[test]
  fn broadcast_reaches_other_peers() {
    let hub = MemoryNetwork::new();
    let (a, mut a_rx) = hub.join();
    let (_b, mut b_rx) = hub.join();
    let (_c, c_rx) = hub.join();

    drop(c_rx);
    a.broadcast(Message::NewBlock(vec![1, 2, 3]));

    assert_eq!(b_rx.try_recv().unwrap(), Message::NewBlock(vec![1, 2, 3]));
    assert!(a_rx.try_recv().is_err());

    let hash = Code::Sha3_256.digest(b"block");
    a.broadcast(Message::BlockRequest(hash));
    assert_eq!(b_rx.try_recv().unwrap(), Message::BlockRequest(hash));
  }
}

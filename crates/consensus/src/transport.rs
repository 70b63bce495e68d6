//! Peer transport contract and wire message shapes
//!
//! Delivery is at-least-once: receivers discard already-seen proposals and
//! containers instead of relying on exactly-once semantics. Messages are
//! borsh-encoded for bit-stable framing.

use async_trait::async_trait;
use borsh::{BorshDeserialize, BorshSerialize};
use ledger_runtime::{Container, CrossNetworkBatch, Hash};

/// A proposal announcement carrying the full candidate container
#[derive(Debug, Clone, PartialEq, Eq, BorshSerialize, BorshDeserialize)]
pub struct ProposalNotice {
    pub container: Container,
}

/// Everything that travels between peers
#[derive(Debug, Clone, PartialEq, Eq, BorshSerialize, BorshDeserialize)]
pub enum GossipMessage {
    /// A container was committed
    NewContainer { container: Container },
    /// A candidate container is up for election
    Proposal { proposal: ProposalNotice },
    /// An individual entry reached finality
    EntryConfirmed { hash: Hash },
    /// Entries addressed to another ledger, with their finality proof
    CrossNetworkBatch { batch: CrossNetworkBatch },
}

impl GossipMessage {
    /// Serialize for network transmission
    pub fn to_bytes(&self) -> Vec<u8> {
        borsh::to_vec(self).expect("GossipMessage serialization should not fail")
    }

    /// Deserialize from network
    pub fn from_bytes(data: &[u8]) -> Result<Self, borsh::io::Error> {
        borsh::from_slice(data)
    }
}

/// Callback invoked with the raw reply to a cross-network request
pub type ResponseCallback = Box<dyn FnOnce(Vec<u8>) + Send>;

/// Outbound side of the peer network
#[async_trait]
pub trait PeerTransport: Send + Sync {
    /// Fan a message out to every connected peer
    async fn broadcast(&self, message: GossipMessage) -> anyhow::Result<()>;

    /// Send to a single peer
    async fn send_to_peer(&self, peer: &str, message: GossipMessage) -> anyhow::Result<()>;

    /// Deliver to another ledger's endpoint, optionally waiting for one reply
    async fn send_to_network(
        &self,
        network: &str,
        message: GossipMessage,
        on_response: Option<ResponseCallback>,
    ) -> anyhow::Result<()>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use ed25519_dalek::SigningKey;
    use ledger_runtime::PendingEntry;

    #[test]
    fn wire_round_trip() {
        let key = SigningKey::from_bytes(&[7; 32]);
        let entry = PendingEntry::create_at(&key, "payment", 3, 0, None, None, vec![1], 1000);
        let message = GossipMessage::EntryConfirmed { hash: entry.hash };

        let bytes = message.to_bytes();
        let decoded = GossipMessage::from_bytes(&bytes).unwrap();
        assert_eq!(decoded, message);
    }
}

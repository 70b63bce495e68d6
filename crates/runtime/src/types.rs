//! Core types for the ledger: hashes, accounts, entries, and containers

use borsh::{BorshDeserialize, BorshSerialize};
use ed25519_dalek::{Signer, SigningKey, Verifier, VerifyingKey};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// A 32-byte blake3 content hash
#[derive(
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    PartialOrd,
    Ord,
    Default,
    BorshSerialize,
    BorshDeserialize,
    Serialize,
    Deserialize,
)]
pub struct Hash(pub [u8; 32]);

impl Hash {
    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    /// Hash arbitrary bytes
    pub fn digest(data: &[u8]) -> Self {
        Self(*blake3::hash(data).as_bytes())
    }

    pub fn to_bs58(&self) -> String {
        bs58::encode(self.0).into_string()
    }

    pub fn from_bs58(s: &str) -> Option<Self> {
        let bytes = bs58::decode(s).into_vec().ok()?;
        let arr: [u8; 32] = bytes.try_into().ok()?;
        Some(Self(arr))
    }
}

impl fmt::Display for Hash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_bs58())
    }
}

impl fmt::Debug for Hash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = self.to_bs58();
        write!(f, "Hash({})", &s[..8.min(s.len())])
    }
}

/// An account identity: the 32-byte ed25519 public key
#[derive(
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    PartialOrd,
    Ord,
    Default,
    BorshSerialize,
    BorshDeserialize,
    Serialize,
    Deserialize,
)]
pub struct AccountId(pub [u8; 32]);

impl AccountId {
    /// The account id behind a signing key
    pub fn of(key: &SigningKey) -> Self {
        Self(key.verifying_key().to_bytes())
    }

    pub fn to_bs58(&self) -> String {
        bs58::encode(self.0).into_string()
    }

    pub fn from_bs58(s: &str) -> Option<Self> {
        let bytes = bs58::decode(s).into_vec().ok()?;
        let arr: [u8; 32] = bytes.try_into().ok()?;
        Some(Self(arr))
    }
}

impl fmt::Display for AccountId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_bs58())
    }
}

impl fmt::Debug for AccountId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = self.to_bs58();
        write!(f, "AccountId({})", &s[..8.min(s.len())])
    }
}

/// Sign a hash with a node/account key, returning raw signature bytes
pub fn sign_hash(key: &SigningKey, hash: &Hash) -> Vec<u8> {
    key.sign(hash.as_bytes()).to_bytes().to_vec()
}

/// Verify a raw signature over a hash against a claimed signer id
pub fn verify_hash(signer: &AccountId, hash: &Hash, signature: &[u8]) -> bool {
    let Ok(key) = VerifyingKey::from_bytes(&signer.0) else {
        return false;
    };
    let Ok(sig) = ed25519_dalek::Signature::try_from(signature) else {
        return false;
    };
    key.verify(hash.as_bytes(), &sig).is_ok()
}

/// A signed transaction awaiting inclusion in a container
#[derive(Clone, PartialEq, Eq, Debug, BorshSerialize, BorshDeserialize, Serialize, Deserialize)]
pub struct PendingEntry {
    /// Content hash over every field below except `signature`
    pub hash: Hash,
    /// Processor type tag, e.g. "payment"
    pub entry_type: String,
    /// Originating account
    pub sender: AccountId,
    /// Declared fee, drives container ordering
    pub fee: u64,
    /// Creation time (unix millis)
    pub timestamp_ms: u64,
    /// Destination ledger, if this entry is addressed to another network
    pub target_network: Option<String>,
    /// Destination account on the target ledger
    pub target_account: Option<AccountId>,
    /// Per-account sequence number
    pub nonce: u64,
    /// Opaque payload interpreted by the entry processor
    pub payload: Vec<u8>,
    /// Sender's ed25519 signature over `hash`
    pub signature: Vec<u8>,
}

impl PendingEntry {
    /// Build and sign a new entry, stamping the current time
    #[allow(clippy::too_many_arguments)]
    pub fn create(
        key: &SigningKey,
        entry_type: &str,
        fee: u64,
        nonce: u64,
        target_network: Option<String>,
        target_account: Option<AccountId>,
        payload: Vec<u8>,
    ) -> Self {
        Self::create_at(
            key,
            entry_type,
            fee,
            nonce,
            target_network,
            target_account,
            payload,
            crate::now_ms(),
        )
    }

    /// Build and sign a new entry with an explicit timestamp
    #[allow(clippy::too_many_arguments)]
    pub fn create_at(
        key: &SigningKey,
        entry_type: &str,
        fee: u64,
        nonce: u64,
        target_network: Option<String>,
        target_account: Option<AccountId>,
        payload: Vec<u8>,
        timestamp_ms: u64,
    ) -> Self {
        let mut entry = Self {
            hash: Hash::default(),
            entry_type: entry_type.to_string(),
            sender: AccountId::of(key),
            fee,
            timestamp_ms,
            target_network,
            target_account,
            nonce,
            payload,
            signature: Vec::new(),
        };
        entry.hash = entry.compute_hash();
        entry.signature = sign_hash(key, &entry.hash);
        entry
    }

    /// Compute the content hash over all signed fields
    pub fn compute_hash(&self) -> Hash {
        let mut hasher = blake3::Hasher::new();
        hasher.update(self.entry_type.as_bytes());
        hasher.update(&self.sender.0);
        hasher.update(&self.fee.to_le_bytes());
        hasher.update(&self.timestamp_ms.to_le_bytes());
        match &self.target_network {
            Some(network) => {
                hasher.update(&[1]);
                hasher.update(network.as_bytes());
            }
            None => {
                hasher.update(&[0]);
            }
        }
        match &self.target_account {
            Some(account) => {
                hasher.update(&[1]);
                hasher.update(&account.0);
            }
            None => {
                hasher.update(&[0]);
            }
        }
        hasher.update(&self.nonce.to_le_bytes());
        hasher.update(&self.payload);
        Hash(*hasher.finalize().as_bytes())
    }

    /// Check the stored hash and the sender signature over it
    pub fn verify(&self) -> bool {
        self.hash == self.compute_hash() && verify_hash(&self.sender, &self.hash, &self.signature)
    }

    /// Whether this entry is addressed to some other ledger
    pub fn is_cross_network(&self) -> bool {
        self.target_network.is_some()
    }
}

/// An ordered, hash-chained batch of entries - the unit of chain progress
#[derive(Clone, PartialEq, Eq, Debug, BorshSerialize, BorshDeserialize, Serialize, Deserialize)]
pub struct Container {
    /// Content hash over (previous_hash, entry hashes, timestamp, creator)
    pub hash: Hash,
    /// Hash of the chain head this container extends; None only for genesis
    pub previous_hash: Option<Hash>,
    /// Validator that built this container
    pub creator: AccountId,
    /// Creation time (unix millis)
    pub timestamp_ms: u64,
    /// Full entries, strictly non-increasing by fee
    pub entries: Vec<PendingEntry>,
    /// Validator signatures over `hash`
    pub signatures: BTreeMap<AccountId, Vec<u8>>,
}

impl Container {
    /// Compute the canonical container hash
    pub fn compute_hash(&self) -> Hash {
        let mut hasher = blake3::Hasher::new();
        match &self.previous_hash {
            Some(previous) => {
                hasher.update(&[1]);
                hasher.update(&previous.0);
            }
            None => {
                hasher.update(&[0]);
            }
        }
        for entry in &self.entries {
            hasher.update(&entry.hash.0);
        }
        hasher.update(&self.timestamp_ms.to_le_bytes());
        hasher.update(&self.creator.0);
        Hash(*hasher.finalize().as_bytes())
    }

    /// Add a signature over this container's hash
    pub fn sign(&mut self, key: &SigningKey) {
        let signer = AccountId::of(key);
        let signature = sign_hash(key, &self.hash);
        self.signatures.insert(signer, signature);
    }

    /// Ordered hashes of the contained entries
    pub fn entry_hashes(&self) -> Vec<Hash> {
        self.entries.iter().map(|e| e.hash).collect()
    }

    /// Ordered hashes of entries addressed to other ledgers
    pub fn cross_network_hashes(&self) -> Vec<Hash> {
        self.entries
            .iter()
            .filter(|e| e.is_cross_network())
            .map(|e| e.hash)
            .collect()
    }
}

/// Finality proof attached to a cross-network batch
#[derive(Clone, PartialEq, Eq, Debug, BorshSerialize, BorshDeserialize, Serialize, Deserialize)]
pub struct BatchValidation {
    /// Ordered hashes of every cross-network entry in the origin container
    pub hash_list: Vec<Hash>,
    /// blake3 over "<origin container hash>:<comma-joined hash list>" (bs58)
    pub base_hash: Hash,
    /// Source-network validator signatures over `base_hash`
    pub signatures: BTreeMap<AccountId, Vec<u8>>,
    /// Hash of the committed container the entries came from
    pub origin_container_hash: Hash,
    /// The origin container's own signer map
    pub container_signatures: BTreeMap<AccountId, Vec<u8>>,
}

/// A signed, hash-bound bundle of entries one ledger delivers to another
#[derive(Clone, PartialEq, Eq, Debug, BorshSerialize, BorshDeserialize, Serialize, Deserialize)]
pub struct CrossNetworkBatch {
    /// Ledger the entries were committed on
    pub source_network: String,
    /// Ledger the entries are addressed to
    pub target_network: String,
    /// Entries addressed to `target_network`, in origin container order
    pub entries: Vec<PendingEntry>,
    /// Finality proof for the batch
    pub validation: BatchValidation,
}

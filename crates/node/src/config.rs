//! Node configuration

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;

/// One line of the genesis stake table
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GenesisValidator {
    /// bs58 account id
    pub account: String,
    pub stake: u64,
}

/// One pre-funded genesis account
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GenesisAccount {
    /// bs58 account id
    pub account: String,
    pub balance: u64,
}

/// File-backed node configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeConfig {
    /// This ledger's network id
    pub network: String,
    /// Initial validator stake table, written once on an empty store
    #[serde(default)]
    pub genesis_validators: Vec<GenesisValidator>,
    /// Initial account balances, written once on an empty store
    #[serde(default)]
    pub genesis_accounts: Vec<GenesisAccount>,
    /// Gossip endpoints of other ledgers, keyed by network id
    #[serde(default)]
    pub networks: HashMap<String, String>,
    /// Owner accounts (bs58) backing networks without a known stake table
    #[serde(default)]
    pub network_owners: HashMap<String, String>,
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            network: "main".to_string(),
            genesis_validators: Vec::new(),
            genesis_accounts: Vec::new(),
            networks: HashMap::new(),
            network_owners: HashMap::new(),
        }
    }
}

impl NodeConfig {
    /// Load from a JSON file
    pub fn load<P: AsRef<Path>>(path: P) -> anyhow::Result<Self> {
        let data = std::fs::read_to_string(&path)?;
        let config = serde_json::from_str(&data)?;
        Ok(config)
    }
}

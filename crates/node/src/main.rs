//! Ledger node
//!
//! Wires one ledger instance together: persistent store, entry-processor
//! registry, pending pool, container engine, validator schedule, proposal
//! pipeline, gossip, and the cross-network bridge. State is persisted to
//! disk and survives restarts.

use anyhow::Result;
use clap::Parser;
use ed25519_dalek::SigningKey;
use ledger_consensus::{
    spawn_slot_timer, GossipClient, GossipHub, GossipMessage, PeerTransport, ProposalManager,
    ProposalManagerConfig, ProposalManagerHandle, ScheduleHandle, ValidatorSelector,
    DELAYED_TICK_MS,
};
use ledger_runtime::{
    AccountId, Account, ContainerEngine, LedgerStore, PendingEntry, PendingPool,
    ProcessorRegistry,
};
use network_bridge::{CrossNetworkBridge, InboundDispatcher};
use payment_processor::{PaymentInstruction, PaymentProcessor};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

mod config;
mod elections;

use config::NodeConfig;
use elections::LocalElectionDriver;

/// Stake-weighted multi-ledger node
#[derive(Parser, Debug)]
#[command(name = "ledger-node")]
#[command(about = "Consensus node for one stake-weighted ledger", long_about = None)]
struct Args {
    /// Network id of this ledger (overridden by --config)
    #[arg(long, default_value = "main")]
    network: String,

    /// Gossip listen address
    #[arg(long, default_value = "127.0.0.1:9444")]
    listen: String,

    /// Peer gossip addresses to connect to
    #[arg(long)]
    peer: Vec<String>,

    /// Optional JSON config file (genesis table, known networks)
    #[arg(long)]
    config: Option<PathBuf>,

    /// bs58-encoded 32-byte signing key seed (generated when absent)
    #[arg(long)]
    key_seed: Option<String>,

    /// Validator slot duration in milliseconds
    #[arg(long, default_value = "10000")]
    slot_duration_ms: u64,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info")]
    log_level: String,

    /// Data directory for persistent state
    #[arg(long, default_value = "./data")]
    data_dir: PathBuf,
}

fn load_key(seed: &Option<String>) -> Result<SigningKey> {
    match seed {
        Some(seed) => {
            let bytes = bs58::decode(seed).into_vec()?;
            let seed: [u8; 32] = bytes
                .as_slice()
                .try_into()
                .map_err(|_| anyhow::anyhow!("key seed must decode to 32 bytes"))?;
            Ok(SigningKey::from_bytes(&seed))
        }
        None => Ok(SigningKey::generate(&mut rand::rngs::OsRng)),
    }
}

/// Write the configured stake table, balances, and network owners once,
/// before the first container exists
fn seed_genesis(store: &LedgerStore, config: &NodeConfig) -> Result<()> {
    if store.container_count() == 0 && store.validator_weights().is_empty() {
        for validator in &config.genesis_validators {
            let id = AccountId::from_bs58(&validator.account)
                .ok_or_else(|| anyhow::anyhow!("bad genesis account {}", validator.account))?;
            store.set_validator_weight(&config.network, &id, validator.stake)?;
        }
        for account in &config.genesis_accounts {
            let id = AccountId::from_bs58(&account.account)
                .ok_or_else(|| anyhow::anyhow!("bad genesis account {}", account.account))?;
            store.put_account(
                &id,
                &Account {
                    balance: account.balance,
                    nonce: 0,
                },
            )?;
        }
        if !config.genesis_validators.is_empty() {
            tracing::info!(
                validators = config.genesis_validators.len(),
                accounts = config.genesis_accounts.len(),
                "Seeded genesis state"
            );
        }
    }
    for (network, owner) in &config.network_owners {
        let id = AccountId::from_bs58(owner)
            .ok_or_else(|| anyhow::anyhow!("bad owner account for {network}"))?;
        store.set_network_owner(network, &id)?;
    }
    Ok(())
}

/// Route decoded gossip into the right component
async fn route_inbound(
    mut inbound: mpsc::Receiver<GossipMessage>,
    manager: ProposalManagerHandle,
    engine: Arc<ContainerEngine>,
    pool: Arc<PendingPool>,
    dispatcher: Arc<InboundDispatcher>,
) {
    while let Some(message) = inbound.recv().await {
        match message {
            GossipMessage::Proposal { proposal } => {
                manager.submit_remote_proposal(proposal).await;
            }
            GossipMessage::NewContainer { container } => {
                let already = engine
                    .store()
                    .get_container(&container.hash)
                    .ok()
                    .flatten()
                    .is_some();
                if already {
                    tracing::debug!(container = %container.hash, "Already-seen container ignored");
                    continue;
                }
                match engine.add_container(&container) {
                    ledger_runtime::CommitOutcome::Committed { hash, entries } => {
                        pool.remove_confirmed(&container.entry_hashes());
                        tracing::info!(container = %hash, entries, "Adopted gossiped container");
                    }
                    outcome => {
                        tracing::debug!(container = %container.hash, ?outcome, "Gossiped container not adopted");
                    }
                }
            }
            GossipMessage::EntryConfirmed { hash } => {
                pool.remove_confirmed(&[hash]);
            }
            GossipMessage::CrossNetworkBatch { batch } => {
                dispatcher.handle_batch(&batch);
            }
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&args.log_level));
    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = match &args.config {
        Some(path) => NodeConfig::load(path)?,
        None => NodeConfig {
            network: args.network.clone(),
            ..Default::default()
        },
    };

    tracing::info!("Starting ledger node");
    tracing::info!("  Network: {}", config.network);
    tracing::info!("  Gossip: {}", args.listen);
    tracing::info!("  Data directory: {:?}", args.data_dir);
    tracing::info!("  Slot duration: {}ms", args.slot_duration_ms);

    std::fs::create_dir_all(&args.data_dir)?;
    let store = Arc::new(LedgerStore::open(&args.data_dir, &config.network)?);
    seed_genesis(&store, &config)?;

    let key = load_key(&args.key_seed)?;
    let node_id = AccountId::of(&key);
    tracing::info!("  Identity: {}", node_id);

    let mut registry = ProcessorRegistry::new();
    registry
        .register(Arc::new(PaymentProcessor::new()))
        .map_err(|e| anyhow::anyhow!("{e}"))?;
    let registry = Arc::new(registry);

    let pool = Arc::new(PendingPool::new());
    let engine = Arc::new(ContainerEngine::new(
        store.clone(),
        registry.clone(),
        key.clone(),
    ));
    let selector = Arc::new(ValidatorSelector::with_slot_duration(
        store.clone(),
        args.slot_duration_ms,
    ));

    // Gossip hub plus outbound connections to configured peers
    let (inbound_tx, inbound_rx) = mpsc::channel(1024);
    let hub = Arc::new(GossipHub::new(inbound_tx.clone()));
    for (network, endpoint) in &config.networks {
        hub.register_network(network, endpoint);
    }
    hub.start(&args.listen).await?;

    let mut peers = Vec::new();
    for peer in &args.peer {
        match GossipClient::connect(peer, inbound_tx.clone()).await {
            Ok(client) => peers.push(client),
            Err(e) => tracing::warn!("Could not connect to peer {}: {:#}", peer, e),
        }
    }

    // Cross-network bridge and inbound dispatch; inbound payments are
    // re-issued locally from this node's account acting as bridge escrow
    let bridge = Arc::new(CrossNetworkBridge::new(store.clone(), key.clone()));
    let mut dispatcher = InboundDispatcher::new(bridge.clone(), pool.clone());
    let escrow_key = key.clone();
    dispatcher
        .register_constructor(
            payment_processor::ENTRY_TYPE,
            Arc::new(move |entry: &PendingEntry, nonce| {
                let instruction = PaymentInstruction::decode(&entry.payload).ok_or_else(|| {
                    network_bridge::BridgeError::MalformedEntry("payment instruction".to_string())
                })?;
                let target = entry
                    .target_account
                    .ok_or(network_bridge::BridgeError::MissingTargetAccount)?;
                let local = PaymentInstruction {
                    to: target,
                    amount: instruction.amount,
                };
                Ok(PendingEntry::create(
                    &escrow_key,
                    payment_processor::ENTRY_TYPE,
                    0,
                    nonce,
                    None,
                    Some(target),
                    local.encode(),
                ))
            }),
        )
        .map_err(|e| anyhow::anyhow!("{e}"))?;
    let dispatcher = Arc::new(dispatcher);

    let elections = Arc::new(LocalElectionDriver::new(key.clone()));

    // Committed containers fan their cross-network entries out per target
    let commit_bridge = bridge.clone();
    let commit_transport: Arc<GossipHub> = hub.clone();
    let manager = ProposalManager::spawn(ProposalManagerConfig {
        network: config.network.clone(),
        engine: engine.clone(),
        pool: pool.clone(),
        selector: selector.clone(),
        elections,
        transport: hub.clone(),
        on_commit: vec![Arc::new(move |container| {
            for batch in commit_bridge.build_all_batches(container) {
                let transport = commit_transport.clone();
                let target = batch.target_network.clone();
                tokio::spawn(async move {
                    if let Err(e) = transport
                        .send_to_network(
                            &target,
                            GossipMessage::CrossNetworkBatch { batch },
                            None,
                        )
                        .await
                    {
                        tracing::warn!(network = %target, "Batch delivery failed: {:#}", e);
                    }
                });
            }
        })],
    });

    tokio::spawn(route_inbound(
        inbound_rx,
        manager.clone(),
        engine.clone(),
        pool.clone(),
        dispatcher,
    ));

    // Background loops: slot schedule, pool sweep, early-proposal sweep,
    // deferred-work tick
    let propose_on_switch = manager.clone();
    let slot_timer = spawn_slot_timer(
        selector,
        vec![Arc::new(move |_elected| propose_on_switch.trigger_propose())],
    );
    let sweep_pool = pool.clone();
    let pool_sweep = ScheduleHandle::every("pool-sweep", Duration::from_secs(60), move || {
        let swept = sweep_pool.sweep_expired();
        if swept > 0 {
            tracing::info!(swept, "Expired pending entries evicted");
        }
    });
    let early_manager = manager.clone();
    let early_sweep = ScheduleHandle::every("early-proposal-sweep", Duration::from_secs(30), {
        move || early_manager.trigger_early_sweep()
    });
    let tick_manager = manager.clone();
    let tick = ScheduleHandle::every(
        "deferred-tick",
        Duration::from_millis(DELAYED_TICK_MS),
        move || tick_manager.trigger_tick(),
    );

    // Kick the pipeline in case entries are already queued
    manager.notify_entries_added().await;

    tracing::info!("Node running. Press Ctrl+C to stop.");
    tokio::signal::ctrl_c().await?;
    tracing::info!("Shutting down...");

    slot_timer.cancel();
    pool_sweep.cancel();
    early_sweep.cancel();
    tick.cancel();
    store.flush()?;
    drop(peers);

    tracing::info!("Node stopped");
    Ok(())
}

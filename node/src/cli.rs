// fleetd command line: node, keygen, client, print, cleanup, analyze.

use anyhow::{anyhow, bail, Context, Result};
use clap::{Parser, Subcommand};
use fleet_chain::{ChainEngine, RedbRepository};
use fleet_keystore::Key;
use fleet_network::{client, serve, Node};
use rand::RngCore;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;
use tracing::{info, warn};

use crate::analysis;
use crate::config::NodeConfig;

#[derive(Parser, Debug)]
#[command(
    name = "fleetd",
    version,
    about = "Permissioned per-device blockchain miner for IoT telemetry fleets"
)]
pub struct Cli {
    /// Directory holding the chain database
    #[arg(long, global = true, default_value = "tmp/database")]
    pub data_dir: PathBuf,

    /// Path of the miner key bundle
    #[arg(long, global = true, default_value = fleet_keystore::DEFAULT_KEY_PATH)]
    pub key_file: PathBuf,

    /// Proof-of-work difficulty; every peer in the fleet must use the same value
    #[arg(long, global = true, default_value_t = fleet_core::DIFFICULTY)]
    pub difficulty: i64,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Run a miner node
    Node {
        /// Listen address, host:port
        #[arg(long)]
        addr: String,
        /// Seed peer to announce to and sync from
        #[arg(long)]
        connect: Option<String>,
    },
    /// Generate a key bundle, optionally enrolling with a miner for a token
    Keygen {
        #[arg(long, short = 'u')]
        username: Option<String>,
        #[arg(long, short = 'p')]
        password: Option<String>,
        /// Miner to enroll with
        #[arg(long, short = 'f')]
        from: Option<String>,
    },
    /// Sync the local chain from a miner, or submit telemetry blocks
    Client {
        /// Miner address to discover the mesh through
        #[arg(long, short = 'f')]
        from: String,
        /// Device token (hex); defaults to the token in the key file
        #[arg(long)]
        token: Option<String>,
        /// Sync the local chain
        #[arg(long)]
        sync: bool,
        /// Generate and submit blocks
        #[arg(long, short = 'b')]
        block: bool,
        /// Comma separated transaction payloads
        #[arg(long, short = 't', value_delimiter = ',')]
        transactions: Vec<String>,
        /// Number of blocks to submit
        #[arg(long, default_value_t = 1)]
        count: u32,
        /// Seal payloads with this passphrase before submission
        #[arg(long)]
        passphrase: Option<String>,
    },
    /// Print the chain for a token
    Print {
        /// Device token (hex); defaults to the token in the key file
        #[arg(long)]
        token: Option<String>,
        /// Unseal payloads with this passphrase before printing
        #[arg(long)]
        passphrase: Option<String>,
    },
    /// Remove the chain database
    Cleanup,
    /// Benchmark block generation latency against a miner
    Analyze {
        /// Miner address
        #[arg(long, short = 'f')]
        from: String,
        /// Number of blocks to generate
        #[arg(long, default_value_t = 1)]
        count: u32,
        /// Payload size in kilobytes
        #[arg(long, default_value_t = 1)]
        size: usize,
    },
}

pub async fn run(cli: Cli) -> Result<()> {
    let config = NodeConfig {
        data_dir: cli.data_dir,
        key_file: cli.key_file,
        difficulty: cli.difficulty,
    };
    config.validate().map_err(|err| anyhow!(err))?;

    match cli.command {
        Command::Node { addr, connect } => run_node(&config, addr, connect).await,
        Command::Keygen {
            username,
            password,
            from,
        } => run_keygen(&config, username, password, from).await,
        Command::Client {
            from,
            token,
            sync,
            block,
            transactions,
            count,
            passphrase,
        } => run_client(&config, from, token, sync, block, transactions, count, passphrase).await,
        Command::Print { token, passphrase } => run_print(&config, token, passphrase),
        Command::Cleanup => run_cleanup(&config),
        Command::Analyze { from, count, size } => run_analyze(&config, from, count, size).await,
    }
}

fn open_engine(config: &NodeConfig) -> Result<Arc<ChainEngine>> {
    let repo = RedbRepository::open(config.db_path())
        .with_context(|| format!("cannot initialize chain database {}", config.db_path().display()))?;
    Ok(Arc::new(ChainEngine::new(Arc::new(repo), config.difficulty)))
}

fn resolve_token(config: &NodeConfig, flag: Option<String>) -> Result<Vec<u8>> {
    match flag {
        Some(hex_token) => hex::decode(hex_token.trim()).context("token must be hex"),
        None => {
            let key = Key::load(&config.key_file).context("unable to load keys")?;
            key.token
                .ok_or_else(|| anyhow!("key file has no token; pass --token or enroll with keygen"))
        }
    }
}

async fn run_node(config: &NodeConfig, addr: String, connect: Option<String>) -> Result<()> {
    let engine = open_engine(config)?;

    // A missing key file gets a fresh identity; an unreadable one is fatal.
    let key = if config.key_file.exists() {
        Key::load(&config.key_file).context("unable to load keys")?
    } else {
        let key = Key::generate();
        key.save(&config.key_file)?;
        info!(path = %config.key_file.display(), "generated fresh miner key");
        key
    };

    let node = Node::new(addr, Arc::clone(&engine), key);
    let (handle, bound) = serve(Arc::clone(&node)).await?;

    match connect {
        None => info!("server starting as stand alone"),
        Some(seed) => {
            client::send_address(&node, &seed).await;
            client::discover_and_connect(&node).await;

            match client::find_best_height_node(&node).await {
                None => warn!("no node found with best height"),
                Some(best) => {
                    engine.clear()?;
                    info!("database cleaned up for sync");
                    client::download_full_chain(&node, &best).await?;
                }
            }
        }
    }

    for peer in node.peers.connected_addrs().await {
        info!(peer = %peer, "connected node");
    }
    info!(addr = %bound, "node booted successfully, ready for mining");

    handle.stopped().await;
    Ok(())
}

async fn run_keygen(
    config: &NodeConfig,
    username: Option<String>,
    password: Option<String>,
    from: Option<String>,
) -> Result<()> {
    let mut key = Key::generate();

    match (username, password, from) {
        (None, None, None) => {
            key.save(&config.key_file)?;
            info!("key generation successful");
        }
        (Some(username), Some(password), Some(from)) => {
            let token = client::get_token(&from, &username, &password)
                .await
                .map_err(|err| anyhow!("enrollment failed: {err}"))?;
            key.token = Some(token);
            key.save(&config.key_file)?;
            println!("{key}");
            info!("key generation successful");
        }
        _ => bail!("keygen takes either no enrollment flags or all of --username, --password and --from"),
    }
    Ok(())
}

#[allow(clippy::too_many_arguments)]
async fn run_client(
    config: &NodeConfig,
    from: String,
    token: Option<String>,
    sync: bool,
    block: bool,
    transactions: Vec<String>,
    count: u32,
    passphrase: Option<String>,
) -> Result<()> {
    if count == 0 {
        bail!("block count must be a positive number");
    }
    let token = resolve_token(config, token)?;
    let engine = open_engine(config)?;
    let key = Key::load(&config.key_file).context("unable to load keys")?;
    let node = Node::new(String::new(), Arc::clone(&engine), key);

    client::discover(&node, &from).await;
    if node.peers.connected_count().await == 0 {
        bail!("unable to discover at least one miner node");
    }

    if sync {
        match client::find_best_height_node_by_token(&node, &token).await {
            None => info!("no best node found to sync chain"),
            Some(best) => {
                info!(peer = %best, "best height node");
                client::sync_chain(&node, &best, &token).await?;
                info!("chain synchronization successful");
            }
        }
    } else if block {
        if transactions.is_empty() {
            bail!("no transaction data provided");
        }
        for i in 1..=count {
            info!(block = i, "generating block");
            let mut payloads: Vec<Vec<u8>> = transactions
                .iter()
                .map(|data| data.clone().into_bytes())
                .collect();
            if let Some(pass) = &passphrase {
                payloads = payloads
                    .iter()
                    .map(|payload| fleet_core::seal::seal(pass.as_bytes(), payload))
                    .collect::<std::result::Result<_, _>>()?;
            }
            client::create_block(&node, &token, payloads).await?;
            info!("block mined successfully");
        }
    } else {
        bail!("client needs --sync or --block");
    }
    Ok(())
}

fn run_print(config: &NodeConfig, token: Option<String>, passphrase: Option<String>) -> Result<()> {
    let token = resolve_token(config, token)?;
    let engine = open_engine(config)?;

    let chain = engine.chain(&token)?;
    if chain.is_empty() {
        bail!("token is invalid");
    }

    for mut block in chain {
        if let Some(pass) = &passphrase {
            block.unseal_transactions(pass.as_bytes())?;
        }
        println!("{block}");
        for tx in &block.transactions {
            println!("   data: {}", String::from_utf8_lossy(&tx.data));
        }
    }
    Ok(())
}

fn run_cleanup(config: &NodeConfig) -> Result<()> {
    match std::fs::remove_file(config.db_path()) {
        Ok(()) => info!("database cleaned up"),
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
            info!("database already clean")
        }
        Err(err) => {
            return Err(err).with_context(|| format!("removing {}", config.db_path().display()))
        }
    }
    Ok(())
}

async fn run_analyze(config: &NodeConfig, from: String, count: u32, size: usize) -> Result<()> {
    if count == 0 || size == 0 {
        bail!("count and size must be positive");
    }

    let key = Key::load(&config.key_file).context("unable to load keys")?;
    let token = key
        .token
        .clone()
        .ok_or_else(|| anyhow!("key file has no token; enroll with keygen first"))?;

    let engine = open_engine(config)?;
    let node = Node::new(String::new(), engine, key);
    client::discover(&node, &from).await;
    if node.peers.connected_count().await == 0 {
        bail!("unable to discover at least one miner node");
    }

    // Fixed-size payload, hex-armored the way devices submit telemetry.
    let mut payload = vec![0u8; size * 1000];
    rand::thread_rng().fill_bytes(&mut payload);
    let payload = hex::encode(payload).into_bytes();

    for i in 1..=count {
        info!(block = i, "generating block");
        let started = Instant::now();
        let block = client::create_block(&node, &token, vec![payload.clone()]).await?;
        analysis::save_block_gen_time(
            Path::new(analysis::GEN_TIME_DIR),
            &block.hash,
            started.elapsed(),
        );
        info!("block mined successfully");
    }
    Ok(())
}

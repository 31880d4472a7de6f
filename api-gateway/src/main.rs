//! docledger node binary.
//!
//! Two subcommands:
//!
//! - `server`: runs a full node with the local chain, admission pool and block
//!   cutter, search indices, peer overlay, Prometheus exporter and the
//!   HTTP API.
//! - `keygen`: generates an admin keypair against an existing database
//!   and prints the private key exactly once.

mod auth;
mod routes;
mod state;

use std::path::PathBuf;
use std::sync::Arc;

use axum::{
    Router,
    routing::{get, post},
};
use clap::{Args, Parser, Subcommand};
use tokio::signal;
use tokio::sync::mpsc;

use docledger::accounts::AccountRegistry;
use docledger::crypto::{NodeIdentity, UserKeypair};
use docledger::ledger::{Blockchain, META_P2P_PRIV_KEY, SharedStore};
use docledger::metrics::{MetricsRegistry, run_prometheus_http_server};
use docledger::p2p::{ChainSet, P2pConfig, P2pNode, RocksDbPeerOpener};
use docledger::pool::{PoolConfig, Receiver, SchedulerContext, run_scheduler};
use docledger::search::Search;
use docledger::storage::{RocksDbChainStore, db_exists};
use docledger::types::{Account, ROLE_ADMIN, Role};

use routes::{accounts, blocks, collections, documents, info};
use state::{AppState, SharedState};

const VERSION: &str = env!("CARGO_PKG_VERSION");

#[derive(Parser)]
#[command(name = "docledger", version, about = "The tamper-evident document datastore")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// start the docledger server
    Server(ServerArgs),
    /// generate and register an admin account
    Keygen(KeygenArgs),
}

#[derive(Args)]
struct ServerArgs {
    /// the path to the folder of data persistency
    #[arg(long, default_value = "data")]
    dir: PathBuf,

    /// the password to manage JWT
    #[arg(long, default_value = "docledger_secret")]
    secret: String,

    /// the max transactions in a block
    #[arg(long, default_value_t = 2048)]
    maxtx: usize,

    /// the time in milliseconds interval to generate a block
    #[arg(long, default_value_t = 2000)]
    maxtime: u64,

    /// the port that the HTTP server listens on
    #[arg(long, default_value_t = 6899)]
    porthttp: u16,

    /// the port that the p2p node listens on
    #[arg(long = "portP2p", default_value_t = 6091)]
    port_p2p: u16,

    /// the interface the p2p node binds to
    #[arg(long = "hostP2p", default_value = "0.0.0.0")]
    host_p2p: String,

    /// the address other peers should dial this node at
    #[arg(long = "advertiseAddress")]
    advertise_address: Option<String>,

    /// comma-separated bootstrap peers, host:port
    #[arg(long = "peerAddresses", value_delimiter = ',')]
    peer_addresses: Vec<String>,

    /// log verbosity: panic, fatal, error, warn, info, debug or trace
    #[arg(long, default_value = "info")]
    loglevel: String,
}

#[derive(Args)]
struct KeygenArgs {
    /// the path to the folder of data persistency
    #[arg(long, default_value = "data")]
    dir: PathBuf,
}

fn init_tracing(loglevel: &str) {
    // The panic/fatal levels collapse into error, matching the accepted
    // flag values.
    let level = match loglevel {
        "panic" | "fatal" | "error" => "error",
        "warn" => "warn",
        "debug" => "debug",
        "trace" => "trace",
        _ => "info",
    };
    tracing_subscriber::fmt()
        .with_env_filter(
            std::env::var("RUST_LOG").unwrap_or_else(|_| format!("docledger={level},api_gateway={level}")),
        )
        .init();
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    match cli.command {
        Command::Server(args) => {
            init_tracing(&args.loglevel);
            if let Err(e) = run_server(args).await {
                eprintln!("fatal error: {e}");
                std::process::exit(1);
            }
        }
        Command::Keygen(args) => {
            init_tracing("info");
            if let Err(e) = run_keygen(args) {
                eprintln!("fatal error: {e}");
                std::process::exit(1);
            }
        }
    }
}

/// Generates an admin keypair, registers the account, and prints the
/// private key. This is the only time the key is ever shown.
fn generate_admin_account(store: &SharedStore) -> Result<String, String> {
    let keypair = UserKeypair::generate();
    let address = keypair.address();

    let account = Account {
        public_key: hex::encode(keypair.public_key_bytes()),
        role: Role {
            name: ROLE_ADMIN.to_string(),
            collections_write: Vec::new(),
            collections_read_override: Vec::new(),
        },
        last_modified: chrono::Utc::now().timestamp_millis(),
        ..Account::default()
    };
    store
        .put_account(&address, &account)
        .map_err(|e| format!("failed to register the admin account: {e}"))?;

    tracing::info!(%address, "admin account created and registered");
    println!(
        "\n####################\nADMIN ADDRESS: {address}\nPRIVATE KEY: {}\nWARNING: THIS PRIVATE KEY ONLY SHOWS ONCE. SAVE IT NOW AND KEEP IT SAFE.\n####################\n",
        hex::encode(keypair.secret_bytes())
    );
    Ok(address)
}

fn run_keygen(args: KeygenArgs) -> Result<(), String> {
    let db_path = args.dir.join("blockchain.db");
    if !db_exists(&db_path) {
        return Err(
            "cannot find the db file. please run docledger server first to create the database"
                .to_string(),
        );
    }
    let store: SharedStore = Arc::new(
        RocksDbChainStore::open(&db_path).map_err(|e| format!("failed to open storage: {e}"))?,
    );
    generate_admin_account(&store)?;
    Ok(())
}

/// Loads the node identity from the local store, generating and
/// persisting one on first boot.
fn load_identity(store: &SharedStore) -> Result<NodeIdentity, String> {
    match store
        .get_meta(META_P2P_PRIV_KEY)
        .map_err(|e| format!("failed to read the node identity: {e}"))?
    {
        Some(seed) => NodeIdentity::from_seed_bytes(&seed)
            .ok_or_else(|| "persisted node identity is unreadable".to_string()),
        None => {
            let identity = NodeIdentity::generate();
            store
                .put_meta(META_P2P_PRIV_KEY, &identity.seed_bytes())
                .map_err(|e| format!("failed to persist the node identity: {e}"))?;
            Ok(identity)
        }
    }
}

async fn run_server(args: ServerArgs) -> Result<(), String> {
    std::fs::create_dir_all(&args.dir)
        .map_err(|e| format!("failed to create data dir {}: {e}", args.dir.display()))?;

    // ---------------------------
    // Local chain storage
    // ---------------------------

    let db_path = args.dir.join("blockchain.db");
    let fresh = !db_exists(&db_path);
    let store: SharedStore = Arc::new(
        RocksDbChainStore::open(&db_path)
            .map_err(|e| format!("failed to open storage at {}: {e}", db_path.display()))?,
    );

    let identity = load_identity(&store)?;
    let peer_id = identity.peer_id();
    tracing::info!(peer_id = %peer_id.to_hex(), "node identity loaded");

    let local_chain = if fresh {
        tracing::info!("cannot find the db file. creating new...");
        let chain = Blockchain::create(store.clone(), peer_id)
            .map_err(|e| format!("failed to create the chain: {e}"))?;
        generate_admin_account(&store)?;
        chain
    } else {
        tracing::info!("db file exists.");
        Blockchain::open(store.clone(), peer_id)
            .map_err(|e| format!("failed to open the chain: {e}"))?
    };
    let local_chain = Arc::new(local_chain);

    // ---------------------------
    // Search adapter + reindex
    // ---------------------------

    let search = Arc::new(
        Search::new(store.clone(), &args.dir)
            .map_err(|e| format!("failed to open the search adapter: {e}"))?,
    );

    let peer_opener = RocksDbPeerOpener::new(&args.dir)
        .map_err(|e| format!("failed to prepare the peers dir: {e}"))?;
    let chains = Arc::new(
        ChainSet::open(local_chain.clone(), Box::new(peer_opener))
            .map_err(|e| format!("failed to open peer chains: {e}"))?,
    );

    // The in-memory indices start empty on every boot; recover them from
    // the persisted chains. This also heals a crash between a block's
    // durable append and its indexing.
    for chain in chains.all() {
        match search.reindex_chain(&chain) {
            Ok(indexed) => {
                tracing::info!(
                    peer = %chain.peer_id().to_hex(),
                    transactions = indexed,
                    "reindexed chain"
                );
            }
            Err(e) => tracing::error!(error = %e, "failed to reindex a chain"),
        }
    }

    // ---------------------------
    // Registry, pool, metrics
    // ---------------------------

    let registry = Arc::new(
        AccountRegistry::new(store.clone())
            .map_err(|e| format!("failed to load accounts: {e}"))?,
    );

    let receiver = Arc::new(Receiver::new(
        store.clone(),
        peer_id,
        PoolConfig {
            max_txs_per_block: args.maxtx,
            max_block_interval_ms: args.maxtime,
        },
    ));

    let metrics = Arc::new(
        MetricsRegistry::new().map_err(|e| format!("failed to initialise metrics registry: {e}"))?,
    );
    {
        let metrics = metrics.clone();
        let addr = docledger::config::MetricsConfig::default().listen_addr;
        tokio::spawn(async move {
            if let Err(e) = run_prometheus_http_server(metrics, addr).await {
                tracing::error!(error = %e, "metrics HTTP server error");
            }
        });
        tracing::info!("metrics exporter listening on http://{addr}/metrics");
    }

    // ---------------------------
    // Peer overlay
    // ---------------------------

    let advertise = args
        .advertise_address
        .clone()
        .unwrap_or_else(|| format!("127.0.0.1:{}", args.port_p2p));
    let p2p_config = P2pConfig {
        bind_host: args.host_p2p.clone(),
        port: args.port_p2p,
        advertise_address: advertise,
        bootstrap_addresses: args
            .peer_addresses
            .iter()
            .filter(|a| !a.is_empty())
            .cloned()
            .collect(),
    };

    let p2p = Arc::new(P2pNode::new(
        p2p_config,
        peer_id,
        chains.clone(),
        search.clone(),
        registry.clone(),
        metrics.clone(),
    ));

    let (committed_tx, committed_rx) = mpsc::channel(64);
    p2p.clone()
        .start(committed_rx)
        .await
        .map_err(|e| format!("failed to start the p2p node: {e}"))?;

    // ---------------------------
    // Block-cutting scheduler
    // ---------------------------

    tokio::spawn(run_scheduler(SchedulerContext {
        receiver: receiver.clone(),
        chain: local_chain.clone(),
        search: search.clone(),
        metrics: metrics.clone(),
        committed: committed_tx,
    }));

    // Challenge words expire after ~30 s; sweep them in the background.
    {
        let registry = registry.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(std::time::Duration::from_secs(10));
            loop {
                ticker.tick().await;
                registry.evict_expired_challenges();
            }
        });
    }

    // ---------------------------
    // HTTP router
    // ---------------------------

    let app_state: SharedState = Arc::new(AppState {
        chains,
        receiver,
        registry,
        search,
        p2p,
        metrics,
        secret: args.secret.clone(),
        version: VERSION,
    });

    let app = Router::new()
        .route("/", get(info::banner))
        .route("/info", get(info::info))
        .route("/jwt", post(accounts::jwt))
        .route("/jwt/challenge/{address}", get(accounts::jwt_challenge))
        .route("/block/{blockId}", get(blocks::block_info))
        .route("/verification/{blockId}/{txId}", get(blocks::merkle_path))
        .route(
            "/search/{collection}",
            post(documents::search).get(documents::search),
        )
        .route("/document/{collection}", post(documents::submit))
        .route("/bulk/{collection}", post(documents::bulk))
        .route("/collection", post(collections::create))
        .route("/collections", get(collections::list))
        .route("/collection/{name}", get(collections::get))
        .route("/account", post(accounts::register))
        .route(
            "/account/{address}",
            post(accounts::update).get(accounts::get),
        )
        .route(
            "/setaccountpermission/{address}",
            post(accounts::set_permissions),
        )
        .fallback(not_found)
        .with_state(app_state);

    let listen_addr = format!("0.0.0.0:{}", args.porthttp);
    tracing::info!("API listening on http://{listen_addr}");

    let listener = tokio::net::TcpListener::bind(&listen_addr)
        .await
        .map_err(|e| format!("failed to bind {listen_addr}: {e}"))?;

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .map_err(|e| format!("API server error: {e}"))?;

    tracing::info!("exiting...");
    Ok(())
}

/// `404` for unknown routes, in the standard error shape.
async fn not_found(uri: axum::http::Uri) -> routes::ApiError {
    routes::api_error(
        axum::http::StatusCode::NOT_FOUND,
        format!("handler not found for path: {}", uri.path()),
    )
}

/// Waits for Ctrl-C, used for graceful shutdown.
async fn shutdown_signal() {
    let _ = signal::ctrl_c().await;
    tracing::info!("shutdown signal received");
}

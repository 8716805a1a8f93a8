use std::sync::Arc;
use std::time::Duration;

use actix_cors::Cors;
use actix_web::{middleware, web, App, HttpServer};
use anyhow::Context;
use clap::Parser;
use log::{info, warn};
use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

mod api;
mod blockchain;
mod config;
mod network;
mod node;

use blockchain::{BlockchainStorage, Ed25519Signer, Ledger, ProofOfWork, Verifier};
use config::{Args, NodeConfig};
use network::{HttpTransport, PeerSync};
use node::{Node, Shutdown};

// Open the ledger from disk, falling back to an in-memory chain
fn initialize_ledger(config: &NodeConfig) -> Ledger {
    let verifier = Verifier::new(ProofOfWork::default(), Arc::new(Ed25519Signer));
    let data_dir = config.data_dir();

    let ledger = match BlockchainStorage::new(&data_dir) {
        Ok(storage) => {
            info!("Opened storage at {}", data_dir.display());
            Ledger::with_storage(verifier, Arc::new(storage))
        }
        Err(err) => {
            warn!("Failed to open storage at {}: {}", data_dir.display(), err);
            warn!("Creating in-memory ledger instead");
            Ledger::new(verifier)
        }
    };

    for peer in &config.peers {
        ledger.add_peer(peer);
    }

    ledger
}

#[derive(OpenApi)]
#[openapi(
    paths(
        api::handlers::get_chain,
        api::handlers::get_pending_transactions,
        api::handlers::verify_pending_transactions,
        api::handlers::new_transaction,
        api::handlers::mine_block,
        api::handlers::validate_chain,
        api::handlers::create_wallet,
        api::handlers::load_wallet,
        api::handlers::get_balance,
        api::handlers::get_address_balance,
        api::handlers::add_peer,
        api::handlers::remove_peer,
        api::handlers::list_peers,
        api::handlers::resolve_conflicts,
        api::handlers::receive_transaction,
        api::handlers::receive_block
    ),
    components(
        schemas(
            blockchain::Block,
            blockchain::Transaction,
            blockchain::crypto::Address,
            blockchain::crypto::DigitalSignature,
            network::transport::TransactionMessage,
            network::transport::BlockMessage,
            api::handlers::ChainResponse,
            api::handlers::TransactionRequest,
            api::handlers::TransactionResponse,
            api::handlers::MineResponse,
            api::handlers::WalletResponse,
            api::handlers::BalanceResponse,
            api::handlers::PeerRequest,
            api::handlers::PeersResponse,
            api::handlers::ResolveResponse
        )
    ),
    tags(
        (name = "ledger", description = "Ledger node API endpoints")
    ),
    info(
        title = "Ledger Node API",
        version = "1.0.0",
        description = "A proof-of-work ledger node with peer synchronization",
        license(
            name = "MIT",
            url = "https://opensource.org/licenses/MIT"
        )
    )
)]
struct ApiDoc;

#[actix_web::main]
async fn main() -> anyhow::Result<()> {
    // Initialize logger
    env_logger::init_from_env(env_logger::Env::new().default_filter_or("info"));

    let args = Args::parse();
    let config = NodeConfig::from_args(&args)?;

    let ledger = Arc::new(initialize_ledger(&config));
    let shutdown = Shutdown::new();
    let timeout = Duration::from_secs(config.peer_timeout_secs);
    let transport = Arc::new(HttpTransport::new(timeout).context("building peer client")?);
    let sync = PeerSync::new(ledger.clone(), transport, timeout, shutdown.clone());
    let node = Node::new(ledger, sync, config.wallet_path(), shutdown.clone());

    if let Err(err) = node.load_wallet() {
        warn!("No wallet loaded ({}); create one with POST /wallet", err);
    }

    let node = web::Data::new(node);

    // Stop mining and in-flight peer calls as soon as the user interrupts
    {
        let shutdown = shutdown.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                info!("Interrupt received, shutting down");
                shutdown.trigger();
            }
        });
    }

    info!("Starting HTTP server at http://{}:{}", config.host, config.port);

    let openapi = ApiDoc::openapi();

    HttpServer::new(move || {
        // Configure CORS
        let cors = Cors::default()
            .allow_any_origin()
            .allow_any_method()
            .allow_any_header()
            .max_age(3600);

        App::new()
            .wrap(middleware::Logger::default())
            .wrap(cors)
            .app_data(node.clone())
            .configure(api::configure_routes)
            // Swagger UI
            .service(
                SwaggerUi::new("/swagger-ui/{_:.*}")
                    .url("/api-docs/openapi.json", openapi.clone()),
            )
    })
    .bind((config.host.as_str(), config.port))
    .with_context(|| format!("binding {}:{}", config.host, config.port))?
    .run()
    .await?;

    shutdown.trigger();
    info!("Node stopped");

    Ok(())
}

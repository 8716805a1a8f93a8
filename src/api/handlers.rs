use actix_web::{web, HttpResponse, Responder};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use crate::blockchain::{Address, Block, LedgerError, Transaction};
use crate::network::transport::{BlockMessage, TransactionMessage};
use crate::node::{BlockReceipt, Node, NodeError, Origin};

/// Shared node state
pub type NodeData = web::Data<Node>;

/// Response for the chain endpoint
#[derive(Serialize, Deserialize, ToSchema)]
pub struct ChainResponse {
    /// The length of the chain
    pub length: usize,

    /// The blocks in the chain
    pub chain: Vec<Block>,

    /// Whether the chain is valid
    pub is_valid: bool,
}

/// Request for the transaction endpoint
#[derive(Serialize, Deserialize, ToSchema)]
pub struct TransactionRequest {
    /// The recipient's address
    pub recipient: String,

    /// The amount to transfer
    pub amount: f64,
}

/// Response for the transaction endpoint
#[derive(Serialize, Deserialize, ToSchema)]
pub struct TransactionResponse {
    pub message: String,

    pub transaction: Transaction,

    /// Whether some peer refused the transaction. It stays pending here.
    pub rejected_by_peers: bool,

    /// The node's remaining spendable balance
    pub balance: Option<f64>,
}

/// Response for the mine endpoint
#[derive(Serialize, Deserialize, ToSchema)]
pub struct MineResponse {
    pub message: String,

    /// The newly mined block
    pub block: Block,

    /// Whether a peer reported a diverged chain
    pub needs_resolution: bool,

    pub balance: Option<f64>,
}

/// Response for the wallet endpoints
#[derive(Serialize, Deserialize, ToSchema)]
pub struct WalletResponse {
    /// The wallet's address (base58 public key)
    pub address: String,

    pub balance: Option<f64>,
}

/// Response for the balance endpoints
#[derive(Serialize, Deserialize, ToSchema)]
pub struct BalanceResponse {
    pub address: String,

    pub balance: f64,
}

/// Request for the add peer endpoint
#[derive(Serialize, Deserialize, ToSchema)]
pub struct PeerRequest {
    /// Peer address, e.g. `localhost:5001`
    pub node: String,
}

/// Response for the peer endpoints
#[derive(Serialize, Deserialize, ToSchema)]
pub struct PeersResponse {
    pub message: String,

    pub all_nodes: Vec<String>,
}

/// Response for the resolve endpoint
#[derive(Serialize, Deserialize, ToSchema)]
pub struct ResolveResponse {
    pub message: String,

    pub replaced: bool,

    pub length: usize,
}

fn error_response(err: &NodeError) -> HttpResponse {
    let body = serde_json::json!({ "error": err.to_string() });

    match err {
        NodeError::NoWallet
        | NodeError::TransactionError(_)
        | NodeError::LedgerError(LedgerError::NoIdentity)
        | NodeError::LedgerError(LedgerError::InvalidTransaction(_))
        | NodeError::WalletError(_) => HttpResponse::BadRequest().json(body),
        NodeError::ResolutionRequired
        | NodeError::LedgerError(LedgerError::StaleTip { .. })
        | NodeError::LedgerError(LedgerError::Linkage { .. }) => HttpResponse::Conflict().json(body),
        NodeError::LedgerError(LedgerError::MiningError(_)) => {
            HttpResponse::ServiceUnavailable().json(body)
        }
        _ => HttpResponse::InternalServerError().json(body),
    }
}

/// Get the full blockchain
///
/// Returns the entire blockchain and its validity status
#[utoipa::path(
    get,
    path = "/chain",
    responses(
        (status = 200, description = "Blockchain retrieved successfully", body = ChainResponse)
    )
)]
pub async fn get_chain(node: NodeData) -> impl Responder {
    let ledger = node.ledger();
    let chain = ledger.chain();
    let is_valid = ledger.verifier().verify_chain(&chain);

    HttpResponse::Ok().json(ChainResponse {
        length: chain.len(),
        chain,
        is_valid,
    })
}

/// Get all pending transactions
#[utoipa::path(
    get,
    path = "/transactions",
    responses(
        (status = 200, description = "Pending transactions retrieved successfully", body = Vec<Transaction>)
    )
)]
pub async fn get_pending_transactions(node: NodeData) -> impl Responder {
    HttpResponse::Ok().json(node.ledger().pending())
}

/// Check every pending transaction with full balance and signature checks
#[utoipa::path(
    get,
    path = "/transactions/verify",
    responses(
        (status = 200, description = "Whether all pending transactions are valid", body = bool)
    )
)]
pub async fn verify_pending_transactions(node: NodeData) -> impl Responder {
    HttpResponse::Ok().json(node.ledger().verify_pending())
}

/// Create a new transaction
///
/// Signs a transfer with the node wallet, admits it and broadcasts it
#[utoipa::path(
    post,
    path = "/transaction",
    request_body = TransactionRequest,
    responses(
        (status = 201, description = "Transaction created successfully", body = TransactionResponse),
        (status = 400, description = "Invalid recipient, invalid transaction or no wallet loaded")
    )
)]
pub async fn new_transaction(
    node: NodeData,
    request: web::Json<TransactionRequest>,
) -> impl Responder {
    let request = request.into_inner();

    let recipient = match request.recipient.parse::<Address>() {
        Ok(recipient) => recipient,
        Err(err) => return error_response(&NodeError::from(err)),
    };

    match node.submit_transaction(recipient, request.amount).await {
        Ok((transaction, outcome)) => HttpResponse::Created().json(TransactionResponse {
            message: "Successfully added transaction".to_string(),
            transaction,
            rejected_by_peers: outcome.is_rejected(),
            balance: node.ledger().own_balance(),
        }),
        Err(err) => error_response(&err),
    }
}

/// Mine a new block
///
/// Creates a new block with all pending transactions and the mining reward
#[utoipa::path(
    post,
    path = "/mine",
    responses(
        (status = 201, description = "Block mined successfully", body = MineResponse),
        (status = 400, description = "No wallet loaded"),
        (status = 409, description = "Conflicts must be resolved first or the tip moved"),
        (status = 503, description = "Node is shutting down")
    )
)]
pub async fn mine_block(node: NodeData) -> impl Responder {
    match node.mine_block().await {
        Ok((block, _)) => HttpResponse::Created().json(MineResponse {
            message: "Block added successfully".to_string(),
            block,
            needs_resolution: node.ledger().needs_resolution(),
            balance: node.ledger().own_balance(),
        }),
        Err(err) => error_response(&err),
    }
}

/// Check if the blockchain is valid
#[utoipa::path(
    get,
    path = "/validate",
    responses(
        (status = 200, description = "Blockchain validation status", body = bool)
    )
)]
pub async fn validate_chain(node: NodeData) -> impl Responder {
    HttpResponse::Ok().json(node.ledger().is_valid())
}

/// Create a new wallet
///
/// Generates a keypair, stores it on disk and uses it as the node identity
#[utoipa::path(
    post,
    path = "/wallet",
    responses(
        (status = 201, description = "Wallet created successfully", body = WalletResponse),
        (status = 400, description = "Saving the wallet failed")
    )
)]
pub async fn create_wallet(node: NodeData) -> impl Responder {
    match node.create_wallet() {
        Ok(address) => HttpResponse::Created().json(WalletResponse {
            address: address.0,
            balance: node.ledger().own_balance(),
        }),
        Err(err) => error_response(&err),
    }
}

/// Load the stored wallet
#[utoipa::path(
    get,
    path = "/wallet",
    responses(
        (status = 200, description = "Wallet loaded successfully", body = WalletResponse),
        (status = 400, description = "Loading the wallet failed")
    )
)]
pub async fn load_wallet(node: NodeData) -> impl Responder {
    match node.load_wallet() {
        Ok(address) => HttpResponse::Ok().json(WalletResponse {
            address: address.0,
            balance: node.ledger().own_balance(),
        }),
        Err(err) => error_response(&err),
    }
}

/// Get the node's own balance
#[utoipa::path(
    get,
    path = "/balance",
    responses(
        (status = 200, description = "Balance retrieved successfully", body = BalanceResponse),
        (status = 400, description = "No wallet loaded")
    )
)]
pub async fn get_balance(node: NodeData) -> impl Responder {
    let ledger = node.ledger();

    match (ledger.identity(), ledger.own_balance()) {
        (Some(address), Some(balance)) => HttpResponse::Ok().json(BalanceResponse {
            address: address.0,
            balance,
        }),
        _ => error_response(&NodeError::NoWallet),
    }
}

/// Get the balance of any address
#[utoipa::path(
    get,
    path = "/balance/{address}",
    responses(
        (status = 200, description = "Balance retrieved successfully", body = BalanceResponse)
    )
)]
pub async fn get_address_balance(node: NodeData, address: web::Path<String>) -> impl Responder {
    let address = Address(address.into_inner());
    let balance = node.ledger().balance_of(&address);

    HttpResponse::Ok().json(BalanceResponse {
        address: address.0,
        balance,
    })
}

/// Add a peer node
#[utoipa::path(
    post,
    path = "/node",
    request_body = PeerRequest,
    responses(
        (status = 201, description = "Peer added", body = PeersResponse),
        (status = 400, description = "No peer address given")
    )
)]
pub async fn add_peer(node: NodeData, request: web::Json<PeerRequest>) -> impl Responder {
    if request.node.trim().is_empty() {
        return HttpResponse::BadRequest().json(serde_json::json!({
            "error": "No node data attached"
        }));
    }

    node.ledger().add_peer(&request.node);

    HttpResponse::Created().json(PeersResponse {
        message: "Node added successfully".to_string(),
        all_nodes: node.ledger().peers(),
    })
}

/// Remove a peer node
#[utoipa::path(
    delete,
    path = "/node/{address}",
    responses(
        (status = 200, description = "Peer removed", body = PeersResponse)
    )
)]
pub async fn remove_peer(node: NodeData, address: web::Path<String>) -> impl Responder {
    node.ledger().remove_peer(&address);

    HttpResponse::Ok().json(PeersResponse {
        message: "Node removed".to_string(),
        all_nodes: node.ledger().peers(),
    })
}

/// List peer nodes
#[utoipa::path(
    get,
    path = "/nodes",
    responses(
        (status = 200, description = "Known peers", body = PeersResponse)
    )
)]
pub async fn list_peers(node: NodeData) -> impl Responder {
    HttpResponse::Ok().json(PeersResponse {
        message: "Known nodes".to_string(),
        all_nodes: node.ledger().peers(),
    })
}

/// Resolve conflicts with peers
///
/// Adopts the longest valid chain offered by any reachable peer
#[utoipa::path(
    post,
    path = "/resolve-conflicts",
    responses(
        (status = 200, description = "Resolution finished", body = ResolveResponse)
    )
)]
pub async fn resolve_conflicts(node: NodeData) -> impl Responder {
    let replaced = node.resolve_conflicts().await;
    let message = if replaced {
        "Chain was replaced"
    } else {
        "Local chain kept"
    };

    HttpResponse::Ok().json(ResolveResponse {
        message: message.to_string(),
        replaced,
        length: node.ledger().chain().len(),
    })
}

/// Receive a transaction broadcast by a peer
#[utoipa::path(
    post,
    path = "/broadcast-transaction",
    request_body = TransactionMessage,
    responses(
        (status = 201, description = "Transaction admitted"),
        (status = 400, description = "Transaction invalid")
    )
)]
pub async fn receive_transaction(
    node: NodeData,
    message: web::Json<TransactionMessage>,
) -> impl Responder {
    let transaction = message.into_inner().transaction;

    match node.add_transaction(transaction, Origin::Remote).await {
        Ok(_) => HttpResponse::Created().json(serde_json::json!({
            "message": "Successfully added transaction"
        })),
        Err(err) => HttpResponse::BadRequest().json(serde_json::json!({
            "error": err.to_string()
        })),
    }
}

/// Receive a block broadcast by a peer
#[utoipa::path(
    post,
    path = "/broadcast-block",
    request_body = BlockMessage,
    responses(
        (status = 201, description = "Block appended"),
        (status = 200, description = "Block is ahead of the local chain, resolution scheduled"),
        (status = 400, description = "Block invalid"),
        (status = 409, description = "Local chain is at least as long or diverged")
    )
)]
pub async fn receive_block(node: NodeData, message: web::Json<BlockMessage>) -> impl Responder {
    match node.receive_block(message.into_inner().block) {
        BlockReceipt::Accepted => HttpResponse::Created().json(serde_json::json!({
            "message": "Block added"
        })),
        BlockReceipt::Behind => HttpResponse::Ok().json(serde_json::json!({
            "message": "Blockchain seems to differ from local blockchain"
        })),
        BlockReceipt::Conflict(reason) => HttpResponse::Conflict().json(serde_json::json!({
            "error": reason
        })),
        BlockReceipt::Rejected(reason) => HttpResponse::BadRequest().json(serde_json::json!({
            "error": reason
        })),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::time::Duration;

    use actix_web::http::StatusCode;
    use actix_web::{test, App};
    use tempfile::TempDir;

    use crate::blockchain::{Ed25519Signer, Ledger, ProofOfWork, Verifier, Wallet};
    use crate::network::{HttpTransport, PeerSync};
    use crate::node::Shutdown;

    fn node_data(dir: &TempDir) -> NodeData {
        let ledger = Arc::new(Ledger::new(Verifier::new(
            ProofOfWork::default(),
            Arc::new(Ed25519Signer),
        )));
        let shutdown = Shutdown::new();
        let transport = Arc::new(HttpTransport::new(Duration::from_millis(200)).unwrap());
        let sync = PeerSync::new(ledger.clone(), transport, Duration::from_millis(200), shutdown.clone());
        web::Data::new(Node::new(ledger, sync, dir.path().join("wallet.txt"), shutdown))
    }

    #[actix_web::test]
    async fn test_wallet_mine_and_chain() {
        let dir = TempDir::new().unwrap();
        let app = test::init_service(
            App::new()
                .app_data(node_data(&dir))
                .configure(crate::api::configure_routes),
        )
        .await;

        let req = test::TestRequest::post().uri("/mine").to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);

        let req = test::TestRequest::post().uri("/wallet").to_request();
        let wallet: WalletResponse = test::call_and_read_body_json(&app, req).await;
        assert_eq!(wallet.balance, Some(0.0));

        let req = test::TestRequest::post().uri("/mine").to_request();
        let mined: MineResponse = test::call_and_read_body_json(&app, req).await;
        assert_eq!(mined.block.index(), 1);
        assert_eq!(mined.balance, Some(10.0));

        let req = test::TestRequest::get().uri("/chain").to_request();
        let chain: ChainResponse = test::call_and_read_body_json(&app, req).await;
        assert_eq!(chain.length, 2);
        assert!(chain.is_valid);
    }

    #[actix_web::test]
    async fn test_transaction_flow() {
        let dir = TempDir::new().unwrap();
        let app = test::init_service(
            App::new()
                .app_data(node_data(&dir))
                .configure(crate::api::configure_routes),
        )
        .await;
        let bob = Wallet::new().address().clone();

        let req = test::TestRequest::post().uri("/wallet").to_request();
        test::call_service(&app, req).await;

        // Nothing to spend yet
        let req = test::TestRequest::post()
            .uri("/transaction")
            .set_json(TransactionRequest {
                recipient: bob.to_string(),
                amount: 5.0,
            })
            .to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);

        let req = test::TestRequest::post().uri("/mine").to_request();
        test::call_service(&app, req).await;

        let req = test::TestRequest::post()
            .uri("/transaction")
            .set_json(TransactionRequest {
                recipient: bob.to_string(),
                amount: 5.0,
            })
            .to_request();
        let created: TransactionResponse = test::call_and_read_body_json(&app, req).await;
        assert_eq!(created.balance, Some(5.0));
        assert!(!created.rejected_by_peers);

        let req = test::TestRequest::get().uri("/transactions").to_request();
        let pending: Vec<Transaction> = test::call_and_read_body_json(&app, req).await;
        assert_eq!(pending, vec![created.transaction]);

        let req = test::TestRequest::get().uri("/transactions/verify").to_request();
        let valid: bool = test::call_and_read_body_json(&app, req).await;
        assert!(valid);

        let req = test::TestRequest::get()
            .uri(&format!("/balance/{}", bob))
            .to_request();
        let balance: BalanceResponse = test::call_and_read_body_json(&app, req).await;
        assert_eq!(balance.balance, 0.0);
    }

    #[actix_web::test]
    async fn test_undecodable_recipient_is_rejected() {
        let dir = TempDir::new().unwrap();
        let app = test::init_service(
            App::new()
                .app_data(node_data(&dir))
                .configure(crate::api::configure_routes),
        )
        .await;

        let req = test::TestRequest::post().uri("/wallet").to_request();
        test::call_service(&app, req).await;
        let req = test::TestRequest::post().uri("/mine").to_request();
        test::call_service(&app, req).await;

        for recipient in ["bob", "0OIl", ""] {
            let req = test::TestRequest::post()
                .uri("/transaction")
                .set_json(TransactionRequest {
                    recipient: recipient.to_string(),
                    amount: 1.0,
                })
                .to_request();
            let resp = test::call_service(&app, req).await;
            assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
        }

        let req = test::TestRequest::get().uri("/transactions").to_request();
        let pending: Vec<Transaction> = test::call_and_read_body_json(&app, req).await;
        assert!(pending.is_empty());
    }

    #[actix_web::test]
    async fn test_peer_endpoints() {
        let dir = TempDir::new().unwrap();
        let app = test::init_service(
            App::new()
                .app_data(node_data(&dir))
                .configure(crate::api::configure_routes),
        )
        .await;

        let req = test::TestRequest::post()
            .uri("/node")
            .set_json(PeerRequest {
                node: "localhost:5001".to_string(),
            })
            .to_request();
        let peers: PeersResponse = test::call_and_read_body_json(&app, req).await;
        assert_eq!(peers.all_nodes, vec!["localhost:5001"]);

        let req = test::TestRequest::post()
            .uri("/node")
            .set_json(PeerRequest { node: " ".to_string() })
            .to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);

        let req = test::TestRequest::delete().uri("/node/localhost:5001").to_request();
        let peers: PeersResponse = test::call_and_read_body_json(&app, req).await;
        assert!(peers.all_nodes.is_empty());
    }

    #[actix_web::test]
    async fn test_inbound_peer_traffic() {
        let dir = TempDir::new().unwrap();
        let app = test::init_service(
            App::new()
                .app_data(node_data(&dir))
                .configure(crate::api::configure_routes),
        )
        .await;

        // A block mined elsewhere on top of the shared genesis
        let miner = Wallet::new();
        let source = Ledger::new(Verifier::new(ProofOfWork::default(), Arc::new(Ed25519Signer)));
        source.set_identity(Some(miner.address().clone()));
        let block = source
            .mine_block(&std::sync::atomic::AtomicBool::new(false))
            .unwrap();

        let req = test::TestRequest::post()
            .uri("/broadcast-block")
            .set_json(BlockMessage { block: block.clone() })
            .to_request();
        assert_eq!(test::call_service(&app, req).await.status(), StatusCode::CREATED);

        let req = test::TestRequest::post()
            .uri("/broadcast-block")
            .set_json(BlockMessage { block })
            .to_request();
        assert_eq!(test::call_service(&app, req).await.status(), StatusCode::CONFLICT);

        let transaction = Transaction::signed(&miner, Address("bob".to_string()), 3.0).unwrap();
        let req = test::TestRequest::post()
            .uri("/broadcast-transaction")
            .set_json(TransactionMessage { transaction })
            .to_request();
        assert_eq!(test::call_service(&app, req).await.status(), StatusCode::CREATED);

        let overdraft = Transaction::signed(&miner, Address("bob".to_string()), 8.0).unwrap();
        let req = test::TestRequest::post()
            .uri("/broadcast-transaction")
            .set_json(TransactionMessage {
                transaction: overdraft,
            })
            .to_request();
        assert_eq!(test::call_service(&app, req).await.status(), StatusCode::BAD_REQUEST);
    }
}

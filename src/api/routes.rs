use actix_web::web;

use super::handlers;

/// Configures the API routes
///
/// # Arguments
///
/// * `cfg` - The service configuration
pub fn configure_routes(cfg: &mut web::ServiceConfig) {
    cfg.route("/chain", web::get().to(handlers::get_chain))
        .route("/transactions", web::get().to(handlers::get_pending_transactions))
        .route("/transactions/verify", web::get().to(handlers::verify_pending_transactions))
        .route("/transaction", web::post().to(handlers::new_transaction))
        .route("/mine", web::post().to(handlers::mine_block))
        .route("/validate", web::get().to(handlers::validate_chain))
        .route("/wallet", web::post().to(handlers::create_wallet))
        .route("/wallet", web::get().to(handlers::load_wallet))
        .route("/balance", web::get().to(handlers::get_balance))
        .route("/balance/{address}", web::get().to(handlers::get_address_balance))
        .route("/node", web::post().to(handlers::add_peer))
        .route("/node/{address}", web::delete().to(handlers::remove_peer))
        .route("/nodes", web::get().to(handlers::list_peers))
        .route("/resolve-conflicts", web::post().to(handlers::resolve_conflicts))
        .route("/broadcast-transaction", web::post().to(handlers::receive_transaction))
        .route("/broadcast-block", web::post().to(handlers::receive_block));
}

// API module
//
// HTTP surface of the node, used by wallets and by peer nodes

pub mod handlers;
pub mod routes;

pub use routes::configure_routes;

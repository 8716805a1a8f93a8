// Network module
//
// Peer-to-peer propagation and conflict resolution:
// - PeerTransport: request/response calls to a named peer (HTTP)
// - PeerSync: concurrent broadcast and longest-valid-chain resolution

pub mod sync;
pub mod transport;

pub use sync::{BroadcastOutcome, PeerSync};
pub use transport::{HttpTransport, PeerStatus, PeerTransport, TransportError};

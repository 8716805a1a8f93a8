use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use utoipa::ToSchema;

use crate::blockchain::{Block, Transaction};

/// Errors that can occur while talking to a peer
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("Failed to build HTTP client: {0}")]
    ClientError(#[from] reqwest::Error),

    #[error("Peer {peer} unreachable: {reason}")]
    Unreachable { peer: String, reason: String },

    #[error("Peer {peer} sent an unreadable response: {reason}")]
    InvalidResponse { peer: String, reason: String },
}

/// How a peer answered a broadcast
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PeerStatus {
    Accepted,
    /// The peer judged the payload invalid
    Rejected,
    /// The peer's chain diverged from ours and may be longer
    Conflict,
    Unreachable,
}

impl PeerStatus {
    pub fn from_http(status: StatusCode) -> Self {
        match status {
            s if s.is_success() => PeerStatus::Accepted,
            StatusCode::BAD_REQUEST | StatusCode::UNPROCESSABLE_ENTITY => PeerStatus::Rejected,
            StatusCode::CONFLICT => PeerStatus::Conflict,
            _ => PeerStatus::Unreachable,
        }
    }
}

/// Body of `POST /broadcast-transaction`
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct TransactionMessage {
    pub transaction: Transaction,
}

/// Body of `POST /broadcast-block`
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct BlockMessage {
    pub block: Block,
}

/// The part of a `GET /chain` response needed for resolution
#[derive(Debug, Deserialize)]
struct ChainSnapshot {
    chain: Vec<Block>,
}

/// Request/response calls against a peer address
#[async_trait]
pub trait PeerTransport: Send + Sync {
    async fn post_transaction(&self, peer: &str, transaction: &Transaction) -> PeerStatus;

    async fn post_block(&self, peer: &str, block: &Block) -> PeerStatus;

    async fn get_chain(&self, peer: &str) -> Result<Vec<Block>, TransportError>;
}

/// HTTP implementation talking to other nodes' API
#[derive(Debug, Clone)]
pub struct HttpTransport {
    client: Client,
}

impl HttpTransport {
    pub fn new(timeout: Duration) -> Result<Self, TransportError> {
        let client = Client::builder().timeout(timeout).build()?;
        Ok(HttpTransport { client })
    }

    fn url(peer: &str, path: &str) -> String {
        if peer.starts_with("http://") || peer.starts_with("https://") {
            format!("{}{}", peer.trim_end_matches('/'), path)
        } else {
            format!("http://{}{}", peer, path)
        }
    }

    async fn post<T: Serialize + ?Sized>(&self, peer: &str, path: &str, body: &T) -> PeerStatus {
        match self.client.post(Self::url(peer, path)).json(body).send().await {
            Ok(response) => PeerStatus::from_http(response.status()),
            Err(_) => PeerStatus::Unreachable,
        }
    }
}

#[async_trait]
impl PeerTransport for HttpTransport {
    async fn post_transaction(&self, peer: &str, transaction: &Transaction) -> PeerStatus {
        let message = TransactionMessage {
            transaction: transaction.clone(),
        };
        self.post(peer, "/broadcast-transaction", &message).await
    }

    async fn post_block(&self, peer: &str, block: &Block) -> PeerStatus {
        let message = BlockMessage {
            block: block.clone(),
        };
        self.post(peer, "/broadcast-block", &message).await
    }

    async fn get_chain(&self, peer: &str) -> Result<Vec<Block>, TransportError> {
        let response = self
            .client
            .get(Self::url(peer, "/chain"))
            .send()
            .await
            .map_err(|e| TransportError::Unreachable {
                peer: peer.to_string(),
                reason: e.to_string(),
            })?;

        if !response.status().is_success() {
            return Err(TransportError::Unreachable {
                peer: peer.to_string(),
                reason: format!("status {}", response.status()),
            });
        }

        let snapshot: ChainSnapshot =
            response
                .json()
                .await
                .map_err(|e| TransportError::InvalidResponse {
                    peer: peer.to_string(),
                    reason: e.to_string(),
                })?;

        Ok(snapshot.chain)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_mapping() {
        assert_eq!(PeerStatus::from_http(StatusCode::OK), PeerStatus::Accepted);
        assert_eq!(PeerStatus::from_http(StatusCode::CREATED), PeerStatus::Accepted);
        assert_eq!(PeerStatus::from_http(StatusCode::BAD_REQUEST), PeerStatus::Rejected);
        assert_eq!(PeerStatus::from_http(StatusCode::CONFLICT), PeerStatus::Conflict);
        assert_eq!(
            PeerStatus::from_http(StatusCode::INTERNAL_SERVER_ERROR),
            PeerStatus::Unreachable
        );
    }

    #[test]
    fn test_peer_url() {
        assert_eq!(
            HttpTransport::url("localhost:5001", "/chain"),
            "http://localhost:5001/chain"
        );
        assert_eq!(
            HttpTransport::url("http://10.0.0.2:5000/", "/chain"),
            "http://10.0.0.2:5000/chain"
        );
    }

    #[tokio::test]
    async fn test_unreachable_peer() {
        let transport = HttpTransport::new(Duration::from_millis(500)).unwrap();
        let transaction = Transaction::reward(crate::blockchain::Address("a".to_string()), 1.0);

        // Port 9 (discard) on localhost is not served by anything here
        let status = transport.post_transaction("127.0.0.1:9", &transaction).await;
        assert_eq!(status, PeerStatus::Unreachable);
        assert!(transport.get_chain("127.0.0.1:9").await.is_err());
    }
}

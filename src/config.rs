use std::path::{Path, PathBuf};

use anyhow::Context;
use clap::Parser;
use serde::{Deserialize, Serialize};

/// Command line flags
#[derive(Debug, Parser)]
#[clap(author, version, about)]
pub struct Args {
    /// Port to serve the node API on
    #[clap(short, long)]
    pub port: Option<u16>,

    /// Optional TOML configuration file
    #[clap(short, long)]
    pub config: Option<PathBuf>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct NodeConfig {
    pub host: String,
    pub port: u16,
    /// Storage directory; defaults to `data/node-{port}`
    pub data_dir: Option<PathBuf>,
    /// Wallet file; defaults to `data/wallet-{port}.txt`
    pub wallet_path: Option<PathBuf>,
    pub peer_timeout_secs: u64,
    /// Peers added at startup
    pub peers: Vec<String>,
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".into(),
            port: 5000,
            data_dir: None,
            wallet_path: None,
            peer_timeout_secs: 5,
            peers: Vec::new(),
        }
    }
}

impl NodeConfig {
    pub fn from_file<P: AsRef<Path>>(path: P) -> anyhow::Result<Self> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("reading config {}", path.display()))?;
        let config = toml::from_str(&contents)
            .with_context(|| format!("parsing config {}", path.display()))?;
        Ok(config)
    }

    /// File settings first, then command line overrides
    pub fn from_args(args: &Args) -> anyhow::Result<Self> {
        let mut config = match &args.config {
            Some(path) => Self::from_file(path)?,
            None => Self::default(),
        };

        if let Some(port) = args.port {
            config.port = port;
        }

        Ok(config)
    }

    pub fn data_dir(&self) -> PathBuf {
        self.data_dir
            .clone()
            .unwrap_or_else(|| PathBuf::from(format!("data/node-{}", self.port)))
    }

    pub fn wallet_path(&self) -> PathBuf {
        self.wallet_path
            .clone()
            .unwrap_or_else(|| PathBuf::from(format!("data/wallet-{}.txt", self.port)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_defaults_follow_port() {
        let config = NodeConfig {
            port: 5001,
            ..Default::default()
        };

        assert_eq!(config.data_dir(), PathBuf::from("data/node-5001"));
        assert_eq!(config.wallet_path(), PathBuf::from("data/wallet-5001.txt"));
    }

    #[test]
    fn test_file_then_flags() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("node.toml");
        std::fs::write(
            &path,
            "port = 6000\npeer_timeout_secs = 2\npeers = [\"localhost:6001\"]\n",
        )
        .unwrap();

        let args = Args {
            port: Some(7000),
            config: Some(path.clone()),
        };
        let config = NodeConfig::from_args(&args).unwrap();

        assert_eq!(config.port, 7000);
        assert_eq!(config.peer_timeout_secs, 2);
        assert_eq!(config.peers, vec!["localhost:6001"]);
        assert_eq!(config.host, "127.0.0.1");

        let from_file = NodeConfig::from_file(&path).unwrap();
        assert_eq!(from_file.port, 6000);
    }

    #[test]
    fn test_missing_file_is_an_error() {
        let args = Args {
            port: None,
            config: Some(PathBuf::from("/nonexistent/node.toml")),
        };
        assert!(NodeConfig::from_args(&args).is_err());
    }
}

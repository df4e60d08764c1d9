//! Configuration for the fluxa402 facilitator server.
//!
//! Loaded from a JSON file (default `config.json`, overridable via
//! `--config` or `$CONFIG`), with `$HOST` and `$PORT` as fallbacks for the
//! bind address. A scheme runs when its configuration block is present.

use alloy_primitives::Address;
use clap::Parser;
use serde::Deserialize;
use std::fs;
use std::net::IpAddr;
use std::path::PathBuf;

use fluxa402_odp::SettlementMode;
use fluxa402_types::network::Network;

/// CLI arguments for the fluxa402 facilitator server.
#[derive(Parser, Debug)]
#[command(name = "fluxa402-facilitator")]
#[command(about = "x402 v2 facilitator HTTP server")]
struct CliArgs {
    /// Path to the JSON configuration file
    #[arg(long, short, env = "CONFIG", default_value = "config.json")]
    config: PathBuf,
}

/// Server configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Config {
    #[serde(default = "config_defaults::default_port")]
    port: u16,
    #[serde(default = "config_defaults::default_host")]
    host: IpAddr,
    /// Credit scheme block; the scheme is registered when present.
    #[serde(default)]
    credit: Option<CreditConfig>,
    /// Deferred scheme block; the scheme is registered when present.
    #[serde(default)]
    odp: Option<OdpConfig>,
}

/// `fluxacredit` scheme configuration.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreditConfig {
    /// Accept `http://` signature agents on loopback hosts. For local
    /// development only; production directories are HTTPS.
    #[serde(default)]
    pub allow_loopback_http: bool,
}

/// `odp-deferred` scheme configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OdpConfig {
    /// Concrete networks served (the scheme registers for `eip155:*`).
    pub networks: Vec<Network>,
    pub settlement_contract: Address,
    pub debit_wallet: Address,
    pub withdraw_delay_seconds: u64,
    #[serde(default = "config_defaults::default_settlement_mode")]
    pub settlement_mode: SettlementMode,
    #[serde(default)]
    pub max_receipts_per_settlement: Option<usize>,
    /// Background settlement period; the loop is off when absent.
    #[serde(default)]
    pub auto_settle_interval_seconds: Option<u64>,
    /// JSON-RPC endpoint for debit wallet reads and on-chain settlement.
    /// Without it the facilitator runs against in-memory chain state
    /// (synthetic benchmarks only).
    #[serde(default)]
    pub rpc_url: Option<String>,
    /// Hex private keys of the settlement signers.
    #[serde(default)]
    pub signer_keys: Vec<String>,
}

pub mod config_defaults {
    use std::env;
    use std::net::IpAddr;

    use fluxa402_odp::SettlementMode;

    pub const DEFAULT_PORT: u16 = 8080;
    pub const DEFAULT_HOST: &str = "0.0.0.0";

    /// Default port with fallback: $PORT env var -> 8080
    pub fn default_port() -> u16 {
        env::var("PORT")
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or(DEFAULT_PORT)
    }

    /// Default host with fallback: $HOST env var -> "0.0.0.0"
    pub fn default_host() -> IpAddr {
        env::var("HOST")
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or(IpAddr::V4(DEFAULT_HOST.parse().unwrap()))
    }

    pub fn default_settlement_mode() -> SettlementMode {
        SettlementMode::Synthetic
    }
}

/// Configuration error types.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file at {0}: {1}")]
    FileRead(PathBuf, std::io::Error),
    #[error("Failed to parse config file: {0}")]
    JsonParse(#[from] serde_json::Error),
}

impl Config {
    pub fn port(&self) -> u16 {
        self.port
    }

    pub fn host(&self) -> IpAddr {
        self.host
    }

    pub fn credit(&self) -> Option<&CreditConfig> {
        self.credit.as_ref()
    }

    pub fn odp(&self) -> Option<&OdpConfig> {
        self.odp.as_ref()
    }

    /// Load configuration from CLI arguments and the JSON file.
    pub fn load() -> Result<Self, ConfigError> {
        let cli_args = CliArgs::parse();
        let config_path = cli_args
            .config
            .canonicalize()
            .map_err(|e| ConfigError::FileRead(cli_args.config, e))?;
        Self::load_from_path(config_path)
    }

    fn load_from_path(path: PathBuf) -> Result<Self, ConfigError> {
        let content = fs::read_to_string(&path).map_err(|e| ConfigError::FileRead(path, e))?;
        let config: Config = serde_json::from_str(&content)?;
        Ok(config)
    }
}

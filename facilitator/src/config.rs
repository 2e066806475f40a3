//! Facilitator configuration.
//!
//! Everything comes from CLI flags or environment variables (`.env` is
//! loaded first). The executor signing key is read once at boot and never
//! reloaded.

use clap::Parser;
use std::net::IpAddr;
use url::Url;

use apitoll_types::chain::Chain;

/// CLI / environment configuration for the facilitator server.
#[derive(Parser, Debug, Clone)]
#[command(name = "apitoll-facilitator")]
#[command(about = "APIToll facilitator HTTP server")]
pub struct Config {
    /// Address to bind.
    #[arg(long, env = "HOST", default_value = "0.0.0.0")]
    pub host: IpAddr,

    /// Port to bind.
    #[arg(long, env = "PORT", default_value_t = 8402)]
    pub port: u16,

    /// Shared secret required by every store mutation.
    #[arg(long, env = "FACILITATOR_SHARED_SECRET")]
    pub shared_secret: String,

    /// Hex private key of the EVM executor wallet.
    #[arg(long, env = "EVM_EXECUTOR_KEY")]
    pub evm_executor_key: Option<String>,

    /// RPC endpoint for Base.
    #[arg(long, env = "RPC_URL_BASE")]
    pub rpc_url_base: Option<Url>,

    /// RPC endpoint for Base Sepolia.
    #[arg(long, env = "RPC_URL_BASE_SEPOLIA")]
    pub rpc_url_base_sepolia: Option<Url>,

    /// Confirmations to wait for before a transfer counts as settled.
    #[arg(long, env = "CONFIRMATIONS", default_value_t = 2)]
    pub confirmations: u64,

    /// Seconds to wait for confirmations before a receipt poll times out.
    #[arg(long, env = "RECEIPT_TIMEOUT_SECS", default_value_t = 60)]
    pub receipt_timeout_secs: u64,
}

impl Config {
    pub fn load() -> Self {
        Config::parse()
    }

    /// The chains an executor is configured for.
    pub fn rpc_url(&self, chain: Chain) -> Option<&Url> {
        match chain {
            Chain::Base => self.rpc_url_base.as_ref(),
            Chain::BaseSepolia => self.rpc_url_base_sepolia.as_ref(),
            Chain::Solana => None,
        }
    }
}

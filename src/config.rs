//! Platform service configuration.

use clap::Parser;
use std::net::IpAddr;

/// CLI / environment configuration (`.env` is loaded before parsing).
#[derive(Parser, Debug, Clone)]
#[command(name = "apitoll")]
#[command(about = "APIToll platform HTTP server")]
pub struct Config {
    /// Address to bind.
    #[arg(long, env = "HOST", default_value = "0.0.0.0")]
    pub host: IpAddr,

    /// Port to bind.
    #[arg(long, env = "PORT", default_value_t = 8400)]
    pub port: u16,

    /// Stripe API secret (outbound calls; unused by the core beyond
    /// reconciliation bookkeeping).
    #[arg(long, env = "STRIPE_SECRET_KEY")]
    pub stripe_secret_key: Option<String>,

    /// Stripe webhook signing secret; incoming events are rejected without
    /// a matching signature.
    #[arg(long, env = "STRIPE_WEBHOOK_SECRET")]
    pub stripe_webhook_secret: Option<String>,

    /// Comma-separated CORS allow-list. Empty means deny all cross-origin
    /// requests; a wildcard is never combined with credentials.
    #[arg(long, env = "ALLOWED_ORIGINS", default_value = "")]
    pub allowed_origins: String,

    /// Comma-separated identities granted admin surfaces.
    #[arg(long, env = "ADMIN_IDENTITIES", default_value = "")]
    pub admin_identities: String,
}

impl Config {
    pub fn load() -> Self {
        Config::parse()
    }

    pub fn allowed_origins(&self) -> Vec<String> {
        split_csv(&self.allowed_origins)
    }

    pub fn admin_identities(&self) -> Vec<String> {
        split_csv(&self.admin_identities)
    }
}

fn split_csv(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn csv_splitting_ignores_blanks() {
        assert_eq!(
            split_csv("https://a.example, https://b.example ,"),
            vec!["https://a.example", "https://b.example"]
        );
        assert!(split_csv("").is_empty());
        assert!(split_csv(" , ").is_empty());
    }
}

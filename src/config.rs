//! Configuration loading from TOML with environment variable resolution.
//!
//! Reads `config.toml` and deserializes into strongly-typed structs.
//! The admin password is referenced by env-var name in the config and
//! resolved at runtime via `std::env::var`, wrapped in `SecretString`.

use anyhow::{Context, Result};
use secrecy::SecretString;
use serde::Deserialize;
use std::fs;

/// Top-level application configuration.
#[derive(Debug, Deserialize, Clone)]
pub struct AppConfig {
    pub server: ServerConfig,
    pub auction: AuctionConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    pub port: u16,
    /// SQLite database file path.
    pub database_file: String,
    /// Env var holding the admin password. Falls back to a fixed default
    /// when unset, matching local-fest deployments.
    pub admin_password_env: String,
}

/// Bid-ladder and wallet parameters for a bidding round.
#[derive(Debug, Deserialize, Clone)]
pub struct AuctionConfig {
    /// Wallet balance every team starts with (and resets to).
    pub start_wallet: i64,
    /// First rung of the bid ladder.
    pub start_bid: i64,
    /// Ladder step between consecutive bids.
    pub increment: i64,
    /// Hard ceiling — no bid may exceed this.
    pub max_bid: i64,
    /// Minimum gap between two accepted bids from the same team.
    pub cooldown_ms: i64,
    /// Round duration used when the admin supplies none.
    pub default_round_secs: u64,
}

impl Default for AuctionConfig {
    fn default() -> Self {
        Self {
            start_wallet: 12_000,
            start_bid: 400,
            increment: 200,
            max_bid: 2_000,
            cooldown_ms: 300,
            default_round_secs: 90,
        }
    }
}

impl AppConfig {
    /// Load configuration from a TOML file.
    pub fn load(path: &str) -> Result<Self> {
        let contents = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {path}"))?;
        let config: AppConfig = toml::from_str(&contents)
            .with_context(|| format!("Failed to parse config file: {path}"))?;
        Ok(config)
    }

    /// Resolve the admin password from the configured env var,
    /// falling back to the stock default.
    pub fn admin_password(&self) -> SecretString {
        std::env::var(&self.server.admin_password_env)
            .unwrap_or_else(|_| "bugauction".to_string())
            .into()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_auction_defaults() {
        let cfg = AuctionConfig::default();
        assert_eq!(cfg.start_wallet, 12_000);
        assert_eq!(cfg.start_bid, 400);
        assert_eq!(cfg.increment, 200);
        assert_eq!(cfg.max_bid, 2_000);
        assert_eq!(cfg.cooldown_ms, 300);
        assert_eq!(cfg.default_round_secs, 90);
    }

    #[test]
    fn test_parse_config() {
        let toml = r#"
            [server]
            port = 4000
            database_file = "gavel.db"
            admin_password_env = "GAVEL_ADMIN_PASSWORD"

            [auction]
            start_wallet = 10000
            start_bid = 500
            increment = 250
            max_bid = 3000
            cooldown_ms = 500
            default_round_secs = 120
        "#;
        let cfg: AppConfig = toml::from_str(toml).unwrap();
        assert_eq!(cfg.server.port, 4000);
        assert_eq!(cfg.auction.start_bid, 500);
        assert_eq!(cfg.auction.default_round_secs, 120);
    }

    #[test]
    fn test_load_config() {
        // This test requires config.toml to be in the working directory.
        let result = AppConfig::load("config.toml");
        if let Ok(cfg) = result {
            assert!(cfg.server.port > 0);
            assert!(cfg.auction.start_bid > 0);
            assert!(cfg.auction.increment > 0);
            assert!(cfg.auction.max_bid >= cfg.auction.start_bid);
        }
        // If config.toml isn't found, that's acceptable in some test environments
    }
}

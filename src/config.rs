//! Runtime configuration, read from the environment
use anyhow::{bail, Context, Result};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use crate::aggregator::DEFAULT_MAX_IN_FLIGHT;

const DEFAULT_BIND_ADDR: &str = "0.0.0.0:3000";
const DEFAULT_FETCH_TIMEOUT_MS: u64 = 2_000;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    /// SQLite database file
    pub database_path: PathBuf,

    /// HTTP listen address
    pub bind_addr: SocketAddr,

    /// Concurrent log reads allowed per request
    pub max_in_flight: usize,

    /// Per-peer read timeout; `None` waits indefinitely
    pub fetch_timeout: Option<Duration>,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Build a config from an arbitrary variable source.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let var = |name: &str| {
            lookup(name)
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
        };

        let database_path = match var("RECENT_CHATS_DB") {
            Some(path) => PathBuf::from(path),
            None => {
                let home = var("HOME").unwrap_or_else(|| ".".into());
                PathBuf::from(home).join(".recent-chats").join("chats.db")
            }
        };

        let bind_addr = var("RECENT_CHATS_BIND")
            .unwrap_or_else(|| DEFAULT_BIND_ADDR.into())
            .parse::<SocketAddr>()
            .context("RECENT_CHATS_BIND must be a socket address like 0.0.0.0:3000")?;

        let max_in_flight = match var("RECENT_CHATS_MAX_IN_FLIGHT") {
            Some(raw) => raw
                .parse::<usize>()
                .with_context(|| format!("RECENT_CHATS_MAX_IN_FLIGHT is not a number: {}", raw))?,
            None => DEFAULT_MAX_IN_FLIGHT,
        };
        if max_in_flight == 0 {
            bail!("RECENT_CHATS_MAX_IN_FLIGHT must be at least 1");
        }

        let timeout_ms = match var("RECENT_CHATS_FETCH_TIMEOUT_MS") {
            Some(raw) => raw.parse::<u64>().with_context(|| {
                format!("RECENT_CHATS_FETCH_TIMEOUT_MS is not a number: {}", raw)
            })?,
            None => DEFAULT_FETCH_TIMEOUT_MS,
        };
        let fetch_timeout = (timeout_ms > 0).then(|| Duration::from_millis(timeout_ms));

        Ok(Self {
            database_path,
            bind_addr,
            max_in_flight,
            fetch_timeout,
        })
    }
}

//! Upstream HTTP client pool
//!
//! One long-lived reqwest client per upstream base URL, created on first use
//! and kept until process shutdown so keep-alive connections are reused
//! across requests. The pool is process-wide; `shutdown()` drops every
//! client, draining their connection pools.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;

use anyhow::{Context, Result};

/// Hard cap on a single upstream request, streaming included
const REQUEST_TIMEOUT: Duration = Duration::from_secs(60);
/// Idle keep-alive connections kept per host
const MAX_IDLE_PER_HOST: usize = 20;
/// Idle connection expiry
const IDLE_EXPIRY: Duration = Duration::from_secs(30);

/// Keyed pool of upstream clients
pub struct UpstreamPool {
    clients: Mutex<HashMap<String, reqwest::Client>>,
}

impl UpstreamPool {
    pub fn new() -> Self {
        Self {
            clients: Mutex::new(HashMap::new()),
        }
    }

    /// Get or create the client for an upstream base URL.
    ///
    /// The key is scheme + authority, so all paths on one host share a
    /// connection pool.
    pub fn client_for(&self, base_url: &str) -> Result<reqwest::Client> {
        let key = base_url.trim_end_matches('/').to_string();

        let mut clients = self.clients.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(client) = clients.get(&key) {
            return Ok(client.clone());
        }

        tracing::debug!("Creating upstream client for {}", key);

        // NOTE: no default User-Agent and no default headers - the gateway
        // forwards the client's own headers verbatim.
        let client = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .pool_max_idle_per_host(MAX_IDLE_PER_HOST)
            .pool_idle_timeout(IDLE_EXPIRY)
            .build()
            .context("Failed to create upstream HTTP client")?;

        clients.insert(key, client.clone());
        Ok(client)
    }

    /// Number of live clients; used by tests and logging
    pub fn len(&self) -> usize {
        self.clients.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Drop all clients, closing their keep-alive connections
    pub fn shutdown(&self) {
        let mut clients = self.clients.lock().unwrap_or_else(|e| e.into_inner());
        let count = clients.len();
        clients.clear();
        if count > 0 {
            tracing::info!("Upstream pool shut down ({} client(s) dropped)", count);
        }
    }
}

impl Default for UpstreamPool {
    fn default() -> Self {
        Self::new()
    }
}

/// Split an absolute URL into (base, path-and-query) for pool keying.
///
/// `https://api.example.com/v1/chat?x=1` → (`https://api.example.com`,
/// `/v1/chat?x=1`).
pub fn split_base_url(url: &str) -> Option<(&str, &str)> {
    let scheme_end = url.find("://")?;
    let authority_start = scheme_end + 3;
    match url[authority_start..].find('/') {
        Some(rel) => {
            let split = authority_start + rel;
            Some((&url[..split], &url[split..]))
        }
        None => Some((url, "/")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_clients_are_reused_per_base_url() {
        let pool = UpstreamPool::new();
        pool.client_for("https://api.example.com").unwrap();
        pool.client_for("https://api.example.com/").unwrap();
        pool.client_for("https://other.example.com").unwrap();
        assert_eq!(pool.len(), 2);
    }

    #[test]
    fn test_shutdown_drains() {
        let pool = UpstreamPool::new();
        pool.client_for("https://api.example.com").unwrap();
        assert!(!pool.is_empty());
        pool.shutdown();
        assert!(pool.is_empty());
    }

    #[test]
    fn test_split_base_url() {
        assert_eq!(
            split_base_url("https://api.example.com/v1/chat?x=1"),
            Some(("https://api.example.com", "/v1/chat?x=1"))
        );
        assert_eq!(
            split_base_url("http://host:8080"),
            Some(("http://host:8080", "/"))
        );
        assert_eq!(split_base_url("not a url"), None);
    }
}

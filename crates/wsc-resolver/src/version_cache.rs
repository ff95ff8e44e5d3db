//! Service version lookups, cached per host for the resolver's lifetime

use std::cmp::Ordering;
use std::time::Duration;

use dashmap::DashMap;
use reqwest::Client;
use tracing::debug;
use wsc_core::types::{host_authority, host_url};

/// Dotted numeric version, e.g. `2023.4.1`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceVersion(Vec<u64>);

impl ServiceVersion {
    /// Leading numeric components of `value`; `None` when there are none
    /// (commit builds, branch names)
    pub fn parse(value: &str) -> Option<Self> {
        let value = value.trim().trim_start_matches('v');
        let mut parts = Vec::new();
        for part in value.split('.') {
            let digits: String = part.chars().take_while(|c| c.is_ascii_digit()).collect();
            if digits.is_empty() {
                break;
            }
            parts.push(digits.parse().ok()?);
            if digits.len() != part.len() {
                break;
            }
        }
        (!parts.is_empty()).then_some(Self(parts))
    }
}

impl PartialOrd for ServiceVersion {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for ServiceVersion {
    fn cmp(&self, other: &Self) -> Ordering {
        let len = self.0.len().max(other.0.len());
        for i in 0..len {
            let a = self.0.get(i).copied().unwrap_or(0);
            let b = other.0.get(i).copied().unwrap_or(0);
            match a.cmp(&b) {
                Ordering::Equal => continue,
                ord => return ord,
            }
        }
        Ordering::Equal
    }
}

/// Per-host cache of `/api/version`
#[derive(Debug, Default)]
pub struct VersionCache {
    entries: DashMap<String, Option<ServiceVersion>>,
}

impl VersionCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Version of `host`, fetched at most once. Unreachable hosts and
    /// unparsable versions are cached as `None`.
    pub async fn version(&self, http: &Client, host: &str, timeout: Duration) -> Option<ServiceVersion> {
        let authority = host_authority(host);
        if let Some(cached) = self.entries.get(&authority) {
            return cached.value().clone();
        }

        let version = fetch_version(http, host, timeout).await;
        debug!(host = %authority, version = ?version, "Service version");
        self.entries.insert(authority, version.clone());
        version
    }

    /// Whether `host` is at least `minimum`
    pub async fn at_least(
        &self,
        http: &Client,
        host: &str,
        minimum: &str,
        timeout: Duration,
    ) -> bool {
        let Some(minimum) = ServiceVersion::parse(minimum) else {
            return false;
        };
        match self.version(http, host, timeout).await {
            Some(version) => version >= minimum,
            None => false,
        }
    }

    pub fn clear(&self) {
        self.entries.clear();
    }
}

async fn fetch_version(http: &Client, host: &str, timeout: Duration) -> Option<ServiceVersion> {
    let url = format!("{}/api/version", host_url(host));
    let response = http.get(&url).timeout(timeout).send().await.ok()?;
    if !response.status().is_success() {
        return None;
    }
    let body = response.text().await.ok()?;
    let text = body.trim().trim_matches('"');
    ServiceVersion::parse(text)
}

//! Per-domain request leases.
//!
//! Concurrent runs share one [`DomainLeases`]. Holding a lease serializes
//! requests to a domain, and acquiring one waits until the domain's
//! politeness interval has passed since its previous request finished.

use async_trait::async_trait;
use dashmap::DashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, OwnedMutexGuard};
use tokio::time::Instant;

use crate::collab::{FetchResponse, Transport};
use crate::error::ScoutResult;
use crate::world_model::{domain_of, normalize_domain};

#[derive(Debug, Default)]
pub struct DomainLeases {
    slots: DashMap<String, Arc<Mutex<Option<Instant>>>>,
}

impl DomainLeases {
    pub fn new() -> Self {
        Self::default()
    }

    /// Wait for exclusive use of `domain`, at least `interval` after the
    /// previous lease on it was released.
    pub async fn acquire(&self, domain: &str, interval: Duration) -> DomainLease {
        let slot = self
            .slots
            .entry(normalize_domain(domain))
            .or_insert_with(|| Arc::new(Mutex::new(None)))
            .clone();
        let guard = slot.lock_owned().await;
        if let Some(last) = *guard {
            tokio::time::sleep_until(last + interval).await;
        }
        DomainLease { guard }
    }

    pub fn domains(&self) -> usize {
        self.slots.len()
    }
}

/// Exclusive use of one domain. Releasing it stamps the release time.
pub struct DomainLease {
    guard: OwnedMutexGuard<Option<Instant>>,
}

impl Drop for DomainLease {
    fn drop(&mut self) {
        *self.guard = Some(Instant::now());
    }
}

/// A [`Transport`] that holds the domain lease for the length of every request.
pub struct LeasedTransport {
    inner: Arc<dyn Transport>,
    leases: Arc<DomainLeases>,
    interval: Duration,
}

impl LeasedTransport {
    pub fn new(inner: Arc<dyn Transport>, leases: Arc<DomainLeases>, interval: Duration) -> Self {
        Self {
            inner,
            leases,
            interval,
        }
    }
}

#[async_trait]
impl Transport for LeasedTransport {
    async fn fetch(&self, url: &str, referer: Option<&str>) -> ScoutResult<FetchResponse> {
        let domain = domain_of(url).unwrap_or_else(|| url.to_string());
        let _lease = self.leases.acquire(&domain, self.interval).await;
        self.inner.fetch(url, referer).await
    }

    fn rotate_identity(&self) {
        self.inner.rotate_identity();
    }
}

//! Upstream selection
//!
//! A [`Selector`] picks the upstream dialer for each connection a server
//! terminates locally, and keeps track of upstream health through `record`.
//! Transports only consume this interface; [`RoundRobin`] is the reference
//! implementation used by the runtime.

use std::sync::atomic::{AtomicU32, AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use tracing::{debug, warn};

use crate::common::{Conn, Result};
use crate::transport::Dialer;

/// Default number of consecutive failures before an upstream is skipped
pub const DEFAULT_MAX_FAILURES: u32 = 3;

/// Upstream selection strategy
#[async_trait]
pub trait Selector: Send + Sync {
    /// Dial an upstream. The chosen dialer is returned even when dialing
    /// fails, so the caller can attribute the failure.
    async fn dial(&self, network: &str, addr: &str) -> (Arc<dyn Dialer>, Result<Conn>);

    /// Record the outcome of using `dialer`
    fn record(&self, dialer: &Arc<dyn Dialer>, success: bool);
}

struct Forwarder {
    dialer: Arc<dyn Dialer>,
    failures: AtomicU32,
}

/// Round-robin over forwarders, skipping those that failed too often.
///
/// When every forwarder is over the limit the rotation continues over all
/// of them, so a recovered upstream gets picked again.
pub struct RoundRobin {
    forwarders: Vec<Forwarder>,
    next: AtomicUsize,
    max_failures: u32,
}

impl RoundRobin {
    /// Returns `None` when `dialers` is empty.
    pub fn new(dialers: Vec<Arc<dyn Dialer>>) -> Option<Self> {
        if dialers.is_empty() {
            return None;
        }
        Some(Self {
            forwarders: dialers
                .into_iter()
                .map(|dialer| Forwarder {
                    dialer,
                    failures: AtomicU32::new(0),
                })
                .collect(),
            next: AtomicUsize::new(0),
            max_failures: DEFAULT_MAX_FAILURES,
        })
    }

    pub fn with_max_failures(mut self, max_failures: u32) -> Self {
        self.max_failures = max_failures.max(1);
        self
    }

    /// Consecutive failures recorded for the forwarder at `index`
    pub fn failures(&self, index: usize) -> Option<u32> {
        self.forwarders
            .get(index)
            .map(|f| f.failures.load(Ordering::Relaxed))
    }

    fn pick(&self) -> &Forwarder {
        let len = self.forwarders.len();
        let start = self.next.fetch_add(1, Ordering::Relaxed);

        (0..len)
            .map(|i| &self.forwarders[(start + i) % len])
            .find(|f| f.failures.load(Ordering::Relaxed) < self.max_failures)
            .unwrap_or(&self.forwarders[start % len])
    }

    fn find(&self, dialer: &Arc<dyn Dialer>) -> Option<&Forwarder> {
        self.forwarders
            .iter()
            .find(|f| std::ptr::addr_eq(Arc::as_ptr(&f.dialer), Arc::as_ptr(dialer)))
    }
}

#[async_trait]
impl Selector for RoundRobin {
    async fn dial(&self, network: &str, addr: &str) -> (Arc<dyn Dialer>, Result<Conn>) {
        let forwarder = self.pick();
        let result = forwarder.dialer.dial(network, addr).await;
        if result.is_ok() {
            self.record(&forwarder.dialer, true);
        }
        (forwarder.dialer.clone(), result)
    }

    fn record(&self, dialer: &Arc<dyn Dialer>, success: bool) {
        let Some(forwarder) = self.find(dialer) else {
            return;
        };

        if success {
            forwarder.failures.store(0, Ordering::Relaxed);
            return;
        }

        let failures = forwarder.failures.fetch_add(1, Ordering::Relaxed) + 1;
        if failures == self.max_failures {
            warn!("[strategy] {} failed {} times, skipping it", dialer.addr(), failures);
        } else {
            debug!("[strategy] {} failures: {}", dialer.addr(), failures);
        }
    }
}

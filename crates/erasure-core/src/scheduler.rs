//! Clock/Scheduler abstraction (§9 Design Notes): "mocked `Math.random` /
//! `setTimeout` in tests" becomes an injected `Scheduler` with a virtual-time
//! implementation for tests, rather than real sleeps.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

#[async_trait]
pub trait Scheduler: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
    /// Resolves after `delay`. Implementations may shorten this for tests.
    async fn after(&self, delay: Duration);
}

/// Real wall-clock scheduler used by production binaries.
#[derive(Default)]
pub struct RealTimeScheduler;

#[async_trait]
impl Scheduler for RealTimeScheduler {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }

    async fn after(&self, delay: Duration) {
        tokio::time::sleep(delay).await;
    }
}

/// Test scheduler: `now()` reflects wall-clock (audit timestamps still need
/// to move forward), but `after()` resolves immediately so retry-backoff
/// tests don't block on real delays while the *computed* delay is still
/// asserted against.
#[derive(Default)]
pub struct VirtualScheduler;

#[async_trait]
impl Scheduler for VirtualScheduler {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }

    async fn after(&self, _delay: Duration) {
        tokio::task::yield_now().await;
    }
}

pub type SharedScheduler = Arc<dyn Scheduler>;

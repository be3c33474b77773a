//! Command and query surface the UI layer calls.
//!
//! Services hold injected repositories, never process-wide state, and bound
//! store round trips by the configured request timeout.

pub mod analytics;
pub mod catalog;
pub mod events;
pub mod identity;
pub mod order_engine;

use std::future::Future;
use std::time::Duration;

use crate::{PosError, Result};

pub use analytics::{AnalyticsService, Dashboard};
pub use catalog::CatalogService;
pub use events::{EventSink, LogSink, NatsSink};
pub use identity::{IdentityService, UserUpdate};
pub use order_engine::{OrderEngine, OrderPolicy};

/// Runs `work` under `limit`. Expiry drops the future, which rolls back any open transaction.
///
/// A write whose `COMMIT` is in flight at expiry may still land, so only wrap writes that are
/// safe to repeat. Order inserts run unwrapped in `OrderEngine::commit`.
pub(crate) async fn bounded<T>(limit: Duration, work: impl Future<Output = Result<T>>) -> Result<T> {
    match tokio::time::timeout(limit, work).await {
        Ok(result) => result,
        Err(_) => Err(PosError::Persistence(format!("store did not answer within {}ms", limit.as_millis()))),
    }
}

//! Feed store contract and its backends.
//!
//! A feed store is an append-only collection of telemetry records plus the
//! singleton [`AppInterface`] record. The gateway only relies on the
//! operations below; ordering and read-your-writes consistency are the
//! backend's responsibility.

mod memory;
mod postgres;

pub use memory::MemoryFeedStore;
pub use postgres::{make_pool, PgFeedStore};

use crate::errors::StoreResult;
use crate::model::{AppInterface, NewRecord, TelemetryRecord, Watermark};
use async_trait::async_trait;

#[async_trait]
pub trait FeedStore: Send + Sync {
    /// Load the singleton configuration record, if provisioned.
    async fn app_interface(&self) -> StoreResult<Option<AppInterface>>;

    /// Provision the singleton unless one already exists.
    ///
    /// Returns `true` when the record was created.
    async fn provision_app_interface(&self, iface: &AppInterface) -> StoreResult<bool>;

    /// Update only `api_is_active` on the singleton.
    ///
    /// Returns `false` when there is no singleton to update.
    async fn set_api_active(&self, active: bool) -> StoreResult<bool>;

    /// Append a record. The store assigns `seq` and may raise the timestamp
    /// so it never falls behind the previous record.
    async fn insert(&self, record: NewRecord) -> StoreResult<TelemetryRecord>;

    /// Point lookup by the public identifier.
    async fn find_by_item_id(&self, item_id: &str) -> StoreResult<Option<TelemetryRecord>>;

    /// Every record in insertion order.
    async fn all(&self) -> StoreResult<Vec<TelemetryRecord>>;

    /// Records strictly after `watermark`, ordered by `(timestamp, seq)`.
    async fn newer_than(&self, watermark: Watermark) -> StoreResult<Vec<TelemetryRecord>>;

    async fn health_check(&self) -> StoreResult<bool>;

    /// Backend identifier for logs
    fn backend_type(&self) -> &str;
}

//! Request logic sitting above the feed store.
//!
//! The gateway keeps no state of its own: every call re-reads the singleton
//! configuration from the store, so handlers can run concurrently without
//! coordinating with each other.

use crate::clock::{Clock, SystemClock};
use crate::errors::{Error, Result};
use crate::gate::{self, GatePolicy};
use crate::metrics::{
    INGEST_ACCEPTED_TOTAL, INGEST_REJECTED_TOTAL, RECORDS_SERVED_TOTAL, STORE_LATENCY_SECONDS,
    SYNC_READS_TOTAL,
};
use crate::model::{
    Accepted, AppInterface, AppInterfaceStatus, NewRecord, Snapshot, TelemetryRecord,
};
use crate::store::FeedStore;
use crate::validate::{parse_payload, strip_server_fields, validate};
use std::future::Future;
use std::sync::Arc;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

#[derive(Clone)]
pub struct Gateway {
    store: Arc<dyn FeedStore>,
    clock: Arc<dyn Clock>,
    policy: GatePolicy,
}

impl Gateway {
    pub fn new(store: Arc<dyn FeedStore>, policy: GatePolicy) -> Self {
        Self::with_clock(store, Arc::new(SystemClock), policy)
    }

    pub fn with_clock(store: Arc<dyn FeedStore>, clock: Arc<dyn Clock>, policy: GatePolicy) -> Self {
        Self {
            store,
            clock,
            policy,
        }
    }

    pub fn policy(&self) -> &GatePolicy {
        &self.policy
    }

    pub fn store(&self) -> &Arc<dyn FeedStore> {
        &self.store
    }

    /// Accept one reading through the write gate.
    ///
    /// On success exactly one record was stored; on any rejection none was.
    pub async fn ingest(&self, raw: &[u8], auth_header: Option<&[u8]>) -> Result<Accepted> {
        let result = self.ingest_inner(raw, auth_header).await;
        match &result {
            Ok(accepted) => {
                INGEST_ACCEPTED_TOTAL.inc();
                debug!("Accepted reading {}", accepted.item_id);
            }
            Err(Error::Storage(e)) => {
                INGEST_REJECTED_TOTAL.with_label_values(&["storage_error"]).inc();
                error!("Failed to store reading: {}", e);
            }
            Err(e) => {
                INGEST_REJECTED_TOTAL.with_label_values(&[e.kind()]).inc();
                warn!("Rejected reading: {}", e);
            }
        }
        result
    }

    async fn ingest_inner(&self, raw: &[u8], auth_header: Option<&[u8]>) -> Result<Accepted> {
        let iface = self.load_app_interface().await?;
        let now = self.clock.now();
        gate::check(&iface, auth_header, now, &self.policy)?;

        let mut payload = parse_payload(raw)?;
        validate(&payload, self.policy.validation)?;
        strip_server_fields(&mut payload);

        let record = NewRecord {
            item_id: Uuid::new_v4().to_string(),
            timestamp: now,
            payload,
        };
        let stored = timed(self.store.insert(record)).await?;

        Ok(Accepted {
            item_id: stored.item_id,
            timestamp: stored.timestamp,
        })
    }

    /// Configuration flag plus the whole feed in insertion order.
    pub async fn get_all(&self) -> Result<Snapshot> {
        let iface = self.load_app_interface().await?;
        let data = timed(self.store.all()).await?;
        RECORDS_SERVED_TOTAL.inc_by(data.len() as f64);

        Ok(Snapshot {
            app_interface: AppInterfaceStatus {
                api_is_active: iface.api_is_active,
            },
            total: data.len(),
            data,
        })
    }

    /// Everything stored strictly after the record named by `cursor`.
    pub async fn get_since(&self, cursor: &str) -> Result<Vec<TelemetryRecord>> {
        self.load_app_interface().await?;

        let reference = timed(self.store.find_by_item_id(cursor))
            .await?
            .ok_or_else(|| Error::CursorNotFound(cursor.to_string()))?;
        let watermark = reference.watermark();

        let records = timed(self.store.newer_than(watermark)).await?;
        SYNC_READS_TOTAL.inc();
        RECORDS_SERVED_TOTAL.inc_by(records.len() as f64);
        debug!(
            "Sync from {} (watermark {}) returned {} records",
            cursor,
            watermark.timestamp,
            records.len()
        );

        Ok(records)
    }

    /// Flip the activation flag, leaving every other field untouched.
    pub async fn set_active(&self, active: bool) -> Result<()> {
        self.load_app_interface().await?;

        if !timed(self.store.set_api_active(active)).await? {
            return Err(Error::ConfigurationMissing);
        }
        info!("API activation set to {}", active);
        Ok(())
    }

    /// Create the singleton if it does not exist yet. Existing configuration
    /// is never overwritten.
    pub async fn provision(&self, iface: &AppInterface) -> Result<bool> {
        let created = self.store.provision_app_interface(iface).await?;
        if created {
            info!(
                "Provisioned app interface (active={}, key configured={})",
                iface.api_is_active,
                iface.key.is_some()
            );
        } else {
            info!("App interface already provisioned, leaving it unchanged");
        }
        Ok(created)
    }

    async fn load_app_interface(&self) -> Result<AppInterface> {
        timed(self.store.app_interface())
            .await?
            .ok_or(Error::ConfigurationMissing)
    }
}

async fn timed<T>(call: impl Future<Output = T>) -> T {
    let start = Instant::now();
    let output = call.await;
    STORE_LATENCY_SECONDS.observe(start.elapsed().as_secs_f64());
    output
}

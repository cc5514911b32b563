use super::FeedStore;
use crate::errors::StoreResult;
use crate::model::{AppInterface, NewRecord, TelemetryRecord, Watermark};
use async_trait::async_trait;
use parking_lot::RwLock;
use std::collections::HashMap;

#[derive(Default)]
struct Inner {
    app_interface: Option<AppInterface>,
    records: Vec<TelemetryRecord>,
    by_item_id: HashMap<String, usize>,
}

/// Process-local feed store. Records live in a vector in insertion order;
/// `seq` is the position plus one.
#[derive(Default)]
pub struct MemoryFeedStore {
    inner: RwLock<Inner>,
}

impl MemoryFeedStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_app_interface(iface: AppInterface) -> Self {
        let store = Self::new();
        store.inner.write().app_interface = Some(iface);
        store
    }

    /// Replace or remove the singleton wholesale.
    pub fn replace_app_interface(&self, iface: Option<AppInterface>) {
        self.inner.write().app_interface = iface;
    }

    pub fn len(&self) -> usize {
        self.inner.read().records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl FeedStore for MemoryFeedStore {
    async fn app_interface(&self) -> StoreResult<Option<AppInterface>> {
        Ok(self.inner.read().app_interface.clone())
    }

    async fn provision_app_interface(&self, iface: &AppInterface) -> StoreResult<bool> {
        let mut inner = self.inner.write();
        if inner.app_interface.is_some() {
            return Ok(false);
        }
        inner.app_interface = Some(iface.clone());
        Ok(true)
    }

    async fn set_api_active(&self, active: bool) -> StoreResult<bool> {
        match self.inner.write().app_interface.as_mut() {
            Some(iface) => {
                iface.api_is_active = active;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn insert(&self, record: NewRecord) -> StoreResult<TelemetryRecord> {
        let mut inner = self.inner.write();

        let timestamp = match inner.records.last() {
            Some(last) if last.timestamp > record.timestamp => last.timestamp,
            _ => record.timestamp,
        };
        let stored = TelemetryRecord {
            item_id: record.item_id,
            timestamp,
            seq: inner.records.len() as i64 + 1,
            payload: record.payload,
        };

        let index = inner.records.len();
        inner.by_item_id.insert(stored.item_id.clone(), index);
        inner.records.push(stored.clone());

        Ok(stored)
    }

    async fn find_by_item_id(&self, item_id: &str) -> StoreResult<Option<TelemetryRecord>> {
        let inner = self.inner.read();
        Ok(inner
            .by_item_id
            .get(item_id)
            .map(|&index| inner.records[index].clone()))
    }

    async fn all(&self) -> StoreResult<Vec<TelemetryRecord>> {
        Ok(self.inner.read().records.clone())
    }

    async fn newer_than(&self, watermark: Watermark) -> StoreResult<Vec<TelemetryRecord>> {
        let inner = self.inner.read();
        // Records are already in (timestamp, seq) order, so everything after
        // the first match qualifies.
        let start = inner
            .records
            .partition_point(|record| !watermark.precedes(record));
        Ok(inner.records[start..].to_vec())
    }

    async fn health_check(&self) -> StoreResult<bool> {
        Ok(true)
    }

    fn backend_type(&self) -> &str {
        "memory"
    }
}

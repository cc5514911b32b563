use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Fixed identity of the singleton configuration record.
pub const APP_INTERFACE_ID: &str = "app_interface";

/// Open key/value body of a reading.
pub type Payload = Map<String, Value>;

/// Administrative record controlling the write gate
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, sqlx::FromRow)]
pub struct AppInterface {
    pub id: String,
    pub api_is_active: bool,
    pub key: Option<String>,
    pub api_shutdown_at: Option<DateTime<Utc>>,
}

impl AppInterface {
    pub fn new(api_is_active: bool, key: Option<String>) -> Self {
        Self {
            id: APP_INTERFACE_ID.to_string(),
            api_is_active,
            key,
            api_shutdown_at: None,
        }
    }

    pub fn with_shutdown_at(mut self, at: DateTime<Utc>) -> Self {
        self.api_shutdown_at = Some(at);
        self
    }

    /// A shutdown instant that is not in the future closes the write path.
    pub fn is_shut_down(&self, now: DateTime<Utc>) -> bool {
        self.api_shutdown_at.is_some_and(|at| at <= now)
    }
}

/// Stored sensor reading.
///
/// `seq` is the store's insertion ordinal. It breaks ties between readings
/// stamped in the same instant and never leaves the process.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TelemetryRecord {
    pub item_id: String,
    pub timestamp: DateTime<Utc>,
    #[serde(skip)]
    pub seq: i64,
    #[serde(flatten)]
    pub payload: Payload,
}

impl TelemetryRecord {
    pub fn watermark(&self) -> Watermark {
        Watermark {
            timestamp: self.timestamp,
            seq: self.seq,
        }
    }
}

/// Reading stamped by the gateway, before the store assigns `seq`.
#[derive(Debug, Clone, PartialEq)]
pub struct NewRecord {
    pub item_id: String,
    pub timestamp: DateTime<Utc>,
    pub payload: Payload,
}

/// Exclusive lower bound of an incremental read.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct Watermark {
    pub timestamp: DateTime<Utc>,
    pub seq: i64,
}

impl Watermark {
    pub fn precedes(&self, record: &TelemetryRecord) -> bool {
        *self < record.watermark()
    }
}

/// Response to an accepted write
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Accepted {
    pub item_id: String,
    pub timestamp: DateTime<Utc>,
}

/// REST API response wrapper
#[derive(Debug, Serialize)]
pub struct TelemetryResponse {
    pub data: Vec<TelemetryRecord>,
    pub total: usize,
}

impl From<Vec<TelemetryRecord>> for TelemetryResponse {
    fn from(data: Vec<TelemetryRecord>) -> Self {
        let total = data.len();
        Self { data, total }
    }
}

/// Public view of the configuration; the shared key never leaves the server.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AppInterfaceStatus {
    pub api_is_active: bool,
}

/// Dashboard snapshot: configuration flag plus the whole feed.
#[derive(Debug, Serialize)]
pub struct Snapshot {
    pub app_interface: AppInterfaceStatus,
    pub data: Vec<TelemetryRecord>,
    pub total: usize,
}

#[derive(Debug, Clone, Deserialize)]
pub struct UpdateAppInterface {
    pub api_is_active: bool,
}

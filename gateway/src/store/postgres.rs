use super::FeedStore;
use crate::errors::{StoreError, StoreResult};
use crate::metrics::STORE_RETRIES_TOTAL;
use crate::model::{AppInterface, NewRecord, Payload, TelemetryRecord, Watermark, APP_INTERFACE_ID};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value;
use sqlx::postgres::{PgPool, PgPoolOptions};
use sqlx::types::Json;
use std::time::Duration;
use tracing::{error, info, warn};

const MAX_INSERT_ATTEMPTS: u32 = 5;
const UNIQUE_VIOLATION: &str = "23505";
/// Advisory lock key held by every telemetry insert.
const INSERT_LOCK_KEY: i64 = 0x7465_6c65_6d65_7472;

pub async fn make_pool(database_url: &str) -> StoreResult<PgPool> {
    info!("Connecting to database...");
    let pool = PgPoolOptions::new()
        .max_connections(20)
        .acquire_timeout(Duration::from_secs(10))
        .connect(database_url)
        .await?;

    info!("Database connection established");
    info!("Running database migrations...");
    sqlx::migrate!("./migrations").run(&pool).await?;
    info!("Migrations completed");

    Ok(pool)
}

#[derive(sqlx::FromRow)]
struct RecordRow {
    seq: i64,
    item_id: String,
    ts: DateTime<Utc>,
    payload: Json<Value>,
}

impl TryFrom<RecordRow> for TelemetryRecord {
    type Error = StoreError;

    fn try_from(row: RecordRow) -> StoreResult<Self> {
        let payload: Payload = match row.payload.0 {
            Value::Object(map) => map,
            other => {
                return Err(StoreError::Corrupt(format!(
                    "payload of {} is not an object: {}",
                    row.item_id, other
                )))
            }
        };

        Ok(TelemetryRecord {
            item_id: row.item_id,
            timestamp: row.ts,
            seq: row.seq,
            payload,
        })
    }
}

fn into_records(rows: Vec<RecordRow>) -> StoreResult<Vec<TelemetryRecord>> {
    rows.into_iter().map(TelemetryRecord::try_from).collect()
}

/// Feed store backed by the `telemetry` and `app_interface` tables.
#[derive(Debug, Clone)]
pub struct PgFeedStore {
    pool: PgPool,
}

impl PgFeedStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    async fn insert_inner(&self, record: &NewRecord) -> StoreResult<TelemetryRecord> {
        // Inserts run one at a time: a row's `seq` is drawn, its timestamp
        // clamped and the row committed before the next writer starts. So a
        // reader never sees a row while a lower (ts, seq) is still pending.
        let mut tx = self.pool.begin().await?;
        sqlx::query("SELECT pg_advisory_xact_lock($1)")
            .bind(INSERT_LOCK_KEY)
            .execute(&mut *tx)
            .await?;

        // The stored timestamp is raised to the current maximum so it never
        // falls behind an earlier insert.
        let query = r#"
            INSERT INTO telemetry (item_id, ts, payload)
            VALUES ($1, GREATEST($2, COALESCE((SELECT MAX(ts) FROM telemetry), $2)), $3)
            RETURNING seq, item_id, ts, payload
            "#;

        let row = sqlx::query_as::<_, RecordRow>(query)
            .bind(&record.item_id)
            .bind(record.timestamp)
            .bind(Json(&record.payload))
            .fetch_one(&mut *tx)
            .await?;
        tx.commit().await?;

        row.try_into()
    }
}

#[async_trait]
impl FeedStore for PgFeedStore {
    async fn app_interface(&self) -> StoreResult<Option<AppInterface>> {
        let iface = sqlx::query_as::<_, AppInterface>(
            "SELECT id, api_is_active, key, api_shutdown_at FROM app_interface WHERE id = $1",
        )
        .bind(APP_INTERFACE_ID)
        .fetch_optional(&self.pool)
        .await?;

        Ok(iface)
    }

    async fn provision_app_interface(&self, iface: &AppInterface) -> StoreResult<bool> {
        let result = sqlx::query(
            r#"
            INSERT INTO app_interface (id, api_is_active, key, api_shutdown_at)
            VALUES ($1, $2, $3, $4)
            ON CONFLICT (id) DO NOTHING
            "#,
        )
        .bind(APP_INTERFACE_ID)
        .bind(iface.api_is_active)
        .bind(&iface.key)
        .bind(iface.api_shutdown_at)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() == 1)
    }

    async fn set_api_active(&self, active: bool) -> StoreResult<bool> {
        let result = sqlx::query("UPDATE app_interface SET api_is_active = $1 WHERE id = $2")
            .bind(active)
            .bind(APP_INTERFACE_ID)
            .execute(&self.pool)
            .await?;

        Ok(result.rows_affected() > 0)
    }

    async fn insert(&self, record: NewRecord) -> StoreResult<TelemetryRecord> {
        let mut attempts = 0;

        loop {
            attempts += 1;
            match self.insert_inner(&record).await {
                Ok(stored) => return Ok(stored),
                Err(StoreError::Database(db_err)) => {
                    // An earlier attempt may have committed before its
                    // connection dropped.
                    if attempts > 1 && is_unique_violation(&db_err) {
                        if let Some(stored) = self.find_by_item_id(&record.item_id).await? {
                            return Ok(stored);
                        }
                    }

                    if attempts >= MAX_INSERT_ATTEMPTS || !is_transient_error(&db_err) {
                        error!(
                            "Database insert failed permanently after {} attempts: {}",
                            attempts, db_err
                        );
                        return Err(StoreError::Database(db_err));
                    }

                    let wait_ms = 100 * 2_u64.pow(attempts - 1).min(32);
                    warn!(
                        "Database insert failed (attempt {}/{}), retrying in {}ms: {}",
                        attempts, MAX_INSERT_ATTEMPTS, wait_ms, db_err
                    );
                    STORE_RETRIES_TOTAL.inc();
                    tokio::time::sleep(Duration::from_millis(wait_ms)).await;
                }
                Err(e) => {
                    error!("Database insert failed with non-database error: {}", e);
                    return Err(e);
                }
            }
        }
    }

    async fn find_by_item_id(&self, item_id: &str) -> StoreResult<Option<TelemetryRecord>> {
        let row = sqlx::query_as::<_, RecordRow>(
            "SELECT seq, item_id, ts, payload FROM telemetry WHERE item_id = $1",
        )
        .bind(item_id)
        .fetch_optional(&self.pool)
        .await?;

        row.map(TelemetryRecord::try_from).transpose()
    }

    async fn all(&self) -> StoreResult<Vec<TelemetryRecord>> {
        let rows = sqlx::query_as::<_, RecordRow>(
            "SELECT seq, item_id, ts, payload FROM telemetry ORDER BY seq",
        )
        .fetch_all(&self.pool)
        .await?;

        into_records(rows)
    }

    async fn newer_than(&self, watermark: Watermark) -> StoreResult<Vec<TelemetryRecord>> {
        // note: a strict `>` is only gap-free because inserts commit in seq
        // order (see insert_inner). Without the insert lock a follower could
        // step past a lower seq that commits later.
        let rows = sqlx::query_as::<_, RecordRow>(
            r#"
            SELECT seq, item_id, ts, payload
            FROM telemetry
            WHERE (ts, seq) > ($1, $2)
            ORDER BY ts, seq
            "#,
        )
        .bind(watermark.timestamp)
        .bind(watermark.seq)
        .fetch_all(&self.pool)
        .await?;

        into_records(rows)
    }

    async fn health_check(&self) -> StoreResult<bool> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(true)
    }

    fn backend_type(&self) -> &str {
        "postgres"
    }
}

fn is_unique_violation(err: &sqlx::Error) -> bool {
    match err {
        sqlx::Error::Database(db_err) => db_err.code().is_some_and(|code| code == UNIQUE_VIOLATION),
        _ => false,
    }
}

fn is_transient_error(err: &sqlx::Error) -> bool {
    match err {
        sqlx::Error::PoolTimedOut | sqlx::Error::Io(_) | sqlx::Error::PoolClosed => true,
        sqlx::Error::Database(db_err) => {
            db_err.code().is_some_and(|code| {
                code == "08000" || // connection_exception
                code == "08003" || // connection_does_not_exist
                code == "08006" || // connection_failure
                code == "57P03" || // cannot_connect_now
                code == "53300" // too_many_connections
            })
        }
        _ => false,
    }
}

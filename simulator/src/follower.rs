use anyhow::{bail, Context, Result};
use reqwest::{Client, StatusCode};
use serde::Deserialize;
use serde_json::Value;
use std::time::Duration;
use tracing::{debug, info, warn};

#[derive(Debug, Deserialize)]
struct FeedPage {
    data: Vec<Value>,
}

#[derive(Debug, Deserialize)]
struct ErrorBody {
    error: ErrorDetail,
}

#[derive(Debug, Deserialize)]
struct ErrorDetail {
    kind: String,
    message: String,
}

enum Poll {
    Records(Vec<Value>),
    CursorLost,
}

/// Replays the gateway feed, resuming from the last record seen.
pub struct Follower {
    client: Client,
    base_url: String,
    cursor: Option<String>,
    received: u64,
}

impl Follower {
    pub fn new(client: Client, base_url: String) -> Self {
        Self {
            client,
            base_url,
            cursor: None,
            received: 0,
        }
    }

    pub async fn run(mut self, interval: Duration) -> Result<()> {
        info!("Following {} every {:?}", self.base_url, interval);

        loop {
            let records = match self.cursor.clone() {
                None => self.snapshot().await?,
                Some(cursor) => match self.since(&cursor).await? {
                    Poll::Records(records) => records,
                    Poll::CursorLost => {
                        warn!("Cursor {} no longer known, restarting from snapshot", cursor);
                        self.cursor = None;
                        continue;
                    }
                },
            };

            self.consume(records);
            tokio::time::sleep(interval).await;
        }
    }

    fn consume(&mut self, records: Vec<Value>) {
        if records.is_empty() {
            debug!("No new records");
            return;
        }

        for record in &records {
            debug!("Record: {}", record);
        }
        self.received += records.len() as u64;

        if let Some(id) = records
            .last()
            .and_then(|record| record["item_id"].as_str())
        {
            self.cursor = Some(id.to_string());
        }
        info!(
            "Received {} new records ({} total), cursor at {:?}",
            records.len(),
            self.received,
            self.cursor
        );
    }

    async fn snapshot(&self) -> Result<Vec<Value>> {
        let response = self
            .client
            .get(format!("{}/get-data", self.base_url))
            .send()
            .await
            .context("Failed to request snapshot")?;

        if !response.status().is_success() {
            let status = response.status();
            let detail = describe_error(response).await;
            bail!("Snapshot failed with {}: {}", status, detail);
        }

        let page: FeedPage = response.json().await.context("Invalid snapshot body")?;
        info!("Snapshot returned {} records", page.data.len());
        Ok(page.data)
    }

    async fn since(&self, cursor: &str) -> Result<Poll> {
        let response = self
            .client
            .get(format!("{}/get-data/{}", self.base_url, cursor))
            .send()
            .await
            .context("Failed to request records since cursor")?;

        let status = response.status();
        if status.is_success() {
            let page: FeedPage = response.json().await.context("Invalid sync body")?;
            return Ok(Poll::Records(page.data));
        }

        let body = response.json::<ErrorBody>().await.ok();
        match body {
            Some(body) if status == StatusCode::NOT_FOUND && body.error.kind == "cursor_not_found" => {
                Ok(Poll::CursorLost)
            }
            Some(body) => bail!("Sync failed with {}: {}", status, body.error.message),
            None => bail!("Sync failed with {}", status),
        }
    }
}

async fn describe_error(response: reqwest::Response) -> String {
    match response.json::<ErrorBody>().await {
        Ok(body) => format!("{} ({})", body.error.message, body.error.kind),
        Err(_) => "no error body".to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_consume_advances_cursor_to_last_record() {
        let mut follower = Follower::new(Client::new(), "http://localhost:8000".to_string());
        follower.consume(vec![json!({"item_id": "a"}), json!({"item_id": "b"})]);

        assert_eq!(follower.cursor.as_deref(), Some("b"));
        assert_eq!(follower.received, 2);

        follower.consume(Vec::new());
        assert_eq!(follower.cursor.as_deref(), Some("b"));
    }

    #[test]
    fn test_error_body_shape() {
        let body: ErrorBody = serde_json::from_value(json!({
            "error": {"kind": "cursor_not_found", "message": "Cursor item x not found"}
        }))
        .unwrap();
        assert_eq!(body.error.kind, "cursor_not_found");
    }
}

mod follower;
mod telemetry;

use anyhow::Result;
use clap::{Args, Parser, Subcommand};
use follower::Follower;
use reqwest::Client;
use std::time::Duration;
use telemetry::Reading;
use tracing::{error, info, warn};

#[derive(Debug, Parser)]
#[command(name = "simulator", about = "Device simulator and feed follower for the telemetry gateway")]
struct Cli {
    /// Base URL of the gateway
    #[arg(long, env = "GATEWAY_URL", default_value = "http://localhost:8000", global = true)]
    gateway_url: String,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Push random readings to /add-data
    Push(PushArgs),
    /// Replay the feed incrementally from /get-data
    Follow(FollowArgs),
}

#[derive(Debug, Args)]
struct PushArgs {
    /// Readings per second
    #[arg(long, env = "RATE", default_value_t = 10)]
    rate: u64,

    #[arg(long, env = "DEVICES", default_value_t = 5)]
    devices: usize,

    /// Bearer key sent with every reading
    #[arg(long, env = "API_KEY")]
    api_key: Option<String>,

    /// Stop after this many readings
    #[arg(long)]
    count: Option<u64>,
}

#[derive(Debug, Args)]
struct FollowArgs {
    /// Poll interval in milliseconds
    #[arg(long, env = "POLL_MS", default_value_t = 1000)]
    poll_ms: u64,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let client = Client::builder().timeout(Duration::from_secs(10)).build()?;
    let base_url = cli.gateway_url.trim_end_matches('/').to_string();

    match cli.command {
        Command::Push(args) => push(client, base_url, args).await,
        Command::Follow(args) => {
            Follower::new(client, base_url)
                .run(Duration::from_millis(args.poll_ms))
                .await
        }
    }
}

/// Tick period for a given rate. `tokio::time::interval` rejects a zero period.
fn push_interval(rate: u64) -> Duration {
    Duration::from_micros(1_000_000 / rate.max(1)).max(Duration::from_micros(1))
}

async fn push(client: Client, base_url: String, args: PushArgs) -> Result<()> {
    let rate = args.rate.max(1);
    let devices = args.devices.max(1);
    let interval = push_interval(rate);
    let url = format!("{}/add-data", base_url);

    info!(
        "Pushing to {}: rate {} readings/s, devices {}, key configured: {}",
        url,
        rate,
        devices,
        args.api_key.is_some()
    );

    let mut rng = rand::thread_rng();
    let mut ticker = tokio::time::interval(interval);
    let mut counter = 0u64;
    let mut rejected = 0u64;

    loop {
        if args.count.is_some_and(|count| counter + rejected >= count) {
            break;
        }
        ticker.tick().await;

        let device_id = format!("dev-{}", (counter + rejected) % devices as u64);
        let reading = Reading::random(&mut rng, device_id);

        let mut request = client.post(&url).json(&reading);
        if let Some(key) = &args.api_key {
            request = request.bearer_auth(key);
        }

        match request.send().await {
            Ok(response) if response.status().is_success() => {
                counter += 1;
                if counter % 100 == 0 {
                    info!("Pushed {} readings ({} rejected)", counter, rejected);
                }
            }
            Ok(response) => {
                rejected += 1;
                let status = response.status();
                let body = response.text().await.unwrap_or_default();
                warn!("Reading rejected with {}: {}", status, body);
            }
            Err(e) => {
                rejected += 1;
                error!("Failed to send reading: {}", e);
                tokio::time::sleep(Duration::from_secs(1)).await;
            }
        }
    }

    info!("Done: {} pushed, {} rejected", counter, rejected);
    Ok(())
}

use lazy_static::lazy_static;
use prometheus::{
    Counter, CounterVec, Encoder, Histogram, HistogramOpts, Opts, Registry, TextEncoder,
};

lazy_static! {
    pub static ref REGISTRY: Registry = Registry::new();
    pub static ref INGEST_ACCEPTED_TOTAL: Counter = Counter::with_opts(Opts::new(
        "gateway_ingest_accepted_total",
        "Total readings accepted and stored"
    ))
    .unwrap();
    pub static ref INGEST_REJECTED_TOTAL: CounterVec = CounterVec::new(
        Opts::new(
            "gateway_ingest_rejected_total",
            "Total readings rejected, by rejection kind"
        ),
        &["kind"]
    )
    .unwrap();
    pub static ref SYNC_READS_TOTAL: Counter = Counter::with_opts(Opts::new(
        "gateway_sync_reads_total",
        "Total incremental sync reads served"
    ))
    .unwrap();
    pub static ref RECORDS_SERVED_TOTAL: Counter = Counter::with_opts(Opts::new(
        "gateway_records_served_total",
        "Total records returned by snapshot and sync reads"
    ))
    .unwrap();
    pub static ref STORE_RETRIES_TOTAL: Counter = Counter::with_opts(Opts::new(
        "gateway_store_retries_total",
        "Total transient store failures that were retried"
    ))
    .unwrap();
    pub static ref STORE_LATENCY_SECONDS: Histogram = Histogram::with_opts(
        HistogramOpts::new(
            "gateway_store_latency_seconds",
            "Time taken by feed store calls"
        )
        .buckets(vec![
            0.0005, 0.001, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5
        ])
    )
    .unwrap();
}

pub fn init_metrics() -> prometheus::Result<()> {
    REGISTRY.register(Box::new(INGEST_ACCEPTED_TOTAL.clone()))?;
    REGISTRY.register(Box::new(INGEST_REJECTED_TOTAL.clone()))?;
    REGISTRY.register(Box::new(SYNC_READS_TOTAL.clone()))?;
    REGISTRY.register(Box::new(RECORDS_SERVED_TOTAL.clone()))?;
    REGISTRY.register(Box::new(STORE_RETRIES_TOTAL.clone()))?;
    REGISTRY.register(Box::new(STORE_LATENCY_SECONDS.clone()))?;
    Ok(())
}

pub fn gather_metrics() -> String {
    let encoder = TextEncoder::new();
    let metric_families = REGISTRY.gather();
    let mut buffer = Vec::new();
    if let Err(e) = encoder.encode(&metric_families, &mut buffer) {
        tracing::error!("Failed to encode metrics: {}", e);
        return String::new();
    }
    String::from_utf8_lossy(&buffer).into_owned()
}

use anyhow::{Context, Result};
use metrics::{describe_counter, describe_gauge, describe_histogram};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use once_cell::sync::OnceCell;

pub struct Metrics {
    pub handle: PrometheusHandle,
}

impl Metrics {
    /// Install the Prometheus recorder and describe every series.
    pub fn init() -> Result<Self> {
        let handle = PrometheusBuilder::new()
            .install_recorder()
            .context("prometheus: install recorder")?;
        describe_all();
        Ok(Self { handle })
    }
}

/// One-time metrics registration (so series show up on /metrics).
pub fn describe_all() {
    static ONCE: OnceCell<()> = OnceCell::new();
    ONCE.get_or_init(|| {
        describe_counter!("poll_cycles_total", "Poll cycles started, all users.");
        describe_counter!("listings_found_total", "Distinct listings seen per cycle, summed.");
        describe_counter!("listings_new_total", "Listings not yet announced to their user.");
        describe_counter!(
            "notifications_sent_total",
            "Listing notifications delivered, by kind (photo, text, text_fallback)."
        );
        describe_counter!("notifications_failed_total", "Listing notifications given up on.");
        describe_counter!(
            "notifications_rate_limited_total",
            "Sends answered with a rate-limit signal."
        );
        describe_counter!("source_errors_total", "Listing source fetch/parse errors.");
        describe_counter!("store_errors_total", "Failed durable seen-set writes.");
        describe_gauge!("poll_tasks_running", "Poll tasks currently owned by the registry.");
        describe_histogram!("source_fetch_ms", "Listing source fetch time in milliseconds.");
        describe_histogram!("source_parse_ms", "HTML parse time in milliseconds.");
    });
}

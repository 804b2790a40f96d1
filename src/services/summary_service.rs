// Daily Summary
// Purpose: One structured digest of the last 24 hours, logged at 08:00
// UTC. Alert transports are adapters outside the core; the digest is the
// payload they would carry.

use chrono::Utc;
use std::future::Future;
use std::pin::Pin;

use crate::models::TimeWindow;
use crate::services::event_store::EventStore;
use crate::services::fingerprint_store::FingerprintStore;
use crate::services::hotspot_detector;
use crate::services::metric_store::MetricStore;
use crate::utils::scheduled_executor::{JobContext, ScheduledTask};
use crate::utils::MonitorResult;

#[derive(Clone)]
pub struct SummaryService {
    metrics: MetricStore,
    fingerprints: FingerprintStore,
    events: EventStore,
}

impl SummaryService {
    pub fn new(metrics: MetricStore, fingerprints: FingerprintStore, events: EventStore) -> Self {
        Self { metrics, fingerprints, events }
    }

    pub async fn daily_digest(&self, config: &crate::config::MonitorConfig) -> MonitorResult<()> {
        let now = Utc::now();
        let since = now - chrono::Duration::hours(24);

        let samples_appended = self.metrics.count_samples_since(since).await?;
        let new_fingerprints = self.fingerprints.count_created_since(since).await?;
        let open_by_severity = self.events.open_counts_by_severity().await?;

        let window = TimeWindow::new(since, now);
        let samples = self.metrics.samples_in_window(window).await?;
        let ids: Vec<i64> = {
            let mut ids: Vec<i64> = samples.iter().map(|s| s.fingerprint_id).collect();
            ids.sort_unstable();
            ids.dedup();
            ids
        };
        let metadata = self.fingerprints.load_map(&ids).await?;
        let open_regressions = self.events.open_event_fingerprints().await?;
        let candidates =
            hotspot_detector::aggregate_candidates(&samples, &metadata, &open_regressions);
        let mut rules = config.hotspots.clone();
        rules.top_n = 5;
        let top = hotspot_detector::detect(candidates, &rules);

        let mut open_events = open_by_severity
            .iter()
            .map(|(severity, count)| format!("{}={}", severity, count))
            .collect::<Vec<_>>()
            .join(" ");
        if open_events.is_empty() {
            open_events = "none".to_string();
        }

        tracing::info!(
            samples_24h = samples_appended,
            new_fingerprints_24h = new_fingerprints,
            fingerprints_seen_24h = ids.len(),
            open_events = %open_events,
            "Daily summary"
        );

        for hotspot in &top {
            tracing::info!(
                rank = hotspot.rank,
                fingerprint_id = hotspot.fingerprint_id,
                instance = %hotspot.instance_name,
                database = %hotspot.database_name,
                metric = %hotspot.metric,
                value = hotspot.value,
                percent = hotspot.percent_of_total,
                "Daily summary: top hotspot"
            );
        }

        Ok(())
    }
}

pub struct DailySummaryJob {
    summary: SummaryService,
}

impl DailySummaryJob {
    pub fn new(summary: SummaryService) -> Self {
        Self { summary }
    }
}

impl ScheduledTask for DailySummaryJob {
    fn name(&self) -> &str {
        "daily-summary"
    }

    fn run(&self, ctx: JobContext) -> Pin<Box<dyn Future<Output = MonitorResult<()>> + Send + '_>> {
        Box::pin(async move { self.summary.daily_digest(&ctx.config).await })
    }
}

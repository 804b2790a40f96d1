//! Analysis Job
//!
//! One scheduled cycle: run the regression detector, rank hotspots over the
//! same window, and hand severe open regressions to the remediation path.

use chrono::Utc;
use std::future::Future;
use std::pin::Pin;

use crate::models::{Severity, TimeWindow};
use crate::services::event_store::EventStore;
use crate::services::fingerprint_store::FingerprintStore;
use crate::services::hotspot_detector;
use crate::services::metric_store::MetricStore;
use crate::services::regression_detector::RegressionDetector;
use crate::services::remediation_service::RemediationService;
use crate::utils::scheduled_executor::{JobContext, ScheduledTask};
use crate::utils::MonitorResult;

pub struct AnalysisJob {
    detector: RegressionDetector,
    metrics: MetricStore,
    fingerprints: FingerprintStore,
    events: EventStore,
    remediation: RemediationService,
}

impl AnalysisJob {
    pub fn new(
        detector: RegressionDetector,
        metrics: MetricStore,
        fingerprints: FingerprintStore,
        events: EventStore,
        remediation: RemediationService,
    ) -> Self {
        Self { detector, metrics, fingerprints, events, remediation }
    }

    async fn execute(&self, ctx: JobContext) -> MonitorResult<()> {
        let config = ctx.config;
        let now = Utc::now();

        let outcome = self.detector.run(&config, now, &ctx.cancel).await?;

        // Hotspot ranking over the same recent window
        let window = TimeWindow::trailing(
            now,
            chrono::Duration::seconds(config.analysis.recent_window_secs as i64),
        );
        let samples = self.metrics.samples_in_window(window).await?;
        let ids: Vec<i64> = {
            let mut ids: Vec<i64> = samples.iter().map(|s| s.fingerprint_id).collect();
            ids.sort_unstable();
            ids.dedup();
            ids
        };
        let metadata = self.fingerprints.load_map(&ids).await?;
        let open_regressions = self.events.open_event_fingerprints().await?;

        let candidates = hotspot_detector::aggregate_candidates(&samples, &metadata, &open_regressions);
        let hotspots = hotspot_detector::detect(candidates, &config.hotspots);

        for hotspot in &hotspots {
            tracing::debug!(
                rank = hotspot.rank,
                fingerprint_id = hotspot.fingerprint_id,
                metric = %hotspot.metric,
                value = hotspot.value,
                percent = hotspot.percent_of_total,
                also_regressed = hotspot.also_regressed,
                "Hotspot"
            );
        }
        tracing::info!(hotspots = hotspots.len(), "Hotspot ranking complete");

        // Remediation path: severe regressions only, and only when the
        // feature is switched on at all
        if config.security.enable_remediation {
            for event in &outcome.regressed_events {
                if event.severity < Severity::High {
                    continue;
                }
                let Some(fingerprint) = self.fingerprints.get(event.fingerprint_id).await? else {
                    continue;
                };
                let Some(request) = self.remediation.propose_for_event(event, &fingerprint) else {
                    continue;
                };
                tracing::info!(
                    fingerprint_id = event.fingerprint_id,
                    instance = %request.instance_name,
                    database = %request.database_name,
                    statement = %request.statement,
                    severity = %event.severity,
                    "Remediation proposed"
                );
                self.remediation.attempt(&request, &config).await?;
            }
        }

        Ok(())
    }
}

impl ScheduledTask for AnalysisJob {
    fn name(&self) -> &str {
        "analysis"
    }

    fn run(&self, ctx: JobContext) -> Pin<Box<dyn Future<Output = MonitorResult<()>> + Send + '_>> {
        Box::pin(self.execute(ctx))
    }
}

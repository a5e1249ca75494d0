//! Per-agent run metrics.
//!
//! Every agent run (workflow node or direct flow step) is recorded with its
//! duration and outcome. Records are kept for a bounded window and count, and
//! summarized on demand into success rates and latency percentiles.

use std::collections::{BTreeMap, VecDeque};
use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::time::Instant;
use tracing::debug;

use tabula_core::clock::Clock;
use tabula_core::domain::agent::{AgentKind, AgentResponse};

use crate::capability::AgentError;

pub const DEFAULT_MAX_RECORDS: usize = 10_000;
pub const DEFAULT_RETENTION_HOURS: i64 = 24;
const RECENT_ERRORS: usize = 10;

/// One finished agent run, before it is timestamped.
#[derive(Clone, Debug, PartialEq)]
pub struct AgentRun {
    pub agent: AgentKind,
    pub operation: &'static str,
    pub duration: Duration,
    pub success: bool,
    pub error: Option<String>,
    pub row_count: usize,
}

impl AgentRun {
    pub fn succeeded(agent: AgentKind, operation: &'static str, duration: Duration, row_count: usize) -> Self {
        Self { agent, operation, duration, success: true, error: None, row_count }
    }

    pub fn failed(agent: AgentKind, operation: &'static str, duration: Duration, error: impl Into<String>) -> Self {
        Self { agent, operation, duration, success: false, error: Some(error.into()), row_count: 0 }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AgentMetric {
    pub recorded_at: DateTime<Utc>,
    pub agent: AgentKind,
    pub operation: &'static str,
    pub duration_ms: u64,
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub row_count: usize,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GroupSummary {
    pub runs: usize,
    pub success_rate_pct: f64,
    pub avg_duration_ms: f64,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RecentError {
    pub recorded_at: DateTime<Utc>,
    pub agent: AgentKind,
    pub error: String,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MetricsSummary {
    pub total_runs: usize,
    pub success_rate_pct: f64,
    pub error_rate_pct: f64,
    pub avg_duration_ms: f64,
    pub p50_duration_ms: u64,
    pub p95_duration_ms: u64,
    pub p99_duration_ms: u64,
    pub by_agent: BTreeMap<String, GroupSummary>,
    pub by_operation: BTreeMap<String, GroupSummary>,
    /// Latest failures, oldest first.
    pub recent_errors: Vec<RecentError>,
}

/// Runs over the last minute.
#[derive(Clone, Debug, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RealtimeStats {
    pub runs_per_minute: usize,
    pub avg_duration_ms: f64,
    pub error_count: usize,
}

pub struct MetricsCollector {
    records: Mutex<VecDeque<AgentMetric>>,
    clock: Arc<dyn Clock>,
    max_records: usize,
    retention: chrono::Duration,
}

impl MetricsCollector {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self::with_limits(clock, DEFAULT_MAX_RECORDS, chrono::Duration::hours(DEFAULT_RETENTION_HOURS))
    }

    pub fn with_limits(clock: Arc<dyn Clock>, max_records: usize, retention: chrono::Duration) -> Self {
        Self { records: Mutex::new(VecDeque::new()), clock, max_records: max_records.max(1), retention }
    }

    pub fn record(&self, run: AgentRun) {
        let duration_ms = u64::try_from(run.duration.as_millis()).unwrap_or(u64::MAX);
        debug!(
            event_name = "agent.metrics.recorded",
            agent = %run.agent,
            operation = run.operation,
            duration_ms,
            success = run.success,
            rows = run.row_count,
            "agent run recorded"
        );

        let metric = AgentMetric {
            recorded_at: self.clock.now(),
            agent: run.agent,
            operation: run.operation,
            duration_ms,
            success: run.success,
            error: run.error,
            row_count: run.row_count,
        };
        let mut records = self.lock();
        records.push_back(metric);
        self.prune_locked(&mut records);
    }

    /// Times `run` and records its outcome; the result passes through.
    pub async fn measure<F>(
        &self,
        agent: AgentKind,
        operation: &'static str,
        run: F,
    ) -> Result<AgentResponse, AgentError>
    where
        F: Future<Output = Result<AgentResponse, AgentError>>,
    {
        let started = Instant::now();
        let result = run.await;
        let duration = started.elapsed();
        self.record(match &result {
            Ok(response) => AgentRun::succeeded(agent, operation, duration, response.row_count()),
            Err(error) => AgentRun::failed(agent, operation, duration, error.to_string()),
        });
        result
    }

    /// Summary over records newer than `window`, or all retained records.
    pub fn summary(&self, window: Option<chrono::Duration>) -> MetricsSummary {
        self.summarize(window, |_| true)
    }

    pub fn agent_summary(&self, agent: AgentKind, window: Option<chrono::Duration>) -> MetricsSummary {
        self.summarize(window, |metric| metric.agent == agent)
    }

    pub fn realtime(&self) -> RealtimeStats {
        let cutoff = self.clock.now() - chrono::Duration::minutes(1);
        let records = self.lock();
        let recent: Vec<&AgentMetric> = records.iter().filter(|metric| metric.recorded_at >= cutoff).collect();
        RealtimeStats {
            runs_per_minute: recent.len(),
            avg_duration_ms: average(recent.iter().map(|metric| metric.duration_ms)),
            error_count: recent.iter().filter(|metric| !metric.success).count(),
        }
    }

    /// Drops records past the retention window. Returns how many went.
    pub fn prune(&self) -> usize {
        let mut records = self.lock();
        self.prune_locked(&mut records)
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    pub fn clear(&self) {
        self.lock().clear();
    }

    fn lock(&self) -> MutexGuard<'_, VecDeque<AgentMetric>> {
        self.records.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn prune_locked(&self, records: &mut VecDeque<AgentMetric>) -> usize {
        let before = records.len();
        let cutoff = self.clock.now() - self.retention;
        while records.front().is_some_and(|metric| metric.recorded_at < cutoff) {
            records.pop_front();
        }
        while records.len() > self.max_records {
            records.pop_front();
        }
        before - records.len()
    }

    fn summarize(&self, window: Option<chrono::Duration>, keep: impl Fn(&AgentMetric) -> bool) -> MetricsSummary {
        let cutoff = window.map(|window| self.clock.now() - window);
        let records = self.lock();
        let selected: Vec<&AgentMetric> = records
            .iter()
            .filter(|metric| cutoff.map_or(true, |cutoff| metric.recorded_at >= cutoff))
            .filter(|metric| keep(metric))
            .collect();
        if selected.is_empty() {
            return MetricsSummary::default();
        }

        let total = selected.len();
        let successes = selected.iter().filter(|metric| metric.success).count();
        let mut durations: Vec<u64> = selected.iter().map(|metric| metric.duration_ms).collect();
        durations.sort_unstable();

        let recent_errors: Vec<RecentError> = selected
            .iter()
            .filter(|metric| !metric.success)
            .filter_map(|metric| {
                metric.error.as_ref().map(|error| RecentError {
                    recorded_at: metric.recorded_at,
                    agent: metric.agent,
                    error: error.clone(),
                })
            })
            .collect();
        let skip = recent_errors.len().saturating_sub(RECENT_ERRORS);

        MetricsSummary {
            total_runs: total,
            success_rate_pct: percent(successes, total),
            error_rate_pct: percent(total - successes, total),
            avg_duration_ms: average(durations.iter().copied()),
            p50_duration_ms: percentile(&durations, 50),
            p95_duration_ms: percentile(&durations, 95),
            p99_duration_ms: percentile(&durations, 99),
            by_agent: group_by(&selected, |metric| metric.agent.as_str().to_owned()),
            by_operation: group_by(&selected, |metric| metric.operation.to_owned()),
            recent_errors: recent_errors.into_iter().skip(skip).collect(),
        }
    }
}

fn group_by(metrics: &[&AgentMetric], key: impl Fn(&AgentMetric) -> String) -> BTreeMap<String, GroupSummary> {
    let mut groups: BTreeMap<String, Vec<&AgentMetric>> = BTreeMap::new();
    for &metric in metrics {
        groups.entry(key(metric)).or_default().push(metric);
    }
    groups
        .into_iter()
        .map(|(name, members)| {
            let successes = members.iter().filter(|metric| metric.success).count();
            let summary = GroupSummary {
                runs: members.len(),
                success_rate_pct: percent(successes, members.len()),
                avg_duration_ms: average(members.iter().map(|metric| metric.duration_ms)),
            };
            (name, summary)
        })
        .collect()
}

/// Nearest-rank percentile over ascending values.
fn percentile(sorted: &[u64], p: u32) -> u64 {
    if sorted.is_empty() {
        return 0;
    }
    let rank = (f64::from(p) / 100.0 * sorted.len() as f64).ceil() as usize;
    sorted[rank.saturating_sub(1).min(sorted.len() - 1)]
}

fn percent(part: usize, total: usize) -> f64 {
    if total == 0 {
        return 0.0;
    }
    part as f64 / total as f64 * 100.0
}

fn average(values: impl Iterator<Item = u64>) -> f64 {
    let (sum, count) = values.fold((0u64, 0usize), |(sum, count), value| (sum.saturating_add(value), count + 1));
    if count == 0 {
        return 0.0;
    }
    sum as f64 / count as f64
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::time::Duration;

    use chrono::NaiveDate;

    use super::{percentile, AgentRun, MetricsCollector};
    use crate::capability::AgentError;
    use tabula_core::clock::ManualClock;
    use tabula_core::domain::agent::{AgentKind, AgentResponse};
    use tabula_core::errors::ApplicationError;

    fn clock() -> ManualClock {
        ManualClock::at_midnight(NaiveDate::from_ymd_opt(2025, 11, 20).expect("date"))
    }

    fn ms(millis: u64) -> Duration {
        Duration::from_millis(millis)
    }

    #[test]
    fn summary_reports_rates_percentiles_and_groups() {
        let collector = MetricsCollector::new(Arc::new(clock()));
        for millis in [10, 20, 30, 40] {
            collector.record(AgentRun::succeeded(AgentKind::DataAnalyst, "workflow.node", ms(millis), 5));
        }
        collector.record(AgentRun::failed(AgentKind::BusinessBrain, "flow.step", ms(100), "model timed out"));

        let summary = collector.summary(None);
        assert_eq!(summary.total_runs, 5);
        assert!((summary.success_rate_pct - 80.0).abs() < 1e-9);
        assert!((summary.error_rate_pct - 20.0).abs() < 1e-9);
        assert!((summary.avg_duration_ms - 40.0).abs() < 1e-9);
        assert_eq!((summary.p50_duration_ms, summary.p95_duration_ms, summary.p99_duration_ms), (30, 100, 100));

        let analyst = &summary.by_agent["data-analyst"];
        assert_eq!(analyst.runs, 4);
        assert!((analyst.avg_duration_ms - 25.0).abs() < 1e-9);
        assert_eq!(summary.by_operation["flow.step"].success_rate_pct, 0.0);
        assert_eq!(summary.recent_errors.len(), 1);
        assert_eq!(summary.recent_errors[0].error, "model timed out");

        let brain = collector.agent_summary(AgentKind::BusinessBrain, None);
        assert_eq!(brain.total_runs, 1);
        assert_eq!(brain.success_rate_pct, 0.0);
        assert_eq!(collector.agent_summary(AgentKind::BusinessManager, None).total_runs, 0);
    }

    #[test]
    fn old_records_age_out_and_the_count_is_bounded() {
        let clock = clock();
        let collector = MetricsCollector::with_limits(Arc::new(clock.clone()), 3, chrono::Duration::hours(1));

        collector.record(AgentRun::succeeded(AgentKind::DataAnalyst, "workflow.node", ms(5), 1));
        clock.advance(chrono::Duration::minutes(90));
        assert_eq!(collector.summary(Some(chrono::Duration::minutes(30))).total_runs, 0);
        assert_eq!(collector.prune(), 1);
        assert!(collector.is_empty());

        for _ in 0..5 {
            collector.record(AgentRun::succeeded(AgentKind::PerformanceMarketer, "flow.step", ms(5), 0));
        }
        assert_eq!(collector.len(), 3);
        assert_eq!(collector.realtime().runs_per_minute, 3);

        clock.advance(chrono::Duration::minutes(2));
        assert_eq!(collector.realtime().runs_per_minute, 0);
        collector.clear();
        assert_eq!(collector.summary(None).total_runs, 0);
    }

    #[test]
    fn recent_errors_keep_only_the_latest_ten() {
        let collector = MetricsCollector::new(Arc::new(clock()));
        for attempt in 0..12 {
            collector.record(AgentRun::failed(AgentKind::DataAnalyst, "flow.step", ms(1), format!("failure {attempt}")));
        }

        let errors = collector.summary(None).recent_errors;
        assert_eq!(errors.len(), 10);
        assert_eq!(errors[0].error, "failure 2");
        assert_eq!(errors[9].error, "failure 11");
    }

    #[tokio::test(start_paused = true)]
    async fn measure_times_the_run_and_passes_the_result_through() {
        let collector = MetricsCollector::new(Arc::new(clock()));

        let answered = collector
            .measure(AgentKind::DataAnalyst, "flow.step", async {
                tokio::time::sleep(Duration::from_millis(250)).await;
                Ok(AgentResponse { data: Some(serde_json::json!([{ "a": 1 }, { "a": 2 }])), ..AgentResponse::default() })
            })
            .await;
        assert_eq!(answered.map(|response| response.row_count()), Ok(2));

        let failed = collector
            .measure(AgentKind::DataAnalyst, "flow.step", async {
                Err::<AgentResponse, AgentError>(ApplicationError::ServiceUnavailable("down".to_owned()).into())
            })
            .await;
        assert!(failed.is_err());

        let summary = collector.summary(None);
        assert_eq!(summary.total_runs, 2);
        assert!(summary.p99_duration_ms >= 250);
        assert!((summary.success_rate_pct - 50.0).abs() < 1e-9);
    }

    #[test]
    fn nearest_rank_percentiles() {
        assert_eq!(percentile(&[], 50), 0);
        assert_eq!(percentile(&[7], 99), 7);
        assert_eq!(percentile(&[1, 2, 3, 4, 5, 6, 7, 8, 9, 10], 50), 5);
        assert_eq!(percentile(&[1, 2, 3, 4, 5, 6, 7, 8, 9, 10], 95), 10);
    }
}

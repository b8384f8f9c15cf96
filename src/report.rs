use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::outcome::BatchResult;

/// One row of results: the reduction of a single concurrency level.
///
/// Field names and order are the persisted CSV columns.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SummaryRecord {
    #[serde(rename = "concurrent_users")]
    pub concurrency: usize,
    /// Seconds.
    pub total_time: f64,
    pub successful_requests: usize,
    pub failed_requests: usize,
    pub total_tokens: u64,
    pub tokens_per_second: f64,
    pub requests_per_second: f64,
    #[serde(rename = "success_rate")]
    pub success_rate_percent: f64,
}

impl SummaryRecord {
    /// Record for a level whose batch never formed: every attempt counts as failed.
    pub fn degenerate(concurrency: usize) -> Self {
        Self {
            concurrency,
            total_time: 0.0,
            successful_requests: 0,
            failed_requests: concurrency,
            total_tokens: 0,
            tokens_per_second: 0.0,
            requests_per_second: 0.0,
            success_rate_percent: 0.0,
        }
    }
}

/// Reduces a batch to its summary. Pure and total.
///
/// Attempts missing from `outcomes` are counted as failed so that
/// `successful_requests + failed_requests == concurrency` always holds.
pub fn summarize(batch: &BatchResult) -> SummaryRecord {
    let concurrency = batch.concurrency;
    let mut successful_requests = 0usize;
    let mut total_tokens = 0u64;
    for outcome in batch.outcomes.iter().filter(|outcome| outcome.succeeded()) {
        successful_requests += 1;
        total_tokens = total_tokens.saturating_add(outcome.tokens);
    }
    let successful_requests = successful_requests.min(concurrency);
    let failed_requests = concurrency - successful_requests;

    let total_time = batch.wall_time.as_secs_f64();
    let tokens_per_second = if total_time > 0.0 && total_tokens > 0 {
        total_tokens as f64 / total_time
    } else {
        0.0
    };
    let requests_per_second = if total_time > 0.0 {
        successful_requests as f64 / total_time
    } else {
        0.0
    };
    let success_rate_percent = if concurrency > 0 {
        100.0 * successful_requests as f64 / concurrency as f64
    } else {
        0.0
    };

    SummaryRecord {
        concurrency,
        total_time,
        successful_requests,
        failed_requests,
        total_tokens,
        tokens_per_second,
        requests_per_second,
        success_rate_percent,
    }
}

/// All records of one sweep, in level order.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct BenchmarkRun {
    pub provider: String,
    pub records: Vec<SummaryRecord>,
    /// Set when the sweep stopped before visiting every level.
    pub interrupted: bool,
}

impl BenchmarkRun {
    pub fn new(provider: impl Into<String>) -> Self {
        Self {
            provider: provider.into(),
            records: Vec::new(),
            interrupted: false,
        }
    }

    pub fn push(&mut self, record: SummaryRecord) {
        self.records.push(record);
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

/// Latency percentiles over the successful attempts of a batch.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LatencySummary {
    pub p50: Duration,
    pub p90: Duration,
    pub p99: Duration,
}

impl LatencySummary {
    pub fn from_batch(batch: &BatchResult) -> Option<Self> {
        let mut latencies: Vec<Duration> = batch
            .outcomes
            .iter()
            .filter(|outcome| outcome.succeeded())
            .map(|outcome| outcome.duration)
            .collect();
        latencies.sort();
        Some(Self {
            p50: percentile(&latencies, 0.50)?,
            p90: percentile(&latencies, 0.90)?,
            p99: percentile(&latencies, 0.99)?,
        })
    }
}

fn percentile(sorted_latencies: &[Duration], quantile: f64) -> Option<Duration> {
    if sorted_latencies.is_empty() {
        return None;
    }

    let clamped = quantile.clamp(0.0, 1.0);
    let idx = ((sorted_latencies.len() - 1) as f64 * clamped).round() as usize;
    sorted_latencies.get(idx).cloned()
}

/// Headline numbers across the levels of one run.
#[derive(Debug, Clone, PartialEq)]
pub struct RunStatistics {
    pub peak_tokens_per_second: f64,
    pub peak_throughput_concurrency: usize,
    pub peak_requests_per_second: f64,
    pub peak_request_rate_concurrency: usize,
    pub average_success_rate: f64,
    pub min_success_rate: f64,
    pub min_success_rate_concurrency: usize,
}

impl RunStatistics {
    pub fn from_records(records: &[SummaryRecord]) -> Option<Self> {
        let first = records.first()?;
        let mut stats = Self {
            peak_tokens_per_second: first.tokens_per_second,
            peak_throughput_concurrency: first.concurrency,
            peak_requests_per_second: first.requests_per_second,
            peak_request_rate_concurrency: first.concurrency,
            average_success_rate: 0.0,
            min_success_rate: first.success_rate_percent,
            min_success_rate_concurrency: first.concurrency,
        };

        let mut success_sum = 0.0;
        for record in records {
            // strict comparisons keep the first level on ties
            if record.tokens_per_second > stats.peak_tokens_per_second {
                stats.peak_tokens_per_second = record.tokens_per_second;
                stats.peak_throughput_concurrency = record.concurrency;
            }
            if record.requests_per_second > stats.peak_requests_per_second {
                stats.peak_requests_per_second = record.requests_per_second;
                stats.peak_request_rate_concurrency = record.concurrency;
            }
            if record.success_rate_percent < stats.min_success_rate {
                stats.min_success_rate = record.success_rate_percent;
                stats.min_success_rate_concurrency = record.concurrency;
            }
            success_sum += record.success_rate_percent;
        }
        stats.average_success_rate = success_sum / records.len() as f64;

        Some(stats)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::outcome::{FailureKind, RequestOutcome};

    fn ok(tokens: u64) -> RequestOutcome {
        RequestOutcome::success(tokens, Duration::from_millis(100))
    }

    fn failed(kind: FailureKind) -> RequestOutcome {
        RequestOutcome::failure(kind, Duration::from_millis(100))
    }

    #[test]
    fn three_successes_one_http_error() {
        let batch = BatchResult::new(
            4,
            vec![ok(100), ok(100), ok(100), failed(FailureKind::HttpError)],
            Duration::from_secs(2),
        );
        let record = summarize(&batch);
        assert_eq!(record.successful_requests, 3);
        assert_eq!(record.failed_requests, 1);
        assert_eq!(record.total_tokens, 300);
        assert_eq!(record.success_rate_percent, 75.0);
        assert_eq!(record.tokens_per_second, 150.0);
        assert_eq!(record.requests_per_second, 1.5);
    }

    #[test]
    fn zero_wall_time_yields_zero_rates() {
        let batch = BatchResult::new(2, vec![ok(10), ok(20)], Duration::ZERO);
        let record = summarize(&batch);
        assert_eq!(record.tokens_per_second, 0.0);
        assert_eq!(record.requests_per_second, 0.0);
        assert_eq!(record.total_tokens, 30);
        assert_eq!(record.success_rate_percent, 100.0);
    }

    #[test]
    fn zero_concurrency_is_not_an_error() {
        let record = summarize(&BatchResult::new(0, Vec::new(), Duration::from_secs(1)));
        assert_eq!(record.successful_requests, 0);
        assert_eq!(record.failed_requests, 0);
        assert_eq!(record.success_rate_percent, 0.0);
        assert_eq!(record.tokens_per_second, 0.0);
        assert_eq!(record.requests_per_second, 0.0);
    }

    #[test]
    fn counts_always_add_up_to_concurrency() {
        let kinds = [
            FailureKind::ConnectionError,
            FailureKind::Timeout,
            FailureKind::DecodeError,
            FailureKind::HttpError,
            FailureKind::UnexpectedError,
            FailureKind::EmptyTokenCount,
        ];
        for concurrency in 1..=12usize {
            let outcomes: Vec<_> = (0..concurrency)
                .map(|i| {
                    if i % 3 == 0 {
                        ok(i as u64 + 1)
                    } else {
                        failed(kinds[i % kinds.len()])
                    }
                })
                .collect();
            let batch = BatchResult::new(concurrency, outcomes, Duration::from_millis(750));
            let record = summarize(&batch);
            assert_eq!(
                record.successful_requests + record.failed_requests,
                concurrency
            );
            assert_eq!(
                record.success_rate_percent,
                100.0 * record.successful_requests as f64 / concurrency as f64
            );
        }
    }

    #[test]
    fn missing_outcomes_count_as_failed() {
        let batch = BatchResult::new(5, vec![ok(7), ok(7)], Duration::from_secs(1));
        let record = summarize(&batch);
        assert_eq!(record.successful_requests, 2);
        assert_eq!(record.failed_requests, 3);
    }

    #[test]
    fn tokens_only_from_successes() {
        let mut timeout = failed(FailureKind::Timeout);
        timeout.tokens = 999;
        let batch = BatchResult::new(2, vec![ok(50), timeout], Duration::from_secs(1));
        let record = summarize(&batch);
        assert_eq!(record.total_tokens, 50);
        assert_eq!(record.failed_requests, 1);
    }

    #[test]
    fn summarize_is_idempotent() {
        let batch = BatchResult::new(
            3,
            vec![ok(12), failed(FailureKind::DecodeError), ok(30)],
            Duration::from_millis(1234),
        );
        assert_eq!(summarize(&batch), summarize(&batch));
    }

    #[test]
    fn degenerate_record_fails_every_attempt() {
        let record = SummaryRecord::degenerate(8);
        assert_eq!(record.successful_requests, 0);
        assert_eq!(record.failed_requests, 8);
        assert_eq!(record.tokens_per_second, 0.0);
        assert_eq!(record.success_rate_percent, 0.0);
    }

    #[test]
    fn latency_percentiles_ignore_failures() {
        let mut outcomes: Vec<_> = (1..=10)
            .map(|ms| RequestOutcome::success(1, Duration::from_millis(ms * 10)))
            .collect();
        outcomes.push(RequestOutcome::failure(
            FailureKind::Timeout,
            Duration::from_secs(600),
        ));
        let batch = BatchResult::new(11, outcomes, Duration::from_secs(1));
        let latency = LatencySummary::from_batch(&batch).unwrap();
        assert_eq!(latency.p50, Duration::from_millis(60));
        assert_eq!(latency.p99, Duration::from_millis(100));

        let all_failed = BatchResult::new(
            1,
            vec![failed(FailureKind::HttpError)],
            Duration::from_secs(1),
        );
        assert!(LatencySummary::from_batch(&all_failed).is_none());
    }

    #[test]
    fn run_statistics_pick_peaks() {
        let mut records = vec![
            SummaryRecord::degenerate(1),
            SummaryRecord::degenerate(2),
            SummaryRecord::degenerate(4),
        ];
        records[0].tokens_per_second = 10.0;
        records[0].success_rate_percent = 100.0;
        records[1].tokens_per_second = 25.0;
        records[1].requests_per_second = 3.0;
        records[1].success_rate_percent = 100.0;
        records[2].tokens_per_second = 20.0;
        records[2].requests_per_second = 1.0;
        records[2].success_rate_percent = 50.0;

        let stats = RunStatistics::from_records(&records).unwrap();
        assert_eq!(stats.peak_tokens_per_second, 25.0);
        assert_eq!(stats.peak_throughput_concurrency, 2);
        assert_eq!(stats.peak_request_rate_concurrency, 2);
        assert_eq!(stats.min_success_rate, 50.0);
        assert_eq!(stats.min_success_rate_concurrency, 4);
        assert!((stats.average_success_rate - 250.0 / 3.0).abs() < 1e-9);

        assert!(RunStatistics::from_records(&[]).is_none());
    }
}

//! The scaling sweep: one dispatch and one summary per concurrency level.

use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::mpsc;
use tokio::time::sleep;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::SweepConfig;
use crate::dispatcher::{run_batch, DispatchOptions};
use crate::outcome::BatchResult;
use crate::report::{summarize, BenchmarkRun, LatencySummary, SummaryRecord};
use crate::status::StatusEvent;
use crate::transport::Transport;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SweepPhase {
    Idle,
    Dispatching,
    Aggregating,
    Cooldown,
    Done,
}

/// Produces the batch for one concurrency level.
#[async_trait]
pub trait LevelRunner: Send {
    async fn run_level(&mut self, concurrency: usize) -> Result<BatchResult>;
}

/// Runs levels through [`run_batch`] against a shared transport.
pub struct TransportLevelRunner<T: Transport + ?Sized> {
    transport: Arc<T>,
    body: Arc<Value>,
    config: SweepConfig,
    status_tx: Option<mpsc::UnboundedSender<StatusEvent>>,
}

impl<T: Transport + ?Sized + 'static> TransportLevelRunner<T> {
    pub fn new(transport: Arc<T>, body: Value, config: SweepConfig) -> Self {
        Self {
            transport,
            body: Arc::new(body),
            config,
            status_tx: None,
        }
    }

    pub fn with_status(mut self, status_tx: mpsc::UnboundedSender<StatusEvent>) -> Self {
        self.status_tx = Some(status_tx);
        self
    }
}

#[async_trait]
impl<T: Transport + ?Sized + 'static> LevelRunner for TransportLevelRunner<T> {
    async fn run_level(&mut self, concurrency: usize) -> Result<BatchResult> {
        let options = DispatchOptions::for_level(&self.config, concurrency);
        run_batch(
            concurrency,
            Arc::clone(&self.transport),
            Arc::clone(&self.body),
            &options,
            self.status_tx.clone(),
        )
        .await
    }
}

struct Sweep {
    phase: SweepPhase,
}

impl Sweep {
    fn enter(&mut self, next: SweepPhase, level: Option<usize>) {
        debug!(from = ?self.phase, to = ?next, level = ?level, "sweep phase");
        self.phase = next;
    }
}

/// Visits every configured level in order.
///
/// A level whose dispatch fails is recorded as fully failed and the sweep moves
/// on. Cancelling `cancel` stops the sweep and returns whatever was recorded.
pub async fn run_sweep<R>(
    provider: &str,
    config: &SweepConfig,
    runner: &mut R,
    cancel: &CancellationToken,
) -> BenchmarkRun
where
    R: LevelRunner + ?Sized,
{
    let mut run = BenchmarkRun::new(provider);
    let mut sweep = Sweep {
        phase: SweepPhase::Idle,
    };
    let last = config.levels.len().saturating_sub(1);

    for (idx, &level) in config.levels.iter().enumerate() {
        if cancel.is_cancelled() {
            run.interrupted = true;
            break;
        }

        sweep.enter(SweepPhase::Dispatching, Some(level));
        info!(provider, concurrency = level, "running benchmark level");
        let dispatched = tokio::select! {
            biased;
            _ = cancel.cancelled() => None,
            result = runner.run_level(level) => Some(result),
        };
        let Some(dispatched) = dispatched else {
            run.interrupted = true;
            break;
        };

        let record = match dispatched {
            Ok(batch) => {
                sweep.enter(SweepPhase::Aggregating, Some(level));
                let record = summarize(&batch);
                if let Some(latency) = LatencySummary::from_batch(&batch) {
                    debug!(
                        concurrency = level,
                        p50_ms = latency.p50.as_secs_f64() * 1000.0,
                        p90_ms = latency.p90.as_secs_f64() * 1000.0,
                        p99_ms = latency.p99.as_secs_f64() * 1000.0,
                        "attempt latency"
                    );
                }
                record
            }
            Err(err) => {
                warn!(provider, concurrency = level, "level failed: {:#}", err);
                SummaryRecord::degenerate(level)
            }
        };
        info!(
            provider,
            concurrency = level,
            "Results: {}/{} successful, {} tokens, {:.2} tokens/sec",
            record.successful_requests,
            record.concurrency,
            record.total_tokens,
            record.tokens_per_second
        );
        run.push(record);

        if idx < last {
            sweep.enter(SweepPhase::Cooldown, Some(level));
            let cooled = tokio::select! {
                biased;
                _ = cancel.cancelled() => false,
                _ = sleep(config.cooldown) => true,
            };
            if !cooled {
                run.interrupted = true;
                break;
            }
        }
    }

    if run.interrupted {
        warn!(
            provider,
            completed = run.records.len(),
            "benchmark interrupted, keeping completed levels"
        );
    }
    sweep.enter(SweepPhase::Done, None);
    run
}

#[cfg(test)]
mod tests {
    use std::collections::HashSet;
    use std::time::Duration;

    use anyhow::anyhow;

    use super::*;
    use crate::outcome::RequestOutcome;

    struct FakeLevels {
        failing: HashSet<usize>,
        hang_on: Option<usize>,
        seen: Vec<usize>,
        cancel_after: Option<(usize, CancellationToken)>,
    }

    impl FakeLevels {
        fn new() -> Self {
            Self {
                failing: HashSet::new(),
                hang_on: None,
                seen: Vec::new(),
                cancel_after: None,
            }
        }
    }

    #[async_trait]
    impl LevelRunner for FakeLevels {
        async fn run_level(&mut self, concurrency: usize) -> Result<BatchResult> {
            self.seen.push(concurrency);
            if let Some((level, token)) = &self.cancel_after {
                if *level == concurrency {
                    token.cancel();
                }
            }
            if self.hang_on == Some(concurrency) {
                std::future::pending::<()>().await;
            }
            if self.failing.contains(&concurrency) {
                return Err(anyhow!("client exploded"));
            }
            let outcomes = (0..concurrency)
                .map(|_| RequestOutcome::success(10, Duration::from_millis(5)))
                .collect();
            Ok(BatchResult::new(concurrency, outcomes, Duration::from_secs(1)))
        }
    }

    fn config(levels: Vec<usize>) -> SweepConfig {
        SweepConfig::try_new(levels)
            .unwrap()
            .with_cooldown(Duration::ZERO)
    }

    #[tokio::test]
    async fn failed_level_becomes_degenerate_record() {
        let mut runner = FakeLevels::new();
        runner.failing.insert(1);
        let cancel = CancellationToken::new();
        let run = run_sweep("fake", &config(vec![1, 2]), &mut runner, &cancel).await;

        assert_eq!(run.records.len(), 2);
        assert_eq!(run.records[0], SummaryRecord::degenerate(1));
        assert_eq!(run.records[1].successful_requests, 2);
        assert_eq!(run.records[1].total_tokens, 20);
        assert!(!run.interrupted);
    }

    #[tokio::test]
    async fn records_follow_level_order() {
        let mut runner = FakeLevels::new();
        let cancel = CancellationToken::new();
        let run = run_sweep("fake", &config(vec![4, 1, 8]), &mut runner, &cancel).await;

        let levels: Vec<_> = run.records.iter().map(|r| r.concurrency).collect();
        assert_eq!(levels, vec![4, 1, 8]);
        assert_eq!(runner.seen, vec![4, 1, 8]);
        assert_eq!(run.provider, "fake");
    }

    #[tokio::test]
    async fn cancellation_during_dispatch_keeps_earlier_levels() {
        let cancel = CancellationToken::new();
        let mut runner = FakeLevels::new();
        runner.hang_on = Some(2);
        runner.cancel_after = Some((2, cancel.clone()));

        let run = run_sweep("fake", &config(vec![1, 2, 4]), &mut runner, &cancel).await;

        assert!(run.interrupted);
        assert_eq!(run.records.len(), 1);
        assert_eq!(run.records[0].concurrency, 1);
        assert_eq!(runner.seen, vec![1, 2]);
    }

    #[tokio::test]
    async fn cancellation_during_cooldown_stops_before_next_level() {
        let cancel = CancellationToken::new();
        let mut runner = FakeLevels::new();
        runner.cancel_after = Some((1, cancel.clone()));
        let config = config(vec![1, 2]).with_cooldown(Duration::from_secs(30));

        let run = run_sweep("fake", &config, &mut runner, &cancel).await;

        assert!(run.interrupted);
        assert_eq!(run.records.len(), 1);
        assert_eq!(runner.seen, vec![1]);
    }

    #[tokio::test(start_paused = true)]
    async fn cooldown_separates_levels_but_not_the_last() {
        let mut runner = FakeLevels::new();
        let config = config(vec![1, 2, 4]).with_cooldown(Duration::from_secs(2));

        let start = tokio::time::Instant::now();
        let run = run_sweep("fake", &config, &mut runner, &CancellationToken::new()).await;
        let elapsed = start.elapsed();

        assert_eq!(run.records.len(), 3);
        assert!(elapsed >= Duration::from_secs(4), "elapsed {:?}", elapsed);
        assert!(elapsed < Duration::from_secs(6), "elapsed {:?}", elapsed);
    }

    #[tokio::test]
    async fn transport_runner_feeds_dispatcher() {
        use crate::transport::{TransportError, TransportResponse};
        use reqwest::StatusCode;

        struct Fixed;

        #[async_trait]
        impl Transport for Fixed {
            async fn send(&self, _body: &Value) -> Result<TransportResponse, TransportError> {
                Ok(TransportResponse {
                    status: StatusCode::OK,
                    body: br#"{"usage":{"completion_tokens":3}}"#.to_vec(),
                })
            }
        }

        let config = config(vec![2, 3]);
        let mut runner =
            TransportLevelRunner::new(Arc::new(Fixed), serde_json::json!({}), config.clone());
        let run = run_sweep("fixed", &config, &mut runner, &CancellationToken::new()).await;

        assert_eq!(run.records[0].total_tokens, 6);
        assert_eq!(run.records[1].total_tokens, 9);
        assert_eq!(run.records[1].success_rate_percent, 100.0);
    }
}

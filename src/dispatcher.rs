use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::{anyhow, Result};
use serde_json::Value;
use tokio::sync::{mpsc, Semaphore};
use tokio::task::JoinSet;
use tokio::time::{sleep, timeout};

use crate::config::SweepConfig;
use crate::diagnostics::DiagnosticSink;
use crate::outcome::{BatchResult, FailureKind, RequestOutcome};
use crate::status::StatusEvent;
use crate::transport::{Transport, TransportError, TransportResponse};

/// Per-batch dispatch settings.
#[derive(Debug, Clone)]
pub struct DispatchOptions {
    /// Maximum attempts holding a connection at once.
    pub pool_limit: usize,
    pub request_timeout: Duration,
    pub stagger_every: usize,
    pub stagger_pause: Duration,
    pub diagnostic_sample: usize,
}

impl DispatchOptions {
    pub fn for_level(config: &SweepConfig, concurrency: usize) -> Self {
        Self {
            pool_limit: config.pool_limit_for(concurrency),
            request_timeout: config.request_timeout,
            stagger_every: config.stagger_every,
            stagger_pause: config.stagger_pause,
            diagnostic_sample: config.diagnostic_sample,
        }
    }

    fn should_stagger(&self, attempt: usize) -> bool {
        self.stagger_every > 0 && attempt > 0 && attempt % self.stagger_every == 0
    }
}

/// Runs `concurrency` attempts of `body` against `transport` and waits for all of them.
///
/// Every attempt resolves to exactly one [`RequestOutcome`]. The only errors
/// returned are for batches that cannot start at all.
pub async fn run_batch<T>(
    concurrency: usize,
    transport: Arc<T>,
    body: Arc<Value>,
    options: &DispatchOptions,
    status_tx: Option<mpsc::UnboundedSender<StatusEvent>>,
) -> Result<BatchResult>
where
    T: Transport + ?Sized + 'static,
{
    if concurrency == 0 {
        return Err(anyhow!("concurrency must be greater than zero"));
    }
    if options.pool_limit == 0 {
        return Err(anyhow!("pool_limit must be greater than zero"));
    }

    let slots = Arc::new(Semaphore::new(options.pool_limit));
    let sink = Arc::new(DiagnosticSink::new(options.diagnostic_sample));
    if let Some(tx) = &status_tx {
        let _ = tx.send(StatusEvent::Started {
            planned: concurrency,
        });
    }

    let start = Instant::now();
    let mut join_set = JoinSet::new();
    for attempt in 0..concurrency {
        if options.should_stagger(attempt) {
            sleep(options.stagger_pause).await;
        }
        let transport = Arc::clone(&transport);
        let body = Arc::clone(&body);
        let slots = Arc::clone(&slots);
        let sink = Arc::clone(&sink);
        let request_timeout = options.request_timeout;
        join_set.spawn(async move {
            run_attempt(attempt, transport, body, slots, request_timeout, sink).await
        });
    }

    let mut outcomes = Vec::with_capacity(concurrency);
    while let Some(joined) = join_set.join_next().await {
        let outcome = match joined {
            Ok(outcome) => outcome,
            Err(err) => {
                sink.report(None, FailureKind::UnexpectedError, err.to_string());
                RequestOutcome::failure(FailureKind::UnexpectedError, Duration::ZERO)
            }
        };
        if let Some(tx) = &status_tx {
            let _ = tx.send(StatusEvent::Resolved {
                succeeded: outcome.succeeded(),
                tokens: outcome.tokens,
            });
        }
        outcomes.push(outcome);
    }
    let wall_time = start.elapsed();

    let suppressed = sink.suppressed();
    if suppressed > 0 {
        tracing::debug!(suppressed, "further failure diagnostics suppressed");
    }

    Ok(BatchResult::new(concurrency, outcomes, wall_time))
}

async fn run_attempt<T>(
    attempt: usize,
    transport: Arc<T>,
    body: Arc<Value>,
    slots: Arc<Semaphore>,
    request_timeout: Duration,
    sink: Arc<DiagnosticSink>,
) -> RequestOutcome
where
    T: Transport + ?Sized,
{
    // Held until this function returns, whichever way the attempt ends.
    let _slot = match slots.acquire_owned().await {
        Ok(permit) => permit,
        Err(err) => {
            sink.report(Some(attempt), FailureKind::UnexpectedError, err.to_string());
            return RequestOutcome::failure(FailureKind::UnexpectedError, Duration::ZERO);
        }
    };

    let start = Instant::now();
    let sent = match timeout(request_timeout, transport.send(&body)).await {
        Ok(result) => result,
        Err(_) => Err(TransportError::Timeout(format!(
            "no response within {:.2}s",
            request_timeout.as_secs_f64()
        ))),
    };
    let duration = start.elapsed();

    match classify(sent) {
        Ok(tokens) => RequestOutcome::success(tokens, duration),
        Err((kind, message)) => {
            sink.report(
                Some(attempt),
                kind,
                format!("{} after {:.2}s: {}", kind, duration.as_secs_f64(), message),
            );
            RequestOutcome::failure(kind, duration)
        }
    }
}

/// Maps a transport result onto completion tokens or a failure kind.
pub fn classify(
    sent: Result<TransportResponse, TransportError>,
) -> Result<u64, (FailureKind, String)> {
    let response = match sent {
        Ok(response) => response,
        Err(TransportError::Connect(message)) => {
            return Err((FailureKind::ConnectionError, message))
        }
        Err(TransportError::Timeout(message)) => return Err((FailureKind::Timeout, message)),
        Err(TransportError::Other(message)) => return Err((FailureKind::UnexpectedError, message)),
    };

    let payload: Value = serde_json::from_slice(&response.body).map_err(|err| {
        (
            FailureKind::DecodeError,
            format!("status {}: {}", response.status, err),
        )
    })?;

    if !response.status.is_success() {
        let snippet = String::from_utf8_lossy(&response.body);
        return Err((
            FailureKind::HttpError,
            format!("request failed ({}) {}", response.status, snippet),
        ));
    }

    match completion_tokens(&payload) {
        Some(tokens) if tokens > 0 => Ok(tokens),
        _ => Err((
            FailureKind::EmptyTokenCount,
            format!("HTTP {} but no completion_tokens in usage", response.status),
        )),
    }
}

fn completion_tokens(payload: &Value) -> Option<u64> {
    payload
        .get("usage")?
        .get("completion_tokens")
        .and_then(|value| value.as_u64())
}

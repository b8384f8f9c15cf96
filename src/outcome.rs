use std::fmt;
use std::time::Duration;

/// Why an attempt did not count as a success.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FailureKind {
    ConnectionError,
    Timeout,
    DecodeError,
    HttpError,
    UnexpectedError,
    /// Transport succeeded but the endpoint reported zero or no completion tokens.
    EmptyTokenCount,
}

impl FailureKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            FailureKind::ConnectionError => "connection_error",
            FailureKind::Timeout => "timeout",
            FailureKind::DecodeError => "decode_error",
            FailureKind::HttpError => "http_error",
            FailureKind::UnexpectedError => "unexpected_error",
            FailureKind::EmptyTokenCount => "empty_token_count",
        }
    }
}

impl fmt::Display for FailureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Terminal result of one attempt. Built once by the task that ran it.
#[derive(Debug, Clone, PartialEq)]
pub struct RequestOutcome {
    pub tokens: u64,
    pub duration: Duration,
    failure: Option<FailureKind>,
}

impl RequestOutcome {
    pub fn success(tokens: u64, duration: Duration) -> Self {
        Self {
            tokens,
            duration,
            failure: None,
        }
    }

    pub fn failure(kind: FailureKind, duration: Duration) -> Self {
        Self {
            tokens: 0,
            duration,
            failure: Some(kind),
        }
    }

    pub fn succeeded(&self) -> bool {
        self.failure.is_none()
    }

    /// `None` iff the attempt succeeded.
    pub fn failure_kind(&self) -> Option<FailureKind> {
        self.failure
    }
}

/// Every outcome of one concurrency level plus the span it took.
#[derive(Debug, Clone, PartialEq)]
pub struct BatchResult {
    pub concurrency: usize,
    pub outcomes: Vec<RequestOutcome>,
    pub wall_time: Duration,
}

impl BatchResult {
    pub fn new(concurrency: usize, outcomes: Vec<RequestOutcome>, wall_time: Duration) -> Self {
        Self {
            concurrency,
            outcomes,
            wall_time,
        }
    }

    pub fn failures_of(&self, kind: FailureKind) -> usize {
        self.outcomes
            .iter()
            .filter(|outcome| outcome.failure_kind() == Some(kind))
            .count()
    }
}

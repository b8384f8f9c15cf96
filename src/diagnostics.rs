use std::sync::Mutex;

use crate::outcome::FailureKind;

#[derive(Debug, Clone, PartialEq)]
pub struct FailureRecord {
    /// `None` when the attempt died without reporting its index.
    pub attempt: Option<usize>,
    pub kind: FailureKind,
    pub error: String,
}

/// Keeps and logs the first `cap` failures of a batch; later ones are only counted.
#[derive(Debug)]
pub struct DiagnosticSink {
    cap: usize,
    state: Mutex<SinkState>,
}

#[derive(Debug, Default)]
struct SinkState {
    sampled: Vec<FailureRecord>,
    suppressed: usize,
}

const MAX_MESSAGE_LEN: usize = 200;

impl DiagnosticSink {
    pub fn new(cap: usize) -> Self {
        Self {
            cap,
            state: Mutex::new(SinkState::default()),
        }
    }

    pub fn report(&self, attempt: Option<usize>, kind: FailureKind, error: impl Into<String>) {
        let Ok(mut state) = self.state.lock() else {
            return;
        };
        if state.sampled.len() >= self.cap {
            state.suppressed += 1;
            return;
        }

        let error = truncate(error.into());
        tracing::warn!(attempt = ?attempt, kind = %kind, "{}", error);
        state.sampled.push(FailureRecord {
            attempt,
            kind,
            error,
        });
    }

    pub fn sampled(&self) -> Vec<FailureRecord> {
        self.state
            .lock()
            .map(|state| state.sampled.clone())
            .unwrap_or_default()
    }

    pub fn suppressed(&self) -> usize {
        self.state.lock().map(|state| state.suppressed).unwrap_or(0)
    }
}

fn truncate(mut message: String) -> String {
    if message.len() > MAX_MESSAGE_LEN {
        let mut end = MAX_MESSAGE_LEN;
        while !message.is_char_boundary(end) {
            end -= 1;
        }
        message.truncate(end);
    }
    message
}

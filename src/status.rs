use std::io::{self, Write};
use std::time::Instant;

use tokio::sync::mpsc;

/// Progress notifications a running batch emits when a sender is attached.
#[derive(Debug, Clone, PartialEq)]
pub enum StatusEvent {
    Started { planned: usize },
    Resolved { succeeded: bool, tokens: u64 },
}

#[derive(Debug, Default, Clone, PartialEq)]
pub struct StatusSnapshot {
    pub total_tokens: u64,
    pub successes: u64,
    pub failures: u64,
    pub planned: Option<usize>,
}

impl StatusSnapshot {
    pub fn apply(&mut self, event: StatusEvent) {
        match event {
            StatusEvent::Started { planned } => {
                *self = StatusSnapshot {
                    planned: Some(planned),
                    ..Default::default()
                };
            }
            StatusEvent::Resolved { succeeded, tokens } => {
                if succeeded {
                    self.successes += 1;
                    self.total_tokens = self.total_tokens.saturating_add(tokens);
                } else {
                    self.failures += 1;
                }
            }
        }
    }
}

/// Redraws a four-line status block until every sender is dropped.
pub async fn track_status(mut updates: mpsc::UnboundedReceiver<StatusEvent>) -> StatusSnapshot {
    let mut snapshot = StatusSnapshot::default();
    let mut start = Instant::now();

    while let Some(event) = updates.recv().await {
        if matches!(event, StatusEvent::Started { .. }) {
            start = Instant::now();
        }
        snapshot.apply(event);
        render_status(&snapshot, start, true);
    }

    render_status(&snapshot, start, false);
    snapshot
}

fn render_status(snapshot: &StatusSnapshot, start: Instant, stay: bool) {
    let elapsed = start.elapsed().as_secs_f64();
    let throughput = if elapsed > 0.0 {
        snapshot.total_tokens as f64 / elapsed
    } else {
        0.0
    };
    let completed = snapshot.successes + snapshot.failures;
    let planned_text = snapshot
        .planned
        .map(|total| format!(" / {}", total))
        .unwrap_or_default();

    let throughput_line = format!("Throughput: {:.2} tok/s", throughput);
    let tokens_line = format!("Completion tokens: {}", snapshot.total_tokens);
    let requests_line = format!("Requests: {}{}", completed, planned_text);
    let failures_line = format!("Failures: {}", snapshot.failures);

    print!(
        "\r\x1b[2K{}\n\x1b[2K{}\n\x1b[2K{}\n\x1b[2K{}\n",
        throughput_line, tokens_line, requests_line, failures_line
    );

    if stay {
        print!("\x1b[4A\r");
    }

    let _ = io::stdout().flush();
}

pub mod charts;
mod config;
mod diagnostics;
mod dispatcher;
mod outcome;
pub mod persist;
pub mod providers;
mod report;
mod status;
mod sweep;
mod transport;

pub use config::{SweepConfig, SweepOverrides, TargetConfig};
pub use diagnostics::{DiagnosticSink, FailureRecord};
pub use dispatcher::{classify, run_batch, DispatchOptions};
pub use outcome::{BatchResult, FailureKind, RequestOutcome};
pub use report::{summarize, BenchmarkRun, LatencySummary, RunStatistics, SummaryRecord};
pub use reqwest::StatusCode;
pub use status::{track_status, StatusEvent, StatusSnapshot};
pub use sweep::{run_sweep, LevelRunner, SweepPhase, TransportLevelRunner};
pub use transport::{HttpTransport, Transport, TransportError, TransportResponse};
pub use tokio_util::sync::CancellationToken;

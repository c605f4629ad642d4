use std::{fmt, time::Duration};

use crate::core::filter::ExecutionStatus;

/// What was left without a place to go when the pipeline ran out of stages.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HangingKind {
    Message,
    Chunk,
}

impl HangingKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            HangingKind::Message => "message",
            HangingKind::Chunk => "chunk",
        }
    }
}

impl fmt::Display for HangingKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// FilterMetrics defines the port (interface) for the engine's own metrics.
pub trait FilterMetrics: Send + Sync + 'static {
    /// A filter ran for at least the configured excessive execution time.
    fn record_excessive_execution(&self, filter_name: &str, status: ExecutionStatus, elapsed: Duration);

    /// Output reached the end of the pipeline after the client went away.
    fn increment_hanging(&self, kind: HangingKind, message_kind: &str);
}

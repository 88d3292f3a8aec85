use serde::{Deserialize, Serialize};
use std::io::Write;

/// Live progress stream for a run. Sinks are best effort: they must not fail
/// the run when the terminal goes away.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ProgressEvent {
    RunStarted { start_epoch: u32, final_epoch: u32 },
    EpochStarted { epoch: u32, batches: usize },
    BatchFinished { epoch: u32, batch: usize },
    Message { message: String },
    EpochFinished { epoch: u32 },
    RunFinished,
}

pub trait ProgressSink: Send + Sync {
    fn on_event(&self, event: ProgressEvent);
}

#[derive(Debug, Default)]
pub struct StdoutProgressSink;

impl ProgressSink for StdoutProgressSink {
    fn on_event(&self, event: ProgressEvent) {
        let mut out = std::io::stdout().lock();
        let _ = match event {
            ProgressEvent::RunStarted { start_epoch, final_epoch } => {
                writeln!(out, "[train] epochs {start_epoch}..={final_epoch}")
            }
            ProgressEvent::Message { message } => writeln!(out, "{message}"),
            ProgressEvent::RunFinished => writeln!(out, "[train] finished"),
            ProgressEvent::EpochStarted { .. }
            | ProgressEvent::BatchFinished { .. }
            | ProgressEvent::EpochFinished { .. } => Ok(()),
        };
    }
}

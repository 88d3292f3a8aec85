//! Live terminal progress for a training run.

use indicatif::{MultiProgress, ProgressBar, ProgressDrawTarget, ProgressStyle};
use pose_training::{ProgressEvent, ProgressSink};
use std::sync::Mutex;

const EPOCH_TEMPLATE: &str = "{spinner:.green} [{elapsed_precise}] [{wide_bar:.cyan/blue}] epoch {pos}/{len}";
const BATCH_TEMPLATE: &str = "  [{bar:40.green/white}] batch {pos}/{len}";

/// Renders run progress as an epoch bar plus a per-epoch batch bar, and
/// prints run log lines above them.
pub struct TerminalProgress {
    multi: MultiProgress,
    quiet: bool,
    epochs: Mutex<Option<ProgressBar>>,
    batches: Mutex<Option<ProgressBar>>,
}

impl TerminalProgress {
    /// A quiet sink draws nothing and drops log lines, for machine-readable
    /// output on stdout.
    pub fn new(quiet: bool) -> Self {
        let multi = if quiet {
            MultiProgress::with_draw_target(ProgressDrawTarget::hidden())
        } else {
            MultiProgress::new()
        };
        Self { multi, quiet, epochs: Mutex::new(None), batches: Mutex::new(None) }
    }

    fn bar(&self, len: u64, template: &str) -> ProgressBar {
        let bar = self.multi.add(ProgressBar::new(len));
        let style = ProgressStyle::with_template(template)
            .map(|s| s.progress_chars("#>-"))
            .unwrap_or_else(|_| ProgressStyle::default_bar());
        bar.set_style(style);
        bar
    }

    fn print(&self, line: &str) {
        if self.quiet {
            return;
        }
        // A hidden target (no terminal) swallows println, so fall back to stdout.
        if self.multi.is_hidden() {
            println!("{line}");
        } else {
            let _ = self.multi.println(line);
        }
    }
}

impl ProgressSink for TerminalProgress {
    fn on_event(&self, event: ProgressEvent) {
        match event {
            ProgressEvent::RunStarted { start_epoch, final_epoch } => {
                let total = final_epoch.saturating_sub(start_epoch.saturating_sub(1));
                let bar = self.bar(u64::from(total), EPOCH_TEMPLATE);
                if let Ok(mut slot) = self.epochs.lock() {
                    *slot = Some(bar);
                }
            }
            ProgressEvent::EpochStarted { batches, .. } => {
                let bar = self.bar(batches as u64, BATCH_TEMPLATE);
                if let Ok(mut slot) = self.batches.lock() {
                    if let Some(old) = slot.replace(bar) {
                        old.finish_and_clear();
                        self.multi.remove(&old);
                    }
                }
            }
            ProgressEvent::BatchFinished { .. } => {
                if let Ok(slot) = self.batches.lock() {
                    if let Some(bar) = slot.as_ref() {
                        bar.inc(1);
                    }
                }
            }
            ProgressEvent::Message { message } => self.print(&message),
            ProgressEvent::EpochFinished { .. } => {
                if let Ok(slot) = self.epochs.lock() {
                    if let Some(bar) = slot.as_ref() {
                        bar.inc(1);
                    }
                }
            }
            ProgressEvent::RunFinished => {
                if let Ok(mut slot) = self.batches.lock() {
                    if let Some(bar) = slot.take() {
                        bar.finish_and_clear();
                    }
                }
                if let Ok(mut slot) = self.epochs.lock() {
                    if let Some(bar) = slot.take() {
                        bar.finish();
                    }
                }
            }
        }
    }
}

//! Progress reporting for provisioning runs.

/// One progress event, emitted as a stage starts or completes.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct StageProgress {
    pub percentage: u32,
    pub message: String,
    pub stage: Option<String>,
}

impl StageProgress {
    pub fn new(percentage: u32, message: String) -> Self {
        Self {
            percentage,
            message,
            stage: None,
        }
    }
}

pub trait ProgressReporter: Send + Sync {
    fn emit(&self, percentage: u32, message: String);

    fn emit_stage(&self, percentage: u32, message: String, _stage: &str) {
        self.emit(percentage, message);
    }
}

/// Logs progress through `tracing`.
#[derive(Debug, Default)]
pub struct TracingProgressReporter;

impl ProgressReporter for TracingProgressReporter {
    fn emit(&self, percentage: u32, message: String) {
        tracing::info!("[{:>3}%] {}", percentage, message);
    }
}

/// Channel-based progress reporter.
pub struct ChannelProgressReporter {
    sender: tokio::sync::mpsc::UnboundedSender<StageProgress>,
}

impl ChannelProgressReporter {
    pub fn new(sender: tokio::sync::mpsc::UnboundedSender<StageProgress>) -> Self {
        Self { sender }
    }
}

impl ProgressReporter for ChannelProgressReporter {
    fn emit(&self, percentage: u32, message: String) {
        let _ = self.sender.send(StageProgress::new(percentage, message));
    }

    fn emit_stage(&self, percentage: u32, message: String, stage: &str) {
        let mut progress = StageProgress::new(percentage, message);
        progress.stage = Some(stage.to_string());
        let _ = self.sender.send(progress);
    }
}

use serde::Serialize;

/// Progress of a long-running store operation
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct ProgressEvent {
    pub total: usize,
    pub step: usize,
    pub message: String,
}

impl ProgressEvent {
    pub fn new(total: usize, step: usize, message: impl Into<String>) -> Self {
        Self {
            total,
            step,
            message: message.into(),
        }
    }
}

pub trait ProgressListener: Send + Sync {
    fn on_progress(&self, event: &ProgressEvent);
}

impl<F> ProgressListener for F
where
    F: Fn(&ProgressEvent) + Send + Sync,
{
    fn on_progress(&self, event: &ProgressEvent) {
        self(event)
    }
}

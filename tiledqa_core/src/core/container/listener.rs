use crossbeam_channel::{Receiver, Sender};

use super::error_admin::QaError;
use super::progress::ProgressEvent;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorDisposition {
    Keep,
    /// The error is not counted.
    Cancel,
}

/// Observer of a test run. Called synchronously on the executing thread.
pub trait ContainerListener {
    fn on_qa_error(&mut self, _error: &QaError) -> ErrorDisposition {
        ErrorDisposition::Keep
    }

    fn on_progress(&mut self, _event: &ProgressEvent) {}
}

/// Ignores everything.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullListener;

impl ContainerListener for NullListener {}

/// Keeps every error and progress event in memory.
#[derive(Default)]
pub struct CollectingListener {
    pub errors: Vec<QaError>,
    pub progress: Vec<ProgressEvent>,
    cancel: Option<Box<dyn FnMut(&QaError) -> bool>>,
}

impl CollectingListener {
    pub fn new() -> Self {
        Self::default()
    }

    /// Errors matching `cancel` are cancelled instead of collected.
    pub fn cancelling(cancel: impl FnMut(&QaError) -> bool + 'static) -> Self {
        Self {
            cancel: Some(Box::new(cancel)),
            ..Self::default()
        }
    }
}

impl ContainerListener for CollectingListener {
    fn on_qa_error(&mut self, error: &QaError) -> ErrorDisposition {
        if let Some(cancel) = self.cancel.as_mut() {
            if cancel(error) {
                return ErrorDisposition::Cancel;
            }
        }

        self.errors.push(error.clone());
        ErrorDisposition::Keep
    }

    fn on_progress(&mut self, event: &ProgressEvent) {
        self.progress.push(event.clone());
    }
}

#[derive(Debug, Clone)]
pub enum ContainerMessage {
    Error(QaError),
    Progress(ProgressEvent),
}

/// Forwards errors and progress to a receiver, e.g. on another thread.
/// Messages are dropped once the receiver is gone.
#[derive(Debug, Clone)]
pub struct ChannelListener {
    sender: Sender<ContainerMessage>,
    forward_progress: bool,
}

impl ChannelListener {
    pub fn new(sender: Sender<ContainerMessage>) -> Self {
        Self {
            sender,
            forward_progress: true,
        }
    }

    pub fn unbounded() -> (Self, Receiver<ContainerMessage>) {
        let (sender, receiver) = crossbeam_channel::unbounded();
        (Self::new(sender), receiver)
    }

    pub fn without_progress(mut self) -> Self {
        self.forward_progress = false;
        self
    }
}

impl ContainerListener for ChannelListener {
    fn on_qa_error(&mut self, error: &QaError) -> ErrorDisposition {
        _ = self.sender.send(ContainerMessage::Error(error.clone()));
        ErrorDisposition::Keep
    }

    fn on_progress(&mut self, event: &ProgressEvent) {
        if self.forward_progress {
            _ = self.sender.send(ContainerMessage::Progress(event.clone()));
        }
    }
}

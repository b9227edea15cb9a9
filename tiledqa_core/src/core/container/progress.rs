use std::fmt;

use crate::core::geometry::Envelope;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Step {
    /// A non-container test starts.
    ITestProcessing,
    ITestProcessed,
    TileProcessing,
    TileProcessed,
    DataLoading,
    DataLoaded,
    TestRowCreated,
    RowProcessing,
    RowProcessed,
    TileCompleting,
    TileCompleted,
    Completed,
}

impl fmt::Display for Step {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ProgressEvent {
    pub step: Step,
    pub current: usize,
    pub total: usize,
    pub tile: Option<Envelope>,
    pub test_run: Option<Envelope>,
    pub message: Option<String>,
}

impl ProgressEvent {
    pub fn new(step: Step, current: usize, total: usize) -> Self {
        Self {
            step,
            current,
            total,
            tile: None,
            test_run: None,
            message: None,
        }
    }

    pub fn with_tile(mut self, tile: Option<Envelope>, test_run: Option<Envelope>) -> Self {
        self.tile = tile;
        self.test_run = test_run;
        self
    }

    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = Some(message.into());
        self
    }
}

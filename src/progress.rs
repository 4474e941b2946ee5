//! Fire-and-forget progress and log-line notifications

use std::sync::mpsc::{self, Receiver, Sender};

use serde::Serialize;
use tracing::{error, info};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Log,
    Info,
    Error,
    Success,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProgressUpdate {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub processed_files: Option<usize>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LogLine {
    pub message: String,
    #[serde(rename = "type")]
    pub level: LogLevel,
}

#[derive(Debug, Clone, PartialEq)]
pub enum ProgressEvent {
    Progress(ProgressUpdate),
    Log(LogLine),
}

/// Receiver of progress notifications.
///
/// Implementations must return promptly and never fail the caller: there is
/// no acknowledgment and the engine does not wait on them.
pub trait ProgressSink: Send + Sync {
    fn progress(&self, update: ProgressUpdate);
    fn log(&self, line: LogLine);
}

/// Discards everything
#[derive(Debug, Default, Clone, Copy)]
pub struct NullSink;

impl ProgressSink for NullSink {
    fn progress(&self, _update: ProgressUpdate) {}
    fn log(&self, _line: LogLine) {}
}

/// Forwards events into an unbounded channel; a dropped receiver is ignored
#[derive(Debug, Clone)]
pub struct ChannelSink {
    tx: Sender<ProgressEvent>,
}

impl ChannelSink {
    pub fn new() -> (Self, Receiver<ProgressEvent>) {
        let (tx, rx) = mpsc::channel();
        (Self { tx }, rx)
    }
}

impl ProgressSink for ChannelSink {
    fn progress(&self, update: ProgressUpdate) {
        let _ = self.tx.send(ProgressEvent::Progress(update));
    }

    fn log(&self, line: LogLine) {
        let _ = self.tx.send(ProgressEvent::Log(line));
    }
}

/// Engine-side handle that mirrors user-facing lines into `tracing`
#[derive(Clone, Copy)]
pub struct Reporter<'a> {
    sink: &'a dyn ProgressSink,
}

impl<'a> Reporter<'a> {
    pub fn new(sink: &'a dyn ProgressSink) -> Self {
        Self { sink }
    }

    pub fn phase(&self, message: impl Into<String>) {
        let message = message.into();
        info!("{message}");
        self.sink.progress(ProgressUpdate {
            message: Some(message),
            processed_files: None,
        });
    }

    pub fn file_progress(&self, processed: usize, total: usize) {
        self.sink.progress(ProgressUpdate {
            message: Some(format!("Processing file {processed} of {total}...")),
            processed_files: Some(processed),
        });
    }

    pub fn log(&self, message: impl Into<String>) {
        self.emit(message.into(), LogLevel::Log);
    }

    pub fn info(&self, message: impl Into<String>) {
        self.emit(message.into(), LogLevel::Info);
    }

    pub fn success(&self, message: impl Into<String>) {
        self.emit(message.into(), LogLevel::Success);
    }

    pub fn error(&self, message: impl Into<String>) {
        self.emit(message.into(), LogLevel::Error);
    }

    fn emit(&self, message: String, level: LogLevel) {
        match level {
            LogLevel::Error => error!("{message}"),
            _ => info!("{message}"),
        }
        self.sink.log(LogLine { message, level });
    }
}

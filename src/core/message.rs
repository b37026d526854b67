//! User-facing diagnostics.
//!
//! Problems found while evaluating a channel (type mismatches, NaNs, stuck synchronous
//! runs) are not errors of the calling code, so they are collected here instead of being
//! returned. Every message is also forwarded to `log`.

use log::{error, info, warn};
use std::fmt;
use std::sync::Mutex;

use super::sync::MutexExt;

/// Severity of a [`VoxelMessage`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum MessageSeverity {
    Info,
    Warning,
    Error,
}

impl fmt::Display for MessageSeverity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            MessageSeverity::Info => "Info",
            MessageSeverity::Warning => "Warning",
            MessageSeverity::Error => "Error",
        };
        f.write_str(name)
    }
}

/// A diagnostic reported during evaluation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VoxelMessage {
    pub severity: MessageSeverity,
    pub text: String,
}

/// Thread-safe sink for [`VoxelMessage`]s.
#[derive(Debug, Default)]
pub struct MessageLog {
    messages: Mutex<Vec<VoxelMessage>>,
}

impl MessageLog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Records a message and forwards it to the logger.
    pub fn report(&self, severity: MessageSeverity, text: impl Into<String>) {
        let text = text.into();
        match severity {
            MessageSeverity::Info => info!("{text}"),
            MessageSeverity::Warning => warn!("{text}"),
            MessageSeverity::Error => error!("{text}"),
        }
        self.messages.locked().push(VoxelMessage { severity, text });
    }

    pub fn error(&self, text: impl Into<String>) {
        self.report(MessageSeverity::Error, text);
    }

    pub fn warning(&self, text: impl Into<String>) {
        self.report(MessageSeverity::Warning, text);
    }

    /// Snapshot of every message reported so far.
    pub fn messages(&self) -> Vec<VoxelMessage> {
        self.messages.locked().clone()
    }

    /// Removes and returns every message reported so far.
    pub fn drain(&self) -> Vec<VoxelMessage> {
        std::mem::take(&mut *self.messages.locked())
    }

    pub fn len(&self) -> usize {
        self.messages.locked().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_report_and_drain() {
        let log = MessageLog::new();
        log.warning("first");
        log.error("second");

        assert_eq!(log.len(), 2);
        let messages = log.drain();
        assert_eq!(messages[0].severity, MessageSeverity::Warning);
        assert_eq!(messages[1].text, "second");
        assert!(log.is_empty());
    }
}

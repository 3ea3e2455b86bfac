//! User-facing notifications. The core emits them; presentation layers decide how to show them.

use tokio::sync::mpsc::UnboundedSender;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Level {
    Success,
    Error,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct Notification {
    pub level: Level,
    pub title: String,
    pub message: String,
}

impl Notification {
    pub fn success(title: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            level: Level::Success,
            title: title.into(),
            message: message.into(),
        }
    }

    pub fn error(title: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            level: Level::Error,
            title: title.into(),
            message: message.into(),
        }
    }

    /// Render a single line for the console.
    pub fn to_message(&self) -> String {
        let marker = match self.level {
            Level::Success => "ok",
            Level::Error => "error",
        };
        format!("[{marker}] {}: {}", self.title, self.message)
    }
}

pub(crate) trait NotificationSink: Send + Sync {
    fn notify(&self, notification: Notification);
}

impl NotificationSink for UnboundedSender<Notification> {
    fn notify(&self, notification: Notification) {
        // The receiver going away means nobody is watching anymore.
        let _ = self.send(notification);
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use super::*;
    use std::sync::Mutex;

    #[derive(Default)]
    pub(crate) struct RecordingSink(Mutex<Vec<Notification>>);

    impl RecordingSink {
        pub fn take(&self) -> Vec<Notification> {
            std::mem::take(&mut *self.0.lock().unwrap())
        }
    }

    impl NotificationSink for RecordingSink {
        fn notify(&self, notification: Notification) {
            self.0.lock().unwrap().push(notification);
        }
    }
}

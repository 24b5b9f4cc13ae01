//! User facing notifications.
//!
//! Mutations report their outcome here instead of failing the caller, e.g. when persisting a
//! change fails after the in-memory state was already updated.
use std::sync::mpsc::{self, Receiver, Sender};

use chrono::{DateTime, Utc};
use serde::Serialize;

#[derive(Serialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Level {
    Success,
    Warning,
    Error,
}

#[derive(Serialize, Debug, Clone, PartialEq)]
pub struct Notification {
    pub level: Level,
    pub message: String,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone)]
/// Sending half of the notification channel. Cloned into every component that reports to the user.
pub struct Notifier {
    tx: Option<Sender<Notification>>,
}

impl Notifier {
    pub fn channel() -> (Notifier, Receiver<Notification>) {
        let (tx, rx) = mpsc::channel();
        (Notifier { tx: Some(tx) }, rx)
    }

    /// A notifier that only logs.
    pub fn silent() -> Notifier {
        Notifier { tx: None }
    }

    pub fn success(&self, message: impl Into<String>) {
        self.send(Level::Success, message.into());
    }

    pub fn warning(&self, message: impl Into<String>) {
        self.send(Level::Warning, message.into());
    }

    pub fn error(&self, message: impl Into<String>) {
        self.send(Level::Error, message.into());
    }

    fn send(&self, level: Level, message: String) {
        match level {
            Level::Success => log::info!(target: "wpmon::notify", "{}", message),
            Level::Warning => log::warn!(target: "wpmon::notify", "{}", message),
            Level::Error => log::error!(target: "wpmon::notify", "{}", message),
        }

        if let Some(tx) = &self.tx {
            let notification = Notification {
                level,
                message,
                timestamp: Utc::now(),
            };
            if tx.send(notification).is_err() {
                log::debug!(target: "wpmon::notify", "Notification receiver is gone!");
            }
        }
    }
}

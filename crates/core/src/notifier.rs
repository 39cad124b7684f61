use std::collections::BTreeSet;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::info;
use uuid::Uuid;

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Attachment {
    pub filename: String,
    pub content_type: String,
    pub content: Vec<u8>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutboundMessage {
    /// From address; the notifier's own default applies when unset.
    pub sender: Option<String>,
    pub recipient: String,
    pub subject: String,
    pub body: String,
    pub attachments: Vec<Attachment>,
}

impl OutboundMessage {
    pub fn new(
        recipient: impl Into<String>,
        subject: impl Into<String>,
        body: impl Into<String>,
    ) -> Self {
        Self {
            sender: None,
            recipient: recipient.into(),
            subject: subject.into(),
            body: body.into(),
            attachments: Vec::new(),
        }
    }

    pub fn with_sender(mut self, sender: impl Into<String>) -> Self {
        self.sender = Some(sender.into());
        self
    }

    pub fn with_attachment(mut self, attachment: Attachment) -> Self {
        self.attachments.push(attachment);
        self
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct MessageReceipt {
    pub message_id: String,
}

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum NotifierError {
    #[error("delivery to {recipient} was rejected: {reason}")]
    Rejected { recipient: String, reason: String },
    #[error("notifier unavailable: {0}")]
    Unavailable(String),
}

/// Outbound message delivery. Implementations may fail; callers decide how a
/// failure affects the surrounding workflow.
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn send(&self, message: OutboundMessage) -> Result<MessageReceipt, NotifierError>;
}

/// Writes each message to the log instead of delivering it.
#[derive(Clone, Debug, Default)]
pub struct TracingNotifier;

#[async_trait]
impl Notifier for TracingNotifier {
    async fn send(&self, message: OutboundMessage) -> Result<MessageReceipt, NotifierError> {
        let message_id = format!("MSG-{}", Uuid::new_v4().simple());
        info!(
            event_name = "notifier.message_logged",
            message_id = %message_id,
            sender = message.sender.as_deref().unwrap_or("<default>"),
            recipient = %message.recipient,
            subject = %message.subject,
            attachments = message.attachments.len(),
            "outbound message logged"
        );
        Ok(MessageReceipt { message_id })
    }
}

#[derive(Default)]
struct RecordingState {
    sent: Vec<OutboundMessage>,
    failing: BTreeSet<String>,
    unavailable: bool,
}

/// In-memory notifier for tests; can be told to fail per recipient.
#[derive(Clone, Default)]
pub struct RecordingNotifier {
    state: Arc<Mutex<RecordingState>>,
}

impl RecordingNotifier {
    fn with_state<T>(&self, apply: impl FnOnce(&mut RecordingState) -> T) -> T {
        match self.state.lock() {
            Ok(mut state) => apply(&mut *state),
            Err(poisoned) => {
                let mut state = poisoned.into_inner();
                apply(&mut *state)
            }
        }
    }

    pub fn fail_for(&self, recipient: impl Into<String>) {
        let recipient = recipient.into();
        self.with_state(|state| {
            state.failing.insert(recipient);
        });
    }

    pub fn set_unavailable(&self, unavailable: bool) {
        self.with_state(|state| state.unavailable = unavailable);
    }

    pub fn recover(&self) {
        self.with_state(|state| {
            state.failing.clear();
            state.unavailable = false;
        });
    }

    pub fn sent(&self) -> Vec<OutboundMessage> {
        self.with_state(|state| state.sent.clone())
    }

    pub fn sent_to(&self, recipient: &str) -> Vec<OutboundMessage> {
        self.with_state(|state| {
            state.sent.iter().filter(|message| message.recipient == recipient).cloned().collect()
        })
    }
}

#[async_trait]
impl Notifier for RecordingNotifier {
    async fn send(&self, message: OutboundMessage) -> Result<MessageReceipt, NotifierError> {
        self.with_state(|state| {
            if state.unavailable {
                return Err(NotifierError::Unavailable("relay offline".to_owned()));
            }
            if state.failing.contains(&message.recipient) {
                return Err(NotifierError::Rejected {
                    recipient: message.recipient.clone(),
                    reason: "mailbox unavailable".to_owned(),
                });
            }
            state.sent.push(message);
            Ok(MessageReceipt { message_id: format!("MSG-{}", state.sent.len()) })
        })
    }
}

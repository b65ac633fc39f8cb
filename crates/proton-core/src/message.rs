//! The side channel carrying human-readable progress text from every
//! pipeline component to the printer collaborator.

use std::time::Instant;

use crate::job::JobId;

/// A single progress line.
#[derive(Debug, Clone)]
pub struct Message {
    pub sender_name: String,
    pub time: Instant,
    pub text: String,
    pub jobid: Option<JobId>,
}

impl Message {
    pub fn new(sender_name: impl Into<String>, text: impl Into<String>, jobid: Option<JobId>) -> Self {
        Self {
            sender_name: sender_name.into(),
            time: Instant::now(),
            text: text.into(),
            jobid,
        }
    }
}

/// What travels on `MessageQ`.
pub(crate) enum MessageEnvelope {
    Text(Message),
    EndingSignal,
}

/// Bounded, lossy-in-spirit sender handle shared by every pipeline
/// component. Sends never block: a full or disconnected `MessageQ` simply
/// drops the message, per spec.md §4.1 ("the controller must not deadlock
/// on a full MessageQ").
#[derive(Clone)]
pub(crate) struct MessageSender(flume::Sender<MessageEnvelope>);

impl MessageSender {
    pub(crate) fn new(inner: flume::Sender<MessageEnvelope>) -> Self {
        Self(inner)
    }

    pub(crate) fn send(&self, message: Message) {
        let _ = self.0.try_send(MessageEnvelope::Text(message));
    }

    pub(crate) fn close(&self) {
        let _ = self.0.try_send(MessageEnvelope::EndingSignal);
    }
}

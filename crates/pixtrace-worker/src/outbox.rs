//! Outbound message queue shared by the host collaborator and the
//! session's UI notifications.
//!
//! Nothing here calls into JavaScript: messages are queued while the
//! session is borrowed and posted once the borrow is released, so a
//! callback that re-enters the bridge never finds the session busy.

use pixtrace_core::protocol::UiMessage;
use pixtrace_core::{ExportRequest, HostDocument, Session, SessionEvent, VectorCommit};

/// [`HostDocument`] that turns every operation into a queued
/// [`UiMessage`] for the sandbox.
#[derive(Debug, Default)]
pub struct QueuedHost {
    outbox: Vec<UiMessage>,
}

impl QueuedHost {
    /// Queue a message that did not come from the session.
    pub fn push(&mut self, message: UiMessage) {
        self.outbox.push(message);
    }
}

impl HostDocument for QueuedHost {
    fn request_pixels(&mut self, request: ExportRequest) {
        self.outbox.push(UiMessage::from(request));
    }

    fn commit_vector(&mut self, commit: VectorCommit) {
        self.outbox.push(UiMessage::from(commit));
    }
}

/// Everything the session produced since the last drain: host requests
/// first, then UI notifications in emission order. Notifications with
/// no wire form are logged and dropped.
pub fn drain<C: pixtrace_core::Clock>(session: &mut Session<QueuedHost, C>) -> Vec<UiMessage> {
    let mut messages = std::mem::take(&mut session.host_mut().outbox);
    for event in session.take_events() {
        if let SessionEvent::Diagnostics { request_id, attempts } = &event {
            log::debug!("{request_id}: {} attempt(s)", attempts.len());
        }
        messages.extend(UiMessage::from_session_event(event));
    }
    messages
}

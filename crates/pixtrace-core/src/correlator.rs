//! Request identifiers and stale-response suppression.
//!
//! Preview requests are last-writer-wins by issuance order: only the
//! most recently issued preview id is current, and every earlier one is
//! stale no matter when its result arrives. Convert requests are never
//! superseded; at most one is active and a second is refused.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Opaque identifier of one outbound request.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RequestId(String);

impl RequestId {
    /// Wrap an identifier received from the host.
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// The identifier text.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for RequestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// What a request is for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RequestKind {
    /// Debounced, low-resolution, display only.
    Preview,
    /// Full-resolution, committed into the document.
    Convert,
}

impl RequestKind {
    /// Wire name.
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::Preview => "preview",
            Self::Convert => "convert",
        }
    }
}

/// A request could not be issued.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CorrelatorError {
    /// A convert request is already active.
    #[error("a conversion is already in progress ({0})")]
    ConvertInProgress(RequestId),
}

/// Issues request ids and answers whether a response is still wanted.
#[derive(Debug, Default)]
pub struct RequestCorrelator {
    issued: u64,
    current_preview: Option<RequestId>,
    active_convert: Option<RequestId>,
}

impl RequestCorrelator {
    /// Create a correlator with nothing issued.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Issue a fresh id.
    ///
    /// A preview id supersedes every earlier preview id. A convert id
    /// becomes the active conversion until
    /// [`complete_convert`](Self::complete_convert).
    ///
    /// # Errors
    ///
    /// Returns [`CorrelatorError::ConvertInProgress`] for a convert
    /// request while another is active. Nothing is issued in that case.
    pub fn issue(&mut self, kind: RequestKind) -> Result<RequestId, CorrelatorError> {
        if kind == RequestKind::Convert {
            if let Some(active) = &self.active_convert {
                return Err(CorrelatorError::ConvertInProgress(active.clone()));
            }
        }

        self.issued += 1;
        let id = RequestId(format!("req_{}_{}", kind.name(), self.issued));
        match kind {
            RequestKind::Preview => self.current_preview = Some(id.clone()),
            RequestKind::Convert => self.active_convert = Some(id.clone()),
        }
        Ok(id)
    }

    /// Whether a response carrying `id` should still be applied.
    #[must_use]
    pub fn is_current(&self, kind: RequestKind, id: &RequestId) -> bool {
        let current = match kind {
            RequestKind::Preview => self.current_preview.as_ref(),
            RequestKind::Convert => self.active_convert.as_ref(),
        };
        current == Some(id)
    }

    /// Finish the active conversion. Returns `false` if `id` was not
    /// the active conversion.
    pub fn complete_convert(&mut self, id: &RequestId) -> bool {
        if self.active_convert.as_ref() == Some(id) {
            self.active_convert = None;
            true
        } else {
            false
        }
    }

    /// Make every outstanding preview stale without issuing a new one.
    pub fn cancel_preview(&mut self) {
        self.current_preview = None;
    }

    /// The current preview id, if any.
    #[must_use]
    pub const fn current_preview(&self) -> Option<&RequestId> {
        self.current_preview.as_ref()
    }

    /// The active conversion id, if any.
    #[must_use]
    pub const fn active_convert(&self) -> Option<&RequestId> {
        self.active_convert.as_ref()
    }
}

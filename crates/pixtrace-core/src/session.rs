//! Session: the single explicit application state and its message
//! handlers.
//!
//! Hosts feed [`HostEvent`]s into [`Session::handle_event`], forward
//! user actions to [`Session::set_options`], [`Session::apply_preset`]
//! and [`Session::request_convert`], and call [`Session::run_turn`] from
//! their timer queue. Each turn does at most one step of every in-flight
//! job, so the host stays responsive between turns. Notifications for
//! the UI accumulate and are drained with [`Session::take_events`].
//!
//! Stale previews are never cancelled at the engine level: a superseded
//! preview job keeps running and its result is dropped when it
//! finishes.

use std::collections::VecDeque;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use web_time::Instant;

use crate::batch::{BatchEvent, BatchJob, BatchPoll};
use crate::clock::Clock;
use crate::correlator::{CorrelatorError, RequestCorrelator, RequestId, RequestKind};
use crate::decode::decode_pixels;
use crate::engine::Engines;
use crate::host::{CONVERT_MAX_SIDE, ExportRequest, HostDocument, HostEvent, PREVIEW_MAX_SIDE};
use crate::orchestrator::{AttemptRecord, JobPoll, OrchestratorConfig, TraceJob, TraceRequest};
use crate::presets::Preset;
use crate::types::{
    Dimensions, EngineKind, FailureKind, NodeDescriptor, OptionsError, SourceDescriptor,
    TraceFailure, TraceOptions, TraceOutcome, duration_ms,
};

/// Session tunables.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct SessionConfig {
    /// Quiet period before a scheduled preview is issued.
    #[serde(with = "duration_ms", rename = "previewDebounceMs")]
    pub preview_debounce: Duration,
    /// Longest side of preview exports.
    pub preview_max_side: u32,
    /// Longest side of convert exports.
    pub convert_max_side: u32,
    /// Retry ladder tunables.
    pub orchestrator: OrchestratorConfig,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            preview_debounce: Duration::from_millis(200),
            preview_max_side: PREVIEW_MAX_SIDE,
            convert_max_side: CONVERT_MAX_SIDE,
            orchestrator: OrchestratorConfig::default(),
        }
    }
}

/// A user action the session refused.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SessionError {
    /// Convert with nothing selected.
    #[error("select one or more nodes first")]
    NoSelection,
    /// Convert while a batch is running.
    #[error(transparent)]
    ConvertInProgress(#[from] CorrelatorError),
    /// Out-of-range options.
    #[error(transparent)]
    InvalidOptions(#[from] OptionsError),
}

/// Severity of the status line.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StatusLevel {
    /// Progress and success.
    Info,
    /// Something degraded but usable.
    Warning,
    /// A terminal failure.
    Error,
}

/// The single user-visible status surface.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Status {
    /// Severity.
    pub level: StatusLevel,
    /// Human-readable text.
    pub message: String,
}

/// The preview currently on display.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DisplayedPreview {
    /// Preview request that produced it.
    pub request_id: RequestId,
    /// What was traced.
    pub source: SourceDescriptor,
    /// Normalized markup.
    pub markup: String,
    /// Markup rewritten to scale with its container.
    pub display_markup: String,
    /// Total trace latency.
    #[serde(with = "duration_ms", rename = "elapsedMs")]
    pub elapsed: Duration,
    /// Engine that produced it.
    pub engine: EngineKind,
}

/// Notifications for the UI.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "camelCase", rename_all_fields = "camelCase")]
pub enum SessionEvent {
    /// The status line changed.
    Status(Status),
    /// A preview export was requested.
    PreviewStarted {
        /// New current preview id.
        request_id: RequestId,
    },
    /// A new preview is on display.
    PreviewReady(DisplayedPreview),
    /// The current preview failed.
    PreviewFailed {
        /// Preview request id.
        request_id: RequestId,
        /// Why.
        failure: TraceFailure,
    },
    /// Nothing is selected; the preview was removed.
    PreviewCleared,
    /// Batch progress.
    Batch(BatchEvent),
    /// Attempt diagnostics of a finished preview trace, applied or not.
    Diagnostics {
        /// Request traced.
        request_id: RequestId,
        /// One record per attempt.
        attempts: Vec<AttemptRecord>,
    },
}

/// The whole application state of one plugin session.
pub struct Session<H, C> {
    config: SessionConfig,
    host: H,
    engines: Engines,
    clock: C,
    selection: Vec<NodeDescriptor>,
    options: TraceOptions,
    preset: Option<Preset>,
    correlator: RequestCorrelator,
    preview_due: Option<Instant>,
    previews: Vec<TraceJob>,
    displayed: Option<DisplayedPreview>,
    batch: Option<BatchJob>,
    status: Option<Status>,
    events: VecDeque<SessionEvent>,
}

impl<H, C> std::fmt::Debug for Session<H, C> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("selection", &self.selection)
            .field("options", &self.options)
            .field("correlator", &self.correlator)
            .field("previews", &self.previews.len())
            .field("batch", &self.batch)
            .field("status", &self.status)
            .finish_non_exhaustive()
    }
}

impl<H: HostDocument, C: Clock> Session<H, C> {
    /// Create a session with the default preset and nothing selected.
    #[must_use]
    pub fn new(host: H, engines: Engines, clock: C, config: SessionConfig) -> Self {
        Self {
            config,
            host,
            engines,
            clock,
            selection: Vec::new(),
            options: Preset::default().options(),
            preset: Some(Preset::default()),
            correlator: RequestCorrelator::new(),
            preview_due: None,
            previews: Vec::new(),
            displayed: None,
            batch: None,
            status: None,
            events: VecDeque::new(),
        }
    }

    /// Apply one inbound host event.
    pub fn handle_event(&mut self, event: HostEvent) {
        match event {
            HostEvent::SelectionChanged(nodes) => self.on_selection(nodes),
            HostEvent::PixelsExported {
                request_id,
                is_preview,
                source,
                png,
                options,
            } => {
                if is_preview {
                    self.on_preview_pixels(request_id, source, &png, options);
                } else {
                    self.on_convert_pixels(&request_id, source, &png);
                }
            }
            HostEvent::ExportFailed {
                request_id,
                message,
                ..
            }
            | HostEvent::PlacementFailed {
                request_id,
                message,
                ..
            } => self.on_host_failure(request_id, &message),
            HostEvent::VectorPlaced {
                request_id,
                node_name,
                ..
            } => {
                let mut batch_events = Vec::new();
                let accepted = self
                    .batch
                    .as_mut()
                    .filter(|batch| batch.request_id() == &request_id)
                    .is_some_and(|batch| batch.on_placed(node_name, &mut batch_events));
                if !accepted {
                    log::debug!("{request_id}: ignoring placement outside an active batch");
                }
                self.push_batch_events(batch_events);
            }
            HostEvent::SizeWarning {
                request_id,
                original,
                scaled,
            } => {
                if self.is_live(&request_id) {
                    self.set_status(
                        StatusLevel::Warning,
                        format!("image downscaled from {original} to {scaled} for tracing"),
                    );
                }
            }
        }
    }

    /// Replace the tunables and schedule a debounced preview.
    ///
    /// # Errors
    ///
    /// Returns [`SessionError::InvalidOptions`] and keeps the current
    /// options if any field is out of range.
    pub fn set_options(&mut self, options: TraceOptions) -> Result<(), SessionError> {
        options.validate()?;
        self.options = options;
        self.preset = None;
        self.schedule_preview();
        Ok(())
    }

    /// Replace every tunable with a preset's and schedule a debounced
    /// preview.
    pub fn apply_preset(&mut self, preset: Preset) {
        self.options = preset.options();
        self.preset = Some(preset);
        self.schedule_preview();
    }

    /// Issue a preview for the first selected node right away,
    /// superseding any earlier preview. Returns `None` with nothing
    /// selected.
    pub fn request_preview_now(&mut self) -> Option<RequestId> {
        self.preview_due = None;
        let node_id = self.selection.first()?.id.clone();
        let request_id = self.correlator.issue(RequestKind::Preview).ok()?;
        log::debug!("{request_id}: requesting preview of {node_id}");
        self.host.request_pixels(ExportRequest {
            request_id: request_id.clone(),
            node_id,
            kind: RequestKind::Preview,
            max_side: self.config.preview_max_side,
            options: self.options,
        });
        self.events.push_back(SessionEvent::PreviewStarted {
            request_id: request_id.clone(),
        });
        Some(request_id)
    }

    /// Start converting every selected node.
    ///
    /// # Errors
    ///
    /// Returns [`SessionError::NoSelection`] with nothing selected and
    /// [`SessionError::ConvertInProgress`] while a batch is running.
    pub fn request_convert(&mut self) -> Result<RequestId, SessionError> {
        if self.selection.is_empty() {
            self.set_status(StatusLevel::Error, SessionError::NoSelection.to_string());
            return Err(SessionError::NoSelection);
        }
        let request_id = self.correlator.issue(RequestKind::Convert)?;
        self.set_status(
            StatusLevel::Info,
            format!("converting {} node(s)", self.selection.len()),
        );
        self.batch = Some(BatchJob::new(
            request_id.clone(),
            self.selection.clone(),
            self.options,
            self.config.convert_max_side,
        ));
        Ok(request_id)
    }

    /// Run one scheduling turn: issue a due preview, step every
    /// in-flight preview once, step the batch once.
    ///
    /// Returns `true` if some job can make progress on another turn
    /// right away. Hosts with nothing to do should still wake up at
    /// [`next_deadline`](Self::next_deadline).
    pub fn run_turn(&mut self) -> bool {
        if self
            .preview_due
            .is_some_and(|due| self.clock.now() >= due)
        {
            self.request_preview_now();
        }

        let mut finished = Vec::new();
        for (i, job) in self.previews.iter_mut().enumerate() {
            if let JobPoll::Ready(outcome) = job.step(&mut self.engines, &self.clock) {
                finished.push((i, outcome));
            }
        }
        for (i, outcome) in finished.into_iter().rev() {
            let job = self.previews.swap_remove(i);
            self.on_preview_finished(&job, outcome);
        }

        let mut batch_events = Vec::new();
        let batch_poll = self
            .batch
            .as_mut()
            .filter(|batch| batch.has_work())
            .map(|batch| batch.step(&mut self.engines, &mut self.host, &self.clock, &mut batch_events));
        self.push_batch_events(batch_events);
        if batch_poll == Some(BatchPoll::Finished) {
            self.finish_batch();
        }

        !self.previews.is_empty() || self.batch.as_ref().is_some_and(BatchJob::has_work)
    }

    /// When the next debounced preview is due, if one is scheduled.
    #[must_use]
    pub const fn next_deadline(&self) -> Option<Instant> {
        self.preview_due
    }

    /// Whether nothing is scheduled, in flight or awaited.
    #[must_use]
    pub fn is_idle(&self) -> bool {
        self.preview_due.is_none() && self.previews.is_empty() && self.batch.is_none()
    }

    /// Drain accumulated UI notifications.
    pub fn take_events(&mut self) -> Vec<SessionEvent> {
        self.events.drain(..).collect()
    }

    /// Current selection snapshot.
    #[must_use]
    pub fn selection(&self) -> &[NodeDescriptor] {
        &self.selection
    }

    /// Active tunables.
    #[must_use]
    pub const fn options(&self) -> &TraceOptions {
        &self.options
    }

    /// Preset the tunables came from, `None` once edited by hand.
    #[must_use]
    pub const fn preset(&self) -> Option<Preset> {
        self.preset
    }

    /// The preview on display.
    #[must_use]
    pub const fn preview(&self) -> Option<&DisplayedPreview> {
        self.displayed.as_ref()
    }

    /// The status line.
    #[must_use]
    pub const fn status(&self) -> Option<&Status> {
        self.status.as_ref()
    }

    /// `(current, total)` of the running batch.
    #[must_use]
    pub fn batch_progress(&self) -> Option<(usize, usize)> {
        self.batch.as_ref().map(BatchJob::progress)
    }

    /// Request correlation state.
    #[must_use]
    pub const fn correlator(&self) -> &RequestCorrelator {
        &self.correlator
    }

    /// The host collaborator.
    #[must_use]
    pub const fn host(&self) -> &H {
        &self.host
    }

    /// The host collaborator, mutably.
    pub const fn host_mut(&mut self) -> &mut H {
        &mut self.host
    }

    /// The session configuration.
    #[must_use]
    pub const fn config(&self) -> &SessionConfig {
        &self.config
    }

    fn on_selection(&mut self, nodes: Vec<NodeDescriptor>) {
        log::debug!("selection changed: {} node(s)", nodes.len());
        self.selection = nodes;
        if self.selection.is_empty() {
            self.preview_due = None;
            self.correlator.cancel_preview();
            if self.displayed.take().is_some() || !self.previews.is_empty() {
                self.events.push_back(SessionEvent::PreviewCleared);
            }
        } else {
            self.schedule_preview();
        }
    }

    fn on_preview_pixels(
        &mut self,
        request_id: RequestId,
        source: SourceDescriptor,
        png: &[u8],
        options: TraceOptions,
    ) {
        if !self.correlator.is_current(RequestKind::Preview, &request_id) {
            log::debug!("{request_id}: dropping stale preview pixels");
            return;
        }
        match decode_pixels(png) {
            Ok(pixels) => {
                let request = TraceRequest {
                    request_id,
                    source,
                    options,
                    is_preview: true,
                };
                self.previews.push(TraceJob::new(
                    request,
                    pixels,
                    &self.config.orchestrator,
                    &self.clock,
                ));
            }
            Err(e) => {
                let failure = TraceFailure::new(FailureKind::HostExportFailure, e.to_string());
                self.preview_failed(request_id, failure);
            }
        }
    }

    fn on_convert_pixels(&mut self, request_id: &RequestId, source: SourceDescriptor, png: &[u8]) {
        let mut batch_events = Vec::new();
        let accepted = match self.batch.as_mut() {
            Some(batch) if batch.request_id() == request_id => batch.on_pixels(
                source,
                png,
                &self.config.orchestrator,
                &self.clock,
                &mut batch_events,
            ),
            _ => false,
        };
        if !accepted {
            log::debug!("{request_id}: dropping convert pixels outside an active batch");
        }
        self.push_batch_events(batch_events);
    }

    fn on_host_failure(&mut self, request_id: RequestId, message: &str) {
        if self.correlator.is_current(RequestKind::Preview, &request_id) {
            let failure = TraceFailure::new(FailureKind::HostExportFailure, message);
            self.preview_failed(request_id, failure);
            return;
        }

        let mut batch_events = Vec::new();
        let accepted = self
            .batch
            .as_mut()
            .filter(|batch| batch.request_id() == &request_id)
            .is_some_and(|batch| batch.on_host_failure(message, &mut batch_events));
        if !accepted {
            log::debug!("{request_id}: dropping stale host failure: {message}");
        }
        self.push_batch_events(batch_events);
    }

    fn on_preview_finished(&mut self, job: &TraceJob, outcome: TraceOutcome) {
        let request = job.request();
        let request_id = request.request_id.clone();
        self.events.push_back(SessionEvent::Diagnostics {
            request_id: request_id.clone(),
            attempts: job.attempts().to_vec(),
        });
        if !self.correlator.is_current(RequestKind::Preview, &request_id) {
            log::debug!("{request_id}: dropping stale preview result");
            return;
        }

        match outcome {
            Ok(traced) => {
                let Dimensions { width, height } = request.source.dimensions();
                let preview = DisplayedPreview {
                    request_id,
                    source: request.source.clone(),
                    display_markup: pixtrace_export::preview_markup(&traced.markup, width, height),
                    markup: traced.markup,
                    elapsed: traced.elapsed,
                    engine: traced.engine,
                };
                self.set_status(
                    StatusLevel::Info,
                    format!("preview ready in {} ms", preview.elapsed.as_millis()),
                );
                self.events.push_back(SessionEvent::PreviewReady(preview.clone()));
                self.displayed = Some(preview);
            }
            Err(failure) => self.preview_failed(request_id, failure),
        }
    }

    fn preview_failed(&mut self, request_id: RequestId, failure: TraceFailure) {
        self.set_status(StatusLevel::Error, failure.message.clone());
        self.events
            .push_back(SessionEvent::PreviewFailed { request_id, failure });
    }

    fn finish_batch(&mut self) {
        if let Some(batch) = self.batch.take() {
            self.correlator.complete_convert(batch.request_id());
        }
    }

    fn push_batch_events(&mut self, batch_events: Vec<BatchEvent>) {
        for event in batch_events {
            match &event {
                BatchEvent::Progress {
                    current,
                    total,
                    node_name,
                    ..
                } => self.set_status(
                    StatusLevel::Info,
                    format!("converting {current}/{total}: {node_name}"),
                ),
                BatchEvent::NodeFailed {
                    node_name, message, ..
                } => self.set_status(StatusLevel::Error, format!("{node_name}: {message}")),
                BatchEvent::Complete {
                    converted, total, ..
                } => self.set_status(
                    StatusLevel::Info,
                    format!("converted {converted} of {total} node(s)"),
                ),
                BatchEvent::Aborted { reason, .. } => {
                    self.set_status(StatusLevel::Error, format!("conversion aborted: {reason}"));
                }
                BatchEvent::Started { .. } | BatchEvent::NodeConverted { .. } => {}
            }
            self.events.push_back(SessionEvent::Batch(event));
        }
    }

    fn schedule_preview(&mut self) {
        if self.selection.is_empty() {
            return;
        }
        self.preview_due = Some(self.clock.now() + self.config.preview_debounce);
    }

    fn is_live(&self, request_id: &RequestId) -> bool {
        self.correlator.is_current(RequestKind::Preview, request_id)
            || self.correlator.is_current(RequestKind::Convert, request_id)
    }

    fn set_status(&mut self, level: StatusLevel, message: String) {
        let status = Status { level, message };
        self.events.push_back(SessionEvent::Status(status.clone()));
        self.status = Some(status);
    }
}

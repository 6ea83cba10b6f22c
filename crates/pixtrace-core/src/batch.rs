//! Batch sequencer: convert a snapshot of the selection, one node at a
//! time.
//!
//! Nodes are processed strictly sequentially; only one node's pixels
//! and engine state are alive at once. Each node moves through
//!
//! ```text
//! Announce -> AwaitingExport -> Tracing -> AwaitingPlacement -> (next node) Announce
//! ```
//!
//! `Announce` and `Tracing` are driven by [`BatchJob::step`] on the
//! host's scheduling turns; the two `Awaiting` stages wait for host
//! events. Moving to the next node always happens on a later turn than
//! the one that finished the previous node, so nothing recurses across
//! nodes.
//!
//! A node-local failure (export, decode, trace, placement) is reported
//! and the batch continues. An [`FailureKind::EngineUnavailable`]
//! failure aborts the batch, since every remaining node would fail the
//! same way.

use serde::{Deserialize, Serialize};

use crate::clock::Clock;
use crate::correlator::{RequestId, RequestKind};
use crate::decode::decode_pixels;
use crate::engine::Engines;
use crate::host::{ExportRequest, HostDocument, VectorCommit};
use crate::orchestrator::{AttemptRecord, JobPoll, OrchestratorConfig, TraceJob, TraceRequest};
use crate::types::{FailureKind, NodeDescriptor, NodeId, SourceDescriptor, TraceFailure, TraceOptions};

/// Progress notifications of one batch.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "stage", rename_all = "camelCase", rename_all_fields = "camelCase")]
pub enum BatchEvent {
    /// The batch accepted `total` nodes.
    Started {
        /// Batch id.
        request_id: RequestId,
        /// Node count.
        total: usize,
    },
    /// Work on node `current` (1-based) begins.
    Progress {
        /// Batch id.
        request_id: RequestId,
        /// 1-based node index.
        current: usize,
        /// Node count.
        total: usize,
        /// Display name of the node.
        node_name: String,
    },
    /// A node was traced and placed.
    NodeConverted {
        /// Batch id.
        request_id: RequestId,
        /// Source node.
        node_id: NodeId,
        /// Name of the created vector.
        vector_name: String,
        /// Diagnostics of the trace.
        attempts: Vec<AttemptRecord>,
    },
    /// A node failed; the batch continues unless followed by `Aborted`.
    NodeFailed {
        /// Batch id.
        request_id: RequestId,
        /// Source node.
        node_id: NodeId,
        /// Display name of the node.
        node_name: String,
        /// Failure classification.
        kind: FailureKind,
        /// Message verbatim.
        message: String,
    },
    /// Every node was processed.
    Complete {
        /// Batch id.
        request_id: RequestId,
        /// Nodes placed.
        converted: usize,
        /// Nodes that failed.
        failed: usize,
        /// Node count.
        total: usize,
    },
    /// The batch stopped early.
    Aborted {
        /// Batch id.
        request_id: RequestId,
        /// Why.
        reason: String,
    },
}

/// Result of one [`BatchJob::step`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BatchPoll {
    /// More work can be done on the next turn.
    Pending,
    /// Waiting for a host event.
    Waiting,
    /// The batch completed or aborted.
    Finished,
}

enum Stage {
    Start,
    Announce,
    AwaitingExport,
    Tracing(Box<TraceJob>),
    AwaitingPlacement { attempts: Vec<AttemptRecord> },
    Done,
}

/// One multi-node conversion.
pub struct BatchJob {
    request_id: RequestId,
    nodes: Vec<NodeDescriptor>,
    options: TraceOptions,
    max_side: u32,
    index: usize,
    converted: usize,
    failed: usize,
    stage: Stage,
}

impl std::fmt::Debug for BatchJob {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BatchJob")
            .field("request_id", &self.request_id)
            .field("index", &self.index)
            .field("total", &self.nodes.len())
            .finish_non_exhaustive()
    }
}

impl BatchJob {
    /// Create a batch over a snapshot of nodes and options.
    #[must_use]
    pub const fn new(
        request_id: RequestId,
        nodes: Vec<NodeDescriptor>,
        options: TraceOptions,
        max_side: u32,
    ) -> Self {
        Self {
            request_id,
            nodes,
            options,
            max_side,
            index: 0,
            converted: 0,
            failed: 0,
            stage: Stage::Start,
        }
    }

    /// The batch's request id.
    #[must_use]
    pub const fn request_id(&self) -> &RequestId {
        &self.request_id
    }

    /// `(current, total)` with `current` 1-based; `current` is 0 before
    /// the first node is announced.
    #[must_use]
    pub fn progress(&self) -> (usize, usize) {
        let current = match self.stage {
            Stage::Start => 0,
            _ if self.index >= self.nodes.len() => self.nodes.len(),
            Stage::Announce => self.index,
            _ => self.index + 1,
        };
        (current, self.nodes.len())
    }

    /// The node being processed, if any.
    #[must_use]
    pub fn current_node(&self) -> Option<&NodeDescriptor> {
        match self.stage {
            Stage::AwaitingExport | Stage::Tracing(_) | Stage::AwaitingPlacement { .. } => {
                self.nodes.get(self.index)
            }
            Stage::Start | Stage::Announce | Stage::Done => None,
        }
    }

    /// Whether the batch has completed or aborted.
    #[must_use]
    pub const fn is_finished(&self) -> bool {
        matches!(self.stage, Stage::Done)
    }

    /// Whether [`step`](Self::step) has work to do right now.
    #[must_use]
    pub const fn has_work(&self) -> bool {
        matches!(self.stage, Stage::Start | Stage::Announce | Stage::Tracing(_))
    }

    /// Do one bounded unit of work.
    pub fn step(
        &mut self,
        engines: &mut Engines,
        host: &mut dyn HostDocument,
        clock: &dyn Clock,
        events: &mut Vec<BatchEvent>,
    ) -> BatchPoll {
        match std::mem::replace(&mut self.stage, Stage::Done) {
            Stage::Start => {
                log::info!("{}: converting {} node(s)", self.request_id, self.nodes.len());
                events.push(BatchEvent::Started {
                    request_id: self.request_id.clone(),
                    total: self.nodes.len(),
                });
                self.announce(host, events)
            }
            Stage::Announce => self.announce(host, events),
            Stage::Tracing(mut job) => match job.step(engines, clock) {
                JobPoll::Pending => {
                    self.stage = Stage::Tracing(job);
                    BatchPoll::Pending
                }
                JobPoll::Ready(Ok(traced)) => {
                    let node_id = job.request().source.node_id.clone();
                    host.commit_vector(VectorCommit {
                        request_id: self.request_id.clone(),
                        node_id,
                        markup: traced.markup,
                    });
                    self.stage = Stage::AwaitingPlacement {
                        attempts: job.attempts().to_vec(),
                    };
                    BatchPoll::Waiting
                }
                JobPoll::Ready(Err(failure)) => {
                    if failure.kind == FailureKind::EngineUnavailable {
                        self.node_failed(&failure, events);
                        log::error!("{}: aborting batch: {}", self.request_id, failure.message);
                        events.push(BatchEvent::Aborted {
                            request_id: self.request_id.clone(),
                            reason: failure.message,
                        });
                        BatchPoll::Finished
                    } else {
                        self.node_failed(&failure, events);
                        self.advance();
                        BatchPoll::Pending
                    }
                }
            },
            stage @ (Stage::AwaitingExport | Stage::AwaitingPlacement { .. }) => {
                self.stage = stage;
                BatchPoll::Waiting
            }
            Stage::Done => BatchPoll::Finished,
        }
    }

    /// Pixels arrived for the current node. Returns `false` if the batch
    /// was not waiting for them.
    pub fn on_pixels(
        &mut self,
        source: SourceDescriptor,
        png: &[u8],
        config: &OrchestratorConfig,
        clock: &dyn Clock,
        events: &mut Vec<BatchEvent>,
    ) -> bool {
        if !matches!(self.stage, Stage::AwaitingExport) {
            return false;
        }
        match decode_pixels(png) {
            Ok(pixels) => {
                let request = TraceRequest {
                    request_id: self.request_id.clone(),
                    source,
                    options: self.options,
                    is_preview: false,
                };
                self.stage = Stage::Tracing(Box::new(TraceJob::new(request, pixels, config, clock)));
            }
            Err(e) => {
                let failure = TraceFailure::new(FailureKind::HostExportFailure, e.to_string());
                self.node_failed(&failure, events);
                self.advance();
            }
        }
        true
    }

    /// The host reported a failure for the current node: an export
    /// failure while waiting for pixels, a placement failure while
    /// waiting for placement. Returns `false` if the batch was not
    /// waiting on the host.
    pub fn on_host_failure(&mut self, message: &str, events: &mut Vec<BatchEvent>) -> bool {
        let kind = match self.stage {
            Stage::AwaitingExport => FailureKind::HostExportFailure,
            Stage::AwaitingPlacement { .. } => FailureKind::Unknown,
            _ => return false,
        };
        self.node_failed(&TraceFailure::new(kind, message), events);
        self.advance();
        true
    }

    /// The host placed the current node's vector. Returns `false` if the
    /// batch was not waiting for a placement.
    pub fn on_placed(&mut self, vector_name: String, events: &mut Vec<BatchEvent>) -> bool {
        let attempts = match &mut self.stage {
            Stage::AwaitingPlacement { attempts } => std::mem::take(attempts),
            _ => return false,
        };
        if let Some(node) = self.nodes.get(self.index) {
            log::debug!("{}: placed {}", self.request_id, vector_name);
            events.push(BatchEvent::NodeConverted {
                request_id: self.request_id.clone(),
                node_id: node.id.clone(),
                vector_name,
                attempts,
            });
        }
        self.converted += 1;
        self.advance();
        true
    }

    fn announce(&mut self, host: &mut dyn HostDocument, events: &mut Vec<BatchEvent>) -> BatchPoll {
        let total = self.nodes.len();
        let Some(node) = self.nodes.get(self.index) else {
            log::info!(
                "{}: batch complete, {} converted, {} failed",
                self.request_id,
                self.converted,
                self.failed
            );
            events.push(BatchEvent::Complete {
                request_id: self.request_id.clone(),
                converted: self.converted,
                failed: self.failed,
                total,
            });
            return BatchPoll::Finished;
        };

        events.push(BatchEvent::Progress {
            request_id: self.request_id.clone(),
            current: self.index + 1,
            total,
            node_name: node.name.clone(),
        });
        host.request_pixels(ExportRequest {
            request_id: self.request_id.clone(),
            node_id: node.id.clone(),
            kind: RequestKind::Convert,
            max_side: self.max_side,
            options: self.options,
        });
        self.stage = Stage::AwaitingExport;
        BatchPoll::Waiting
    }

    fn node_failed(&mut self, failure: &TraceFailure, events: &mut Vec<BatchEvent>) {
        self.failed += 1;
        if let Some(node) = self.nodes.get(self.index) {
            log::warn!("{}: {} failed: {}", self.request_id, node.name, failure.message);
            events.push(BatchEvent::NodeFailed {
                request_id: self.request_id.clone(),
                node_id: node.id.clone(),
                node_name: node.name.clone(),
                kind: failure.kind,
                message: failure.message.clone(),
            });
        }
    }

    fn advance(&mut self) {
        self.index += 1;
        self.stage = Stage::Announce;
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::testing::{
        RecordingHost, ScriptedFallback, ScriptedPrimary, encode_png, node, source_for,
        split_source,
    };

    struct Rig {
        engines: Engines,
        host: RecordingHost,
        clock: ManualClock,
        config: OrchestratorConfig,
        events: Vec<BatchEvent>,
    }

    impl Rig {
        fn new(primary: ScriptedPrimary) -> Self {
            Self {
                engines: Engines::new(primary, ScriptedFallback::succeeding()),
                host: RecordingHost::default(),
                clock: ManualClock::new(),
                config: OrchestratorConfig::default(),
                events: Vec::new(),
            }
        }

        /// Step until the batch waits on the host or finishes.
        fn drive(&mut self, batch: &mut BatchJob) -> BatchPoll {
            loop {
                let poll = batch.step(&mut self.engines, &mut self.host, &self.clock, &mut self.events);
                if poll != BatchPoll::Pending {
                    return poll;
                }
            }
        }

        fn deliver(&mut self, batch: &mut BatchJob, png: &[u8]) -> bool {
            let export = self.host.last_export().unwrap().clone();
            let node = node(&export.node_id.0, 8, 8);
            batch.on_pixels(source_for(&node, 8, 8), png, &self.config, &self.clock, &mut self.events)
        }
    }

    fn batch_of(names: &[&str]) -> BatchJob {
        let nodes = names.iter().map(|name| node(name, 8, 8)).collect();
        BatchJob::new(RequestId::new("req_convert_1"), nodes, TraceOptions::default(), 4096)
    }

    #[test]
    fn converts_every_node_in_order() {
        let mut rig = Rig::new(ScriptedPrimary::new(vec![]));
        let mut batch = batch_of(&["a", "b"]);
        let png = encode_png(&split_source(8, 8));

        for name in ["a", "b"] {
            assert_eq!(rig.drive(&mut batch), BatchPoll::Waiting);
            assert_eq!(rig.host.last_export().unwrap().node_id, NodeId::new(name));
            assert_eq!(rig.host.last_export().unwrap().kind, RequestKind::Convert);
            assert!(rig.deliver(&mut batch, &png));
            assert_eq!(rig.drive(&mut batch), BatchPoll::Waiting);
            assert_eq!(rig.host.commits.last().unwrap().node_id, NodeId::new(name));
            assert!(batch.on_placed(format!("{name} / Vector"), &mut rig.events));
        }
        assert_eq!(rig.drive(&mut batch), BatchPoll::Finished);

        assert_eq!(rig.events.first(), Some(&BatchEvent::Started {
            request_id: RequestId::new("req_convert_1"),
            total: 2,
        }));
        assert_eq!(rig.events.last(), Some(&BatchEvent::Complete {
            request_id: RequestId::new("req_convert_1"),
            converted: 2,
            failed: 0,
            total: 2,
        }));
        let progress: Vec<usize> = rig
            .events
            .iter()
            .filter_map(|e| match e {
                BatchEvent::Progress { current, .. } => Some(*current),
                _ => None,
            })
            .collect();
        assert_eq!(progress, vec![1, 2]);
        assert!(rig.events.iter().any(|e| matches!(
            e,
            BatchEvent::NodeConverted { vector_name, attempts, .. }
                if vector_name == "b / Vector" && attempts.len() == 1
        )));
    }

    #[test]
    fn export_failure_skips_to_the_next_node() {
        let mut rig = Rig::new(ScriptedPrimary::new(vec![]));
        let mut batch = batch_of(&["a", "b"]);

        rig.drive(&mut batch);
        assert!(batch.on_host_failure("node has no visible pixels", &mut rig.events));
        assert!(matches!(
            rig.events.last(),
            Some(BatchEvent::NodeFailed {
                kind: FailureKind::HostExportFailure,
                ..
            })
        ));

        assert_eq!(rig.drive(&mut batch), BatchPoll::Waiting);
        assert_eq!(rig.host.last_export().unwrap().node_id, NodeId::new("b"));
        assert_eq!(batch.progress(), (2, 2));
    }

    #[test]
    fn undecodable_pixels_are_an_export_failure() {
        let mut rig = Rig::new(ScriptedPrimary::new(vec![]));
        let mut batch = batch_of(&["a"]);

        rig.drive(&mut batch);
        assert!(rig.deliver(&mut batch, &[1, 2, 3]));
        assert!(matches!(
            rig.events.last(),
            Some(BatchEvent::NodeFailed {
                kind: FailureKind::HostExportFailure,
                ..
            })
        ));
        assert_eq!(rig.drive(&mut batch), BatchPoll::Finished);
        assert!(matches!(
            rig.events.last(),
            Some(BatchEvent::Complete {
                converted: 0,
                failed: 1,
                ..
            })
        ));
    }

    #[test]
    fn placement_failure_is_reported_as_unknown() {
        let mut rig = Rig::new(ScriptedPrimary::new(vec![]));
        let mut batch = batch_of(&["a"]);
        let png = encode_png(&split_source(8, 8));

        rig.drive(&mut batch);
        rig.deliver(&mut batch, &png);
        rig.drive(&mut batch);
        assert!(batch.on_host_failure("markup rejected", &mut rig.events));
        assert!(matches!(
            rig.events.last(),
            Some(BatchEvent::NodeFailed { kind: FailureKind::Unknown, message, .. })
                if message == "markup rejected"
        ));
    }

    #[test]
    fn unavailable_engine_aborts_the_batch() {
        let mut rig = Rig::new(ScriptedPrimary::unavailable("engine failed to load"));
        let mut batch = batch_of(&["a", "b", "c"]);
        let png = encode_png(&split_source(8, 8));

        rig.drive(&mut batch);
        rig.deliver(&mut batch, &png);
        assert_eq!(rig.drive(&mut batch), BatchPoll::Finished);
        assert!(batch.is_finished());
        assert_eq!(rig.host.exports.len(), 1);
        assert_eq!(rig.events.last(), Some(&BatchEvent::Aborted {
            request_id: RequestId::new("req_convert_1"),
            reason: String::from("engine failed to load"),
        }));
    }

    #[test]
    fn events_for_other_stages_are_refused() {
        let mut rig = Rig::new(ScriptedPrimary::new(vec![]));
        let mut batch = batch_of(&["a"]);
        assert!(!batch.on_placed(String::from("a / Vector"), &mut rig.events));
        assert!(!batch.on_host_failure("late", &mut rig.events));

        rig.drive(&mut batch);
        assert!(!batch.on_placed(String::from("a / Vector"), &mut rig.events));
        assert_eq!(batch.current_node().unwrap().name, "a");
    }

    #[test]
    fn empty_batch_completes_immediately() {
        let mut rig = Rig::new(ScriptedPrimary::new(vec![]));
        let mut batch = batch_of(&[]);
        assert_eq!(rig.drive(&mut batch), BatchPoll::Finished);
        assert_eq!(rig.events.len(), 2);
        assert_eq!(batch.progress(), (0, 0));
    }
}

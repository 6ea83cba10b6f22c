//! JSON wire protocol between the host sandbox and the UI side.
//!
//! Every message is an object tagged by `type` in SCREAMING_SNAKE_CASE
//! with camelCase fields. Pixel bytes travel as a JSON array of numbers
//! because the host's message channel cannot carry typed arrays.
//!
//! ```
//! use pixtrace_core::protocol::{HostMessage, parse_host_message};
//!
//! let msg = parse_host_message(r#"{"type":"SELECTION_UPDATE","count":0,"nodes":[]}"#).unwrap();
//! assert!(matches!(msg, HostMessage::SelectionUpdate { .. }));
//! ```

use serde::{Deserialize, Serialize};

use crate::batch::BatchEvent;
use crate::correlator::{RequestId, RequestKind};
use crate::host::{ExportRequest, HostEvent, VectorCommit};
use crate::presets::Preset;
use crate::session::{SessionEvent, Status};
use crate::types::{Dimensions, NodeDescriptor, NodeId, SourceDescriptor, TraceOptions};

/// Malformed wire message.
#[derive(Debug, thiserror::Error)]
pub enum ProtocolError {
    /// Not valid JSON, or not a known message shape.
    #[error("malformed message: {0}")]
    Json(#[from] serde_json::Error),
}

/// A `{w, h}` size as the host sends it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct WireSize {
    /// Width.
    pub w: u32,
    /// Height.
    pub h: u32,
}

impl From<WireSize> for Dimensions {
    fn from(size: WireSize) -> Self {
        Self::new(size.w, size.h)
    }
}

impl From<Dimensions> for WireSize {
    fn from(dims: Dimensions) -> Self {
        Self {
            w: dims.width,
            h: dims.height,
        }
    }
}

/// Defaults announced by the host on startup.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct InitDefaults {
    /// Preset to start with.
    #[serde(default)]
    pub preset: Option<Preset>,
}

/// Messages from the host sandbox.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(
    tag = "type",
    rename_all = "SCREAMING_SNAKE_CASE",
    rename_all_fields = "camelCase"
)]
pub enum HostMessage {
    /// The sandbox is up.
    Init {
        /// Host plugin version.
        #[serde(default)]
        plugin_version: Option<String>,
        /// Startup defaults.
        #[serde(default)]
        defaults: InitDefaults,
    },
    /// Exportable nodes in the current selection.
    SelectionUpdate {
        /// Node count as reported by the host.
        #[serde(default)]
        count: usize,
        /// The nodes.
        nodes: Vec<NodeDescriptor>,
    },
    /// Exported pixels to trace.
    TraceRequest {
        /// Echoed request id.
        request_id: RequestId,
        /// Preview or convert.
        is_preview: bool,
        /// PNG bytes.
        bytes: Vec<u8>,
        /// What was exported.
        source: SourceDescriptor,
        /// Echoed options.
        params: TraceOptions,
    },
    /// The host failed to export or place.
    TraceError {
        /// Echoed request id.
        request_id: RequestId,
        /// Host message.
        message: String,
        /// Node involved, when known.
        #[serde(default)]
        node_id: Option<NodeId>,
    },
    /// A vector node was created.
    ConvertSuccess {
        /// Echoed request id.
        request_id: RequestId,
        /// Created node.
        node_id: NodeId,
        /// Its name.
        node_name: String,
    },
    /// An export was downscaled.
    SizeWarning {
        /// Echoed request id.
        request_id: RequestId,
        /// Document-space size.
        original_size: WireSize,
        /// Exported size.
        scaled_size: WireSize,
    },
}

impl HostMessage {
    /// The session event this message carries; `None` for `INIT`.
    ///
    /// `TRACE_ERROR` covers both export and placement failures; the
    /// session tells them apart by what it is waiting for.
    #[must_use]
    pub fn into_event(self) -> Option<HostEvent> {
        Some(match self {
            Self::Init { .. } => return None,
            Self::SelectionUpdate { nodes, .. } => HostEvent::SelectionChanged(nodes),
            Self::TraceRequest {
                request_id,
                is_preview,
                bytes,
                source,
                params,
            } => HostEvent::PixelsExported {
                request_id,
                is_preview,
                source,
                png: bytes,
                options: params,
            },
            Self::TraceError {
                request_id,
                message,
                node_id,
            } => HostEvent::ExportFailed {
                request_id,
                node_id,
                message,
            },
            Self::ConvertSuccess {
                request_id,
                node_id,
                node_name,
            } => HostEvent::VectorPlaced {
                request_id,
                node_id,
                node_name,
            },
            Self::SizeWarning {
                request_id,
                original_size,
                scaled_size,
            } => HostEvent::SizeWarning {
                request_id,
                original: original_size.into(),
                scaled: scaled_size.into(),
            },
        })
    }
}

/// Messages to the host sandbox and to the UI.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(
    tag = "type",
    rename_all = "SCREAMING_SNAKE_CASE",
    rename_all_fields = "camelCase"
)]
pub enum UiMessage {
    /// The UI side is ready for `INIT`.
    UiReady,
    /// Export a node.
    RequestPixels {
        /// Correlation id.
        request_id: RequestId,
        /// Node to export.
        node_id: NodeId,
        /// Preview or convert.
        is_preview: bool,
        /// Longest exported side.
        max_side: u32,
        /// Options to echo back.
        params: TraceOptions,
    },
    /// Create a vector node from markup.
    CreateVectorNode {
        /// Convert request id.
        request_id: RequestId,
        /// Node to align with.
        node_id: NodeId,
        /// Markup.
        svg: String,
        /// Always `false`; previews are never placed.
        is_preview: bool,
    },
    /// Close the plugin.
    ClosePlugin,
    /// Status line update.
    Status(Status),
    /// Preview export requested.
    PreviewStarted {
        /// Preview id.
        request_id: RequestId,
    },
    /// Preview ready for display.
    PreviewReady {
        /// Preview id.
        request_id: RequestId,
        /// Display markup.
        svg: String,
        /// Total trace latency in milliseconds.
        elapsed_ms: u64,
        /// Engine used.
        engine: crate::types::EngineKind,
    },
    /// Preview failed.
    PreviewFailed {
        /// Preview id.
        request_id: RequestId,
        /// Message.
        message: String,
    },
    /// Preview removed.
    PreviewCleared,
    /// Batch accepted.
    BatchStart {
        /// Batch id.
        request_id: RequestId,
        /// Node count.
        total: usize,
    },
    /// Batch moved to a node.
    BatchProgress {
        /// Batch id.
        request_id: RequestId,
        /// 1-based index.
        current: usize,
        /// Node count.
        total: usize,
        /// Node name.
        node_name: String,
    },
    /// Batch finished or aborted.
    BatchComplete {
        /// Batch id.
        request_id: RequestId,
        /// Nodes placed.
        converted: usize,
        /// Nodes failed.
        failed: usize,
        /// Set when the batch stopped early.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        aborted: Option<String>,
    },
}

impl From<ExportRequest> for UiMessage {
    fn from(request: ExportRequest) -> Self {
        Self::RequestPixels {
            request_id: request.request_id,
            node_id: request.node_id,
            is_preview: request.kind == RequestKind::Preview,
            max_side: request.max_side,
            params: request.options,
        }
    }
}

impl From<VectorCommit> for UiMessage {
    fn from(commit: VectorCommit) -> Self {
        Self::CreateVectorNode {
            request_id: commit.request_id,
            node_id: commit.node_id,
            svg: commit.markup,
            is_preview: false,
        }
    }
}

impl UiMessage {
    /// The UI notification for a session event, if it has one.
    ///
    /// Per-node batch results surface through the status line, so
    /// `NodeConverted`, `NodeFailed` and diagnostics map to nothing.
    #[must_use]
    #[allow(clippy::cast_possible_truncation)]
    pub fn from_session_event(event: SessionEvent) -> Option<Self> {
        Some(match event {
            SessionEvent::Status(status) => Self::Status(status),
            SessionEvent::PreviewStarted { request_id } => Self::PreviewStarted { request_id },
            SessionEvent::PreviewReady(preview) => Self::PreviewReady {
                request_id: preview.request_id,
                svg: preview.display_markup,
                elapsed_ms: preview.elapsed.as_millis() as u64,
                engine: preview.engine,
            },
            SessionEvent::PreviewFailed {
                request_id,
                failure,
            } => Self::PreviewFailed {
                request_id,
                message: failure.message,
            },
            SessionEvent::PreviewCleared => Self::PreviewCleared,
            SessionEvent::Batch(batch) => match batch {
                BatchEvent::Started { request_id, total } => Self::BatchStart { request_id, total },
                BatchEvent::Progress {
                    request_id,
                    current,
                    total,
                    node_name,
                } => Self::BatchProgress {
                    request_id,
                    current,
                    total,
                    node_name,
                },
                BatchEvent::Complete {
                    request_id,
                    converted,
                    failed,
                    ..
                } => Self::BatchComplete {
                    request_id,
                    converted,
                    failed,
                    aborted: None,
                },
                BatchEvent::Aborted { request_id, reason } => Self::BatchComplete {
                    request_id,
                    converted: 0,
                    failed: 0,
                    aborted: Some(reason),
                },
                BatchEvent::NodeConverted { .. } | BatchEvent::NodeFailed { .. } => return None,
            },
            SessionEvent::Diagnostics { .. } => return None,
        })
    }
}

/// Parse one message from the host.
///
/// # Errors
///
/// Returns [`ProtocolError::Json`] for malformed or unknown messages.
pub fn parse_host_message(json: &str) -> Result<HostMessage, ProtocolError> {
    Ok(serde_json::from_str(json)?)
}

/// Serialize one outbound message.
///
/// # Errors
///
/// Returns [`ProtocolError::Json`] if serialization fails.
pub fn encode(message: &UiMessage) -> Result<String, ProtocolError> {
    Ok(serde_json::to_string(message)?)
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::types::{CurveFitting, FailureKind};

    #[test]
    fn trace_request_parses_host_shape() {
        let json = r#"{
            "type": "TRACE_REQUEST",
            "requestId": "req_1",
            "isPreview": true,
            "bytes": [137, 80, 78, 71],
            "source": {
                "nodeId": "1:2", "name": "Logo",
                "width": 256, "height": 128,
                "originalWidth": 1024, "originalHeight": 512
            },
            "params": {
                "preset": "logo_bw", "threshold": 100, "invert": true,
                "filterSpeckle": 2, "cornerThreshold": 45,
                "curveFitting": "polygon", "pathPrecision": 3
            }
        }"#;
        let event = parse_host_message(json).unwrap().into_event().unwrap();
        let HostEvent::PixelsExported {
            request_id,
            is_preview,
            source,
            png,
            options,
        } = event
        else {
            unreachable!("parsed as {event:?}");
        };
        assert_eq!(request_id, RequestId::new("req_1"));
        assert!(is_preview);
        assert_eq!(png, vec![137, 80, 78, 71]);
        assert_eq!(source.original_width, 1024);
        assert_eq!(options.threshold, 100);
        assert_eq!(options.curve_fitting, CurveFitting::Polygon);
    }

    #[test]
    fn size_warning_converts_sizes() {
        let json = r#"{"type":"SIZE_WARNING","requestId":"r","originalSize":{"w":8000,"h":4000},"scaledSize":{"w":4096,"h":2048}}"#;
        let event = parse_host_message(json).unwrap().into_event().unwrap();
        assert_eq!(
            event,
            HostEvent::SizeWarning {
                request_id: RequestId::new("r"),
                original: Dimensions::new(8000, 4000),
                scaled: Dimensions::new(4096, 2048),
            }
        );
    }

    #[test]
    fn init_carries_no_event() {
        let msg = parse_host_message(
            r#"{"type":"INIT","pluginVersion":"1.0.0","engine":{"primary":"x"},"defaults":{"preset":"icon_clean"}}"#,
        )
        .unwrap();
        assert_eq!(
            msg,
            HostMessage::Init {
                plugin_version: Some(String::from("1.0.0")),
                defaults: InitDefaults {
                    preset: Some(Preset::IconClean)
                },
            }
        );
        assert_eq!(msg.into_event(), None);
    }

    #[test]
    fn unknown_type_is_an_error() {
        assert!(parse_host_message(r#"{"type":"REBOOT"}"#).is_err());
        assert!(parse_host_message("not json").is_err());
    }

    #[test]
    fn outbound_messages_use_screaming_types_and_camel_fields() {
        let json = encode(&UiMessage::CreateVectorNode {
            request_id: RequestId::new("req_9"),
            node_id: NodeId::new("3:4"),
            svg: String::from("<svg/>"),
            is_preview: false,
        })
        .unwrap();
        let value: serde_json::Value = serde_json::from_str(&json).unwrap();
        assert_eq!(value["type"], "CREATE_VECTOR_NODE");
        assert_eq!(value["requestId"], "req_9");
        assert_eq!(value["nodeId"], "3:4");
        assert_eq!(value["isPreview"], false);

        assert_eq!(encode(&UiMessage::UiReady).unwrap(), r#"{"type":"UI_READY"}"#);
    }

    #[test]
    fn export_request_becomes_request_pixels() {
        let message = UiMessage::from(ExportRequest {
            request_id: RequestId::new("req_1"),
            node_id: NodeId::new("1:1"),
            kind: RequestKind::Preview,
            max_side: 512,
            options: TraceOptions::default(),
        });
        let value: serde_json::Value = serde_json::to_value(&message).unwrap();
        assert_eq!(value["type"], "REQUEST_PIXELS");
        assert_eq!(value["maxSide"], 512);
        assert_eq!(value["isPreview"], true);
        assert_eq!(value["params"]["cornerThreshold"], 60);
    }

    #[test]
    fn node_results_have_no_ui_message() {
        let event = SessionEvent::Batch(BatchEvent::NodeFailed {
            request_id: RequestId::new("r"),
            node_id: NodeId::new("1"),
            node_name: String::from("n"),
            kind: FailureKind::Unknown,
            message: String::from("m"),
        });
        assert_eq!(UiMessage::from_session_event(event), None);
    }
}

//! The host document collaborator.
//!
//! The core never touches document geometry. It asks the host for
//! pixels and hands it markup to place; the host answers later with
//! [`HostEvent`]s fed into [`Session::handle_event`](crate::Session::handle_event).
//!
//! The free functions at the bottom are shared policy for host
//! implementations: which nodes are exportable, how large exports may
//! be, and how placed vectors are fitted and named.

use serde::{Deserialize, Serialize};

use crate::correlator::{RequestId, RequestKind};
use crate::types::{Dimensions, NodeDescriptor, NodeId, SourceDescriptor, TraceOptions};

/// Ask the host to rasterize one node.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExportRequest {
    /// Echoed back on the answering event.
    pub request_id: RequestId,
    /// Node to export.
    pub node_id: NodeId,
    /// Preview exports are small and display-only.
    pub kind: RequestKind,
    /// Longest side of the exported image, in pixels.
    pub max_side: u32,
    /// Options snapshotted at issuance, echoed back with the pixels.
    pub options: TraceOptions,
}

/// Ask the host to create a vector shape from markup.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VectorCommit {
    /// Convert request the markup belongs to.
    pub request_id: RequestId,
    /// Node the vector replaces visually.
    pub node_id: NodeId,
    /// Normalized vector markup.
    pub markup: String,
}

/// Outbound operations the core issues. Both return immediately; the
/// host answers asynchronously with [`HostEvent`]s.
pub trait HostDocument {
    /// Export pixels for a node.
    fn request_pixels(&mut self, request: ExportRequest);

    /// Create and place a vector shape for a node.
    fn commit_vector(&mut self, commit: VectorCommit);
}

/// Inbound notifications from the host.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HostEvent {
    /// The user's selection changed; only exportable nodes are listed.
    SelectionChanged(Vec<NodeDescriptor>),
    /// PNG bytes for an earlier [`ExportRequest`].
    PixelsExported {
        /// Echoed request id.
        request_id: RequestId,
        /// Whether this answers a preview export.
        is_preview: bool,
        /// What was exported, at what size.
        source: SourceDescriptor,
        /// Encoded image bytes.
        png: Vec<u8>,
        /// Echoed options.
        options: TraceOptions,
    },
    /// The host could not export a node.
    ExportFailed {
        /// Echoed request id.
        request_id: RequestId,
        /// Node that failed, when known.
        node_id: Option<NodeId>,
        /// Host message verbatim.
        message: String,
    },
    /// A committed vector was created.
    VectorPlaced {
        /// Echoed request id.
        request_id: RequestId,
        /// Id of the created node.
        node_id: NodeId,
        /// Name given to the created node.
        node_name: String,
    },
    /// A committed vector could not be created.
    PlacementFailed {
        /// Echoed request id.
        request_id: RequestId,
        /// Node that failed, when known.
        node_id: Option<NodeId>,
        /// Host message verbatim.
        message: String,
    },
    /// An export was downscaled to fit the size cap.
    SizeWarning {
        /// Echoed request id.
        request_id: RequestId,
        /// Document-space size.
        original: Dimensions,
        /// Exported pixel size.
        scaled: Dimensions,
    },
}

impl HostEvent {
    /// The request this event answers, if any.
    #[must_use]
    pub const fn request_id(&self) -> Option<&RequestId> {
        match self {
            Self::SelectionChanged(_) => None,
            Self::PixelsExported { request_id, .. }
            | Self::ExportFailed { request_id, .. }
            | Self::VectorPlaced { request_id, .. }
            | Self::PlacementFailed { request_id, .. }
            | Self::SizeWarning { request_id, .. } => Some(request_id),
        }
    }
}

/// Node types that can never be exported as pixels.
pub const EXCLUDED_NODE_TYPES: [&str; 8] = [
    "SLICE",
    "CONNECTOR",
    "WIDGET",
    "EMBED",
    "LINK_UNFURL",
    "STICKY",
    "SHAPE_WITH_TEXT",
    "STAMP",
];

/// Longest side of a preview export.
pub const PREVIEW_MAX_SIDE: u32 = 512;
/// Longest side of a convert export.
pub const CONVERT_MAX_SIDE: u32 = 4096;

/// Whether a node may be exported: visible, non-zero in both
/// dimensions, and not one of [`EXCLUDED_NODE_TYPES`].
#[must_use]
pub fn is_exportable(node_type: &str, visible: bool, width: f64, height: f64) -> bool {
    visible && width > 0.0 && height > 0.0 && !EXCLUDED_NODE_TYPES.contains(&node_type)
}

/// Export scale keeping the longest side within `max_side`; never
/// upscales.
#[must_use]
pub fn export_scale(width: f64, height: f64, max_side: u32) -> f64 {
    let longest = width.max(height);
    if longest <= f64::from(max_side) || longest <= 0.0 {
        1.0
    } else {
        f64::from(max_side) / longest
    }
}

/// Round document-space size times `scale` to whole pixels.
#[must_use]
#[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
pub fn scaled_dimensions(width: f64, height: f64, scale: f64) -> Dimensions {
    Dimensions::new(
        (width * scale).round().max(0.0) as u32,
        (height * scale).round().max(0.0) as u32,
    )
}

/// Uniform scale fitting a `(width, height)` shape inside a
/// `(width, height)` target while preserving aspect ratio.
#[must_use]
pub fn fit_scale(shape: (f64, f64), target: (f64, f64)) -> f64 {
    if shape.0 <= 0.0 || shape.1 <= 0.0 {
        return 1.0;
    }
    (target.0 / shape.0).min(target.1 / shape.1)
}

/// Name of the vector created from `node_name`.
#[must_use]
pub fn vector_name(node_name: &str) -> String {
    format!("{node_name} / Vector")
}

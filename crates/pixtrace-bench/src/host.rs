//! Filesystem host: every input image file is one selectable node.
//!
//! Exports read and downscale the file and answer synchronously by
//! queueing [`HostEvent`]s; commits write the markup next to the other
//! outputs, sized to fit the original image. The driver drains the
//! queue into the session between turns.

use std::collections::{HashMap, VecDeque};
use std::io::Cursor;
use std::path::{Path, PathBuf};

use image::imageops::FilterType;
use pixtrace_core::decode::{DecodeError, decode_pixels};
use pixtrace_core::host::{export_scale, fit_scale, is_exportable, scaled_dimensions, vector_name};
use pixtrace_core::{
    Dimensions, ExportRequest, HostDocument, HostEvent, NodeDescriptor, NodeId, RequestKind,
    SourceDescriptor, VectorCommit,
};
use pixtrace_export::{normalize_markup, preview_markup};

/// Host node type reported for image files.
const NODE_TYPE: &str = "IMAGE";

/// Why a node could not be exported or placed.
#[derive(Debug, thiserror::Error)]
pub enum HostError {
    /// Reading or writing a file failed.
    #[error("{}: {source}", path.display())]
    Io {
        /// File involved.
        path: PathBuf,
        /// Underlying error.
        source: std::io::Error,
    },

    /// The file is not a decodable image.
    #[error("{}: {source}", path.display())]
    Decode {
        /// File involved.
        path: PathBuf,
        /// Underlying error.
        source: DecodeError,
    },

    /// Re-encoding the export failed.
    #[error("encoding export: {0}")]
    Encode(#[from] image::ImageError),

    /// The node id does not name an opened file.
    #[error("unknown node {0}")]
    UnknownNode(NodeId),
}

#[derive(Debug)]
struct FileNode {
    descriptor: NodeDescriptor,
    path: PathBuf,
}

/// [`HostDocument`] over a set of image files.
#[derive(Debug)]
pub struct FsHost {
    nodes: Vec<FileNode>,
    out_dir: PathBuf,
    inbox: VecDeque<HostEvent>,
    written: Vec<PathBuf>,
    /// Pixel size of the last export per node, i.e. the traced size.
    exported: HashMap<NodeId, Dimensions>,
}

impl FsHost {
    /// Open `paths` as nodes. Files that cannot be read as images, or
    /// that have zero area, are skipped with a warning.
    #[must_use]
    pub fn open(paths: &[PathBuf], out_dir: PathBuf) -> Self {
        let nodes = paths
            .iter()
            .filter_map(|path| match image::image_dimensions(path) {
                Ok((width, height))
                    if is_exportable(NODE_TYPE, true, f64::from(width), f64::from(height)) =>
                {
                    Some(FileNode {
                        descriptor: NodeDescriptor {
                            id: NodeId::new(path.display().to_string()),
                            name: file_stem(path),
                            node_type: String::from(NODE_TYPE),
                            width,
                            height,
                        },
                        path: path.clone(),
                    })
                }
                Ok((width, height)) => {
                    log::warn!("{}: skipping empty {width}x{height} image", path.display());
                    None
                }
                Err(e) => {
                    log::warn!("{}: skipping unreadable image: {e}", path.display());
                    None
                }
            })
            .collect();
        Self {
            nodes,
            out_dir,
            inbox: VecDeque::new(),
            written: Vec::new(),
            exported: HashMap::new(),
        }
    }

    /// Descriptors of every opened node, in input order.
    #[must_use]
    pub fn selection(&self) -> Vec<NodeDescriptor> {
        self.nodes.iter().map(|n| n.descriptor.clone()).collect()
    }

    /// Events produced since the last drain.
    pub fn drain(&mut self) -> Vec<HostEvent> {
        self.inbox.drain(..).collect()
    }

    /// Whether answers are waiting to be drained.
    #[must_use]
    pub fn has_pending(&self) -> bool {
        !self.inbox.is_empty()
    }

    /// Files written by commits, in commit order.
    #[must_use]
    pub fn written(&self) -> &[PathBuf] {
        &self.written
    }

    fn node(&self, id: &NodeId) -> Result<&FileNode, HostError> {
        self.nodes
            .iter()
            .find(|n| &n.descriptor.id == id)
            .ok_or_else(|| HostError::UnknownNode(id.clone()))
    }

    fn export(&self, request: &ExportRequest) -> Result<(SourceDescriptor, Vec<u8>), HostError> {
        let node = self.node(&request.node_id)?;
        let bytes = std::fs::read(&node.path).map_err(|source| HostError::Io {
            path: node.path.clone(),
            source,
        })?;
        let image = decode_pixels(&bytes).map_err(|source| HostError::Decode {
            path: node.path.clone(),
            source,
        })?;

        let (width, height) = image.dimensions();
        let scale = export_scale(f64::from(width), f64::from(height), request.max_side);
        let scaled = scaled_dimensions(f64::from(width), f64::from(height), scale);
        let image = if scaled == Dimensions::new(width, height) {
            image
        } else {
            image::imageops::resize(&image, scaled.width, scaled.height, FilterType::Triangle)
        };

        let mut png = Vec::new();
        image.write_to(&mut Cursor::new(&mut png), image::ImageFormat::Png)?;
        let source = SourceDescriptor {
            node_id: node.descriptor.id.clone(),
            name: node.descriptor.name.clone(),
            width: scaled.width,
            height: scaled.height,
            original_width: width,
            original_height: height,
        };
        Ok((source, png))
    }

    /// Scale the traced markup up (or down) to fit the original image
    /// box, keeping the traced `viewBox`.
    fn fit_markup(&self, node: &FileNode, markup: &str) -> String {
        let original = Dimensions::new(node.descriptor.width, node.descriptor.height);
        let traced = self
            .exported
            .get(&node.descriptor.id)
            .copied()
            .unwrap_or(original);
        let (traced_w, traced_h) = (f64::from(traced.width), f64::from(traced.height));
        let scale = fit_scale(
            (traced_w, traced_h),
            (f64::from(original.width), f64::from(original.height)),
        );
        let placed = scaled_dimensions(traced_w, traced_h, scale);
        let r#unsized = preview_markup(markup, traced.width, traced.height);
        normalize_markup(&r#unsized, placed.width, placed.height)
    }

    fn place(&mut self, commit: &VectorCommit) -> Result<(PathBuf, String), HostError> {
        let node = self.node(&commit.node_id)?;
        let name = vector_name(&node.descriptor.name);
        let path = self.out_dir.join(format!("{}.svg", node.descriptor.name));
        let markup = self.fit_markup(node, &commit.markup);
        log::debug!("{}: writing {name} to {}", commit.request_id, path.display());
        std::fs::write(&path, markup).map_err(|source| HostError::Io {
            path: path.clone(),
            source,
        })?;
        self.written.push(path.clone());
        Ok((path, name))
    }
}

impl HostDocument for FsHost {
    fn request_pixels(&mut self, request: ExportRequest) {
        match self.export(&request) {
            Ok((source, png)) => {
                self.exported
                    .insert(source.node_id.clone(), source.dimensions());
                if source.dimensions() != source.original_dimensions() {
                    self.inbox.push_back(HostEvent::SizeWarning {
                        request_id: request.request_id.clone(),
                        original: source.original_dimensions(),
                        scaled: source.dimensions(),
                    });
                }
                self.inbox.push_back(HostEvent::PixelsExported {
                    request_id: request.request_id,
                    is_preview: request.kind == RequestKind::Preview,
                    source,
                    png,
                    options: request.options,
                });
            }
            Err(e) => self.inbox.push_back(HostEvent::ExportFailed {
                request_id: request.request_id,
                node_id: Some(request.node_id),
                message: e.to_string(),
            }),
        }
    }

    fn commit_vector(&mut self, commit: VectorCommit) {
        match self.place(&commit) {
            Ok((path, node_name)) => self.inbox.push_back(HostEvent::VectorPlaced {
                request_id: commit.request_id,
                node_id: NodeId::new(path.display().to_string()),
                node_name,
            }),
            Err(e) => self.inbox.push_back(HostEvent::PlacementFailed {
                request_id: commit.request_id,
                node_id: Some(commit.node_id),
                message: e.to_string(),
            }),
        }
    }
}

fn file_stem(path: &Path) -> String {
    path.file_stem().map_or_else(
        || path.display().to_string(),
        |stem| stem.to_string_lossy().into_owned(),
    )
}

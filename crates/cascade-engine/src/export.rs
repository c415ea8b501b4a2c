//! Saving rendered images, one frame or a whole sequence.
//!
//! A batch export drives every Read node upstream of the exported node
//! through its frame list. Before each frame the Read nodes are switched to
//! that frame, which dirties them and everything downstream; the node is
//! then re-evaluated and saved as `{stem}_{frame:04}.{ext}`.
//!
//! The loop checks a [`CancelToken`] between frames. Per-frame failures are
//! collected and the loop moves on; a device failure ends it.

use std::ops::Range;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use cascade_compute::ColorSpace;
use cascade_core::builtin::{self, read_props, write_props};
use cascade_core::{EvalPath, GraphModel, NodeId, PropertyValue};
use tracing::{debug, info, warn};

use crate::error::{EvalError, EvalResult};
use crate::scheduler::EvaluationScheduler;

const DEFAULT_EXTENSION: &str = "png";

/// Cooperative cancellation flag shared with whoever may abort an export.
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    /// Requests cancellation. Takes effect before the next frame.
    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// What to export and where.
#[derive(Debug, Clone, PartialEq)]
pub struct ExportRequest {
    /// Node to export.
    pub node: NodeId,
    /// Output file. Required unless `node` is a Write node.
    pub path: Option<PathBuf>,
    /// Frames to export. `None` exports every frame of the upstream Read
    /// nodes, or just the current state when none has more than one.
    pub frames: Option<Range<usize>>,
    /// Transfer encoding. Defaults to the Write node's setting.
    pub color_space: Option<ColorSpace>,
}

impl ExportRequest {
    pub fn new(node: NodeId) -> Self {
        Self { node, path: None, frames: None, color_space: None }
    }

    pub fn with_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.path = Some(path.into());
        self
    }

    pub fn with_frames(mut self, frames: Range<usize>) -> Self {
        self.frames = Some(frames);
        self
    }

    pub fn with_color_space(mut self, color_space: ColorSpace) -> Self {
        self.color_space = Some(color_space);
        self
    }
}

/// One file written by an export.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExportedFrame {
    pub frame: usize,
    pub path: PathBuf,
}

/// A frame that could not be exported.
#[derive(Debug)]
pub struct FrameFailure {
    pub frame: usize,
    pub error: EvalError,
}

/// Outcome of an export that was not aborted by a device failure.
#[derive(Debug, Default)]
pub struct ExportReport {
    /// Files written, in frame order.
    pub written: Vec<ExportedFrame>,
    /// Frames that failed.
    pub failures: Vec<FrameFailure>,
    /// The token was cancelled before every frame was exported.
    pub cancelled: bool,
}

impl ExportReport {
    /// Every requested frame was written.
    pub fn is_complete(&self) -> bool {
        self.failures.is_empty() && !self.cancelled
    }
}

/// Resolved output settings of a request.
#[derive(Debug, Clone, PartialEq)]
struct ExportPlan {
    base: PathBuf,
    color_space: ColorSpace,
    /// `(read node, frame count)` for each sequence source upstream.
    sources: Vec<(NodeId, usize)>,
    frames: Option<Range<usize>>,
}

impl ExportPlan {
    fn resolve(graph: &GraphModel, request: &ExportRequest, fallback: ColorSpace) -> EvalResult<Self> {
        let node = graph.node(request.node)?;
        let desc = graph.descriptor_of(request.node)?;
        let is_write = desc.id == builtin::WRITE;

        let base = match (&request.path, is_write) {
            (Some(path), _) => path.clone(),
            (None, true) => write_node_path(
                node.property(write_props::FOLDER).and_then(PropertyValue::as_text).unwrap_or("."),
                node.property(write_props::FILENAME).and_then(PropertyValue::as_text).unwrap_or(""),
            )
            .ok_or_else(|| EvalError::Export { node: request.node, reason: "Write node has no file name".into() })?,
            (None, false) => {
                return Err(EvalError::Export { node: request.node, reason: "no output path given".into() });
            }
        };

        let color_space = request.color_space.unwrap_or_else(|| {
            if is_write {
                node.property(write_props::COLORSPACE)
                    .and_then(PropertyValue::as_choice)
                    .map(ColorSpace::from_choice)
                    .unwrap_or(fallback)
            } else {
                fallback
            }
        });

        let mut sources = Vec::new();
        for id in graph.upstream_closure(request.node)? {
            if graph.descriptor_of(id)?.eval == EvalPath::LoadImage {
                sources.push((id, graph.node(id)?.files(read_props::FILES).len()));
            }
        }

        let longest = sources.iter().map(|(_, n)| *n).max().unwrap_or(0);
        let frames = match &request.frames {
            Some(range) => Some(range.clone()),
            None if longest > 1 => Some(0..longest),
            None => None,
        };
        Ok(Self { base, color_space, sources, frames })
    }
}

/// `folder/filename`, with `.png` appended when the name has no extension.
pub fn write_node_path(folder: &str, filename: &str) -> Option<PathBuf> {
    if filename.trim().is_empty() {
        return None;
    }
    let mut path = Path::new(folder).join(filename);
    if path.extension().is_none() {
        path.set_extension(DEFAULT_EXTENSION);
    }
    Some(path)
}

/// `{stem}_{frame:04}.{ext}` next to `base`.
pub fn frame_path(base: &Path, frame: usize) -> PathBuf {
    let stem = base.file_stem().and_then(|s| s.to_str()).unwrap_or("frame");
    let ext = base.extension().and_then(|s| s.to_str()).unwrap_or(DEFAULT_EXTENSION);
    base.with_file_name(format!("{stem}_{frame:04}.{ext}"))
}

/// Runs an export, calling `on_frame` after each file is written.
///
/// `fallback` is the color space used when neither the request nor a Write
/// node names one.
///
/// # Errors
///
/// Resolution problems (no path, unknown node) and device failures. Every
/// other failure is recorded per frame in the report.
pub fn export(
    scheduler: &mut EvaluationScheduler,
    graph: &mut GraphModel,
    request: &ExportRequest,
    fallback: ColorSpace,
    cancel: &CancelToken,
    mut on_frame: impl FnMut(&ExportedFrame),
) -> EvalResult<ExportReport> {
    let plan = ExportPlan::resolve(graph, request, fallback)?;
    let mut report = ExportReport::default();

    let Some(frames) = plan.frames.clone() else {
        if cancel.is_cancelled() {
            report.cancelled = true;
            return Ok(report);
        }
        let written = ExportedFrame { frame: 0, path: plan.base.clone() };
        match export_one(scheduler, graph, request.node, &written.path, plan.color_space) {
            Ok(()) => {
                on_frame(&written);
                report.written.push(written);
            }
            Err(err) if err.is_fatal() => return Err(err),
            Err(error) => report.failures.push(FrameFailure { frame: 0, error }),
        }
        return Ok(report);
    };

    info!(node = %request.node, frames = ?frames, sources = plan.sources.len(), "batch export started");
    for frame in frames {
        if cancel.is_cancelled() {
            info!(frame, exported = report.written.len(), "export cancelled");
            report.cancelled = true;
            break;
        }
        for &(source, count) in &plan.sources {
            // Shorter sequences hold their last frame.
            graph.set_frame(source, frame.min(count.saturating_sub(1)))?;
        }
        let written = ExportedFrame { frame, path: frame_path(&plan.base, frame) };
        match export_one(scheduler, graph, request.node, &written.path, plan.color_space) {
            Ok(()) => {
                on_frame(&written);
                report.written.push(written);
            }
            Err(err) if err.is_fatal() => return Err(err),
            Err(error) => {
                warn!(frame, "frame export failed: {error}");
                report.failures.push(FrameFailure { frame, error });
            }
        }
    }
    info!(
        node = %request.node,
        written = report.written.len(),
        failed = report.failures.len(),
        cancelled = report.cancelled,
        "batch export finished"
    );
    Ok(report)
}

fn export_one(
    scheduler: &mut EvaluationScheduler,
    graph: &mut GraphModel,
    node: NodeId,
    path: &Path,
    color_space: ColorSpace,
) -> EvalResult<()> {
    let rendered = scheduler.evaluate(graph, node)?;
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent).map_err(|source| EvalError::Export {
            node,
            reason: format!("cannot create {}: {source}", parent.display()),
        })?;
    }
    scheduler.save(graph, rendered.node, path, color_space)?;
    debug!(%node, path = %path.display(), "frame written");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_frame_path() {
        assert_eq!(frame_path(Path::new("out/shot.png"), 7), PathBuf::from("out/shot_0007.png"));
        assert_eq!(frame_path(Path::new("shot"), 12), PathBuf::from("shot_0012.png"));
    }

    #[test]
    fn test_write_node_path() {
        assert_eq!(write_node_path("renders", "comp"), Some(PathBuf::from("renders/comp.png")));
        assert_eq!(write_node_path(".", "comp.png"), Some(PathBuf::from("./comp.png")));
        assert_eq!(write_node_path(".", "  "), None);
    }

    #[test]
    fn test_cancel_token_is_shared() {
        let token = CancelToken::new();
        let handle = token.clone();
        assert!(!token.is_cancelled());
        handle.cancel();
        assert!(token.is_cancelled());
    }
}

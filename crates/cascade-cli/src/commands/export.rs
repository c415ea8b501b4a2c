//! Export command (single image or frame sequence).

use crate::ExportArgs;
use crate::commands::{EngineOptions, parse_color_space, resolve_node};
use anyhow::{Context, Result, bail};
use cascade_engine::{CancelToken, ExportRequest};
use tracing::warn;

pub fn run(args: ExportArgs, options: &EngineOptions) -> Result<()> {
    let color_space = parse_color_space(args.color_space.as_deref())?;
    let mut engine = options.open(&args.project)?;
    let node = resolve_node(engine.graph(), &args.node)?;

    let mut request = ExportRequest::new(node);
    if let Some(path) = args.output {
        request = request.with_path(path);
    }
    if let Some(frames) = args.frames {
        request = request.with_frames(frames);
    }
    if let Some(color_space) = color_space {
        request = request.with_color_space(color_space);
    }

    let report = engine
        .export(&request, &CancelToken::new())
        .with_context(|| format!("Export of '{}' aborted", args.node))?;

    for frame in &report.written {
        println!("  [{:04}] {}", frame.frame, frame.path.display());
    }
    for failure in &report.failures {
        warn!(frame = failure.frame, "{}", failure.error);
        eprintln!("  [{:04}] FAILED: {}", failure.frame, failure.error);
    }
    println!("{} written, {} failed", report.written.len(), report.failures.len());

    if !report.failures.is_empty() {
        bail!("{} frame(s) failed", report.failures.len());
    }
    Ok(())
}

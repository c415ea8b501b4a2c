//! Single-node render command.

use crate::RenderArgs;
use crate::commands::{EngineOptions, parse_color_space, resolve_node};
use anyhow::{Context, Result};
use tracing::info;

pub fn run(args: RenderArgs, options: &EngineOptions) -> Result<()> {
    let color_space = parse_color_space(args.color_space.as_deref())?;
    let mut engine = options.open(&args.project)?;
    let node = resolve_node(engine.graph(), &args.node)?;

    let rendered = engine
        .render_to(node, &args.output, color_space)
        .with_context(|| format!("Failed to render '{}'", args.node))?;

    let stats = engine.device().stats();
    info!(
        nodes = rendered.evaluated,
        dispatches = stats.dispatches,
        device = engine.device().name(),
        "render complete"
    );
    println!("{} -> {} ({})", args.node, args.output.display(), rendered.size);
    Ok(())
}

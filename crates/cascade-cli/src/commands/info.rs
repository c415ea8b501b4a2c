//! Project info command.
//!
//! Prints the nodes of a document in creation order with their inputs,
//! readiness and what each would display. Needs no compute device.

use crate::InfoArgs;
use crate::commands::EngineOptions;
use anyhow::{Context, Result};
use cascade_core::builtin::{READ, read_props};
use cascade_core::{GraphModel, InputSlot, NodeKindRegistry};
use cascade_engine::EvaluationScheduler;
use std::sync::Arc;

pub fn run(args: InfoArgs, options: &EngineOptions) -> Result<()> {
    let config = options.load_config()?;
    let json = std::fs::read_to_string(&args.project)
        .with_context(|| format!("Failed to read: {}", args.project.display()))?;
    let graph = GraphModel::from_json(Arc::new(NodeKindRegistry::builtin()), &json, config.reject_cycles)
        .with_context(|| format!("Failed to load project: {}", args.project.display()))?;

    println!("{}", args.project.display());
    println!("  Nodes:       {}", graph.len());
    println!("  Connections: {}", graph.connections().count());
    println!();

    for node in graph.nodes() {
        let ready = EvaluationScheduler::can_be_rendered(&graph, node.id())?;
        println!("{} [{}] {}", node.display_name(), node.kind(), node.id());

        for slot in InputSlot::ALL {
            if let Some(conn) = node.input(slot.index()) {
                let source = graph.node(conn.source)?;
                println!("    {:<6} <- {}", slot.to_string(), source.display_name());
            }
        }

        let files = node.files(read_props::FILES);
        if node.kind() == READ && !files.is_empty() {
            println!("    frames: {} (current {})", files.len(), node.frame());
        }

        match EvaluationScheduler::effective_target(&graph, node.id()) {
            Ok(shown) if shown != node.id() => {
                println!("    shows:  {}", graph.node(shown)?.display_name());
            }
            _ => {}
        }
        println!("    ready:  {}", if ready { "yes" } else { "no" });
    }
    Ok(())
}

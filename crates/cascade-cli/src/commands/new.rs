//! Starter project command.

use crate::NewArgs;
use crate::commands::EngineOptions;
use anyhow::{Context, Result, bail};
use cascade_compute::ColorSpace;
use cascade_core::builtin::{self, COLOR_SPACES, read_props, write_props};
use cascade_core::{GraphModel, InputSlot, NodeKindRegistry, PropertyValue};
use std::sync::Arc;

pub fn run(args: NewArgs, options: &EngineOptions) -> Result<()> {
    if args.project.exists() && !args.force {
        bail!("{} exists (use --force to overwrite)", args.project.display());
    }
    let config = options.load_config()?;
    let json = starter_document(&args, config.read_color_space, config.write_color_space)?;
    std::fs::write(&args.project, json).with_context(|| format!("Failed to write: {}", args.project.display()))?;
    println!("{}: read -> blur -> write", args.project.display());
    Ok(())
}

fn choice_of(color_space: ColorSpace) -> PropertyValue {
    let name = color_space.to_string();
    PropertyValue::Choice(COLOR_SPACES.iter().position(|c| *c == name).unwrap_or(0))
}

/// Read -> Blur -> Write, writing next to the project as `<stem>_out.png`.
fn starter_document(args: &NewArgs, read_cs: ColorSpace, write_cs: ColorSpace) -> Result<String> {
    let mut graph = GraphModel::new(Arc::new(NodeKindRegistry::builtin()));
    let read = graph.add_node(builtin::READ, None)?;
    let blur = graph.add_node("blur", None)?;
    let write = graph.add_node(builtin::WRITE, None)?;
    graph.connect(read, 0, blur, InputSlot::Back.index())?;
    graph.connect(blur, 0, write, InputSlot::Back.index())?;

    let files = args.input.iter().map(|p| p.to_string_lossy().into_owned()).collect();
    graph.set_property(read, read_props::FILES, PropertyValue::Files(files))?;
    graph.set_property(read, read_props::COLORSPACE, choice_of(read_cs))?;
    graph.set_property(blur, 0, PropertyValue::Int(args.radius))?;

    let folder = args
        .project
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .map(|p| p.to_string_lossy().into_owned())
        .unwrap_or_else(|| ".".to_string());
    let stem = args.project.file_stem().and_then(|s| s.to_str()).unwrap_or("cascade");
    graph.set_property(write, write_props::FOLDER, PropertyValue::Text(folder))?;
    graph.set_property(write, write_props::FILENAME, PropertyValue::Text(format!("{stem}_out")))?;
    graph.set_property(write, write_props::COLORSPACE, choice_of(write_cs))?;

    graph.move_node(read, 0, 0)?;
    graph.move_node(blur, 200, 0)?;
    graph.move_node(write, 400, 0)?;
    Ok(graph.to_json()?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    #[test]
    fn test_starter_document_loads() {
        let args = NewArgs {
            project: PathBuf::from("shots/comp.json"),
            input: vec![PathBuf::from("plate.png")],
            radius: 2,
            force: false,
        };
        let json = starter_document(&args, ColorSpace::Srgb, ColorSpace::Linear).unwrap();
        let graph = GraphModel::from_json(Arc::new(NodeKindRegistry::builtin()), &json, true).unwrap();
        assert_eq!(graph.len(), 3);
        assert_eq!(graph.connections().count(), 2);

        let write = graph.find_by_name(builtin::WRITE).unwrap();
        let node = graph.node(write).unwrap();
        assert_eq!(node.property(write_props::FILENAME), Some(&PropertyValue::Text("comp_out".into())));
        assert_eq!(node.property(write_props::COLORSPACE), Some(&PropertyValue::Choice(0)));

        let read = graph.find_by_name(builtin::READ).unwrap();
        assert_eq!(graph.node(read).unwrap().current_file(read_props::FILES), Some("plate.png"));
    }
}

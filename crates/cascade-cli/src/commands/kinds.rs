//! Node kind listing.

use crate::KindsArgs;
use anyhow::Result;
use cascade_core::{Control, NodeKindRegistry};

/// Prints every built-in kind, grouped by menu category.
pub fn run(args: KindsArgs, verbose: bool) -> Result<()> {
    let registry = NodeKindRegistry::builtin();
    let mut category = None;

    for kind in registry.iter() {
        if category != Some(kind.category) {
            category = Some(kind.category);
            println!("{}:", kind.category);
        }
        let passes = if kind.pass_count > 1 { format!(", {} passes", kind.pass_count) } else { String::new() };
        println!("  {:<16} {} ({} inputs{passes})", kind.id, kind.title, kind.input_count());

        if args.properties || verbose {
            for (index, spec) in kind.properties.iter().enumerate() {
                println!("      {index}: {:<14} {}", spec.name, describe(&spec.control));
            }
        }
    }
    Ok(())
}

fn describe(control: &Control) -> String {
    match control {
        Control::Float { default, min, max } => format!("float {default} [{min}, {max}]"),
        Control::Int { default, min, max } => format!("int {default} [{min}, {max}]"),
        Control::Bool { default } => format!("bool {default}"),
        Control::Choice { default, options } => format!("choice {} of {}", default, options.join("|")),
        Control::Color { default } => format!("color {default:?}"),
        Control::Size { default } => format!("size {}x{}", default[0], default[1]),
        Control::Files => "files".to_string(),
        Control::Text { default } => format!("text \"{default}\""),
    }
}

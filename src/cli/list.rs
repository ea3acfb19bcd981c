//! List command - show registered components and their options

use anyhow::Result;
use console::style;
use lineage::core::Registration;

pub(super) fn run() -> Result<()> {
    let registry = lineage::builtin_registry();

    println!("{}", style("Analyses").bold().underlined());
    for registration in registry.leaves() {
        let Some(leaf) = registration.prototype().as_leaf() else {
            continue;
        };
        println!(
            "  {:<20} {:<22} {}",
            style(format!("--{}", leaf.flag())).cyan(),
            registration.name(),
            leaf.description()
        );
        print_gating(registration);
    }

    println!();
    println!("{}", style("Plumbing").bold().underlined());
    for registration in registry.plumbing_items() {
        let provides = registration.prototype().provides().join(", ");
        println!("  {:<22} provides {}", registration.name(), provides);
        print_gating(registration);
    }

    println!();
    println!("{}", style("Options").bold().underlined());
    for registration in registry.iter() {
        for option in registration.prototype().configuration_options() {
            println!(
                "  {:<38} {:<6} {:<24} {}",
                style(option.name).cyan(),
                option.kind.to_string(),
                format!("(default: {})", option.default),
                option.description
            );
        }
    }
    println!();
    println!("Set options with {}", style("lineage run --set Name=value").dim());
    Ok(())
}

fn print_gating(registration: &Registration) {
    let features = registration.prototype().features();
    if !features.is_empty() {
        println!(
            "  {:<20} {}",
            "",
            style(format!("feature: {}", features.join(", "))).dim()
        );
    }
}

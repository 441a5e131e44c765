//! List command - Print the registered templates.

use anyhow::{Context, Result};
use tracing::{info, warn};

use records_templates::Records;

use super::Cli;

pub fn execute(cli: &Cli) -> Result<()> {
    let config = cli.load_config()?;
    let records = Records::new(config).context("Failed to load template registry")?;
    let registry = records.registry();
    info!("Listing templates from {:?}", registry.store_path());

    if registry.is_empty() {
        println!("No templates registered in {:?}", registry.store_path());
    }

    for key in registry.keys() {
        let definition = registry.get(key)?;
        println!("{} ({} placeholders)", key, definition.placeholder_count());
    }

    for key in registry.unregistered_sources() {
        warn!(
            "Template source {:?} has no registry entry",
            registry.template_path(&key)
        );
    }

    Ok(())
}

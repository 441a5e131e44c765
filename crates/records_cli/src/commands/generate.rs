//! Generate command - Render and export the records for one subject.

use anyhow::{Context, Result};
use records_templates::{PromptSelector, Records};

use super::Cli;

pub fn execute(cli: &Cli) -> Result<()> {
    let (Some(key), Some(subject)) = (cli.key.as_deref(), cli.subject.as_deref()) else {
        anyhow::bail!("A template key and a subject are required");
    };

    let config = cli.load_config()?;
    let records = Records::new(config).context("Failed to load template registry")?;

    let selector = PromptSelector::stdio();
    let report = records
        .generate(key, subject, &selector)
        .with_context(|| format!("Failed to generate {} for {}", key, subject))?;

    println!("Records written to {}", report.markdown_path.display());
    for file in &report.files {
        println!("  {} <- {}", file.relative, file.source.display());
    }

    Ok(())
}

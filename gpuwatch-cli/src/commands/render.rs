//! Icon rendering command.

use std::path::Path;

use gpuwatch_core::IconRenderer;
use gpuwatch_core::icon::{DEFAULT_ICON_SIZE, RenderSpec};

use crate::cli::GlobalOptions;
use crate::error::CliError;

/// Render command handler
pub fn cmd_render(
    opts: &GlobalOptions,
    percents: &[f32],
    output: &Path,
    size: Option<u32>,
) -> Result<(), CliError> {
    if percents.len() > RenderSpec::MAX_BARS && !opts.quiet {
        eprintln!(
            "Note: only the first {} values are drawn",
            RenderSpec::MAX_BARS
        );
    }

    let renderer = IconRenderer::new(size.unwrap_or(DEFAULT_ICON_SIZE));
    let png = renderer.render(percents)?;
    std::fs::write(output, &png)?;

    if !opts.quiet {
        println!(
            "Wrote {}x{} icon to {}",
            renderer.size(),
            renderer.size(),
            output.display()
        );
    }
    Ok(())
}

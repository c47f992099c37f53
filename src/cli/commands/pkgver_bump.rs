//! pkgver-bump command implementation

use anyhow::{Context, Result};

use super::Session;
use crate::cli::output::{self, status, OutputConfig};
use crate::core::pkgrel_bump;
use crate::infra::recipes;

/// Execute the pkgver-bump command
pub fn execute(session: &Session, packages: &[String], dry: bool, output: &OutputConfig) -> Result<i32> {
    let ctx = session.context(None);
    let graph = recipes::load_graph(&ctx.aports_dir).context("Failed to load package definitions")?;
    let bumps = pkgrel_bump::plan_pkgver(&graph, packages)?;

    if !dry {
        for bump in &bumps {
            recipes::set_version(&bump.path, &bump.to)
                .with_context(|| format!("Failed to update version of '{}'", bump.package))?;
        }
    }

    if output.json {
        output::print_json(&bumps)?;
    } else if !output.quiet {
        let verb = if dry { "would bump" } else { "bumped" };
        for bump in &bumps {
            println!(
                "{} {}: {verb} version {} -> {} (pkgrel 0)",
                status::SUCCESS,
                bump.package,
                bump.from,
                bump.to
            );
        }
    }

    Ok(i32::from(dry && !bumps.is_empty()))
}

//! pkgrel-bump command implementation

use anyhow::{bail, Context, Result};

use super::Session;
use crate::cli::output::{self, status, OutputConfig};
use crate::core::arch::Arch;
use crate::core::pkgrel_bump::{self, PkgrelBump};
use crate::infra::artifacts::ArtifactStore;
use crate::infra::recipes;

/// pkgrel-bump options
#[derive(Debug, Clone)]
pub struct BumpOptions {
    /// Packages bumped by one
    pub packages: Vec<String>,
    /// Derive the packages from the rebuild decisions
    pub auto: bool,
    /// Report only
    pub dry: bool,
    /// Architecture for auto mode
    pub arch: Option<Arch>,
}

/// Execute the pkgrel-bump command
pub async fn execute(session: &Session, options: BumpOptions, output: &OutputConfig) -> Result<i32> {
    let ctx = session.context(options.arch);
    let graph = recipes::load_graph(&ctx.aports_dir).context("Failed to load package definitions")?;

    let bumps: Vec<PkgrelBump> = if options.auto {
        let artifacts =
            ArtifactStore::open(&ctx.artifact_index_path()).context("Failed to open artifact index")?;
        let records = artifacts.records().await;
        pkgrel_bump::plan_auto(&graph, ctx.host, ctx.target, &records)
            .context("Failed to compute automatic pkgrel bumps")?
    } else {
        if options.packages.is_empty() {
            bail!("No packages given. Name packages to bump or pass --auto.");
        }
        pkgrel_bump::plan_manual(&graph, &options.packages)?
    };

    if !options.dry {
        for bump in &bumps {
            recipes::set_pkgrel(&bump.path, bump.to)
                .with_context(|| format!("Failed to update pkgrel of '{}'", bump.package))?;
        }
    }

    if output.json {
        output::print_json(&bumps)?;
    } else if !output.quiet {
        let verb = if options.dry { "would bump" } else { "bumped" };
        for bump in &bumps {
            println!("{} {}: {verb} pkgrel {} -> {}", status::SUCCESS, bump.package, bump.from, bump.to);
        }
        if bumps.is_empty() {
            println!("{} Nothing to bump", status::INFO);
        }
    }

    Ok(i32::from(options.dry && !bumps.is_empty()))
}

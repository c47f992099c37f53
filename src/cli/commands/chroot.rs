//! Chroot management commands
//!
//! `forgeroot chroot list` and `forgeroot chroot zap`.

use anyhow::{Context, Result};
use futures::future::join_all;
use std::sync::Arc;

use super::Session;
use crate::cli::output::{self, status, OutputConfig};
use crate::core::arch::Arch;
use crate::infra::chroot::ChrootManager;
use crate::infra::mounts::SystemMounts;

fn manager(session: &Session) -> ChrootManager {
    ChrootManager::new(Arc::new(session.context(None)), Arc::new(SystemMounts::new()))
}

/// List chroots with their lock and mount status
pub fn execute_list(session: &Session, output: &OutputConfig) -> Result<i32> {
    let chroots = manager(session).list();
    if output.json {
        output::print_json(&chroots)?;
        return Ok(0);
    }

    if chroots.is_empty() {
        if !output.quiet {
            println!("{} No chroots in {}", status::INFO, session.dirs.work_dir().display());
        }
        return Ok(0);
    }
    for chroot in &chroots {
        let mut flags = Vec::new();
        if chroot.mounted {
            flags.push("mounted");
        }
        if chroot.locked {
            flags.push("locked");
        }
        println!(
            "{:<24} {:<12} {} {}",
            chroot.name,
            chroot.arch,
            chroot.path.display(),
            flags.join(",")
        );
    }
    Ok(0)
}

/// Destroy one chroot, or every chroot on disk
pub async fn execute_zap(session: &Session, arch: Option<Arch>, output: &OutputConfig) -> Result<i32> {
    let manager = manager(session);
    let arches: Vec<Arch> = match arch {
        Some(arch) => vec![arch],
        None => manager.list().into_iter().map(|c| c.arch).collect(),
    };

    let results = join_all(arches.iter().map(|&arch| manager.destroy(arch))).await;
    for (arch, result) in arches.iter().zip(results) {
        result.with_context(|| format!("Failed to destroy chroot for {arch}"))?;
        if !output.quiet && !output.json {
            println!("{} Destroyed chroot for {arch}", status::SUCCESS);
        }
    }
    if output.json {
        output::print_json(&arches)?;
    }
    Ok(0)
}

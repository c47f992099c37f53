//! CLI command implementations
//!
//! Each command is implemented in its own submodule.

pub mod build;
pub mod chroot;
pub mod pkgrel_bump;
pub mod pkgver_bump;

use anyhow::{Context, Result};
use clap::Subcommand;
use std::path::Path;

use crate::cli::output::OutputConfig;
use crate::config::settings::Settings;
use crate::core::arch::Arch;
use crate::core::context::RunContext;
use crate::infra::dirs::ForgerootDirs;

/// Available CLI commands
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Build packages and their dependencies
    Build {
        /// Packages to build
        #[arg(required = true)]
        packages: Vec<String>,

        /// Target architecture (defaults to the host)
        #[arg(short, long)]
        arch: Option<Arch>,

        /// Rebuild everything regardless of artifact state
        #[arg(short, long)]
        force: bool,

        /// Never use emulation for foreign architectures
        #[arg(long)]
        strict: bool,

        /// Maximum number of parallel build jobs
        #[arg(short, long)]
        jobs: Option<usize>,

        /// Print the build plan without building
        #[arg(long)]
        dry_run: bool,
    },

    /// Increase package release numbers
    PkgrelBump {
        /// Packages to bump by one
        packages: Vec<String>,

        /// Bump every package whose build dependencies would be rebuilt
        #[arg(long, conflicts_with = "packages")]
        auto: bool,

        /// Report changes without writing them
        #[arg(long)]
        dry: bool,

        /// Architecture considered by --auto (defaults to the host)
        #[arg(short, long)]
        arch: Option<Arch>,
    },

    /// Move packages to their next version, restarting pkgrel at 0
    PkgverBump {
        /// Packages to bump
        #[arg(required = true)]
        packages: Vec<String>,

        /// Report changes without writing them
        #[arg(long)]
        dry: bool,
    },

    /// Manage build chroots
    Chroot {
        #[command(subcommand)]
        command: ChrootCommands,
    },
}

/// Chroot subcommands
#[derive(Subcommand, Debug)]
pub enum ChrootCommands {
    /// List chroots in the work directory
    List,

    /// Destroy chroots
    Zap {
        /// Only destroy the chroot for this architecture
        #[arg(short, long)]
        arch: Option<Arch>,
    },
}

/// Settings and directories shared by every command
#[derive(Debug, Clone)]
pub struct Session {
    pub settings: Settings,
    pub dirs: ForgerootDirs,
    pub host: Arch,
}

impl Session {
    /// Load the configuration file and resolve directories
    pub fn load(config: Option<&Path>) -> Result<Self> {
        let host = Arch::native().context("Unsupported host architecture")?;
        let config_path = config.map_or_else(|| ForgerootDirs::new().config_path(), Path::to_path_buf);
        let settings = Settings::load_from_path(&config_path)
            .with_context(|| format!("Failed to load configuration from {}", config_path.display()))?;
        let dirs = ForgerootDirs::with_configured(settings.paths.work.as_deref(), settings.paths.aports.as_deref());
        let work_dir = dirs.work_dir();
        let dirs = dirs
            .resolve()
            .with_context(|| format!("Failed to prepare work directory {}", work_dir.display()))?;
        tracing::debug!(
            "Work directory {}, package definitions {}",
            dirs.work_dir().display(),
            dirs.aports_dir().display()
        );
        Ok(Self { settings, dirs, host })
    }

    /// Run context for `target`, with the configuration file applied
    pub fn context(&self, target: Option<Arch>) -> RunContext {
        let ctx = RunContext::new(
            self.host,
            target.unwrap_or(self.host),
            self.dirs.work_dir(),
            self.dirs.aports_dir(),
        );
        self.settings.apply(ctx)
    }
}

impl Commands {
    /// Execute the command, returning the process exit code
    pub async fn run(self, output: &OutputConfig, config: Option<&Path>) -> Result<i32> {
        let session = Session::load(config)?;
        match self {
            Self::Build {
                packages,
                arch,
                force,
                strict,
                jobs,
                dry_run,
            } => {
                let options = build::BuildOptions {
                    packages,
                    arch,
                    force,
                    strict,
                    jobs,
                    dry_run,
                };
                build::execute(&session, options, output).await
            }
            Self::PkgrelBump {
                packages,
                auto,
                dry,
                arch,
            } => {
                let options = pkgrel_bump::BumpOptions {
                    packages,
                    auto,
                    dry,
                    arch,
                };
                pkgrel_bump::execute(&session, options, output).await
            }
            Self::PkgverBump { packages, dry } => pkgver_bump::execute(&session, &packages, dry, output),
            Self::Chroot { command } => match command {
                ChrootCommands::List => chroot::execute_list(&session, output),
                ChrootCommands::Zap { arch } => chroot::execute_zap(&session, arch, output).await,
            },
        }
    }
}

//! Default configuration values

/// Default number of concurrently running build jobs
pub const DEFAULT_MAX_JOBS: usize = 2;

/// Default command run inside the chroot to build a package
pub const DEFAULT_BUILD_COMMAND: &[&str] = &["abuild", "-r"];

/// Default interval between lock file polls (in milliseconds)
pub const DEFAULT_LOCK_POLL_MS: u64 = 200;

/// Default location of static qemu user-mode emulators
pub const DEFAULT_EMULATOR_DIR: &str = "/usr/bin";

/// Name of the package definition file
pub const PACKAGE_FILE: &str = "package.toml";

/// Name of the configuration file inside the config directory
pub const CONFIG_FILE: &str = "config.toml";

/// Marker written into a chroot once all mounts are in place
pub const MOUNT_MARKER: &str = ".forgeroot-mounted";

/// Mount point of the package output directory inside a chroot
pub const CHROOT_PACKAGES_DIR: &str = "home/build/packages";

/// Mount point of the package definitions inside a chroot
pub const CHROOT_APORTS_DIR: &str = "mnt/aports";

/// Interval between polls of the artifact index lock (in milliseconds)
pub const INDEX_LOCK_POLL_MS: u64 = 20;

/// Current artifact index format version
pub const ARTIFACT_INDEX_VERSION: u32 = 1;

/// Exit code when a run was interrupted
pub const EXIT_INTERRUPTED: i32 = 130;

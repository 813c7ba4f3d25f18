// ─────────────────────────────────────────────────────────────────────────────
//  tsuki_sim  —  public library API
//
//  Build a PlatformIO project for Zephyr's native_sim board with `west`, stage
//  the resulting host executable where PlatformIO expects firmware, and run
//  it in place of an upload.
// ─────────────────────────────────────────────────────────────────────────────

pub mod build;
pub mod config;
pub mod descriptor;
pub mod error;
pub mod host;
pub mod paths;
pub mod process;
pub mod runner;
pub mod stage;
pub mod target;
pub mod variant;
pub mod west;

pub use build::{build, BuildRequest, Effects};
pub use config::{Invocation, SimConfig};
pub use error::{Result, SimError};
pub use host::{BuildOutcome, HostAdapter, HostDirectives, HostFormat};
pub use paths::PathSet;
pub use runner::{RunOutcome, RunRequest};
pub use stage::{StdFs, ThreadSleeper};
pub use target::TestTarget;
pub use variant::BuildVariant;
pub use west::{Toolchain, West};

/// Build with the real `west`, filesystem and clock.
///
/// ```no_run
/// use tsuki_sim::{Invocation, PathSet, SimConfig};
///
/// let inv   = Invocation::capture(vec!["test".into()]).unwrap();
/// let cfg   = SimConfig::default();
/// let paths = PathSet::resolve(&inv, &cfg);
/// let outcome = tsuki_sim::build_native(&inv, &cfg, &paths, true).unwrap();
/// println!("{}", outcome.result_path.display());
/// ```
pub fn build_native(inv: &Invocation, cfg: &SimConfig, paths: &PathSet, quiet: bool) -> Result<BuildOutcome> {
    let west = West::new(paths);
    build(
        &BuildRequest { inv, cfg, paths, quiet },
        &Effects { toolchain: &west, fs: &StdFs, sleeper: &ThreadSleeper },
    )
}

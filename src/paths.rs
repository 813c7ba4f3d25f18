// ─────────────────────────────────────────────────────────────────────────────
//  tsuki-sim :: paths  —  project / build / Zephyr path discovery
//
//  Resolution order:
//
//  1. project root   PROJECT_DIR  →  current working directory
//  2. build dir      BUILD_DIR    →  <project>/.pio/build/<env_name>
//  3. Zephyr base    ~/zephyrproject   (fixed, not overridable)
//
//  Nothing here checks that the paths exist; consumers do that lazily.
// ─────────────────────────────────────────────────────────────────────────────

use std::path::{Path, PathBuf};

use crate::config::{Invocation, SimConfig, ENV_BUILD_DIR, ENV_PROJECT_DIR};
use crate::error::Result;

/// Name of the Zephyr workspace directory under the user's home.
pub const ZEPHYR_WORKSPACE: &str = "zephyrproject";

/// All filesystem locations one invocation works with.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PathSet {
    pub project_root:   PathBuf,
    /// Host-supplied build directory, before variant suffixing.
    pub build_dir:      PathBuf,
    /// Zephyr workspace (`west` runs from here, `.venv` lives here).
    pub toolchain_base: PathBuf,
    /// Immediate children are test-case folders.
    pub test_root:      PathBuf,
    /// Reusable library sources, always compiled into test builds.
    pub lib_root:       PathBuf,
    /// The project's own Zephyr application (application builds only).
    pub app_root:       PathBuf,
}

impl PathSet {
    pub fn resolve(inv: &Invocation, cfg: &SimConfig) -> Self {
        let project_root = project_root(inv);

        let build_dir = inv.var(ENV_BUILD_DIR)
            .map(PathBuf::from)
            .unwrap_or_else(|| default_build_dir(&project_root, &cfg.env_name));

        // Without any home variable fall back to a relative path; the
        // existence check in the build driver reports it.
        let toolchain_base = inv.home()
            .unwrap_or_else(|| PathBuf::from("~"))
            .join(ZEPHYR_WORKSPACE);

        Self {
            test_root: project_root.join("test"),
            lib_root:  project_root.join("lib"),
            app_root:  project_root.join("zephyr"),
            project_root,
            build_dir,
            toolchain_base,
        }
    }

    /// `<base>/build/zephyr/zephyr.exe`, the single binary `west` produces.
    pub fn toolchain_output(&self) -> PathBuf {
        self.toolchain_base.join("build").join("zephyr").join("zephyr.exe")
    }

    /// `<base>/.venv/bin/activate`, if the workspace ships a virtualenv.
    pub fn venv_activate(&self) -> Option<PathBuf> {
        let p = self.toolchain_base.join(".venv").join("bin").join("activate");
        if p.is_file() { Some(p) } else { None }
    }

    /// PlatformIO's library install root.
    pub fn libdeps_root(&self) -> PathBuf {
        self.project_root.join(".pio").join("libdeps")
    }
}

/// `PROJECT_DIR`, else the working directory.
pub fn project_root(inv: &Invocation) -> PathBuf {
    inv.var(ENV_PROJECT_DIR)
        .map(PathBuf::from)
        .unwrap_or_else(|| inv.cwd().to_path_buf())
}

pub fn default_build_dir(project_root: &Path, env_name: &str) -> PathBuf {
    project_root.join(".pio").join("build").join(env_name)
}

/// Create `dir` and its parents.  Idempotent.
pub fn ensure_dir(dir: &Path) -> Result<()> {
    std::fs::create_dir_all(dir)?;
    Ok(())
}

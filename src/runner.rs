// ─────────────────────────────────────────────────────────────────────────────
//  tsuki-sim :: runner  —  the "upload" step
//
//  For native_sim there is nothing to flash: "uploading" means picking the
//  staged binary out of the build directory and running it on the host.
// ─────────────────────────────────────────────────────────────────────────────

use std::path::{Path, PathBuf};
use std::process::Command;
use std::time::Duration;

use tracing::{debug, warn};

use crate::config::{Invocation, ENV_TEST_FLAG, ENV_UNIT_TEST};
use crate::error::{Result, SimError};
use crate::process::run_with_timeout;
use crate::stage::{set_executable, FIRMWARE_NAME, NATIVE_NAME, PROGRAM_NAME, TEST_RUNNER_NAME};

const TEST_CANDIDATES: &[&str] = &[TEST_RUNNER_NAME, FIRMWARE_NAME, NATIVE_NAME, PROGRAM_NAME];
const APP_CANDIDATES:  &[&str] = &[FIRMWARE_NAME, NATIVE_NAME, PROGRAM_NAME];

#[derive(Debug)]
pub struct RunRequest {
    /// Directory holding the staged artifacts.
    pub build_dir: PathBuf,
    pub is_test:   bool,
    pub timeout:   Duration,
}

/// What the simulated program did.
#[derive(Debug)]
pub struct RunOutcome {
    pub executable: PathBuf,
    pub exit_code:  i32,
    pub stdout:     String,
    pub stderr:     String,
    /// Unity's "N Tests M Failures K Ignored" line, test runs only.
    pub summary:    Option<String>,
}

/// Lookup order for the executable.
pub fn candidates(is_test: bool) -> &'static [&'static str] {
    if is_test { TEST_CANDIDATES } else { APP_CANDIDATES }
}

/// First candidate that exists as a regular file.
pub fn select_executable(build_dir: &Path, is_test: bool) -> Result<PathBuf> {
    let checked: Vec<PathBuf> = candidates(is_test).iter().map(|n| build_dir.join(n)).collect();
    if let Some(found) = checked.iter().find(|p| p.is_file()) {
        return Ok(found.clone());
    }
    Err(SimError::NoExecutable {
        dir: build_dir.display().to_string(),
        checked,
    })
}

/// Select, chmod and run the simulated program.
pub fn run(req: &RunRequest) -> Result<RunOutcome> {
    let exe = select_executable(&req.build_dir, req.is_test)?;

    if let Err(e) = set_executable(&exe) {
        warn!(exe = %exe.display(), error = %e, "could not set executable permissions");
    }

    let mut cmd = Command::new(&exe);
    if let Some(dir) = exe.parent() {
        cmd.current_dir(dir);
    }
    debug!(exe = %exe.display(), is_test = req.is_test, "running simulated program");

    let out = run_with_timeout(&mut cmd, req.timeout)?;
    if out.timed_out {
        return Err(SimError::RunTimedOut {
            exe:  exe.display().to_string(),
            secs: req.timeout.as_secs(),
        });
    }

    let summary = if req.is_test {
        unity_summary(&out.stdout).map(str::to_owned)
    } else {
        None
    };

    Ok(RunOutcome {
        executable: exe,
        exit_code:  out.exit_code,
        stdout:     out.stdout,
        stderr:     out.stderr,
        summary,
    })
}

/// Unity's closing tally, e.g. `5 Tests 1 Failures 0 Ignored`.
pub fn unity_summary(stdout: &str) -> Option<&str> {
    stdout
        .lines()
        .find(|l| l.contains("Tests") && l.contains("Failures") && l.contains("Ignored"))
        .map(str::trim)
}

/// Whether the program being run is a test runner.
pub fn detect_test_run(explicit: bool, inv: &Invocation, build_dir: &Path) -> bool {
    explicit
        || inv.flag(ENV_TEST_FLAG)
        || inv.flag(ENV_UNIT_TEST)
        || build_dir.to_string_lossy().to_lowercase().contains("test")
}

/// `--build-dir` if given, else the resolved default; must exist.
pub fn resolve_build_dir(explicit: Option<PathBuf>, default: &Path) -> Result<PathBuf> {
    let dir = explicit.unwrap_or_else(|| default.to_path_buf());
    if dir.is_dir() {
        Ok(dir)
    } else {
        Err(SimError::BuildDirMissing(dir.display().to_string()))
    }
}

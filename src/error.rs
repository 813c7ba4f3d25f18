// ─────────────────────────────────────────────────────────────────────────────
//  tsuki-sim :: error
// ─────────────────────────────────────────────────────────────────────────────

use std::path::PathBuf;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum SimError {
    #[error("Zephyr installation not found at {path}\n  Hint: run `west init ~/zephyrproject && west update` once")]
    ZephyrNotFound { path: String },

    #[error("Zephyr application directory not found: {path}\n  Hint: the project needs a zephyr/ folder with CMakeLists.txt and prj.conf")]
    AppDirNotFound { path: String },

    #[error("Unity library not found\n  Searched: {}\n  Hint: add `lib_deps = throwtheswitch/Unity` and run `pio pkg install`", .searched.join(", "))]
    UnityNotFound { searched: Vec<String> },

    #[error("`west` could not be started: {0}\n  Hint: activate the Zephyr virtualenv or put west on PATH")]
    WestNotFound(String),

    #[error("Zephyr build failed (exit code {code}):\nSTDOUT:\n{stdout}\nSTDERR:\n{stderr}")]
    BuildFailed { code: i32, stdout: String, stderr: String },

    #[error("Build timed out after {secs} seconds")]
    BuildTimedOut { secs: u64 },

    #[error("Toolchain output not found at {0}")]
    NoToolchainOutput(String),

    #[error("Could not stage {dest} after {attempts} attempt(s): {source}")]
    StageFailed {
        dest:     String,
        attempts: u32,
        #[source]
        source:   std::io::Error,
    },

    #[error("Staged copy {0} does not match the toolchain output")]
    DigestMismatch(String),

    #[error("No executable found in {dir}\n  Checked: {}", .checked.iter().map(|p| p.display().to_string()).collect::<Vec<_>>().join(", "))]
    NoExecutable { dir: String, checked: Vec<PathBuf> },

    #[error("Build directory does not exist: {0}\n  Hint: run the build first")]
    BuildDirMissing(String),

    #[error("Execution of {exe} timed out after {secs} seconds")]
    RunTimedOut { exe: String, secs: u64 },

    #[error("Invalid config {path}: {message}")]
    Config { path: String, message: String },

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error("{0}")]
    Other(String),
}

pub type Result<T> = std::result::Result<T, SimError>;

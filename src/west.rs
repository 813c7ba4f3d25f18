// ─────────────────────────────────────────────────────────────────────────────
//  tsuki-sim :: west  —  external Zephyr build invoker
//
//    . ~/zephyrproject/.venv/bin/activate && cd ~/zephyrproject &&
//    west build -b native_sim --pristine always <app> [-- <cmake args>]
//
//  The result is returned as data.  Deciding that a failed or timed-out build
//  is fatal is the build driver's job.
// ─────────────────────────────────────────────────────────────────────────────

use std::path::{Path, PathBuf};
use std::process::Command;
use std::time::Duration;

use crate::error::{Result, SimError};
use crate::paths::PathSet;
use crate::process::{run_with_timeout, ProcessOutput};

/// Exit code a POSIX shell uses for "command not found".
#[cfg(unix)]
const SHELL_NOT_FOUND: i32 = 127;

/// Outcome of one external build.
pub type BuildResult = ProcessOutput;

/// Inputs to one external build.
#[derive(Debug, Clone)]
pub struct WestRequest<'a> {
    pub app_dir:    &'a Path,
    pub board:      &'a str,
    pub cmake_args: &'a [String],
    pub timeout:    Duration,
}

/// An external toolchain that turns a Zephyr application into one binary.
pub trait Toolchain {
    fn build(&self, req: &WestRequest<'_>) -> Result<BuildResult>;

    /// Where the produced binary lands.
    fn output_binary(&self) -> PathBuf;

    /// Human-readable command line, for progress output.
    fn describe(&self, req: &WestRequest<'_>) -> String;
}

/// `west` from a Zephyr workspace.
#[derive(Debug, Clone)]
pub struct West {
    base:     PathBuf,
    activate: Option<PathBuf>,
    output:   PathBuf,
}

impl West {
    pub fn new(paths: &PathSet) -> Self {
        Self {
            base:     paths.toolchain_base.clone(),
            activate: paths.venv_activate(),
            output:   paths.toolchain_output(),
        }
    }

    fn west_args(req: &WestRequest<'_>) -> Vec<String> {
        let mut args = vec![
            "build".to_owned(),
            "-b".to_owned(), req.board.to_owned(),
            "--pristine".to_owned(), "always".to_owned(),
            req.app_dir.to_string_lossy().into_owned(),
        ];
        if !req.cmake_args.is_empty() {
            args.push("--".to_owned());
            args.extend(req.cmake_args.iter().cloned());
        }
        args
    }

    fn shell_line(&self, req: &WestRequest<'_>) -> String {
        let west = std::iter::once("west".to_owned())
            .chain(Self::west_args(req).iter().map(|a| shell_quote(a)))
            .collect::<Vec<_>>()
            .join(" ");
        let cd = format!("cd {}", shell_quote(&self.base.to_string_lossy()));
        match &self.activate {
            Some(act) => format!(". {} && {cd} && {west}", shell_quote(&act.to_string_lossy())),
            None      => format!("{cd} && {west}"),
        }
    }
}

impl Toolchain for West {
    #[cfg(unix)]
    fn build(&self, req: &WestRequest<'_>) -> Result<BuildResult> {
        let mut cmd = Command::new("/bin/sh");
        cmd.arg("-c").arg(self.shell_line(req));
        let out = run_with_timeout(&mut cmd, req.timeout)?;
        if !out.timed_out && out.exit_code == SHELL_NOT_FOUND {
            return Err(SimError::WestNotFound(out.stderr.trim().to_owned()));
        }
        Ok(out)
    }

    #[cfg(not(unix))]
    fn build(&self, req: &WestRequest<'_>) -> Result<BuildResult> {
        let mut cmd = Command::new("west");
        cmd.args(Self::west_args(req)).current_dir(&self.base);
        run_with_timeout(&mut cmd, req.timeout).map_err(|e| match e.kind() {
            std::io::ErrorKind::NotFound => SimError::WestNotFound(e.to_string()),
            _ => SimError::Io(e),
        })
    }

    fn output_binary(&self) -> PathBuf {
        self.output.clone()
    }

    fn describe(&self, req: &WestRequest<'_>) -> String {
        format!("west {}", Self::west_args(req).join(" "))
    }
}

/// Single-quote `s` for /bin/sh unless it is made only of safe characters.
fn shell_quote(s: &str) -> String {
    let safe = !s.is_empty()
        && s.chars().all(|c| c.is_ascii_alphanumeric() || "-_./=:,+@%".contains(c));
    if safe {
        s.to_owned()
    } else {
        format!("'{}'", s.replace('\'', "'\\''"))
    }
}

// ─────────────────────────────────────────────────────────────────────────────
//  tsuki-sim :: config  —  invocation snapshot + project settings
//
//  Everything the pipeline reads from the outside world is captured once, at
//  entry, into an `Invocation`.  Components receive it by reference and never
//  touch `std::env` themselves.
//
//  Optional project settings live in <project>/tsuki-sim.toml:
//
//    board       = "native_sim"
//    env_name    = "native_sim"
//    test_prefix = "test_"
//
//    [timeouts]
//    build_secs    = 120
//    app_run_secs  = 30
//    test_run_secs = 60
//
//    [retry]
//    attempts = 3
//    delay_ms = 500
// ─────────────────────────────────────────────────────────────────────────────

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;

use crate::error::{Result, SimError};

// ── Environment variables understood by the pipeline ─────────────────────────

pub const ENV_PROJECT_DIR: &str = "PROJECT_DIR";
pub const ENV_BUILD_DIR:   &str = "BUILD_DIR";
pub const ENV_TEST_FLAG:   &str = "PIOTEST";
pub const ENV_UNIT_TEST:   &str = "PIOUNITTEST";
pub const ENV_DEBUG_FLAG:  &str = "DEBUG";
pub const ENV_TEST_NAME:   &str = "PIOTEST_RUNNING_NAME";
pub const ENV_TEST_FILTER: &str = "PIOTEST_FILTER";

pub const CONFIG_FILE: &str = "tsuki-sim.toml";

// ─────────────────────────────────────────────────────────────────────────────
//  Invocation
// ─────────────────────────────────────────────────────────────────────────────

/// Immutable snapshot of environment, forwarded tokens and working directory.
#[derive(Debug, Clone, Default)]
pub struct Invocation {
    env:    BTreeMap<String, String>,
    tokens: Vec<String>,
    cwd:    PathBuf,
}

impl Invocation {
    pub fn new<I, K, V>(env: I, tokens: Vec<String>, cwd: impl Into<PathBuf>) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        Self {
            env: env.into_iter().map(|(k, v)| (k.into(), v.into())).collect(),
            tokens,
            cwd: cwd.into(),
        }
    }

    /// Snapshot the current process.  `tokens` are the host-forwarded
    /// arguments, never the program path.
    pub fn capture(tokens: Vec<String>) -> Result<Self> {
        let cwd = std::env::current_dir()?;
        Ok(Self::new(std::env::vars(), tokens, cwd))
    }

    /// Environment value, treating an empty string as unset.
    pub fn var(&self, name: &str) -> Option<&str> {
        self.env.get(name).map(String::as_str).filter(|v| !v.is_empty())
    }

    /// True if `name` is set to the truthy sentinel "1".
    pub fn flag(&self, name: &str) -> bool {
        self.var(name) == Some("1")
    }

    pub fn tokens(&self) -> &[String] {
        &self.tokens
    }

    pub fn cwd(&self) -> &Path {
        &self.cwd
    }

    /// Home directory (`HOME`, then `USERPROFILE`).
    pub fn home(&self) -> Option<PathBuf> {
        self.var("HOME")
            .or_else(|| self.var("USERPROFILE"))
            .map(PathBuf::from)
    }
}

// ─────────────────────────────────────────────────────────────────────────────
//  Project settings
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct SimConfig {
    /// Zephyr board passed to `west build -b`.
    pub board:       String,
    /// PlatformIO environment name; used for the default build dir and
    /// the libdeps lookup.
    pub env_name:    String,
    /// Prefix shared by every test-case folder.
    pub test_prefix: String,
    pub timeouts:    Timeouts,
    pub retry:       RetryPolicy,
}

impl Default for SimConfig {
    fn default() -> Self {
        Self {
            board:       "native_sim".into(),
            env_name:    "native_sim".into(),
            test_prefix: "test_".into(),
            timeouts:    Timeouts::default(),
            retry:       RetryPolicy::default(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Timeouts {
    pub build_secs:    u64,
    pub app_run_secs:  u64,
    pub test_run_secs: u64,
}

impl Default for Timeouts {
    fn default() -> Self {
        Self { build_secs: 120, app_run_secs: 30, test_run_secs: 60 }
    }
}

impl Timeouts {
    pub fn build(&self) -> Duration {
        Duration::from_secs(self.build_secs)
    }

    pub fn run(&self, is_test: bool) -> Duration {
        Duration::from_secs(if is_test { self.test_run_secs } else { self.app_run_secs })
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct RetryPolicy {
    pub attempts: u32,
    pub delay_ms: u64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self { attempts: 3, delay_ms: 500 }
    }
}

impl RetryPolicy {
    pub fn delay(&self) -> Duration {
        Duration::from_millis(self.delay_ms)
    }
}

impl SimConfig {
    /// Load `<project_root>/tsuki-sim.toml`, or defaults if the file is absent.
    pub fn load(project_root: &Path) -> Result<Self> {
        let path = project_root.join(CONFIG_FILE);
        match std::fs::read_to_string(&path) {
            Ok(text) => Self::from_toml(&text).map_err(|message| SimError::Config {
                path: path.display().to_string(),
                message,
            }),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(Self::default()),
            Err(e) => Err(e.into()),
        }
    }

    pub fn from_toml(text: &str) -> std::result::Result<Self, String> {
        let cfg: SimConfig = toml::from_str(text).map_err(|e| e.to_string())?;
        if cfg.retry.attempts == 0 {
            return Err("retry.attempts must be at least 1".into());
        }
        if cfg.test_prefix.is_empty() {
            return Err("test_prefix must not be empty".into());
        }
        Ok(cfg)
    }
}

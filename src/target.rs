// ─────────────────────────────────────────────────────────────────────────────
//  tsuki-sim :: target  —  which test folder to compile
//
//  PlatformIO does not tell an extra script which test is being built, so we
//  look at every hint it might leave, in a fixed priority order:
//
//  1. PIOTEST_RUNNING_NAME, base64-encoded
//  2. PIOTEST_RUNNING_NAME, plain text
//  3. forwarded tokens (whole token or a path component)
//  4. -f / --filter value, then PIOTEST_FILTER
//  5. the only test_* folder under <project>/test
//
//  First hit wins.  No hit at all means "every test file".
// ─────────────────────────────────────────────────────────────────────────────

use std::fmt;
use std::path::{Path, PathBuf};

use base64::Engine as _;
use tracing::debug;
use walkdir::WalkDir;

use crate::config::{Invocation, ENV_TEST_FILTER, ENV_TEST_NAME};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TestTarget {
    /// A single test-case folder under the test root.
    Named(String),
    /// Every `test_*.c` under the test root.
    All,
}

impl fmt::Display for TestTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TestTarget::Named(n) => f.write_str(n),
            TestTarget::All      => f.write_str("<all>"),
        }
    }
}

/// Inputs every strategy may look at.
pub struct Signals<'a> {
    pub inv:       &'a Invocation,
    pub test_root: &'a Path,
    pub prefix:    &'a str,
}

pub type Strategy = fn(&Signals<'_>) -> Option<String>;

/// Detection strategies in priority order.
pub const STRATEGIES: &[(&str, Strategy)] = &[
    ("env (base64)",  from_encoded_env),
    ("env",           from_plain_env),
    ("arguments",     from_tokens),
    ("filter flag",   from_filter_flag),
    ("filter env",    from_filter_env),
    ("single folder", from_only_folder),
];

/// Outcome of target resolution.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Resolution {
    pub target:   TestTarget,
    /// Name of the strategy that produced the target, if any.
    pub strategy: Option<&'static str>,
    /// Set when a named target had no folder on disk and was widened to All.
    pub missing:  Option<PathBuf>,
}

/// Run the strategy chain.  Never fails.
pub fn resolve(signals: &Signals<'_>) -> Resolution {
    let hit = STRATEGIES.iter().find_map(|(name, strategy)| {
        strategy(signals).map(|target| (*name, target))
    });

    match hit {
        Some((strategy, name)) => {
            debug!(strategy, target = %name, "test target detected");
            let dir = signals.test_root.join(&name);
            if dir.is_dir() {
                Resolution { target: TestTarget::Named(name), strategy: Some(strategy), missing: None }
            } else {
                Resolution { target: TestTarget::All, strategy: Some(strategy), missing: Some(dir) }
            }
        }
        None => Resolution { target: TestTarget::All, strategy: None, missing: None },
    }
}

// ─────────────────────────────────────────────────────────────────────────────
//  Strategies
// ─────────────────────────────────────────────────────────────────────────────

fn from_encoded_env(s: &Signals<'_>) -> Option<String> {
    let raw = s.inv.var(ENV_TEST_NAME)?;
    let bytes = base64::engine::general_purpose::STANDARD.decode(raw.trim()).ok()?;
    let decoded = String::from_utf8(bytes).ok()?;
    let decoded = decoded.trim();
    is_target_name(decoded, s.prefix).then(|| decoded.to_owned())
}

fn from_plain_env(s: &Signals<'_>) -> Option<String> {
    let raw = s.inv.var(ENV_TEST_NAME)?.trim();
    is_target_name(raw, s.prefix).then(|| raw.to_owned())
}

fn from_tokens(s: &Signals<'_>) -> Option<String> {
    s.inv.tokens().iter().find_map(|token| {
        token.split(['/', '\\'])
            .find(|part| is_target_name(part, s.prefix))
            .map(str::to_owned)
    })
}

fn from_filter_flag(s: &Signals<'_>) -> Option<String> {
    let tokens = s.inv.tokens();
    tokens.iter().enumerate().find_map(|(i, token)| {
        let value = if token == "-f" || token == "--filter" {
            tokens.get(i + 1)?.as_str()
        } else if let Some(v) = token.strip_prefix("--filter=") {
            v
        } else if let Some(v) = token.strip_prefix("-f").filter(|v| !v.is_empty()) {
            v
        } else {
            return None;
        };
        last_target_component(value, s.prefix)
    })
}

fn from_filter_env(s: &Signals<'_>) -> Option<String> {
    s.inv.var(ENV_TEST_FILTER)?
        .split_whitespace()
        .find_map(|word| last_target_component(word, s.prefix))
}

fn from_only_folder(s: &Signals<'_>) -> Option<String> {
    let folders = test_folders(s.test_root, s.prefix);
    match folders.as_slice() {
        [only] => Some(only.clone()),
        [] => None,
        many => {
            debug!(count = many.len(), "several test folders, none selected");
            None
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
//  Helpers
// ─────────────────────────────────────────────────────────────────────────────

/// A usable target name: carries the prefix, has something after it, and is
/// not a glob pattern.
fn is_target_name(s: &str, prefix: &str) -> bool {
    s.len() > prefix.len()
        && s.starts_with(prefix)
        && !s.contains(['*', '?', '[', ']'])
        && !s.contains(char::is_whitespace)
}

fn last_target_component(value: &str, prefix: &str) -> Option<String> {
    value.split(['/', '\\'])
        .filter(|part| is_target_name(part, prefix))
        .last()
        .map(str::to_owned)
}

/// Immediate subdirectories of `test_root` whose names carry `prefix`, sorted.
pub fn test_folders(test_root: &Path, prefix: &str) -> Vec<String> {
    let mut names: Vec<String> = WalkDir::new(test_root)
        .min_depth(1)
        .max_depth(1)
        .into_iter()
        .flatten()
        .filter(|e| e.file_type().is_dir())
        .map(|e| e.file_name().to_string_lossy().to_string())
        .filter(|n| n.starts_with(prefix))
        .collect();
    names.sort();
    names
}

/// Source files a test build will pick up for `target`.
pub fn test_sources(test_root: &Path, target: &TestTarget, prefix: &str) -> Vec<PathBuf> {
    let is_c = |p: &Path| p.extension().and_then(|e| e.to_str()) == Some("c");

    let mut files: Vec<PathBuf> = match target {
        TestTarget::Named(name) => WalkDir::new(test_root.join(name))
            .max_depth(1)
            .into_iter()
            .flatten()
            .filter(|e| e.file_type().is_file() && is_c(e.path()))
            .map(|e| e.into_path())
            .collect(),
        TestTarget::All => WalkDir::new(test_root)
            .into_iter()
            .flatten()
            .filter(|e| e.file_type().is_file() && is_c(e.path()))
            .filter(|e| e.file_name().to_string_lossy().starts_with(prefix))
            .map(|e| e.into_path())
            .collect(),
    };
    files.sort();
    files
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use std::fs;

    fn b64(s: &str) -> String {
        base64::engine::general_purpose::STANDARD.encode(s)
    }

    fn project(folders: &[&str]) -> tempfile::TempDir {
        let tmp = tempfile::tempdir().unwrap();
        for f in folders {
            let dir = tmp.path().join("test").join(f);
            fs::create_dir_all(&dir).unwrap();
            fs::write(dir.join(format!("{f}.c")), "void t(void) {}").unwrap();
        }
        tmp
    }

    fn run(tmp: &tempfile::TempDir, env: &[(&str, &str)], tokens: &[&str]) -> Resolution {
        let inv = Invocation::new(
            env.iter().copied(),
            tokens.iter().map(|s| s.to_string()).collect(),
            tmp.path(),
        );
        let test_root = tmp.path().join("test");
        resolve(&Signals { inv: &inv, test_root: &test_root, prefix: "test_" })
    }

    #[test]
    fn single_folder_is_selected_without_hints() {
        let tmp = project(&["test_sum"]);
        let r = run(&tmp, &[], &[]);
        assert_eq!(r.target, TestTarget::Named("test_sum".into()));
        assert_eq!(r.strategy, Some("single folder"));
    }

    #[test]
    fn encoded_env_beats_tokens() {
        let tmp = project(&["test_math", "test_other"]);
        let r = run(&tmp, &[("PIOTEST_RUNNING_NAME", &b64("test_math"))], &["test_other"]);
        assert_eq!(r.target, TestTarget::Named("test_math".into()));
        assert_eq!(r.strategy, Some("env (base64)"));
    }

    #[test]
    fn plain_env_used_when_not_base64() {
        let tmp = project(&["test_sum", "test_string"]);
        let r = run(&tmp, &[("PIOTEST_RUNNING_NAME", "test_string")], &[]);
        assert_eq!(r.target, TestTarget::Named("test_string".into()));
        assert_eq!(r.strategy, Some("env"));
    }

    #[test]
    fn undecodable_env_is_not_fatal() {
        let tmp = project(&["test_sum", "test_math"]);
        let r = run(&tmp, &[("PIOTEST_RUNNING_NAME", "%%%not-base64%%%")], &["test/test_math/x.c"]);
        assert_eq!(r.target, TestTarget::Named("test_math".into()));
        assert_eq!(r.strategy, Some("arguments"));
    }

    #[test]
    fn filter_env_word_is_used() {
        let tmp = project(&["test_sum", "test_math"]);
        let r = run(&tmp, &[("PIOTEST_FILTER", "native/test_math")], &[]);
        assert_eq!(r.target, TestTarget::Named("test_math".into()));
        assert_eq!(r.strategy, Some("filter env"));
    }

    #[test]
    fn tokens_beat_filter_env() {
        let tmp = project(&["test_a", "test_b"]);
        let r = run(&tmp, &[("PIOTEST_FILTER", "test_a")], &["test_b"]);
        assert_eq!(r.target, TestTarget::Named("test_b".into()));
        assert_eq!(r.strategy, Some("arguments"));
    }

    #[test]
    fn path_component_of_token_is_found() {
        let tmp = project(&["test_sum", "test_math"]);
        let r = run(&tmp, &[], &["--project-dir", "x", "test\\test_sum\\test_sum.c"]);
        assert_eq!(r.target, TestTarget::Named("test_sum".into()));
    }

    #[test]
    fn filter_flag_equals_form() {
        let tmp = project(&["test_sum", "test_math"]);
        let r = run(&tmp, &[], &["--filter=test_math"]);
        assert_eq!(r.target, TestTarget::Named("test_math".into()));
        assert_eq!(r.strategy, Some("filter flag"));

        let r = run(&tmp, &[], &["-ftest_sum"]);
        assert_eq!(r.target, TestTarget::Named("test_sum".into()));
        assert_eq!(r.strategy, Some("filter flag"));
    }

    #[test]
    fn filter_values_that_look_like_tokens_are_arguments() {
        // A separate `-f` value, or a path after `--filter=`, already
        // matches as a forwarded token, which ranks higher.
        let tmp = project(&["test_sum", "test_math"]);

        let r = run(&tmp, &[], &["-f", "test_math"]);
        assert_eq!(r.target, TestTarget::Named("test_math".into()));
        assert_eq!(r.strategy, Some("arguments"));

        let r = run(&tmp, &[], &["--filter=native/test_math"]);
        assert_eq!(r.target, TestTarget::Named("test_math".into()));
        assert_eq!(r.strategy, Some("arguments"));
    }

    #[test]
    fn glob_patterns_are_not_targets() {
        let tmp = project(&["test_sum", "test_math"]);
        let r = run(&tmp, &[], &["-f", "test_*"]);
        assert_eq!(r.target, TestTarget::All);
        assert_eq!(r.strategy, None);
    }

    #[test]
    fn several_folders_fall_back_to_all() {
        let tmp = project(&["test_sum", "test_math", "test_string"]);
        assert_eq!(run(&tmp, &[], &[]).target, TestTarget::All);
    }

    #[test]
    fn no_folders_fall_back_to_all() {
        let tmp = project(&[]);
        assert_eq!(run(&tmp, &[], &[]).target, TestTarget::All);
    }

    #[test]
    fn missing_folder_degrades_to_all() {
        let tmp = project(&["test_sum"]);
        let r = run(&tmp, &[("PIOTEST_RUNNING_NAME", "test_gone")], &[]);
        assert_eq!(r.target, TestTarget::All);
        assert_eq!(r.missing, Some(tmp.path().join("test").join("test_gone")));
    }

    #[test]
    fn first_strategy_wins_for_every_pairing() {
        // Each strategy is fed a distinct folder; whichever comes first in
        // STRATEGIES must decide the target.
        let tmp = project(&["test_a", "test_b", "test_c", "test_d"]);
        let cases: &[(&[(&str, &str)], &[&str], &str)] = &[
            (&[("PIOTEST_RUNNING_NAME", "dGVzdF9h")], &["test_c", "-f", "test_d"], "test_a"),
            (&[("PIOTEST_RUNNING_NAME", "test_b")], &["test_c"], "test_b"),
            (&[("PIOTEST_FILTER", "test_a")], &["build/test_c", "--filter=test_d"], "test_c"),
            (&[("PIOTEST_FILTER", "test_a")], &["--filter=test_d"], "test_d"),
            (&[("PIOTEST_FILTER", "test_a")], &[], "test_a"),
        ];
        for (env, tokens, expected) in cases {
            assert_eq!(run(&tmp, env, tokens).target, TestTarget::Named(expected.to_string()));
        }
    }

    #[test]
    fn all_mode_collects_prefixed_sources_recursively() {
        let tmp = project(&["test_sum", "test_math"]);
        fs::write(tmp.path().join("test/test_runner.c"), "int main(void){}").unwrap();
        fs::write(tmp.path().join("test/test_sum/helper.c"), "").unwrap();

        let root = tmp.path().join("test");
        let names: Vec<String> = test_sources(&root, &TestTarget::All, "test_")
            .iter()
            .map(|p| p.file_name().unwrap().to_string_lossy().to_string())
            .collect();
        assert_eq!(names, vec!["test_math.c", "test_runner.c", "test_sum.c"]);

        let named = test_sources(&root, &TestTarget::Named("test_sum".into()), "test_");
        assert_eq!(named.len(), 2);
    }
}

// ─────────────────────────────────────────────────────────────────────────────
//  tsuki-sim :: variant  —  application / test / debug classification
//
//  test   PIOTEST=1, or any forwarded token containing "test"
//  debug  "debug" anywhere in the build dir, DEBUG=1, or a -D DEBUG flag
//
//  The two are independent.  Each variant gets its own output directory so a
//  stale test binary can never be picked up by an application run.
// ─────────────────────────────────────────────────────────────────────────────

use std::fmt;
use std::path::{Path, PathBuf};

use crate::config::{Invocation, ENV_DEBUG_FLAG, ENV_TEST_FLAG};

pub const TEST_SUFFIX:  &str = "_test";
pub const DEBUG_SUFFIX: &str = "_debug";
pub const APP_SUFFIX:   &str = "_app";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct BuildVariant {
    pub test:  bool,
    pub debug: bool,
}

impl BuildVariant {
    pub fn classify(inv: &Invocation, build_dir: &Path) -> Self {
        let tokens = inv.tokens();

        let test = inv.flag(ENV_TEST_FLAG)
            || tokens.iter().any(|t| t.contains("test"));

        let debug = build_dir.to_string_lossy().to_lowercase().contains("debug")
            || inv.flag(ENV_DEBUG_FLAG)
            || tokens.iter().any(|t| t == "-DDEBUG")
            || tokens.join(" ").contains("-D DEBUG");

        Self { test, debug }
    }

    pub fn is_application(&self) -> bool {
        !self.test
    }

    /// Variant-specific output directory derived from the host's build dir.
    pub fn output_dir(&self, base: &Path) -> PathBuf {
        let name = base.to_string_lossy();
        let name = name.trim_end_matches(['/', '\\']);

        let suffix = if self.test {
            if name.ends_with(TEST_SUFFIX) { "" } else { TEST_SUFFIX }
        } else if self.debug {
            if name.ends_with(DEBUG_SUFFIX) { "" } else { DEBUG_SUFFIX }
        } else if name.ends_with(TEST_SUFFIX) || name.ends_with(DEBUG_SUFFIX) {
            // An application build must not land in a test/debug directory.
            APP_SUFFIX
        } else {
            ""
        };

        PathBuf::from(format!("{name}{suffix}"))
    }
}

impl fmt::Display for BuildVariant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let kind = if self.test { "TEST" } else { "APPLICATION" };
        if self.debug {
            write!(f, "{kind} (debug)")
        } else {
            f.write_str(kind)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn inv(env: &[(&str, &str)], tokens: &[&str]) -> Invocation {
        Invocation::new(
            env.iter().copied(),
            tokens.iter().map(|s| s.to_string()).collect(),
            "/w",
        )
    }

    #[test]
    fn no_signals_is_plain_application() {
        let v = BuildVariant::classify(&inv(&[], &["buildprog"]), Path::new("/p/.pio/build/native_sim"));
        assert_eq!(v, BuildVariant { test: false, debug: false });
    }

    #[test]
    fn test_from_env_or_tokens() {
        let dir = Path::new("/p/.pio/build/native_sim");
        assert!(BuildVariant::classify(&inv(&[("PIOTEST", "1")], &[]), dir).test);
        assert!(BuildVariant::classify(&inv(&[], &["__test"]), dir).test);
        assert!(BuildVariant::classify(&inv(&[], &["-f", "test_sum"]), dir).test);
        assert!(!BuildVariant::classify(&inv(&[("PIOTEST", "0")], &[]), dir).test);
    }

    #[test]
    fn debug_from_dir_env_or_flag() {
        let plain = Path::new("/p/.pio/build/native_sim");
        assert!(BuildVariant::classify(&inv(&[], &[]), Path::new("/p/.pio/build/Native_Debug")).debug);
        assert!(BuildVariant::classify(&inv(&[("DEBUG", "1")], &[]), plain).debug);
        assert!(BuildVariant::classify(&inv(&[], &["-D", "DEBUG"]), plain).debug);
        assert!(BuildVariant::classify(&inv(&[], &["-DDEBUG"]), plain).debug);
    }

    #[test]
    fn test_and_debug_are_independent() {
        let v = BuildVariant::classify(&inv(&[("PIOTEST", "1"), ("DEBUG", "1")], &[]), Path::new("/b"));
        assert_eq!(v, BuildVariant { test: true, debug: true });
    }

    #[test]
    fn test_suffix_is_not_duplicated() {
        let v = BuildVariant { test: true, debug: false };
        assert_eq!(v.output_dir(Path::new("/b/native_sim_test")), PathBuf::from("/b/native_sim_test"));
        assert_eq!(v.output_dir(Path::new("/b/native_sim")), PathBuf::from("/b/native_sim_test"));
    }

    #[test]
    fn debug_suffix_is_not_duplicated() {
        let base = Path::new("/p/.pio/build/native_sim_debug");
        let v = BuildVariant::classify(&inv(&[], &[]), base);
        assert_eq!(v, BuildVariant { test: false, debug: true });
        assert_eq!(v.output_dir(base), PathBuf::from("/p/.pio/build/native_sim_debug"));
        assert_eq!(v.output_dir(Path::new("/b/native_sim")), PathBuf::from("/b/native_sim_debug"));
    }

    #[test]
    fn suffixing_is_injective() {
        let app   = BuildVariant { test: false, debug: false };
        let test  = BuildVariant { test: true,  debug: false };
        let debug = BuildVariant { test: false, debug: true };

        for base in ["/b/native_sim", "/b/native_sim_test", "/b/native_sim_debug", "/b/x/"] {
            let base = Path::new(base);
            let dirs = [app.output_dir(base), test.output_dir(base), debug.output_dir(base)];
            assert_ne!(dirs[0], dirs[1], "{base:?}");
            assert_ne!(dirs[0], dirs[2], "{base:?}");
            assert_ne!(dirs[1], dirs[2], "{base:?}");
        }
    }

    #[test]
    fn display_names_the_variant() {
        assert_eq!(BuildVariant { test: true, debug: true }.to_string(), "TEST (debug)");
        assert_eq!(BuildVariant::default().to_string(), "APPLICATION");
    }
}

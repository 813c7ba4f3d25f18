// ─────────────────────────────────────────────────────────────────────────────
//  tsuki-sim :: host  —  tell the build host what we did
//
//  The build core knows nothing about PlatformIO.  It hands back a
//  `BuildOutcome`; this module turns that into `HostDirectives` and renders
//  them for whoever is listening:
//
//    json   →  one JSON object on stdout (machine consumers, tests)
//    scons  →  builder override + `env.Replace(...)` lines, exec'd by a
//              tiny extra_scripts shim
//    none   →  nothing
// ─────────────────────────────────────────────────────────────────────────────

use std::path::{Path, PathBuf};

use serde::Serialize;

use crate::error::Result;
use crate::stage::StagedCopy;
use crate::target::TestTarget;
use crate::variant::BuildVariant;

/// Alias the host builds by default.
pub const DEFAULT_ALIAS: &str = "buildprog";

/// Result of one build invocation, host-agnostic.
#[derive(Debug, Clone)]
pub struct BuildOutcome {
    /// Primary staged artifact.
    pub result_path: PathBuf,
    /// Variant output directory holding the staged copies.
    pub output_dir:  PathBuf,
    pub exit_code:   i32,
    pub variant:     BuildVariant,
    /// Test builds only.
    pub target:      Option<TestTarget>,
    pub staged:      Vec<StagedCopy>,
}

/// Everything a host needs to adjust in its own build graph.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct HostDirectives {
    /// The host's own program builder must become a no-op.
    pub replace_builder: bool,
    /// Printed by the replacement builder when the host runs it.
    pub builder_message: String,
    pub progpath:        String,
    pub progname:        String,
    pub upload_command:  String,
    pub cpp_defines:     Vec<String>,
    pub default_alias:   String,
    pub exit_code:       i32,
}

impl HostDirectives {
    /// `exe` is how the host should invoke this tool for the upload step.
    pub fn from_outcome(outcome: &BuildOutcome, exe: &str) -> Self {
        let progname = outcome.result_path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();

        let mut upload = format!("{exe} upload --build-dir {}", quote_arg(&outcome.output_dir));
        if outcome.variant.test {
            upload.push_str(" --test");
        }

        let cpp_defines = if outcome.variant.test {
            vec!["UNIT_TEST".to_owned()]
        } else {
            Vec::new()
        };

        let builder_message = if outcome.variant.test {
            "Zephyr test build completed"
        } else {
            "Zephyr build completed"
        };

        Self {
            replace_builder: true,
            builder_message: builder_message.to_owned(),
            progpath:        outcome.result_path.display().to_string(),
            progname,
            upload_command:  upload,
            cpp_defines,
            default_alias:   DEFAULT_ALIAS.to_owned(),
            exit_code:       outcome.exit_code,
        }
    }
}

fn quote_arg(p: &Path) -> String {
    let s = p.display().to_string();
    if s.contains(char::is_whitespace) { format!("\"{s}\"") } else { s }
}

// ─────────────────────────────────────────────────────────────────────────────
//  Renderers
// ─────────────────────────────────────────────────────────────────────────────

pub trait HostAdapter {
    fn render(&self, d: &HostDirectives) -> Result<String>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum HostFormat {
    Json,
    Scons,
    None,
}

impl HostFormat {
    pub fn adapter(self) -> Option<Box<dyn HostAdapter>> {
        match self {
            HostFormat::Json  => Some(Box::new(JsonAdapter)),
            HostFormat::Scons => Some(Box::new(SconsAdapter)),
            HostFormat::None  => None,
        }
    }
}

pub struct JsonAdapter;

impl HostAdapter for JsonAdapter {
    fn render(&self, d: &HostDirectives) -> Result<String> {
        serde_json::to_string_pretty(d)
            .map_err(|e| crate::error::SimError::Other(format!("cannot serialize directives: {e}")))
    }
}

/// Python statements for an `extra_scripts` shim that runs
/// `exec(subprocess.check_output([...]))` with `env` in scope.
pub struct SconsAdapter;

impl HostAdapter for SconsAdapter {
    fn render(&self, d: &HostDirectives) -> Result<String> {
        let mut out = String::new();
        if d.replace_builder {
            out.push_str(&format!(
                "def tsuki_sim_program(target, source, env):\n    print({})\n    return None\n",
                py_str(&d.builder_message),
            ));
            out.push_str("env.Replace(BUILDERS={\"BuildProgram\": env.Builder(action=tsuki_sim_program)})\n");
        }
        out.push_str(&format!(
            "env.Replace(PROGPATH={}, PROGNAME={}, UPLOADCMD={})\n",
            py_str(&d.progpath),
            py_str(&d.progname),
            py_str(&d.upload_command),
        ));
        if !d.cpp_defines.is_empty() {
            let defs: Vec<String> = d.cpp_defines.iter().map(|s| py_str(s)).collect();
            out.push_str(&format!("env.Append(CPPDEFINES=[{}])\n", defs.join(", ")));
        }
        out.push_str(&format!(
            "env.Default(env.Alias({}, {}))\n",
            py_str(&d.default_alias),
            py_str(&d.progpath),
        ));
        Ok(out)
    }
}

/// Python string literal; the JSON escaping rules are a subset of Python's.
fn py_str(s: &str) -> String {
    serde_json::Value::String(s.to_owned()).to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn outcome(test: bool) -> BuildOutcome {
        let out = PathBuf::from(if test { "/p/.pio/build/native_sim_test" } else { "/p/.pio/build/native_sim" });
        let primary = if test { "test_runner.exe" } else { "firmware.bin" };
        BuildOutcome {
            result_path: out.join(primary),
            output_dir:  out,
            exit_code:   0,
            variant:     BuildVariant { test, debug: false },
            target:      test.then(|| TestTarget::Named("test_sum".into())),
            staged:      Vec::new(),
        }
    }

    #[test]
    fn test_build_directives() {
        let d = HostDirectives::from_outcome(&outcome(true), "tsuki-sim");
        assert_eq!(d.progname, "test_runner.exe");
        assert_eq!(d.progpath, "/p/.pio/build/native_sim_test/test_runner.exe");
        assert_eq!(d.upload_command, "tsuki-sim upload --build-dir /p/.pio/build/native_sim_test --test");
        assert_eq!(d.cpp_defines, vec!["UNIT_TEST"]);
        assert_eq!(d.default_alias, "buildprog");
        assert!(d.replace_builder);
        assert_eq!(d.builder_message, "Zephyr test build completed");
    }

    #[test]
    fn application_build_has_no_unit_test_define() {
        let d = HostDirectives::from_outcome(&outcome(false), "tsuki-sim");
        assert_eq!(d.progname, "firmware.bin");
        assert!(d.cpp_defines.is_empty());
        assert!(!d.upload_command.contains("--test"));
        assert_eq!(d.builder_message, "Zephyr build completed");
    }

    #[test]
    fn json_round_trips_field_names() {
        let d = HostDirectives::from_outcome(&outcome(true), "tsuki-sim");
        let v: serde_json::Value = serde_json::from_str(&JsonAdapter.render(&d).unwrap()).unwrap();
        assert_eq!(v["progname"], "test_runner.exe");
        assert_eq!(v["cpp_defines"][0], "UNIT_TEST");
        assert_eq!(v["exit_code"], 0);
    }

    #[test]
    fn scons_snippet() {
        let d = HostDirectives::from_outcome(&outcome(true), "tsuki-sim");
        let s = SconsAdapter.render(&d).unwrap();
        assert_eq!(
            s,
            "def tsuki_sim_program(target, source, env):\n    \
             print(\"Zephyr test build completed\")\n    \
             return None\n\
             env.Replace(BUILDERS={\"BuildProgram\": env.Builder(action=tsuki_sim_program)})\n\
             env.Replace(PROGPATH=\"/p/.pio/build/native_sim_test/test_runner.exe\", \
             PROGNAME=\"test_runner.exe\", \
             UPLOADCMD=\"tsuki-sim upload --build-dir /p/.pio/build/native_sim_test --test\")\n\
             env.Append(CPPDEFINES=[\"UNIT_TEST\"])\n\
             env.Default(env.Alias(\"buildprog\", \"/p/.pio/build/native_sim_test/test_runner.exe\"))\n"
        );
    }

    #[test]
    fn spaces_in_build_dir_are_quoted() {
        let mut o = outcome(false);
        o.output_dir = PathBuf::from("/my proj/build");
        let d = HostDirectives::from_outcome(&o, "tsuki-sim");
        assert_eq!(d.upload_command, "tsuki-sim upload --build-dir \"/my proj/build\"");
    }
}

// ─────────────────────────────────────────────────────────────────────────────
//  tsuki-sim :: descriptor  —  Zephyr application manifest for each variant
//
//  Application builds hand the project's own zephyr/ folder to west.
//
//  Test builds get a generated application in <build>/test_zephyr_app/:
//
//    CMakeLists.txt   Unity runtime + selected tests + lib/ sources
//    prj.conf         the project's zephyr/prj.conf, or a console default
//
//  Nothing from src/ is ever added to a test build: the application's
//  main() would clash with the test runner's.
// ─────────────────────────────────────────────────────────────────────────────

use std::fmt::Write as _;
use std::path::{Path, PathBuf};

use tracing::debug;

use crate::error::{Result, SimError};
use crate::paths::{ensure_dir, PathSet};
use crate::target::TestTarget;
use crate::variant::BuildVariant;

pub const TEST_APP_DIR: &str = "test_zephyr_app";

/// Compiler options appended to debug builds.
pub const DEBUG_CFLAGS: &[&str] = &["-g", "-O0", "-DDEBUG"];

const DEFAULT_PRJ_CONF: &str = "\
# Zephyr Test Configuration
CONFIG_MAIN_STACK_SIZE=4096
CONFIG_HEAP_MEM_POOL_SIZE=4096
CONFIG_PRINTK=y
CONFIG_CONSOLE=y
CONFIG_SERIAL=y
CONFIG_UART_CONSOLE=y
";

/// What west is asked to build.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BuildDescriptor {
    /// The project's own Zephyr application, optionally with extra CMake args.
    Project { app_dir: PathBuf, cmake_args: Vec<String> },
    /// A generated test application.
    Generated { app_dir: PathBuf, cmake_lists: String, prj_conf: String },
}

impl BuildDescriptor {
    pub fn app_dir(&self) -> &Path {
        match self {
            BuildDescriptor::Project { app_dir, .. }   => app_dir,
            BuildDescriptor::Generated { app_dir, .. } => app_dir,
        }
    }

    /// Arguments placed after `--` on the west command line.
    pub fn cmake_args(&self) -> &[String] {
        match self {
            BuildDescriptor::Project { cmake_args, .. } => cmake_args,
            BuildDescriptor::Generated { .. }           => &[],
        }
    }
}

/// Descriptor for an application build.
pub fn application(paths: &PathSet, variant: &BuildVariant) -> Result<BuildDescriptor> {
    if !paths.app_root.is_dir() {
        return Err(SimError::AppDirNotFound { path: paths.app_root.display().to_string() });
    }

    let cmake_args = if variant.debug {
        vec![format!("-DEXTRA_CFLAGS={}", DEBUG_CFLAGS.join(" "))]
    } else {
        Vec::new()
    };

    Ok(BuildDescriptor::Project { app_dir: paths.app_root.clone(), cmake_args })
}

/// Descriptor for a Unity test build.  `out_dir` is the variant build dir.
pub fn test_application(
    paths:   &PathSet,
    variant: &BuildVariant,
    target:  &TestTarget,
    unity:   &Path,
    prefix:  &str,
    out_dir: &Path,
) -> Result<BuildDescriptor> {
    let base_conf = paths.app_root.join("prj.conf");
    let prj_conf = match std::fs::read_to_string(&base_conf) {
        Ok(text) => text,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => DEFAULT_PRJ_CONF.to_owned(),
        Err(e) => return Err(e.into()),
    };

    Ok(BuildDescriptor::Generated {
        app_dir:     out_dir.join(TEST_APP_DIR),
        cmake_lists: render_test_cmake(paths, variant, target, unity, prefix),
        prj_conf,
    })
}

/// Write a generated descriptor to disk.  Project descriptors are left alone.
pub fn write(desc: &BuildDescriptor) -> Result<()> {
    if let BuildDescriptor::Generated { app_dir, cmake_lists, prj_conf } = desc {
        ensure_dir(app_dir)?;
        std::fs::write(app_dir.join("CMakeLists.txt"), cmake_lists)?;
        std::fs::write(app_dir.join("prj.conf"), prj_conf)?;
        debug!(dir = %app_dir.display(), "wrote test application");
    }
    Ok(())
}

// ─────────────────────────────────────────────────────────────────────────────
//  Unity discovery
// ─────────────────────────────────────────────────────────────────────────────

/// Unity install candidates, in lookup order.  The trailing `*` entry stands
/// for every folder under `.pio/libdeps`.
pub fn unity_candidates(paths: &PathSet, env_name: &str) -> Vec<PathBuf> {
    let libdeps = paths.libdeps_root();
    vec![
        libdeps.join(format!("{env_name}_test")).join("Unity"),
        libdeps.join(env_name).join("Unity"),
        libdeps.join("*").join("Unity"),
    ]
}

/// Find an installed Unity whose `src/unity.c` exists.
pub fn locate_unity(paths: &PathSet, env_name: &str) -> Result<PathBuf> {
    let candidates = unity_candidates(paths, env_name);

    for candidate in &candidates {
        let found = if candidate.parent().and_then(Path::file_name) == Some(std::ffi::OsStr::new("*")) {
            wildcard_unity(&paths.libdeps_root())
        } else if has_unity_source(candidate) {
            Some(candidate.clone())
        } else {
            None
        };
        if let Some(path) = found {
            return Ok(path);
        }
    }

    Err(SimError::UnityNotFound {
        searched: candidates.iter().map(|p| p.display().to_string()).collect(),
    })
}

fn wildcard_unity(libdeps: &Path) -> Option<PathBuf> {
    let mut envs: Vec<PathBuf> = std::fs::read_dir(libdeps)
        .ok()?
        .flatten()
        .map(|e| e.path())
        .filter(|p| p.is_dir())
        .collect();
    envs.sort();
    envs.into_iter()
        .map(|env| env.join("Unity"))
        .find(|p| has_unity_source(p))
}

fn has_unity_source(dir: &Path) -> bool {
    dir.join("src").join("unity.c").is_file()
}

// ─────────────────────────────────────────────────────────────────────────────
//  CMake rendering
// ─────────────────────────────────────────────────────────────────────────────

/// CMake wants forward slashes even on Windows.
fn cmake_path(p: &Path) -> String {
    p.to_string_lossy().replace('\\', "/")
}

fn render_test_cmake(
    paths:   &PathSet,
    variant: &BuildVariant,
    target:  &TestTarget,
    unity:   &Path,
    prefix:  &str,
) -> String {
    let unity_src = cmake_path(&unity.join("src"));
    let test_root = cmake_path(&paths.test_root);
    let lib_root  = cmake_path(&paths.lib_root);

    let test_glob = match target {
        TestTarget::Named(name) => format!("file(GLOB test_sources \"{test_root}/{name}/*.c\")"),
        TestTarget::All => format!("file(GLOB_RECURSE test_sources \"{test_root}/{prefix}*.c\")"),
    };

    let mut out = String::new();
    let _ = write!(out, "\
cmake_minimum_required(VERSION 3.13.1)
find_package(Zephyr REQUIRED HINTS $ENV{{ZEPHYR_BASE}})
project(zephyr_test_app)

# Unity runtime
target_sources(app PRIVATE \"{unity_src}/unity.c\")
target_include_directories(app PRIVATE \"{unity_src}\")

# Test sources
{test_glob}
target_sources(app PRIVATE ${{test_sources}})

# Library sources (application sources under src/ are never included)
file(GLOB_RECURSE lib_sources \"{lib_root}/*.c\")
target_sources(app PRIVATE ${{lib_sources}})

target_include_directories(app PRIVATE \"{test_root}/include_shims\")

file(GLOB_RECURSE lib_include_dirs LIST_DIRECTORIES true \"{lib_root}/*\")
foreach(dir ${{lib_include_dirs}})
    if(IS_DIRECTORY ${{dir}})
        target_include_directories(app PRIVATE ${{dir}})
    endif()
endforeach()
");

    if variant.debug {
        let _ = write!(out, "
# Debug build
target_compile_options(app PRIVATE {})
target_compile_definitions(app PRIVATE DEBUG=1)
", DEBUG_CFLAGS.join(" "));
    }

    out
}

// ─────────────────────────────────────────────────────────────────────────────
//  tsuki-sim :: build  —  build pipeline orchestrator
//
//  Pipeline:
//    1. Classify the variant, derive its output dir
//    2. Check the Zephyr workspace exists
//    3. Pick a descriptor: the project's zephyr/ app, or a generated
//       Unity test app (target detection + Unity lookup)
//    4. west build (timeout → fatal, nothing staged)
//    5. Stage the single west output under every artifact name
//
//  Progress goes to stderr so stdout stays free for host directives.
// ─────────────────────────────────────────────────────────────────────────────

use colored::Colorize;
use tracing::{info, warn};

use crate::config::{Invocation, SimConfig};
use crate::descriptor::{self, BuildDescriptor};
use crate::error::{Result, SimError};
use crate::host::BuildOutcome;
use crate::paths::{ensure_dir, PathSet};
use crate::stage::{self, FileOps, Sleeper, Stager};
use crate::target::{self, Signals, TestTarget};
use crate::variant::BuildVariant;
use crate::west::{Toolchain, WestRequest};

/// Inputs to a build run.
#[derive(Debug)]
pub struct BuildRequest<'a> {
    pub inv:   &'a Invocation,
    pub cfg:   &'a SimConfig,
    pub paths: &'a PathSet,
    /// Suppress progress output.
    pub quiet: bool,
}

/// Side-effecting collaborators, swapped for fakes in tests.
pub struct Effects<'a> {
    pub toolchain: &'a dyn Toolchain,
    pub fs:        &'a dyn FileOps,
    pub sleeper:   &'a dyn Sleeper,
}

/// Run the full build pipeline.
pub fn build(req: &BuildRequest<'_>, fx: &Effects<'_>) -> Result<BuildOutcome> {
    let paths = req.paths;
    let cfg   = req.cfg;

    let variant = BuildVariant::classify(req.inv, &paths.build_dir);
    let out_dir = variant.output_dir(&paths.build_dir);
    ensure_dir(&out_dir)?;
    info!(%variant, out_dir = %out_dir.display(), "build started");

    if !req.quiet {
        eprintln!(
            "{} {} {}",
            "Building".cyan().bold(),
            format!("[{variant}]").dimmed(),
            format!("[board: {}]", cfg.board).dimmed(),
        );
        eprintln!("{}", "─".repeat(60).dimmed());
    }

    if !paths.toolchain_base.is_dir() {
        return Err(SimError::ZephyrNotFound { path: paths.toolchain_base.display().to_string() });
    }

    let (desc, target) = if variant.test {
        let (desc, target) = test_descriptor(req, &variant, &out_dir)?;
        (desc, Some(target))
    } else {
        (descriptor::application(paths, &variant)?, None)
    };
    descriptor::write(&desc)?;

    // ── west ──────────────────────────────────────────────────────────────
    let west_req = WestRequest {
        app_dir:    desc.app_dir(),
        board:      &cfg.board,
        cmake_args: desc.cmake_args(),
        timeout:    cfg.timeouts.build(),
    };
    if !req.quiet {
        eprintln!("{} {}", "→".cyan(), fx.toolchain.describe(&west_req).dimmed());
    }

    let result = fx.toolchain.build(&west_req)?;
    if result.timed_out {
        return Err(SimError::BuildTimedOut { secs: cfg.timeouts.build_secs });
    }
    if !result.success() {
        return Err(SimError::BuildFailed {
            code:   result.exit_code,
            stdout: result.stdout,
            stderr: result.stderr,
        });
    }

    let output = fx.toolchain.output_binary();
    if !output.is_file() {
        return Err(SimError::NoToolchainOutput(output.display().to_string()));
    }

    // ── Stage ─────────────────────────────────────────────────────────────
    let dests  = stage::destinations(&out_dir, &variant);
    let staged = Stager::new(fx.fs, fx.sleeper, cfg.retry.clone()).stage(&output, &dests)?;

    if !req.quiet {
        for copy in &staged {
            eprintln!("  {} {}", "staged:".dimmed(), copy.dest.display());
        }
    }

    Ok(BuildOutcome {
        result_path: dests[0].clone(),
        output_dir:  out_dir,
        exit_code:   0,
        variant,
        target,
        staged,
    })
}

fn test_descriptor(
    req:     &BuildRequest<'_>,
    variant: &BuildVariant,
    out_dir: &std::path::Path,
) -> Result<(BuildDescriptor, TestTarget)> {
    let paths = req.paths;
    let cfg   = req.cfg;

    let resolution = target::resolve(&Signals {
        inv:       req.inv,
        test_root: &paths.test_root,
        prefix:    &cfg.test_prefix,
    });

    if let Some(missing) = &resolution.missing {
        warn!(dir = %missing.display(), "test folder not found, building all tests");
        if !req.quiet {
            eprintln!(
                "{} test folder {} not found, building every test",
                "!".yellow(),
                missing.display().to_string().bold(),
            );
        }
    }

    let sources = target::test_sources(&paths.test_root, &resolution.target, &cfg.test_prefix);
    if sources.is_empty() {
        warn!(target = %resolution.target, "no test sources matched");
    }
    if !req.quiet {
        eprintln!(
            "{} test target {} {}",
            "→".cyan(),
            resolution.target.to_string().bold(),
            format!("[{} source(s), via {}]", sources.len(), resolution.strategy.unwrap_or("default")).dimmed(),
        );
    }

    let unity = descriptor::locate_unity(paths, &cfg.env_name)?;
    let desc = descriptor::test_application(
        paths,
        variant,
        &resolution.target,
        &unity,
        &cfg.test_prefix,
        out_dir,
    )?;
    Ok((desc, resolution.target))
}

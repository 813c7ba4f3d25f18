// ─────────────────────────────────────────────────────────────────────────────
//  tsuki-sim  —  Zephyr native_sim build & run bridge for PlatformIO
//
//  Builds the project with `west` for the native_sim board, stages the host
//  executable under the names PlatformIO looks for, and runs it in place of a
//  firmware upload.
//
//  USAGE
//  ─────
//    tsuki-sim build  --host scons  [forwarded tokens…]
//    tsuki-sim upload --build-dir .pio/build/native_sim_test --test
//    tsuki-sim info   [forwarded tokens…]
// ─────────────────────────────────────────────────────────────────────────────

use std::path::PathBuf;
use std::time::Instant;

use clap::{Args, Parser, Subcommand};
use colored::Colorize;
use tracing_subscriber::EnvFilter;

use tsuki_sim::config::Invocation;
use tsuki_sim::descriptor::locate_unity;
use tsuki_sim::error::{Result, SimError};
use tsuki_sim::host::{HostDirectives, HostFormat};
use tsuki_sim::paths::{project_root, PathSet};
use tsuki_sim::runner::{self, RunRequest};
use tsuki_sim::target::{self, Signals};
use tsuki_sim::{BuildVariant, SimConfig};

// ─────────────────────────────────────────────────────────────────────────────
//  CLI definition (clap derive)
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Parser)]
#[command(
    name    = "tsuki-sim",
    version = env!("CARGO_PKG_VERSION"),
    about   = "Zephyr native_sim build & run bridge for PlatformIO",
    long_about = None,
)]
struct Cli {
    #[command(subcommand)]
    command: Cmd,

    /// Suppress progress output
    #[arg(long, global = true)]
    quiet: bool,

    /// Debug-level diagnostics (RUST_LOG still wins when set)
    #[arg(long, short = 'v', global = true)]
    verbose: bool,

    /// Disable colored output
    #[arg(long, global = true)]
    no_color: bool,
}

#[derive(Subcommand)]
enum Cmd {
    /// Build the project (or its Unity tests) for native_sim
    Build(BuildArgs),
    /// Run the staged executable  (the "upload" step)
    Upload(UploadArgs),
    /// Print resolved paths, variant and test target without building
    Info(InfoArgs),
}

#[derive(Args)]
struct BuildArgs {
    /// How to report the outcome to the build host on stdout
    #[arg(long, value_enum, default_value = "none")]
    host: HostFormat,

    /// Command the host should run for the upload step
    #[arg(long, default_value = "tsuki-sim")]
    exe: String,

    /// Tokens forwarded by the host (targets, -f filters, -D flags…)
    #[arg(trailing_var_arg = true, allow_hyphen_values = true)]
    tokens: Vec<String>,
}

#[derive(Args)]
struct UploadArgs {
    /// Directory containing the staged executable
    #[arg(long)]
    build_dir: Option<PathBuf>,

    /// Treat the program as a Unity test runner
    #[arg(long)]
    test: bool,
}

#[derive(Args)]
struct InfoArgs {
    #[arg(trailing_var_arg = true, allow_hyphen_values = true)]
    tokens: Vec<String>,
}

// ─────────────────────────────────────────────────────────────────────────────
//  Entry point
// ─────────────────────────────────────────────────────────────────────────────

fn main() {
    let cli = Cli::parse();

    if cli.no_color {
        colored::control::set_override(false);
    }

    let default_level = if cli.verbose { "debug" } else { "warn" };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level)),
        )
        .with_writer(std::io::stderr)
        .without_time()
        .init();

    let result = match cli.command {
        Cmd::Build(args)  => cmd_build(args, cli.quiet).map(|_| 0),
        Cmd::Upload(args) => cmd_upload(args, cli.quiet),
        Cmd::Info(args)   => cmd_info(args).map(|_| 0),
    };

    match result {
        Ok(code) => std::process::exit(code),
        Err(e) => {
            eprintln!("{} {}", "✗".red().bold(), headline(&e));
            std::process::exit(1);
        }
    }
}

/// Snapshot the process and load project settings.
fn load(tokens: Vec<String>) -> Result<(Invocation, SimConfig, PathSet)> {
    let inv   = Invocation::capture(tokens)?;
    let cfg   = SimConfig::load(&project_root(&inv))?;
    let paths = PathSet::resolve(&inv, &cfg);
    Ok((inv, cfg, paths))
}

// ─────────────────────────────────────────────────────────────────────────────
//  Command handlers
// ─────────────────────────────────────────────────────────────────────────────

fn cmd_build(args: BuildArgs, quiet: bool) -> Result<()> {
    let (inv, cfg, paths) = load(args.tokens)?;
    let t0 = Instant::now();

    let outcome = tsuki_sim::build_native(&inv, &cfg, &paths, quiet).map_err(|e| {
        render_build_error(&e);
        e
    })?;

    if !quiet {
        eprintln!(
            "{} built in {:.2}s",
            "✓".green().bold(),
            t0.elapsed().as_secs_f64(),
        );
        eprintln!("  {} {}", "program:".dimmed(), outcome.result_path.display());
        if let Some(t) = &outcome.target {
            eprintln!("  {} {}", "target:".dimmed(), t);
        }
    }

    if let Some(adapter) = args.host.adapter() {
        let directives = HostDirectives::from_outcome(&outcome, &args.exe);
        print!("{}", adapter.render(&directives)?);
        if args.host == HostFormat::Json {
            println!();
        }
    }
    Ok(())
}

fn cmd_upload(args: UploadArgs, quiet: bool) -> Result<i32> {
    let (inv, cfg, paths) = load(Vec::new())?;

    let build_dir = runner::resolve_build_dir(args.build_dir, &paths.build_dir)?;
    let is_test   = runner::detect_test_run(args.test, &inv, &build_dir);

    if !quiet {
        eprintln!(
            "{} {} {}",
            "Running".cyan().bold(),
            format!("[{}]", if is_test { "test" } else { "application" }).dimmed(),
            format!("[{}]", build_dir.display()).dimmed(),
        );
        eprintln!("{}", "─".repeat(60).dimmed());
    }

    let req = RunRequest { build_dir, is_test, timeout: cfg.timeouts.run(is_test) };
    let outcome = runner::run(&req).map_err(|e| {
        render_run_error(&e);
        e
    })?;

    // Program output is forwarded verbatim: stdout first, then stderr.
    print!("{}", outcome.stdout);
    eprint!("{}", outcome.stderr);

    if !quiet {
        eprintln!("{}", "─".repeat(60).dimmed());
        if let Some(summary) = &outcome.summary {
            let mark = if outcome.exit_code == 0 { "✓".green().bold() } else { "✗".red().bold() };
            eprintln!("{} {}", mark, summary.bold());
        }
        eprintln!(
            "  {} {}  {} {}",
            "exe:".dimmed(),
            outcome.executable.display(),
            "exit:".dimmed(),
            outcome.exit_code,
        );
    }
    Ok(outcome.exit_code)
}

fn cmd_info(args: InfoArgs) -> Result<()> {
    let (inv, cfg, paths) = load(args.tokens)?;
    let variant = BuildVariant::classify(&inv, &paths.build_dir);

    let found = |p: &std::path::Path| if p.exists() { "✓".green() } else { "✗".red() };

    println!("{} {}", "tsuki-sim".bold(), env!("CARGO_PKG_VERSION").dimmed());
    println!("{}", "─".repeat(60).dimmed());
    println!("  project:   {}", paths.project_root.display());
    println!("  build dir: {}", paths.build_dir.display());
    println!("  output:    {}", variant.output_dir(&paths.build_dir).display());
    println!("  variant:   {}", variant);
    println!("  board:     {}", cfg.board);
    println!("  zephyr:    {} {}", found(&paths.toolchain_base), paths.toolchain_base.display());
    match paths.venv_activate() {
        Some(act) => println!("  venv:      {}", act.display()),
        None      => println!("  venv:      {}", "none (west from PATH)".dimmed()),
    }
    println!("  app:       {} {}", found(&paths.app_root), paths.app_root.display());

    match locate_unity(&paths, &cfg.env_name) {
        Ok(unity) => println!("  unity:     {} {}", "✓".green(), unity.display()),
        Err(_)    => println!("  unity:     {} {}", "✗".red(), "not installed".dimmed()),
    }

    let resolution = target::resolve(&Signals {
        inv:       &inv,
        test_root: &paths.test_root,
        prefix:    &cfg.test_prefix,
    });
    println!(
        "  target:    {} {}",
        resolution.target,
        format!("(via {})", resolution.strategy.unwrap_or("default")).dimmed(),
    );
    if let Some(missing) = &resolution.missing {
        println!("  {} {} does not exist", "!".yellow(), missing.display());
    }
    Ok(())
}

// ─────────────────────────────────────────────────────────────────────────────
//  Error rendering
// ─────────────────────────────────────────────────────────────────────────────

/// One-line form for the final `✗` line; build output is rendered separately.
fn headline(e: &SimError) -> String {
    match e {
        SimError::BuildFailed { code, .. } => format!("Zephyr build failed (exit code {code})"),
        _ => e.to_string(),
    }
}

fn render_build_error(e: &SimError) {
    let SimError::BuildFailed { stdout, stderr, .. } = e else {
        return;
    };

    eprintln!("\n{} {}", "BuildError".red().bold(), "west build failed");
    eprintln!("{}", "─".repeat(60).dimmed());
    for (label, text) in [("STDOUT", stdout), ("STDERR", stderr)] {
        eprintln!("  {}", label.bold());
        for line in text.lines() {
            if line.contains("error:") || line.contains("Error") {
                eprintln!("  {}", line.red());
            } else if line.contains("warning:") {
                eprintln!("  {}", line.yellow());
            } else if !line.trim().is_empty() {
                eprintln!("  {}", line.dimmed());
            }
        }
    }
    eprintln!("{}", "─".repeat(60).dimmed());
}

fn render_run_error(e: &SimError) {
    eprintln!("\n{} {}", "RunError".red().bold(), "could not run the simulator");
    eprintln!("{}", "─".repeat(60).dimmed());

    match e {
        SimError::NoExecutable { checked, .. } => {
            eprintln!("  {} no staged executable", "✗".red());
            for p in checked {
                eprintln!("    {}", p.display().to_string().dimmed());
            }
            eprintln!("  Build first: {}", "pio run -e native_sim".bold());
        }
        SimError::RunTimedOut { secs, .. } => {
            eprintln!("  {} program still running after {}s, killed", "✗".red(), secs);
            eprintln!("  Raise {} in tsuki-sim.toml if this is expected", "[timeouts]".bold());
        }
        _ => eprintln!("  {}", e),
    }

    eprintln!("{}", "─".repeat(60).dimmed());
}

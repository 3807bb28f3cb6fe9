//! Kernel build orchestrator.
//!
//! Rebuilds hand-assembled GPU kernels whose inputs changed since their
//! artifacts were produced.
//!
//! Pipeline: resolve config → discover kernels → plan jobs per queue →
//!           run compile, assemble, preprocess, and disassemble queues.

mod cli;
mod config;
mod include;
mod job;
mod kernel;
mod planner;
mod runner;
mod stale;
mod verbose;

use std::fs;

use anyhow::{Context, Result, bail};
use clap::Parser;

use config::{BuildConfig, Layout};
use job::JobKind;
use planner::Plan;
use runner::BatchRunner;
use verbose::{Timer, dprintln, vprintln};

fn main() -> Result<()> {
    let cli = cli::Cli::parse();
    verbose::init(cli.quiet, cli.verbose);

    let config = config::resolve(&cli)?;
    if verbose::is_verbose() {
        println!("Resolved configuration:");
        config::print_resolved(&config);
    }

    let kernels = {
        let _t = Timer::start("kernel discovery");
        kernel::discover_kernels(&config.layout, &config.variant_token)?
    };
    vprintln!("  {} kernel(s) in {}", kernels.len(), config.layout.source_dir.display());

    let plan = {
        let _t = Timer::start("planning");
        planner::plan(&kernels, &config)?
    };

    if config.dry_run {
        return print_plan(&plan, cli.json);
    }

    create_output_dirs(&config.layout)?;

    if config.actions.clean {
        return cmd_clean(&plan);
    }

    cmd_build(&plan, &config)
}

// ===========================================================================
// Commands
// ===========================================================================

/// Delete the generated artifacts collected by the planner.
fn cmd_clean(plan: &Plan) -> Result<()> {
    for path in &plan.removals {
        fs::remove_file(path).with_context(|| format!("failed to remove {}", path.display()))?;
        vprintln!("  removed {}", path.display());
    }

    if plan.removals.is_empty() {
        dprintln!("Nothing to clean.");
    } else {
        dprintln!("Removed {} generated file(s).", plan.removals.len());
    }
    Ok(())
}

/// Run the four job queues in order.
fn cmd_build(plan: &Plan, config: &BuildConfig) -> Result<()> {
    let runner = BatchRunner::new(config.max_concurrent);
    let mut failed = 0usize;

    for kind in JobKind::ALL {
        let jobs = plan.queue(kind);
        if jobs.is_empty() {
            continue;
        }
        vprintln!("Running {} {} job(s)...", jobs.len(), kind.label());
        let _t = Timer::start(kind.label());
        let results = runner.run(jobs, verbose::report_job);
        failed += results.iter().filter(|r| !r.success()).count();
    }

    let total = plan.job_count();
    if total == 0 {
        dprintln!("All kernels are up to date.");
    } else {
        dprintln!(
            "\nRan {total} job(s): {} compile, {} assemble, {} preprocess, {} disassemble.",
            plan.compile.len(),
            plan.assemble.len(),
            plan.preprocess.len(),
            plan.disassemble.len(),
        );
    }
    if !plan.skipped.is_empty() {
        println!(
            "{} kernel(s) skipped because of include errors.",
            plan.skipped.len()
        );
    }

    if failed > 0 {
        bail!("{failed} of {total} job(s) failed");
    }
    Ok(())
}

// ===========================================================================
// Helpers
// ===========================================================================

/// Create the cubin, preprocessed, and dump directories if absent.
fn create_output_dirs(layout: &Layout) -> Result<()> {
    for dir in layout.output_dirs() {
        if !dir.exists() {
            fs::create_dir_all(dir)
                .with_context(|| format!("failed to create {}", dir.display()))?;
            vprintln!("  created {}", dir.display());
        }
    }
    Ok(())
}

/// Print the plan without executing it.
fn print_plan(plan: &Plan, json: bool) -> Result<()> {
    if json {
        let out = serde_json::to_string_pretty(plan).context("failed to serialize plan")?;
        println!("{out}");
        return Ok(());
    }

    for path in &plan.removals {
        println!("rm {}", path.display());
    }
    for kind in JobKind::ALL {
        let jobs = plan.queue(kind);
        if jobs.is_empty() {
            continue;
        }
        println!("# {} ({})", kind.label(), jobs.len());
        for job in jobs {
            println!("{job}");
        }
    }
    if plan.is_empty() {
        println!("Nothing to do.");
    }
    Ok(())
}

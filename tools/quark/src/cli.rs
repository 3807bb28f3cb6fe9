//! Command-line interface definitions for quark.

use std::path::PathBuf;

use clap::Parser;

/// Incremental build orchestrator for SASS GPU kernels.
#[derive(Parser, Debug)]
#[command(name = "quark", version, about)]
pub struct Cli {
    /// Build or update all kernels (default when no other action is given).
    #[arg(long, short = 'k')]
    pub kernels: bool,

    /// Delete all generated files.
    #[arg(long, short = 'c')]
    pub clean: bool,

    /// Preprocess sass files only (for development and debugging).
    #[arg(long, short = 'p')]
    pub preprocess: bool,

    /// Disassemble cubin files only (for development and debugging).
    #[arg(long, short = 'd')]
    pub dump: bool,

    /// Concurrently launch a maximum of this many processes.
    #[arg(
        long = "max_concurrent",
        short = 'j',
        visible_alias = "max-concurrent",
        value_name = "N",
        value_parser = clap::value_parser!(u32).range(1..)
    )]
    pub max_concurrent: Option<u32>,

    /// Print the planned removals and jobs without executing anything.
    #[arg(long, short = 'n')]
    pub dry_run: bool,

    /// Emit the plan as JSON (only with `--dry-run`).
    #[arg(long, requires = "dry_run")]
    pub json: bool,

    /// Project root (defaults to the nearest directory containing `quark.toml`).
    #[arg(long, short = 'C', value_name = "DIR")]
    pub root: Option<PathBuf>,

    /// Show only failures, warnings, and the final summary.
    #[arg(long, short = 'q', conflicts_with = "verbose")]
    pub quiet: bool,

    /// Show staleness reasons, batch boundaries, and timings.
    #[arg(long, short = 'v')]
    pub verbose: bool,
}

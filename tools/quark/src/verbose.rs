//! Console output for a build run.
//!
//! Three output levels controlled by CLI flags:
//! - **Quiet** (`-q`): failed jobs, warnings, and the final summary only
//! - **Default** (no flag): echoed command lines and job output
//! - **Verbose** (`-v`): staleness reasons, include expansion, batches, timings
//!
//! A failed job is always echoed, with its exit status and stderr on stderr.

use std::sync::atomic::{AtomicU8, Ordering};
use std::time::Instant;

use crate::runner::JobResult;

/// Output verbosity level.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub enum Verbosity {
    Quiet = 0,
    Default = 1,
    Verbose = 2,
}

/// Global verbosity level, set once at startup.
static VERBOSITY: AtomicU8 = AtomicU8::new(Verbosity::Default as u8);

/// Initialize the verbosity level for the current process.
pub fn init(quiet: bool, verbose: bool) {
    let level = if quiet {
        Verbosity::Quiet
    } else if verbose {
        Verbosity::Verbose
    } else {
        Verbosity::Default
    };
    VERBOSITY.store(level as u8, Ordering::Relaxed);
}

/// Returns the current verbosity level.
pub fn verbosity() -> Verbosity {
    match VERBOSITY.load(Ordering::Relaxed) {
        0 => Verbosity::Quiet,
        2 => Verbosity::Verbose,
        _ => Verbosity::Default,
    }
}

/// Returns `true` if verbose mode is active.
pub fn is_verbose() -> bool {
    verbosity() == Verbosity::Verbose
}

/// Returns `true` if quiet mode is active.
pub fn is_quiet() -> bool {
    verbosity() == Verbosity::Quiet
}

/// Print a message only when verbose mode is enabled.
///
/// ```ignore
/// vprintln!("  {} expands to {} files", sass.display(), files.len());
/// ```
macro_rules! vprintln {
    ($($arg:tt)*) => {
        if $crate::verbose::is_verbose() {
            println!($($arg)*);
        }
    };
}

pub(crate) use vprintln;

/// Print a message at default verbosity and above (suppressed in quiet mode).
macro_rules! dprintln {
    ($($arg:tt)*) => {
        if !$crate::verbose::is_quiet() {
            println!($($arg)*);
        }
    };
}

pub(crate) use dprintln;

/// Print a warning to stderr regardless of verbosity.
macro_rules! wprintln {
    ($($arg:tt)*) => {
        eprintln!("warning: {}", format_args!($($arg)*));
    };
}

pub(crate) use wprintln;

/// RAII timer that prints elapsed duration on drop when verbose mode is active.
///
/// ```ignore
/// let _t = Timer::start("planning");
/// // prints "  planning: 1.2ms" on drop
/// ```
pub struct Timer {
    label: &'static str,
    start: Instant,
}

impl Timer {
    /// Begin timing a labeled operation.
    pub fn start(label: &'static str) -> Self {
        Self {
            label,
            start: Instant::now(),
        }
    }
}

impl Drop for Timer {
    fn drop(&mut self) {
        if is_verbose() {
            println!("  {}: {:.1?}", self.label, self.start.elapsed());
        }
    }
}

/// Echo a collected job: its command line, then its status and stderr if it
/// failed, then any captured stdout.
pub fn report_job(result: &JobResult) {
    if result.success() {
        dprintln!("{}", result.command_line);
    } else {
        println!("{}", result.command_line);
        eprintln!("  {}", exit_status(result.exit_code));
        let stderr = result.stderr.trim_end();
        if !stderr.is_empty() {
            eprintln!("{stderr}");
        }
    }

    let stdout = result.stdout.trim_end();
    if !stdout.is_empty() {
        dprintln!("{stdout}");
    }
}

fn exit_status(exit_code: Option<i32>) -> String {
    match exit_code {
        Some(code) => format!("exited with status {code}"),
        None => "did not exit normally".to_string(),
    }
}

//! Timestamp-based staleness decisions for a single kernel.
//!
//! Every derived artifact is compared against the newest of its inputs. A
//! missing path has the epoch as its timestamp, so a missing artifact is
//! always older than any existing input. Any other metadata error is
//! returned to the caller.

use std::fmt;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

use crate::config::Actions;
use crate::kernel::Kernel;

/// Last-modified time of a path, or the epoch if it does not exist.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub struct Timestamp(SystemTime);

impl Timestamp {
    /// The timestamp of a path that does not exist.
    pub const ZERO: Self = Self(UNIX_EPOCH);

    /// Read the mtime of `path`. Only `NotFound` maps to [`Timestamp::ZERO`].
    pub fn of(path: &Path) -> io::Result<Self> {
        match fs::metadata(path).and_then(|meta| meta.modified()) {
            Ok(time) => Ok(Self(time)),
            Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(Self::ZERO),
            Err(err) => Err(err),
        }
    }

    /// Newest timestamp among `paths` (the epoch for an empty list).
    pub fn newest<P: AsRef<Path>>(paths: &[P]) -> io::Result<Self> {
        let mut newest = Self::ZERO;
        for path in paths {
            newest = newest.max(Self::of(path.as_ref())?);
        }
        Ok(newest)
    }

    /// Returns `true` if this is the timestamp of a missing path.
    pub fn is_zero(self) -> bool {
        self <= Self::ZERO
    }
}

/// State of a kernel's sass inputs after include expansion.
#[derive(Debug)]
pub enum SassInputs {
    /// The kernel has no sass description.
    Absent,
    /// The description exists but its include graph could not be resolved.
    Unresolved,
    /// The description was not expanded because no action needs it.
    NotExpanded,
    /// The description and every file it includes.
    Resolved(Vec<PathBuf>),
}

impl SassInputs {
    fn exists(&self) -> bool {
        !matches!(self, Self::Absent)
    }
}

/// Which derived artifacts of a kernel must be rebuilt.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Staleness {
    /// cubin from the `.cu` source.
    pub compile: bool,
    /// cubin from the sass include graph.
    pub assemble: bool,
    /// Preprocessed sass from the include graph.
    pub preprocess: bool,
    /// Dump from the cubin.
    pub disassemble: bool,
}

impl Staleness {
    /// Returns `true` if nothing needs to be rebuilt.
    pub fn is_fresh(self) -> bool {
        self == Self::default()
    }
}

impl fmt::Display for Staleness {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let flags = [
            (self.compile, "compile"),
            (self.assemble, "assemble"),
            (self.preprocess, "preprocess"),
            (self.disassemble, "disassemble"),
        ];
        let stale: Vec<&str> = flags.iter().filter(|(on, _)| *on).map(|(_, n)| *n).collect();
        if stale.is_empty() {
            write!(f, "fresh")
        } else {
            write!(f, "{}", stale.join(", "))
        }
    }
}

/// Decide which artifacts of `kernel` are stale for the requested actions.
///
/// Reads filesystem metadata only; never writes.
pub fn evaluate(
    kernel: &Kernel,
    actions: &Actions,
    sass: &SassInputs,
) -> io::Result<Staleness> {
    let cubin_age = Timestamp::of(&kernel.cubin)?;
    let mut result = Staleness::default();

    if actions.kernels {
        result.compile = Timestamp::of(&kernel.source)? > cubin_age;
    }

    if let SassInputs::Resolved(files) = sass {
        let newest_input = Timestamp::newest(files)?;
        if actions.kernels {
            result.assemble = newest_input > cubin_age;
        }
        if actions.preprocess {
            result.preprocess = newest_input > Timestamp::of(&kernel.preprocessed)?;
        }
    }

    if actions.dump && sass.exists() && !cubin_age.is_zero() {
        result.disassemble = cubin_age > Timestamp::of(&kernel.dump)?;
    }

    Ok(result)
}

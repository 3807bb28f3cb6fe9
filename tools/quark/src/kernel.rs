//! Kernel discovery and naming.
//!
//! Every `<name>.cu` file in the source directory defines one kernel. The
//! name is split on `_`; if the variant token (normally `vec`) is one of the
//! parts it is removed, and the remaining parts name the shared `.sass`
//! description the kernel is assembled from.

use std::path::PathBuf;

use anyhow::{Context, Result};
use walkdir::WalkDir;

use crate::config::Layout;

/// Extension of kernel source files.
pub const SOURCE_EXT: &str = "cu";

/// Separator between kernel name tokens.
const TOKEN_SEPARATOR: char = '_';

/// A kernel and the paths of everything derived from it.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Kernel {
    /// Full kernel name (source file stem), passed to the assembler as `-k`.
    pub name: String,
    /// Whether the variant token was present in the name.
    pub variant: bool,
    pub source: PathBuf,
    pub sass: PathBuf,
    pub cubin: PathBuf,
    pub preprocessed: PathBuf,
    pub dump: PathBuf,
}

impl Kernel {
    /// Build a kernel from a source file name such as `sgemm_vec_nn.cu`.
    ///
    /// Returns `None` for files that are not kernel sources.
    pub fn from_source_name(file_name: &str, layout: &Layout, variant_token: &str) -> Option<Self> {
        let name = file_name.strip_suffix(SOURCE_EXT)?.strip_suffix('.')?;
        if name.is_empty() {
            return None;
        }

        let (tokens, variant) = split_name(name, variant_token);
        let sass_name = format!("{}.sass", tokens.join("_"));

        Some(Self {
            name: name.to_string(),
            variant,
            source: layout.source_dir.join(file_name),
            sass: layout.sass_dir.join(sass_name),
            cubin: layout.cubin_dir.join(format!("{name}.cubin")),
            preprocessed: layout.preprocessed_dir.join(format!("{name}_pre.sass")),
            dump: layout.dump_dir.join(format!("{name}_dump.sass")),
        })
    }

    /// Derived artifacts in removal order.
    pub fn artifacts(&self) -> [&PathBuf; 3] {
        [&self.cubin, &self.preprocessed, &self.dump]
    }
}

/// Split a kernel name into its base tokens, removing the first occurrence of
/// the variant token.
pub fn split_name<'a>(name: &'a str, variant_token: &str) -> (Vec<&'a str>, bool) {
    let mut tokens: Vec<&str> = name.split(TOKEN_SEPARATOR).collect();
    match tokens.iter().position(|t| *t == variant_token) {
        Some(idx) => {
            tokens.remove(idx);
            (tokens, true)
        }
        None => (tokens, false),
    }
}

/// Enumerate every kernel in the source directory, sorted by file name.
pub fn discover_kernels(layout: &Layout, variant_token: &str) -> Result<Vec<Kernel>> {
    let mut names = Vec::new();
    for entry in WalkDir::new(&layout.source_dir)
        .min_depth(1)
        .max_depth(1)
        .sort_by_file_name()
    {
        let entry = entry.with_context(|| {
            format!("failed to list kernel sources in {}", layout.source_dir.display())
        })?;
        // Symlinked sources count; dangling links and directories do not.
        if !entry.path().is_file() {
            continue;
        }
        match entry.file_name().to_str() {
            Some(name) => names.push(name.to_string()),
            None => crate::verbose::vprintln!(
                "  skipping non-UTF-8 file name {}",
                entry.path().display()
            ),
        }
    }

    Ok(names
        .iter()
        .filter_map(|name| Kernel::from_source_name(name, layout, variant_token))
        .collect())
}

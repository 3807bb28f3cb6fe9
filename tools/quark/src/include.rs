//! Include-graph expansion for `.sass` descriptions.
//!
//! A description may pull in other descriptions with a line of the form
//!
//! ```text
//! <INCLUDE file="sgemm_common.sass"/>
//! ```
//!
//! Names are resolved relative to the sass directory. Expansion produces the
//! root followed by every transitively included file in depth-first
//! pre-order. A file reached through two different parents is listed twice;
//! only the newest timestamp among the list matters downstream.

use std::fmt;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

/// Errors that can occur while expanding an include graph.
#[derive(Debug)]
pub enum IncludeError {
    /// The root description does not exist.
    MissingRoot(PathBuf),
    /// A referenced file does not exist.
    MissingInclude {
        path: PathBuf,
        included_from: PathBuf,
    },
    /// A file includes itself, directly or through other files.
    Cycle(Vec<PathBuf>),
    /// Any other failure reading a description.
    Io { path: PathBuf, source: io::Error },
}

impl IncludeError {
    /// Returns `true` for errors that only invalidate the current kernel.
    ///
    /// I/O errors other than a missing file are not recoverable.
    pub fn is_local(&self) -> bool {
        !matches!(self, Self::Io { .. })
    }

    fn is_not_found(&self) -> bool {
        matches!(self, Self::Io { source, .. } if source.kind() == io::ErrorKind::NotFound)
    }
}

impl fmt::Display for IncludeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::MissingRoot(path) => write!(f, "description {} not found", path.display()),
            Self::MissingInclude { path, included_from } => write!(
                f,
                "{} (included from {}) not found",
                path.display(),
                included_from.display()
            ),
            Self::Cycle(chain) => {
                let names: Vec<String> = chain.iter().map(|p| display_name(p)).collect();
                write!(f, "include cycle: {}", names.join(" -> "))
            }
            Self::Io { path, source } => write!(f, "failed to read {}: {source}", path.display()),
        }
    }
}

impl std::error::Error for IncludeError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Io { source, .. } => Some(source),
            _ => None,
        }
    }
}

fn display_name(path: &Path) -> String {
    path.file_name()
        .map_or_else(|| path.display().to_string(), |n| n.to_string_lossy().into_owned())
}

/// Extract the file name from an include directive, if `line` is one.
///
/// Matches `<INCLUDE`, whitespace, `file="NAME"`, optional whitespace, `/>`
/// at the start of the line. Text after the closing `/>` is ignored.
pub fn parse_include_directive(line: &str) -> Option<&str> {
    let rest = line.strip_prefix("<INCLUDE")?;
    let trimmed = rest.trim_start();
    if trimmed.len() == rest.len() {
        return None;
    }
    let rest = trimmed.strip_prefix("file=\"")?;
    let end = rest.find('"')?;
    let (name, tail) = rest.split_at(end);
    if name.is_empty() {
        return None;
    }
    tail[1..].trim_start().starts_with("/>").then_some(name)
}

/// A file on the traversal stack together with its unvisited includes.
struct Frame {
    path: PathBuf,
    includes: Vec<PathBuf>,
    next: usize,
}

/// Expands include directives rooted at a sass description.
pub struct IncludeResolver<'a> {
    sass_dir: &'a Path,
}

impl<'a> IncludeResolver<'a> {
    /// Create a resolver that looks up include names in `sass_dir`.
    pub fn new(sass_dir: &'a Path) -> Self {
        Self { sass_dir }
    }

    /// Expand `root` into the ordered list of files it depends on.
    pub fn expand(&self, root: &Path) -> Result<Vec<PathBuf>, IncludeError> {
        let includes = match self.read_includes(root) {
            Err(err) if err.is_not_found() => {
                return Err(IncludeError::MissingRoot(root.to_path_buf()));
            }
            other => other?,
        };

        let mut files = vec![root.to_path_buf()];
        let mut stack = vec![Frame {
            path: root.to_path_buf(),
            includes,
            next: 0,
        }];

        while let Some(frame) = stack.last_mut() {
            let Some(child) = frame.includes.get(frame.next).cloned() else {
                stack.pop();
                continue;
            };
            frame.next += 1;
            let parent = frame.path.clone();

            if let Some(start) = stack.iter().position(|f| f.path == child) {
                let mut chain: Vec<PathBuf> =
                    stack[start..].iter().map(|f| f.path.clone()).collect();
                chain.push(child);
                return Err(IncludeError::Cycle(chain));
            }

            let includes = match self.read_includes(&child) {
                Err(err) if err.is_not_found() => {
                    return Err(IncludeError::MissingInclude {
                        path: child,
                        included_from: parent,
                    });
                }
                other => other?,
            };

            files.push(child.clone());
            stack.push(Frame {
                path: child,
                includes,
                next: 0,
            });
        }

        Ok(files)
    }

    /// Read `path` and resolve the file named by each include directive.
    fn read_includes(&self, path: &Path) -> Result<Vec<PathBuf>, IncludeError> {
        let content = fs::read_to_string(path).map_err(|source| IncludeError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Ok(content
            .lines()
            .filter_map(parse_include_directive)
            .map(|name| self.sass_dir.join(name))
            .collect())
    }
}

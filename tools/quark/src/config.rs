//! Project configuration for quark.
//!
//! Parses the optional `quark.toml` from the project root and merges it with
//! command-line flags into an immutable [`BuildConfig`] that is threaded
//! through planning and execution.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result, bail, ensure};
use serde::Deserialize;

use crate::cli::Cli;

/// Configuration file name looked up at the project root.
pub const CONFIG_FILE: &str = "quark.toml";

/// Top-level configuration loaded from `quark.toml`.
#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ProjectConfig {
    #[serde(default)]
    pub paths: PathsConfig,
    #[serde(default)]
    pub tools: ToolsConfig,
    #[serde(default)]
    pub build: BuildSection,
}

/// `[paths]` section, relative to the project root.
#[derive(Debug, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct PathsConfig {
    pub source: PathBuf,
    pub sass: PathBuf,
    pub preprocessed: PathBuf,
    pub cubin: PathBuf,
    pub dump: PathBuf,
}

impl Default for PathsConfig {
    fn default() -> Self {
        Self {
            source: PathBuf::from("kernels/cu"),
            sass: PathBuf::from("kernels/sass"),
            preprocessed: PathBuf::from("kernels/pre"),
            cubin: PathBuf::from("kernels/cubin"),
            dump: PathBuf::from("kernels/dump"),
        }
    }
}

/// `[tools]` section: external programs invoked by jobs.
#[derive(Clone, Debug, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ToolsConfig {
    /// CUDA compiler producing the initial cubin.
    pub compiler: String,
    /// Target architecture passed as `-arch`.
    pub arch: String,
    /// Assembler used for both insert (`-i`) and preprocess (`-p`) modes.
    pub assembler: String,
    /// Disassembler whose stdout becomes the dump file.
    pub disassembler: String,
}

impl Default for ToolsConfig {
    fn default() -> Self {
        Self {
            compiler: "nvcc".into(),
            // TODO: hpool and hconv kernels need sm_52; allow a per-kernel arch override.
            arch: "sm_50".into(),
            assembler: "maxas.pl".into(),
            disassembler: "nvdisasm".into(),
        }
    }
}

/// `[build]` section.
#[derive(Debug, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct BuildSection {
    #[serde(rename = "max-concurrent")]
    pub max_concurrent: u32,
    #[serde(rename = "variant-token")]
    pub variant_token: String,
}

impl Default for BuildSection {
    fn default() -> Self {
        Self {
            max_concurrent: 10,
            variant_token: "vec".into(),
        }
    }
}

/// Requested build actions, resolved from CLI flags.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Actions {
    /// Compile and assemble stale kernels.
    pub kernels: bool,
    /// Produce preprocessed sass.
    pub preprocess: bool,
    /// Disassemble cubins into dump files.
    pub dump: bool,
    /// Delete generated artifacts instead of building.
    pub clean: bool,
}

impl Actions {
    /// Resolve the flag set.
    ///
    /// `kernels` is implied when none of the other actions were requested,
    /// so `--preprocess` and `--dump` on their own do not rebuild cubins.
    pub fn from_flags(kernels: bool, clean: bool, preprocess: bool, dump: bool) -> Self {
        Self {
            kernels: kernels || !(clean || preprocess || dump),
            preprocess,
            dump,
            clean,
        }
    }
}

/// Absolute directory layout of a kernel project.
#[derive(Clone, Debug)]
pub struct Layout {
    pub source_dir: PathBuf,
    pub sass_dir: PathBuf,
    pub preprocessed_dir: PathBuf,
    pub cubin_dir: PathBuf,
    pub dump_dir: PathBuf,
}

impl Layout {
    /// Resolve configured paths against the project root.
    pub fn resolve(root: &Path, paths: &PathsConfig) -> Self {
        Self {
            source_dir: root.join(&paths.source),
            sass_dir: root.join(&paths.sass),
            preprocessed_dir: root.join(&paths.preprocessed),
            cubin_dir: root.join(&paths.cubin),
            dump_dir: root.join(&paths.dump),
        }
    }

    /// Directories written by the external tools.
    pub fn output_dirs(&self) -> [&Path; 3] {
        [&self.cubin_dir, &self.preprocessed_dir, &self.dump_dir]
    }
}

/// Fully resolved, immutable configuration for one invocation.
#[derive(Clone, Debug)]
pub struct BuildConfig {
    pub root: PathBuf,
    pub layout: Layout,
    pub tools: ToolsConfig,
    pub variant_token: String,
    pub actions: Actions,
    pub max_concurrent: usize,
    pub dry_run: bool,
}

impl BuildConfig {
    /// Build a configuration from a parsed project config and explicit actions.
    pub fn new(root: PathBuf, project: ProjectConfig, actions: Actions) -> Result<Self> {
        ensure!(
            project.build.max_concurrent >= 1,
            "build.max-concurrent must be at least 1"
        );
        ensure!(
            !project.build.variant_token.is_empty() && !project.build.variant_token.contains('_'),
            "build.variant-token must be a single non-empty name token"
        );
        Ok(Self {
            layout: Layout::resolve(&root, &project.paths),
            root,
            tools: project.tools,
            variant_token: project.build.variant_token,
            actions,
            max_concurrent: project.build.max_concurrent as usize,
            dry_run: false,
        })
    }
}

/// Walk up from `start` looking for a directory containing `quark.toml`.
pub fn find_project_root(start: &Path) -> Option<PathBuf> {
    let mut dir = start.to_path_buf();
    loop {
        if dir.join(CONFIG_FILE).is_file() {
            return Some(dir);
        }
        if !dir.pop() {
            return None;
        }
    }
}

/// Load `quark.toml` from `root`, falling back to defaults when absent.
pub fn load_project_config(root: &Path) -> Result<ProjectConfig> {
    let path = root.join(CONFIG_FILE);
    if !path.exists() {
        return Ok(ProjectConfig::default());
    }
    let contents = std::fs::read_to_string(&path)
        .with_context(|| format!("failed to read {}", path.display()))?;
    toml::from_str(&contents).with_context(|| format!("failed to parse {}", path.display()))
}

/// Resolve the full configuration from the command line.
pub fn resolve(cli: &Cli) -> Result<BuildConfig> {
    let cwd = std::env::current_dir().context("failed to determine current directory")?;
    let root = match &cli.root {
        Some(dir) => {
            if !dir.is_dir() {
                bail!("project root {} is not a directory", dir.display());
            }
            cwd.join(dir)
        }
        None => find_project_root(&cwd).unwrap_or(cwd),
    };

    let mut project = load_project_config(&root)?;
    if let Some(n) = cli.max_concurrent {
        project.build.max_concurrent = n;
    }

    let actions = Actions::from_flags(cli.kernels, cli.clean, cli.preprocess, cli.dump);
    let mut config = BuildConfig::new(root, project, actions)?;
    config.dry_run = cli.dry_run;
    Ok(config)
}

/// Print the resolved configuration (verbose mode).
pub fn print_resolved(config: &BuildConfig) {
    println!("  root: {}", config.root.display());
    println!("  sources: {}", config.layout.source_dir.display());
    println!("  sass: {}", config.layout.sass_dir.display());
    println!(
        "  actions: kernels={} preprocess={} dump={} clean={}",
        config.actions.kernels,
        config.actions.preprocess,
        config.actions.dump,
        config.actions.clean,
    );
    println!("  max concurrent: {}", config.max_concurrent);
}

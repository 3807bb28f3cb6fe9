//! Job planning.
//!
//! Walks every kernel once, in source-file order, and turns its staleness
//! into jobs on four queues. Planning reads filesystem metadata and sass
//! contents but never writes anything or launches a process, so a plan can
//! always be printed in place of being executed.

use std::path::PathBuf;

use anyhow::{Context, Result, anyhow};
use serde::Serialize;

use crate::config::BuildConfig;
use crate::include::IncludeResolver;
use crate::job::{Job, JobBuilder, JobKind};
use crate::kernel::Kernel;
use crate::stale::{self, SassInputs};
use crate::verbose::{vprintln, wprintln};

/// A kernel whose sass jobs were dropped from this run.
#[derive(Debug, Serialize)]
pub struct SkippedKernel {
    pub kernel: String,
    pub reason: String,
}

/// Everything a run will do, grouped by queue.
#[derive(Debug, Default, Serialize)]
pub struct Plan {
    pub compile: Vec<Job>,
    pub assemble: Vec<Job>,
    pub preprocess: Vec<Job>,
    pub disassemble: Vec<Job>,
    /// Artifacts to delete (`--clean` only).
    pub removals: Vec<PathBuf>,
    /// Kernels whose include graph could not be resolved.
    pub skipped: Vec<SkippedKernel>,
}

impl Plan {
    /// The job queue for `kind`.
    pub fn queue(&self, kind: JobKind) -> &[Job] {
        match kind {
            JobKind::Compile => &self.compile,
            JobKind::Assemble => &self.assemble,
            JobKind::Preprocess => &self.preprocess,
            JobKind::Disassemble => &self.disassemble,
        }
    }

    /// Total number of jobs across all queues.
    pub fn job_count(&self) -> usize {
        JobKind::ALL.iter().map(|&k| self.queue(k).len()).sum()
    }

    /// Returns `true` if there is nothing to remove and nothing to run.
    pub fn is_empty(&self) -> bool {
        self.removals.is_empty() && self.job_count() == 0
    }
}

/// Plan removals and jobs for `kernels` under `config`.
///
/// Missing includes and include cycles only drop the affected kernel's sass
/// jobs; unexpected I/O errors abort planning.
pub fn plan(kernels: &[Kernel], config: &BuildConfig) -> Result<Plan> {
    let actions = &config.actions;
    let resolver = IncludeResolver::new(&config.layout.sass_dir);
    let mut plan = Plan::default();

    for kernel in kernels {
        if actions.clean {
            plan.removals
                .extend(kernel.artifacts().into_iter().filter(|p| p.exists()).cloned());
            continue;
        }

        let sass = if !kernel.sass.exists() {
            vprintln!("  {}: no sass description, sass jobs skipped", kernel.name);
            SassInputs::Absent
        } else if actions.kernels || actions.preprocess {
            match resolver.expand(&kernel.sass) {
                Ok(files) => {
                    vprintln!("  {}: {} sass input(s)", kernel.name, files.len());
                    SassInputs::Resolved(files)
                }
                Err(err) if err.is_local() => {
                    wprintln!("{}: {err}; skipping assembly", kernel.name);
                    plan.skipped.push(SkippedKernel {
                        kernel: kernel.name.clone(),
                        reason: err.to_string(),
                    });
                    SassInputs::Unresolved
                }
                Err(err) => return Err(anyhow!(err).context(format!("planning {}", kernel.name))),
            }
        } else {
            SassInputs::NotExpanded
        };

        let staleness = stale::evaluate(kernel, actions, &sass)
            .with_context(|| format!("failed to read timestamps for {}", kernel.name))?;
        if staleness.is_fresh() {
            vprintln!("  {}: up to date", kernel.name);
        } else {
            vprintln!("  {}: stale ({staleness})", kernel.name);
        }

        let tools = &config.tools;
        let token = config.variant_token.as_str();
        if staleness.compile {
            plan.compile.push(JobBuilder::compile(kernel, tools));
        }
        if staleness.assemble {
            plan.assemble.push(JobBuilder::assemble(kernel, tools, token));
        }
        if staleness.preprocess {
            plan.preprocess.push(JobBuilder::preprocess(kernel, tools, token));
        }
        if staleness.disassemble {
            plan.disassemble.push(JobBuilder::disassemble(kernel, tools));
        }
    }

    Ok(plan)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{Actions, ProjectConfig};
    use crate::kernel::discover_kernels;
    use std::fs::{self, File};
    use std::path::Path;
    use std::time::{Duration, UNIX_EPOCH};
    use tempfile::TempDir;

    struct Project {
        tmp: TempDir,
    }

    impl Project {
        fn new() -> Self {
            let project = Self {
                tmp: TempDir::new().unwrap(),
            };
            for dir in [
                "kernels/cu",
                "kernels/sass",
                "kernels/cubin",
                "kernels/pre",
                "kernels/dump",
            ] {
                fs::create_dir_all(project.tmp.path().join(dir)).unwrap();
            }
            project
        }

        fn file(&self, rel: &str, body: &str, secs: u64) -> &Self {
            let path = self.tmp.path().join(rel);
            fs::write(&path, body).unwrap();
            let base = UNIX_EPOCH + Duration::from_secs(1_600_000_000);
            File::options()
                .write(true)
                .open(&path)
                .unwrap()
                .set_modified(base + Duration::from_secs(secs))
                .unwrap();
            self
        }

        fn path(&self, rel: &str) -> PathBuf {
            self.tmp.path().join(rel)
        }

        fn plan(&self, actions: Actions) -> Plan {
            let config =
                BuildConfig::new(self.tmp.path().to_path_buf(), ProjectConfig::default(), actions)
                    .unwrap();
            let kernels = discover_kernels(&config.layout, &config.variant_token).unwrap();
            plan(&kernels, &config).unwrap()
        }
    }

    fn build() -> Actions {
        Actions::from_flags(true, false, false, false)
    }

    fn kernel_names(jobs: &[Job]) -> Vec<&str> {
        jobs.iter().map(|j| j.kernel.as_str()).collect()
    }

    fn include(name: &str) -> String {
        format!("<INCLUDE file=\"{name}\"/>\n")
    }

    #[test]
    fn fresh_project_plans_compile_then_assemble() {
        let p = Project::new();
        p.file("kernels/cu/sgemm_nn.cu", "", 1)
            .file("kernels/cu/hgemm_nn.cu", "", 1)
            .file("kernels/sass/sgemm_nn.sass", "", 1)
            .file("kernels/sass/hgemm_nn.sass", "", 1);

        let plan = p.plan(build());
        assert_eq!(kernel_names(&plan.compile), vec!["hgemm_nn", "sgemm_nn"]);
        assert_eq!(kernel_names(&plan.assemble), vec!["hgemm_nn", "sgemm_nn"]);
        assert!(plan.preprocess.is_empty());
        assert!(plan.disassemble.is_empty());
        assert!(plan.removals.is_empty());
    }

    #[test]
    fn up_to_date_kernel_plans_nothing() {
        let p = Project::new();
        p.file("kernels/cu/sgemm_nn.cu", "", 1)
            .file("kernels/sass/sgemm_nn.sass", &include("common.sass"), 2)
            .file("kernels/sass/common.sass", "", 3)
            .file("kernels/cubin/sgemm_nn.cubin", "", 4);

        assert!(p.plan(build()).is_empty());
    }

    #[test]
    fn variant_kernel_shares_base_sass() {
        let p = Project::new();
        p.file("kernels/cu/sgemm_vec_nn.cu", "", 1)
            .file("kernels/sass/sgemm_nn.sass", "", 5)
            .file("kernels/cubin/sgemm_vec_nn.cubin", "", 3);

        let plan = p.plan(build());
        assert!(plan.compile.is_empty());
        assert_eq!(plan.assemble.len(), 1);
        let args: Vec<String> = plan.assemble[0]
            .args
            .iter()
            .map(|a| a.to_string_lossy().into_owned())
            .collect();
        assert!(args.windows(2).any(|w| w == ["-Dvec", "1"]));
        assert_eq!(Path::new(&args[args.len() - 2]), p.path("kernels/sass/sgemm_nn.sass"));
    }

    #[test]
    fn missing_include_only_affects_its_kernel() {
        let p = Project::new();
        p.file("kernels/cu/bad_nn.cu", "", 1)
            .file("kernels/cu/good_nn.cu", "", 1)
            .file("kernels/sass/bad_nn.sass", &include("gone.sass"), 1)
            .file("kernels/sass/good_nn.sass", "", 1);

        let plan = p.plan(Actions::from_flags(true, false, true, false));
        assert_eq!(kernel_names(&plan.compile), vec!["bad_nn", "good_nn"]);
        assert_eq!(kernel_names(&plan.assemble), vec!["good_nn"]);
        assert_eq!(kernel_names(&plan.preprocess), vec!["good_nn"]);
        assert_eq!(plan.skipped.len(), 1);
        assert_eq!(plan.skipped[0].kernel, "bad_nn");
    }

    #[test]
    fn include_cycle_is_skipped_not_fatal() {
        let p = Project::new();
        p.file("kernels/cu/loop_nn.cu", "", 1)
            .file("kernels/sass/loop_nn.sass", &include("a.sass"), 1)
            .file("kernels/sass/a.sass", &include("loop_nn.sass"), 1);

        let plan = p.plan(build());
        assert!(plan.assemble.is_empty());
        assert_eq!(plan.compile.len(), 1);
        assert!(plan.skipped[0].reason.contains("cycle"));
    }

    #[test]
    fn kernel_without_sass_only_compiles() {
        let p = Project::new();
        p.file("kernels/cu/plain_nn.cu", "", 5)
            .file("kernels/cubin/plain_nn.cubin", "", 1);

        let all = Actions {
            kernels: true,
            preprocess: true,
            dump: true,
            clean: false,
        };
        let plan = p.plan(all);
        assert_eq!(plan.compile.len(), 1);
        assert!(plan.assemble.is_empty());
        assert!(plan.preprocess.is_empty());
        assert!(plan.disassemble.is_empty());
    }

    #[test]
    fn clean_lists_existing_artifacts_only() {
        let p = Project::new();
        p.file("kernels/cu/sgemm_nn.cu", "", 5)
            .file("kernels/sass/sgemm_nn.sass", "", 5)
            .file("kernels/cubin/sgemm_nn.cubin", "", 1);

        let plan = p.plan(Actions::from_flags(false, true, false, false));
        assert_eq!(plan.removals, vec![p.path("kernels/cubin/sgemm_nn.cubin")]);
        assert_eq!(plan.job_count(), 0);
    }

    #[test]
    fn clean_wins_over_build_flags() {
        let p = Project::new();
        p.file("kernels/cu/sgemm_nn.cu", "", 5)
            .file("kernels/cubin/sgemm_nn.cubin", "", 1)
            .file("kernels/pre/sgemm_nn_pre.sass", "", 1)
            .file("kernels/dump/sgemm_nn_dump.sass", "", 1);

        let plan = p.plan(Actions::from_flags(true, true, true, true));
        assert_eq!(plan.removals.len(), 3);
        assert_eq!(plan.job_count(), 0);
    }

    #[test]
    fn dump_plans_disassembly_of_existing_cubins() {
        let p = Project::new();
        p.file("kernels/cu/a_nn.cu", "", 1)
            .file("kernels/cu/b_nn.cu", "", 1)
            .file("kernels/sass/a_nn.sass", "", 1)
            .file("kernels/sass/b_nn.sass", "", 1)
            .file("kernels/cubin/a_nn.cubin", "", 5)
            .file("kernels/cubin/b_nn.cubin", "", 5)
            .file("kernels/dump/b_nn_dump.sass", "", 6);

        let plan = p.plan(Actions::from_flags(false, false, false, true));
        assert_eq!(kernel_names(&plan.disassemble), vec!["a_nn"]);
        assert_eq!(plan.disassemble[0].stdout, Some(p.path("kernels/dump/a_nn_dump.sass")));
        assert!(plan.compile.is_empty() && plan.assemble.is_empty());
    }

    #[test]
    fn unreadable_sass_aborts_planning() {
        let p = Project::new();
        p.file("kernels/cu/x_nn.cu", "", 1)
            .file("kernels/cu/y_nn.cu", "", 1);
        fs::create_dir(p.path("kernels/sass/x_nn.sass")).unwrap();

        let root = p.tmp.path().to_path_buf();
        let config = BuildConfig::new(root, ProjectConfig::default(), build()).unwrap();
        let kernels = discover_kernels(&config.layout, &config.variant_token).unwrap();
        let err = plan(&kernels, &config).unwrap_err();
        assert!(format!("{err:#}").contains("x_nn"), "{err:#}");
    }

    #[test]
    fn plan_serializes_to_json() {
        let p = Project::new();
        p.file("kernels/cu/sgemm_nn.cu", "", 1);

        let json = serde_json::to_value(p.plan(build())).unwrap();
        assert_eq!(json["compile"][0]["kind"], "compile");
        assert_eq!(json["compile"][0]["program"], "nvcc");
        assert_eq!(json["compile"][0]["args"][0], "-arch");
        assert!(json["compile"][0].get("stdout").is_none());
    }
}

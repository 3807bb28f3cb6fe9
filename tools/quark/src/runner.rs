//! Bounded-concurrency job execution.
//!
//! Jobs are split into consecutive batches of at most `max_concurrent`. Each
//! batch is launched in full, then every process is waited on in launch
//! order, and the next batch starts only once the whole batch has been
//! collected. Results are therefore reported in submission order no matter
//! which process finishes first. There is no timeout: a hung tool blocks the
//! run.

use std::fs::File;
use std::io;
use std::process::{Child, Stdio};

use crate::job::Job;
use crate::verbose::vprintln;

/// Outcome of one executed job.
#[derive(Debug)]
pub struct JobResult {
    /// The echoed command line.
    pub command_line: String,
    /// Exit code, or `None` if the process could not be launched or was
    /// terminated by a signal.
    pub exit_code: Option<i32>,
    pub stdout: String,
    pub stderr: String,
}

impl JobResult {
    /// Returns `true` if the process ran and exited with status zero.
    pub fn success(&self) -> bool {
        self.exit_code == Some(0)
    }

    fn launch_failure(job: &Job, err: &io::Error) -> Self {
        Self {
            command_line: job.command_line(),
            exit_code: None,
            stdout: String::new(),
            stderr: format!("failed to launch {}: {err}", job.program),
        }
    }
}

/// A job between launch and collection.
enum Launched<'a> {
    Running { job: &'a Job, child: Child },
    Failed(JobResult),
}

/// Runs job lists in sequential batches of concurrent processes.
pub struct BatchRunner {
    max_concurrent: usize,
}

impl BatchRunner {
    /// Create a runner launching at most `max_concurrent` processes at once.
    pub fn new(max_concurrent: usize) -> Self {
        Self {
            max_concurrent: max_concurrent.max(1),
        }
    }

    /// Split `jobs` into the batches this runner will launch.
    pub fn batches<'a>(&self, jobs: &'a [Job]) -> std::slice::Chunks<'a, Job> {
        jobs.chunks(self.max_concurrent)
    }

    /// Execute every job, calling `on_result` as each one is collected.
    ///
    /// Failures never stop the run; every job is attempted exactly once.
    pub fn run(&self, jobs: &[Job], mut on_result: impl FnMut(&JobResult)) -> Vec<JobResult> {
        let mut results = Vec::with_capacity(jobs.len());

        for (index, batch) in self.batches(jobs).enumerate() {
            vprintln!("  batch {}: {} job(s)", index + 1, batch.len());

            let launched: Vec<Launched<'_>> = batch.iter().map(launch).collect();

            for entry in launched {
                let result = match entry {
                    Launched::Running { job, child } => collect(job, child),
                    Launched::Failed(result) => result,
                };
                on_result(&result);
                results.push(result);
            }
        }

        results
    }
}

/// Spawn `job` without waiting for it.
fn launch(job: &Job) -> Launched<'_> {
    let mut cmd = job.command();
    cmd.stdin(Stdio::null()).stderr(Stdio::piped());

    match &job.stdout {
        Some(path) => match File::create(path) {
            Ok(file) => {
                cmd.stdout(Stdio::from(file));
            }
            Err(err) => return Launched::Failed(JobResult::launch_failure(job, &err)),
        },
        None => {
            cmd.stdout(Stdio::piped());
        }
    }

    match cmd.spawn() {
        Ok(child) => Launched::Running { job, child },
        Err(err) => Launched::Failed(JobResult::launch_failure(job, &err)),
    }
}

/// Wait for a launched job and capture its output.
fn collect(job: &Job, child: Child) -> JobResult {
    match child.wait_with_output() {
        Ok(output) => JobResult {
            command_line: job.command_line(),
            exit_code: output.status.code(),
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        },
        Err(err) => JobResult {
            command_line: job.command_line(),
            exit_code: None,
            stdout: String::new(),
            stderr: format!("failed to wait for {}: {err}", job.program),
        },
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use crate::job::JobKind;
    use std::ffi::OsString;
    use std::path::PathBuf;
    use std::time::Instant;

    fn sh(script: &str) -> Job {
        Job {
            kind: JobKind::Compile,
            kernel: "test".into(),
            program: "sh".into(),
            args: vec![OsString::from("-c"), OsString::from(script)],
            stdout: None,
        }
    }

    #[test]
    fn seven_jobs_in_batches_of_three() {
        let jobs: Vec<Job> = (0..7).map(|i| sh(&format!("echo {i}"))).collect();
        let runner = BatchRunner::new(3);
        let sizes: Vec<usize> = runner.batches(&jobs).map(<[Job]>::len).collect();
        assert_eq!(sizes, vec![3, 3, 1]);

        let results = runner.run(&jobs, |_| {});
        let outputs: Vec<&str> = results.iter().map(|r| r.stdout.trim()).collect();
        assert_eq!(outputs, vec!["0", "1", "2", "3", "4", "5", "6"]);
    }

    #[test]
    fn reports_in_submission_order() {
        let jobs = vec![sh("sleep 0.3; echo first"), sh("echo second")];
        let mut reported = Vec::new();
        let results =
            BatchRunner::new(2).run(&jobs, |r| reported.push(r.stdout.trim().to_string()));
        assert_eq!(reported, vec!["first", "second"]);
        assert_eq!(results.len(), 2);
    }

    #[test]
    fn next_batch_waits_for_previous_batch() {
        let tmp = tempfile::TempDir::new().unwrap();
        let marker = tmp.path().join("first-done");
        let marker = marker.display();
        let jobs = vec![
            sh(&format!("sleep 0.4; touch '{marker}'")),
            sh("true"),
            sh(&format!("test -e '{marker}'")),
        ];

        let results = BatchRunner::new(2).run(&jobs, |_| {});
        assert!(results.iter().all(JobResult::success), "{results:?}");
    }

    #[test]
    fn batch_jobs_run_concurrently() {
        let jobs = vec![sh("sleep 0.5"), sh("sleep 0.5"), sh("sleep 0.5")];
        let start = Instant::now();
        BatchRunner::new(3).run(&jobs, |_| {});
        assert!(start.elapsed().as_secs_f64() < 1.4);
    }

    #[test]
    fn failures_do_not_stop_the_run() {
        let jobs = vec![sh("echo oops >&2; exit 3"), sh("echo after")];
        let results = BatchRunner::new(1).run(&jobs, |_| {});
        assert_eq!(results[0].exit_code, Some(3));
        assert_eq!(results[0].stderr.trim(), "oops");
        assert!(!results[0].success());
        assert!(results[1].success());
        assert_eq!(results[1].stdout.trim(), "after");
    }

    #[test]
    fn launch_failure_is_a_result() {
        let mut job = sh("true");
        job.program = "quark-definitely-not-a-program".into();
        let results = BatchRunner::new(4).run(&[job, sh("echo ok")], |_| {});
        assert_eq!(results[0].exit_code, None);
        assert!(results[0].stderr.contains("failed to launch"));
        assert!(results[1].success());
    }

    #[test]
    fn redirected_stdout_lands_in_file() {
        let tmp = tempfile::TempDir::new().unwrap();
        let dump: PathBuf = tmp.path().join("out_dump.sass");
        let mut job = sh("echo disassembly");
        job.stdout = Some(dump.clone());

        let results = BatchRunner::new(1).run(&[job], |_| {});
        assert!(results[0].success());
        assert!(results[0].stdout.is_empty());
        assert_eq!(std::fs::read_to_string(&dump).unwrap(), "disassembly\n");
        assert!(results[0].command_line.ends_with(&format!("> {}", dump.display())));
    }

    #[test]
    fn zero_concurrency_is_clamped() {
        let jobs = vec![sh("true"), sh("true")];
        assert_eq!(BatchRunner::new(0).batches(&jobs).count(), 2);
    }
}

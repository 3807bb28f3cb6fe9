//! External command invocations planned for a build.
//!
//! Jobs carry a structured argument vector that is handed straight to
//! [`std::process::Command`]; no shell is involved. Disassembly jobs
//! redirect stdout to the dump file instead of capturing it.

use std::ffi::OsString;
use std::fmt;
use std::path::{Path, PathBuf};
use std::process::Command;

use serde::{Serialize, Serializer};

use crate::config::ToolsConfig;
use crate::kernel::Kernel;

/// The queue a job belongs to. Queues run in declaration order.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum JobKind {
    Compile,
    Assemble,
    Preprocess,
    Disassemble,
}

impl JobKind {
    /// All kinds, in execution order.
    pub const ALL: [Self; 4] = [Self::Compile, Self::Assemble, Self::Preprocess, Self::Disassemble];

    /// Short label used in log output.
    pub fn label(self) -> &'static str {
        match self {
            Self::Compile => "compile",
            Self::Assemble => "assemble",
            Self::Preprocess => "preprocess",
            Self::Disassemble => "disassemble",
        }
    }
}

/// A single external command, not yet executed.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct Job {
    pub kind: JobKind,
    /// Kernel the job was planned for.
    pub kernel: String,
    pub program: String,
    #[serde(serialize_with = "serialize_args")]
    pub args: Vec<OsString>,
    /// File receiving the process's stdout, if redirected.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stdout: Option<PathBuf>,
}

impl Job {
    /// Create a [`Command`] with the job's program and arguments.
    pub fn command(&self) -> Command {
        let mut cmd = Command::new(&self.program);
        cmd.args(&self.args);
        cmd
    }

    /// Shell-like rendering of the command, used when echoing.
    pub fn command_line(&self) -> String {
        self.to_string()
    }
}

impl fmt::Display for Job {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.program)?;
        for arg in &self.args {
            write!(f, " {}", arg.to_string_lossy())?;
        }
        if let Some(out) = &self.stdout {
            write!(f, " > {}", out.display())?;
        }
        Ok(())
    }
}

fn serialize_args<S: Serializer>(args: &[OsString], serializer: S) -> Result<S::Ok, S::Error> {
    serializer.collect_seq(args.iter().map(|a| a.to_string_lossy()))
}

/// Builder for tool invocations, one constructor per job kind.
pub struct JobBuilder {
    job: Job,
}

impl JobBuilder {
    fn new(kind: JobKind, kernel: &Kernel, program: &str) -> Self {
        Self {
            job: Job {
                kind,
                kernel: kernel.name.clone(),
                program: program.to_string(),
                args: Vec::new(),
                stdout: None,
            },
        }
    }

    /// `<compiler> -arch <arch> -cubin -o <cubin> <cu>`
    pub fn compile(kernel: &Kernel, tools: &ToolsConfig) -> Job {
        let mut b = Self::new(JobKind::Compile, kernel, &tools.compiler);
        b.arg("-arch")
            .arg(&tools.arch)
            .arg("-cubin")
            .arg("-o")
            .path(&kernel.cubin)
            .path(&kernel.source);
        b.finish()
    }

    /// `<assembler> -i -w -k <name> [-D<variant> 1] <sass> <cubin>`
    pub fn assemble(kernel: &Kernel, tools: &ToolsConfig, variant_token: &str) -> Job {
        let mut b = Self::new(JobKind::Assemble, kernel, &tools.assembler);
        b.arg("-i").arg("-w").arg("-k").arg(&kernel.name);
        b.variant_define(kernel, variant_token)
            .path(&kernel.sass)
            .path(&kernel.cubin);
        b.finish()
    }

    /// `<assembler> -p [-D<variant> 1] <sass> <pre>`
    pub fn preprocess(kernel: &Kernel, tools: &ToolsConfig, variant_token: &str) -> Job {
        let mut b = Self::new(JobKind::Preprocess, kernel, &tools.assembler);
        b.arg("-p")
            .variant_define(kernel, variant_token)
            .path(&kernel.sass)
            .path(&kernel.preprocessed);
        b.finish()
    }

    /// `<disassembler> -raw <cubin> > <dump>`
    pub fn disassemble(kernel: &Kernel, tools: &ToolsConfig) -> Job {
        let mut b = Self::new(JobKind::Disassemble, kernel, &tools.disassembler);
        b.arg("-raw").path(&kernel.cubin);
        b.job.stdout = Some(kernel.dump.clone());
        b.finish()
    }

    fn arg(&mut self, arg: &str) -> &mut Self {
        self.job.args.push(arg.into());
        self
    }

    fn path(&mut self, path: &Path) -> &mut Self {
        self.job.args.push(path.as_os_str().to_os_string());
        self
    }

    /// Define the variant symbol for kernels built from the variant name.
    fn variant_define(&mut self, kernel: &Kernel, variant_token: &str) -> &mut Self {
        if kernel.variant {
            self.arg(&format!("-D{variant_token}")).arg("1");
        }
        self
    }

    fn finish(self) -> Job {
        self.job
    }
}

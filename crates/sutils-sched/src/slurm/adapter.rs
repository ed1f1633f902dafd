//! SLURM adapter for topology queries and job submission.

use std::path::{Path, PathBuf};

use tracing::{debug, info};

use crate::error::{SchedError, SchedResult};
use crate::resource::{SubmitArg, to_tokens};
use crate::slurm::parser;
use crate::slurm::runner::CommandRunner;
use crate::topology::TopologyModel;

/// `sinfo --Format` fields, in the column order [`TopologyModel::parse`] expects.
pub const DEFAULT_SINFO_FORMAT: &str = "NodeHost:40,Partition:40,CPUsLoad:10,CPUsState:20,\
SocketCoreThread:12,StateLong:16,Memory:12,FreeMem:12,AllocMem:12,Features:128";

/// Configuration for the SLURM adapter.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SlurmConfig {
    /// Program used to query node information.
    pub sinfo_command: String,

    /// Program used to submit batch scripts.
    pub sbatch_command: String,

    /// Value passed to `sinfo --Format`.
    pub sinfo_format: String,

    /// Submit with `--parsable`.
    pub parsable: bool,
}

impl Default for SlurmConfig {
    fn default() -> Self {
        Self {
            sinfo_command: std::env::var("ASBATCH_SINFO").unwrap_or_else(|_| "sinfo".to_string()),
            sbatch_command: std::env::var("ASBATCH_SBATCH")
                .unwrap_or_else(|_| "sbatch".to_string()),
            sinfo_format: DEFAULT_SINFO_FORMAT.to_string(),
            parsable: false,
        }
    }
}

/// A job accepted by sbatch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubmissionReceipt {
    /// SLURM job ID.
    pub job_id: String,

    /// Raw sbatch output.
    pub stdout: String,
}

/// Adapter for the SLURM command-line tools.
pub struct SlurmAdapter<R> {
    config: SlurmConfig,
    runner: R,
}

impl<R: CommandRunner> SlurmAdapter<R> {
    /// Create a new SLURM adapter running commands through `runner`.
    pub fn new(config: SlurmConfig, runner: R) -> Self {
        Self { config, runner }
    }

    pub fn config(&self) -> &SlurmConfig {
        &self.config
    }

    pub fn runner(&self) -> &R {
        &self.runner
    }

    /// Arguments for the node query.
    pub fn sinfo_args(&self) -> Vec<String> {
        vec![
            "--Node".to_string(),
            "--noheader".to_string(),
            format!("--Format={}", self.config.sinfo_format),
        ]
    }

    /// Snapshot the cluster.
    ///
    /// Fails if sinfo exits non-zero or writes anything to stderr.
    pub fn query_topology(&self) -> SchedResult<TopologyModel> {
        let command = &self.config.sinfo_command;
        let output = self.runner.run(command, &self.sinfo_args())?;

        if !output.success || !output.stderr.trim().is_empty() {
            return Err(SchedError::TopologyQueryFailed {
                command: command.clone(),
                message: output.stderr.trim_end().to_string(),
            });
        }

        let topology = TopologyModel::parse(&output.stdout)?;
        debug!(rows = topology.len(), "queried topology");
        Ok(topology)
    }

    /// Arguments for submitting `script` from `workdir`.
    pub fn sbatch_args(&self, script: &Path, workdir: &Path) -> Vec<String> {
        let mut args = to_tokens(&[
            SubmitArg::Chdir(workdir.to_path_buf()),
            SubmitArg::Parsable(self.config.parsable),
        ]);
        args.push(script.to_string_lossy().into_owned());
        args
    }

    /// Submit a batch script.
    pub fn submit(&self, script: &Path, workdir: &Path) -> SchedResult<SubmissionReceipt> {
        let output = self
            .runner
            .run(&self.config.sbatch_command, &self.sbatch_args(script, workdir))?;

        if !output.success {
            return Err(SchedError::SlurmSubmitError(output.stderr));
        }

        let job_id = parser::parse_sbatch_output(&output.stdout)?;
        info!(job_id = %job_id, script = %script.display(), "submitted batch job");
        Ok(SubmissionReceipt {
            job_id,
            stdout: output.stdout,
        })
    }
}

/// Directory sbatch should run `script` from: the script's own directory.
pub fn script_dir(script: &Path) -> PathBuf {
    match script.parent() {
        Some(dir) if !dir.as_os_str().is_empty() => dir.to_path_buf(),
        _ => PathBuf::from("."),
    }
}

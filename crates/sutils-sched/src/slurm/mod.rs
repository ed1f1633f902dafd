//! SLURM integration: node queries and batch submission.

mod adapter;
mod parser;
mod runner;

pub use adapter::{DEFAULT_SINFO_FORMAT, SlurmAdapter, SlurmConfig, SubmissionReceipt, script_dir};
pub use parser::parse_sbatch_output;
pub use runner::{CommandOutput, CommandRunner, ProcessRunner, RecordingRunner};

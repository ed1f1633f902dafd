//! Cluster Resource Matching for SLURM
//!
//! This crate decides where a batch script should run. It reads the resource
//! request from the script's `#SBATCH` block, snapshots the cluster with
//! `sinfo`, and finds the cheapest allocation that covers the request on each
//! acceptable partition, preferring nodes that are idle right now.
//!
//! # Overview
//!
//! A matching run goes through these steps:
//! 1. **Request**: Parse partitions, task count, nodes and memory from the script
//! 2. **Topology**: Query per-node CPU and memory state from the cluster
//! 3. **Search**: Find the minimal covering set of nodes, idle first, then queued
//! 4. **Selection**: Take an exact match automatically, otherwise ask the user
//! 5. **Submission**: Rewrite the directives and hand the copy to `sbatch`
//!
//! # Allocation Search
//!
//! The search picks the subset of per-node CPU counts whose sum covers the
//! request with the least total, breaking ties by fewest nodes:
//!
//! ```
//! use sutils_sched::optimal_subset;
//!
//! let nodes = [16, 16, 16, 20, 20, 20];
//! assert_eq!(optimal_subset(&nodes, 48), Some(vec![16, 16, 16]));
//! assert_eq!(optimal_subset(&nodes, 200), None);
//! ```
//!
//! # Example: Matching a Script
//!
//! ```ignore
//! use sutils_sched::{
//!     MatchingWorkflow, ProcessRunner, ScriptedPrompt, SlurmAdapter, SlurmConfig, WorkflowConfig,
//! };
//!
//! let adapter = SlurmAdapter::new(SlurmConfig::default(), ProcessRunner);
//! // take the first candidate if asked
//! let mut prompt = ScriptedPrompt::new(["1"]);
//! let mut workflow = MatchingWorkflow::new(adapter, &mut prompt, WorkflowConfig::default());
//!
//! let outcome = workflow.run("job.sh".as_ref())?;
//! println!("Submitted {:?} on {}", outcome.job_id, outcome.selected);
//! ```
//!
//! # Testing Without a Cluster
//!
//! Every external command goes through [`CommandRunner`]. [`RecordingRunner`]
//! replays canned `sinfo`/`sbatch` output and records the calls made, and
//! [`ScriptedPrompt`] answers the selection prompt.

pub mod error;
pub mod resource;
pub mod script;
pub mod search;
pub mod slurm;
pub mod summary;
pub mod topology;
pub mod units;
pub mod workflow;

// Re-exports
pub use error::{SchedError, SchedResult};
pub use resource::{ResourceDescriptor, SubmitArg, to_tokens};
pub use script::{ResourceRequest, parse_directives, read_request, rewrite_directives};
pub use search::{Allocation, find_resources, optimal_subset};
pub use slurm::{
    CommandOutput, CommandRunner, ProcessRunner, RecordingRunner, SlurmAdapter, SlurmConfig,
    SubmissionReceipt,
};
pub use summary::{Prompt, ScriptedPrompt, select, summarize};
pub use topology::{CpuStatus, NodeRecord, TopologyModel};
pub use units::convert_to_megabytes;
pub use workflow::{Candidates, MatchOutcome, MatchingWorkflow, Stage, WorkflowConfig};

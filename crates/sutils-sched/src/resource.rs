//! Resource descriptors and the sbatch arguments derived from them.

use std::fmt;
use std::path::PathBuf;

use serde::Serialize;

/// A requested or proposed allocation on one partition.
///
/// Equality is structural over all four fields. Use [`same_allocation`]
/// to compare two descriptors while ignoring memory.
///
/// [`same_allocation`]: ResourceDescriptor::same_allocation
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub struct ResourceDescriptor {
    partition: String,
    cpus: u32,
    nodes: Option<u32>,
    /// Memory in MB.
    memory: Option<u64>,
}

impl ResourceDescriptor {
    /// Create a descriptor with no node count and no memory.
    pub fn new(partition: impl Into<String>, cpus: u32) -> Self {
        Self {
            partition: partition.into(),
            cpus,
            nodes: None,
            memory: None,
        }
    }

    /// Set the node count.
    pub fn with_nodes(mut self, nodes: Option<u32>) -> Self {
        self.nodes = nodes;
        self
    }

    /// Set the memory in MB.
    pub fn with_memory(mut self, memory: Option<u64>) -> Self {
        self.memory = memory;
        self
    }

    pub fn partition(&self) -> &str {
        &self.partition
    }

    pub fn cpus(&self) -> u32 {
        self.cpus
    }

    pub fn nodes(&self) -> Option<u32> {
        self.nodes
    }

    pub fn memory(&self) -> Option<u64> {
        self.memory
    }

    /// A copy of this descriptor with the memory removed.
    pub fn without_memory(&self) -> Self {
        self.clone().with_memory(None)
    }

    /// Compare partition, CPUs and nodes, ignoring memory.
    pub fn same_allocation(&self, other: &ResourceDescriptor) -> bool {
        self.without_memory() == other.without_memory()
    }

    /// Whether `candidate` satisfies this request exactly.
    ///
    /// Partition and CPU count must be equal. A request without a node count
    /// accepts any node count.
    pub fn matched_by(&self, candidate: &ResourceDescriptor) -> bool {
        self.partition == candidate.partition
            && self.cpus == candidate.cpus
            && self.nodes.is_none_or(|n| candidate.nodes == Some(n))
    }

    /// The sbatch arguments describing this allocation.
    ///
    /// With `preserve_memory` the memory argument is left out, so the
    /// script's own memory directive stays in effect.
    pub fn to_submission_args(&self, preserve_memory: bool) -> Vec<SubmitArg> {
        let mut args = vec![
            SubmitArg::Partition(self.partition.clone()),
            SubmitArg::Ntasks(self.cpus),
            SubmitArg::Nodes(self.nodes),
        ];
        if !preserve_memory {
            args.push(SubmitArg::Mem(self.memory));
        }
        args
    }
}

impl fmt::Display for ResourceDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({} CPUs", self.partition, self.cpus)?;
        if let Some(nodes) = self.nodes {
            write!(f, ", {nodes} nodes")?;
        }
        if let Some(mem) = self.memory {
            write!(f, ", {mem} MB")?;
        }
        write!(f, ")")
    }
}

/// One sbatch command-line option.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SubmitArg {
    Partition(String),
    Ntasks(u32),
    Nodes(Option<u32>),
    /// Memory in MB.
    Mem(Option<u64>),
    Chdir(PathBuf),
    Parsable(bool),
}

impl SubmitArg {
    /// The long option name without leading dashes.
    pub fn key(&self) -> &'static str {
        match self {
            SubmitArg::Partition(_) => "partition",
            SubmitArg::Ntasks(_) => "ntasks",
            SubmitArg::Nodes(_) => "nodes",
            SubmitArg::Mem(_) => "mem",
            SubmitArg::Chdir(_) => "chdir",
            SubmitArg::Parsable(_) => "parsable",
        }
    }

    /// Render as a single `--key=value` token, or nothing for unset options.
    pub fn to_token(&self) -> Option<String> {
        let key = self.key();
        match self {
            SubmitArg::Partition(p) => Some(format!("--{key}={p}")),
            SubmitArg::Ntasks(n) => Some(format!("--{key}={n}")),
            SubmitArg::Nodes(n) => n.map(|n| format!("--{key}={n}")),
            SubmitArg::Mem(m) => m.map(|m| format!("--{key}={m}")),
            SubmitArg::Chdir(dir) => Some(format!("--{key}={}", dir.display())),
            SubmitArg::Parsable(on) => on.then(|| format!("--{key}")),
        }
    }
}

/// Render a list of arguments, skipping the unset ones.
pub fn to_tokens(args: &[SubmitArg]) -> Vec<String> {
    args.iter().filter_map(SubmitArg::to_token).collect()
}

//! Matching a batch script to an allocation and submitting it.
//!
//! One run walks through these stages, failing at the first error:
//!
//! ```text
//! ReadRequest -> QueryTopology -> SearchIdle -> SearchQueued -> Dedupe
//!     -> AutoSelectOrPrompt -> RewriteScript -> Submit -> Done
//! ```

use std::fmt;
use std::path::{Path, PathBuf};

use serde::Serialize;
use tracing::{debug, info, warn};

use crate::error::{SchedError, SchedResult};
use crate::resource::ResourceDescriptor;
use crate::script::{self, ResourceRequest};
use crate::search::find_resources;
use crate::slurm::{CommandRunner, SlurmAdapter, script_dir};
use crate::summary::{self, Prompt};
use crate::topology::TopologyModel;

/// Options for a matching run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkflowConfig {
    /// Prepended to the script's file name to name the rewritten copy.
    pub prefix: String,

    /// Take the first candidate instead of prompting when nothing matches exactly.
    pub first_match: bool,

    /// Stop after writing the rewritten script.
    pub dry_run: bool,

    /// Also offer idle allocations on partitions the script did not ask for.
    pub any_partition: bool,
}

impl Default for WorkflowConfig {
    fn default() -> Self {
        Self {
            prefix: std::env::var("ASBATCH_PREFIX").unwrap_or_else(|_| "asbatch_".to_string()),
            first_match: false,
            dry_run: false,
            any_partition: false,
        }
    }
}

/// Where a run currently is.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum Stage {
    ReadRequest,
    QueryTopology,
    SearchIdle,
    SearchQueued,
    Dedupe,
    AutoSelectOrPrompt,
    RewriteScript,
    Submit,
    Done,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Stage::ReadRequest => "read request",
            Stage::QueryTopology => "query topology",
            Stage::SearchIdle => "search idle",
            Stage::SearchQueued => "search queued",
            Stage::Dedupe => "dedupe",
            Stage::AutoSelectOrPrompt => "select",
            Stage::RewriteScript => "rewrite script",
            Stage::Submit => "submit",
            Stage::Done => "done",
        };
        f.write_str(name)
    }
}

/// Allocations on offer for one request.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct Candidates {
    /// Startable right away.
    pub idle: Vec<ResourceDescriptor>,
    /// Startable once running jobs finish.
    pub queued: Vec<ResourceDescriptor>,
}

impl Candidates {
    pub fn is_empty(&self) -> bool {
        self.idle.is_empty() && self.queued.is_empty()
    }

    pub fn len(&self) -> usize {
        self.idle.len() + self.queued.len()
    }

    /// Drop queued candidates that are also idle, ignoring memory.
    pub fn dedupe(&mut self) {
        let idle = &self.idle;
        self.queued
            .retain(|q| !idle.iter().any(|i| i.same_allocation(q)));
    }

    /// The first candidate, idle ones first.
    pub fn first(&self) -> Option<&ResourceDescriptor> {
        self.idle.first().or_else(|| self.queued.first())
    }
}

/// Result of a successful run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MatchOutcome {
    /// What the script asked for, one entry per partition.
    pub requested: Vec<ResourceDescriptor>,
    pub candidates: Candidates,
    pub selected: ResourceDescriptor,
    /// Whether `selected` was chosen without asking.
    pub auto_selected: bool,
    /// Path of the rewritten script.
    pub rewritten: PathBuf,
    /// SLURM job ID, absent on a dry run.
    pub job_id: Option<String>,
}

impl MatchOutcome {
    /// Render the outcome as pretty-printed JSON.
    pub fn to_json(&self) -> SchedResult<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }
}

/// Drives one batch script from its directives to a submitted job.
pub struct MatchingWorkflow<'p, R> {
    adapter: SlurmAdapter<R>,
    prompt: &'p mut dyn Prompt,
    config: WorkflowConfig,
    stage: Stage,
}

impl<'p, R: CommandRunner> MatchingWorkflow<'p, R> {
    pub fn new(adapter: SlurmAdapter<R>, prompt: &'p mut dyn Prompt, config: WorkflowConfig) -> Self {
        Self {
            adapter,
            prompt,
            config,
            stage: Stage::ReadRequest,
        }
    }

    /// The last stage entered. After a failed [`run`](Self::run), the one that failed.
    pub fn stage(&self) -> Stage {
        self.stage
    }

    pub fn config(&self) -> &WorkflowConfig {
        &self.config
    }

    fn enter(&mut self, stage: Stage) {
        debug!(%stage, "entering stage");
        self.stage = stage;
    }

    /// Match `script` to an allocation, rewrite it and submit the copy.
    pub fn run(&mut self, script: &Path) -> SchedResult<MatchOutcome> {
        self.enter(Stage::ReadRequest);
        let request = script::read_request(script)?;
        let requested = request.resources();

        self.enter(Stage::QueryTopology);
        let topology = self.adapter.query_topology()?;

        let mut candidates = Candidates::default();
        self.enter(Stage::SearchIdle);
        candidates.idle = search_idle(&request, &topology, self.config.any_partition);
        self.enter(Stage::SearchQueued);
        candidates.queued = search_queued(&request, &topology);

        self.enter(Stage::Dedupe);
        candidates.dedupe();

        self.enter(Stage::AutoSelectOrPrompt);
        if candidates.is_empty() {
            warn!(partitions = ?request.partitions, cpus = request.cpus, "no candidates found");
            return Err(SchedError::NoCapacityAvailable(format!(
                "no partition of {} can provide {} CPUs",
                request.partitions.join(","),
                request.cpus
            )));
        }
        let (selected, auto_selected) = self.choose(&requested, &candidates)?;
        info!(%selected, auto_selected, "selected allocation");

        self.enter(Stage::RewriteScript);
        let rewritten = script::write_rewritten(script, &self.config.prefix, &selected)?;

        let job_id = if self.config.dry_run {
            info!(path = %rewritten.display(), "dry run, not submitting");
            None
        } else {
            self.enter(Stage::Submit);
            let receipt = self.adapter.submit(&rewritten, &script_dir(script))?;
            Some(receipt.job_id)
        };

        self.enter(Stage::Done);
        Ok(MatchOutcome {
            requested,
            candidates,
            selected,
            auto_selected,
            rewritten,
            job_id,
        })
    }

    fn choose(
        &mut self,
        requested: &[ResourceDescriptor],
        candidates: &Candidates,
    ) -> SchedResult<(ResourceDescriptor, bool)> {
        if let Some(exact) = exact_match(requested, &candidates.idle) {
            return Ok((exact.clone(), true));
        }
        if self.config.first_match {
            if let Some(first) = candidates.first() {
                return Ok((first.clone(), true));
            }
        }
        let lines = summary::summarize(&candidates.idle, &candidates.queued);
        let chosen = summary::select(&lines, &candidates.idle, &candidates.queued, &mut *self.prompt)?;
        Ok((chosen, false))
    }
}

/// The first idle candidate that satisfies a requested resource verbatim.
pub fn exact_match<'a>(
    requested: &[ResourceDescriptor],
    idle: &'a [ResourceDescriptor],
) -> Option<&'a ResourceDescriptor> {
    requested
        .iter()
        .find_map(|req| idle.iter().find(|cand| req.matched_by(cand)))
}

/// The nodes of `partition` that meet the request's per-CPU memory floor.
fn partition_nodes(request: &ResourceRequest, topology: &TopologyModel, partition: &str) -> TopologyModel {
    let nodes = topology.filter_partition(&[partition]);
    match request.mem_per_cpu {
        Some(floor) => nodes.filter_mem_per_cpu(floor),
        None => nodes,
    }
}

/// Best idle allocation on `partition`, if its idle nodes can cover the request.
fn best_idle(request: &ResourceRequest, nodes: &TopologyModel, partition: &str) -> Option<ResourceDescriptor> {
    let capacity = nodes.maximal_idle_resources().remove(partition)?;
    if capacity.cpus() < request.cpus {
        debug!(partition, idle_cpus = capacity.cpus(), "not enough idle CPUs");
        return None;
    }
    let alloc = find_resources(nodes, request.cpus, true)?;
    Some(descriptor(request, partition, alloc.cpus, alloc.nodes))
}

fn descriptor(request: &ResourceRequest, partition: &str, cpus: u32, nodes: u32) -> ResourceDescriptor {
    ResourceDescriptor::new(partition, cpus)
        .with_nodes(Some(nodes))
        .with_memory(request.memory)
}

/// One best idle allocation per requested partition that has one.
///
/// With `any_partition`, every other partition of `topology` is searched
/// as well, after the requested ones.
pub fn search_idle(request: &ResourceRequest, topology: &TopologyModel, any_partition: bool) -> Vec<ResourceDescriptor> {
    let mut idle: Vec<ResourceDescriptor> = request
        .partitions
        .iter()
        .filter_map(|p| best_idle(request, &partition_nodes(request, topology, p), p))
        .collect();

    if any_partition {
        for p in topology.partition_names() {
            if request.partitions.contains(&p) {
                continue;
            }
            if let Some(res) = best_idle(request, &partition_nodes(request, topology, &p), &p) {
                idle.push(res);
            }
        }
    }
    idle
}

/// One best allocation per requested partition, counting busy nodes too.
pub fn search_queued(request: &ResourceRequest, topology: &TopologyModel) -> Vec<ResourceDescriptor> {
    request
        .partitions
        .iter()
        .filter_map(|p| {
            let nodes = partition_nodes(request, topology, p);
            if nodes.is_empty() {
                warn!(partition = %p, "partition has no usable nodes");
                return None;
            }
            let alloc = find_resources(&nodes, request.cpus, false)?;
            Some(descriptor(request, p, alloc.cpus, alloc.nodes))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    const TOPOLOGY: &str = "\
node01  short  0.00  0/16/0/16  2:8:1  idle   65536  60000  0      (null)
node02  short  4.00  24/0/0/24  2:12:1 alloc  98304  90000  98304  (null)
node03  long   0.00  0/8/0/8    1:8:1  idle   8192   8000   0      (null)
node04  long   0.00  0/8/0/8    1:8:1  idle   8192   8000   0      (null)
node05  gpu    0.00  0/32/0/32  2:16:1 idle   262144 250000 0      gpu
";

    fn topology() -> TopologyModel {
        TopologyModel::parse(TOPOLOGY).unwrap()
    }

    fn request(partitions: &[&str], cpus: u32) -> ResourceRequest {
        ResourceRequest {
            partitions: partitions.iter().map(|p| p.to_string()).collect(),
            cpus,
            nodes: None,
            memory: None,
            mem_per_cpu: None,
        }
    }

    fn res(partition: &str, cpus: u32, nodes: u32) -> ResourceDescriptor {
        ResourceDescriptor::new(partition, cpus).with_nodes(Some(nodes))
    }

    #[test]
    fn test_idle_needs_enough_idle_cpus() {
        let topo = topology();
        assert!(search_idle(&request(&["short"], 20), &topo, false).is_empty());
        assert_eq!(
            search_queued(&request(&["short"], 20), &topo),
            vec![res("short", 24, 1)]
        );
    }

    #[test]
    fn test_idle_spans_nodes() {
        let topo = topology();
        assert_eq!(
            search_idle(&request(&["long"], 12), &topo, false),
            vec![res("long", 16, 2)]
        );
    }

    #[test]
    fn test_any_partition_adds_other_partitions() {
        let topo = topology();
        let req = request(&["long"], 12);
        assert_eq!(
            search_idle(&req, &topo, true),
            vec![res("long", 16, 2), res("gpu", 32, 1), res("short", 16, 1)]
        );
    }

    #[test]
    fn test_candidates_carry_request_memory() {
        let topo = topology();
        let mut req = request(&["long"], 8);
        req.memory = Some(4096);
        let idle = search_idle(&req, &topo, false);
        assert_eq!(idle, vec![res("long", 8, 1).with_memory(Some(4096))]);
    }

    #[test]
    fn test_mem_per_cpu_floor_filters_nodes() {
        let topo = topology();
        let mut req = request(&["long", "gpu"], 8);
        req.mem_per_cpu = Some(4096);
        req.memory = Some(4096 * 8);
        // long has 1024 MB per CPU, gpu has 8192
        let idle = search_idle(&req, &topo, false);
        assert_eq!(idle.len(), 1);
        assert_eq!(idle[0].partition(), "gpu");
        assert!(search_queued(&req, &topo).iter().all(|r| r.partition() == "gpu"));
    }

    #[test]
    fn test_unknown_partition_yields_nothing() {
        let topo = topology();
        let req = request(&["debug"], 1);
        assert!(search_idle(&req, &topo, false).is_empty());
        assert!(search_queued(&req, &topo).is_empty());
    }

    #[test]
    fn test_dedupe_ignores_memory() {
        let mut candidates = Candidates {
            idle: vec![res("long", 8, 1).with_memory(Some(1024))],
            queued: vec![res("long", 8, 1), res("short", 16, 1)],
        };
        candidates.dedupe();
        assert_eq!(candidates.queued, vec![res("short", 16, 1)]);
        assert_eq!(candidates.len(), 2);
    }

    #[test]
    fn test_exact_match() {
        let idle = [res("long", 16, 2), res("short", 16, 1)];

        let requested = [ResourceDescriptor::new("short", 16)];
        assert_eq!(exact_match(&requested, &idle), Some(&idle[1]));

        let requested = [ResourceDescriptor::new("short", 16).with_nodes(Some(2))];
        assert_eq!(exact_match(&requested, &idle), None);

        let requested = [ResourceDescriptor::new("long", 12)];
        assert_eq!(exact_match(&requested, &idle), None);
    }

    #[test]
    fn test_outcome_json() {
        let outcome = MatchOutcome {
            requested: vec![ResourceDescriptor::new("short", 16).with_memory(Some(4096))],
            candidates: Candidates {
                idle: vec![res("short", 16, 1)],
                queued: vec![],
            },
            selected: res("short", 16, 1),
            auto_selected: true,
            rewritten: PathBuf::from("/work/asbatch_relax.sh"),
            job_id: None,
        };

        let json = outcome.to_json().unwrap();
        let value: serde_json::Value = serde_json::from_str(&json).unwrap();
        assert_eq!(value["requested"][0]["memory"], 4096);
        assert_eq!(value["candidates"]["idle"][0]["nodes"], 1);
        assert_eq!(value["selected"]["partition"], "short");
        assert_eq!(value["auto_selected"], true);
        assert_eq!(value["rewritten"], "/work/asbatch_relax.sh");
        assert!(value["job_id"].is_null());
    }

    #[test]
    fn test_stage_display() {
        assert_eq!(Stage::QueryTopology.to_string(), "query topology");
        assert_eq!(Stage::AutoSelectOrPrompt.to_string(), "select");
    }
}

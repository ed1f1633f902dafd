//! Columnar snapshot of cluster node hardware.
//!
//! A [`TopologyModel`] holds one row per node-in-partition as reported by
//! `sinfo --Node`. A node that belongs to two partitions appears twice. All
//! columns have the same length and row `i` of every column describes the
//! same entry. Filters return new snapshots and never modify the receiver.
//!
//! Expected line format (whitespace separated):
//!
//! ```text
//! host partition load alloc/idle/other/total sockets:cores:threads state memory free_mem alloc_mem features
//! node01 batch 0.00 0/4/0/4 1:4:1 idle 8192 8000 0 (null)
//! ```

use std::collections::{BTreeMap, BTreeSet};

use tracing::warn;

use crate::error::{SchedError, SchedResult};
use crate::resource::ResourceDescriptor;

/// Number of whitespace-separated fields per node-info line.
pub const FIELD_COUNT: usize = 10;

/// Node state reported for a fully unallocated node.
pub const IDLE_STATE: &str = "idle";

/// Which CPU column to look at.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CpuStatus {
    All,
    Idle,
    Other,
    Allocated,
}

/// One parsed node-info line.
#[derive(Debug, Clone, PartialEq)]
pub struct NodeRecord {
    pub host: String,
    pub partition: String,
    pub load: f64,
    pub allocated_cpus: u32,
    pub idle_cpus: u32,
    pub other_cpus: u32,
    pub total_cpus: u32,
    pub sockets_per_node: u32,
    pub cores_per_socket: u32,
    pub threads_per_core: u32,
    pub state: String,
    pub memory: u64,
    pub free_memory: u64,
    pub allocated_memory: u64,
    pub features: String,
}

impl NodeRecord {
    /// Parse a single line. `line_no` is 1-based and only used for errors.
    pub fn parse(line: &str, line_no: usize) -> SchedResult<Self> {
        let fields: Vec<&str> = line.split_whitespace().collect();
        if fields.len() != FIELD_COUNT {
            return Err(SchedError::TopologyParse {
                line: line_no,
                message: format!("expected {FIELD_COUNT} fields, found {}", fields.len()),
            });
        }

        let cpus = split_exact(fields[3], '/', 4, line_no, "alloc/idle/other/total")?;
        let [allocated_cpus, idle_cpus, other_cpus, total_cpus]: [u32; 4] =
            [0, 1, 2, 3].map(|i| parse_or_zero(cpus[i], line_no));

        let sum = u64::from(allocated_cpus) + u64::from(idle_cpus) + u64::from(other_cpus);
        if sum != u64::from(total_cpus) {
            return Err(SchedError::TopologyParse {
                line: line_no,
                message: format!("CPU states {} do not add up to the total", fields[3]),
            });
        }

        let sct = split_exact(fields[4], ':', 3, line_no, "sockets:cores:threads")?;
        let [sockets_per_node, cores_per_socket, threads_per_core]: [u32; 3] =
            [0, 1, 2].map(|i| parse_or_zero(sct[i], line_no));

        Ok(Self {
            host: fields[0].to_string(),
            partition: fields[1].trim_end_matches('*').to_string(),
            load: parse_or_zero(fields[2], line_no),
            allocated_cpus,
            idle_cpus,
            other_cpus,
            total_cpus,
            sockets_per_node,
            cores_per_socket,
            threads_per_core,
            state: fields[5].to_string(),
            memory: parse_or_zero(fields[6], line_no),
            free_memory: parse_or_zero(fields[7], line_no),
            allocated_memory: parse_or_zero(fields[8], line_no),
            features: fields[9].to_string(),
        })
    }
}

fn split_exact<'a>(
    field: &'a str,
    sep: char,
    count: usize,
    line_no: usize,
    what: &str,
) -> SchedResult<Vec<&'a str>> {
    let parts: Vec<&str> = field.split(sep).collect();
    if parts.len() != count {
        return Err(SchedError::TopologyParse {
            line: line_no,
            message: format!("expected {what}, found '{field}'"),
        });
    }
    Ok(parts)
}

/// Numeric fields that do not parse default to zero (sinfo prints `N/A`).
fn parse_or_zero<T: std::str::FromStr + Default>(value: &str, line_no: usize) -> T {
    value.parse().unwrap_or_else(|_| {
        warn!(line = line_no, value, "non-numeric field, defaulting to 0");
        T::default()
    })
}

/// Immutable table of node-in-partition rows.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TopologyModel {
    host: Vec<String>,
    partition: Vec<String>,
    load: Vec<f64>,
    allocated_cpus: Vec<u32>,
    idle_cpus: Vec<u32>,
    other_cpus: Vec<u32>,
    total_cpus: Vec<u32>,
    sockets_per_node: Vec<u32>,
    cores_per_socket: Vec<u32>,
    threads_per_core: Vec<u32>,
    state: Vec<String>,
    memory: Vec<u64>,
    free_memory: Vec<u64>,
    allocated_memory: Vec<u64>,
    features: Vec<String>,
}

impl TopologyModel {
    /// The snapshot with zero rows.
    pub fn empty() -> Self {
        Self::default()
    }

    /// Parse node-info text. Blank lines are skipped.
    pub fn parse(text: &str) -> SchedResult<Self> {
        let mut model = Self::empty();
        for (i, line) in text.lines().enumerate() {
            if line.trim().is_empty() {
                continue;
            }
            model.push(NodeRecord::parse(line, i + 1)?);
        }
        Ok(model)
    }

    /// Build a snapshot from already-parsed records.
    pub fn from_records(records: impl IntoIterator<Item = NodeRecord>) -> Self {
        let mut model = Self::empty();
        for record in records {
            model.push(record);
        }
        model
    }

    fn push(&mut self, r: NodeRecord) {
        self.host.push(r.host);
        self.partition.push(r.partition);
        self.load.push(r.load);
        self.allocated_cpus.push(r.allocated_cpus);
        self.idle_cpus.push(r.idle_cpus);
        self.other_cpus.push(r.other_cpus);
        self.total_cpus.push(r.total_cpus);
        self.sockets_per_node.push(r.sockets_per_node);
        self.cores_per_socket.push(r.cores_per_socket);
        self.threads_per_core.push(r.threads_per_core);
        self.state.push(r.state);
        self.memory.push(r.memory);
        self.free_memory.push(r.free_memory);
        self.allocated_memory.push(r.allocated_memory);
        self.features.push(r.features);
    }

    /// Reassemble row `i`.
    pub fn record(&self, i: usize) -> Option<NodeRecord> {
        if i >= self.len() {
            return None;
        }
        Some(NodeRecord {
            host: self.host[i].clone(),
            partition: self.partition[i].clone(),
            load: self.load[i],
            allocated_cpus: self.allocated_cpus[i],
            idle_cpus: self.idle_cpus[i],
            other_cpus: self.other_cpus[i],
            total_cpus: self.total_cpus[i],
            sockets_per_node: self.sockets_per_node[i],
            cores_per_socket: self.cores_per_socket[i],
            threads_per_core: self.threads_per_core[i],
            state: self.state[i].clone(),
            memory: self.memory[i],
            free_memory: self.free_memory[i],
            allocated_memory: self.allocated_memory[i],
            features: self.features[i].clone(),
        })
    }

    /// Iterate over rows in order.
    pub fn records(&self) -> impl Iterator<Item = NodeRecord> + '_ {
        (0..self.len()).filter_map(|i| self.record(i))
    }

    pub fn len(&self) -> usize {
        self.host.len()
    }

    pub fn is_empty(&self) -> bool {
        self.host.is_empty()
    }

    /// Keep the rows for which `keep(i)` holds, in their original order.
    fn select(&self, keep: impl Fn(usize) -> bool) -> Self {
        Self::from_records((0..self.len()).filter(|&i| keep(i)).filter_map(|i| self.record(i)))
    }

    /// Rows whose partition is one of `names`.
    pub fn filter_partition<S: AsRef<str>>(&self, names: &[S]) -> Self {
        let names: BTreeSet<&str> = names.iter().map(AsRef::as_ref).collect();
        self.select(|i| names.contains(self.partition[i].as_str()))
    }

    /// Rows with at least `min` CPUs in total.
    pub fn filter_cpus(&self, min: u32) -> Self {
        self.select(|i| self.total_cpus[i] >= min)
    }

    /// Rows with at least `min` MB of memory.
    pub fn filter_memory(&self, min: u64) -> Self {
        self.select(|i| self.memory[i] >= min)
    }

    /// Rows offering at least `min` MB per CPU. Zero-CPU rows are dropped.
    pub fn filter_mem_per_cpu(&self, min: u64) -> Self {
        self.select(|i| {
            let cpus = self.total_cpus[i];
            cpus > 0 && self.memory[i] as f64 / f64::from(cpus) >= min as f64
        })
    }

    /// Fully idle rows.
    ///
    /// Both conditions are required: a node reporting `idle` while some of
    /// its CPUs are allocated or in another state is excluded.
    pub fn filter_idle(&self) -> Self {
        self.select(|i| self.idle_cpus[i] == self.total_cpus[i] && self.state[i] == IDLE_STATE)
    }

    /// Memory per CPU for every row. Rows with zero CPUs yield a non-finite value.
    pub fn mem_per_cpu(&self) -> Vec<f64> {
        self.memory
            .iter()
            .zip(&self.total_cpus)
            .map(|(&mem, &cpus)| mem as f64 / f64::from(cpus))
            .collect()
    }

    /// Free memory per idle CPU for every row. Rows with zero idle CPUs yield a non-finite value.
    pub fn free_mem_per_idle_cpu(&self) -> Vec<f64> {
        self.free_memory
            .iter()
            .zip(&self.idle_cpus)
            .map(|(&mem, &cpus)| mem as f64 / f64::from(cpus))
            .collect()
    }

    pub fn hosts(&self) -> &[String] {
        &self.host
    }

    pub fn partitions(&self) -> &[String] {
        &self.partition
    }

    pub fn loads(&self) -> &[f64] {
        &self.load
    }

    pub fn allocated_cpus(&self) -> &[u32] {
        &self.allocated_cpus
    }

    pub fn idle_cpus(&self) -> &[u32] {
        &self.idle_cpus
    }

    pub fn other_cpus(&self) -> &[u32] {
        &self.other_cpus
    }

    pub fn total_cpus(&self) -> &[u32] {
        &self.total_cpus
    }

    pub fn sockets_per_node(&self) -> &[u32] {
        &self.sockets_per_node
    }

    pub fn cores_per_socket(&self) -> &[u32] {
        &self.cores_per_socket
    }

    pub fn threads_per_core(&self) -> &[u32] {
        &self.threads_per_core
    }

    pub fn states(&self) -> &[String] {
        &self.state
    }

    pub fn memory(&self) -> &[u64] {
        &self.memory
    }

    pub fn free_memory(&self) -> &[u64] {
        &self.free_memory
    }

    pub fn allocated_memory(&self) -> &[u64] {
        &self.allocated_memory
    }

    pub fn features(&self) -> &[String] {
        &self.features
    }

    /// The CPU column for `status`.
    pub fn cpus(&self, status: CpuStatus) -> &[u32] {
        match status {
            CpuStatus::All => &self.total_cpus,
            CpuStatus::Idle => &self.idle_cpus,
            CpuStatus::Other => &self.other_cpus,
            CpuStatus::Allocated => &self.allocated_cpus,
        }
    }

    /// Distinct partition names, sorted.
    pub fn partition_names(&self) -> Vec<String> {
        let names: BTreeSet<&String> = self.partition.iter().collect();
        names.into_iter().cloned().collect()
    }

    /// Total CPUs per host, summed over all of its rows.
    pub fn cpu_count(&self) -> BTreeMap<String, u32> {
        let mut count = BTreeMap::new();
        for (host, &cpus) in self.host.iter().zip(&self.total_cpus) {
            *count.entry(host.clone()).or_insert(0) += cpus;
        }
        count
    }

    /// Whether `n` is a multiple of some per-node CPU count in the `status` column.
    pub fn is_cpu_commensurate(&self, n: u32, status: CpuStatus) -> bool {
        let counts: BTreeSet<u32> = self.cpus(status).iter().copied().filter(|&c| c > 0).collect();
        counts.iter().any(|&c| n % c == 0)
    }

    /// Per partition, every CPU and every node it has.
    pub fn maximal_resources(&self) -> BTreeMap<String, ResourceDescriptor> {
        self.sum_by_partition(CpuStatus::All)
    }

    /// Per partition, the CPUs and nodes that are idle right now.
    ///
    /// Partitions without any idle node are absent.
    pub fn maximal_idle_resources(&self) -> BTreeMap<String, ResourceDescriptor> {
        self.filter_idle().sum_by_partition(CpuStatus::Idle)
    }

    fn sum_by_partition(&self, status: CpuStatus) -> BTreeMap<String, ResourceDescriptor> {
        let mut totals: BTreeMap<String, (u32, u32)> = BTreeMap::new();
        for (partition, &cpus) in self.partition.iter().zip(self.cpus(status)) {
            let entry = totals.entry(partition.clone()).or_insert((0, 0));
            entry.0 += cpus;
            entry.1 += 1;
        }
        totals
            .into_iter()
            .map(|(p, (cpus, nodes))| {
                let res = ResourceDescriptor::new(p.clone(), cpus).with_nodes(Some(nodes));
                (p, res)
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const TWO_PARTITIONS: &str = "node01  partition  0.00  0/4/0/4  1:4:1  idle  8192  8000  0  (null)\n\
         node02  partition1  1.00  7/8/1/16  2:8:2  alloc  16384  16000  10  infiniband\n";

    #[test]
    fn test_parse_empty() {
        assert!(TopologyModel::parse("").unwrap().is_empty());
        assert_eq!(TopologyModel::parse("\n\n").unwrap(), TopologyModel::empty());
    }

    #[test]
    fn test_parse_two_lines() {
        let topo = TopologyModel::parse(TWO_PARTITIONS).unwrap();
        assert_eq!(topo.len(), 2);
        assert_eq!(topo.hosts(), &["node01", "node02"]);
        assert_eq!(topo.partitions(), &["partition", "partition1"]);
        assert_eq!(topo.allocated_cpus(), &[0, 7]);
        assert_eq!(topo.idle_cpus(), &[4, 8]);
        assert_eq!(topo.other_cpus(), &[0, 1]);
        assert_eq!(topo.total_cpus(), &[4, 16]);
        assert_eq!(topo.sockets_per_node(), &[1, 2]);
        assert_eq!(topo.cores_per_socket(), &[4, 8]);
        assert_eq!(topo.threads_per_core(), &[1, 2]);
        assert_eq!(topo.states(), &["idle", "alloc"]);
        assert_eq!(topo.memory(), &[8192, 16384]);
        assert_eq!(topo.free_memory(), &[8000, 16000]);
        assert_eq!(topo.allocated_memory(), &[0, 10]);
        assert_eq!(topo.features(), &["(null)", "infiniband"]);
        assert_eq!(topo.loads(), &[0.0, 1.0]);
    }

    #[test]
    fn test_parse_strips_default_partition_marker() {
        let topo =
            TopologyModel::parse("node01 batch* 0.00 0/4/0/4 1:4:1 idle 8192 8000 0 (null)").unwrap();
        assert_eq!(topo.partitions(), &["batch"]);
    }

    #[test]
    fn test_parse_non_numeric_defaults_to_zero() {
        let topo =
            TopologyModel::parse("node01 batch N/A 0/4/0/4 1:4:1 idle N/A 8000 0 (null)").unwrap();
        assert_eq!(topo.loads(), &[0.0]);
        assert_eq!(topo.memory(), &[0]);
    }

    #[test]
    fn test_parse_wrong_field_count() {
        let err = TopologyModel::parse("node01 batch 0.00 0/4/0/4\n").unwrap_err();
        assert!(matches!(err, SchedError::TopologyParse { line: 1, .. }));

        let err = TopologyModel::parse("\nnode01 batch 0.00 0/4/0/4 1:4:1 idle 1 1 0 x extra").unwrap_err();
        assert!(matches!(err, SchedError::TopologyParse { line: 2, .. }));
    }

    #[test]
    fn test_parse_malformed_cpu_field() {
        assert!(TopologyModel::parse("n1 p 0.00 0/4/4 1:4:1 idle 1 1 0 x").is_err());
        assert!(TopologyModel::parse("n1 p 0.00 0/4/0/4 1:4 idle 1 1 0 x").is_err());
        assert!(TopologyModel::parse("n1 p 0.00 1/4/0/4 1:4:1 idle 1 1 0 x").is_err());
    }

    #[test]
    fn test_filter_partition_preserves_order() {
        let text = "a p1 0 0/4/0/4 1:4:1 idle 1 1 0 x\n\
                    b p2 0 0/4/0/4 1:4:1 idle 1 1 0 x\n\
                    c p1 0 0/8/0/8 1:8:1 idle 1 1 0 x\n";
        let topo = TopologyModel::parse(text).unwrap();

        let p1 = topo.filter_partition(&["p1"]);
        assert_eq!(p1.hosts(), &["a", "c"]);
        assert_eq!(p1.filter_partition(&["p1"]), p1);

        assert!(topo.filter_partition(&["nope"]).is_empty());
        assert_eq!(topo.filter_partition(&["p1", "p2"]), topo);
        // the receiver is untouched
        assert_eq!(topo.len(), 3);
    }

    #[test]
    fn test_filter_idle_requires_all_cpus_idle() {
        let text = "a p 0 0/4/0/4 1:4:1 idle 1 1 0 x\n\
                    b p 0 0/3/1/4 1:4:1 idle 1 1 0 x\n\
                    c p 0 4/0/0/4 1:4:1 alloc 1 1 0 x\n\
                    d p 0 0/4/0/4 1:4:1 mixed 1 1 0 x\n\
                    e p 0 0/4/0/4 1:4:1 idle* 1 1 0 x\n";
        let topo = TopologyModel::parse(text).unwrap();
        let idle = topo.filter_idle();
        assert_eq!(idle.hosts(), &["a"]);
        assert_eq!(idle.filter_idle(), idle);
    }

    #[test]
    fn test_filter_cpus_and_memory() {
        let topo = TopologyModel::parse(TWO_PARTITIONS).unwrap();
        assert_eq!(topo.filter_cpus(5).hosts(), &["node02"]);
        assert_eq!(topo.filter_cpus(4).len(), 2);
        assert_eq!(topo.filter_memory(10000).hosts(), &["node02"]);
        // 8192 / 4 = 2048, 16384 / 16 = 1024
        assert_eq!(topo.filter_mem_per_cpu(2000).hosts(), &["node01"]);
        assert_eq!(topo.filter_mem_per_cpu(1024).len(), 2);
    }

    #[test]
    fn test_derived_metrics() {
        let topo = TopologyModel::parse(TWO_PARTITIONS).unwrap();
        assert_eq!(topo.mem_per_cpu(), vec![2048.0, 1024.0]);
        assert_eq!(topo.free_mem_per_idle_cpu(), vec![2000.0, 2000.0]);
    }

    #[test]
    fn test_cpu_count() {
        assert!(TopologyModel::empty().cpu_count().is_empty());

        let text = "node01 a 0 0/4/0/4 1:4:1 idle 1 1 0 x\n\
                    node01 b 0 0/4/0/4 1:4:1 idle 1 1 0 x\n\
                    node02 a 0 0/4/0/4 1:4:1 idle 1 1 0 x\n";
        let count = TopologyModel::parse(text).unwrap().cpu_count();
        assert_eq!(count.get("node01"), Some(&8));
        assert_eq!(count.get("node02"), Some(&4));
    }

    #[test]
    fn test_is_cpu_commensurate() {
        let text = "node01 p 0 0/4/0/4 1:4:1 idle 1 1 0 x\n\
                    node02 p 0 0/4/0/4 1:4:1 idle 1 1 0 x\n";
        let topo = TopologyModel::parse(text).unwrap();
        assert!(!topo.is_cpu_commensurate(5, CpuStatus::All));
        assert!(topo.is_cpu_commensurate(4, CpuStatus::All));
        assert!(topo.is_cpu_commensurate(8, CpuStatus::Idle));
        assert!(topo.is_cpu_commensurate(0, CpuStatus::All));
        // nothing allocated, nothing to be commensurate with
        assert!(!topo.is_cpu_commensurate(4, CpuStatus::Allocated));
    }

    #[test]
    fn test_maximal_resources() {
        let text = "a p1 0 0/4/0/4 1:4:1 idle 1 1 0 x\n\
                    b p1 0 4/0/0/4 1:4:1 alloc 1 1 0 x\n\
                    c p2 0 2/6/0/8 1:8:1 mixed 1 1 0 x\n";
        let topo = TopologyModel::parse(text).unwrap();

        let max = topo.maximal_resources();
        assert_eq!(max["p1"], ResourceDescriptor::new("p1", 8).with_nodes(Some(2)));
        assert_eq!(max["p2"], ResourceDescriptor::new("p2", 8).with_nodes(Some(1)));

        let idle = topo.maximal_idle_resources();
        assert_eq!(idle.len(), 1);
        assert_eq!(idle["p1"], ResourceDescriptor::new("p1", 4).with_nodes(Some(1)));
    }

    #[test]
    fn test_partition_names_are_unique_and_sorted() {
        let text = "a zeta 0 0/4/0/4 1:4:1 idle 1 1 0 x\n\
                    b alpha 0 0/4/0/4 1:4:1 idle 1 1 0 x\n\
                    c zeta 0 0/4/0/4 1:4:1 idle 1 1 0 x\n";
        let topo = TopologyModel::parse(text).unwrap();
        assert_eq!(topo.partition_names(), vec!["alpha", "zeta"]);
    }

    #[test]
    fn test_record_round_trip() {
        let topo = TopologyModel::parse(TWO_PARTITIONS).unwrap();
        let rebuilt = TopologyModel::from_records(topo.records());
        assert_eq!(rebuilt, topo);
        assert!(topo.record(2).is_none());
    }
}

//! Reading and rewriting the `#SBATCH` directive block of a batch script.
//!
//! The directive block is every line up to the first line that is neither
//! blank nor a comment. Like sbatch itself, `#SBATCH` lines after that point
//! are ignored.

use std::fs;
use std::path::{Path, PathBuf};

use tracing::debug;

use crate::error::{SchedError, SchedResult};
use crate::resource::{ResourceDescriptor, SubmitArg};
use crate::units::convert_to_megabytes;

/// Prefix marking a scheduler directive.
pub const DIRECTIVE_PREFIX: &str = "#SBATCH";

/// Options we read from or write to the directive block.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum DirectiveKey {
    Partition,
    Ntasks,
    Nodes,
    Mem,
    MemPerCpu,
}

impl DirectiveKey {
    fn from_option(name: &str) -> Option<Self> {
        match name {
            "--partition" | "-p" => Some(DirectiveKey::Partition),
            "--ntasks" | "-n" => Some(DirectiveKey::Ntasks),
            "--nodes" | "-N" => Some(DirectiveKey::Nodes),
            "--mem" => Some(DirectiveKey::Mem),
            "--mem-per-cpu" => Some(DirectiveKey::MemPerCpu),
            _ => None,
        }
    }

    fn for_arg(arg: &SubmitArg) -> Option<Self> {
        match arg {
            SubmitArg::Partition(_) => Some(DirectiveKey::Partition),
            SubmitArg::Ntasks(_) => Some(DirectiveKey::Ntasks),
            SubmitArg::Nodes(_) => Some(DirectiveKey::Nodes),
            SubmitArg::Mem(_) => Some(DirectiveKey::Mem),
            SubmitArg::Chdir(_) | SubmitArg::Parsable(_) => None,
        }
    }
}

/// What the batch script asks for.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResourceRequest {
    /// Acceptable partitions, in the order they were listed.
    pub partitions: Vec<String>,
    pub cpus: u32,
    pub nodes: Option<u32>,
    /// Total memory in MB.
    pub memory: Option<u64>,
    /// Memory per CPU in MB, if the script asked in those terms.
    pub mem_per_cpu: Option<u64>,
}

impl ResourceRequest {
    /// One requested resource per listed partition.
    pub fn resources(&self) -> Vec<ResourceDescriptor> {
        self.partitions
            .iter()
            .map(|p| {
                ResourceDescriptor::new(p.clone(), self.cpus)
                    .with_nodes(self.nodes)
                    .with_memory(self.memory)
            })
            .collect()
    }
}

/// Where the block ends and which option each directive line sets.
struct DirectiveBlock<'a> {
    lines: Vec<&'a str>,
    /// Index of the first body line, or `lines.len()` if there is none.
    end: usize,
}

impl<'a> DirectiveBlock<'a> {
    fn scan(script: &'a str) -> Self {
        let lines: Vec<&str> = script.split_inclusive('\n').collect();
        let end = lines
            .iter()
            .position(|line| {
                let trimmed = line.trim();
                !trimmed.is_empty() && !trimmed.starts_with('#')
            })
            .unwrap_or(lines.len());
        Self { lines, end }
    }

    fn directives(&self) -> impl Iterator<Item = (usize, DirectiveKey, &'a str)> + '_ {
        self.lines[..self.end]
            .iter()
            .enumerate()
            .filter_map(|(i, &line)| parse_directive(line).map(|(key, value)| (i, key, value)))
    }
}

/// Split an `#SBATCH` line into the option it sets and its value.
///
/// Accepts `--key=value`, `--key value` and `-k value`. A `#` preceded by
/// whitespace starts a trailing comment.
fn parse_directive(line: &str) -> Option<(DirectiveKey, &str)> {
    let body = line.trim().strip_prefix(DIRECTIVE_PREFIX)?;
    if !body.starts_with(char::is_whitespace) {
        return None;
    }
    let body = match body
        .char_indices()
        .find(|&(i, c)| c == '#' && body[..i].ends_with(char::is_whitespace))
    {
        Some((i, _)) => &body[..i],
        None => body,
    }
    .trim();

    let (name, value) = match body.split_once('=') {
        Some((name, value)) if !name.contains(char::is_whitespace) => (name, value),
        _ => body.split_once(char::is_whitespace).unwrap_or((body, "")),
    };
    let key = DirectiveKey::from_option(name.trim())?;
    Some((key, value.trim()))
}

fn parse_count(key: &str, value: &str) -> SchedResult<u32> {
    value
        .parse()
        .map_err(|_| SchedError::MalformedRequest(format!("invalid {key} value '{value}'")))
}

fn parse_memory(key: &str, value: &str) -> SchedResult<u64> {
    convert_to_megabytes(value)
        .map_err(|e| SchedError::MalformedRequest(format!("invalid {key} value '{value}': {e}")))
}

/// Extract the resource request from a script's directive block.
pub fn parse_directives(script: &str) -> SchedResult<ResourceRequest> {
    let mut partitions = None;
    let mut cpus = None;
    let mut nodes = None;
    let mut memory = None;
    let mut mem_per_cpu = None;

    let block = DirectiveBlock::scan(script);
    for (_, key, value) in block.directives() {
        match key {
            DirectiveKey::Partition => {
                let names: Vec<String> = value
                    .split(',')
                    .map(str::trim)
                    .filter(|p| !p.is_empty())
                    .map(String::from)
                    .collect();
                partitions = Some(names);
            }
            DirectiveKey::Ntasks => cpus = Some(parse_count("ntasks", value)?),
            DirectiveKey::Nodes => nodes = Some(parse_count("nodes", value)?),
            DirectiveKey::Mem => memory = Some(parse_memory("mem", value)?),
            DirectiveKey::MemPerCpu => mem_per_cpu = Some(parse_memory("mem-per-cpu", value)?),
        }
    }

    let partitions = partitions
        .filter(|p| !p.is_empty())
        .ok_or_else(|| SchedError::MalformedRequest("partition not specified".to_string()))?;
    let cpus = cpus.ok_or_else(|| SchedError::MalformedRequest("ntasks not specified".to_string()))?;
    if cpus == 0 {
        return Err(SchedError::MalformedRequest("ntasks must be at least 1".to_string()));
    }

    if let Some(per_cpu) = mem_per_cpu {
        let total = per_cpu
            .checked_mul(u64::from(cpus))
            .ok_or_else(|| SchedError::MalformedRequest("mem-per-cpu * ntasks overflows".to_string()))?;
        memory = Some(total);
    }

    let request = ResourceRequest {
        partitions,
        cpus,
        nodes,
        memory,
        mem_per_cpu,
    };
    debug!(?request, "parsed directive block");
    Ok(request)
}

/// Read a batch script and extract its resource request.
pub fn read_request(path: &Path) -> SchedResult<ResourceRequest> {
    let script = fs::read_to_string(path)?;
    parse_directives(&script)
}

/// Replace the directives for `args` in place.
///
/// Options that have no directive yet are appended at the end of the
/// directive block. Unset arguments leave the script untouched, and the
/// memory directive is only touched if `args` contains [`SubmitArg::Mem`].
pub fn rewrite_directives(script: &str, args: &[SubmitArg]) -> String {
    let block = DirectiveBlock::scan(script);
    let mut replaced: Vec<Option<String>> = vec![None; block.lines.len()];
    let mut written = vec![false; args.len()];

    for (line_idx, key, _) in block.directives() {
        let Some(arg_idx) = args.iter().position(|a| DirectiveKey::for_arg(a) == Some(key)) else {
            continue;
        };
        if let Some(token) = args[arg_idx].to_token() {
            replaced[line_idx] = Some(format!("{DIRECTIVE_PREFIX} {token}\n"));
            written[arg_idx] = true;
        }
    }

    let missing: String = args
        .iter()
        .zip(&written)
        .filter(|(arg, done)| !**done && DirectiveKey::for_arg(arg).is_some())
        .filter_map(|(arg, _)| arg.to_token())
        .map(|token| format!("{DIRECTIVE_PREFIX} {token}\n"))
        .collect();

    let mut out = String::with_capacity(script.len() + missing.len());
    for (i, line) in block.lines.iter().enumerate() {
        if i == block.end {
            out.push_str(&missing);
        }
        match &replaced[i] {
            Some(new_line) => out.push_str(new_line),
            None => out.push_str(line),
        }
    }
    if block.end == block.lines.len() {
        if !out.is_empty() && !out.ends_with('\n') {
            out.push('\n');
        }
        out.push_str(&missing);
    }
    out
}

/// Path of the rewritten copy of `script`: same directory, `prefix` + file name.
pub fn rewritten_path(script: &Path, prefix: &str) -> PathBuf {
    let name = script
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    script.with_file_name(format!("{prefix}{name}"))
}

/// Write a copy of `script` with its directives set to `resource`.
///
/// The script's memory directive is preserved.
pub fn write_rewritten(script: &Path, prefix: &str, resource: &ResourceDescriptor) -> SchedResult<PathBuf> {
    let original = fs::read_to_string(script)?;
    let rewritten = rewrite_directives(&original, &resource.to_submission_args(true));
    let out = rewritten_path(script, prefix);
    fs::write(&out, rewritten)?;
    debug!(path = %out.display(), %resource, "wrote rewritten script");
    Ok(out)
}

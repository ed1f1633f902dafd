//! Submit command implementation.
//!
//! Matches a batch script to an allocation and submits the rewritten copy.

use std::path::Path;

use anyhow::Result;
use console::style;
use tracing::debug;

use sutils_sched::{MatchingWorkflow, ProcessRunner, SlurmAdapter, SlurmConfig, WorkflowConfig};

use super::common::{ConsolePrompt, print_outcome};

/// Execute the submit command.
///
/// Finding no capacity is reported as a warning and is not an error.
#[allow(clippy::too_many_arguments)]
pub fn execute(
    script: &Path,
    first_match: bool,
    dry_run: bool,
    any_partition: bool,
    format: &str,
    sinfo: Option<&str>,
    sbatch: Option<&str>,
    prefix: Option<&str>,
) -> Result<()> {
    let json = format == "json";

    let mut slurm = SlurmConfig::default();
    if let Some(program) = sinfo {
        slurm.sinfo_command = program.to_string();
    }
    if let Some(program) = sbatch {
        slurm.sbatch_command = program.to_string();
    }

    let mut config = WorkflowConfig {
        first_match,
        dry_run,
        any_partition,
        ..WorkflowConfig::default()
    };
    if let Some(p) = prefix {
        config.prefix = p.to_string();
    }
    debug!(?slurm, ?config, "configured");

    if !json {
        println!(
            "{} Matching {} against the cluster",
            style("→").cyan().bold(),
            style(script.display()).green()
        );
    }

    let mut prompt = if json {
        ConsolePrompt::stderr()
    } else {
        ConsolePrompt::stdout()
    };
    let adapter = SlurmAdapter::new(slurm, ProcessRunner);
    let mut workflow = MatchingWorkflow::new(adapter, &mut prompt, config);

    let outcome = match workflow.run(script) {
        Ok(outcome) => outcome,
        Err(e) if e.is_no_capacity() => {
            eprintln!("{} {}", style("Warning:").yellow().bold(), e);
            return Ok(());
        }
        Err(e) => anyhow::bail!("{} failed: {e}", workflow.stage()),
    };

    if json {
        println!("{}", outcome.to_json()?);
    } else {
        print_outcome(&outcome);
    }

    Ok(())
}

//! asbatch Command-Line Interface
//!
//! Submits a batch script to the SLURM allocation that best fits its
//! `#SBATCH` request.
//!
//! ```text
//! $ asbatch relax.sh
//! → Matching relax.sh against the cluster
//! (1) partition:           short, CPUs:   24, nodes:  1, (pending)
//! (2) partition:            long, CPUs:   32, nodes:  2, (pending)
//! Select an option: 1
//! ✓ Selected short (24 CPUs, 1 nodes)
//! ✓ Job submitted: 4711
//! ```

#[global_allocator]
static GLOBAL: mimalloc::MiMalloc = mimalloc::MiMalloc;

use std::path::PathBuf;

use clap::Parser;
use console::style;
use tracing_subscriber::EnvFilter;

mod commands;

use commands::submit;

/// asbatch - submit a batch script to the best-fitting SLURM allocation
#[derive(Parser, Debug)]
#[command(name = "asbatch")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Batch script with an #SBATCH directive block
    script: PathBuf,

    /// Increase verbosity (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Take the first candidate instead of prompting
    #[arg(long)]
    first_match: bool,

    /// Write the rewritten script but do not submit it
    #[arg(long)]
    dry_run: bool,

    /// Also offer idle nodes on partitions the script did not ask for
    #[arg(long)]
    any_partition: bool,

    /// Output format (table, json)
    #[arg(long, default_value = "table", value_parser = ["table", "json"])]
    format: String,

    /// Program used to query nodes
    #[arg(long, env = "ASBATCH_SINFO")]
    sinfo: Option<String>,

    /// Program used to submit
    #[arg(long, env = "ASBATCH_SBATCH")]
    sbatch: Option<String>,

    /// File name prefix of the rewritten script
    #[arg(long, env = "ASBATCH_PREFIX")]
    prefix: Option<String>,
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Setup logging
    let filter = match cli.verbose {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::new(filter))
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let result = submit::execute(
        &cli.script,
        cli.first_match,
        cli.dry_run,
        cli.any_partition,
        &cli.format,
        cli.sinfo.as_deref(),
        cli.sbatch.as_deref(),
        cli.prefix.as_deref(),
    );

    // Handle errors
    if let Err(e) = result {
        eprintln!("{} {}", style("Error:").red().bold(), e);
        std::process::exit(1);
    }

    Ok(())
}

//! Parsers for SLURM command output.

use crate::error::{SchedError, SchedResult};

/// Parse sbatch output to extract the job ID.
///
/// Accepts the default format `"Submitted batch job 12345"` as well as the
/// `--parsable` format `"12345"` or `"12345;cluster"`.
pub fn parse_sbatch_output(output: &str) -> SchedResult<String> {
    let trimmed = output.trim();

    let candidate = match trimmed.strip_prefix("Submitted batch job ") {
        Some(rest) => rest.trim(),
        None => trimmed.split(';').next().unwrap_or_default(),
    };

    if !candidate.is_empty() && candidate.chars().all(|c| c.is_ascii_digit()) {
        return Ok(candidate.to_string());
    }

    Err(SchedError::SlurmCommandError {
        command: "sbatch".to_string(),
        message: format!("Unexpected output format: {}", trimmed),
    })
}

//! End-to-end tests of the `asbatch` binary.
//!
//! `sinfo` and `sbatch` are replaced by small shell scripts in a temporary
//! directory, passed in through `--sinfo` and `--sbatch`.

#![cfg(unix)]

use std::fs;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use std::process::{Command, Output, Stdio};

use tempfile::TempDir;

const CLUSTER: &str = "\
node01  short  0.00  0/16/0/16  2:8:1   idle   65536  60000  0      (null)
node02  short  8.00  24/0/0/24  2:12:1  alloc  98304  90000  98304  (null)
";

const SCRIPT: &str = "\
#!/bin/bash
#SBATCH --partition=short
#SBATCH --ntasks=16

srun ./relax
";

fn write_executable(dir: &Path, name: &str, body: &str) -> PathBuf {
    let path = dir.join(name);
    fs::write(&path, format!("#!/bin/sh\n{body}")).unwrap();
    fs::set_permissions(&path, fs::Permissions::from_mode(0o755)).unwrap();
    path
}

struct Fixture {
    dir: TempDir,
    sinfo: PathBuf,
    sbatch: PathBuf,
}

impl Fixture {
    fn new() -> Self {
        let dir = TempDir::new().unwrap();
        let sinfo = write_executable(dir.path(), "fake-sinfo", &format!("cat <<'EOF'\n{CLUSTER}EOF\n"));
        let sbatch = write_executable(dir.path(), "fake-sbatch", "echo 'Submitted batch job 4242'\n");
        Self { dir, sinfo, sbatch }
    }

    fn script(&self, name: &str, text: &str) -> PathBuf {
        let path = self.dir.path().join(name);
        fs::write(&path, text).unwrap();
        path
    }

    fn run(&self, args: &[&str]) -> Output {
        Command::new(env!("CARGO_BIN_EXE_asbatch"))
            .arg("--sinfo")
            .arg(&self.sinfo)
            .arg("--sbatch")
            .arg(&self.sbatch)
            .args(args)
            .env_remove("ASBATCH_PREFIX")
            .stdin(Stdio::null())
            .output()
            .unwrap()
    }
}

fn stdout(output: &Output) -> String {
    String::from_utf8_lossy(&output.stdout).into_owned()
}

fn stderr(output: &Output) -> String {
    String::from_utf8_lossy(&output.stderr).into_owned()
}

#[test]
fn test_exact_match_is_submitted() {
    let fx = Fixture::new();
    let script = fx.script("relax.sh", SCRIPT);

    let output = fx.run(&[script.to_str().unwrap()]);
    assert_eq!(output.status.code(), Some(0), "stderr: {}", stderr(&output));
    assert!(stdout(&output).contains("4242"));
    assert!(fx.dir.path().join("asbatch_relax.sh").exists());
}

#[test]
fn test_json_dry_run() {
    let fx = Fixture::new();
    let script = fx.script("relax.sh", SCRIPT);

    let output = fx.run(&["--dry-run", "--format", "json", script.to_str().unwrap()]);
    assert_eq!(output.status.code(), Some(0), "stderr: {}", stderr(&output));

    let outcome: serde_json::Value = serde_json::from_str(&stdout(&output)).unwrap();
    assert!(outcome["job_id"].is_null());
    assert_eq!(outcome["selected"]["partition"], "short");
    assert_eq!(outcome["selected"]["cpus"], 16);
    assert_eq!(outcome["auto_selected"], true);
}

#[test]
fn test_custom_prefix() {
    let fx = Fixture::new();
    let script = fx.script("relax.sh", SCRIPT);

    let output = fx.run(&["--dry-run", "--prefix", "matched_", script.to_str().unwrap()]);
    assert_eq!(output.status.code(), Some(0), "stderr: {}", stderr(&output));
    assert!(fx.dir.path().join("matched_relax.sh").exists());
}

#[test]
fn test_no_capacity_is_a_warning() {
    let fx = Fixture::new();
    let script = fx.script("huge.sh", "#SBATCH --partition=short\n#SBATCH --ntasks=500\nsrun ./huge\n");

    let output = fx.run(&[script.to_str().unwrap()]);
    assert_eq!(output.status.code(), Some(0));
    assert!(stderr(&output).contains("Warning:"));
    assert!(!fx.dir.path().join("asbatch_huge.sh").exists());
}

#[test]
fn test_malformed_script_fails() {
    let fx = Fixture::new();
    let script = fx.script("bad.sh", "#SBATCH --ntasks=4\nsrun ./bad\n");

    let output = fx.run(&[script.to_str().unwrap()]);
    assert_eq!(output.status.code(), Some(1));
    assert!(stderr(&output).contains("partition not specified"));
}

#[test]
fn test_missing_script_fails() {
    let fx = Fixture::new();
    let missing = fx.dir.path().join("missing.sh");

    let output = fx.run(&[missing.to_str().unwrap()]);
    assert_eq!(output.status.code(), Some(1));
    assert!(stderr(&output).contains("Error:"));
}

#[test]
fn test_sinfo_failure_fails() {
    let fx = Fixture::new();
    let broken = write_executable(fx.dir.path(), "broken-sinfo", "echo 'slurm_load_node: timeout' >&2\nexit 1\n");
    let script = fx.script("relax.sh", SCRIPT);

    let output = Command::new(env!("CARGO_BIN_EXE_asbatch"))
        .arg("--sinfo")
        .arg(&broken)
        .arg(script)
        .stdin(Stdio::null())
        .output()
        .unwrap();
    assert_eq!(output.status.code(), Some(1));
    assert!(stderr(&output).contains("slurm_load_node: timeout"));
}

#[test]
fn test_closed_stdin_aborts_selection() {
    let fx = Fixture::new();
    // 20 tasks: only a queued candidate exists, so the user is asked
    let script = fx.script("relax.sh", "#SBATCH --partition=short\n#SBATCH --ntasks=20\nsrun ./relax\n");

    let output = fx.run(&[script.to_str().unwrap()]);
    assert_eq!(output.status.code(), Some(1));
    assert!(stdout(&output).contains("(pending)"));
}

#[test]
fn test_usage_error() {
    let output = Command::new(env!("CARGO_BIN_EXE_asbatch")).output().unwrap();
    assert_eq!(output.status.code(), Some(2));
}

//! Execution of external scheduler commands.

use std::cell::RefCell;
use std::collections::{HashMap, VecDeque};
use std::process::{Command, Stdio};

use tracing::trace;

use crate::error::{SchedError, SchedResult};

/// Captured result of one external command.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandOutput {
    /// Whether the process exited with status zero.
    pub success: bool,
    pub stdout: String,
    pub stderr: String,
}

impl CommandOutput {
    /// A successful run printing `stdout`.
    pub fn ok(stdout: impl Into<String>) -> Self {
        Self {
            success: true,
            stdout: stdout.into(),
            stderr: String::new(),
        }
    }

    /// A failed run printing `stderr`.
    pub fn failed(stderr: impl Into<String>) -> Self {
        Self {
            success: false,
            stdout: String::new(),
            stderr: stderr.into(),
        }
    }
}

/// Runs a program to completion and captures its output.
pub trait CommandRunner {
    fn run(&self, program: &str, args: &[String]) -> SchedResult<CommandOutput>;
}

/// [`CommandRunner`] that spawns real processes.
#[derive(Debug, Default, Clone, Copy)]
pub struct ProcessRunner;

impl CommandRunner for ProcessRunner {
    fn run(&self, program: &str, args: &[String]) -> SchedResult<CommandOutput> {
        trace!(program, ?args, "spawning");
        let output = Command::new(program)
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .output()
            .map_err(|e| SchedError::SlurmCommandError {
                command: program.to_string(),
                message: e.to_string(),
            })?;

        Ok(CommandOutput {
            success: output.status.success(),
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        })
    }
}

/// [`CommandRunner`] that records invocations and replays canned output.
///
/// Responses are queued per program name. A program with no queued
/// response fails with an empty stderr.
#[derive(Debug, Default)]
pub struct RecordingRunner {
    responses: RefCell<HashMap<String, VecDeque<CommandOutput>>>,
    calls: RefCell<Vec<(String, Vec<String>)>>,
}

impl RecordingRunner {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue `output` as the next response for `program`.
    pub fn with_response(self, program: &str, output: CommandOutput) -> Self {
        self.responses
            .borrow_mut()
            .entry(program.to_string())
            .or_default()
            .push_back(output);
        self
    }

    /// Every invocation so far, in order.
    pub fn calls(&self) -> Vec<(String, Vec<String>)> {
        self.calls.borrow().clone()
    }

    /// Invocations of `program` only.
    pub fn calls_to(&self, program: &str) -> Vec<Vec<String>> {
        self.calls
            .borrow()
            .iter()
            .filter(|(p, _)| p == program)
            .map(|(_, args)| args.clone())
            .collect()
    }
}

impl CommandRunner for RecordingRunner {
    fn run(&self, program: &str, args: &[String]) -> SchedResult<CommandOutput> {
        self.calls
            .borrow_mut()
            .push((program.to_string(), args.to_vec()));
        let output = self
            .responses
            .borrow_mut()
            .get_mut(program)
            .and_then(VecDeque::pop_front)
            .unwrap_or_else(|| CommandOutput::failed(""));
        Ok(output)
    }
}

impl<R: CommandRunner + ?Sized> CommandRunner for &R {
    fn run(&self, program: &str, args: &[String]) -> SchedResult<CommandOutput> {
        (**self).run(program, args)
    }
}

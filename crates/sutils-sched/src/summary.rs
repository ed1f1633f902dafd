//! Candidate listing and interactive selection.

use std::collections::VecDeque;
use std::io;

use tracing::debug;

use crate::error::{SchedError, SchedResult};
use crate::resource::ResourceDescriptor;

/// Status tag for immediately available candidates.
pub const IDLE_TAG: &str = "idle";

/// Status tag for candidates that have to wait in the queue.
pub const PENDING_TAG: &str = "pending";

/// Line-oriented user interaction used by [`select`].
pub trait Prompt {
    /// Show one line of text. `line` carries its own newline.
    fn show(&mut self, line: &str);

    /// Ask `query` and return the raw answer, or `None` once input has ended.
    fn ask(&mut self, query: &str) -> io::Result<Option<String>>;

    /// Report a recoverable input error.
    fn error(&mut self, message: &str);
}

/// [`Prompt`] that replays fixed answers and records everything shown.
#[derive(Debug, Default)]
pub struct ScriptedPrompt {
    answers: VecDeque<String>,
    pub shown: Vec<String>,
    pub errors: Vec<String>,
}

impl ScriptedPrompt {
    pub fn new<S: Into<String>>(answers: impl IntoIterator<Item = S>) -> Self {
        Self {
            answers: answers.into_iter().map(Into::into).collect(),
            ..Default::default()
        }
    }
}

impl Prompt for ScriptedPrompt {
    fn show(&mut self, line: &str) {
        self.shown.push(line.to_string());
    }

    fn ask(&mut self, _query: &str) -> io::Result<Option<String>> {
        Ok(self.answers.pop_front())
    }

    fn error(&mut self, message: &str) {
        self.errors.push(message.to_string());
    }
}

/// Format one numbered line per candidate, idle candidates first.
///
/// ```text
/// (1) partition:           short, CPUs:   16, nodes:  1, (idle)
/// (2) partition:            long, CPUs:   24, nodes:  1, (pending)
/// ```
pub fn summarize(idle: &[ResourceDescriptor], queued: &[ResourceDescriptor]) -> Vec<String> {
    let total = idle.len() + queued.len();
    let width = ((total + 1) as f64).log10().ceil() as usize;

    idle.iter()
        .map(|res| (res, IDLE_TAG))
        .chain(queued.iter().map(|res| (res, PENDING_TAG)))
        .enumerate()
        .map(|(i, (res, status))| {
            let nodes = res.nodes().map_or_else(|| "-".to_string(), |n| n.to_string());
            format!(
                "({index:>width$}) partition: {partition:>15}, CPUs: {cpus:>4}, nodes: {nodes:>2}, ({status})\n",
                index = i + 1,
                partition = res.partition(),
                cpus = res.cpus(),
            )
        })
        .collect()
}

/// Show `lines` and ask for a 1-based index until a valid one is given.
///
/// Indices up to `idle.len()` pick from `idle`, the rest from `queued`.
/// Invalid answers are reported through [`Prompt::error`] and asked again.
pub fn select(
    lines: &[String],
    idle: &[ResourceDescriptor],
    queued: &[ResourceDescriptor],
    prompt: &mut dyn Prompt,
) -> SchedResult<ResourceDescriptor> {
    if lines.is_empty() {
        return Err(SchedError::NoCapacityAvailable(
            "nothing to select from".to_string(),
        ));
    }

    for line in lines {
        prompt.show(line);
    }

    let index = loop {
        let Some(answer) = prompt.ask("Select an option: ")? else {
            return Err(SchedError::SelectionAborted);
        };
        match parse_index(&answer, lines.len()) {
            Ok(index) => break index,
            Err(e) => {
                debug!(answer = answer.trim(), "rejected selection");
                prompt.error(&e.to_string());
            }
        }
    };

    let chosen = if index <= idle.len() {
        idle.get(index - 1)
    } else {
        queued.get(index - idle.len() - 1)
    };
    chosen.cloned().ok_or_else(|| {
        SchedError::InvalidSelection(format!("option {index} does not map to a candidate"))
    })
}

fn parse_index(answer: &str, len: usize) -> SchedResult<usize> {
    let invalid = || SchedError::InvalidSelection(format!("Please provide a number between 1 and {len}."));
    let index: usize = answer.trim().parse().map_err(|_| invalid())?;
    if (1..=len).contains(&index) {
        Ok(index)
    } else {
        Err(invalid())
    }
}

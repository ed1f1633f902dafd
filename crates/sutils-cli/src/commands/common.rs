//! Shared helpers for CLI commands.

use std::io::{self, BufRead};

use console::{Term, style};

use sutils_sched::{MatchOutcome, Prompt};

/// [`Prompt`] on a terminal, reading answers from stdin.
pub struct ConsolePrompt {
    term: Term,
}

impl ConsolePrompt {
    /// Prompt on stdout.
    pub fn stdout() -> Self {
        Self { term: Term::stdout() }
    }

    /// Prompt on stderr, keeping stdout free for machine-readable output.
    pub fn stderr() -> Self {
        Self { term: Term::stderr() }
    }
}

impl Prompt for ConsolePrompt {
    fn show(&mut self, line: &str) {
        let _ = self.term.write_str(line);
    }

    fn ask(&mut self, query: &str) -> io::Result<Option<String>> {
        self.term.write_str(&format!("{} ", style(query.trim_end()).bold()))?;
        self.term.flush()?;

        let mut answer = String::new();
        if io::stdin().lock().read_line(&mut answer)? == 0 {
            return Ok(None);
        }
        Ok(Some(answer))
    }

    fn error(&mut self, message: &str) {
        let _ = self
            .term
            .write_line(&format!("{} {}", style("✗").red().bold(), message));
    }
}

/// Print the result of a matching run in a human-readable form.
pub fn print_outcome(outcome: &MatchOutcome) {
    for requested in &outcome.requested {
        println!("  Requested: {}", style(requested).dim());
    }
    println!(
        "  Candidates: {} idle, {} queued",
        outcome.candidates.idle.len(),
        outcome.candidates.queued.len()
    );

    let how = if outcome.auto_selected { " (automatic)" } else { "" };
    println!(
        "{} Selected {}{}",
        style("✓").green().bold(),
        style(&outcome.selected).cyan(),
        how
    );
    println!("  Rewritten: {}", outcome.rewritten.display());

    match &outcome.job_id {
        Some(job_id) => println!(
            "{} Job submitted: {}",
            style("✓").green().bold(),
            style(job_id).cyan()
        ),
        None => println!("  Dry run, nothing submitted"),
    }
}

use std::io::{self, Stdout, Write};

use anyhow::{Context, Result};
use dialoguer::Confirm;
use dialoguer::theme::ColorfulTheme;
use similar::TextDiff;

/// Operator-facing review of pending page edits.
pub trait Reviewer {
    fn show_diff(&mut self, title: &str, old: &str, new: &str) -> Result<()>;
    /// Ask a yes/no question; an empty answer selects `default`.
    fn confirm(&mut self, question: &str, default: bool) -> Result<bool>;
}

/// Prints diffs to `output` and asks on the controlling terminal.
pub struct TerminalReviewer<W> {
    output: W,
    theme: ColorfulTheme,
}

impl TerminalReviewer<Stdout> {
    pub fn stdio() -> Self {
        Self::new(io::stdout())
    }
}

impl<W: Write> TerminalReviewer<W> {
    pub fn new(output: W) -> Self {
        Self {
            output,
            theme: ColorfulTheme::default(),
        }
    }
}

impl<W: Write> Reviewer for TerminalReviewer<W> {
    fn show_diff(&mut self, title: &str, old: &str, new: &str) -> Result<()> {
        write!(self.output, "{}", unified_diff(title, old, new))
            .and_then(|()| self.output.flush())
            .context("failed to write diff")
    }

    fn confirm(&mut self, question: &str, default: bool) -> Result<bool> {
        Confirm::with_theme(&self.theme)
            .with_prompt(question)
            .default(default)
            .interact()
            .with_context(|| format!("no answer to: {question}"))
    }
}

/// Unified line diff between the current and proposed text of `title`.
pub fn unified_diff(title: &str, old: &str, new: &str) -> String {
    let diff = TextDiff::from_lines(old, new);
    diff.unified_diff()
        .context_radius(3)
        .header(&format!("{title} (current)"), &format!("{title} (proposed)"))
        .to_string()
}

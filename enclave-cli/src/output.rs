//! Terminal rendering for operator commands.
//!
//! Status words are colored by [`Tone`]; everything else is plain text so
//! output stays readable when piped.

use std::fmt::Display;
use std::io::{self, Write};

use enclave_tenant::{RepairReport, TenantState};
use owo_colors::OwoColorize;

/// Width of the key column in [`field`].
const KEY_WIDTH: usize = 12;

/// How a status word should read at a glance.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Tone {
    /// Done and healthy.
    Good,
    /// In progress or needs attention.
    Pending,
    /// Failed.
    Bad,
    /// Informational.
    Quiet,
}

impl Tone {
    /// Color `text` for this tone.
    pub fn paint(self, text: &str) -> String {
        match self {
            Self::Good => text.green().to_string(),
            Self::Pending => text.yellow().to_string(),
            Self::Bad => text.red().to_string(),
            Self::Quiet => text.dimmed().to_string(),
        }
    }

    fn glyph(self) -> String {
        match self {
            Self::Good => "✔".green().bold().to_string(),
            Self::Pending => "⚠".yellow().bold().to_string(),
            Self::Bad => "✖".red().bold().to_string(),
            Self::Quiet => "ℹ".blue().bold().to_string(),
        }
    }
}

impl From<TenantState> for Tone {
    fn from(state: TenantState) -> Self {
        match state {
            TenantState::Ready => Self::Good,
            TenantState::Provisioning => Self::Pending,
            TenantState::Failed => Self::Bad,
            TenantState::Absent => Self::Quiet,
        }
    }
}

/// Colored label for a database's provisioning state.
///
/// `None` means the database carries no enclave marker.
pub fn state_badge(state: Option<TenantState>) -> String {
    match state {
        Some(state) => Tone::from(state).paint(state.as_str()),
        None => Tone::Bad.paint("unmarked"),
    }
}

/// One-line result of a repair, and whether it failed.
pub fn repair_outcome(report: &RepairReport) -> (String, bool) {
    match &report.result {
        Ok(result) if result.is_success() => (Tone::Good.paint(&result.summary()), false),
        Ok(result) => (Tone::Bad.paint(&result.summary()), true),
        Err(e) => (Tone::Bad.paint(&e.to_string()), true),
    }
}

/// Print the command title with a rule beneath it.
pub fn title(text: &str) {
    let rule = "─".repeat(text.chars().count() + 2);
    println!("\n {}\n{}\n", text.bold().cyan(), rule.dimmed());
}

/// Print a subheading inside a command's output.
pub fn subheading(text: &str) {
    println!("{}", text.bold());
}

/// Print an aligned `key value` line.
pub fn field(key: &str, value: impl Display) {
    let key = format!("{key:<width$}", width = KEY_WIDTH);
    println!("  {} {}", key.dimmed(), value);
}

/// Print a status line prefixed with the tone's glyph.
pub fn note(tone: Tone, text: &str) {
    let text = match tone {
        Tone::Quiet => text.to_string(),
        _ => tone.paint(text),
    };
    println!("{} {}", tone.glyph(), text);
}

/// Print an error to stderr.
pub fn failure(err: impl Display) {
    eprintln!("\n{} {}", Tone::Bad.glyph(), Tone::Bad.paint(&err.to_string()));
}

/// Print an indented list entry.
pub fn bullet(text: &str) {
    println!("  {} {}", "•".dimmed(), text);
}

/// Print an entry of a numbered sequence, e.g. `[3/12] agency_acme ...`.
pub fn progress(current: usize, total: usize, text: &str) {
    let counter = format!("[{current:>width$}/{total}]", width = total.to_string().len());
    println!("{} {}", counter.dimmed(), text);
}

/// Print an empty line.
pub fn blank() {
    println!();
}

/// Ask before dropping `database`. Anything but `y` or `yes` declines.
pub fn confirm_drop(database: &str) -> bool {
    print!(
        "{} {} ",
        format!("Drop database {}?", database.bold()),
        "[y/N]".dimmed()
    );
    if io::stdout().flush().is_err() {
        return false;
    }

    let mut answer = String::new();
    match io::stdin().read_line(&mut answer) {
        Ok(_) => is_yes(&answer),
        Err(_) => false,
    }
}

fn is_yes(answer: &str) -> bool {
    matches!(answer.trim().to_ascii_lowercase().as_str(), "y" | "yes")
}

#[cfg(test)]
mod tests {
    use super::*;
    use enclave_schema::ApplyResult;
    use enclave_tenant::TenantError;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_state_badge_colors_by_state() {
        assert_eq!(state_badge(Some(TenantState::Ready)), "ready".green().to_string());
        assert_eq!(
            state_badge(Some(TenantState::Provisioning)),
            "provisioning".yellow().to_string()
        );
        assert_eq!(state_badge(Some(TenantState::Failed)), "failed".red().to_string());
        assert_eq!(state_badge(None), "unmarked".red().to_string());
        assert_eq!(Tone::from(TenantState::Absent), Tone::Quiet);
    }

    #[test]
    fn test_repair_outcome_flags_failures() {
        let healthy = RepairReport {
            database: "agency_acme".into(),
            result: Ok(ApplyResult::default()),
        };
        let (_, failed) = repair_outcome(&healthy);
        assert!(!failed);

        let unreachable = RepairReport {
            database: "agency_globex".into(),
            result: Err(TenantError::connection("connection refused")),
        };
        let (line, failed) = repair_outcome(&unreachable);
        assert!(failed);
        assert!(line.contains("connection refused"));
    }

    #[test]
    fn test_confirmation_answers() {
        assert!(is_yes("y\n"));
        assert!(is_yes(" YES "));
        assert!(!is_yes("\n"));
        assert!(!is_yes("yep"));
    }
}

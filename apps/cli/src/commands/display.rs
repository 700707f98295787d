//! Formatting helpers shared by the command implementations.

use chrono::{DateTime, Local, Utc};
use colored::{ColoredString, Colorize};
use comfy_table::{presets::UTF8_FULL_CONDENSED, Cell, Color, ContentArrangement, Table};
use refinery_training::RunStatus;

/// Status label colored by outcome.
pub fn status_label(status: RunStatus) -> ColoredString {
    match status {
        RunStatus::Pending => status.as_str().yellow(),
        RunStatus::Running => status.as_str().cyan(),
        RunStatus::Completed => status.as_str().green(),
        RunStatus::Failed => status.as_str().red(),
        RunStatus::Stopped => status.as_str().dimmed(),
    }
}

/// Table cell for a status, colored like [`status_label`].
pub fn status_cell(status: RunStatus) -> Cell {
    let color = match status {
        RunStatus::Pending => Color::Yellow,
        RunStatus::Running => Color::Cyan,
        RunStatus::Completed => Color::Green,
        RunStatus::Failed => Color::Red,
        RunStatus::Stopped => Color::DarkGrey,
    };
    Cell::new(status.as_str()).fg(color)
}

pub fn table(headers: &[&str]) -> Table {
    let mut table = Table::new();
    table
        .load_preset(UTF8_FULL_CONDENSED)
        .set_content_arrangement(ContentArrangement::Dynamic)
        .set_header(headers.iter().map(|h| Cell::new(h).fg(Color::Cyan)));
    table
}

/// Formats a fraction in `[0, 1]` as a percentage.
pub fn percent(fraction: f64) -> String {
    format!("{:.1}%", fraction * 100.0)
}

/// Formats an accuracy delta in percentage points with an explicit sign.
pub fn points(delta: f64) -> String {
    format!("{:+.1} pts", delta * 100.0)
}

pub fn timestamp(at: Option<DateTime<Utc>>) -> String {
    at.map_or_else(|| "-".to_string(), |t| t.with_timezone(&Local).format("%Y-%m-%d %H:%M:%S").to_string())
}

/// Prints a `label: value` detail line.
pub fn field(label: &str, value: impl std::fmt::Display) {
    println!("  {:<14} {}", format!("{label}:").bold(), value);
}

pub fn heading(title: &str) {
    println!();
    println!("{}", title.bold().cyan());
    println!();
}

//! Output formatting for CLI
//!
//! Provides consistent output formatting across all commands:
//! - Human-readable default output
//! - JSON output (--json flag)
//! - Quiet mode for scripting (--quiet flag)

use chrono::{DateTime, Utc};
use kiosk_sync_core::{ChannelMessage, DrainReport, StopReason};

/// Output format options
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputFormat {
    /// Human-readable output (default)
    Human,
    /// JSON output
    Json,
    /// Quiet mode - minimal output
    Quiet,
}

impl OutputFormat {
    /// Create format from CLI flags
    pub fn from_flags(json: bool, quiet: bool) -> Self {
        if quiet {
            OutputFormat::Quiet
        } else if json {
            OutputFormat::Json
        } else {
            OutputFormat::Human
        }
    }
}

/// Output helper for consistent formatting
#[derive(Debug, Clone, Copy)]
pub struct Output {
    /// The output format
    pub format: OutputFormat,
}

impl Output {
    pub fn new(format: OutputFormat) -> Self {
        Self { format }
    }

    /// Print the result of a drain pass
    pub fn print_report(&self, report: &DrainReport) {
        match self.format {
            OutputFormat::Human => {
                let outcome = match report.stop {
                    StopReason::Drained => "queue drained",
                    StopReason::Offline => "stopped: backend unreachable",
                    StopReason::FailureLimit => "stopped: too many consecutive failures",
                    StopReason::Rejected => "stopped: operation rejected by the backend",
                    StopReason::AlreadyRunning => "skipped: a drain is already running",
                };
                println!(
                    "Synced {} operation(s), {} remaining ({})",
                    report.synced, report.remaining, outcome
                );
            }
            OutputFormat::Json => {
                println!("{}", to_json(report));
            }
            OutputFormat::Quiet => {
                println!("{}", report.remaining);
            }
        }
    }

    /// Print an inbound push message
    pub fn print_message(&self, message: &ChannelMessage) {
        match self.format {
            OutputFormat::Human => {
                println!(
                    "[{}] {:<20} {}",
                    Utc::now().format("%H:%M:%S"),
                    message.kind,
                    truncate(&message.data.to_string(), 80)
                );
            }
            OutputFormat::Json => {
                println!("{}", message.encode());
            }
            OutputFormat::Quiet => {
                println!("{}", message.kind);
            }
        }
    }

    /// Print a success message
    pub fn success(&self, message: &str) {
        match self.format {
            OutputFormat::Human => println!("✓ {}", message),
            OutputFormat::Json => {
                println!(
                    "{}",
                    serde_json::json!({"status": "success", "message": message})
                );
            }
            OutputFormat::Quiet => {}
        }
    }

    /// Print an informational message
    pub fn message(&self, msg: &str) {
        match self.format {
            OutputFormat::Human => println!("{}", msg),
            OutputFormat::Json => {
                println!("{}", serde_json::json!({"message": msg}));
            }
            OutputFormat::Quiet => {}
        }
    }
}

pub fn to_json<T: serde::Serialize>(value: &T) -> String {
    serde_json::to_string_pretty(value).unwrap_or_else(|e| format!("{{\"error\": \"{}\"}}", e))
}

/// Compact age such as `45s`, `12m`, `3h` or `2d`
pub fn age(since: DateTime<Utc>, now: DateTime<Utc>) -> String {
    let secs = (now - since).num_seconds().max(0);
    match secs {
        s if s < 60 => format!("{}s", s),
        s if s < 3600 => format!("{}m", s / 60),
        s if s < 86_400 => format!("{}h", s / 3600),
        s => format!("{}d", s / 86_400),
    }
}

/// Truncate a string to max length, adding "..." if truncated
fn truncate(s: &str, max_len: usize) -> String {
    if s.chars().count() <= max_len {
        s.to_string()
    } else {
        let kept: String = s.chars().take(max_len.saturating_sub(3)).collect();
        format!("{}...", kept)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_from_flags() {
        assert_eq!(OutputFormat::from_flags(false, false), OutputFormat::Human);
        assert_eq!(OutputFormat::from_flags(true, false), OutputFormat::Json);
        assert_eq!(OutputFormat::from_flags(false, true), OutputFormat::Quiet);
        // Quiet takes precedence
        assert_eq!(OutputFormat::from_flags(true, true), OutputFormat::Quiet);
    }

    #[test]
    fn test_truncate() {
        assert_eq!(truncate("short", 10), "short");
        assert_eq!(truncate("this is a long string", 10), "this is...");
        assert_eq!(truncate("crème brûlée x2", 8), "crème...");
    }

    #[test]
    fn test_age() {
        let now = Utc::now();
        assert_eq!(age(now - chrono::Duration::seconds(45), now), "45s");
        assert_eq!(age(now - chrono::Duration::minutes(12), now), "12m");
        assert_eq!(age(now - chrono::Duration::hours(3), now), "3h");
        assert_eq!(age(now - chrono::Duration::days(2), now), "2d");
        assert_eq!(age(now + chrono::Duration::seconds(5), now), "0s");
    }
}

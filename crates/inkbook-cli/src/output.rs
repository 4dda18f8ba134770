//! Output formatting for CLI
//!
//! Provides consistent output formatting across all commands:
//! - Human-readable default output
//! - JSON output (--json flag)
//! - Quiet mode for scripting (--quiet flag)

use anyhow::Result;
use chrono::{DateTime, Utc};
use serde::Serialize;

use inkbook_core::{Snapshot, VaultError};

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
pub struct Output {
    /// The output format
    pub format: OutputFormat,
}

impl Output {
    pub fn new(format: OutputFormat) -> Self {
        Self { format }
    }

    /// Pretty-print any serializable result
    pub fn json<T: Serialize + ?Sized>(&self, value: &T) -> Result<()> {
        println!("{}", serde_json::to_string_pretty(value)?);
        Ok(())
    }

    /// Print a single snapshot
    pub fn print_snapshot(&self, snapshot: &Snapshot) -> Result<()> {
        match self.format {
            OutputFormat::Human => {
                println!("ID:       {}", snapshot.id);
                println!("File:     {}", snapshot.path.display());
                println!(
                    "Created:  {}",
                    snapshot.created_at.format("%Y-%m-%d %H:%M:%S UTC")
                );
                println!("Size:     {}", format_size(snapshot.size_bytes));
                println!("Checksum: {}", snapshot.checksum);
            }
            OutputFormat::Json => self.json(snapshot)?,
            OutputFormat::Quiet => println!("{}", snapshot.id),
        }
        Ok(())
    }

    /// Print a list of snapshots, newest first
    pub fn print_snapshots(&self, snapshots: &[Snapshot]) -> Result<()> {
        match self.format {
            OutputFormat::Human => {
                if snapshots.is_empty() {
                    println!("No snapshots found.");
                    return Ok(());
                }
                let now = Utc::now();
                for snapshot in snapshots {
                    println!(
                        "{} | {:>9} | {} ago | {}",
                        snapshot.id,
                        format_size(snapshot.size_bytes),
                        format_age(snapshot.created_at, now),
                        truncate(&snapshot.checksum, 15)
                    );
                }
                println!("\n{} snapshot(s)", snapshots.len());
            }
            OutputFormat::Json => self.json(snapshots)?,
            OutputFormat::Quiet => {
                for snapshot in snapshots {
                    println!("{}", snapshot.id);
                }
            }
        }
        Ok(())
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

    /// Print a warning to stderr
    pub fn warning(&self, message: &str) {
        match self.format {
            OutputFormat::Human => eprintln!("⚠ {}", message),
            OutputFormat::Json => {
                eprintln!(
                    "{}",
                    serde_json::json!({"status": "warning", "message": message})
                );
            }
            OutputFormat::Quiet => {}
        }
    }

    /// Print a failed command; JSON errors carry the failure `kind`
    pub fn error(&self, err: &anyhow::Error) {
        let vault_error = err.downcast_ref::<VaultError>();
        match self.format {
            OutputFormat::Json => {
                let kind = vault_error.map(|e| e.kind().as_str()).unwrap_or("other");
                println!(
                    "{}",
                    serde_json::json!({
                        "status": "error",
                        "kind": kind,
                        "message": format!("{:#}", err)
                    })
                );
            }
            OutputFormat::Human | OutputFormat::Quiet => {
                eprintln!("✗ {:#}", err);
                if let Some(hint) = vault_error.and_then(VaultError::recovery_suggestion) {
                    eprintln!("  {}", hint);
                }
            }
        }
    }

    /// Check if we should prompt for confirmation
    pub fn should_prompt(&self) -> bool {
        self.format == OutputFormat::Human
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

/// Human-readable byte count
pub fn format_size(bytes: u64) -> String {
    const KB: u64 = 1024;
    const MB: u64 = KB * 1024;
    const GB: u64 = MB * 1024;

    if bytes >= GB {
        format!("{:.1} GB", bytes as f64 / GB as f64)
    } else if bytes >= MB {
        format!("{:.1} MB", bytes as f64 / MB as f64)
    } else if bytes >= KB {
        format!("{:.1} KB", bytes as f64 / KB as f64)
    } else {
        format!("{} B", bytes)
    }
}

/// Coarse age such as "3d", "5h" or "12m"
pub fn format_age(created_at: DateTime<Utc>, now: DateTime<Utc>) -> String {
    let age = now.signed_duration_since(created_at);
    if age.num_days() > 0 {
        format!("{}d", age.num_days())
    } else if age.num_hours() > 0 {
        format!("{}h", age.num_hours())
    } else if age.num_minutes() > 0 {
        format!("{}m", age.num_minutes())
    } else {
        format!("{}s", age.num_seconds().max(0))
    }
}

/// Truncate a string to max length, adding "..." if truncated
pub fn truncate(s: &str, max_len: usize) -> String {
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
    use chrono::Duration;

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
    }

    #[test]
    fn test_format_size() {
        assert_eq!(format_size(512), "512 B");
        assert_eq!(format_size(2048), "2.0 KB");
        assert_eq!(format_size(5 * 1024 * 1024), "5.0 MB");
        assert_eq!(format_size(3 * 1024 * 1024 * 1024), "3.0 GB");
    }

    #[test]
    fn test_format_age() {
        let now = Utc::now();
        assert_eq!(format_age(now - Duration::days(3), now), "3d");
        assert_eq!(format_age(now - Duration::hours(5), now), "5h");
        assert_eq!(format_age(now - Duration::minutes(12), now), "12m");
        assert_eq!(format_age(now + Duration::seconds(5), now), "0s");
    }
}

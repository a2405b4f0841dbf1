//! Append-only activity log.
//!
//! One line per operation: `<RFC 3339 UTC> <operation> key=value ...`.
//! The log is an audit trail only; nothing reads it back.

use anyhow::{Context, Result};
use chrono::{DateTime, SecondsFormat, Utc};
use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use tracing::warn;

/// Activity log writer.
#[derive(Debug, Clone)]
pub struct ActivityLog {
    path: PathBuf,
}

impl ActivityLog {
    pub fn new<P: AsRef<Path>>(path: P) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Append an entry. Failures are logged as warnings and otherwise ignored.
    pub fn record(&self, operation: &str, fields: &[(&str, String)]) {
        if let Err(e) = self.append(&format_entry(Utc::now(), operation, fields)) {
            warn!("Failed to write activity log {:?}: {:#}", self.path, e);
        }
    }

    fn append(&self, line: &str) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create {:?}", parent))?;
        }
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .with_context(|| format!("Failed to open {:?}", self.path))?;
        writeln!(file, "{}", line)?;
        Ok(())
    }
}

/// Render one log line.
pub fn format_entry(timestamp: DateTime<Utc>, operation: &str, fields: &[(&str, String)]) -> String {
    let mut line = format!(
        "{} {}",
        timestamp.to_rfc3339_opts(SecondsFormat::Secs, true),
        operation
    );
    for (key, value) in fields {
        if value.is_empty() || value.contains(|c: char| c.is_whitespace() || c == '"') {
            line.push_str(&format!(" {}={:?}", key, value));
        } else {
            line.push_str(&format!(" {}={}", key, value));
        }
    }
    line
}

use std::fmt::Write as _;
use std::path::{Path, PathBuf};

use anyhow::Context;
use chrono::{DateTime, FixedOffset};
use radar_core::{Assessment, Listing};
use tokio::fs;
use tokio::io::AsyncWriteExt;

pub const LEDGER_HEADER: &str =
    "# Job Radar Matches\n\nAccepted listings, appended as they are found. Entries are never rewritten.\n\n";

/// One accepted listing as written to the ledger.
#[derive(Debug, Clone, Copy)]
pub struct LedgerEntry<'a> {
    pub recorded_at: DateTime<FixedOffset>,
    pub listing: &'a Listing,
    pub assessment: &'a Assessment,
}

impl LedgerEntry<'_> {
    pub fn render(&self) -> String {
        let listing = self.listing;
        let mut out = String::new();
        let _ = writeln!(out, "## {} | {}", listing.company, listing.title);
        out.push('\n');
        let _ = writeln!(out, "- recorded: {}", self.recorded_at.format("%Y-%m-%d %H:%M:%S %:z"));
        let _ = writeln!(out, "- score: {}", self.assessment.score);
        let _ = writeln!(out, "- location: {}", listing.location);
        let _ = writeln!(out, "- source: {}", listing.source);
        let _ = writeln!(out, "- link: {}", listing.url);
        if self.assessment.rationale.trim().is_empty() {
            out.push_str("- rationale: (none)\n");
        } else {
            out.push_str("- rationale:\n\n");
            for line in self.assessment.rationale.lines() {
                let _ = writeln!(out, "> {line}");
            }
        }
        out.push('\n');
        out
    }
}

/// Append-only, human-readable record of accepted listings.
///
/// Duplicate suppression happens upstream through the `saved` set.
#[derive(Debug, Clone)]
pub struct Ledger {
    path: PathBuf,
}

impl Ledger {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub async fn append(&self, entry: &LedgerEntry<'_>) -> anyhow::Result<()> {
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)
                .await
                .with_context(|| format!("creating ledger directory {}", parent.display()))?;
        }

        let mut file = fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .await
            .with_context(|| format!("opening ledger {}", self.path.display()))?;
        let existing = file
            .metadata()
            .await
            .with_context(|| format!("inspecting ledger {}", self.path.display()))?
            .len();

        let mut chunk = String::new();
        if existing == 0 {
            chunk.push_str(LEDGER_HEADER);
        }
        chunk.push_str(&entry.render());

        file.write_all(chunk.as_bytes())
            .await
            .with_context(|| format!("appending to ledger {}", self.path.display()))?;
        file.flush()
            .await
            .with_context(|| format!("flushing ledger {}", self.path.display()))?;
        Ok(())
    }
}

use anyhow::Result;
use std::collections::HashSet;

use crate::config::Config;
use crate::index;
use crate::ledger::{Ledger, LedgerSnapshot};
use crate::models::RecordingId;
use crate::naming::normalize;

/// One line of the status table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatusRow {
    pub recording: RecordingId,
    pub archived: bool,
    pub destination: String,
}

/// Rows in listing order. An id listed more than once appears once, as it
/// is only archived once.
pub fn status_rows(recordings: &[RecordingId], snapshot: &LedgerSnapshot) -> Vec<StatusRow> {
    let mut seen = HashSet::new();
    recordings
        .iter()
        .filter(|id| seen.insert(*id))
        .map(|id| StatusRow {
            recording: id.clone(),
            archived: snapshot.has(id),
            destination: destination(id),
        })
        .collect()
}

/// `pvr-archive status`: one row per listed recording.
pub fn list_status(config: &Config) -> Result<()> {
    let ledger = Ledger::open(&config.ledger.path)?;
    let recordings = index::load_index(&config.index.path)?;
    let rows = status_rows(&recordings, &ledger.snapshot());

    println!("{:<8} {:<48} DESTINATION", "STATE", "RECORDING");
    let mut pending = 0usize;
    for row in &rows {
        let state = if row.archived {
            "DONE"
        } else {
            pending += 1;
            "PENDING"
        };
        println!("{:<8} {:<48} {}", state, row.recording, row.destination);
    }
    println!();
    println!(
        "{} recordings, {} archived, {} pending",
        rows.len(),
        rows.len() - pending,
        pending
    );

    Ok(())
}

fn destination(id: &RecordingId) -> String {
    match normalize(id) {
        Ok(name) if name.subdirectory.is_empty() => name.filename,
        Ok(name) => format!("{}/{}", name.subdirectory, name.filename),
        Err(e) => format!("INVALID ({})", e),
    }
}

/// `pvr-archive name <id>`
pub fn print_name(id: &str) -> Result<()> {
    let name = normalize(&RecordingId::from(id))?;
    println!("subdirectory: {}", name.subdirectory);
    println!("filename: {}", name.filename);
    Ok(())
}

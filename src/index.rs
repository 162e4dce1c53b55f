//! Recording index parsing.
//!
//! Two listings are understood:
//!
//! - the retrieval tool's listing, where each recording appears on a line
//!   containing `Index name: <id>` (everything else is ignored), and
//! - the device's own `index.txt`, one `name|fullPath` pair per line.

use std::path::Path;

use crate::error::{ArchiveError, Result};
use crate::models::{IndexEntry, RecordingId};

const INDEX_NAME_MARKER: &str = "Index name: ";

/// Extract recording identifiers, in listing order.
pub fn parse_index(listing: &str) -> Vec<RecordingId> {
    listing
        .lines()
        .filter_map(|line| {
            let at = line.find(INDEX_NAME_MARKER)?;
            Some(RecordingId::new(&line[at + INDEX_NAME_MARKER.len()..]))
        })
        .collect()
}

/// Read and parse the listing at `path`.
///
/// The listing is tool output and may carry non-UTF-8 bytes (Latin-1
/// titles); those are replaced rather than failing the load.
pub fn load_index(path: &Path) -> Result<Vec<RecordingId>> {
    let raw = std::fs::read(path).map_err(|e| {
        ArchiveError::Config(format!("cannot read index {}: {}", path.display(), e))
    })?;
    let ids = parse_index(&String::from_utf8_lossy(&raw));
    tracing::debug!(path = %path.display(), recordings = ids.len(), "index loaded");
    Ok(ids)
}

/// Parse the device `index.txt`. Lines that are not exactly one
/// `name|fullPath` pair are logged and skipped.
pub fn parse_device_index(listing: &str) -> Vec<IndexEntry> {
    let mut entries = Vec::new();
    for line in listing.lines() {
        if line.is_empty() {
            continue;
        }
        let chunks: Vec<&str> = line.split('|').collect();
        match chunks.as_slice() {
            [name, full_path] => entries.push(IndexEntry {
                name: name.to_string(),
                full_path: full_path.to_string(),
            }),
            _ => tracing::warn!(line, "bad index line"),
        }
    }
    entries
}

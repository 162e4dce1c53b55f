//! Destination naming for archived recordings.
//!
//! The device names recordings `recordings/<dirs>/<title> <Mon.D.YYYY_H.M>`.
//! Archived files are renamed to `YYYY-MM-DD_HH:MM_<title>.mp4` so a plain
//! lexical directory listing is also chronological.

use chrono::NaiveDateTime;

use crate::error::{ArchiveError, Result};
use crate::models::{RecordingId, TrackName};

/// Literal prefix every recording identifier carries.
pub const RECORDING_PREFIX: &str = "recordings/";

/// Layout of the date token, e.g. `Jan.2.2006_15.4`.
const DATE_TOKEN_FORMAT: &str = "%b.%d.%Y_%H.%M";

/// Derive the archive subdirectory and filename for a recording.
///
/// Fails with [`ArchiveError::Format`] when the identifier lacks the
/// `recordings/` prefix, the leaf has no space separating title and date,
/// or the date token does not parse.
pub fn normalize(id: &RecordingId) -> Result<TrackName> {
    let rest = id
        .as_str()
        .strip_prefix(RECORDING_PREFIX)
        .ok_or_else(|| ArchiveError::format(format!("bad track {:?}", id.as_str())))?;

    let (subdirectory, leaf) = match rest.rsplit_once('/') {
        Some((dir, leaf)) => (dir, leaf),
        None => ("", rest),
    };

    let (title, date_token) = leaf
        .rsplit_once(' ')
        .ok_or_else(|| ArchiveError::format(format!("no space in {:?}", leaf)))?;

    let recorded = parse_date_token(date_token)?;

    Ok(TrackName {
        subdirectory: subdirectory.to_string(),
        filename: canonical_filename(title, recorded),
    })
}

/// Parse a device date token such as `Jan.5.2021_08.30`.
pub fn parse_date_token(token: &str) -> Result<NaiveDateTime> {
    // chrono accepts signed and over-long years for %Y
    let year_is_four_digits = token
        .split('_')
        .next()
        .and_then(|date| date.rsplit('.').next())
        .map(|year| year.len() == 4 && year.bytes().all(|b| b.is_ascii_digit()))
        .unwrap_or(false);
    if !year_is_four_digits {
        return Err(ArchiveError::format(format!(
            "date token {:?} does not match Mon.D.YYYY_H.M",
            token
        )));
    }

    NaiveDateTime::parse_from_str(token, DATE_TOKEN_FORMAT)
        .map_err(|e| ArchiveError::format(format!("{} parsing {:?}", e, token)))
}

/// `YYYY-MM-DD_HH:MM_<title>.mp4`
pub fn canonical_filename(title: &str, recorded: NaiveDateTime) -> String {
    format!("{}{}.mp4", recorded.format("%Y-%m-%d_%H:%M_"), title)
}

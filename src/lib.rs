//! # PVR Archive
//!
//! Copies recordings off a networked personal video recorder, renames them
//! from the device's `Title Mon.D.YYYY_H.M` form into chronologically
//! sortable names, transcodes them to MP4, and remembers what has been done
//! in an append-only ledger so that every run picks up where the last one
//! stopped.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────┐   ┌──────────────────┐   ┌──────────────────┐   ┌────────┐
//! │  Index   │──▶│ Producer         │──▶│ Consumer         │──▶│ Ledger │
//! │ all.txt  │   │ ledger check     │ 1 │ transcode        │   │ db.txt │
//! └──────────┘   │ retrieve + stage │   │ cleanup + commit │   └────────┘
//!                └──────────────────┘   └──────────────────┘
//! ```
//!
//! Retrieval and transcoding are done by external programs
//! (`getWizPnP.pl` and `HandBrakeCLI` by default).
//!
//! ## Quick Start
//!
//! ```bash
//! pvr-archive status            # what is archived, what is pending
//! pvr-archive run --dry-run     # show destinations without transferring
//! pvr-archive run               # archive everything pending
//! pvr-archive header header.tvwiz
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration parsing |
//! | [`models`] | Core data types |
//! | [`error`] | Error kinds |
//! | [`index`] | Recording index parsing |
//! | [`naming`] | Destination names from recording identifiers |
//! | [`ledger`] | Durable record of archived recordings |
//! | [`header`] | Binary recording header decoder |
//! | [`collaborators`] | Retrieval and transcode programs |
//! | [`pipeline`] | Producer/consumer backup pipeline |
//! | [`progress`] | Progress reporting |
//! | [`device`] | PVR HTTP client and header inspection |
//! | [`status`] | Archive status listing |

pub mod collaborators;
pub mod config;
pub mod device;
pub mod error;
pub mod header;
pub mod index;
pub mod ledger;
pub mod models;
pub mod naming;
pub mod pipeline;
pub mod progress;
pub mod status;

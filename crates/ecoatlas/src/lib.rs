//! `ecoatlas` - Offline-first biodiversity reporting for Togo
//!
//! This library provides the local report queue, its synchronization with the
//! hosted backend, and conversion of the backend's GeoJSON into map overlays.

#![warn(missing_docs)]
#![warn(missing_debug_implementations)]
#![deny(unsafe_code)]

pub mod cli;
pub mod config;
pub mod error;
pub mod logging;
pub mod map;
pub mod remote;
pub mod report;
pub mod storage;
pub mod sync;

pub use config::Config;
pub use error::{Error, Result};
pub use logging::init_logging;
pub use remote::{BackendClient, ObservationRow, ObservationSink};
pub use report::{AlertLevel, GeoPoint, PendingReport, ReportKind};
pub use storage::{QueueStats, ReportStore};
pub use sync::{SubmitMode, SubmitOutcome, SyncSummary, Synchronizer};

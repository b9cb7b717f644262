//! Backend-as-a-service access.
//!
//! The backend owns persistence, authentication, file storage and spatial
//! queries. This module only calls it: table inserts, object uploads and
//! remote procedures, all over HTTP.

mod client;

use std::path::Path;

use async_trait::async_trait;
use serde::Serialize;
use uuid::Uuid;

use crate::error::Result;
use crate::report::{AlertLevel, PendingReport, ReportKind};

pub use client::BackendClient;

/// Remote table receiving sighting reports.
pub const OBSERVATIONS_TABLE: &str = "observations";

/// Object prefix for photos attached to reports.
pub const REPORT_IMAGE_PREFIX: &str = "user_reports";

/// A row of the remote `observations` table, built from a pending report.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ObservationRow {
    /// Reporting user, if known.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,
    /// Species, always null for alerts.
    pub species_id: Option<String>,
    /// Free-text description.
    pub description: String,
    /// Photo URL, possibly empty.
    pub image_url: String,
    /// WKT point, longitude first.
    pub location: String,
    /// Alerts are published immediately; observations wait for moderation.
    pub is_verified: bool,
    /// Observation or alert.
    #[serde(rename = "type")]
    pub kind: ReportKind,
    /// Urgency level.
    pub alert_level: AlertLevel,
    /// Idempotency key, omitted when keys are disabled.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub client_ref: Option<Uuid>,
}

impl ObservationRow {
    /// Build the remote row for a report.
    #[must_use]
    pub fn from_report(
        report: &PendingReport,
        user_id: Option<&str>,
        with_client_ref: bool,
    ) -> Self {
        let is_alert = report.is_alert();
        Self {
            user_id: user_id.map(str::to_string),
            species_id: if is_alert {
                None
            } else {
                report.species_id.clone()
            },
            description: report.description.clone(),
            image_url: report.image_url.clone(),
            location: report.location.to_wkt(),
            is_verified: is_alert,
            kind: report.kind,
            alert_level: report.alert_level,
            client_ref: with_client_ref.then_some(report.client_ref),
        }
    }
}

/// Destination for synchronized reports.
///
/// Implemented by [`BackendClient`]; tests substitute in-memory fakes.
#[async_trait]
pub trait ObservationSink: Send + Sync {
    /// Insert one observation row. Success means the backend stored it.
    ///
    /// # Errors
    ///
    /// Returns an error if the backend rejected the row or could not be reached.
    async fn insert_observation(&self, row: &ObservationRow) -> Result<()>;

    /// Upload a photo held on local disk and return its public URL.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or the upload fails.
    async fn upload_photo(&self, path: &Path) -> Result<String>;
}

/// Whether an image reference points at a local file rather than a URL.
#[must_use]
pub fn is_local_image(image_url: &str) -> bool {
    !image_url.is_empty()
        && !image_url.starts_with("http://")
        && !image_url.starts_with("https://")
        && !image_url.starts_with("data:")
}

//! Core report types for ecoatlas.
//!
//! This module defines the sighting reports buffered by the offline queue,
//! together with the point type used for their GPS location.

use std::fmt;
use std::str::FromStr;
use std::sync::OnceLock;

use chrono::{DateTime, Utc};
use regex::Regex;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{Error, Result};

/// Whether a report is a plain sighting or an urgent alert.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReportKind {
    /// A species sighting, reviewed by moderators before publication.
    #[default]
    Observation,
    /// An environmental alert (poaching, bush fire, logging, pollution).
    Alert,
}

impl fmt::Display for ReportKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Observation => write!(f, "observation"),
            Self::Alert => write!(f, "alert"),
        }
    }
}

impl FromStr for ReportKind {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "observation" => Ok(Self::Observation),
            "alert" => Ok(Self::Alert),
            other => Err(Error::UnknownVariant {
                what: "report kind",
                value: other.to_string(),
            }),
        }
    }
}

/// Ordinal urgency of an alert.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize,
)]
#[serde(rename_all = "snake_case")]
pub enum AlertLevel {
    /// Informational.
    #[default]
    Low,
    /// Pollution, dumped waste.
    Medium,
    /// Tree felling.
    High,
    /// Poaching, bush fire.
    Critical,
}

impl AlertLevel {
    /// All levels from least to most urgent.
    pub const ALL: [Self; 4] = [Self::Low, Self::Medium, Self::High, Self::Critical];
}

impl fmt::Display for AlertLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Low => write!(f, "low"),
            Self::Medium => write!(f, "medium"),
            Self::High => write!(f, "high"),
            Self::Critical => write!(f, "critical"),
        }
    }
}

impl FromStr for AlertLevel {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "low" => Ok(Self::Low),
            "medium" => Ok(Self::Medium),
            "high" => Ok(Self::High),
            "critical" => Ok(Self::Critical),
            other => Err(Error::UnknownVariant {
                what: "alert level",
                value: other.to_string(),
            }),
        }
    }
}

/// A WGS84 point in degrees.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GeoPoint {
    /// Latitude, -90..=90.
    pub lat: f64,
    /// Longitude, -180..=180.
    pub lng: f64,
}

fn wkt_point_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(
            r"(?i)^\s*(?:SRID=\d+\s*;\s*)?POINT\s*\(\s*([-+]?\d+(?:\.\d+)?(?:e[-+]?\d+)?)\s+([-+]?\d+(?:\.\d+)?(?:e[-+]?\d+)?)\s*\)\s*$",
        )
        .expect("WKT point pattern is valid")
    })
}

impl GeoPoint {
    /// Create a point, checking that both coordinates are in range.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidLocation`] for non-finite or out-of-range values.
    pub fn new(lat: f64, lng: f64) -> Result<Self> {
        let point = Self { lat, lng };
        point.validate()?;
        Ok(point)
    }

    /// Check that the coordinates are finite and within WGS84 bounds.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidLocation`] describing the first bad coordinate.
    pub fn validate(&self) -> Result<()> {
        if !self.lat.is_finite() || !(-90.0..=90.0).contains(&self.lat) {
            return Err(Error::invalid_location(
                self.to_string(),
                "latitude must be between -90 and 90",
            ));
        }
        if !self.lng.is_finite() || !(-180.0..=180.0).contains(&self.lng) {
            return Err(Error::invalid_location(
                self.to_string(),
                "longitude must be between -180 and 180",
            ));
        }
        Ok(())
    }

    /// Render as well-known text. Note the longitude-first order.
    #[must_use]
    pub fn to_wkt(&self) -> String {
        format!("POINT({} {})", self.lng, self.lat)
    }

    /// Parse a well-known-text point such as `POINT(1.2228 6.1319)`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidLocation`] if the text is not a point or the
    /// coordinates are out of range.
    pub fn from_wkt(wkt: &str) -> Result<Self> {
        let caps = wkt_point_regex()
            .captures(wkt)
            .ok_or_else(|| Error::invalid_location(wkt, "expected POINT(lng lat)"))?;

        let lng: f64 = caps[1]
            .parse()
            .map_err(|_| Error::invalid_location(wkt, "longitude is not a number"))?;
        let lat: f64 = caps[2]
            .parse()
            .map_err(|_| Error::invalid_location(wkt, "latitude is not a number"))?;

        Self::new(lat, lng)
    }
}

impl fmt::Display for GeoPoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}, {}", self.lat, self.lng)
    }
}

/// A sighting report buffered locally until the backend accepts it.
///
/// A report is either mirrored into the remote store, after which the local
/// copy is deleted, or it stays pending. There is no acknowledged state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PendingReport {
    /// Local identifier (assigned by the storage layer, not the server id).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<i64>,

    /// Species reference, `None` when the reporter does not know it.
    pub species_id: Option<String>,

    /// Free-text description. Required.
    pub description: String,

    /// Public URL of an uploaded photo, or a local pointer. May be empty.
    pub image_url: String,

    /// Where the sighting happened.
    pub location: GeoPoint,

    /// Observation or alert.
    pub kind: ReportKind,

    /// Urgency, only meaningful for alerts.
    pub alert_level: AlertLevel,

    /// When the report was captured.
    pub created_at: DateTime<Utc>,

    /// Idempotency key sent with every submission of this report.
    pub client_ref: Uuid,
}

impl PendingReport {
    /// Create a species observation.
    #[must_use]
    pub fn observation(
        description: impl Into<String>,
        location: GeoPoint,
        species_id: Option<String>,
    ) -> Self {
        Self {
            id: None,
            species_id,
            description: description.into(),
            image_url: String::new(),
            location,
            kind: ReportKind::Observation,
            alert_level: AlertLevel::default(),
            created_at: Utc::now(),
            client_ref: Uuid::new_v4(),
        }
    }

    /// Create an alert. Alerts never carry a species.
    #[must_use]
    pub fn alert(description: impl Into<String>, location: GeoPoint, level: AlertLevel) -> Self {
        Self {
            id: None,
            species_id: None,
            description: description.into(),
            image_url: String::new(),
            location,
            kind: ReportKind::Alert,
            alert_level: level,
            created_at: Utc::now(),
            client_ref: Uuid::new_v4(),
        }
    }

    /// Attach a photo reference.
    #[must_use]
    pub fn with_image(mut self, image_url: impl Into<String>) -> Self {
        self.image_url = image_url.into();
        self
    }

    /// Check required fields before the report is queued.
    ///
    /// # Errors
    ///
    /// Returns [`Error::MissingField`] for a blank description, or
    /// [`Error::InvalidLocation`] for a bad point.
    pub fn validate(&self) -> Result<()> {
        if self.description.trim().is_empty() {
            return Err(Error::MissingField {
                field: "description",
            });
        }
        self.location.validate()
    }

    /// Check if this report is an alert.
    #[must_use]
    pub fn is_alert(&self) -> bool {
        self.kind == ReportKind::Alert
    }

    /// Short one-line summary for listings.
    #[must_use]
    pub fn summary(&self, max_chars: usize) -> String {
        let mut text: String = self.description.chars().take(max_chars).collect();
        if self.description.chars().count() > max_chars {
            text.push('…');
        }
        text
    }
}

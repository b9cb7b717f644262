//! Map overlays built from server-side GeoJSON.
//!
//! All spatial work (containment, proximity, projection) happens in remote
//! procedures. This module only reorders GeoJSON `[lng, lat]` positions into
//! the `[lat, lng]` pairs tile-map libraries expect, and picks marker icons.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Map, Value};
use tracing::warn;

use crate::error::{Error, Result};
use crate::report::{AlertLevel, GeoPoint, ReportKind};

/// Default fill colour for protected areas without one.
pub const DEFAULT_AREA_COLOR: &str = "#16a34a";

/// Geographic centre of Togo.
pub const TOGO_CENTER: (f64, f64) = (8.6195, 1.1915);

/// Default zoom showing the whole country.
pub const DEFAULT_ZOOM: u8 = 7;

/// A GeoJSON position: longitude, latitude and an optional altitude.
pub type Position = Vec<f64>;

/// The GeoJSON geometries the backend produces.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum Geometry {
    /// A single position.
    Point {
        /// `[lng, lat]`.
        coordinates: Position,
    },
    /// Outer ring followed by holes.
    Polygon {
        /// Rings of positions.
        coordinates: Vec<Vec<Position>>,
    },
    /// Several polygons.
    MultiPolygon {
        /// Polygons of rings of positions.
        coordinates: Vec<Vec<Vec<Position>>>,
    },
    /// Any geometry type not drawn by the overlay layer.
    #[serde(other)]
    Unsupported,
}

/// A `[lat, lng]` pair, serialized as a two-element array.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct LatLng(pub f64, pub f64);

impl LatLng {
    /// Latitude.
    #[must_use]
    pub fn lat(&self) -> f64 {
        self.0
    }

    /// Longitude.
    #[must_use]
    pub fn lng(&self) -> f64 {
        self.1
    }

    /// Convert a GeoJSON position, swapping the axis order.
    ///
    /// Returns `None` for short positions or out-of-range coordinates.
    #[must_use]
    pub fn from_position(position: &[f64]) -> Option<Self> {
        match position {
            [lng, lat, ..] => GeoPoint::new(*lat, *lng).ok().map(Self::from),
            _ => None,
        }
    }
}

impl From<GeoPoint> for LatLng {
    fn from(p: GeoPoint) -> Self {
        Self(p.lat, p.lng)
    }
}

fn ring_to_latlng(ring: &[Position]) -> Option<Vec<LatLng>> {
    ring.iter()
        .map(|pos| LatLng::from_position(pos))
        .collect::<Option<Vec<_>>>()
        .filter(|ring| !ring.is_empty())
}

/// A protected area as returned by `get_protected_areas_geojson`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProtectedArea {
    /// Area identifier.
    pub id: String,
    /// Display name.
    pub name: String,
    /// Stroke and fill colour.
    #[serde(default = "default_area_color")]
    pub color: String,
    /// Boundary geometry.
    pub boundary: Geometry,
}

fn default_area_color() -> String {
    DEFAULT_AREA_COLOR.to_string()
}

/// A protected area ready to be drawn as one or more polygons.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AreaOverlay {
    /// Area identifier.
    pub id: String,
    /// Display name.
    pub name: String,
    /// Stroke and fill colour.
    pub color: String,
    /// Outer ring of each polygon, in `[lat, lng]` order.
    pub rings: Vec<Vec<LatLng>>,
}

impl ProtectedArea {
    /// Convert the boundary into drawable outer rings.
    ///
    /// Holes are not drawn. Returns `None`, with a warning, when no ring of
    /// the boundary is usable.
    #[must_use]
    pub fn to_overlay(&self) -> Option<AreaOverlay> {
        let outer_rings: Vec<&Vec<Position>> = match &self.boundary {
            Geometry::Polygon { coordinates } => coordinates.first().into_iter().collect(),
            Geometry::MultiPolygon { coordinates } => {
                coordinates.iter().filter_map(|poly| poly.first()).collect()
            }
            Geometry::Point { .. } | Geometry::Unsupported => Vec::new(),
        };

        let rings: Vec<Vec<LatLng>> = outer_rings
            .into_iter()
            .filter_map(|ring| ring_to_latlng(ring))
            .collect();

        if rings.is_empty() {
            warn!(area = %self.id, name = %self.name, "Skipping protected area without a usable boundary");
            return None;
        }

        Some(AreaOverlay {
            id: self.id.clone(),
            name: self.name.clone(),
            color: self.color.clone(),
            rings,
        })
    }
}

/// Decode each array element on its own, dropping the ones that don't fit.
fn decode_each<T: DeserializeOwned>(items: Vec<Value>, what: &str) -> Vec<T> {
    items
        .into_iter()
        .enumerate()
        .filter_map(|(index, item)| match serde_json::from_value(item) {
            Ok(decoded) => Some(decoded),
            Err(e) => {
                warn!(index, error = %e, "Skipping malformed {}", what);
                None
            }
        })
        .collect()
}

/// Decode the result of `get_protected_areas_geojson`.
///
/// Entries with a missing or malformed boundary are skipped with a warning;
/// the rest of the layer is kept.
///
/// # Errors
///
/// Returns [`Error::GeoJson`] if the result is not an array.
pub fn protected_areas_from_json(value: Value) -> Result<Vec<ProtectedArea>> {
    match value {
        Value::Array(items) => Ok(decode_each(items, "protected area")),
        Value::Null => Ok(Vec::new()),
        other => Err(Error::geojson(format!(
            "expected an array of protected areas, got {other}"
        ))),
    }
}

fn lenient_features<'de, D>(deserializer: D) -> std::result::Result<Vec<Feature>, D::Error>
where
    D: Deserializer<'de>,
{
    let items = Option::<Vec<Value>>::deserialize(deserializer)?.unwrap_or_default();
    Ok(decode_each(items, "feature"))
}

/// A GeoJSON feature with free-form properties.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Feature {
    /// Optional feature id.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<Value>,
    /// Feature geometry; may be null.
    pub geometry: Option<Geometry>,
    /// Feature properties.
    #[serde(default)]
    pub properties: Map<String, Value>,
}

/// A GeoJSON feature collection.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct FeatureCollection {
    /// The features that decoded; malformed ones are dropped.
    #[serde(default, deserialize_with = "lenient_features")]
    pub features: Vec<Feature>,
}

/// Which icon a marker uses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum MarkerIcon {
    /// Default pin for verified sightings and landmarks.
    Default,
    /// Alert icon, coloured by urgency.
    Alert {
        /// Urgency level.
        level: AlertLevel,
    },
}

impl MarkerIcon {
    /// Colour for the icon.
    #[must_use]
    pub fn color(&self) -> &'static str {
        match self {
            Self::Default => "#2563eb",
            Self::Alert { level } => match level {
                AlertLevel::Low => "#facc15",
                AlertLevel::Medium => "#f97316",
                AlertLevel::High => "#dc2626",
                AlertLevel::Critical => "#7f1d1d",
            },
        }
    }
}

/// A point marker with a popup label.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Marker {
    /// Source record id, if any.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    /// Marker position.
    pub position: LatLng,
    /// Popup text.
    pub label: String,
    /// Icon to use.
    pub icon: MarkerIcon,
}

fn string_property(properties: &Map<String, Value>, key: &str) -> Option<String> {
    match properties.get(key)? {
        Value::String(s) if !s.is_empty() => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

impl Marker {
    /// Build a marker from a verified-observation feature.
    ///
    /// Alerts (property `type == "alert"`) get an alert icon for their
    /// `alert_level`. Non-point features are skipped.
    #[must_use]
    pub fn from_feature(feature: &Feature) -> Option<Self> {
        let Some(Geometry::Point { coordinates }) = &feature.geometry else {
            warn!("Skipping observation feature without point geometry");
            return None;
        };
        let Some(position) = LatLng::from_position(coordinates) else {
            warn!(?coordinates, "Skipping observation with invalid coordinates");
            return None;
        };

        let props = &feature.properties;
        let kind = string_property(props, "type")
            .and_then(|s| s.parse::<ReportKind>().ok())
            .unwrap_or_default();

        let icon = match kind {
            ReportKind::Alert => MarkerIcon::Alert {
                level: string_property(props, "alert_level")
                    .and_then(|s| s.parse().ok())
                    .unwrap_or_default(),
            },
            ReportKind::Observation => MarkerIcon::Default,
        };

        let label = string_property(props, "species_name")
            .or_else(|| string_property(props, "name"))
            .or_else(|| string_property(props, "description"))
            .unwrap_or_else(|| "Unknown species".to_string());

        let id = string_property(props, "id").or_else(|| match &feature.id {
            Some(Value::String(s)) => Some(s.clone()),
            Some(Value::Number(n)) => Some(n.to_string()),
            _ => None,
        });

        Some(Self {
            id,
            position,
            label,
            icon,
        })
    }
}

/// Which layers the map shows.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LayerFilter {
    /// Protected areas and observations.
    #[default]
    All,
    /// Protected areas only.
    Parks,
    /// Observations only.
    Species,
}

/// Everything drawn on top of the tiles.
#[derive(Debug, Clone, PartialEq, Default, Serialize)]
pub struct MapLayers {
    /// Protected-area polygons.
    pub areas: Vec<AreaOverlay>,
    /// Observation and alert markers.
    pub markers: Vec<Marker>,
}

impl MapLayers {
    /// Convert server results into drawable layers, skipping bad entries.
    #[must_use]
    pub fn build(areas: &[ProtectedArea], observations: &FeatureCollection) -> Self {
        Self {
            areas: areas.iter().filter_map(ProtectedArea::to_overlay).collect(),
            markers: observations
                .features
                .iter()
                .filter_map(Marker::from_feature)
                .collect(),
        }
    }

    /// Keep only the layers selected by `filter`.
    #[must_use]
    pub fn filtered(mut self, filter: LayerFilter) -> Self {
        match filter {
            LayerFilter::All => {}
            LayerFilter::Parks => self.markers.clear(),
            LayerFilter::Species => self.areas.clear(),
        }
        self
    }
}

/// Initial viewport and fixed landmarks.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MapView {
    /// Initial centre.
    pub center: LatLng,
    /// Initial zoom.
    pub zoom: u8,
    /// Always-visible markers.
    pub landmarks: Vec<Marker>,
}

impl MapView {
    /// A view centred on the given point.
    #[must_use]
    pub fn new(center: GeoPoint, zoom: u8) -> Self {
        Self {
            center: center.into(),
            zoom,
            landmarks: vec![Marker {
                id: None,
                position: LatLng(6.1319, 1.2228),
                label: "Lomé - Capitale du Togo".to_string(),
                icon: MarkerIcon::Default,
            }],
        }
    }
}

impl Default for MapView {
    fn default() -> Self {
        Self::new(
            GeoPoint {
                lat: TOGO_CENTER.0,
                lng: TOGO_CENTER.1,
            },
            DEFAULT_ZOOM,
        )
    }
}

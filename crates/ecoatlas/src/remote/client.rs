//! HTTP client for the backend-as-a-service.

use std::path::Path;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION, CONTENT_TYPE};
use reqwest::{RequestBuilder, Response};
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::{json, Value};
use tracing::{debug, info};
use url::Url;

use super::{ObservationRow, ObservationSink, OBSERVATIONS_TABLE, REPORT_IMAGE_PREFIX};
use crate::config::RemoteConfig;
use crate::error::{Error, Result};
use crate::map::{protected_areas_from_json, FeatureCollection, ProtectedArea};
use crate::report::GeoPoint;

/// Client for the backend's REST, storage and RPC endpoints.
///
/// Every request carries the anon key as `apikey`, and a bearer token: the
/// user's access token when one is configured, the anon key otherwise.
#[derive(Debug, Clone)]
pub struct BackendClient {
    base_url: Url,
    anon_key: String,
    access_token: Option<String>,
    bucket: String,
    http: reqwest::Client,
}

impl BackendClient {
    /// Create a client for the backend at `base_url`.
    ///
    /// # Errors
    ///
    /// Returns an error if the URL cannot be parsed.
    pub fn new(base_url: &str, anon_key: impl Into<String>) -> Result<Self> {
        let mut base = base_url.to_string();
        if !base.ends_with('/') {
            base.push('/');
        }

        Ok(Self {
            base_url: Url::parse(&base)?,
            anon_key: anon_key.into(),
            access_token: None,
            bucket: "observations".to_string(),
            http: reqwest::Client::new(),
        })
    }

    /// Create a client from the `[remote]` configuration section.
    ///
    /// # Errors
    ///
    /// Returns [`Error::RemoteNotConfigured`] when the URL or key is missing,
    /// or an error if the HTTP client cannot be built.
    pub fn from_config(config: &RemoteConfig) -> Result<Self> {
        let (Some(url), Some(anon_key)) = (&config.url, &config.anon_key) else {
            return Err(Error::RemoteNotConfigured);
        };

        let mut client = Self::new(url, anon_key.clone())?
            .with_bucket(config.bucket.clone())
            .with_timeout(config.request_timeout())?;
        if let Some(token) = &config.access_token {
            client = client.with_access_token(token.clone());
        }
        Ok(client)
    }

    /// Authenticate requests as a signed-in user.
    #[must_use]
    pub fn with_access_token(mut self, token: impl Into<String>) -> Self {
        self.access_token = Some(token.into());
        self
    }

    /// Use a different storage bucket for photos.
    #[must_use]
    pub fn with_bucket(mut self, bucket: impl Into<String>) -> Self {
        self.bucket = bucket.into();
        self
    }

    /// Apply a per-request timeout.
    ///
    /// # Errors
    ///
    /// Returns an error if the HTTP client cannot be built.
    pub fn with_timeout(mut self, timeout: Duration) -> Result<Self> {
        self.http = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(self)
    }

    /// The backend base URL.
    #[must_use]
    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    fn endpoint(&self, path: &str) -> Result<Url> {
        Ok(self.base_url.join(path)?)
    }

    fn auth_headers(&self) -> Result<HeaderMap> {
        let bearer = self.access_token.as_deref().unwrap_or(&self.anon_key);
        let mut headers = HeaderMap::new();
        headers.insert(
            "apikey",
            HeaderValue::from_str(&self.anon_key)
                .map_err(|_| Error::internal("anon key is not a valid header value"))?,
        );
        headers.insert(
            AUTHORIZATION,
            HeaderValue::from_str(&format!("Bearer {bearer}"))
                .map_err(|_| Error::internal("access token is not a valid header value"))?,
        );
        Ok(headers)
    }

    fn authorized(&self, request: RequestBuilder) -> Result<RequestBuilder> {
        Ok(request.headers(self.auth_headers()?))
    }

    /// Turn a non-success response into [`Error::Remote`].
    async fn check(response: Response) -> Result<Response> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        let body = response.text().await.unwrap_or_default();
        Err(Error::remote(status.as_u16(), error_message(&body)))
    }

    /// Insert a row into the `observations` table.
    ///
    /// Rows carrying a `client_ref` are sent as an insert that ignores
    /// conflicts on that key, so replaying an accepted report is harmless.
    ///
    /// # Errors
    ///
    /// Returns an error if the request fails or the backend rejects the row.
    pub async fn insert_observation(&self, row: &ObservationRow) -> Result<()> {
        let mut url = self.endpoint(&format!("rest/v1/{OBSERVATIONS_TABLE}"))?;
        let prefer = if row.client_ref.is_some() {
            url.query_pairs_mut().append_pair("on_conflict", "client_ref");
            "return=minimal,resolution=ignore-duplicates"
        } else {
            "return=minimal"
        };

        debug!(%url, kind = %row.kind, "Inserting observation");
        let request = self
            .authorized(self.http.post(url))?
            .header("Prefer", prefer)
            .json(&[row]);

        Self::check(request.send().await?).await?;
        Ok(())
    }

    /// Public URL of an object in the photo bucket.
    #[must_use]
    pub fn public_url(&self, object_path: &str) -> String {
        format!(
            "{}storage/v1/object/public/{}/{}",
            self.base_url, self.bucket, object_path
        )
    }

    /// Upload photo bytes and return the public URL.
    ///
    /// The object is named after the BLAKE3 hash of its content, so
    /// uploading the same photo again overwrites the same object.
    ///
    /// # Errors
    ///
    /// Returns an error if the upload fails.
    pub async fn upload_image(&self, bytes: Vec<u8>, file_name: &str) -> Result<String> {
        let object_path = image_object_path(&bytes, file_name);
        let url = self.endpoint(&format!(
            "storage/v1/object/{}/{}",
            self.bucket, object_path
        ))?;

        debug!(%url, size = bytes.len(), "Uploading photo");
        let request = self
            .authorized(self.http.post(url))?
            .header(CONTENT_TYPE, content_type_for(file_name))
            .header("x-upsert", "true")
            .body(bytes);

        Self::check(request.send().await?).await?;

        let public = self.public_url(&object_path);
        info!(url = %public, "Photo uploaded");
        Ok(public)
    }

    /// Read a photo from disk and upload it.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or the upload fails.
    pub async fn upload_image_file(&self, path: &Path) -> Result<String> {
        let bytes = tokio::fs::read(path).await?;
        let file_name = path
            .file_name()
            .map_or_else(|| "photo".to_string(), |n| n.to_string_lossy().into_owned());
        self.upload_image(bytes, &file_name).await
    }

    /// Call a remote procedure and decode its JSON result.
    ///
    /// # Errors
    ///
    /// Returns an error if the call fails or the result has an unexpected shape.
    pub async fn rpc<P, T>(&self, name: &str, params: &P) -> Result<T>
    where
        P: Serialize + ?Sized + Sync,
        T: DeserializeOwned,
    {
        let url = self.endpoint(&format!("rest/v1/rpc/{name}"))?;
        debug!(%url, "Calling remote procedure");

        let response = self
            .authorized(self.http.post(url))?
            .json(params)
            .send()
            .await?;
        let response = Self::check(response).await?;
        Ok(response.json::<T>().await?)
    }

    /// Protected areas with their boundaries as GeoJSON.
    ///
    /// # Errors
    ///
    /// Returns an error if the remote procedure fails.
    pub async fn protected_areas_geojson(&self) -> Result<Vec<ProtectedArea>> {
        let value: Value = self.rpc("get_protected_areas_geojson", &json!({})).await?;
        protected_areas_from_json(value)
    }

    /// Verified observations as a GeoJSON feature collection.
    ///
    /// # Errors
    ///
    /// Returns an error if the remote procedure fails.
    pub async fn verified_observations_geojson(&self) -> Result<FeatureCollection> {
        self.rpc("get_verified_observations_geojson", &json!({}))
            .await
    }

    /// Aggregated statistics for one park.
    ///
    /// # Errors
    ///
    /// Returns an error if the remote procedure fails.
    pub async fn park_analytics(&self, park_id: &str) -> Result<Value> {
        self.rpc("get_park_analytics", &json!({ "park_id": park_id }))
            .await
    }

    /// Species observed within `radius_m` metres of a point.
    ///
    /// # Errors
    ///
    /// Returns an error if the remote procedure fails.
    pub async fn nearby_species(&self, point: GeoPoint, radius_m: f64) -> Result<Value> {
        self.rpc(
            "get_nearby_species",
            &json!({ "lat": point.lat, "lng": point.lng, "radius_m": radius_m }),
        )
        .await
    }
}

#[async_trait]
impl ObservationSink for BackendClient {
    async fn insert_observation(&self, row: &ObservationRow) -> Result<()> {
        BackendClient::insert_observation(self, row).await
    }

    async fn upload_photo(&self, path: &Path) -> Result<String> {
        self.upload_image_file(path).await
    }
}

/// Extract a readable message from an error body.
///
/// `PostgREST` uses `message`, the storage API `error`/`msg`; anything else
/// is returned as-is.
fn error_message(body: &str) -> String {
    if let Ok(Value::Object(map)) = serde_json::from_str::<Value>(body) {
        for key in ["message", "msg", "error_description", "error"] {
            if let Some(Value::String(s)) = map.get(key) {
                return s.clone();
            }
        }
    }
    if body.trim().is_empty() {
        "empty response".to_string()
    } else {
        body.trim().to_string()
    }
}

fn extension_of(file_name: &str) -> Option<String> {
    Path::new(file_name)
        .extension()
        .map(|e| e.to_string_lossy().to_ascii_lowercase())
}

fn image_object_path(bytes: &[u8], file_name: &str) -> String {
    let hash = blake3::hash(bytes).to_hex();
    match extension_of(file_name) {
        Some(ext) => format!("{REPORT_IMAGE_PREFIX}/{hash}.{ext}"),
        None => format!("{REPORT_IMAGE_PREFIX}/{hash}"),
    }
}

fn content_type_for(file_name: &str) -> &'static str {
    match extension_of(file_name).as_deref() {
        Some("jpg" | "jpeg") => "image/jpeg",
        Some("png") => "image/png",
        Some("webp") => "image/webp",
        Some("gif") => "image/gif",
        Some("heic") => "image/heic",
        _ => "application/octet-stream",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::report::{AlertLevel, PendingReport};
    use wiremock::matchers::{body_json, header, header_exists, method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn client(server: &MockServer) -> BackendClient {
        BackendClient::new(&server.uri(), "anon-key").unwrap()
    }

    fn report() -> PendingReport {
        PendingReport::observation(
            "Chimpanzé",
            GeoPoint::new(7.9, 0.6).unwrap(),
            Some("sp-9".into()),
        )
    }

    #[test]
    fn test_error_message_extraction() {
        assert_eq!(
            error_message(r#"{"code":"23503","message":"violates foreign key"}"#),
            "violates foreign key"
        );
        assert_eq!(error_message(r#"{"error":"Bucket not found"}"#), "Bucket not found");
        assert_eq!(error_message("Bad Gateway"), "Bad Gateway");
        assert_eq!(error_message(""), "empty response");
    }

    #[test]
    fn test_image_object_path_is_content_addressed() {
        let a = image_object_path(b"same bytes", "IMG_001.JPG");
        let b = image_object_path(b"same bytes", "other.jpg");
        assert_eq!(a, b);
        assert!(a.starts_with("user_reports/"));
        assert!(a.ends_with(".jpg"));
        assert_ne!(a, image_object_path(b"other bytes", "IMG_001.JPG"));
        assert!(!image_object_path(b"x", "noext").contains('.'));
    }

    #[test]
    fn test_content_type_for() {
        assert_eq!(content_type_for("a.JPEG"), "image/jpeg");
        assert_eq!(content_type_for("a.png"), "image/png");
        assert_eq!(content_type_for("a.bin"), "application/octet-stream");
    }

    #[test]
    fn test_public_url() {
        let client = BackendClient::new("https://proj.example.co", "k").unwrap();
        assert_eq!(
            client.public_url("user_reports/abc.jpg"),
            "https://proj.example.co/storage/v1/object/public/observations/user_reports/abc.jpg"
        );
    }

    #[test]
    fn test_from_config_requires_url_and_key() {
        let config = RemoteConfig::default();
        assert!(matches!(
            BackendClient::from_config(&config),
            Err(Error::RemoteNotConfigured)
        ));
    }

    #[test]
    fn test_from_config_applies_settings() {
        let config = RemoteConfig {
            url: Some("https://togo.example.co".to_string()),
            anon_key: Some("anon".to_string()),
            bucket: "photos".to_string(),
            timeout_secs: 5,
            ..RemoteConfig::default()
        };

        let client = BackendClient::from_config(&config).unwrap();

        assert_eq!(client.base_url().as_str(), "https://togo.example.co/");
        assert_eq!(
            client.public_url("a.jpg"),
            "https://togo.example.co/storage/v1/object/public/photos/a.jpg"
        );
    }

    #[tokio::test]
    async fn test_insert_observation_with_client_ref() {
        let server = MockServer::start().await;
        let report = report();
        let row = ObservationRow::from_report(&report, Some("user-1"), true);

        Mock::given(method("POST"))
            .and(path("/rest/v1/observations"))
            .and(query_param("on_conflict", "client_ref"))
            .and(header("apikey", "anon-key"))
            .and(header("authorization", "Bearer anon-key"))
            .and(header_exists("prefer"))
            .and(body_json(serde_json::json!([row])))
            .respond_with(ResponseTemplate::new(201))
            .expect(1)
            .mount(&server)
            .await;

        client(&server).insert_observation(&row).await.unwrap();
    }

    #[tokio::test]
    async fn test_insert_observation_uses_access_token() {
        let server = MockServer::start().await;
        let row = ObservationRow::from_report(&report(), None, false);

        Mock::given(method("POST"))
            .and(path("/rest/v1/observations"))
            .and(header("authorization", "Bearer user-jwt"))
            .and(header("prefer", "return=minimal"))
            .respond_with(ResponseTemplate::new(201))
            .expect(1)
            .mount(&server)
            .await;

        client(&server)
            .with_access_token("user-jwt")
            .insert_observation(&row)
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_insert_observation_error_is_reported() {
        let server = MockServer::start().await;
        let row = ObservationRow::from_report(&report(), None, true);

        Mock::given(method("POST"))
            .and(path("/rest/v1/observations"))
            .respond_with(ResponseTemplate::new(409).set_body_json(serde_json::json!({
                "code": "23503",
                "message": "insert or update on table \"observations\" violates foreign key constraint"
            })))
            .mount(&server)
            .await;

        let err = client(&server).insert_observation(&row).await.unwrap_err();
        match err {
            Error::Remote { status, message } => {
                assert_eq!(status, 409);
                assert!(message.contains("foreign key"));
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_upload_image_returns_public_url() {
        let server = MockServer::start().await;
        let bytes = b"\xff\xd8\xff fake jpeg".to_vec();
        let object = image_object_path(&bytes, "photo.jpg");

        Mock::given(method("POST"))
            .and(path(format!("/storage/v1/object/observations/{object}")))
            .and(header("content-type", "image/jpeg"))
            .and(header("x-upsert", "true"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "Key": format!("observations/{object}")
            })))
            .expect(1)
            .mount(&server)
            .await;

        let url = client(&server)
            .upload_image(bytes, "photo.jpg")
            .await
            .unwrap();
        assert_eq!(
            url,
            format!(
                "{}/storage/v1/object/public/observations/{object}",
                server.uri()
            )
        );
    }

    #[tokio::test]
    async fn test_upload_image_file_missing() {
        let server = MockServer::start().await;
        let err = client(&server)
            .upload_image_file(Path::new("/nonexistent/photo.jpg"))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Io(_)));
    }

    #[tokio::test]
    async fn test_protected_areas_geojson() {
        let server = MockServer::start().await;

        Mock::given(method("POST"))
            .and(path("/rest/v1/rpc/get_protected_areas_geojson"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!([
                {
                    "id": "keran",
                    "name": "Parc National de la Kéran",
                    "color": "#166534",
                    "boundary": {"type": "Polygon", "coordinates": [[[0.9, 10.0], [1.1, 10.0], [1.1, 10.3], [0.9, 10.0]]]}
                }
            ])))
            .mount(&server)
            .await;

        let areas = client(&server).protected_areas_geojson().await.unwrap();
        assert_eq!(areas.len(), 1);
        assert_eq!(areas[0].name, "Parc National de la Kéran");
        assert!(areas[0].to_overlay().is_some());
    }

    #[tokio::test]
    async fn test_protected_areas_skip_malformed_entries() {
        let server = MockServer::start().await;

        Mock::given(method("POST"))
            .and(path("/rest/v1/rpc/get_protected_areas_geojson"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!([
                {
                    "id": "keran",
                    "name": "Parc National de la Kéran",
                    "boundary": {"type": "Polygon", "coordinates": [[[0.9, 10.0], [1.1, 10.0], [1.1, 10.3], [0.9, 10.0]]]}
                },
                {"id": "abdoulaye", "name": "Abdoulaye", "boundary": null}
            ])))
            .mount(&server)
            .await;

        let areas = client(&server).protected_areas_geojson().await.unwrap();
        assert_eq!(areas.len(), 1);
        assert_eq!(areas[0].id, "keran");
    }

    #[tokio::test]
    async fn test_verified_observations_become_markers() {
        let server = MockServer::start().await;

        Mock::given(method("POST"))
            .and(path("/rest/v1/rpc/get_verified_observations_geojson"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "type": "FeatureCollection",
                "features": [
                    {
                        "type": "Feature",
                        "geometry": {"type": "Point", "coordinates": [1.2228, 6.1319]},
                        "properties": {"id": 5, "species_name": "Tortue luth", "type": "observation"}
                    },
                    {
                        "type": "Feature",
                        "geometry": {"type": "LineString", "coordinates": [[1.0, 6.0], [1.1, 6.1]]},
                        "properties": {}
                    }
                ]
            })))
            .mount(&server)
            .await;

        let collection = client(&server)
            .verified_observations_geojson()
            .await
            .unwrap();
        let layers = crate::map::MapLayers::build(&[], &collection);

        assert_eq!(collection.features.len(), 2);
        assert_eq!(layers.markers.len(), 1);
        assert_eq!(layers.markers[0].label, "Tortue luth");
        assert_eq!(layers.markers[0].position.lat(), 6.1319);
    }

    #[tokio::test]
    async fn test_park_analytics_sends_park_id() {
        let server = MockServer::start().await;

        Mock::given(method("POST"))
            .and(path("/rest/v1/rpc/get_park_analytics"))
            .and(body_json(serde_json::json!({"park_id": "fazao"})))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(serde_json::json!({"species_count": 12, "alerts": 3})),
            )
            .mount(&server)
            .await;

        let stats = client(&server).park_analytics("fazao").await.unwrap();
        assert_eq!(stats["species_count"], 12);
    }

    #[tokio::test]
    async fn test_rpc_error() {
        let server = MockServer::start().await;

        Mock::given(method("POST"))
            .and(path("/rest/v1/rpc/get_nearby_species"))
            .respond_with(ResponseTemplate::new(503).set_body_string("Service Unavailable"))
            .mount(&server)
            .await;

        let err = client(&server)
            .nearby_species(GeoPoint::new(6.13, 1.22).unwrap(), 500.0)
            .await
            .unwrap_err();
        assert!(err.is_retryable());
    }

    #[test]
    fn test_alert_row_shape_for_insert() {
        let alert = PendingReport::alert(
            "Pollution",
            GeoPoint::new(6.2, 1.3).unwrap(),
            AlertLevel::Medium,
        );
        let row = ObservationRow::from_report(&alert, None, true);
        assert!(row.is_verified);
    }
}

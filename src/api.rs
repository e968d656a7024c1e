// API client module: a small blocking HTTP client that talks to the
// Squidle REST API. Listing endpoints are flask-restless style: a JSON
// `q` parameter carries the filters and results come back in pages.

use anyhow::{Context, Result};
use reqwest::blocking::{Client, Response};
use reqwest::header::{HeaderMap, HeaderValue, CONTENT_TYPE};
use reqwest::Url;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Deserializer};
use serde_json::{json, Value};
use std::time::Duration;
use tracing::debug;

/// Header the Squidle API reads the user token from.
pub const AUTH_HEADER: &str = "x-auth-token";

pub const DEFAULT_RESULTS_PER_PAGE: u32 = 100;

pub const DEFAULT_API_TIMEOUT: Duration = Duration::from_secs(30);
const CONNECT_TIMEOUT: Duration = Duration::from_secs(30);

/// Raised when a campaign search comes back empty.
#[derive(Debug, thiserror::Error)]
#[error("campaign not found: {0}")]
pub struct CampaignNotFound(pub String);

/// Blocking API client holding the base URL of the Squidle instance and
/// an optional user token for private datasets.
#[derive(Clone)]
pub struct ApiClient {
    client: Client,
    base: Url,
    base_url: String,
    token: Option<String>,
    results_per_page: u32,
    api_timeout: Duration,
}

#[derive(Deserialize, Debug, Clone, PartialEq)]
pub struct Deployment {
    pub id: i64,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub key: Option<String>,
}

#[derive(Deserialize, Debug, Clone, PartialEq)]
pub struct Media {
    pub id: i64,
    #[serde(default)]
    pub key: Option<String>,
    #[serde(default)]
    pub path_best: Option<String>,
}

/// Response of `/api/media_poses/<id>`: the media item and the pose it
/// was captured at.
#[derive(Deserialize, Debug, Clone, Default)]
pub struct MediaPose {
    #[serde(default)]
    pub media: Option<MediaInfo>,
    #[serde(default)]
    pub pose: Option<Pose>,
}

#[derive(Deserialize, Debug, Clone, Default)]
pub struct MediaInfo {
    #[serde(default)]
    pub path_best: Option<String>,
}

/// Position and time of a media item. The server is not consistent about
/// number types, so numeric fields accept numbers, numeric strings or null.
#[derive(Deserialize, Debug, Clone, Default, PartialEq)]
pub struct Pose {
    #[serde(default)]
    pub timestamp: Option<String>,
    #[serde(default, deserialize_with = "lenient_f64")]
    pub lat: Option<f64>,
    #[serde(default, deserialize_with = "lenient_f64")]
    pub lon: Option<f64>,
    #[serde(default, deserialize_with = "lenient_f64")]
    pub dep: Option<f64>,
    #[serde(default, deserialize_with = "lenient_f64")]
    pub alt: Option<f64>,
}

impl MediaPose {
    /// Best available URL of the image, trimmed.
    pub fn image_url(&self) -> Option<&str> {
        self.media
            .as_ref()
            .and_then(|m| m.path_best.as_deref())
            .map(str::trim)
            .filter(|u| !u.is_empty())
    }
}

/// One page of a listing endpoint.
#[derive(Deserialize, Debug)]
pub struct Page<T> {
    #[serde(default)]
    pub num_results: u64,
    #[serde(default = "Vec::new")]
    pub objects: Vec<T>,
    #[serde(default)]
    pub page: Option<u64>,
    #[serde(default)]
    pub total_pages: Option<u64>,
}

impl<T> Page<T> {
    /// Number of pages in the listing. Falls back to deriving it from
    /// `num_results` when the server leaves `total_pages` out.
    pub fn page_count(&self, results_per_page: u32) -> u64 {
        self.total_pages
            .unwrap_or_else(|| self.num_results.div_ceil(u64::from(results_per_page.max(1))))
    }
}

fn lenient_f64<'de, D>(deserializer: D) -> std::result::Result<Option<f64>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<Value>::deserialize(deserializer)?;
    Ok(match value {
        Some(Value::Number(n)) => n.as_f64(),
        Some(Value::String(s)) => s.trim().parse().ok(),
        _ => None,
    })
}

/// Search filter matching deployments of the named campaign.
pub fn campaign_filter(campaign: &str) -> Value {
    json!({
        "filters": [{
            "name": "campaign",
            "op": "has",
            "val": { "name": "name", "op": "eq", "val": campaign }
        }],
        "order_by": [{ "field": "id", "direction": "asc" }]
    })
}

/// Listing filter matching the media of one deployment.
pub fn deployment_filter(deployment_id: i64) -> Value {
    json!({
        "filters": [{ "name": "deployment_id", "op": "eq", "val": deployment_id }],
        "order_by": [{ "field": "id", "direction": "asc" }]
    })
}

impl ApiClient {
    /// Create a client for the instance at `base_url`. An empty token is
    /// treated as no token.
    pub fn new(base_url: &str, token: Option<&str>) -> Result<Self> {
        let base_url = base_url.trim().trim_end_matches('/').to_string();
        let base = Url::parse(&base_url).with_context(|| format!("Invalid API url: {base_url}"))?;
        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        // No overall timeout: image bodies can take arbitrarily long to
        // stream. API calls set their own per-request limit.
        let client = Client::builder()
            .default_headers(headers)
            .connect_timeout(CONNECT_TIMEOUT)
            .timeout(None::<Duration>)
            .build()
            .context("Failed to build HTTP client")?;
        Ok(ApiClient {
            client,
            base,
            base_url,
            token: token.filter(|t| !t.is_empty()).map(str::to_string),
            results_per_page: DEFAULT_RESULTS_PER_PAGE,
            api_timeout: DEFAULT_API_TIMEOUT,
        })
    }

    pub fn with_results_per_page(mut self, results_per_page: u32) -> Self {
        self.results_per_page = results_per_page.max(1);
        self
    }

    /// Limit on a whole API call, body included. File downloads are not
    /// affected.
    pub fn with_api_timeout(mut self, timeout: Duration) -> Self {
        self.api_timeout = timeout;
        self
    }

    fn auth_headers(&self) -> Result<HeaderMap> {
        let mut headers = HeaderMap::new();
        if let Some(t) = &self.token {
            let val = HeaderValue::from_str(t).context("API token is not a valid header value")?;
            headers.insert(AUTH_HEADER, val);
        }
        Ok(headers)
    }

    /// Turn a server-relative path into an absolute URL.
    pub fn resolve_url(&self, url: &str) -> String {
        let url = url.trim();
        if url.starts_with("http://") || url.starts_with("https://") {
            url.to_string()
        } else {
            format!("{}/{}", self.base_url, url.trim_start_matches('/'))
        }
    }

    /// Whether `url` has the same scheme, host and port as the API.
    fn is_api_origin(&self, url: &str) -> bool {
        Url::parse(url)
            .map(|u| u.origin() == self.base.origin())
            .unwrap_or(false)
    }

    fn get_json<T: DeserializeOwned>(&self, path: &str, query: &[(&str, String)]) -> Result<T> {
        let url = format!("{}{}", self.base_url, path);
        let res = self
            .client
            .get(&url)
            .headers(self.auth_headers()?)
            .query(query)
            .timeout(self.api_timeout)
            .send()
            .with_context(|| format!("Failed to send request to {url}"))?;
        let res = check_status(res, path)?;
        res.json()
            .with_context(|| format!("Parsing {path} response json"))
    }

    /// Walk every page of a listing endpoint and collect the objects.
    pub fn paginate<T: DeserializeOwned>(&self, path: &str, filters: &Value) -> Result<Vec<T>> {
        let q = filters.to_string();
        let mut objects = Vec::new();
        let mut page = 1u64;
        loop {
            let query = [
                ("q", q.clone()),
                ("page", page.to_string()),
                ("results_per_page", self.results_per_page.to_string()),
            ];
            let body: Page<T> = self.get_json(path, &query)?;
            let page_count = body.page_count(self.results_per_page);
            debug!(path, page, page_count, received = body.objects.len(), "fetched page");
            if body.objects.is_empty() {
                break;
            }
            objects.extend(body.objects);
            if page >= page_count {
                break;
            }
            page += 1;
        }
        Ok(objects)
    }

    /// Resolve a campaign name to its deployments.
    pub fn find_deployments(&self, campaign: &str) -> Result<Vec<Deployment>> {
        let deployments: Vec<Deployment> = self
            .paginate("/api/deployment", &campaign_filter(campaign))
            .with_context(|| format!("Searching for campaign {campaign}"))?;
        if deployments.is_empty() {
            return Err(CampaignNotFound(campaign.to_string()).into());
        }
        Ok(deployments)
    }

    /// List every media item of a deployment.
    pub fn list_media(&self, deployment_id: i64) -> Result<Vec<Media>> {
        self.paginate("/api/media", &deployment_filter(deployment_id))
            .with_context(|| format!("Listing media of deployment {deployment_id}"))
    }

    /// Fetch the pose and image URL of a media item.
    pub fn media_pose(&self, media_id: i64) -> Result<MediaPose> {
        self.get_json(&format!("/api/media_poses/{media_id}"), &[])
            .with_context(|| format!("Fetching pose of media {media_id}"))
    }

    /// GET a file. The token is only attached when the file is served from
    /// the API's own origin.
    pub fn fetch(&self, url: &str) -> Result<Response> {
        let url = self.resolve_url(url);
        let mut req = self.client.get(&url);
        if self.is_api_origin(&url) {
            req = req.headers(self.auth_headers()?);
        }
        let res = req
            .send()
            .with_context(|| format!("Failed to send request to {url}"))?;
        check_status(res, &url)
    }
}

fn check_status(res: Response, what: &str) -> Result<Response> {
    if !res.status().is_success() {
        let status = res.status();
        let txt = res.text().unwrap_or_default();
        anyhow::bail!("Request to {} failed: {} - {}", what, status, txt.trim());
    }
    Ok(res)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn page_count_prefers_total_pages() {
        let page: Page<Media> =
            serde_json::from_str(r#"{"num_results": 250, "objects": [], "total_pages": 7}"#).unwrap();
        assert_eq!(page.page_count(100), 7);
    }

    #[test]
    fn page_count_derived_from_num_results() {
        let page: Page<Media> = serde_json::from_str(r#"{"num_results": 201, "objects": []}"#).unwrap();
        assert_eq!(page.page_count(100), 3);

        let exact: Page<Media> = serde_json::from_str(r#"{"num_results": 200}"#).unwrap();
        assert_eq!(exact.page_count(100), 2);
        assert!(exact.objects.is_empty());
    }

    #[test]
    fn pose_accepts_strings_numbers_and_nulls() {
        let pose: MediaPose = serde_json::from_str(
            r#"{
                "media": {"id": 4, "path_best": " https://cdn.example.org/a.JPG \n"},
                "pose": {"timestamp": "2019-05-01T10:00:00", "lat": "-42.5", "lon": 147.25, "dep": null}
            }"#,
        )
        .unwrap();
        let p = pose.pose.as_ref().unwrap();
        assert_eq!(p.lat, Some(-42.5));
        assert_eq!(p.lon, Some(147.25));
        assert_eq!(p.dep, None);
        assert_eq!(p.alt, None);
        assert_eq!(pose.image_url(), Some("https://cdn.example.org/a.JPG"));
    }

    #[test]
    fn image_url_missing_when_blank() {
        let pose: MediaPose = serde_json::from_str(r#"{"media": {"path_best": "  "}}"#).unwrap();
        assert_eq!(pose.image_url(), None);
    }

    #[test]
    fn campaign_filter_nests_name_match() {
        let f = campaign_filter("dy108-109_nerc_oceanids_class");
        assert_eq!(f["filters"][0]["name"], "campaign");
        assert_eq!(f["filters"][0]["op"], "has");
        assert_eq!(f["filters"][0]["val"]["val"], "dy108-109_nerc_oceanids_class");
    }

    #[test]
    fn resolve_url_handles_relative_paths() {
        let api = ApiClient::new("https://soi.squidle.org/", None).unwrap();
        assert_eq!(
            api.resolve_url("/media/1.jpg"),
            "https://soi.squidle.org/media/1.jpg"
        );
        assert_eq!(
            api.resolve_url("https://s3.example.com/x.png"),
            "https://s3.example.com/x.png"
        );
    }

    #[test]
    fn empty_token_is_no_token() {
        let anonymous = ApiClient::new("http://localhost", Some("")).unwrap();
        assert!(anonymous.auth_headers().unwrap().get(AUTH_HEADER).is_none());
        let authed = ApiClient::new("http://localhost", Some("abc")).unwrap();
        assert_eq!(authed.auth_headers().unwrap()[AUTH_HEADER], "abc");
    }

    #[test]
    fn api_origin_is_exact() {
        let api = ApiClient::new("https://soi.squidle.org", Some("t")).unwrap();
        assert!(api.is_api_origin("https://soi.squidle.org/media/1.jpg"));
        assert!(api.is_api_origin("https://soi.squidle.org:443/x"));
        assert!(!api.is_api_origin("https://soi.squidle.org.evil.example/1.jpg"));
        assert!(!api.is_api_origin("http://soi.squidle.org/1.jpg"));

        let local = ApiClient::new("http://127.0.0.1:4", Some("t")).unwrap();
        assert!(!local.is_api_origin("http://127.0.0.1:45123/img.jpg"));
    }

    #[test]
    fn rejects_unparseable_base_url() {
        assert!(ApiClient::new("not a url", None).is_err());
    }
}

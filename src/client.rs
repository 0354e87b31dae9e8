use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use http_body_util::{BodyExt, Collected, Empty};
use hyper::body::Bytes;
use hyper::header::{self, HeaderValue};
use hyper::{Method, Request, StatusCode, Uri};
use hyper_rustls::HttpsConnector;
use hyper_util::client::legacy::connect::HttpConnector;
use hyper_util::client::legacy::Client;
use hyper_util::rt::TokioExecutor;
use percent_encoding::{utf8_percent_encode, AsciiSet, NON_ALPHANUMERIC};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use thiserror::Error;

use crate::collector::CloudflareApi;
use crate::common::BuildError;
use crate::config::Auth;

const DEFAULT_API_BASE: &str = "https://api.cloudflare.com/client/v4";

// Everything but RFC 3986 unreserved characters gets percent-encoded when a configured
// value lands in a request URL.
const URL_COMPONENT: &AsciiSet =
    &NON_ALPHANUMERIC.remove(b'-').remove(b'.').remove(b'_').remove(b'~');

/// Errors that could occur while talking to the Cloudflare API.
#[derive(Debug, Error)]
pub enum ApiError {
    /// The request URL could not be parsed.
    #[error("invalid request URL: {0}")]
    InvalidUri(String),

    /// The request could not be built.
    #[error("failed to build API request: {0}")]
    Http(#[from] hyper::http::Error),

    /// The request could not be sent.
    #[error("failed to send API request: {0}")]
    Request(#[from] hyper_util::client::legacy::Error),

    /// The response body could not be read.
    #[error("failed to read API response body: {0}")]
    Body(#[from] hyper::Error),

    /// The API answered with a non-success HTTP status.
    #[error("unexpected API response status {status}: {body}")]
    Status {
        /// The HTTP status code of the response.
        status: StatusCode,
        /// The response body, as text.
        body: String,
    },

    /// The API answered with a well-formed envelope flagged as unsuccessful.
    #[error("unsuccessful API response: {0}")]
    Unsuccessful(String),

    /// The response body could not be decoded.
    #[error("failed to decode API response: {0}")]
    Decode(#[from] serde_json::Error),

    /// No zone with the requested name exists, or the credentials cannot see it.
    #[error("no zone found with name `{0}`")]
    ZoneNotFound(String),
}

/// The standard Cloudflare v4 response envelope.
#[derive(Deserialize)]
struct ApiEnvelope<T> {
    #[serde(default)]
    success: bool,
    #[serde(default)]
    errors: Vec<ApiMessage>,
    result: Option<T>,
}

#[derive(Deserialize)]
struct ApiMessage {
    #[serde(default)]
    code: i64,
    #[serde(default)]
    message: String,
}

#[derive(Deserialize)]
struct ZoneIdentifier {
    id: String,
}

/// The aggregate analytics snapshot for a zone.
#[derive(Clone, Debug, Default, Deserialize)]
pub struct ZoneAnalytics {
    /// Totals over the requested lookback window.
    #[serde(default)]
    pub totals: ZoneTotals,
}

/// Aggregated zone totals over the lookback window.
#[derive(Clone, Debug, Default, Deserialize)]
pub struct ZoneTotals {
    /// Request counts.
    #[serde(default)]
    pub requests: RequestTotals,
    /// Bandwidth, in bytes.
    #[serde(default)]
    pub bandwidth: BandwidthTotals,
    /// Mitigated threats.
    #[serde(default)]
    pub threats: ThreatTotals,
    /// Page views.
    #[serde(default)]
    pub pageviews: PageviewTotals,
    /// Unique visitors.
    #[serde(default)]
    pub uniques: UniqueTotals,
}

/// Request counts for a zone.
#[derive(Clone, Debug, Default, Deserialize)]
pub struct RequestTotals {
    /// Total requests.
    #[serde(default)]
    pub all: f64,
    /// Requests served from cache.
    #[serde(default)]
    pub cached: f64,
    /// Requests that missed the cache.
    #[serde(default)]
    pub uncached: f64,
    /// Requests broken down by response `Content-Type` header.
    #[serde(default)]
    pub content_type: HashMap<String, f64>,
    /// Requests broken down by request country.
    #[serde(default)]
    pub country: HashMap<String, f64>,
    /// Requests broken down by HTTP response code.
    #[serde(default)]
    pub http_status: HashMap<String, f64>,
    /// Requests split by SSL usage.
    #[serde(default)]
    pub ssl: SslTotals,
}

/// Bandwidth totals for a zone, in bytes.
#[derive(Clone, Debug, Default, Deserialize)]
pub struct BandwidthTotals {
    /// Total bandwidth.
    #[serde(default)]
    pub all: f64,
    /// Bandwidth served from cache.
    #[serde(default)]
    pub cached: f64,
    /// Bandwidth that missed the cache.
    #[serde(default)]
    pub uncached: f64,
    /// Bandwidth broken down by response `Content-Type` header.
    #[serde(default)]
    pub content_type: HashMap<String, f64>,
    /// Bandwidth broken down by request country.
    #[serde(default)]
    pub country: HashMap<String, f64>,
    /// Bandwidth split by SSL usage.
    #[serde(default)]
    pub ssl: SslTotals,
}

/// Encrypted/unencrypted split of a request or bandwidth total.
#[derive(Clone, Debug, Default, Deserialize)]
pub struct SslTotals {
    /// The encrypted share.
    #[serde(default)]
    pub encrypted: f64,
    /// The unencrypted share.
    #[serde(default)]
    pub unencrypted: f64,
}

/// Mitigated threat counts for a zone.
#[derive(Clone, Debug, Default, Deserialize)]
pub struct ThreatTotals {
    /// Total mitigated threats.
    #[serde(default)]
    pub all: f64,
    /// Threats broken down by request country.
    #[serde(default)]
    pub country: HashMap<String, f64>,
    /// Threats broken down by mitigation type.
    #[serde(default, rename = "type")]
    pub threat_type: HashMap<String, f64>,
}

/// Page view counts for a zone.
#[derive(Clone, Debug, Default, Deserialize)]
pub struct PageviewTotals {
    /// Total page views.
    #[serde(default)]
    pub all: f64,
    /// Page views broken down by search engine crawler.
    #[serde(default)]
    pub search_engines: HashMap<String, f64>,
}

/// Unique visitor counts for a zone.
#[derive(Clone, Debug, Default, Deserialize)]
pub struct UniqueTotals {
    /// Total unique visitors.
    #[serde(default)]
    pub all: f64,
}

/// An Access service token, as listed by the account service tokens endpoint.
#[derive(Clone, Debug, Deserialize)]
pub struct AccessServiceToken {
    /// The token's display name.
    #[serde(default)]
    pub name: String,
    /// When the token expires.
    pub expires_at: DateTime<Utc>,
}

/// A client for the parts of the Cloudflare v4 HTTP API the exporter consumes.
///
/// Every request carries the headers for the configured [`Auth`] method and expects the
/// standard Cloudflare response envelope.
pub struct CloudflareClient {
    client: Client<HttpsConnector<HttpConnector>, Empty<Bytes>>,
    api_base: String,
    auth: Auth,
}

impl CloudflareClient {
    /// Creates a client against the production Cloudflare API endpoint.
    pub fn new(auth: Auth) -> Result<Self, BuildError> {
        Self::with_api_base(auth, DEFAULT_API_BASE)
    }

    /// Creates a client against a custom API endpoint, e.g. a gateway or a test server.
    pub fn with_api_base(auth: Auth, api_base: impl Into<String>) -> Result<Self, BuildError> {
        let https = hyper_rustls::HttpsConnectorBuilder::new()
            .with_native_roots()
            .map_err(|err| BuildError::FailedToLoadNativeRoots(err.to_string()))?
            .https_or_http()
            .enable_http1()
            .build();
        let client = Client::builder(TokioExecutor::new())
            .pool_idle_timeout(Duration::from_secs(30))
            .build(https);

        Ok(Self { client, api_base: api_base.into(), auth })
    }

    fn build_request(&self, uri: Uri) -> Result<Request<Empty<Bytes>>, ApiError> {
        let builder = Request::builder().method(Method::GET).uri(uri);
        let builder = match &self.auth {
            Auth::Email { email, key } => builder
                .header(
                    "X-Auth-Email",
                    HeaderValue::from_str(email).map_err(hyper::http::Error::from)?,
                )
                .header("X-Auth-Key", sensitive_header(key)?),
            Auth::Token(token) => {
                let bearer = format!("Bearer {token}");
                builder.header(header::AUTHORIZATION, sensitive_header(&bearer)?)
            }
            Auth::UserServiceKey(key) => {
                builder.header("X-Auth-User-Service-Key", sensitive_header(key)?)
            }
        };

        Ok(builder.body(Empty::new())?)
    }

    async fn get_json<T>(&self, url: String) -> Result<T, ApiError>
    where
        T: DeserializeOwned + Default,
    {
        let uri =
            url.parse::<Uri>().map_err(|err| ApiError::InvalidUri(format!("{url}: {err}")))?;
        let request = self.build_request(uri)?;

        let response = self.client.request(request).await?;
        let status = response.status();
        let body = response.into_body().collect().await.map(Collected::to_bytes)?;

        if !status.is_success() {
            return Err(ApiError::Status {
                status,
                body: String::from_utf8_lossy(&body).into_owned(),
            });
        }

        let envelope: ApiEnvelope<T> = serde_json::from_slice(&body)?;
        if !envelope.success {
            return Err(ApiError::Unsuccessful(join_api_errors(&envelope.errors)));
        }

        // Some endpoints encode an empty result as `null` rather than `[]`.
        Ok(envelope.result.unwrap_or_default())
    }
}

#[async_trait]
impl CloudflareApi for CloudflareClient {
    async fn zone_id_by_name(&self, zone_name: &str) -> Result<String, ApiError> {
        let url = format!("{}/zones?name={}", self.api_base, encode_component(zone_name));
        let zones: Vec<ZoneIdentifier> = self.get_json(url).await?;

        zones
            .into_iter()
            .next()
            .map(|zone| zone.id)
            .ok_or_else(|| ApiError::ZoneNotFound(zone_name.to_string()))
    }

    async fn zone_analytics_dashboard(
        &self,
        zone_id: &str,
        since: DateTime<Utc>,
    ) -> Result<ZoneAnalytics, ApiError> {
        let since = since.to_rfc3339_opts(SecondsFormat::Secs, true);
        let url = format!(
            "{}/zones/{}/analytics/dashboard?since={}&continuous=false",
            self.api_base,
            encode_component(zone_id),
            encode_component(&since)
        );
        self.get_json(url).await
    }

    async fn access_service_tokens(
        &self,
        account_id: &str,
    ) -> Result<Vec<AccessServiceToken>, ApiError> {
        let url = format!(
            "{}/accounts/{}/access/service_tokens",
            self.api_base,
            encode_component(account_id)
        );
        self.get_json(url).await
    }
}

fn encode_component(value: &str) -> String {
    utf8_percent_encode(value, URL_COMPONENT).to_string()
}

fn sensitive_header(value: &str) -> Result<HeaderValue, ApiError> {
    let mut header = HeaderValue::from_str(value).map_err(hyper::http::Error::from)?;
    header.set_sensitive(true);
    Ok(header)
}

fn join_api_errors(errors: &[ApiMessage]) -> String {
    if errors.is_empty() {
        return "the API reported failure without error detail".to_string();
    }

    errors
        .iter()
        .map(|error| format!("{} (code {})", error.message, error.code))
        .collect::<Vec<_>>()
        .join("; ")
}

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tracing::error;

use crate::client::{AccessServiceToken, ApiError, ZoneAnalytics};
use crate::common::LabelSet;
use crate::config::ExporterConfig;
use crate::registry::Registry;

/// The Cloudflare API surface the collector consumes.
///
/// [`CloudflareClient`][crate::CloudflareClient] implements this against the real API, and
/// tests substitute their own implementations.
#[async_trait]
pub trait CloudflareApi {
    /// Resolves a zone name to its zone id.
    async fn zone_id_by_name(&self, zone_name: &str) -> Result<String, ApiError>;

    /// Fetches the aggregate analytics dashboard for a zone, from `since` until now.
    async fn zone_analytics_dashboard(
        &self,
        zone_id: &str,
        since: DateTime<Utc>,
    ) -> Result<ZoneAnalytics, ApiError>;

    /// Lists the Access service tokens of an account.
    async fn access_service_tokens(
        &self,
        account_id: &str,
    ) -> Result<Vec<AccessServiceToken>, ApiError>;
}

/// Maps Cloudflare API payloads onto the gauge registry.
///
/// Zone metric names carry the configured lookback window as a suffix, so the default 24h
/// window yields names like `cloudflare_requests_rate24h`. Zone gauges are labelled with
/// `zone_id` and `zone_name`, token expirations with `account_id` and `token_name`.
pub struct Collector {
    api: Box<dyn CloudflareApi + Send + Sync>,
    registry: Arc<Registry>,
    zones: Vec<String>,
    accounts: Vec<String>,
    since: String,
    include_access: bool,
}

impl Collector {
    /// Creates a collector over the given API implementation and registry.
    pub fn new(
        api: Box<dyn CloudflareApi + Send + Sync>,
        registry: Arc<Registry>,
        config: &ExporterConfig,
    ) -> Self {
        Self {
            api,
            registry,
            zones: config.zones.clone(),
            accounts: config.accounts.clone(),
            since: config.since.clone(),
            include_access: config.include_access,
        }
    }

    /// Refreshes every configured target once, accounts before zones.
    ///
    /// A failing target is logged and skipped, so one bad zone or account never stops the
    /// rest from being refreshed.
    pub async fn update(&self) {
        if self.include_access {
            for account in &self.accounts {
                self.update_account(account).await;
            }
        }

        for zone in &self.zones {
            self.update_zone(zone).await;
        }
    }

    /// Refreshes the Access service token expirations of a single account.
    pub async fn update_account(&self, account_id: &str) {
        let tokens = match self.api.access_service_tokens(account_id).await {
            Ok(tokens) => tokens,
            Err(err) => {
                error!(account_id, %err, "failed to list access service tokens");
                return;
            }
        };

        let expirations = tokens
            .into_iter()
            .map(|token| (token.name, token.expires_at.timestamp() as f64))
            .collect::<HashMap<_, _>>();

        let labels = LabelSet::from_pairs([("account_id", account_id)]);
        self.registry.set_gauge_by_label(
            "access_service_token_expiration",
            "The current unix timestamp at which a service token expires",
            &labels,
            "token_name",
            &expirations,
        );
    }

    /// Refreshes the analytics gauges of a single zone.
    pub async fn update_zone(&self, zone_name: &str) {
        let zone_id = match self.api.zone_id_by_name(zone_name).await {
            Ok(zone_id) => zone_id,
            Err(err) => {
                error!(zone_name, %err, "failed to resolve zone id");
                return;
            }
        };

        let since = match lookback_start(&self.since) {
            Ok(since) => since,
            Err(err) => {
                error!(since = %self.since, %err, "failed to parse analytics lookback duration");
                return;
            }
        };

        let analytics = match self.api.zone_analytics_dashboard(&zone_id, since).await {
            Ok(analytics) => analytics,
            Err(err) => {
                error!(zone_name, %zone_id, %err, "failed to fetch zone analytics dashboard");
                return;
            }
        };

        let labels =
            LabelSet::from_pairs([("zone_id", zone_id.as_str()), ("zone_name", zone_name)]);
        let totals = &analytics.totals;

        self.set_zone_gauge(
            "cloudflare_requests_rate",
            "Total number of requests over the last 24h",
            &labels,
            totals.requests.all,
        );
        self.set_zone_gauge(
            "cloudflare_requests_cached_rate",
            "Total number of cached requests over the last 24h",
            &labels,
            totals.requests.cached,
        );
        self.set_zone_gauge(
            "cloudflare_requests_uncached_rate",
            "Total number of uncached requests over the last 24h",
            &labels,
            totals.requests.uncached,
        );
        self.set_zone_gauge_by_label(
            "cloudflare_requests_content_type_rate",
            "Total number of requests over the last 24h by response Content-Type header",
            &labels,
            "content_type",
            &totals.requests.content_type,
        );
        self.set_zone_gauge_by_label(
            "cloudflare_requests_country_rate",
            "Total number of requests over the last 24h by request country",
            &labels,
            "country",
            &totals.requests.country,
        );
        self.set_zone_gauge(
            "cloudflare_requests_encrypted_rate",
            "Total number of encrypted requests over the last 24h",
            &labels,
            totals.requests.ssl.encrypted,
        );
        self.set_zone_gauge(
            "cloudflare_requests_unencrypted_rate",
            "Total number of unencrypted requests over the last 24h",
            &labels,
            totals.requests.ssl.unencrypted,
        );
        self.set_zone_gauge_by_label(
            "cloudflare_requests_status_rate",
            "Total number of requests over the last 24h by response code",
            &labels,
            "status",
            &totals.requests.http_status,
        );

        self.set_zone_gauge(
            "cloudflare_bandwidth_bytes_rate",
            "Total bandwidth over the last 24h",
            &labels,
            totals.bandwidth.all,
        );
        self.set_zone_gauge(
            "cloudflare_bandwidth_cached_bytes_rate",
            "Total cached bandwidth over the last 24h",
            &labels,
            totals.bandwidth.cached,
        );
        self.set_zone_gauge(
            "cloudflare_bandwidth_uncached_bytes_rate",
            "Total uncached bandwidth over the last 24h",
            &labels,
            totals.bandwidth.uncached,
        );
        self.set_zone_gauge_by_label(
            "cloudflare_bandwidth_content_type_bytes_rate",
            "Total bandwidth over the last 24h by response Content-Type header",
            &labels,
            "content_type",
            &totals.bandwidth.content_type,
        );
        self.set_zone_gauge_by_label(
            "cloudflare_bandwidth_country_bytes_rate",
            "Total bandwidth over the last 24h by request country",
            &labels,
            "country",
            &totals.bandwidth.country,
        );
        self.set_zone_gauge(
            "cloudflare_bandwidth_encrypted_bytes_rate",
            "Total encrypted bandwidth over the last 24h",
            &labels,
            totals.bandwidth.ssl.encrypted,
        );
        self.set_zone_gauge(
            "cloudflare_bandwidth_unencrypted_bytes_rate",
            "Total unencrypted bandwidth over the last 24h",
            &labels,
            totals.bandwidth.ssl.unencrypted,
        );

        self.set_zone_gauge(
            "cloudflare_threats_rate",
            "Total mitigated threats over the last 24h",
            &labels,
            totals.threats.all,
        );
        self.set_zone_gauge_by_label(
            "cloudflare_threats_country_rate",
            "Total mitigated threats over the last 24h by request country",
            &labels,
            "country",
            &totals.threats.country,
        );
        self.set_zone_gauge_by_label(
            "cloudflare_threats_type_rate",
            "Total mitigated threats over the last 24h by type",
            &labels,
            "type",
            &totals.threats.threat_type,
        );

        self.set_zone_gauge(
            "cloudflare_pageviews_rate",
            "Total page views over the last 24h",
            &labels,
            totals.pageviews.all,
        );
        self.set_zone_gauge_by_label(
            "cloudflare_pageviews_search_engine_rate",
            "Total page views over the last 24h by search engine",
            &labels,
            "search_engine",
            &totals.pageviews.search_engines,
        );

        self.set_zone_gauge(
            "cloudflare_uniques_rate",
            "Total unique visitors over the last 24h",
            &labels,
            totals.uniques.all,
        );
    }

    fn set_zone_gauge(&self, name: &str, help: &str, labels: &LabelSet, value: f64) {
        let name = format!("{}{}", name, self.since);
        self.registry.set_gauge(&name, help, labels, value);
    }

    fn set_zone_gauge_by_label(
        &self,
        name: &str,
        help: &str,
        labels: &LabelSet,
        label_key: &str,
        values: &HashMap<String, f64>,
    ) {
        let name = format!("{}{}", name, self.since);
        self.registry.set_gauge_by_label(&name, help, labels, label_key, values);
    }
}

/// Turns a lookback window like `24h` into the matching start time.
fn lookback_start(since: &str) -> Result<DateTime<Utc>, String> {
    let lookback = humantime::parse_duration(since).map_err(|err| err.to_string())?;
    let lookback = chrono::Duration::from_std(lookback).map_err(|err| err.to_string())?;
    Utc::now()
        .checked_sub_signed(lookback)
        .ok_or_else(|| "lookback window starts before representable time".to_string())
}

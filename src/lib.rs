//! A Prometheus exporter for Cloudflare analytics.
//!
//! ## Basics
//!
//! `cloudflare-exporter` periodically pulls zone analytics, and optionally Access service
//! token metadata, from the Cloudflare v4 HTTP API, and re-exposes the aggregate values as
//! Prometheus gauges on a scrapeable HTTP endpoint.
//!
//! The pieces compose the same way the exporter binary wires them together:
//!
//! - [`CloudflareClient`] talks to the Cloudflare API: request construction, authentication
//!   headers, and response envelope decoding.
//! - [`Registry`] holds the gauges: it lazily creates an [`Instrument`] per metric name and
//!   stores one value per label tuple, overwriting on every update.
//! - [`Collector`] maps API payloads onto the registry, labelling zone metrics with
//!   `zone_id`/`zone_name` and token expirations with `account_id`/`token_name`.
//! - [`new_http_listener`] serves the rendered exposition format over HTTP.
//!
//! ## Running
//!
//! The binary reads credentials from the environment and everything else from flags:
//!
//! ```text
//! CLOUDFLARE_TOKEN=... cloudflare-exporter \
//!     --cloudflare.zones example.com,example.org \
//!     --web.listen-addr 127.0.0.1:9199
//! ```
//!
//! Metrics are then available at `http://127.0.0.1:9199/metrics`, and a liveness probe at
//! `http://127.0.0.1:9199/health`.
//!
//! ## Authentication
//!
//! Three authentication methods are supported, checked in order: an email/API key pair
//! (`--cloudflare.email` plus `CLOUDFLARE_KEY`), an API token (`CLOUDFLARE_TOKEN`), and a
//! user service key (`CLOUDFLARE_USER_SERVICE_KEY`).
#![deny(missing_docs)]
#![cfg_attr(docsrs, feature(doc_cfg), deny(rustdoc::broken_intra_doc_links))]

mod common;
pub use self::common::{BuildError, LabelSet};

pub mod formatting;

mod registry;
pub use self::registry::{Instrument, Registry, ScrapeHandle};

mod client;
pub use self::client::{
    AccessServiceToken, ApiError, BandwidthTotals, CloudflareClient, PageviewTotals,
    RequestTotals, SslTotals, ThreatTotals, UniqueTotals, ZoneAnalytics, ZoneTotals,
};

mod collector;
pub use self::collector::{CloudflareApi, Collector};

mod config;
pub use self::config::{opts, Auth, ConfigError, ExporterConfig, RawConfig};

mod exporter;
pub use self::exporter::{new_http_listener, ExporterError, ExporterFuture};

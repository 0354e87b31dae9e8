use std::env;
use std::net::SocketAddr;

use getopts::{Matches, Options};
use thiserror::Error;

const DEFAULT_SINCE: &str = "24h";
const DEFAULT_LISTEN_ADDR: &str = "127.0.0.1:9199";

/// Errors that could occur while assembling the exporter configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// No zones were configured.
    #[error("no Cloudflare zones provided, please set CLOUDFLARE_ZONES or pass in --cloudflare.zones")]
    MissingZones,

    /// Access metrics were enabled without configuring any accounts.
    #[error("no Cloudflare accounts provided, needed in order to display access-related metrics, please set CLOUDFLARE_ACCOUNTS or pass in --cloudflare.accounts")]
    MissingAccounts,

    /// None of the supported authentication methods were configured.
    #[error("no Cloudflare authentication method provided")]
    MissingAuth,

    /// The listen address could not be parsed as a socket address.
    #[error("invalid listen address `{addr}`: {reason}")]
    InvalidListenAddr {
        /// The address as supplied.
        addr: String,
        /// Why it failed to parse.
        reason: String,
    },
}

/// A Cloudflare API authentication method.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Auth {
    /// Email plus API key authentication, sent as the `X-Auth-Email` and `X-Auth-Key` headers.
    Email {
        /// The account email address.
        email: String,
        /// The API key.
        key: String,
    },
    /// API token authentication, sent as an `Authorization: Bearer` header.
    Token(String),
    /// User service key authentication, sent as the `X-Auth-User-Service-Key` header.
    UserServiceKey(String),
}

/// The raw, unvalidated configuration surface: command line flags and environment variables.
///
/// Credentials are only ever read from the environment. Everything else can come from either
/// source, with flags taking precedence over their environment fallbacks.
#[derive(Clone, Debug)]
pub struct RawConfig {
    /// Email for email/key authentication, from `--cloudflare.email` or `CLOUDFLARE_EMAIL`.
    pub email: String,
    /// API key for email/key authentication, from `CLOUDFLARE_KEY`.
    pub key: String,
    /// API token, from `CLOUDFLARE_TOKEN`.
    pub token: String,
    /// User service key, from `CLOUDFLARE_USER_SERVICE_KEY`.
    pub user_service_key: String,
    /// Comma-separated zone names, from `--cloudflare.zones` or `CLOUDFLARE_ZONES`.
    pub zones: String,
    /// Comma-separated account ids, from `--cloudflare.accounts` or `CLOUDFLARE_ACCOUNTS`.
    pub accounts: String,
    /// Analytics lookback window, from `--cloudflare.since` or
    /// `CLOUDFLARE_SCRAPE_ANALYTICS_SINCE`.
    pub since: String,
    /// Whether to pull Access service token metrics, from `--cloudflare.include-access`.
    pub include_access: bool,
    /// Address for the scrape endpoint, from `--web.listen-addr` or `EXPORTER_LISTEN_ADDR`.
    pub listen_addr: String,
}

impl RawConfig {
    /// Reads the configuration from parsed command line flags and the environment.
    ///
    /// The three credential values have no flag form and are only read from the environment.
    /// An environment variable that is set but empty is treated as unset.
    pub fn from_matches(matches: &Matches) -> Self {
        Self {
            email: flag_or_env(matches, "cloudflare.email", "CLOUDFLARE_EMAIL", ""),
            key: env_string("CLOUDFLARE_KEY", ""),
            token: env_string("CLOUDFLARE_TOKEN", ""),
            user_service_key: env_string("CLOUDFLARE_USER_SERVICE_KEY", ""),
            zones: flag_or_env(matches, "cloudflare.zones", "CLOUDFLARE_ZONES", ""),
            accounts: flag_or_env(matches, "cloudflare.accounts", "CLOUDFLARE_ACCOUNTS", ""),
            since: flag_or_env(
                matches,
                "cloudflare.since",
                "CLOUDFLARE_SCRAPE_ANALYTICS_SINCE",
                DEFAULT_SINCE,
            ),
            include_access: matches.opt_present("cloudflare.include-access"),
            listen_addr: flag_or_env(
                matches,
                "web.listen-addr",
                "EXPORTER_LISTEN_ADDR",
                DEFAULT_LISTEN_ADDR,
            ),
        }
    }
}

impl Default for RawConfig {
    fn default() -> Self {
        Self {
            email: String::new(),
            key: String::new(),
            token: String::new(),
            user_service_key: String::new(),
            zones: String::new(),
            accounts: String::new(),
            since: DEFAULT_SINCE.to_string(),
            include_access: false,
            listen_addr: DEFAULT_LISTEN_ADDR.to_string(),
        }
    }
}

/// The validated exporter configuration.
#[derive(Clone, Debug)]
pub struct ExporterConfig {
    /// The authentication method to use against the Cloudflare API.
    pub auth: Auth,
    /// Zone names to pull analytics for.
    pub zones: Vec<String>,
    /// Account ids to pull Access service token metadata for.
    pub accounts: Vec<String>,
    /// Analytics lookback window, e.g. `24h`.
    pub since: String,
    /// Whether Access service token metrics are pulled at all.
    pub include_access: bool,
    /// Address the scrape endpoint binds to.
    pub listen_addr: SocketAddr,
}

impl ExporterConfig {
    /// Validates a [`RawConfig`] into a usable configuration.
    ///
    /// Zones must be present, accounts must be present when Access metrics are enabled, and
    /// at least one authentication method must be configured. When several authentication
    /// methods are configured at once, email/key wins over token, which wins over the user
    /// service key.
    pub fn from_raw(raw: RawConfig) -> Result<Self, ConfigError> {
        if raw.zones.is_empty() {
            return Err(ConfigError::MissingZones);
        }

        if raw.include_access && raw.accounts.is_empty() {
            return Err(ConfigError::MissingAccounts);
        }

        let auth = if !raw.email.is_empty() && !raw.key.is_empty() {
            Auth::Email { email: raw.email, key: raw.key }
        } else if !raw.token.is_empty() {
            Auth::Token(raw.token)
        } else if !raw.user_service_key.is_empty() {
            Auth::UserServiceKey(raw.user_service_key)
        } else {
            return Err(ConfigError::MissingAuth);
        };

        let listen_addr = raw.listen_addr.parse::<SocketAddr>().map_err(|e| {
            ConfigError::InvalidListenAddr { addr: raw.listen_addr.clone(), reason: e.to_string() }
        })?;

        Ok(Self {
            auth,
            zones: split_list(&raw.zones),
            accounts: split_list(&raw.accounts),
            since: raw.since,
            include_access: raw.include_access,
            listen_addr,
        })
    }
}

/// Builds the command line options understood by the exporter binary.
pub fn opts() -> Options {
    let mut opts = Options::new();
    opts.optopt(
        "",
        "cloudflare.email",
        "email used for Cloudflare API email authentication, env: CLOUDFLARE_EMAIL",
        "EMAIL",
    );
    opts.optopt(
        "",
        "cloudflare.zones",
        "(required) comma-separated list of zone names to scrape for metrics (e.g. 'example.com,example.org'), env: CLOUDFLARE_ZONES",
        "ZONES",
    );
    opts.optopt(
        "",
        "cloudflare.accounts",
        "comma-separated list of account ids to scrape for metrics (e.g. '123548648,123548644868'), env: CLOUDFLARE_ACCOUNTS",
        "ACCOUNTS",
    );
    opts.optopt(
        "",
        "cloudflare.since",
        "`since` parameter of calls to the Cloudflare Analytics API ('Free' tenants have a minimum of 24h), env: CLOUDFLARE_SCRAPE_ANALYTICS_SINCE",
        "DURATION",
    );
    opts.optflag("", "cloudflare.include-access", "enable access-related metrics");
    opts.optopt(
        "",
        "web.listen-addr",
        "address for the exporter to bind to, env: EXPORTER_LISTEN_ADDR",
        "ADDR",
    );
    opts.optflag("h", "help", "print this help menu");
    opts
}

fn flag_or_env(matches: &Matches, flag: &str, env_key: &str, fallback: &str) -> String {
    matches.opt_str(flag).unwrap_or_else(|| env_string(env_key, fallback))
}

// A variable that is set but empty counts as unset, so empty values never shadow defaults.
fn env_string(key: &str, fallback: &str) -> String {
    match env::var(key) {
        Ok(value) if !value.is_empty() => value,
        _ => fallback.to_string(),
    }
}

fn split_list(value: &str) -> Vec<String> {
    value
        .replace(' ', "")
        .split(',')
        .filter(|entry| !entry.is_empty())
        .map(str::to_string)
        .collect()
}

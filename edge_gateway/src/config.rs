use std::{env, fs, time::Duration};

use log::*;
use url::Url;

use crate::{
    errors::GatewayError,
    helpers::ForwardingOptions,
    policy::AccessPolicy,
    route_table::{RewriteRule, Route, RouteTable},
};

const DEFAULT_EGW_HOST: &str = "127.0.0.1";
const DEFAULT_EGW_PORT: u16 = 8080;
const DEFAULT_IDENTITY_URL: &str = "http://127.0.0.1:8081/api/auth/me";
const DEFAULT_IDENTITY_TIMEOUT: Duration = Duration::from_millis(3_000);
const DEFAULT_AUTH_PREFIX: &str = "/api/auth";
const DEFAULT_API_PREFIX: &str = "/api";
const DEFAULT_HEALTH_PATH: &str = "/health";
const DEFAULT_MAX_BODY_SIZE: usize = 10 * 1024 * 1024;

/// The services behind the gateway in the reference deployment. Backends serve their full `/api/<service>` path.
const DEFAULT_ROUTES: [(&str, &str); 9] = [
    ("/api/auth", "http://127.0.0.1:8081"),
    ("/api/users", "http://127.0.0.1:8082"),
    ("/api/products", "http://127.0.0.1:8083"),
    ("/api/cart", "http://127.0.0.1:8084"),
    ("/api/orders", "http://127.0.0.1:8085"),
    ("/api/inventory", "http://127.0.0.1:8086"),
    ("/api/payments", "http://127.0.0.1:8087"),
    ("/api/notifications", "http://127.0.0.1:8088"),
    ("/api/admin", "http://127.0.0.1:8089"),
];

#[derive(Clone, Debug)]
pub struct GatewayConfig {
    pub host: String,
    pub port: u16,
    pub routes: RouteTable,
    pub identity: IdentityConfig,
    /// Requests under this prefix are always allowed. It should be where the identity authority is routed.
    pub auth_prefix: String,
    /// Mutating requests under this prefix need a resolved identity.
    pub api_prefix: String,
    /// Served by the gateway itself, never forwarded.
    pub health_path: String,
    /// The largest request body the gateway will buffer before forwarding.
    pub max_body_size: usize,
    /// If true, the inbound X-Forwarded-For chain is kept and extended, rather than replaced by the peer address.
    pub use_x_forwarded_for: bool,
    /// If true, `for=` entries of the inbound Forwarded header seed the outbound X-Forwarded-For chain.
    pub use_forwarded: bool,
    /// Allow any origin, header and method for cross-origin requests.
    pub cors_permissive: bool,
}

#[derive(Clone, Debug)]
pub struct IdentityConfig {
    /// The authority's "whoami" endpoint.
    pub whoami_url: Url,
    /// How long to wait for the authority before treating the caller as anonymous.
    pub timeout: Duration,
}

impl Default for IdentityConfig {
    fn default() -> Self {
        Self { whoami_url: default_identity_url(), timeout: DEFAULT_IDENTITY_TIMEOUT }
    }
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            host: DEFAULT_EGW_HOST.to_string(),
            port: DEFAULT_EGW_PORT,
            routes: default_route_table(),
            identity: IdentityConfig::default(),
            auth_prefix: DEFAULT_AUTH_PREFIX.to_string(),
            api_prefix: DEFAULT_API_PREFIX.to_string(),
            health_path: DEFAULT_HEALTH_PATH.to_string(),
            max_body_size: DEFAULT_MAX_BODY_SIZE,
            use_x_forwarded_for: false,
            use_forwarded: false,
            cors_permissive: true,
        }
    }
}

impl GatewayConfig {
    pub fn new(host: &str, port: u16, routes: RouteTable) -> Self {
        Self { host: host.to_string(), port, routes, ..Default::default() }
    }

    /// Reads the configuration from `EGW_*` environment variables. Bad values fall back to their defaults with a
    /// warning, except for the route table: a route table that fails validation is an error.
    pub fn from_env_or_default() -> Result<Self, GatewayError> {
        let host = env::var("EGW_HOST").ok().unwrap_or_else(|| DEFAULT_EGW_HOST.into());
        let port = env::var("EGW_PORT")
            .map(|s| {
                s.parse::<u16>().unwrap_or_else(|e| {
                    error!(
                        "🪛️ {s} is not a valid port for EGW_PORT. {e} Using the default, {DEFAULT_EGW_PORT}, instead."
                    );
                    DEFAULT_EGW_PORT
                })
            })
            .ok()
            .unwrap_or(DEFAULT_EGW_PORT);
        let routes = load_route_table()?;
        let identity = IdentityConfig::from_env_or_default();
        let auth_prefix = path_from_env("EGW_AUTH_PREFIX", DEFAULT_AUTH_PREFIX);
        let api_prefix = path_from_env("EGW_API_PREFIX", DEFAULT_API_PREFIX);
        let health_path = path_from_env("EGW_HEALTH_PATH", DEFAULT_HEALTH_PATH);
        let max_body_size = env::var("EGW_MAX_BODY_SIZE")
            .ok()
            .and_then(|s| {
                s.parse::<usize>()
                    .map_err(|e| warn!("🪛️ Invalid configuration value for EGW_MAX_BODY_SIZE. {e}"))
                    .ok()
            })
            .unwrap_or(DEFAULT_MAX_BODY_SIZE);
        let use_x_forwarded_for = flag_from_env("EGW_USE_X_FORWARDED_FOR", false);
        let use_forwarded = flag_from_env("EGW_USE_FORWARDED", false);
        let cors_permissive = flag_from_env("EGW_CORS_PERMISSIVE", true);
        if routes.match_path(&auth_prefix).is_none() {
            warn!("🪛️ No route covers the auth prefix {auth_prefix}. Callers will not be able to log in through the gateway.");
        }
        Ok(Self {
            host,
            port,
            routes,
            identity,
            auth_prefix,
            api_prefix,
            health_path,
            max_body_size,
            use_x_forwarded_for,
            use_forwarded,
            cors_permissive,
        })
    }

    pub fn access_policy(&self) -> AccessPolicy {
        AccessPolicy::new(&self.auth_prefix, &self.api_prefix, &self.health_path)
    }

    pub fn forwarding_options(&self) -> ForwardingOptions {
        ForwardingOptions { use_x_forwarded_for: self.use_x_forwarded_for, use_forwarded: self.use_forwarded }
    }
}

impl IdentityConfig {
    pub fn from_env_or_default() -> Self {
        let whoami_url = env::var("EGW_IDENTITY_URL")
            .map_err(|_| {
                info!("🪛️ EGW_IDENTITY_URL is not set. Using the default value of {DEFAULT_IDENTITY_URL}.");
            })
            .and_then(|s| {
                Url::parse(&s).map_err(|e| {
                    error!("🪛️ {s} is not a valid URL for EGW_IDENTITY_URL. {e} Using {DEFAULT_IDENTITY_URL} instead.")
                })
            })
            .unwrap_or_else(|_| default_identity_url());
        let timeout = env::var("EGW_IDENTITY_TIMEOUT_MS")
            .ok()
            .and_then(|s| {
                s.parse::<u64>()
                    .map(Duration::from_millis)
                    .map_err(|e| warn!("🪛️ Invalid configuration value for EGW_IDENTITY_TIMEOUT_MS. {e}"))
                    .ok()
            })
            .unwrap_or(DEFAULT_IDENTITY_TIMEOUT);
        Self { whoami_url, timeout }
    }
}

/// `EGW_ROUTES_FILE` wins over `EGW_ROUTES`. If neither is set, the built-in table is used.
fn load_route_table() -> Result<RouteTable, GatewayError> {
    if let Ok(path) = env::var("EGW_ROUTES_FILE") {
        info!("🪛️ Loading routes from {path}");
        let json = fs::read_to_string(&path)
            .map_err(|e| GatewayError::ConfigurationError(format!("Could not read {path} [EGW_ROUTES_FILE]. {e}")))?;
        return Ok(RouteTable::from_json(&json)?);
    }
    match env::var("EGW_ROUTES") {
        Ok(s) => Ok(RouteTable::from_inline(&s)?),
        Err(_) => {
            info!("🪛️ Neither EGW_ROUTES_FILE nor EGW_ROUTES is set. Using the built-in route table.");
            Ok(default_route_table())
        },
    }
}

pub fn default_route_table() -> RouteTable {
    let routes = DEFAULT_ROUTES
        .iter()
        .filter_map(|(prefix, origin)| {
            Route::new(prefix, origin, RewriteRule::Keep)
                .map_err(|e| error!("🪛️ Built-in route {prefix} is invalid. {e}"))
                .ok()
        })
        .collect::<Vec<_>>();
    RouteTable::new(routes).unwrap_or_else(|e| unreachable!("The built-in route table is valid. {e}"))
}

fn default_identity_url() -> Url {
    Url::parse(DEFAULT_IDENTITY_URL).unwrap_or_else(|e| unreachable!("The default identity URL is valid. {e}"))
}

fn flag_from_env(name: &str, default: bool) -> bool {
    match env::var(name).map(|s| s.trim().to_lowercase()) {
        Ok(s) if ["1", "true", "yes", "on"].contains(&s.as_str()) => true,
        Ok(s) if ["0", "false", "no", "off"].contains(&s.as_str()) => false,
        Ok(s) => {
            warn!("🪛️ {s} is not a valid flag for {name}. Using the default, {default}, instead.");
            default
        },
        Err(_) => default,
    }
}

fn path_from_env(name: &str, default: &str) -> String {
    match env::var(name) {
        Ok(s) if s.starts_with('/') => s,
        Ok(s) => {
            warn!("🪛️ {s} is not a valid path for {name}. Paths must start with '/'. Using {default} instead.");
            default.to_string()
        },
        Err(_) => default.to_string(),
    }
}

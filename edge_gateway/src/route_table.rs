//! Static path-prefix routing.
//!
//! The route table is built once at startup and never mutated afterwards. Each [`Route`] maps a path prefix to an
//! upstream origin and carries a [`RewriteRule`] describing how the matched prefix is presented to that origin.
//!
//! Matching is longest-prefix-wins, on path segment boundaries: `/api/orders` matches `/api/orders` and
//! `/api/orders/7`, but not `/api/ordersx`. A prefix of `/` matches every path.
use std::{collections::HashSet, fmt::Display};

use serde::{Deserialize, Serialize};
use url::Url;

use crate::errors::{GatewayError, RouteTableError};

/// How the matched prefix is rewritten before the request is forwarded.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RewriteRule {
    /// Forward the path untouched. Backends serve the full `/api/<service>` path.
    #[default]
    Keep,
    /// Remove the matched prefix, so `/shop/cart` on prefix `/shop` becomes `/cart`.
    StripPrefix,
    /// Swap the matched prefix for another one.
    ReplacePrefix(String),
}

impl Display for RewriteRule {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Keep => write!(f, "keep"),
            Self::StripPrefix => write!(f, "strip_prefix"),
            Self::ReplacePrefix(p) => write!(f, "replace_prefix:{p}"),
        }
    }
}

impl RewriteRule {
    fn parse(s: &str) -> Result<Self, RouteTableError> {
        let s = s.trim();
        match s.to_lowercase().as_str() {
            "" | "keep" => return Ok(Self::Keep),
            "strip" | "strip_prefix" => return Ok(Self::StripPrefix),
            _ => {},
        }
        s.strip_prefix("replace_prefix:")
            .or_else(|| s.strip_prefix("replace:"))
            .map(|p| Self::ReplacePrefix(p.trim().to_string()))
            .ok_or_else(|| RouteTableError::UnknownRewrite(s.to_string()))
    }
}

/// A route as it appears in configuration, before validation.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RouteDefinition {
    pub prefix: String,
    pub origin: String,
    #[serde(default)]
    pub rewrite: RewriteRule,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RouteFile {
    pub routes: Vec<RouteDefinition>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Route {
    prefix: String,
    origin: Url,
    rewrite: RewriteRule,
}

impl Route {
    pub fn new(prefix: &str, origin: &str, rewrite: RewriteRule) -> Result<Self, RouteTableError> {
        if !prefix.starts_with('/') {
            return Err(RouteTableError::InvalidPrefix(prefix.to_string()));
        }
        let prefix = normalize_prefix(prefix);
        let invalid_origin = |reason: String| RouteTableError::InvalidOrigin {
            prefix: prefix.clone(),
            origin: origin.to_string(),
            reason,
        };
        let origin = Url::parse(origin).map_err(|e| invalid_origin(e.to_string()))?;
        if !matches!(origin.scheme(), "http" | "https") {
            return Err(invalid_origin(format!("Unsupported scheme '{}'", origin.scheme())));
        }
        if origin.host_str().is_none() {
            return Err(invalid_origin("Missing host".into()));
        }
        if origin.query().is_some() {
            return Err(invalid_origin("Origins cannot carry a query string".into()));
        }
        let rewrite = match rewrite {
            RewriteRule::ReplacePrefix(p) if !p.starts_with('/') => {
                return Err(RouteTableError::InvalidPrefix(p));
            },
            RewriteRule::ReplacePrefix(p) => RewriteRule::ReplacePrefix(normalize_prefix(&p)),
            r => r,
        };
        Ok(Self { prefix, origin, rewrite })
    }

    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    pub fn origin(&self) -> &Url {
        &self.origin
    }

    pub fn rewrite(&self) -> &RewriteRule {
        &self.rewrite
    }

    pub fn matches(&self, path: &str) -> bool {
        is_under(&self.prefix, path)
    }

    /// Applies this route's rewrite rule to a path that this route matches.
    pub fn rewrite_path(&self, path: &str) -> String {
        let rest = if self.prefix == "/" { path } else { path.get(self.prefix.len()..).unwrap_or_default() };
        let rewritten = match &self.rewrite {
            RewriteRule::Keep => path.to_string(),
            RewriteRule::StripPrefix => rest.to_string(),
            RewriteRule::ReplacePrefix(p) if p == "/" => rest.to_string(),
            RewriteRule::ReplacePrefix(p) => format!("{p}{rest}"),
        };
        if rewritten.starts_with('/') {
            rewritten
        } else {
            format!("/{rewritten}")
        }
    }

    /// The absolute upstream URL for the (already rewritten) path and the inbound query string.
    pub fn target_url(&self, forwarded_path: &str, query: &str) -> String {
        let base = self.origin.as_str().trim_end_matches('/');
        if query.is_empty() {
            format!("{base}{forwarded_path}")
        } else {
            format!("{base}{forwarded_path}?{query}")
        }
    }
}

impl TryFrom<RouteDefinition> for Route {
    type Error = RouteTableError;

    fn try_from(def: RouteDefinition) -> Result<Self, Self::Error> {
        Route::new(&def.prefix, &def.origin, def.rewrite)
    }
}

/// The result of a successful route lookup.
#[derive(Clone, Debug)]
pub struct RouteMatch<'a> {
    pub route: &'a Route,
    pub forwarded_path: String,
}

impl RouteMatch<'_> {
    pub fn target_url(&self, query: &str) -> String {
        self.route.target_url(&self.forwarded_path, query)
    }
}

/// Immutable, validated set of routes, ordered longest prefix first.
#[derive(Clone, Debug)]
pub struct RouteTable {
    routes: Vec<Route>,
}

impl RouteTable {
    pub fn new(routes: Vec<Route>) -> Result<Self, RouteTableError> {
        if routes.is_empty() {
            return Err(RouteTableError::Empty);
        }
        let mut seen = HashSet::new();
        for route in &routes {
            // Two distinct prefixes of equal length can never both match one path, so a tie is always a duplicate.
            if !seen.insert(route.prefix.as_str()) {
                return Err(RouteTableError::DuplicatePrefix(route.prefix.clone()));
            }
        }
        let mut routes = routes;
        routes.sort_by(|a, b| b.prefix.len().cmp(&a.prefix.len()));
        Ok(Self { routes })
    }

    pub fn from_definitions(defs: Vec<RouteDefinition>) -> Result<Self, RouteTableError> {
        let routes = defs.into_iter().map(Route::try_from).collect::<Result<Vec<_>, _>>()?;
        Self::new(routes)
    }

    /// Parses the JSON route file format: `{"routes": [{"prefix": "...", "origin": "...", "rewrite": "keep"}]}`
    pub fn from_json(json: &str) -> Result<Self, RouteTableError> {
        let file: RouteFile =
            serde_json::from_str(json).map_err(|e| RouteTableError::InvalidDefinition(e.to_string()))?;
        Self::from_definitions(file.routes)
    }

    /// Parses the inline format used by `EGW_ROUTES`: comma-separated `prefix=origin[|rewrite]` entries.
    pub fn from_inline(entries: &str) -> Result<Self, RouteTableError> {
        let defs = entries
            .split(',')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(|entry| {
                let (prefix, rest) =
                    entry.split_once('=').ok_or_else(|| RouteTableError::InvalidDefinition(entry.to_string()))?;
                let (origin, rewrite) = match rest.split_once('|') {
                    Some((origin, rewrite)) => (origin, RewriteRule::parse(rewrite)?),
                    None => (rest, RewriteRule::Keep),
                };
                Ok(RouteDefinition { prefix: prefix.trim().to_string(), origin: origin.trim().to_string(), rewrite })
            })
            .collect::<Result<Vec<_>, RouteTableError>>()?;
        Self::from_definitions(defs)
    }

    /// Finds the longest prefix covering `path` and computes the path to forward.
    pub fn match_path(&self, path: &str) -> Option<RouteMatch<'_>> {
        self.routes
            .iter()
            .find(|r| r.matches(path))
            .map(|route| RouteMatch { route, forwarded_path: route.rewrite_path(path) })
    }

    /// The table in route file form, longest prefix first. Loading the result gives back the same table.
    pub fn to_route_file(&self) -> RouteFile {
        let routes = self
            .routes
            .iter()
            .map(|r| RouteDefinition {
                prefix: r.prefix.clone(),
                origin: r.origin.to_string(),
                rewrite: r.rewrite.clone(),
            })
            .collect();
        RouteFile { routes }
    }

    pub fn routes(&self) -> &[Route] {
        &self.routes
    }

    pub fn len(&self) -> usize {
        self.routes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.routes.is_empty()
    }
}

/// Reduces an inbound request path to the one form that routing, access control and forwarding all work from.
///
/// * Escaped unreserved characters are decoded, so `/%61pi` is `/api`. Other escapes are kept, in upper case.
/// * Empty segments are dropped, so `//api//orders` is `/api/orders`. A trailing slash is kept.
///
/// Paths that a backend or URL parser could still resolve differently are refused: `.` and `..` segments in any
/// encoding, escaped `/` or `\`, a raw `\`, and malformed escapes.
pub fn canonical_path(raw: &str) -> Result<String, GatewayError> {
    let invalid = |reason: &str| GatewayError::InvalidRequest(format!("Path '{raw}' {reason}."));
    if !raw.starts_with('/') {
        return Err(invalid("does not start with '/'"));
    }
    let decoded = decode_unreserved(raw).ok_or_else(|| invalid("contains a malformed percent escape"))?;
    if decoded.contains('\\') {
        return Err(invalid("contains a backslash"));
    }
    let mut segments = Vec::new();
    for segment in decoded.split('/').filter(|s| !s.is_empty()) {
        if segment == "." || segment == ".." {
            return Err(invalid("contains a dot segment"));
        }
        if segment.contains("%2F") || segment.contains("%5C") {
            return Err(invalid("contains an escaped separator"));
        }
        segments.push(segment);
    }
    let mut path = format!("/{}", segments.join("/"));
    if decoded.ends_with('/') && !segments.is_empty() {
        path.push('/');
    }
    Ok(path)
}

fn decode_unreserved(raw: &str) -> Option<String> {
    let mut out = String::with_capacity(raw.len());
    let mut rest = raw;
    while let Some(pos) = rest.find('%') {
        out.push_str(&rest[..pos]);
        let hex = rest.get(pos + 1..pos + 3).filter(|h| h.bytes().all(|b| b.is_ascii_hexdigit()))?;
        let byte = u8::from_str_radix(hex, 16).ok()?;
        if byte.is_ascii_alphanumeric() || b"-._~".contains(&byte) {
            out.push(char::from(byte));
        } else {
            out.push('%');
            out.push_str(&hex.to_ascii_uppercase());
        }
        rest = &rest[pos + 3..];
    }
    out.push_str(rest);
    Some(out)
}

/// True if `path` equals `prefix` or lies beneath it on a segment boundary.
pub fn is_under(prefix: &str, path: &str) -> bool {
    let prefix = prefix.trim_end_matches('/');
    if prefix.is_empty() {
        return true;
    }
    path.strip_prefix(prefix).is_some_and(|rest| rest.is_empty() || rest.starts_with('/'))
}

fn normalize_prefix(prefix: &str) -> String {
    let trimmed = prefix.trim().trim_end_matches('/');
    if trimmed.is_empty() {
        "/".to_string()
    } else {
        trimmed.to_string()
    }
}

//! Coarse, method-and-path access control.
//!
//! Rules, first match wins:
//! 1. Anything under the identity authority's namespace, and the health check path, is always allowed.
//! 2. A mutating method (anything but `GET`, `HEAD` or `OPTIONS`) under the API namespace needs a resolved identity.
//! 3. Everything else is allowed.
//!
//! Per-resource checks are the backends' business; they receive the identity headers and can apply their own rules.
use actix_web::http::Method;

use crate::{identity::ResolvedIdentity, route_table::is_under};

/// What a request needs before it may be forwarded. Depends only on method and path, so it can be computed before
/// the identity authority is consulted.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AccessRequirement {
    /// Rule 1. Never depends on identity.
    Exempt,
    /// Rule 2.
    IdentityRequired,
    /// Rule 3.
    Open,
}

impl AccessRequirement {
    pub fn evaluate(self, identity: Option<&ResolvedIdentity>) -> AccessDecision {
        match (self, identity) {
            (Self::IdentityRequired, None) => AccessDecision::Deny,
            _ => AccessDecision::Allow,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AccessDecision {
    Allow,
    Deny,
}

impl AccessDecision {
    pub fn is_allowed(self) -> bool {
        self == Self::Allow
    }
}

#[derive(Clone, Debug)]
pub struct AccessPolicy {
    auth_prefix: String,
    api_prefix: String,
    health_path: String,
}

impl AccessPolicy {
    pub fn new(auth_prefix: &str, api_prefix: &str, health_path: &str) -> Self {
        Self { auth_prefix: auth_prefix.into(), api_prefix: api_prefix.into(), health_path: health_path.into() }
    }

    pub fn requirement(&self, method: &Method, path: &str) -> AccessRequirement {
        if is_under(&self.auth_prefix, path) || path == self.health_path {
            AccessRequirement::Exempt
        } else if !is_read_method(method) && is_under(&self.api_prefix, path) {
            AccessRequirement::IdentityRequired
        } else {
            AccessRequirement::Open
        }
    }

    pub fn decide(&self, method: &Method, path: &str, identity: Option<&ResolvedIdentity>) -> AccessDecision {
        self.requirement(method, path).evaluate(identity)
    }

    pub fn health_path(&self) -> &str {
        &self.health_path
    }
}

impl Default for AccessPolicy {
    fn default() -> Self {
        Self::new("/api/auth", "/api", "/health")
    }
}

pub fn is_read_method(method: &Method) -> bool {
    matches!(*method, Method::GET | Method::HEAD | Method::OPTIONS)
}

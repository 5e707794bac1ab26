//! Caller identity resolution.
//!
//! The gateway does not validate credentials itself. Every request that carries an `Authorization` header is checked
//! against the identity authority's "whoami" endpoint, with no caching, so that revocations take effect immediately.
//! Requests without the header never trigger a call.
//!
//! Resolution never fails the request. Any problem talking to the authority degrades the caller to anonymous, and it
//! is up to the access policy to decide whether anonymous callers may proceed.
use std::{fmt::Debug, time::Duration};

use actix_web::http::header::HeaderValue;
use log::*;
use reqwest::header::{HeaderValue as OutboundHeaderValue, AUTHORIZATION};
use serde::Deserialize;
use url::Url;

use crate::errors::{GatewayError, IdentityError};

pub const X_USER_ID: &str = "X-User-Id";
pub const X_USER_EMAIL: &str = "X-User-Email";
pub const X_USER_ROLE: &str = "X-User-Role";

/// Header names that only the gateway may set. Inbound values are always discarded.
pub const IDENTITY_HEADERS: [&str; 3] = [X_USER_ID, X_USER_EMAIL, X_USER_ROLE];

/// The identity vouched for by the authority. Lives for exactly one request.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ResolvedIdentity {
    pub id: String,
    pub email: String,
    pub role: String,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum IdField {
    Text(String),
    Number(serde_json::Number),
}

#[derive(Deserialize)]
struct WhoamiResponse {
    id: IdField,
    email: String,
    role: String,
}

impl ResolvedIdentity {
    pub fn new<S: Into<String>>(id: S, email: S, role: S) -> Self {
        Self { id: id.into(), email: email.into(), role: role.into() }
    }

    /// Parses the authority's response body. Extra fields are ignored; `id` may be a string or a number.
    pub fn from_json(body: &[u8]) -> Result<Self, IdentityError> {
        let resp: WhoamiResponse = serde_json::from_slice(body).map_err(|e| IdentityError::Malformed(e.to_string()))?;
        let id = match resp.id {
            IdField::Text(s) => s,
            IdField::Number(n) => n.to_string(),
        };
        let identity = Self { id, email: resp.email, role: resp.role };
        identity.validate()?;
        Ok(identity)
    }

    fn validate(&self) -> Result<(), IdentityError> {
        if self.id.trim().is_empty() {
            return Err(IdentityError::Malformed("Identity has an empty id".into()));
        }
        for (name, value) in self.headers() {
            HeaderValue::from_str(value)
                .map_err(|_| IdentityError::Malformed(format!("{name} cannot be carried in a header")))?;
        }
        Ok(())
    }

    /// The trusted identity headers to attach to the outbound request.
    pub fn headers(&self) -> [(&'static str, &str); 3] {
        [(X_USER_ID, self.id.as_str()), (X_USER_EMAIL, self.email.as_str()), (X_USER_ROLE, self.role.as_str())]
    }
}

/// Anything that can turn a raw `Authorization` header value into an identity.
#[allow(async_fn_in_trait)]
pub trait IdentityAuthority {
    /// Ask the authority who owns `authorization`. The value is passed on byte for byte, exactly as received. It need
    /// not be valid UTF-8.
    async fn whoami(&self, authorization: &[u8]) -> Result<ResolvedIdentity, IdentityError>;
}

/// Calls the authority's whoami endpoint over HTTP.
#[derive(Clone, Debug)]
pub struct HttpIdentityAuthority {
    client: reqwest::Client,
    whoami_url: Url,
}

impl HttpIdentityAuthority {
    pub fn new(whoami_url: Url, timeout: Duration) -> Result<Self, GatewayError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| GatewayError::InitializeError(format!("Could not build the identity client. {e}")))?;
        Ok(Self { client, whoami_url })
    }

    pub fn whoami_url(&self) -> &Url {
        &self.whoami_url
    }
}

impl IdentityAuthority for HttpIdentityAuthority {
    async fn whoami(&self, authorization: &[u8]) -> Result<ResolvedIdentity, IdentityError> {
        let credential =
            OutboundHeaderValue::from_bytes(authorization).map_err(|e| IdentityError::InvalidCredential(e.to_string()))?;
        let response = self.client.get(self.whoami_url.clone()).header(AUTHORIZATION, credential).send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(IdentityError::Rejected(status.as_u16()));
        }
        let body = response.bytes().await?;
        ResolvedIdentity::from_json(&body)
    }
}

/// Wraps an [`IdentityAuthority`] and applies the "never fail, degrade to anonymous" rules.
pub struct IdentityResolver<A> {
    authority: A,
}

impl<A: Debug> Debug for IdentityResolver<A> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "IdentityResolver ({:?})", self.authority)
    }
}

impl<A> IdentityResolver<A> {
    pub fn new(authority: A) -> Self {
        Self { authority }
    }
}

impl<A> IdentityResolver<A>
where A: IdentityAuthority
{
    pub async fn resolve(&self, authorization: Option<&[u8]>) -> Option<ResolvedIdentity> {
        let credential = match authorization {
            Some(v) if !v.iter().all(u8::is_ascii_whitespace) => v,
            _ => {
                trace!("🔐️ No credential supplied. Treating caller as anonymous");
                return None;
            },
        };
        match self.authority.whoami(credential).await {
            Ok(identity) => {
                debug!("🔐️ Credential resolved to user {} ({})", identity.id, identity.role);
                Some(identity)
            },
            Err(e @ IdentityError::Rejected(_)) => {
                debug!("🔐️ {e} Treating caller as anonymous");
                None
            },
            Err(e) => {
                warn!("🔐️ Identity resolution failed. {e} Treating caller as anonymous");
                None
            },
        }
    }
}

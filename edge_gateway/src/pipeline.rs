//! The per-request gateway pipeline.
//!
//! Every request that is not served locally runs through the same ordered stages, and the first stage that produces
//! a terminal answer ends the request:
//!
//! 1. **Route match.** The path is first reduced to its canonical form, and an ambiguous path ends the request with
//!    `400`. No matching prefix ends it with `404`. Nothing else is contacted.
//! 2. **Access requirement.** Computed from method and path alone.
//! 3. **Identity resolution.** Only when an `Authorization` header is present; one call to the identity authority.
//!    Failures degrade to anonymous.
//! 4. **Access decision.** A request that needs an identity and has none ends with `401`. The backend is never
//!    contacted for a denied request.
//! 5. **Forward.** The body is read, the outbound request is built and sent, and the backend's answer is relayed.
//!
//! The stages share no mutable state. The route table, policy and clients are read-only for the life of the process.
use actix_web::{http::header::AUTHORIZATION, web, HttpRequest, HttpResponse};
use bytes::{Bytes, BytesMut};
use futures::StreamExt;
use log::*;

use crate::{
    errors::GatewayError,
    helpers::ForwardingOptions,
    identity::{IdentityAuthority, IdentityResolver},
    policy::AccessPolicy,
    proxy::{Forwarder, OutboundRequest},
    route_table::{canonical_path, RouteTable},
};

/// Per-process pipeline settings that are not part of routing or policy.
#[derive(Clone, Copy, Debug)]
pub struct PipelineOptions {
    pub max_body_size: usize,
    pub forwarding: ForwardingOptions,
}

impl Default for PipelineOptions {
    fn default() -> Self {
        Self { max_body_size: 10 * 1024 * 1024, forwarding: ForwardingOptions::default() }
    }
}

/// Route handler for everything that is not served by the gateway itself.
///
/// Web-actix cannot register generic handlers with attribute macros, so this is attached with
/// `default_service(web::to(proxy_request::<A>))`.
pub async fn proxy_request<A>(
    req: HttpRequest,
    payload: web::Payload,
    routes: web::Data<RouteTable>,
    policy: web::Data<AccessPolicy>,
    resolver: web::Data<IdentityResolver<A>>,
    forwarder: web::Data<Forwarder>,
    options: web::Data<PipelineOptions>,
) -> Result<HttpResponse, GatewayError>
where
    A: IdentityAuthority + 'static,
{
    trace!("💻️ {} {}", req.method(), req.path());
    // Every later stage sees this path and only this path. The backend receives it too.
    let path = canonical_path(req.path()).map_err(|e| {
        debug!("💻️ {e}");
        e
    })?;

    let route = routes.match_path(&path).ok_or_else(|| {
        debug!("💻️ No route for {path}");
        GatewayError::NoRoute(path.clone())
    })?;

    let requirement = policy.requirement(req.method(), &path);

    let authorization = req.headers().get(AUTHORIZATION).map(|v| v.as_bytes());
    let identity = resolver.resolve(authorization).await;

    if !requirement.evaluate(identity.as_ref()).is_allowed() {
        debug!("🔐️ Denied anonymous {} {path}", req.method());
        return Err(GatewayError::AccessDenied);
    }

    let body = read_body(payload, options.max_body_size).await?;
    let outbound = OutboundRequest::build(&req, body, &route, identity.as_ref(), options.forwarding)?;
    forwarder.forward(outbound).await
}

async fn read_body(mut payload: web::Payload, limit: usize) -> Result<Bytes, GatewayError> {
    let mut body = BytesMut::new();
    while let Some(chunk) = payload.next().await {
        let chunk = chunk.map_err(|e| GatewayError::InvalidRequest(format!("Could not read request body. {e}")))?;
        if body.len() + chunk.len() > limit {
            return Err(GatewayError::PayloadTooLarge(limit));
        }
        body.extend_from_slice(&chunk);
    }
    Ok(body.freeze())
}

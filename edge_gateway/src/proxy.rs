//! Request forwarding.
//!
//! [`OutboundRequest::build`] turns the inbound request into the request the backend sees: same method, body and
//! headers, with the route's path rewrite applied, hop-by-hop headers dropped, forwarding headers added, and the
//! identity headers replaced by the gateway's own values. Client-supplied `X-User-*` headers are always discarded,
//! whether or not an identity was resolved.
//!
//! [`Forwarder::forward`] sends it and relays the backend's status, headers and body back as they are. The response
//! body is streamed, not buffered. There are no retries and no timeout beyond the transport's defaults. If the caller
//! goes away, actix drops the handler future, which drops the in-flight upstream request with it.
use std::{collections::HashSet, convert::Infallible, time::Duration};

use actix_web::{
    body::{self, SizedStream},
    http::{
        header::{HeaderName as ActixHeaderName, HeaderValue as ActixHeaderValue, CONTENT_LENGTH},
        StatusCode,
    },
    HttpRequest,
    HttpResponse,
};
use bytes::Bytes;
use futures::stream;
use log::*;
use reqwest::{
    header::{HeaderMap, HeaderName, HeaderValue},
    Method,
};

use crate::{
    errors::GatewayError,
    helpers::{forwarded_for_chain, ForwardingOptions},
    identity::{ResolvedIdentity, IDENTITY_HEADERS},
    route_table::RouteMatch,
};

/// Headers that describe a single connection and must not be passed through a proxy.
const HOP_BY_HOP_HEADERS: [&str; 8] =
    ["connection", "keep-alive", "proxy-authenticate", "proxy-authorization", "te", "trailer", "transfer-encoding", "upgrade"];

/// Headers the gateway computes itself for the outbound request.
const RECOMPUTED_HEADERS: [&str; 5] =
    ["host", "content-length", "x-forwarded-for", "x-forwarded-host", "x-forwarded-proto"];

#[derive(Debug)]
pub struct OutboundRequest {
    pub method: Method,
    pub url: String,
    pub headers: HeaderMap,
    pub body: Bytes,
}

impl OutboundRequest {
    pub fn build(
        req: &HttpRequest,
        body: Bytes,
        route: &RouteMatch<'_>,
        identity: Option<&ResolvedIdentity>,
        options: ForwardingOptions,
    ) -> Result<Self, GatewayError> {
        let method = Method::from_bytes(req.method().as_str().as_bytes())
            .map_err(|e| GatewayError::InvalidRequest(format!("Unsupported method. {e}")))?;
        let url = route.target_url(req.query_string());

        let skipped = skipped_headers(req.headers().get_all("connection").filter_map(|v| v.to_str().ok()));
        let mut headers = HeaderMap::with_capacity(req.headers().len() + 6);
        for (name, value) in req.headers().iter() {
            let lower = name.as_str().to_ascii_lowercase();
            if skipped.contains(&lower) || RECOMPUTED_HEADERS.contains(&lower.as_str()) || is_identity_header(&lower) {
                continue;
            }
            let (name, value) = convert_header(name.as_str(), value.as_bytes())?;
            headers.append(name, value);
        }

        if let Some(chain) = forwarded_for_chain(req, options) {
            insert_header(&mut headers, "x-forwarded-for", &chain)?;
        }
        let conn = req.connection_info();
        insert_header(&mut headers, "x-forwarded-host", conn.host())?;
        insert_header(&mut headers, "x-forwarded-proto", conn.scheme())?;

        if let Some(identity) = identity {
            for (name, value) in identity.headers() {
                insert_header(&mut headers, name, value)?;
            }
        }
        Ok(Self { method, url, headers, body })
    }
}

/// Sends outbound requests to backends over a shared, pooled client.
#[derive(Clone, Debug)]
pub struct Forwarder {
    client: reqwest::Client,
}

impl Forwarder {
    pub fn new() -> Result<Self, GatewayError> {
        let client = reqwest::Client::builder()
            .tcp_keepalive(Duration::from_secs(30))
            .pool_idle_timeout(Duration::from_secs(90))
            .redirect(reqwest::redirect::Policy::none())
            .build()
            .map_err(|e| GatewayError::InitializeError(format!("Could not build the upstream client. {e}")))?;
        Ok(Self { client })
    }

    pub async fn forward(&self, outbound: OutboundRequest) -> Result<HttpResponse, GatewayError> {
        let OutboundRequest { method, url, headers, body } = outbound;
        let is_head = method == Method::HEAD;
        trace!("📡️ Forwarding {method} {url}");
        let mut request = self.client.request(method, &url).headers(headers);
        if !body.is_empty() {
            request = request.body(body);
        }
        let response = request.send().await.map_err(|e| {
            error!("📡️ Upstream request to {url} failed. {e}");
            GatewayError::from(e)
        })?;
        debug!("📡️ {url} responded with {}", response.status());
        relay_response(response, is_head)
    }
}

/// Copies the backend's response into an actix response, streaming the body.
///
/// The backend's `Content-Length` is only recomputed when a body is relayed. Answers to `HEAD` and `304` carry the
/// backend's value as sent.
pub fn relay_response(response: reqwest::Response, is_head: bool) -> Result<HttpResponse, GatewayError> {
    let status = StatusCode::from_u16(response.status().as_u16())
        .map_err(|e| GatewayError::BackendUnavailable(format!("Upstream sent an invalid status. {e}")))?;
    let upstream_length = response
        .headers()
        .get(reqwest::header::CONTENT_LENGTH)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.trim().parse::<u64>().ok());
    let mut builder = HttpResponse::build(status);
    let skipped = skipped_headers(response.headers().get_all("connection").iter().filter_map(|v| v.to_str().ok()));
    for (name, value) in response.headers() {
        let lower = name.as_str();
        if skipped.contains(lower) || lower == "content-length" {
            continue;
        }
        let name = ActixHeaderName::from_bytes(lower.as_bytes())
            .map_err(|e| GatewayError::BackendUnavailable(format!("Upstream sent an invalid header. {e}")))?;
        let value = ActixHeaderValue::from_bytes(value.as_bytes())
            .map_err(|e| GatewayError::BackendUnavailable(format!("Upstream sent an invalid header. {e}")))?;
        builder.append_header((name, value));
    }
    if status.is_informational() || status == StatusCode::NO_CONTENT {
        return Ok(builder.finish());
    }
    if status == StatusCode::NOT_MODIFIED {
        if let Some(len) = upstream_length {
            builder.insert_header((CONTENT_LENGTH, len));
        }
        return Ok(builder.finish());
    }
    if is_head {
        // Actix frames the response by the body it is given, so an empty body of the advertised size stands in.
        let res = match upstream_length {
            Some(len) => builder.body(SizedStream::new(len, stream::empty::<Result<Bytes, Infallible>>())),
            None => builder.body(body::None::new()),
        };
        return Ok(res);
    }
    let res = match response.content_length() {
        Some(len) => builder.body(SizedStream::new(len, response.bytes_stream())),
        None => builder.streaming(response.bytes_stream()),
    };
    Ok(res)
}

fn is_identity_header(lower: &str) -> bool {
    IDENTITY_HEADERS.iter().any(|h| h.eq_ignore_ascii_case(lower))
}

/// Hop-by-hop headers, plus any extra header names the `Connection` header lists.
fn skipped_headers<'a, I: Iterator<Item = &'a str>>(connection: I) -> HashSet<String> {
    let mut skipped = HOP_BY_HOP_HEADERS.iter().map(|s| s.to_string()).collect::<HashSet<_>>();
    connection
        .flat_map(|v| v.split(','))
        .map(|s| s.trim().to_ascii_lowercase())
        .filter(|s| !s.is_empty())
        .for_each(|s| {
            skipped.insert(s);
        });
    skipped
}

fn convert_header(name: &str, value: &[u8]) -> Result<(HeaderName, HeaderValue), GatewayError> {
    let name = HeaderName::from_bytes(name.as_bytes())
        .map_err(|e| GatewayError::InvalidRequest(format!("Invalid header name {name}. {e}")))?;
    let value = HeaderValue::from_bytes(value)
        .map_err(|e| GatewayError::InvalidRequest(format!("Invalid value for header {name}. {e}")))?;
    Ok((name, value))
}

fn insert_header(headers: &mut HeaderMap, name: &str, value: &str) -> Result<(), GatewayError> {
    let (name, value) = convert_header(name, value.as_bytes())?;
    headers.insert(name, value);
    Ok(())
}

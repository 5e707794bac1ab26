//! # Edge gateway
//! The single HTTP entry point in front of the storefront's backend services. For every inbound request it:
//! * picks a backend by longest matching path prefix,
//! * asks the identity authority who the caller is, if the request carries an `Authorization` header,
//! * refuses mutating API requests from anonymous callers,
//! * forwards the request with trusted `X-User-Id`, `X-User-Email` and `X-User-Role` headers, and relays the answer.
//!
//! ## Configuration
//! The gateway is configured via environment variables. See [config](config/index.html) for more information.
//!
//! ## Routes
//! The gateway answers these itself:
//! * `/health`: A health check route that returns a 200 OK response. Never consults the identity authority.
//! * `/`: A banner, unless a route covers `/`.
//!
//! Every other path is proxied according to the route table. See [pipeline](pipeline/index.html) for the stages.

pub mod cli;
pub mod config;
pub mod errors;

pub mod helpers;
pub mod identity;
pub mod pipeline;
pub mod policy;
pub mod proxy;
pub mod route_table;
pub mod routes;
pub mod server;

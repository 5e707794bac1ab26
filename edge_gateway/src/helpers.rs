use std::sync::OnceLock;

use actix_web::HttpRequest;
use log::trace;
use regex::Regex;

/// Which inbound forwarding headers may be believed when building the outbound `X-Forwarded-For` chain.
#[derive(Clone, Copy, Debug, Default)]
pub struct ForwardingOptions {
    pub use_x_forwarded_for: bool,
    pub use_forwarded: bool,
}

fn forwarded_for_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r#"(?i)for=("[^"]*"|[^;,\s]+)"#).expect("static regex is valid"))
}

/// Builds the value of the outbound `X-Forwarded-For` header.
///
/// The chain is the list of upstream hops we trust, followed by the address of the peer that connected to us:
/// 1. The inbound `X-Forwarded-For` header, iif `use_x_forwarded_for` is set.
/// 2. Otherwise, the `for=` entries of the inbound `Forwarded` header, iif `use_forwarded` is set.
/// 3. The peer address of this connection, if known.
pub fn forwarded_for_chain(req: &HttpRequest, options: ForwardingOptions) -> Option<String> {
    let mut hops = Vec::new();
    if options.use_x_forwarded_for {
        trace!("Checking X-Forwarded-For header");
        if let Some(v) = req.headers().get("X-Forwarded-For").and_then(|v| v.to_str().ok()) {
            hops.extend(v.split(',').map(str::trim).filter(|s| !s.is_empty()).map(String::from));
        }
    }
    if options.use_forwarded && hops.is_empty() {
        trace!("Checking Forwarded header");
        if let Some(v) = req.headers().get("Forwarded").and_then(|v| v.to_str().ok()) {
            hops.extend(forwarded_for_regex().captures_iter(v).map(|caps| caps[1].trim_matches('"').to_string()));
        }
    }
    if let Some(peer) = req.peer_addr() {
        hops.push(peer.ip().to_string());
    }
    (!hops.is_empty()).then(|| hops.join(", "))
}

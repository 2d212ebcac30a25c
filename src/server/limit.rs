use anyhow::{Result, anyhow};
use axum::body::Body;
use axum::extract::{ConnectInfo, Request};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use governor::middleware::NoOpMiddleware;
use metrics::counter;
use std::net::SocketAddr;
use tower_governor::{
    GovernorLayer, errors::GovernorError, governor::GovernorConfigBuilder,
    key_extractor::KeyExtractor,
};
use tracing::{debug, warn};

/// Headers carrying the client address when running behind a proxy, in order of preference
const CLIENT_IP_HEADERS: [&str; 4] = [
    "X-Forwarded-For",
    "X-Real-IP",
    "CF-Connecting-IP",
    "True-Client-IP",
];

/// Key extractor that identifies a client by proxy headers, then by peer address
#[derive(Debug, Clone, Eq, PartialEq)]
pub struct ClientIpKeyExtractor;

impl KeyExtractor for ClientIpKeyExtractor {
    type Key = String;

    fn extract<B>(&self, req: &Request<B>) -> Result<Self::Key, GovernorError> {
        // Try the proxy headers first
        let forwarded = CLIENT_IP_HEADERS.iter().find_map(|name| {
            req.headers()
                .get(*name)
                .and_then(|h| h.to_str().ok())
                .and_then(|s| s.split(',').next())
                .map(str::trim)
                .filter(|s| !s.is_empty())
        });
        if let Some(ip) = forwarded {
            debug!(ip, "Extracted client address from headers");
            return Ok(ip.to_string());
        }
        // Otherwise use the peer address of the connection
        if let Some(ConnectInfo(addr)) = req.extensions().get::<ConnectInfo<SocketAddr>>() {
            debug!(ip = ?addr.ip(), "Extracted client address from socket");
            return Ok(addr.ip().to_string());
        }
        warn!("Could not identify the client, using the shared default key");
        Ok("unknown".to_string())
    }
}

/// Create a per-client rate limiting layer
pub fn create_rate_limit_layer(
    rps: u32,
    burst: u32,
) -> Result<GovernorLayer<ClientIpKeyExtractor, NoOpMiddleware, Body>> {
    // Output debugging information
    debug!(rps, burst, "Configuring the HTTP rate limiter");
    let config = GovernorConfigBuilder::default()
        .per_second(u64::from(rps))
        .burst_size(burst)
        .key_extractor(ClientIpKeyExtractor)
        .finish()
        .ok_or_else(|| anyhow!("Invalid rate limit: rps and burst must both be above zero"))?;
    Ok(GovernorLayer::new(config).error_handler(|e| {
        warn!("Rate limit exceeded: {e}");
        counter!("supabase_agent.total_errors").increment(1);
        counter!("supabase_agent.total_rate_limit_errors").increment(1);
        (StatusCode::TOO_MANY_REQUESTS, "Rate limit exceeded").into_response()
    }))
}

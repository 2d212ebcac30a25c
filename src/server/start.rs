use anyhow::{Result, anyhow};
use axum::{Router, http::StatusCode, routing::get};
use metrics::counter;
use rmcp::transport::{
    StreamableHttpServerConfig,
    streamable_http_server::{session::local::LocalSessionManager, tower::StreamableHttpService},
};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::net::TcpListener;
use tower_http::trace::TraceLayer;
use tracing::{debug, error, info, warn};

use crate::config::Config;
use crate::management;
use crate::server::limit::create_rate_limit_layer;
use crate::tools::SupabaseService;
use crate::utils::{format_duration, generate_connection_id};

/// Configuration for server startup
#[derive(Clone)]
pub struct ServerConfig {
    pub bind_address: Option<String>,
    pub rate_limit_rps: u32,
    pub rate_limit_burst: u32,
}

/// Start the MCP server based on the provided configuration
pub async fn start_server(server: ServerConfig, config: Arc<Config>) -> Result<()> {
    // Output debugging information
    info!(
        api_url = %config.api_url,
        pooler_host = config.pooler_host.as_deref().unwrap_or("N/A"),
        db_port = config.db_port,
        bind_address = server.bind_address.as_deref().unwrap_or("N/A"),
        rate_limit_rps = server.rate_limit_rps,
        rate_limit_burst = server.rate_limit_burst,
        "Server configuration loaded"
    );
    // The token is checked before any tool is served
    let management = Arc::new(management::Client::new(
        config.api_url.clone(),
        config.access_token()?,
    ));
    match server.bind_address.as_deref() {
        // We are running as a STDIO server
        None => start_stdio_server(management, config).await,
        // We are running as a HTTP server
        Some(bind_address) => start_http_server(&server, bind_address, management, config).await,
    }
}

/// Start the MCP server in stdio mode
async fn start_stdio_server(
    management: Arc<management::Client>,
    config: Arc<Config>,
) -> Result<()> {
    // Output debugging information
    info!("Starting MCP server in stdio mode");
    // Create a new service instance for this connection
    let service = SupabaseService::new(generate_connection_id(), management, config);
    counter!("supabase_agent.total_connections").increment(1);
    // Create an MCP server instance for stdin/stdout
    match rmcp::serve_server(service.clone(), rmcp::transport::stdio()).await {
        Ok(server) => {
            info!(
                connection_id = %service.connection_id,
                "MCP server instance creation succeeded"
            );
            // Wait for the server to complete its work
            let _ = server.waiting().await;
            info!(
                connection_id = %service.connection_id,
                connection_time = %format_duration(Instant::now() - service.connected_at),
                "MCP server completed"
            );
        }
        Err(e) => {
            error!(
                connection_id = %service.connection_id,
                error = %e,
                "MCP server instance creation failed"
            );
            return Err(anyhow!(e));
        }
    }
    Ok(())
}

/// Build the HTTP router serving MCP at `/mcp` and a health check at `/health`
fn build_router(
    server: &ServerConfig,
    management: Arc<management::Client>,
    config: Arc<Config>,
) -> Result<Router> {
    // Create a session manager for the HTTP server
    let session_manager = Arc::new(LocalSessionManager::default());
    // Every MCP session gets its own service and project context
    let mcp_service = StreamableHttpService::new(
        move || {
            counter!("supabase_agent.total_connections").increment(1);
            Ok(SupabaseService::new(
                generate_connection_id(),
                management.clone(),
                config.clone(),
            ))
        },
        session_manager,
        StreamableHttpServerConfig {
            stateful_mode: true,
            ..Default::default()
        },
    );
    // Create rate limiting layer with metrics
    let rate_limit_layer = create_rate_limit_layer(server.rate_limit_rps, server.rate_limit_burst)?;
    // Create tracing layer for request logging
    let trace_layer = TraceLayer::new_for_http()
        .make_span_with(|request: &axum::http::Request<_>| {
            tracing::info_span!(
                "http_request",
                connection_id = %generate_connection_id(),
                method = %request.method(),
                uri = %request.uri(),
            )
        })
        .on_request(|request: &axum::http::Request<_>, _span: &tracing::Span| {
            debug!(
                method = %request.method(),
                uri = %request.uri(),
                "HTTP request started"
            );
        })
        .on_response(
            |response: &axum::http::Response<_>, latency: Duration, _span: &tracing::Span| {
                let status = response.status();
                if status.is_client_error() || status.is_server_error() {
                    warn!(
                        status = %status,
                        latency_ms = latency.as_millis(),
                        "HTTP request failed"
                    );
                } else {
                    info!(
                        status = %status,
                        latency_ms = latency.as_millis(),
                        "HTTP request completed"
                    );
                }
            },
        );
    // The health check sits outside the rate limiter
    let router = Router::new()
        .nest_service("/mcp", mcp_service)
        .layer(rate_limit_layer)
        .route("/health", get(health))
        .layer(trace_layer);
    Ok(router)
}

/// Health check endpoint for load balancer health status checking
async fn health() -> StatusCode {
    StatusCode::OK
}

/// Start the MCP server in HTTP mode
async fn start_http_server(
    server: &ServerConfig,
    bind_address: &str,
    management: Arc<management::Client>,
    config: Arc<Config>,
) -> Result<()> {
    // Output debugging information
    info!(
        bind_address = %bind_address,
        rate_limit_rps = server.rate_limit_rps,
        rate_limit_burst = server.rate_limit_burst,
        "Starting MCP server in HTTP mode with rate limiting"
    );
    // Create a TCP listener for the HTTP server
    let listener = TcpListener::bind(bind_address)
        .await
        .map_err(|e| anyhow!("Failed to bind to address {bind_address}: {e}"))?;
    let router = build_router(server, management, config)?;
    // Serve the router, keeping peer addresses for the rate limiter
    axum::serve(
        listener,
        router.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!("Failed to listen for Ctrl+C: {e}");
        }
        info!("Shutting down the HTTP server");
    })
    .await?;
    // All ok
    Ok(())
}

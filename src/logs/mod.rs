use metrics::counter;
use tracing::info;
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

/// Initialize structured logging and metrics collection
///
/// When stdout belongs to a protocol or an interactive console, logs go to
/// stderr with a quieter default filter.
pub fn init_logging_and_metrics(stderr: bool) {
    if stderr {
        // Set up environment filter for log levels
        let filter = EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| EnvFilter::new("supabase_agent=warn,rmcp=error"));
        // Initialize tracing subscriber with stderr output
        tracing_subscriber::registry()
            .with(filter)
            .with(
                tracing_subscriber::fmt::layer()
                    .with_target(true)
                    .with_writer(std::io::stderr),
            )
            .init();
    } else {
        // Set up environment filter for log levels
        let filter = EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| EnvFilter::new("supabase_agent=info,rmcp=warn"));
        // Initialize tracing subscriber with stdout output
        tracing_subscriber::registry()
            .with(filter)
            .with(
                tracing_subscriber::fmt::layer()
                    .with_target(true)
                    .with_writer(std::io::stdout),
            )
            .init();
    }
    // Output debugging information
    info!("Logging and tracing initialized");
    // Initialize metrics with default values
    counter!("supabase_agent.total_connections").absolute(0);
    counter!("supabase_agent.total_tool_calls").absolute(0);
    counter!("supabase_agent.total_queries").absolute(0);
    counter!("supabase_agent.total_errors").absolute(0);
    counter!("supabase_agent.total_query_errors").absolute(0);
    counter!("supabase_agent.total_rate_limit_errors").absolute(0);
    // Output debugging information
    info!("Metrics collection initialized");
}

mod lifecycle;
mod probe;

pub use lifecycle::run_lifecycle;
pub use probe::{ProbeOptions, run_probe};

use anyhow::Result;
use serde_json::Value;

use crate::config::Config;
use crate::management::Project;

/// Run a blocking terminal prompt without stalling the runtime
async fn prompt<T, F>(ask: F) -> Result<T>
where
    F: FnOnce() -> dialoguer::Result<T> + Send + 'static,
    T: Send + 'static,
{
    Ok(tokio::task::spawn_blocking(ask).await??)
}

fn section(title: &str) {
    println!("\n--- {title} ---");
}

/// A short marker telling usable projects apart from the rest
fn status_marker(status: &str) -> &'static str {
    if status == "ACTIVE_HEALTHY" {
        "[up]"
    } else {
        "[down]"
    }
}

fn project_line(project: &Project) -> String {
    format!(
        "{} {} (ID: {}, Status: {})",
        status_marker(&project.status),
        project.name,
        project.id,
        project.status
    )
}

/// The pooler host for a project in `region`, preferring the configured override
fn pooler_host(config: &Config, region: Option<&str>) -> String {
    match &config.pooler_host {
        Some(host) => {
            println!("Using the configured pooler host: {host}");
            host.clone()
        }
        None => {
            let region = region.unwrap_or(&config.default_region);
            let host = config.pooler_host_for_region(region);
            println!("SUPABASE_POOLER_HOST is not set, using the region template: {host}");
            println!("If the connection fails, set SUPABASE_POOLER_HOST to the host shown in the dashboard");
            host
        }
    }
}

/// Number of rows in a REST response
fn row_count(rows: &Value) -> usize {
    rows.as_array().map_or(0, Vec::len)
}

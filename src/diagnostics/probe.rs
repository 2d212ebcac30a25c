use anyhow::Result;
use std::sync::Arc;
use std::time::Duration;
use tracing::warn;

use super::{pooler_host, section};
use crate::config::{Config, SESSION_POOLER_PORT, TRANSACTION_POOLER_PORT};
use crate::db::{self, DbTarget};
use crate::error::Error;
use crate::management;
use crate::utils::{RetryPolicy, format_duration};

/// User of the direct, non-pooled connection
const DIRECT_USER: &str = "postgres";
const DIRECT_TIMEOUT: Duration = Duration::from_secs(5);
const POOLER_TIMEOUT: Duration = Duration::from_secs(10);

/// Settings for a connection probe
#[derive(Debug, Clone)]
pub struct ProbeOptions {
    pub project_ref: String,
    pub retry: RetryPolicy,
}

/// One connection method to try
#[derive(Debug)]
struct Probe {
    title: &'static str,
    target: DbTarget,
}

/// The direct connection, then the pooler in session and transaction mode
fn probes(config: &Config, project_ref: &str, pooler_host: &str, password: &str) -> Vec<Probe> {
    let target = |host: String, port, user: String, connect_timeout| DbTarget {
        host,
        port,
        user,
        password: password.to_string(),
        dbname: config.db_name.clone(),
        connect_timeout,
    };
    vec![
        Probe {
            title: "Direct connection",
            target: target(
                config.direct_host(project_ref),
                SESSION_POOLER_PORT,
                DIRECT_USER.to_string(),
                DIRECT_TIMEOUT,
            ),
        },
        Probe {
            title: "Pooler session mode",
            target: target(
                pooler_host.to_string(),
                SESSION_POOLER_PORT,
                config.db_user(project_ref),
                POOLER_TIMEOUT,
            ),
        },
        Probe {
            title: "Pooler transaction mode",
            target: target(
                pooler_host.to_string(),
                TRANSACTION_POOLER_PORT,
                config.db_user(project_ref),
                POOLER_TIMEOUT,
            ),
        },
    ]
}

/// Find the region of a project, if the platform knows it
async fn project_region(
    management: &management::Client,
    project_ref: &str,
) -> crate::error::Result<Option<String>> {
    Ok(management
        .list_projects()
        .await?
        .into_iter()
        .find(|p| p.id == project_ref)
        .and_then(|p| p.region))
}

/// Try every connection method against one project and report each outcome
pub async fn run_probe(config: Arc<Config>, options: ProbeOptions) -> Result<()> {
    let password = config.db_password.clone().unwrap_or_default();
    println!(
        "DB_PASSWORD: {}",
        if password.is_empty() { "NOT SET" } else { "SET" }
    );
    println!("Password length: {}", password.chars().count());

    let region = if config.pooler_host.is_some() {
        None
    } else {
        let management = management::Client::new(config.api_url.clone(), config.access_token()?);
        match project_region(&management, &options.project_ref).await {
            Ok(region) => region,
            Err(e) => {
                warn!(project_ref = %options.project_ref, "Could not look up the project region: {e}");
                None
            }
        }
    };
    let host = pooler_host(&config, region.as_deref());

    for (index, probe) in probes(&config, &options.project_ref, &host, &password)
        .iter()
        .enumerate()
    {
        section(&format!(
            "Test {}: {} ({})",
            index + 1,
            probe.title,
            probe.target.label()
        ));
        let outcome = options
            .retry
            .run(
                || db::connect(&probe.target),
                |e: &Error, pause| {
                    println!(
                        "Attempt failed: {e}. Retrying in {}...",
                        format_duration(pause)
                    );
                },
            )
            .await;
        match outcome {
            Ok(_client) => println!("{} succeeded", probe.title),
            Err(e) => println!("Error: {}: {e}", e.code()),
        }
    }
    println!("\n--- End of tests ---");
    Ok(())
}

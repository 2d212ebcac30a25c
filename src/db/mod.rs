use std::time::Duration;
use tokio_postgres::{Client, Config, NoTls};
use tracing::{debug, instrument, warn};

use crate::config;
use crate::error::{Error, Result};
use crate::session::ActiveSession;

/// Where and how to open an admin database connection
#[derive(Clone)]
pub struct DbTarget {
    pub host: String,
    pub port: u16,
    pub user: String,
    pub password: String,
    pub dbname: String,
    pub connect_timeout: Duration,
}

impl DbTarget {
    /// Target the pooler of the active session with the shared admin password
    pub fn for_session(session: &ActiveSession, config: &config::Config) -> Result<Self> {
        Ok(Self {
            host: session.db_host.clone(),
            port: session.db_port,
            user: session.db_user.clone(),
            password: config.db_password()?.to_string(),
            dbname: config.db_name.clone(),
            connect_timeout: config.connect_timeout,
        })
    }

    /// A short `user@host:port` label, safe to log and print
    pub fn label(&self) -> String {
        format!("{}@{}:{}", self.user, self.host, self.port)
    }

    fn pg_config(&self) -> Config {
        let mut pg = Config::new();
        pg.host(&self.host)
            .port(self.port)
            .user(&self.user)
            .password(&self.password)
            .dbname(&self.dbname)
            .connect_timeout(self.connect_timeout);
        pg
    }
}

impl std::fmt::Debug for DbTarget {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DbTarget")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("user", &self.user)
            .field("dbname", &self.dbname)
            .field("connect_timeout", &self.connect_timeout)
            .finish_non_exhaustive()
    }
}

/// Open a new Postgres connection
///
/// The connection driver runs on its own task and stops once the returned
/// client is dropped.
#[instrument(skip(target), fields(target = %target.label()))]
pub async fn connect(target: &DbTarget) -> Result<Client> {
    // Output debugging information
    debug!("Attempting to connect to Postgres");
    let (client, connection) = target
        .pg_config()
        .connect(NoTls)
        .await
        .map_err(|e| Error::connection(describe(&e)))?;
    // Drive the connection until the client goes away
    tokio::spawn(async move {
        if let Err(e) = connection.await {
            warn!("Postgres connection closed with error: {e}");
        }
    });
    // Output debugging information
    debug!("Successfully established Postgres connection");
    Ok(client)
}

/// Render a driver error with its database or I/O cause
fn describe(e: &tokio_postgres::Error) -> String {
    if let Some(db) = e.as_db_error() {
        return format!("{} ({})", db.message(), db.code().code());
    }
    match std::error::Error::source(e) {
        Some(source) => format!("{e}: {source}"),
        None => e.to_string(),
    }
}

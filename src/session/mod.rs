use serde::Serialize;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

use crate::config::Config;
use crate::error::{Error, Result};
use crate::management;
use crate::rest::RestClient;

/// Connection details for the currently selected project
#[derive(Clone, PartialEq, Serialize)]
pub struct ActiveSession {
    pub project_ref: String,
    pub rest_url: String,
    #[serde(skip_serializing)]
    pub anon_key: String,
    #[serde(skip_serializing)]
    pub service_key: String,
    pub db_host: String,
    pub db_user: String,
    pub db_port: u16,
}

impl std::fmt::Debug for ActiveSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ActiveSession")
            .field("project_ref", &self.project_ref)
            .field("rest_url", &self.rest_url)
            .field("db_host", &self.db_host)
            .field("db_user", &self.db_user)
            .field("db_port", &self.db_port)
            .finish_non_exhaustive()
    }
}

/// The selected project together with a REST client bound to its service key
#[derive(Clone)]
struct Selection {
    session: ActiveSession,
    rest: RestClient,
}

/// Tracks which project the tools operate on
///
/// Selecting a project replaces the whole selection in one write, so readers
/// observe either the previous project or the new one, never a mix.
#[derive(Clone)]
pub struct ProjectContext {
    management: Arc<management::Client>,
    config: Arc<Config>,
    selection: Arc<RwLock<Option<Selection>>>,
}

impl ProjectContext {
    /// Create a context with no project selected
    pub fn new(management: Arc<management::Client>, config: Arc<Config>) -> Self {
        Self {
            management,
            config,
            selection: Arc::new(RwLock::new(None)),
        }
    }

    /// Resolve credentials and endpoints for a project and make it active
    pub async fn select_project(&self, project_ref: &str) -> Result<ActiveSession> {
        info!(project_ref, "Selecting project");
        let keys = self.management.get_project_api_keys(project_ref).await?;
        let (Some(anon_key), Some(service_key)) = (keys.get("anon"), keys.get("service_role"))
        else {
            warn!(project_ref, "Project API keys are incomplete");
            return Err(Error::MissingCredentials(format!(
                "could not retrieve the anon and service_role keys of project '{project_ref}'"
            )));
        };
        let rest_url = self.config.project_url(project_ref);
        let db_host = self.resolve_db_host(project_ref).await?;
        let session = ActiveSession {
            project_ref: project_ref.to_string(),
            rest_url: rest_url.clone(),
            anon_key: anon_key.clone(),
            service_key: service_key.clone(),
            db_host,
            db_user: self.config.db_user(project_ref),
            db_port: self.config.db_port,
        };
        let rest = RestClient::new(&rest_url, service_key.clone())?;
        *self.selection.write().await = Some(Selection {
            session: session.clone(),
            rest,
        });
        info!(
            project_ref,
            db_host = %session.db_host,
            db_user = %session.db_user,
            db_port = session.db_port,
            "Project selected"
        );
        Ok(session)
    }

    /// Pick the pooler host: the configured override, or the region template
    async fn resolve_db_host(&self, project_ref: &str) -> Result<String> {
        if let Some(host) = &self.config.pooler_host {
            debug!(project_ref, db_host = %host, "Using configured pooler host");
            return Ok(host.clone());
        }
        let region = self
            .management
            .list_projects()
            .await?
            .into_iter()
            .find(|p| p.id == project_ref)
            .and_then(|p| p.region)
            .unwrap_or_else(|| self.config.default_region.clone());
        let host = self.config.pooler_host_for_region(&region);
        warn!(
            project_ref,
            region = %region,
            db_host = %host,
            "No pooler host configured, using the region template; set SUPABASE_POOLER_HOST if connections fail"
        );
        Ok(host)
    }

    /// Get the active session, failing when no project is selected
    pub async fn require_active_session(&self) -> Result<ActiveSession> {
        self.current().await.ok_or(Error::NoActiveProject)
    }

    /// Get the active session and its REST client from one read of the selection
    pub async fn require_rest(&self) -> Result<(ActiveSession, RestClient)> {
        self.selection
            .read()
            .await
            .as_ref()
            .map(|s| (s.session.clone(), s.rest.clone()))
            .ok_or(Error::NoActiveProject)
    }

    /// The active session, if any
    pub async fn current(&self) -> Option<ActiveSession> {
        self.selection
            .read()
            .await
            .as_ref()
            .map(|s| s.session.clone())
    }
}

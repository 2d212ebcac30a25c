use reqwest::StatusCode;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use tracing::{debug, error, info, trace};

use crate::error::{Error, Result};

/// The plan requested for every new project
const PROJECT_PLAN: &str = "free";

/// A project in the Supabase platform
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Project {
    /// The project reference
    pub id: String,
    pub name: String,
    /// The provisioning status, e.g. `COMING_UP` or `ACTIVE_HEALTHY`
    #[serde(default)]
    pub status: String,
    pub region: Option<String>,
    pub organization_id: Option<String>,
    pub created_at: Option<String>,
}

impl Project {
    /// Check whether the project is provisioned and reachable
    pub fn is_healthy(&self) -> bool {
        self.status == "ACTIVE_HEALTHY"
    }
}

/// The subset of project fields handed to the agent
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ProjectSummary {
    pub id: String,
    pub name: String,
    pub status: String,
    pub region: Option<String>,
}

impl From<&Project> for ProjectSummary {
    fn from(project: &Project) -> Self {
        Self {
            id: project.id.clone(),
            name: project.name.clone(),
            status: project.status.clone(),
            region: project.region.clone(),
        }
    }
}

/// An organization in the Supabase platform
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Organization {
    pub id: String,
    pub name: String,
}

/// An API key entry as returned for a project
#[derive(Debug, Serialize, Deserialize)]
pub struct ApiKey {
    pub name: String,
    pub api_key: Option<String>,
}

/// A request to create a project
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateProjectRequest {
    pub name: String,
    pub organization_id: String,
    pub db_pass: String,
    pub region: String,
    pub plan: String,
}

/// Flatten a list of API keys into a name to key mapping
pub fn flatten_api_keys(keys: Vec<ApiKey>) -> HashMap<String, String> {
    keys.into_iter()
        .filter_map(|key| key.api_key.map(|value| (key.name, value)))
        .collect()
}

/// A client for the Supabase management API
pub struct Client {
    /// The HTTP client
    client: reqwest::Client,
    /// The management API base URL
    base_url: String,
    /// The personal access token
    access_token: String,
}

impl Client {
    /// Create a new management API client
    pub fn new(base_url: impl Into<String>, access_token: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
            access_token: access_token.into(),
        }
    }

    /// Send a GET request to the given path
    async fn get(&self, path: &str) -> Result<reqwest::Response> {
        let request = self
            .client
            .get(format!("{}/{path}", self.base_url))
            .bearer_auth(&self.access_token);
        trace!(path, "Sending GET request to the management API");
        Ok(request.send().await?)
    }

    /// Send a POST request to the given path with the given body
    async fn post<T>(&self, path: &str, body: &T) -> Result<reqwest::Response>
    where
        T: Serialize + ?Sized,
    {
        let request = self
            .client
            .post(format!("{}/{path}", self.base_url))
            .bearer_auth(&self.access_token)
            .json(body);
        trace!(path, "Sending POST request to the management API");
        Ok(request.send().await?)
    }

    /// Send a DELETE request to the given path
    async fn delete(&self, path: &str) -> Result<reqwest::Response> {
        let request = self
            .client
            .delete(format!("{}/{path}", self.base_url))
            .bearer_auth(&self.access_token);
        trace!(path, "Sending DELETE request to the management API");
        Ok(request.send().await?)
    }

    /// List all projects in the account
    pub async fn list_projects(&self) -> Result<Vec<Project>> {
        debug!("Fetching projects from the management API");
        let response = self.get("projects").await?;
        let status = response.status();
        if status != StatusCode::OK {
            let e = response.text().await?;
            error!(status = status.as_u16(), "Failed to fetch projects: {e}");
            return Err(Error::upstream(status, e));
        }
        let result: Vec<Project> = response.json().await?;
        debug!(projects = result.len(), "Successfully fetched projects");
        Ok(result)
    }

    /// Fetch the API keys of a project as a name to key mapping
    pub async fn get_project_api_keys(&self, project_ref: &str) -> Result<HashMap<String, String>> {
        debug!(project_ref, "Fetching API keys for project");
        let response = self.get(&format!("projects/{project_ref}/api-keys")).await?;
        let status = response.status();
        if status != StatusCode::OK {
            let e = response.text().await?;
            error!(
                project_ref,
                status = status.as_u16(),
                "Failed to fetch API keys: {e}"
            );
            return Err(Error::upstream(status, e));
        }
        let keys: Vec<ApiKey> = response.json().await?;
        let result = flatten_api_keys(keys);
        debug!(
            project_ref,
            keys = result.len(),
            "Successfully fetched API keys"
        );
        Ok(result)
    }

    /// List the organizations in the account
    pub async fn get_organizations(&self) -> Result<Vec<Organization>> {
        debug!("Fetching organizations from the management API");
        let response = self.get("organizations").await?;
        let status = response.status();
        if status != StatusCode::OK {
            let e = response.text().await?;
            error!(status = status.as_u16(), "Failed to fetch organizations: {e}");
            return Err(Error::upstream(status, e));
        }
        let result: Vec<Organization> = response.json().await?;
        debug!(
            organizations = result.len(),
            "Successfully fetched organizations"
        );
        Ok(result)
    }

    /// Request a new project; returns as soon as the platform accepts it
    ///
    /// When no organization is given the first organization of the account is
    /// used. The returned project is usually still provisioning.
    pub async fn create_project(
        &self,
        name: &str,
        db_password: &str,
        organization_id: Option<&str>,
        region: &str,
    ) -> Result<Project> {
        let organization_id = match organization_id {
            Some(id) => id.to_string(),
            None => {
                let organization = self
                    .get_organizations()
                    .await?
                    .into_iter()
                    .next()
                    .ok_or(Error::NoOrganization)?;
                info!(
                    organization_id = %organization.id,
                    organization_name = %organization.name,
                    "Using default organization"
                );
                organization.id
            }
        };
        debug!(
            project_name = name,
            organization_id = %organization_id,
            region,
            "Creating project"
        );
        let request = CreateProjectRequest {
            name: name.to_string(),
            organization_id,
            db_pass: db_password.to_string(),
            region: region.to_string(),
            plan: PROJECT_PLAN.to_string(),
        };
        let response = self.post("projects", &request).await?;
        let status = response.status();
        if status != StatusCode::OK && status != StatusCode::CREATED {
            let e = response.text().await?;
            error!(
                project_name = name,
                status = status.as_u16(),
                "Failed to create project: {e}"
            );
            return Err(Error::upstream(status, e));
        }
        let result: Project = response.json().await?;
        info!(
            project_ref = %result.id,
            project_name = %result.name,
            project_status = %result.status,
            "Successfully requested project creation"
        );
        Ok(result)
    }

    /// Delete a project. This cannot be undone.
    pub async fn delete_project(&self, project_ref: &str) -> Result<Value> {
        info!(project_ref, "Deleting project");
        let response = self.delete(&format!("projects/{project_ref}")).await?;
        let status = response.status();
        if !matches!(
            status,
            StatusCode::OK | StatusCode::ACCEPTED | StatusCode::NO_CONTENT
        ) {
            let e = response.text().await?;
            error!(
                project_ref,
                status = status.as_u16(),
                "Failed to delete project: {e}"
            );
            return Err(Error::upstream(status, e));
        }
        let body = response.text().await?;
        info!(project_ref, "Successfully requested project deletion");
        if body.trim().is_empty() {
            return Ok(Value::Null);
        }
        Ok(serde_json::from_str(&body).unwrap_or(Value::String(body)))
    }
}

use reqwest::{Method, RequestBuilder, Url};
use serde_json::Value;
use tracing::{debug, error, trace};

use crate::error::{Error, Result};

/// A client for a project's REST data API, bound to one API key
#[derive(Clone)]
pub struct RestClient {
    /// The HTTP client
    client: reqwest::Client,
    /// The `/rest/v1` endpoint of the project
    endpoint: Url,
    /// The key sent as both `apikey` and bearer token
    api_key: String,
}

impl RestClient {
    /// Create a client for the project served at `project_url`
    pub fn new(project_url: &str, api_key: impl Into<String>) -> Result<Self> {
        let invalid = || Error::invalid_input(format!("invalid project URL '{project_url}'"));
        let mut endpoint = Url::parse(project_url).map_err(|_| invalid())?;
        endpoint
            .path_segments_mut()
            .map_err(|_| invalid())?
            .pop_if_empty()
            .extend(["rest", "v1"]);
        Ok(Self {
            client: reqwest::Client::new(),
            endpoint,
            api_key: api_key.into(),
        })
    }

    /// The URL of a table, which always stays a single path segment
    fn table_url(&self, table: &str) -> Url {
        let mut url = self.endpoint.clone();
        // The endpoint was checked to be a base URL on creation
        if let Ok(mut segments) = url.path_segments_mut() {
            segments.push(table);
        }
        url
    }

    fn request(&self, method: Method, table: &str) -> RequestBuilder {
        trace!(%method, table, "Sending request to the REST data API");
        self.client
            .request(method, self.table_url(table))
            .header("apikey", &self.api_key)
            .bearer_auth(&self.api_key)
    }

    /// Send a request and return the JSON body of a successful response
    async fn send(&self, table: &str, request: RequestBuilder) -> Result<Value> {
        let response = request.send().await?;
        let status = response.status();
        if !status.is_success() {
            let e = response.text().await?;
            error!(table, status = status.as_u16(), "REST request failed: {e}");
            return Err(Error::upstream(status, e));
        }
        let body = response.text().await?;
        if body.trim().is_empty() {
            return Ok(Value::Array(Vec::new()));
        }
        Ok(serde_json::from_str(&body)?)
    }

    /// Select every column of every row in a table
    pub async fn select_all(&self, table: &str) -> Result<Value> {
        debug!(table, "Selecting all rows");
        let request = self.request(Method::GET, table).query(&[("select", "*")]);
        self.send(table, request).await
    }

    /// Insert one record (object) or several (array) and return the inserted rows
    pub async fn insert(&self, table: &str, record: &Value) -> Result<Value> {
        debug!(table, "Inserting rows");
        let request = self
            .request(Method::POST, table)
            .header("Prefer", "return=representation")
            .json(record);
        self.send(table, request).await
    }

    /// Update the rows where `column` equals `value` and return them
    pub async fn update_eq(
        &self,
        table: &str,
        column: &str,
        value: &str,
        patch: &Value,
    ) -> Result<Value> {
        debug!(table, column, "Updating rows");
        let request = self
            .request(Method::PATCH, table)
            .query(&[(column, format!("eq.{value}"))])
            .header("Prefer", "return=representation")
            .json(patch);
        self.send(table, request).await
    }

    /// Delete the rows where `column` equals `value` and return them
    pub async fn delete_eq(&self, table: &str, column: &str, value: &str) -> Result<Value> {
        debug!(table, column, "Deleting rows");
        let request = self
            .request(Method::DELETE, table)
            .query(&[(column, format!("eq.{value}"))])
            .header("Prefer", "return=representation");
        self.send(table, request).await
    }
}

use serde_json::Value;
use std::sync::Arc;
use tracing::{debug, info};

use crate::config::Config;
use crate::db::{self, DbTarget};
use crate::engine::{self, SqlOutcome};
use crate::error::{Error, Result};
use crate::session::ProjectContext;
use crate::utils;

/// Data operations against the active project
///
/// Every operation checks for an active project before doing anything else.
#[derive(Clone)]
pub struct DataAccess {
    context: ProjectContext,
    config: Arc<Config>,
}

impl DataAccess {
    pub fn new(context: ProjectContext, config: Arc<Config>) -> Self {
        Self { context, config }
    }

    /// Select all rows of a table through the REST API
    pub async fn query_table(&self, table: &str) -> Result<Value> {
        let (session, rest) = self.context.require_rest().await?;
        info!(project_ref = %session.project_ref, table, "Querying table");
        rest.select_all(table).await
    }

    /// Insert a record given as JSON text through the REST API
    pub async fn insert_record(&self, table: &str, payload: &str) -> Result<Value> {
        let (session, rest) = self.context.require_rest().await?;
        let record = parse_payload(payload)?;
        info!(project_ref = %session.project_ref, table, "Inserting record");
        rest.insert(table, &record).await
    }

    /// Update the rows where `column` equals `value` with a JSON patch
    pub async fn update_records(
        &self,
        table: &str,
        column: &str,
        value: &str,
        payload: &str,
    ) -> Result<Value> {
        let (session, rest) = self.context.require_rest().await?;
        let patch = parse_payload(payload)?;
        info!(project_ref = %session.project_ref, table, column, "Updating records");
        rest.update_eq(table, column, value, &patch).await
    }

    /// Delete the rows where `column` equals `value`
    pub async fn delete_records(&self, table: &str, column: &str, value: &str) -> Result<Value> {
        let (session, rest) = self.context.require_rest().await?;
        info!(project_ref = %session.project_ref, table, column, "Deleting records");
        rest.delete_eq(table, column, value).await
    }

    /// Run raw SQL over a fresh admin connection to the active project
    pub async fn execute_admin_sql(&self, sql: &str) -> Result<SqlOutcome> {
        let session = self.context.require_active_session().await?;
        let target = DbTarget::for_session(&session, &self.config)?;
        let connection_id = utils::generate_connection_id();
        info!(
            project_ref = %session.project_ref,
            connection_id = %connection_id,
            target = %target.label(),
            "Executing admin SQL through the pooler"
        );
        let client = db::connect(&target).await?;
        let outcome = engine::execute_sql(&client, sql, &connection_id).await;
        // Dropping the client closes the connection
        drop(client);
        debug!(connection_id = %connection_id, "Admin connection closed");
        outcome
    }
}

fn parse_payload(payload: &str) -> Result<Value> {
    serde_json::from_str(payload)
        .map_err(|e| Error::invalid_input(format!("data must be a valid JSON string: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::management;
    use crate::testing::{ACCESS_TOKEN, FakePlatform, RunningPlatform};
    use serde_json::json;

    fn data_access(platform: &RunningPlatform, config: Config) -> (ProjectContext, DataAccess) {
        let config = Arc::new(config);
        let management = Arc::new(management::Client::new(platform.api_url(), ACCESS_TOKEN));
        let context = ProjectContext::new(management, config.clone());
        (context.clone(), DataAccess::new(context, config))
    }

    #[tokio::test]
    async fn test_every_operation_requires_a_project() {
        let platform = FakePlatform::default().spawn().await;
        let config = Config {
            db_password: Some("secret".to_string()),
            ..platform.config()
        };
        let (_, data) = data_access(&platform, config);
        assert!(matches!(
            data.query_table("tabla_prueba").await,
            Err(Error::NoActiveProject)
        ));
        assert!(matches!(
            data.insert_record("tabla_prueba", "not valid json").await,
            Err(Error::NoActiveProject)
        ));
        assert!(matches!(
            data.update_records("tabla_prueba", "id", "1", "{}").await,
            Err(Error::NoActiveProject)
        ));
        assert!(matches!(
            data.delete_records("tabla_prueba", "id", "1").await,
            Err(Error::NoActiveProject)
        ));
        assert!(matches!(
            data.execute_admin_sql("select 1").await,
            Err(Error::NoActiveProject)
        ));
        assert!(platform.rest_requests().is_empty());
    }

    #[tokio::test]
    async fn test_invalid_json_is_rejected_before_any_request() {
        let platform = FakePlatform::default().spawn().await;
        let (context, data) = data_access(&platform, platform.config());
        context.select_project("abc123").await.unwrap();
        let err = data
            .insert_record("tabla_prueba", "not valid json")
            .await
            .unwrap_err();
        assert!(matches!(err, Error::InvalidInput(_)));
        assert!(platform.rest_requests().is_empty());
    }

    #[tokio::test]
    async fn test_rest_operations_use_the_service_key() {
        let platform = FakePlatform::default().spawn().await;
        let (context, data) = data_access(&platform, platform.config());
        context.select_project("abc123").await.unwrap();
        let rows = data.query_table("tabla_prueba").await.unwrap();
        assert_eq!(rows[0]["mensaje"], "hola");
        let inserted = data
            .insert_record("tabla_prueba", r#"{"mensaje": "nuevo"}"#)
            .await
            .unwrap();
        assert_eq!(inserted, json!([{"mensaje": "nuevo"}]));
        let updated = data
            .update_records("tabla_prueba", "id", "1", r#"{"mensaje": "editado"}"#)
            .await
            .unwrap();
        assert_eq!(updated[0]["mensaje"], "editado");
        data.delete_records("tabla_prueba", "id", "1").await.unwrap();
        let requests = platform.rest_requests();
        assert_eq!(requests.len(), 4);
        assert!(
            requests
                .iter()
                .all(|r| r.apikey.as_deref() == Some("service-abc123"))
        );
        assert_eq!(requests[1].body, json!({"mensaje": "nuevo"}));
    }

    #[tokio::test]
    async fn test_admin_sql_requires_password() {
        let platform = FakePlatform::default().spawn().await;
        let (context, data) = data_access(&platform, platform.config());
        context.select_project("abc123").await.unwrap();
        let err = data.execute_admin_sql("select 1").await.unwrap_err();
        assert!(matches!(err, Error::MissingConfig(_)));
    }

    #[tokio::test]
    async fn test_admin_sql_reports_connection_failure() {
        let platform = FakePlatform::default().spawn().await;
        let config = Config {
            db_password: Some("secret".to_string()),
            pooler_host: Some("127.0.0.1".to_string()),
            db_port: 9,
            connect_timeout: std::time::Duration::from_secs(2),
            ..platform.config()
        };
        let (context, data) = data_access(&platform, config);
        context.select_project("abc123").await.unwrap();
        let err = data.execute_admin_sql("select 1").await.unwrap_err();
        assert!(matches!(err, Error::Connection(_)));
    }
}

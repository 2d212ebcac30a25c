use metrics::counter;
use rmcp::{
    ErrorData as McpError, ServerHandler,
    handler::server::{router::tool::ToolRouter, wrapper::Parameters},
    model::{CallToolResult, Content, ServerCapabilities, ServerInfo},
    tool, tool_handler, tool_router,
};
use serde::Deserialize;
use serde::de::DeserializeOwned;
use serde_json::{Value, json};
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info, warn};

use crate::config::Config;
use crate::data::DataAccess;
use crate::error::{self, Error};
use crate::management::{self, ProjectSummary};
use crate::session::ProjectContext;

/// System prompt describing how to use the tools
pub const INSTRUCTIONS: &str = include_str!("../../instructions.md");

#[derive(Deserialize, schemars::JsonSchema)]
pub struct CreateProjectParams {
    #[schemars(description = "The name of the new project. It must be unique in the account.")]
    pub name: String,
    #[schemars(description = "The organization to create the project in. Defaults to the first organization.")]
    pub organization_id: Option<String>,
    #[schemars(description = "The region to create the project in. Defaults to eu-west-1.")]
    pub region: Option<String>,
}

#[derive(Deserialize, schemars::JsonSchema)]
pub struct SelectProjectParams {
    #[schemars(description = "The project reference (its id) as returned by list_projects.")]
    pub project_ref: String,
}

#[derive(Deserialize, schemars::JsonSchema)]
pub struct QueryTableParams {
    #[schemars(description = "The table to read every row from.")]
    pub table: String,
}

#[derive(Deserialize, schemars::JsonSchema)]
pub struct InsertRecordParams {
    #[schemars(description = "The table to insert into.")]
    pub table: String,
    #[schemars(description = "The record as a JSON string, an object or an array of objects.")]
    pub data: String,
}

#[derive(Deserialize, schemars::JsonSchema)]
pub struct AdminSqlParams {
    #[schemars(description = "The SQL to execute. Several statements may be separated by semicolons.")]
    pub sql: String,
}

/// The prefix put in front of a failed tool's message
fn failure_prefix(tool: &str) -> &'static str {
    match tool {
        "list_projects" => "Error listing projects",
        "create_project" => "Error creating project",
        "select_project" => "Error selecting project",
        "active_project" => "Error reading the active project",
        "query_table" => "Error querying table",
        "insert_record" => "Error inserting record",
        "execute_admin_sql" => "Error executing admin SQL",
        _ => "Error",
    }
}

fn parse_arguments<T: DeserializeOwned>(tool: &str, arguments: Value) -> error::Result<T> {
    let arguments = if arguments.is_null() {
        json!({})
    } else {
        arguments
    };
    serde_json::from_value(arguments)
        .map_err(|e| Error::invalid_input(format!("invalid arguments for '{tool}': {e}")))
}

/// The Supabase tool surface shared by the MCP server and the chat agent
#[derive(Clone)]
pub struct SupabaseService {
    /// Connection ID for tracking this client session
    pub connection_id: String,
    /// The management API client
    management: Arc<management::Client>,
    /// Process configuration
    config: Arc<Config>,
    /// The project this session works on
    context: ProjectContext,
    /// Data operations against the selected project
    data: DataAccess,
    /// Timestamp when this session was created
    pub connected_at: Instant,
    /// Router containing all available tools
    tool_router: ToolRouter<Self>,
}

#[tool_router]
impl SupabaseService {
    /// Create a new session with no project selected
    pub fn new(
        connection_id: String,
        management: Arc<management::Client>,
        config: Arc<Config>,
    ) -> Self {
        // Output debugging information
        info!(connection_id = %connection_id, "Creating new client session");
        let context = ProjectContext::new(management.clone(), config.clone());
        let data = DataAccess::new(context.clone(), config.clone());
        Self {
            connection_id,
            management,
            config,
            context,
            data,
            connected_at: Instant::now(),
            tool_router: Self::tool_router(),
        }
    }

    /// Definitions of every tool, as name, description and input schema
    pub fn tool_definitions(&self) -> Vec<Value> {
        self.tool_router
            .list_all()
            .into_iter()
            .filter_map(|tool| serde_json::to_value(tool).ok())
            .collect()
    }

    /// Run a tool by name with JSON arguments
    ///
    /// Failures are rendered with the tool's action prefix, so the caller
    /// always gets text back.
    pub async fn dispatch(&self, tool: &str, arguments: Value) -> Result<String, String> {
        debug!(connection_id = %self.connection_id, tool, "Dispatching tool call");
        let outcome = match tool {
            "list_projects" => self.summarize_projects().await,
            "create_project" => match parse_arguments(tool, arguments) {
                Ok(params) => self.create_new_project(params).await,
                Err(e) => Err(e),
            },
            "select_project" => match parse_arguments(tool, arguments) {
                Ok(params) => self.select(params).await,
                Err(e) => Err(e),
            },
            "active_project" => self.describe_active_project().await,
            "query_table" => match parse_arguments(tool, arguments) {
                Ok(params) => self.read_table(params).await,
                Err(e) => Err(e),
            },
            "insert_record" => match parse_arguments(tool, arguments) {
                Ok(params) => self.insert(params).await,
                Err(e) => Err(e),
            },
            "execute_admin_sql" => match parse_arguments(tool, arguments) {
                Ok(params) => self.run_sql(params).await,
                Err(e) => Err(e),
            },
            other => Err(Error::invalid_input(format!("unknown tool '{other}'"))),
        };
        self.finish(tool, outcome)
    }

    /// Count the call and render its outcome
    fn finish(&self, tool: &str, outcome: error::Result<String>) -> Result<String, String> {
        counter!("supabase_agent.total_tool_calls").increment(1);
        outcome.map_err(|e| {
            counter!("supabase_agent.total_errors").increment(1);
            warn!(
                connection_id = %self.connection_id,
                tool,
                code = e.code(),
                "Tool call failed: {e}"
            );
            format!("{}: {e}", failure_prefix(tool))
        })
    }

    fn reply(&self, tool: &str, outcome: error::Result<String>) -> CallToolResult {
        match self.finish(tool, outcome) {
            Ok(text) => CallToolResult::success(vec![Content::text(text)]),
            Err(text) => CallToolResult::error(vec![Content::text(text)]),
        }
    }

    async fn summarize_projects(&self) -> error::Result<String> {
        let projects = self.management.list_projects().await?;
        let summaries: Vec<ProjectSummary> = projects.iter().map(ProjectSummary::from).collect();
        Ok(serde_json::to_string_pretty(&summaries)?)
    }

    async fn create_new_project(&self, params: CreateProjectParams) -> error::Result<String> {
        let CreateProjectParams {
            name,
            organization_id,
            region,
        } = params;
        let db_password = self.config.db_password()?;
        let region = region.unwrap_or_else(|| self.config.default_region.clone());
        let project = self
            .management
            .create_project(&name, db_password, organization_id.as_deref(), &region)
            .await?;
        Ok(format!(
            "Project '{name}' created. ID: {}. Initial status: {}. Wait a few minutes for it to finish provisioning before using it.",
            project.id, project.status
        ))
    }

    async fn select(&self, params: SelectProjectParams) -> error::Result<String> {
        let session = self.context.select_project(&params.project_ref).await?;
        Ok(format!(
            "Project {} selected. REST client configured. Pooler host: {}",
            session.project_ref, session.db_host
        ))
    }

    async fn describe_active_project(&self) -> error::Result<String> {
        match self.context.current().await {
            Some(session) => Ok(serde_json::to_string_pretty(&session)?),
            None => Ok("No project is selected.".to_string()),
        }
    }

    async fn read_table(&self, params: QueryTableParams) -> error::Result<String> {
        let rows = self.data.query_table(&params.table).await?;
        Ok(rows.to_string())
    }

    async fn insert(&self, params: InsertRecordParams) -> error::Result<String> {
        let rows = self.data.insert_record(&params.table, &params.data).await?;
        Ok(rows.to_string())
    }

    async fn run_sql(&self, params: AdminSqlParams) -> error::Result<String> {
        let outcome = self.data.execute_admin_sql(&params.sql).await?;
        Ok(outcome.render())
    }

    #[tool(description = r#"
List every Supabase project in the account.

Returns a JSON array with the id, name, status and region of each project.
A project can only be used once its status is ACTIVE_HEALTHY.
"#)]
    pub async fn list_projects(&self) -> Result<CallToolResult, McpError> {
        let outcome = self.summarize_projects().await;
        Ok(self.reply("list_projects", outcome))
    }

    #[tool(description = r#"
Create a new Supabase project (a new database).

The name must be unique in the account. Provisioning takes a few minutes,
so the project cannot be selected or queried right after creation.
"#)]
    pub async fn create_project(
        &self,
        Parameters(params): Parameters<CreateProjectParams>,
    ) -> Result<CallToolResult, McpError> {
        let outcome = self.create_new_project(params).await;
        Ok(self.reply("create_project", outcome))
    }

    #[tool(description = r#"
Select the project to work on.

Fetches the project's API keys and resolves its database pooler host. This
must be called before querying, inserting or running admin SQL.
"#)]
    pub async fn select_project(
        &self,
        Parameters(params): Parameters<SelectProjectParams>,
    ) -> Result<CallToolResult, McpError> {
        let outcome = self.select(params).await;
        Ok(self.reply("select_project", outcome))
    }

    #[tool(description = "Show the currently selected project and its database endpoint")]
    pub async fn active_project(&self) -> Result<CallToolResult, McpError> {
        let outcome = self.describe_active_project().await;
        Ok(self.reply("active_project", outcome))
    }

    #[tool(description = r#"
Read every row of a table in the selected project through the REST API.

Returns the rows as a JSON array.
"#)]
    pub async fn query_table(
        &self,
        Parameters(params): Parameters<QueryTableParams>,
    ) -> Result<CallToolResult, McpError> {
        let outcome = self.read_table(params).await;
        Ok(self.reply("query_table", outcome))
    }

    #[tool(description = r#"
Insert a record into a table of the selected project through the REST API.

'data' must be a valid JSON string holding an object, or an array of
objects to insert several rows. Returns the inserted rows.
"#)]
    pub async fn insert_record(
        &self,
        Parameters(params): Parameters<InsertRecordParams>,
    ) -> Result<CallToolResult, McpError> {
        let outcome = self.insert(params).await;
        Ok(self.reply("insert_record", outcome))
    }

    #[tool(description = r#"
Execute arbitrary SQL (DDL or DML) with administrator privileges on the
selected project.

Use this to create, alter or drop tables, or for queries the REST API cannot
express. Statements run in auto-commit mode. Returns the rows of the last
statement as a JSON array, or a confirmation when it returns no rows.
"#)]
    pub async fn execute_admin_sql(
        &self,
        Parameters(params): Parameters<AdminSqlParams>,
    ) -> Result<CallToolResult, McpError> {
        let outcome = self.run_sql(params).await;
        Ok(self.reply("execute_admin_sql", outcome))
    }
}

#[tool_handler]
impl ServerHandler for SupabaseService {
    fn get_info(&self) -> ServerInfo {
        debug!("Getting server info");
        ServerInfo {
            capabilities: ServerCapabilities::builder().enable_tools().build(),
            instructions: Some(INSTRUCTIONS.to_string()),
            ..Default::default()
        }
    }
}

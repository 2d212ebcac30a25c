use anyhow::{Result, anyhow};
use dialoguer::{Input, Select};
use std::sync::Arc;
use std::time::Duration;
use tracing::warn;

use super::{project_line, prompt, row_count, section};
use crate::config::Config;
use crate::data::DataAccess;
use crate::db::{self, DbTarget};
use crate::engine::execute_sql;
use crate::error::Error;
use crate::management::{self, Project};
use crate::session::ProjectContext;
use crate::utils::{RetryPolicy, format_duration, generate_connection_id};

/// Table created and dropped by the data tests
const TEST_TABLE: &str = "tabla_prueba";
/// Word the user types to confirm a deletion
const DELETE_CONFIRMATION: &str = "borrar";
/// Upstream message returned while a project is still provisioning
const NOT_READY_FOR_DELETION: &str = "Project not ready for deletion";
/// Connection attempts while a new project's DNS propagates
const CONNECT_ATTEMPTS: usize = 5;
const CONNECT_DELAY: Duration = Duration::from_secs(5);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum MenuAction {
    Create,
    DataTests,
    Delete,
    Exit,
}

impl MenuAction {
    const ALL: [MenuAction; 4] = [
        MenuAction::Create,
        MenuAction::DataTests,
        MenuAction::Delete,
        MenuAction::Exit,
    ];

    fn label(self) -> &'static str {
        match self {
            MenuAction::Create => "Create project",
            MenuAction::DataTests => "Run data tests (on an existing project)",
            MenuAction::Delete => "Delete project",
            MenuAction::Exit => "Exit",
        }
    }
}

/// What came of a deletion request
#[derive(Debug, PartialEq, Eq)]
enum Deletion {
    Requested,
    NotReady,
}

/// Interactive menu that creates, exercises and deletes projects
pub async fn run_lifecycle(config: Arc<Config>, project_name: &str) -> Result<()> {
    let management = Arc::new(management::Client::new(
        config.api_url.clone(),
        config.access_token()?,
    ));
    let labels: Vec<&str> = MenuAction::ALL.iter().map(|a| a.label()).collect();
    loop {
        section("Supabase diagnostics menu");
        let labels = labels.clone();
        let choice = prompt(move || {
            Select::new()
                .with_prompt("Choose an option")
                .items(&labels)
                .default(0)
                .interact()
        })
        .await?;
        let action = MenuAction::ALL
            .get(choice)
            .copied()
            .ok_or_else(|| anyhow!("Invalid menu option {choice}"))?;
        let outcome = match action {
            MenuAction::Create => create(&management, &config, project_name).await,
            MenuAction::DataTests => data_tests(&management, &config).await,
            MenuAction::Delete => delete(&management).await,
            MenuAction::Exit => {
                println!("Bye.");
                return Ok(());
            }
        };
        if let Err(e) = outcome {
            warn!("Lifecycle step failed: {e}");
            println!("Failed: {e}");
        }
    }
}

/// Request a project in the default region with the shared admin password
async fn create_project(
    management: &management::Client,
    config: &Config,
    name: &str,
) -> crate::error::Result<Project> {
    let password = config.db_password()?;
    management
        .create_project(name, password, None, &config.default_region)
        .await
}

async fn create(management: &management::Client, config: &Config, name: &str) -> Result<()> {
    section("Create project");
    if config.db_password().is_err() {
        println!("DB_PASSWORD is required to create projects");
        return Ok(());
    }
    println!(
        "Creating project '{name}' in '{}'...",
        config.default_region
    );
    let project = create_project(management, config, name).await?;
    println!("Project created.");
    println!("   ID: {}", project.id);
    println!("   Initial status: {}", project.status);
    println!("\nWait a few minutes (3-5) for the database and DNS to be provisioned.");
    println!("Once the project is active in the dashboard, come back and run the data tests.");
    Ok(())
}

/// Block until the user acknowledges a finished step
async fn wait_for_user(step: &str) -> Result<()> {
    let message = format!("{step} done. Check the project in Supabase, then type 'C' to continue");
    prompt(move || {
        loop {
            let answer: String = Input::new().with_prompt(&message).interact_text()?;
            if answer.trim().eq_ignore_ascii_case("c") {
                return Ok(());
            }
        }
    })
    .await
}

async fn data_tests(management: &Arc<management::Client>, config: &Arc<Config>) -> Result<()> {
    let projects: Vec<Project> = management
        .list_projects()
        .await?
        .into_iter()
        .filter(Project::is_healthy)
        .collect();
    if projects.is_empty() {
        println!("No ACTIVE_HEALTHY projects available.");
        println!("Create a new one and wait a few minutes for it to be provisioned.");
        return Ok(());
    }
    let labels: Vec<String> = projects
        .iter()
        .map(|p| format!("{} (ID: {})", p.name, p.id))
        .collect();
    let choice = prompt(move || {
        Select::new()
            .with_prompt("Project to test")
            .items(&labels)
            .default(0)
            .interact()
    })
    .await?;
    let project = projects
        .get(choice)
        .ok_or_else(|| anyhow!("Invalid project option {choice}"))?;
    section(&format!("Data tests on {}", project.name));

    println!("Fetching API keys...");
    let context = ProjectContext::new(management.clone(), config.clone());
    let session = context.select_project(&project.id).await?;
    println!("Using pooler host {}", session.db_host);
    let Ok(target) = DbTarget::for_session(&session, config) else {
        println!("Skipping data tests: DB_PASSWORD is not set");
        return Ok(());
    };
    let data = DataAccess::new(context, config.clone());

    // Schema setup, retried while the DNS of a new project propagates
    println!("Connecting to {} for admin SQL...", target.label());
    let policy = RetryPolicy::new(CONNECT_ATTEMPTS, CONNECT_DELAY);
    let mut attempt = 0;
    let connected = policy
        .run(
            || db::connect(&target),
            |e: &Error, pause| {
                attempt += 1;
                println!(
                    "Attempt {attempt}/{CONNECT_ATTEMPTS} failed: {e}. Retrying in {}...",
                    format_duration(pause)
                );
            },
        )
        .await;
    let client = match connected {
        Ok(client) => client,
        Err(e) => {
            println!("Final connection failure: {e}");
            println!("The DNS of a new project can take a few more minutes to propagate.");
            return Ok(());
        }
    };
    println!("Connection established.");
    println!("Creating table '{TEST_TABLE}'...");
    let ddl = format!(
        "DROP TABLE IF EXISTS {TEST_TABLE}; \
         CREATE TABLE {TEST_TABLE} (id SERIAL PRIMARY KEY, mensaje TEXT); \
         ALTER TABLE {TEST_TABLE} DISABLE ROW LEVEL SECURITY;"
    );
    if let Err(e) = execute_sql(&client, &ddl, &generate_connection_id()).await {
        println!("DDL failed: {e}");
        return Ok(());
    }
    drop(client);
    println!("Table created with row level security disabled.");

    // Row operations through the REST API
    println!("Testing insert...");
    match data
        .insert_record(TEST_TABLE, r#"{"mensaje": "Estado Inicial"}"#)
        .await
    {
        Ok(rows) => println!("Inserted: {} rows.", row_count(&rows)),
        Err(e) => println!("Insert failed: {e}"),
    }
    wait_for_user("Creation (table and data)").await?;

    println!("Testing update...");
    match data
        .update_records(TEST_TABLE, "id", "1", r#"{"mensaje": "Estado EDITADO"}"#)
        .await
    {
        Ok(rows) => println!("Updated: {} rows.", row_count(&rows)),
        Err(e) => println!("Update failed: {e}"),
    }
    wait_for_user("Edit (data modified)").await?;

    println!("Testing row delete...");
    match data.delete_records(TEST_TABLE, "id", "1").await {
        Ok(rows) => println!("Deleted: {} rows affected.", row_count(&rows)),
        Err(e) => println!("Row delete failed: {e}"),
    }
    wait_for_user("Row delete (table empty)").await?;

    // Cleanup over a fresh connection
    println!("Cleaning up (DROP TABLE)...");
    match data
        .execute_admin_sql(&format!("DROP TABLE {TEST_TABLE}"))
        .await
    {
        Ok(_) => println!("Table dropped."),
        Err(e) => println!("Cleanup failed: {e}"),
    }
    Ok(())
}

/// Ask the platform to delete a project, telling provisioning projects apart
async fn request_deletion(
    management: &management::Client,
    project_ref: &str,
) -> crate::error::Result<Deletion> {
    match management.delete_project(project_ref).await {
        Ok(_) => Ok(Deletion::Requested),
        Err(e) if e.to_string().contains(NOT_READY_FOR_DELETION) => Ok(Deletion::NotReady),
        Err(e) => Err(e),
    }
}

async fn delete(management: &management::Client) -> Result<()> {
    section("Delete project");
    let projects = management.list_projects().await?;
    if projects.is_empty() {
        println!("No projects to delete.");
        return Ok(());
    }
    let mut labels = vec!["Cancel".to_string()];
    labels.extend(projects.iter().map(project_line));
    let choice = prompt(move || {
        Select::new()
            .with_prompt("Project to DELETE")
            .items(&labels)
            .default(0)
            .interact()
    })
    .await?;
    // The first entry cancels
    let Some(project) = choice.checked_sub(1).and_then(|i| projects.get(i)) else {
        println!("Cancelled.");
        return Ok(());
    };
    let message = format!(
        "Are you SURE you want to delete '{}' ({})? Type '{DELETE_CONFIRMATION}'",
        project.name, project.id
    );
    let answer: String = prompt(move || {
        Input::new()
            .with_prompt(message)
            .allow_empty(true)
            .interact_text()
    })
    .await?;
    if !answer.trim().eq_ignore_ascii_case(DELETE_CONFIRMATION) {
        println!("Cancelled.");
        return Ok(());
    }
    println!("Deleting project {}...", project.id);
    match request_deletion(management, &project.id).await? {
        Deletion::Requested => println!("Deletion requested."),
        Deletion::NotReady => {
            println!("Warning: the project is still being provisioned and cannot be deleted yet.");
            println!("Try again later.");
        }
    }
    Ok(())
}

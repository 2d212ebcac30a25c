use std::time::Duration;

use crate::error::{Error, Result};

pub const DEFAULT_API_URL: &str = "https://api.supabase.com/v1";
pub const DEFAULT_PROJECT_URL_TEMPLATE: &str = "https://{ref}.supabase.co";
pub const DEFAULT_POOLER_HOST_TEMPLATE: &str = "aws-1-{region}.pooler.supabase.com";
pub const DEFAULT_DIRECT_HOST_TEMPLATE: &str = "db.{ref}.supabase.co";
pub const DEFAULT_DB_USER_TEMPLATE: &str = "postgres.{ref}";
pub const DEFAULT_DB_NAME: &str = "postgres";
pub const DEFAULT_REGION: &str = "eu-west-1";
pub const DEFAULT_LLM_BASE_URL: &str = "http://localhost:11434/v1";
pub const DEFAULT_LLM_API_KEY: &str = "ollama";
pub const DEFAULT_MODEL: &str = "glm-4.7-flash:latest";

/// Pooler port in session mode
pub const SESSION_POOLER_PORT: u16 = 5432;
/// Pooler port in transaction mode
pub const TRANSACTION_POOLER_PORT: u16 = 6543;

/// Settings for the OpenAI-compatible chat endpoint
#[derive(Clone)]
pub struct LlmConfig {
    pub base_url: String,
    pub api_key: String,
    pub model: String,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_LLM_BASE_URL.to_string(),
            api_key: DEFAULT_LLM_API_KEY.to_string(),
            model: DEFAULT_MODEL.to_string(),
        }
    }
}

/// Process configuration, sourced from the environment and command line
#[derive(Clone)]
pub struct Config {
    /// Management API personal access token
    pub access_token: Option<String>,
    /// Shared database password used for admin SQL and new projects
    pub db_password: Option<String>,
    /// Explicit pooler host, overriding the region template
    pub pooler_host: Option<String>,
    /// Management API base URL
    pub api_url: String,
    /// REST endpoint template, `{ref}` is substituted
    pub project_url_template: String,
    /// Pooler host template, `{region}` is substituted
    pub pooler_host_template: String,
    /// Database user template, `{ref}` is substituted
    pub db_user_template: String,
    pub db_port: u16,
    pub db_name: String,
    /// Region used when creating projects or when a project has none
    pub default_region: String,
    /// Upper bound on establishing a direct database connection
    pub connect_timeout: Duration,
    pub llm: LlmConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            access_token: None,
            db_password: None,
            pooler_host: None,
            api_url: DEFAULT_API_URL.to_string(),
            project_url_template: DEFAULT_PROJECT_URL_TEMPLATE.to_string(),
            pooler_host_template: DEFAULT_POOLER_HOST_TEMPLATE.to_string(),
            db_user_template: DEFAULT_DB_USER_TEMPLATE.to_string(),
            db_port: SESSION_POOLER_PORT,
            db_name: DEFAULT_DB_NAME.to_string(),
            default_region: DEFAULT_REGION.to_string(),
            connect_timeout: Duration::from_secs(10),
            llm: LlmConfig::default(),
        }
    }
}

impl Config {
    /// Get the management API access token
    pub fn access_token(&self) -> Result<&str> {
        self.access_token
            .as_deref()
            .filter(|t| !t.is_empty())
            .ok_or_else(|| Error::missing_config("SUPABASE_ACCESS_TOKEN is not set"))
    }

    /// Get the shared admin database password
    pub fn db_password(&self) -> Result<&str> {
        self.db_password
            .as_deref()
            .filter(|p| !p.is_empty())
            .ok_or_else(|| Error::missing_config("DB_PASSWORD is not set"))
    }

    /// The REST endpoint for a project
    pub fn project_url(&self, project_ref: &str) -> String {
        render_template(&self.project_url_template, &[("ref", project_ref)])
    }

    /// The pooler user for a project
    pub fn db_user(&self, project_ref: &str) -> String {
        render_template(&self.db_user_template, &[("ref", project_ref)])
    }

    /// The pooler host derived from a region, ignoring any override
    pub fn pooler_host_for_region(&self, region: &str) -> String {
        render_template(&self.pooler_host_template, &[("region", region)])
    }

    /// The direct (non-pooled) database host for a project
    pub fn direct_host(&self, project_ref: &str) -> String {
        render_template(DEFAULT_DIRECT_HOST_TEMPLATE, &[("ref", project_ref)])
    }
}

/// Substitute `{key}` placeholders in a template
pub fn render_template(template: &str, vars: &[(&str, &str)]) -> String {
    vars.iter().fold(template.to_string(), |acc, (key, value)| {
        acc.replace(&format!("{{{key}}}"), value)
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_render_template() {
        assert_eq!(
            render_template("https://{ref}.supabase.co", &[("ref", "abc123")]),
            "https://abc123.supabase.co"
        );
        assert_eq!(
            render_template("{a}-{b}-{a}", &[("a", "x"), ("b", "y")]),
            "x-y-x"
        );
        assert_eq!(render_template("plain", &[("ref", "abc")]), "plain");
    }

    #[test]
    fn test_default_templates() {
        let config = Config::default();
        assert_eq!(config.project_url("abc123"), "https://abc123.supabase.co");
        assert_eq!(config.db_user("abc123"), "postgres.abc123");
        assert_eq!(
            config.pooler_host_for_region("us-east-1"),
            "aws-1-us-east-1.pooler.supabase.com"
        );
        assert_eq!(config.direct_host("abc123"), "db.abc123.supabase.co");
        assert_eq!(config.db_port, 5432);
        assert_eq!(config.db_name, "postgres");
    }

    #[test]
    fn test_missing_secrets() {
        let mut config = Config::default();
        assert!(matches!(config.access_token(), Err(Error::MissingConfig(_))));
        assert!(matches!(config.db_password(), Err(Error::MissingConfig(_))));
        config.db_password = Some(String::new());
        assert!(matches!(config.db_password(), Err(Error::MissingConfig(_))));
        config.access_token = Some("sbp_token".to_string());
        config.db_password = Some("secret".to_string());
        assert_eq!(config.access_token().unwrap(), "sbp_token");
        assert_eq!(config.db_password().unwrap(), "secret");
    }
}

use clap::{Args, Parser, Subcommand};
use std::time::Duration;

use crate::config::{
    Config, DEFAULT_API_URL, DEFAULT_DB_NAME, DEFAULT_DB_USER_TEMPLATE, DEFAULT_LLM_API_KEY,
    DEFAULT_LLM_BASE_URL, DEFAULT_MODEL, DEFAULT_POOLER_HOST_TEMPLATE,
    DEFAULT_PROJECT_URL_TEMPLATE, DEFAULT_REGION, LlmConfig,
};

#[derive(Parser)]
#[command(name = "supabase-agent")]
#[command(about = "Supabase project agent and MCP server")]
#[command(version)]
pub struct Cli {
    #[command(flatten)]
    pub settings: Settings,
    #[command(subcommand)]
    pub command: Commands,
}

/// Settings shared by every command
#[derive(Args, Clone)]
pub struct Settings {
    /// The Supabase management API access token
    #[arg(long, env = "SUPABASE_ACCESS_TOKEN", hide_env_values = true, global = true)]
    pub access_token: Option<String>,
    /// The shared database password for admin SQL and new projects
    #[arg(long, env = "DB_PASSWORD", hide_env_values = true, global = true)]
    pub db_password: Option<String>,
    /// The pooler host to use instead of the region template
    #[arg(long, env = "SUPABASE_POOLER_HOST", global = true)]
    pub pooler_host: Option<String>,
    /// The management API base URL
    #[arg(long, env = "SUPABASE_API_URL", default_value = DEFAULT_API_URL, global = true)]
    pub api_url: String,
    /// The project REST endpoint template
    #[arg(long, env = "SUPABASE_PROJECT_URL_TEMPLATE", default_value = DEFAULT_PROJECT_URL_TEMPLATE, global = true)]
    pub project_url_template: String,
    /// The pooler host template used when no pooler host is set
    #[arg(long, env = "SUPABASE_POOLER_HOST_TEMPLATE", default_value = DEFAULT_POOLER_HOST_TEMPLATE, global = true)]
    pub pooler_host_template: String,
    /// The pooler user template
    #[arg(long, env = "SUPABASE_DB_USER_TEMPLATE", default_value = DEFAULT_DB_USER_TEMPLATE, global = true)]
    pub db_user_template: String,
    /// The pooler port (5432 session mode, 6543 transaction mode)
    #[arg(long, env = "SUPABASE_DB_PORT", default_value_t = 5432, global = true)]
    pub db_port: u16,
    /// The database name for admin connections
    #[arg(long, env = "SUPABASE_DB_NAME", default_value = DEFAULT_DB_NAME, global = true)]
    pub db_name: String,
    /// The region for new projects and for projects without one
    #[arg(long, env = "SUPABASE_DEFAULT_REGION", default_value = DEFAULT_REGION, global = true)]
    pub default_region: String,
    /// The database connection timeout in seconds
    #[arg(long, env = "SUPABASE_DB_CONNECT_TIMEOUT", default_value_t = 10, global = true)]
    pub connect_timeout_secs: u64,
    /// The OpenAI-compatible API base URL
    #[arg(long, env = "OPENAI_BASE_URL", default_value = DEFAULT_LLM_BASE_URL, global = true)]
    pub llm_base_url: String,
    /// The OpenAI-compatible API key
    #[arg(long, env = "OPENAI_API_KEY", default_value = DEFAULT_LLM_API_KEY, hide_env_values = true, global = true)]
    pub llm_api_key: String,
    /// The model used by the chat agent
    #[arg(long, env = "MODEL_NAME", default_value = DEFAULT_MODEL, global = true)]
    pub model: String,
}

impl From<Settings> for Config {
    fn from(settings: Settings) -> Self {
        Self {
            access_token: settings.access_token,
            db_password: settings.db_password,
            pooler_host: settings.pooler_host.filter(|h| !h.is_empty()),
            api_url: settings.api_url,
            project_url_template: settings.project_url_template,
            pooler_host_template: settings.pooler_host_template,
            db_user_template: settings.db_user_template,
            db_port: settings.db_port,
            db_name: settings.db_name,
            default_region: settings.default_region,
            connect_timeout: Duration::from_secs(settings.connect_timeout_secs),
            llm: LlmConfig {
                base_url: settings.llm_base_url,
                api_key: settings.llm_api_key,
                model: settings.model,
            },
        }
    }
}

#[derive(Subcommand)]
pub enum Commands {
    /// Start the MCP server
    Start {
        /// The MCP server bind address (host:port), stdio is used when unset
        #[arg(long, env = "SUPABASE_AGENT_BIND_ADDRESS")]
        bind_address: Option<String>,
        /// Requests per second allowed per client in HTTP mode
        #[arg(long, env = "SUPABASE_AGENT_RATE_LIMIT_RPS", default_value_t = 10)]
        rate_limit_rps: u32,
        /// Burst size allowed per client in HTTP mode
        #[arg(long, env = "SUPABASE_AGENT_RATE_LIMIT_BURST", default_value_t = 20)]
        rate_limit_burst: u32,
    },
    /// Chat with the agent from the terminal
    Chat {
        /// Maximum model turns per request
        #[arg(long, default_value_t = crate::agent::DEFAULT_MAX_TURNS)]
        max_turns: usize,
    },
    /// Interactive create, test and delete menu for projects
    Lifecycle {
        /// Name of the project created from the menu
        #[arg(long, default_value = "prueba")]
        project_name: String,
    },
    /// Try the direct, session pooler and transaction pooler connections
    Probe {
        /// The project to probe
        #[arg(long, env = "SUPABASE_PROJECT_REF")]
        project_ref: String,
        /// Connection attempts per target
        #[arg(long, default_value_t = 1)]
        attempts: usize,
        /// Delay between attempts in seconds
        #[arg(long, default_value_t = 5)]
        delay_secs: u64,
        /// Randomize the delay between attempts
        #[arg(long)]
        jitter: bool,
    },
}

impl Commands {
    /// Whether the command talks to the management API with this config
    ///
    /// Connection checks only look up the project region when no pooler
    /// host is set.
    pub fn requires_access_token(&self, config: &Config) -> bool {
        match self {
            Commands::Probe { .. } => config.pooler_host.is_none(),
            _ => true,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition_is_valid() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_connection_check_arguments() {
        let cli = Cli::try_parse_from([
            "supabase-agent",
            "probe",
            "--project-ref",
            "abc123",
            "--attempts",
            "3",
            "--jitter",
        ])
        .unwrap();
        match cli.command {
            Commands::Probe {
                project_ref,
                attempts,
                delay_secs,
                jitter,
            } => {
                assert_eq!(project_ref, "abc123");
                assert_eq!(attempts, 3);
                assert_eq!(delay_secs, 5);
                assert!(jitter);
            }
            _ => panic!("expected probe command"),
        }
    }

    #[test]
    fn test_settings_convert_to_config() {
        let cli = Cli::try_parse_from([
            "supabase-agent",
            "--pooler-host",
            "pooler.example.com",
            "--db-port",
            "6543",
            "chat",
        ])
        .unwrap();
        let config = Config::from(cli.settings);
        assert_eq!(config.pooler_host.as_deref(), Some("pooler.example.com"));
        assert_eq!(config.db_port, 6543);
        assert_eq!(config.connect_timeout, Duration::from_secs(10));
    }

    #[test]
    fn test_access_token_requirement_per_command() {
        let args = ["supabase-agent", "probe", "--project-ref", "abc123"];
        let cli = Cli::try_parse_from(args).unwrap();
        let config = Config::from(cli.settings);
        assert!(cli.command.requires_access_token(&config));
        let with_pooler = Config {
            pooler_host: Some("pooler.example.com".to_string()),
            ..config.clone()
        };
        assert!(!cli.command.requires_access_token(&with_pooler));
        let chat = Cli::try_parse_from(["supabase-agent", "chat"]).unwrap();
        assert!(chat.command.requires_access_token(&with_pooler));
        let start = Cli::try_parse_from(["supabase-agent", "start"]).unwrap();
        assert!(start.command.requires_access_token(&with_pooler));
    }
}

use thiserror::Error;

/// Errors raised while managing projects and accessing their data
#[derive(Error, Debug)]
pub enum Error {
    /// A data operation was attempted before any project was selected
    #[error("No project selected. Use 'list_projects' and then 'select_project'.")]
    NoActiveProject,

    /// The management or REST API answered with a non-success status
    #[error("HTTP {status}: {body}")]
    Upstream { status: u16, body: String },

    /// The HTTP request could not be sent or its response could not be read
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    /// A direct database connection could not be established
    #[error("Database connection failed: {0}")]
    Connection(String),

    /// A SQL statement failed to execute
    #[error("SQL execution failed: {0}")]
    Query(String),

    /// A value could not be converted to or from JSON
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// The caller supplied malformed input
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// A required configuration value is absent
    #[error("Missing configuration: {0}")]
    MissingConfig(String),

    /// The project API keys could not be retrieved
    #[error("Missing project credentials: {0}")]
    MissingCredentials(String),

    /// The account has no organization to create a project in
    #[error("No organizations found in this account")]
    NoOrganization,

    /// The language model endpoint or the agent loop failed
    #[error("Agent error: {0}")]
    Agent(String),
}

impl Error {
    /// Stable error code for programmatic handling
    #[must_use]
    pub const fn code(&self) -> &'static str {
        match self {
            Self::NoActiveProject => "NO_ACTIVE_PROJECT",
            Self::Upstream { .. } => "UPSTREAM_FAILED",
            Self::Http(_) => "HTTP_FAILED",
            Self::Connection(_) => "CONNECTION_FAILED",
            Self::Query(_) => "QUERY_FAILED",
            Self::Json(_) => "JSON_FAILED",
            Self::InvalidInput(_) => "INVALID_INPUT",
            Self::MissingConfig(_) => "MISSING_CONFIG",
            Self::MissingCredentials(_) => "MISSING_CREDENTIALS",
            Self::NoOrganization => "NO_ORGANIZATION",
            Self::Agent(_) => "AGENT_FAILED",
        }
    }

    /// Create an upstream error from a status code and raw body
    pub fn upstream(status: reqwest::StatusCode, body: impl Into<String>) -> Self {
        Self::Upstream {
            status: status.as_u16(),
            body: body.into(),
        }
    }

    pub fn connection(message: impl Into<String>) -> Self {
        Self::Connection(message.into())
    }

    pub fn query(message: impl Into<String>) -> Self {
        Self::Query(message.into())
    }

    pub fn invalid_input(message: impl Into<String>) -> Self {
        Self::InvalidInput(message.into())
    }

    pub fn missing_config(message: impl Into<String>) -> Self {
        Self::MissingConfig(message.into())
    }

    pub fn agent(message: impl Into<String>) -> Self {
        Self::Agent(message.into())
    }
}

/// Result type alias for library operations
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_codes() {
        assert_eq!(Error::NoActiveProject.code(), "NO_ACTIVE_PROJECT");
        assert_eq!(
            Error::upstream(reqwest::StatusCode::NOT_FOUND, "gone").code(),
            "UPSTREAM_FAILED"
        );
        assert_eq!(Error::connection("refused").code(), "CONNECTION_FAILED");
        assert_eq!(Error::query("syntax").code(), "QUERY_FAILED");
        assert_eq!(Error::invalid_input("json").code(), "INVALID_INPUT");
        assert_eq!(Error::missing_config("DB_PASSWORD").code(), "MISSING_CONFIG");
        assert_eq!(
            Error::MissingCredentials("anon".to_string()).code(),
            "MISSING_CREDENTIALS"
        );
        assert_eq!(Error::NoOrganization.code(), "NO_ORGANIZATION");
        assert_eq!(Error::agent("loop").code(), "AGENT_FAILED");
    }

    #[test]
    fn test_upstream_message_carries_raw_body() {
        let err = Error::upstream(
            reqwest::StatusCode::BAD_REQUEST,
            r#"{"message":"Project not ready for deletion"}"#,
        );
        let message = err.to_string();
        assert!(message.contains("400"));
        assert!(message.contains("Project not ready for deletion"));
    }

    #[test]
    fn test_no_active_project_message_guides_the_caller() {
        let message = Error::NoActiveProject.to_string();
        assert!(message.contains("list_projects"));
        assert!(message.contains("select_project"));
    }
}

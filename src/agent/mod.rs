use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, error, info, warn};

use crate::config::LlmConfig;
use crate::error::{Error, Result};
use crate::tools::SupabaseService;

/// Default upper bound on model round trips for one user input
pub const DEFAULT_MAX_TURNS: usize = 10;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool_calls: Option<Vec<ToolCall>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool_call_id: Option<String>,
}

impl ChatMessage {
    fn new(role: &str, content: Option<String>) -> Self {
        Self {
            role: role.to_string(),
            content,
            tool_calls: None,
            tool_call_id: None,
        }
    }

    pub fn system(content: impl Into<String>) -> Self {
        Self::new("system", Some(content.into()))
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self::new("user", Some(content.into()))
    }

    /// An assistant turn that requested tool calls
    pub fn assistant_calls(content: Option<String>, calls: Vec<ToolCall>) -> Self {
        Self {
            tool_calls: Some(calls),
            ..Self::new("assistant", content)
        }
    }

    /// The rendered result of one tool call
    pub fn tool(call_id: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            tool_call_id: Some(call_id.into()),
            ..Self::new("tool", Some(content.into()))
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCall {
    pub id: String,
    #[serde(rename = "type", default = "function_type")]
    pub call_type: String,
    pub function: FunctionCall,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FunctionCall {
    pub name: String,
    /// JSON-encoded arguments, as produced by the model
    #[serde(default)]
    pub arguments: String,
}

fn function_type() -> String {
    "function".to_string()
}

#[derive(Debug, Clone, Serialize)]
pub struct ToolDefinition {
    #[serde(rename = "type")]
    tool_type: String,
    function: FunctionDefinition,
}

#[derive(Debug, Clone, Serialize)]
struct FunctionDefinition {
    name: String,
    description: String,
    parameters: Value,
}

impl ToolDefinition {
    /// Convert an MCP tool definition (name, description, inputSchema)
    fn from_mcp(tool: &Value) -> Option<Self> {
        let name = tool.get("name")?.as_str()?.to_string();
        let description = tool
            .get("description")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .trim()
            .to_string();
        let parameters = tool
            .get("inputSchema")
            .cloned()
            .unwrap_or_else(|| serde_json::json!({"type": "object", "properties": {}}));
        Some(Self {
            tool_type: function_type(),
            function: FunctionDefinition {
                name,
                description,
                parameters,
            },
        })
    }
}

#[derive(Serialize)]
struct CompletionRequest<'a> {
    model: &'a str,
    messages: &'a [ChatMessage],
    #[serde(skip_serializing_if = "no_tools")]
    tools: &'a [ToolDefinition],
}

fn no_tools(tools: &&[ToolDefinition]) -> bool {
    tools.is_empty()
}

#[derive(Deserialize)]
struct CompletionResponse {
    #[serde(default)]
    choices: Vec<Choice>,
}

#[derive(Deserialize)]
struct Choice {
    message: ResponseMessage,
}

/// The assistant message of a completion
#[derive(Debug, Clone, Deserialize)]
pub struct ResponseMessage {
    pub content: Option<String>,
    #[serde(default)]
    pub tool_calls: Option<Vec<ToolCall>>,
}

/// A client for an OpenAI-compatible chat completions endpoint
#[derive(Clone)]
pub struct ChatClient {
    client: reqwest::Client,
    endpoint: String,
    api_key: String,
    model: String,
}

impl ChatClient {
    pub fn new(llm: &LlmConfig) -> Self {
        Self {
            client: reqwest::Client::new(),
            endpoint: format!("{}/chat/completions", llm.base_url.trim_end_matches('/')),
            api_key: llm.api_key.clone(),
            model: llm.model.clone(),
        }
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    /// Request the next assistant message for a conversation
    pub async fn complete(
        &self,
        messages: &[ChatMessage],
        tools: &[ToolDefinition],
    ) -> Result<ResponseMessage> {
        debug!(
            model = %self.model,
            messages = messages.len(),
            tools = tools.len(),
            "Requesting chat completion"
        );
        let request = CompletionRequest {
            model: &self.model,
            messages,
            tools,
        };
        let response = self
            .client
            .post(&self.endpoint)
            .bearer_auth(&self.api_key)
            .json(&request)
            .send()
            .await?;
        let status = response.status();
        if !status.is_success() {
            let e = response.text().await?;
            error!(status = status.as_u16(), "Chat completion failed: {e}");
            return Err(Error::upstream(status, e));
        }
        let completion: CompletionResponse = response.json().await?;
        completion
            .choices
            .into_iter()
            .next()
            .map(|choice| choice.message)
            .ok_or_else(|| Error::agent("the model returned no choices"))
    }
}

/// Relays a user's request between the model and the tool surface
pub struct Agent {
    chat: ChatClient,
    service: SupabaseService,
    instructions: String,
    tools: Vec<ToolDefinition>,
    max_turns: usize,
}

impl Agent {
    pub fn new(
        chat: ChatClient,
        service: SupabaseService,
        instructions: impl Into<String>,
        max_turns: usize,
    ) -> Self {
        let tools = service
            .tool_definitions()
            .iter()
            .filter_map(ToolDefinition::from_mcp)
            .collect();
        Self {
            chat,
            service,
            instructions: instructions.into(),
            tools,
            max_turns,
        }
    }

    pub fn model(&self) -> &str {
        self.chat.model()
    }

    /// Answer one user input, starting a fresh conversation
    pub async fn run(&self, input: &str) -> Result<String> {
        let mut messages = vec![
            ChatMessage::system(self.instructions.clone()),
            ChatMessage::user(input),
        ];
        for turn in 1..=self.max_turns {
            let reply = self.chat.complete(&messages, &self.tools).await?;
            let calls = reply.tool_calls.unwrap_or_default();
            if calls.is_empty() {
                debug!(turn, "Model produced a final answer");
                return Ok(reply.content.unwrap_or_default());
            }
            messages.push(ChatMessage::assistant_calls(reply.content, calls.clone()));
            for call in calls {
                let text = self.call_tool(&call).await;
                messages.push(ChatMessage::tool(call.id, text));
            }
        }
        warn!(max_turns = self.max_turns, "Agent ran out of turns");
        Err(Error::agent(format!(
            "no final answer after {} turns",
            self.max_turns
        )))
    }

    /// Run one requested tool call and render its outcome as text
    async fn call_tool(&self, call: &ToolCall) -> String {
        let name = call.function.name.as_str();
        info!(tool = name, "Model requested a tool call");
        let arguments = match call.function.arguments.trim() {
            "" => Value::Null,
            raw => match serde_json::from_str(raw) {
                Ok(arguments) => arguments,
                Err(e) => {
                    warn!(tool = name, "Model sent malformed tool arguments: {e}");
                    return format!("Error: the arguments for '{name}' are not valid JSON: {e}");
                }
            },
        };
        match self.service.dispatch(name, arguments).await {
            Ok(text) | Err(text) => text,
        }
    }
}

//! Results collected during a run.

use serde::Serialize;
use serde_json::Value;

use super::Analysis;
use crate::connector::ConnectorError;

/// One command and what the server said back.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CommandOutcome {
    pub command: String,
    /// Response line exactly as received.
    pub raw: String,
    /// The response parsed as JSON, if it was valid JSON.
    pub parsed: Option<Value>,
}

impl CommandOutcome {
    /// Interpret a response line. Invalid JSON is logged and kept raw.
    #[must_use]
    pub fn interpret(command: impl Into<String>, raw: String) -> Self {
        let command = command.into();
        let parsed = match serde_json::from_str::<Value>(&raw) {
            Ok(value) => Some(value),
            Err(e) => {
                let err = ConnectorError::parse(&raw, &e);
                tracing::warn!(command = %command, error = %err, "Response is not JSON, keeping raw line");
                None
            }
        };
        Self {
            command,
            raw,
            parsed,
        }
    }

    /// Value handed to the analyzer: the parsed JSON, or the raw line as a string.
    #[must_use]
    pub fn payload(&self) -> Value {
        self.parsed
            .clone()
            .unwrap_or_else(|| Value::String(self.raw.clone()))
    }

    /// Tool names from a `tools` array, accepting plain strings or objects with a `name`.
    #[must_use]
    pub fn tool_names(&self) -> Option<Vec<String>> {
        let tools = self.parsed.as_ref()?.get("tools")?.as_array()?;
        Some(
            tools
                .iter()
                .filter_map(|tool| {
                    tool.as_str()
                        .or_else(|| tool.get("name").and_then(Value::as_str))
                        .map(str::to_string)
                })
                .collect(),
        )
    }
}

/// Everything a run produced.
#[derive(Debug, Clone, Default, Serialize)]
pub struct RunReport {
    pub outcomes: Vec<CommandOutcome>,
    pub analyses: Vec<Analysis>,
    /// Error that cut the command phase short, if any.
    pub error: Option<String>,
    pub exit_code: Option<i32>,
}

impl RunReport {
    #[must_use]
    pub fn is_success(&self) -> bool {
        self.error.is_none()
    }
}

//! Downstream analysis of server results.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Summary used when the input carries no `message` field.
pub const FALLBACK_SUMMARY: &str = "Input data was provided for analysis";

/// Error type for analyzers.
#[derive(thiserror::Error, Debug)]
pub enum AnalysisError {
    /// The analyzer refused the input.
    #[error("Analyzer rejected input: {0}")]
    Rejected(String),
    /// Failed to (de)serialize analyzer data.
    #[error("Analysis serialization failed: {0}")]
    Serialize(#[from] serde_json::Error),
}

/// Result of analyzing one server result.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Analysis {
    pub timestamp: DateTime<Utc>,
    /// JSON type of the analyzed input.
    pub input_type: String,
    pub summary: String,
    pub recommendations: Vec<String>,
}

/// Consumer of connector output.
#[async_trait]
pub trait Analyzer: Send + Sync {
    /// Analyze one parsed (or raw string) result.
    async fn analyze(&self, input: &Value) -> Result<Analysis, AnalysisError>;
}

/// Analyzer that summarizes its input without calling out anywhere.
#[derive(Debug, Clone, Copy, Default)]
pub struct SummaryAnalyzer;

#[async_trait]
impl Analyzer for SummaryAnalyzer {
    async fn analyze(&self, input: &Value) -> Result<Analysis, AnalysisError> {
        let summary = input
            .get("message")
            .and_then(Value::as_str)
            .map_or_else(|| FALLBACK_SUMMARY.to_string(), str::to_string);

        Ok(Analysis {
            timestamp: Utc::now(),
            input_type: json_type_name(input).to_string(),
            summary,
            recommendations: vec![
                "Establish a direct connection to the context server".to_string(),
                "Retry installing the context client package".to_string(),
                "Check the official documentation for supported connection methods".to_string(),
            ],
        })
    }
}

fn json_type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

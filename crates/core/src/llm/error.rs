use crate::llm::Provider;
use serde_json::Value;
use std::fmt;

/// Failure of a remote model call, keeping whatever the provider sent back.
#[derive(Debug, Clone)]
pub struct LlmDiagnosticsError {
    pub provider: Provider,
    pub stage: &'static str,
    pub detail: String,
    pub raw_output: Option<String>,
    pub raw_response_json: Option<Value>,
}

impl fmt::Display for LlmDiagnosticsError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "model call failed (provider={:?}, stage={}): {}",
            self.provider, self.stage, self.detail
        )
    }
}

impl std::error::Error for LlmDiagnosticsError {}

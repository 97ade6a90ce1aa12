//! The seam a concrete LLM client implements (§4.6, Design Notes' response-
//! adapter note in §9). The planner core depends only on this trait; it
//! never builds a provider-specific request body or parses a
//! provider-specific response shape itself.

use async_trait::async_trait;
use pflow_kernel::error::Result;

#[async_trait]
pub trait StructuredLlm: Send + Sync {
    /// Issues one structured-output call: `prompt` is the full rendered
    /// prompt text, `schema` is a JSON Schema the response must conform to,
    /// `model` and `temperature` are taken from the calling node's params.
    /// A response whose body does not match `schema`'s top-level shape is
    /// the adapter's responsibility to reject before returning.
    async fn complete(
        &self,
        prompt: &str,
        schema: &serde_json::Value,
        model: &str,
        temperature: f32,
    ) -> Result<serde_json::Value>;
}

/// Per-call token/cost accounting an adapter may optionally report
/// alongside its structured response, for `__llm_calls__` bookkeeping
/// (§4.6). An adapter that cannot report usage may return `None` from
/// `last_usage` — the planner still records a call entry with zeroed
/// counts rather than skipping bookkeeping entirely.
#[derive(Debug, Clone, Default)]
pub struct LlmUsage {
    pub input_tokens: u64,
    pub output_tokens: u64,
}

impl LlmUsage {
    pub fn total_tokens(&self) -> u64 {
        self.input_tokens + self.output_tokens
    }
}

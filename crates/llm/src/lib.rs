//! Provider-agnostic LLM client interface.
//!
//! The engine talks to a [`LlmClient`] — a blocking `call` plus a streaming
//! `stream` returning incremental [`Delta`]s. The single concrete adapter
//! speaks the OpenAI-compatible chat-completions wire format; [`resolve_model`]
//! maps an [`wick_domain::config::ModelRef`] onto it.

pub mod client;
pub mod openai;
pub mod sse;

pub use client::{
    CallCtx, ChatRequest, ChatResponse, Delta, LlmClient, StreamAccumulator, ToolCallDelta,
};
pub use openai::OpenAiCompatClient;

use std::sync::Arc;

use wick_domain::config::ModelRef;
use wick_domain::{Error, Result};

/// Resolve a model reference into a client, once at instance construction.
///
/// Shortcuts use the ambient environment (`WICK_LLM_BASE_URL`,
/// `WICK_LLM_API_KEY` with an `OPENAI_API_KEY` fallback); explicit blocks
/// carry their own endpoint and key.
pub fn resolve_model(model: &ModelRef) -> Result<Arc<dyn LlmClient>> {
    match model {
        ModelRef::Shortcut(name) => {
            // "provider/model" shortcuts keep only the model part on the wire.
            let model_name = name.rsplit('/').next().unwrap_or(name);
            let base_url = std::env::var("WICK_LLM_BASE_URL")
                .unwrap_or_else(|_| "https://api.openai.com/v1".into());
            let api_key = std::env::var("WICK_LLM_API_KEY")
                .or_else(|_| std::env::var("OPENAI_API_KEY"))
                .ok();
            Ok(Arc::new(OpenAiCompatClient::new(
                base_url,
                model_name.to_string(),
                api_key,
            )))
        }
        ModelRef::Explicit {
            provider,
            model,
            api_key,
            base_url,
        } => {
            let base_url = base_url
                .clone()
                .ok_or_else(|| Error::Config(format!("model block for '{provider}' needs a base_url")))?;
            Ok(Arc::new(OpenAiCompatClient::new(
                base_url,
                model.clone(),
                api_key.clone(),
            )))
        }
    }
}

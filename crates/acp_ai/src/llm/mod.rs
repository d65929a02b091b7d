use acp_core::error::AppError;

/// External generation capability. Stateless per call; may fail wholesale.
pub trait Llm: Send + Sync {
    fn generate(&self, prompt: &str, max_output_tokens: u32) -> Result<String, AppError>;
}

pub mod ollama_llm;

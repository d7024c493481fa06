//! LLM provider adapters

mod gemini;
mod qwen;

pub use gemini::GeminiService;
pub use qwen::QwenService;

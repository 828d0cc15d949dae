//! Concrete LLM provider adapters.

pub mod anthropic;
pub mod common;
pub mod openai;

//! LLM client collaborator.
//!
//! The core never talks to a model directly; rule extraction and the hybrid
//! verifier's judge go through the [`LlmClient`] trait. One concrete
//! Anthropic-backed implementation ships here, plus a mock for tests.

mod client;

pub use client::{
    AnthropicClient, ClientConfig, CompletionRequest, CompletionResponse, LlmClient,
    MockLlmClient, TokenUsage,
};

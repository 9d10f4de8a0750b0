//! Service integrations for external APIs and clients.
//!
//! This module contains implementations for the services botforge talks to:
//! - Chat services (Discord)
//! - Database services (SurrealDB)
//! - LLM services (OpenAI, Anthropic and xAI)
//! - Tools the model can call, and MCP on both sides of the wire
//!
//! Each service module defines both generic traits and concrete implementations,
//! allowing for extensibility and easy testing.

pub mod chat;
pub mod db;
pub mod llm;
pub mod mcp;
pub mod tools;

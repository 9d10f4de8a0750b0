//! Core components, types, and utilities for botforge.
//!
//! This module contains fundamental building blocks used throughout the application:
//! - Configuration handling and environment variables.
//! - Prompt templates and canned replies.
//! - Common types and result handling.

pub mod config;
pub mod prompts;
pub mod types;

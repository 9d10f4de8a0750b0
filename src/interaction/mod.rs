//! Event handling for inbound chat messages.
//!
//! This module turns an inbound message into a reply:
//! - Deciding whether to respond ([`trigger`])
//! - Assembling the conversation context from history ([`context`])
//! - Running the completion and any tool calls ([`round_trip`], [`fallback`])
//! - Sending and recording the reply ([`dispatch`])
//!
//! [`chat_event`] wires these together.

pub mod chat_event;
pub mod context;
pub mod dispatch;
pub mod fallback;
pub mod round_trip;
pub mod trigger;

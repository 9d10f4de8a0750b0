pub mod discord;

use std::{ops::Deref, sync::Arc};

use async_trait::async_trait;

use crate::base::types::{InboundMessage, Res, Void};

// Types.

/// Called for every inbound message the chat client receives.
pub type InboundCallback = Arc<dyn Fn(InboundMessage) + Send + Sync>;

// Traits.

/// Generic "chat" trait that clients must implement.
///
/// This trait defines the core functionality for interacting with chat platforms
/// like Discord. Implementing this trait allows different chat services to be used
/// with botforge.
#[async_trait]
pub trait GenericChatClient: Send + Sync + 'static {
    /// Get the bot user ID.
    ///
    /// Returns the unique identifier for the bot in the chat platform,
    /// which is used to detect when the bot is mentioned.
    fn bot_user_id(&self) -> &str;

    /// Whether the gateway connection is up.
    fn is_connected(&self) -> bool;

    /// Start the chat client listener.
    ///
    /// Every inbound message is handed to `on_message`. This runs until the connection closes.
    async fn start(&self, on_message: InboundCallback) -> Void;

    /// Send a message to a channel, optionally as a reply to `reply_to`.
    ///
    /// Returns the id of the sent message.
    async fn send_message(&self, channel_id: &str, text: &str, reply_to: Option<&str>) -> Res<String>;

    /// Show the typing indicator in a channel.
    async fn broadcast_typing(&self, channel_id: &str) -> Void;
}

// Structs.

/// Chat client for the application.
///
/// It is designed to be trivially cloneable, allowing it to be passed around
/// without the need for `Arc` or `Mutex`.
#[derive(Clone)]
pub struct ChatClient {
    inner: Arc<dyn GenericChatClient>,
}

impl Deref for ChatClient {
    type Target = dyn GenericChatClient;

    fn deref(&self) -> &Self::Target {
        &*self.inner
    }
}

impl ChatClient {
    pub fn new(inner: Arc<dyn GenericChatClient>) -> Self {
        Self { inner }
    }
}

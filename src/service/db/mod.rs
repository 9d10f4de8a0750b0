pub mod surreal;

use std::{ops::Deref, sync::Arc};

use async_trait::async_trait;

use crate::base::types::{DocumentCollection, NewDocument, Res, ScoredDocument, StoreStats, StoredMessage, Void};

// Traits.

/// Generic database client trait that clients must implement.
///
/// This trait defines the conversation history store plus the vector document store.
/// Implementing this trait allows different database backends to be used with botforge.
#[async_trait]
pub trait GenericDbClient: Send + Sync + 'static {
    /// Checks that the database answers.
    async fn ping(&self) -> Void;

    /// Creates or refreshes the user row for a message author.
    async fn upsert_user(&self, user_id: &str, username: &str) -> Void;

    /// Appends a message to the history store.
    ///
    /// Returns `false` (and writes nothing) when a message with the same id was already stored,
    /// which makes replayed deliveries harmless.
    async fn add_message(&self, message: &StoredMessage) -> Res<bool>;

    /// Gets up to `limit` messages of a (user, channel) pair, most recent first.
    async fn get_history(&self, user_id: &str, channel_id: &str, limit: usize) -> Res<Vec<StoredMessage>>;

    /// Case-insensitive text search over stored messages, most recent first.
    async fn search_messages(&self, query: &str, channel_id: Option<&str>, limit: usize) -> Res<Vec<StoredMessage>>;

    /// Gets aggregate counters over users and messages.
    async fn get_stats(&self) -> Res<StoreStats>;

    /// Stores a document with its embedding, returning the new document id.
    async fn add_document(&self, document: &NewDocument) -> Res<String>;

    /// Finds the documents of a collection most similar to `embedding` by cosine similarity.
    async fn search_documents(&self, collection: DocumentCollection, embedding: &[f32], limit: usize) -> Res<Vec<ScoredDocument>>;
}

// Structs.

/// Database client for botforge.
///
/// This is trivially cloneable and can be passed around without the need for `Arc` or `Mutex`.
#[derive(Clone)]
pub struct DbClient {
    inner: Arc<dyn GenericDbClient>,
}

impl Deref for DbClient {
    type Target = dyn GenericDbClient;

    fn deref(&self) -> &Self::Target {
        self.inner.as_ref()
    }
}

impl DbClient {
    pub fn new(inner: Arc<dyn GenericDbClient>) -> Self {
        Self { inner }
    }
}

//! SurrealDB implementation of the history and document store.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{Duration, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use surrealdb::{
    Surreal,
    engine::any::{self, Any},
    opt::auth::Root,
    sql::{Datetime, Thing},
};
use tracing::{info, instrument, warn};

use super::{DbClient, GenericDbClient};
use crate::base::{
    config::Config,
    types::{DocumentCollection, MessageRole, NewDocument, Res, ScoredDocument, StoreStats, StoredMessage, Void},
};

const SCHEMA: &str = r#"
DEFINE TABLE IF NOT EXISTS user SCHEMALESS;
DEFINE TABLE IF NOT EXISTS message SCHEMALESS;
DEFINE INDEX IF NOT EXISTS message_user_channel ON message FIELDS user_id, channel_id;
DEFINE TABLE IF NOT EXISTS document SCHEMALESS;
DEFINE INDEX IF NOT EXISTS document_collection ON document FIELDS collection;
"#;

// Records.

#[derive(Debug, Clone, Serialize, Deserialize)]
struct UserRecord {
    user_id: String,
    username: String,
    updated_at: Datetime,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct MessageRecord {
    message_id: String,
    channel_id: String,
    user_id: String,
    username: String,
    content: String,
    role: MessageRole,
    bot_name: Option<String>,
    created_at: Datetime,
    metadata: Value,
}

impl From<&StoredMessage> for MessageRecord {
    fn from(message: &StoredMessage) -> Self {
        Self {
            message_id: message.id.clone(),
            channel_id: message.channel_id.clone(),
            user_id: message.user_id.clone(),
            username: message.username.clone(),
            content: message.content.clone(),
            role: message.role,
            bot_name: message.bot_name.clone(),
            created_at: Datetime::from(message.created_at),
            metadata: message.metadata.clone(),
        }
    }
}

impl From<MessageRecord> for StoredMessage {
    fn from(record: MessageRecord) -> Self {
        Self {
            id: record.message_id,
            channel_id: record.channel_id,
            user_id: record.user_id,
            username: record.username,
            content: record.content,
            role: record.role,
            bot_name: record.bot_name,
            created_at: record.created_at.0,
            metadata: record.metadata,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct DocumentRecord {
    collection: DocumentCollection,
    content: String,
    embedding: Vec<f32>,
    metadata: Value,
    created_at: Datetime,
}

#[derive(Debug, Deserialize)]
struct CreatedRecord {
    id: Thing,
}

#[derive(Debug, Deserialize)]
struct ScoredRow {
    id: String,
    collection: DocumentCollection,
    content: String,
    metadata: Value,
    score: f64,
}

#[derive(Debug, Deserialize)]
struct CountRow {
    count: u64,
}

// Client.

/// History and document store backed by SurrealDB.
pub struct SurrealDbClient {
    db: Surreal<Any>,
}

impl DbClient {
    /// Connects to the database configured by `db_endpoint`.
    pub async fn surreal(config: &Config) -> Res<Self> {
        let client = SurrealDbClient::connect(config).await?;

        Ok(Self::new(Arc::new(client)))
    }

    /// Creates a fresh in-memory database.
    pub async fn surreal_memory() -> Res<Self> {
        let db = any::connect("mem://").await?;
        let client = SurrealDbClient::prepare(db, "botforge", "botforge").await?;

        Ok(Self::new(Arc::new(client)))
    }
}

impl SurrealDbClient {
    #[instrument(skip_all)]
    pub async fn connect(config: &Config) -> Res<Self> {
        let endpoint = if config.db_in_memory() { "mem://" } else { config.db_endpoint.as_str() };

        info!("Connecting to database at `{}` ...", endpoint);

        let db = any::connect(endpoint).await?;

        if let (Some(username), Some(password)) = (&config.db_username, &config.db_password) {
            db.signin(Root {
                username: username.as_str(),
                password: password.as_str(),
            })
            .await?;
        }

        Self::prepare(db, &config.db_namespace, &config.db_database).await
    }

    async fn prepare(db: Surreal<Any>, namespace: &str, database: &str) -> Res<Self> {
        db.use_ns(namespace).use_db(database).await?;
        db.query(SCHEMA).await?.check()?;

        Ok(Self { db })
    }

    async fn count(&self, query: &str, since: Option<Datetime>) -> Res<u64> {
        let mut request = self.db.query(query);

        if let Some(since) = since {
            request = request.bind(("since", since));
        }

        let row: Option<CountRow> = request.await?.take(0)?;

        Ok(row.map(|r| r.count).unwrap_or(0))
    }
}

#[async_trait]
impl GenericDbClient for SurrealDbClient {
    async fn ping(&self) -> Void {
        self.db.health().await?;

        Ok(())
    }

    #[instrument(skip_all)]
    async fn upsert_user(&self, user_id: &str, username: &str) -> Void {
        let record = UserRecord {
            user_id: user_id.to_string(),
            username: username.to_string(),
            updated_at: Datetime::from(Utc::now()),
        };

        let _: Option<UserRecord> = self.db.upsert(("user", user_id)).content(record).await?;

        Ok(())
    }

    #[instrument(skip_all)]
    async fn add_message(&self, message: &StoredMessage) -> Res<bool> {
        let existing: Option<MessageRecord> = self.db.select(("message", message.id.as_str())).await?;

        if existing.is_some() {
            warn!("Message `{}` is already stored.", message.id);
            return Ok(false);
        }

        let created: Result<Option<MessageRecord>, surrealdb::Error> = self.db.create(("message", message.id.as_str())).content(MessageRecord::from(message)).await;

        match created {
            Ok(_) => Ok(true),
            Err(err) => {
                // A concurrent delivery of the same message may have won the race.
                let existing: Option<MessageRecord> = self.db.select(("message", message.id.as_str())).await?;

                match existing {
                    Some(_) => Ok(false),
                    None => Err(err.into()),
                }
            }
        }
    }

    #[instrument(skip_all)]
    async fn get_history(&self, user_id: &str, channel_id: &str, limit: usize) -> Res<Vec<StoredMessage>> {
        if limit == 0 {
            return Ok(Vec::new());
        }

        let records: Vec<MessageRecord> = self
            .db
            .query("SELECT * FROM message WHERE user_id = $user_id AND channel_id = $channel_id ORDER BY created_at DESC LIMIT $limit")
            .bind(("user_id", user_id.to_string()))
            .bind(("channel_id", channel_id.to_string()))
            .bind(("limit", limit as i64))
            .await?
            .take(0)?;

        Ok(records.into_iter().map(StoredMessage::from).collect())
    }

    #[instrument(skip_all)]
    async fn search_messages(&self, query: &str, channel_id: Option<&str>, limit: usize) -> Res<Vec<StoredMessage>> {
        let filter = if channel_id.is_some() { " AND channel_id = $channel_id" } else { "" };
        let statement = format!("SELECT * FROM message WHERE string::lowercase(content) CONTAINS $query{filter} ORDER BY created_at DESC LIMIT $limit");

        let mut request = self.db.query(statement).bind(("query", query.to_lowercase())).bind(("limit", limit as i64));

        if let Some(channel_id) = channel_id {
            request = request.bind(("channel_id", channel_id.to_string()));
        }

        let records: Vec<MessageRecord> = request.await?.take(0)?;

        Ok(records.into_iter().map(StoredMessage::from).collect())
    }

    #[instrument(skip_all)]
    async fn get_stats(&self) -> Res<StoreStats> {
        let since = Datetime::from(Utc::now() - Duration::hours(24));

        let users = self.count("SELECT count() AS count FROM user GROUP ALL", None).await?;
        let total_messages = self.count("SELECT count() AS count FROM message GROUP ALL", None).await?;
        let messages_24h = self.count("SELECT count() AS count FROM message WHERE created_at > $since GROUP ALL", Some(since.clone())).await?;
        let active_users_24h = self
            .count(
                "SELECT count() AS count FROM (SELECT user_id FROM message WHERE role = 'user' AND created_at > $since GROUP BY user_id) GROUP ALL",
                Some(since),
            )
            .await?;

        Ok(StoreStats {
            users,
            total_messages,
            messages_24h,
            active_users_24h,
        })
    }

    #[instrument(skip_all)]
    async fn add_document(&self, document: &NewDocument) -> Res<String> {
        let record = DocumentRecord {
            collection: document.collection,
            content: document.content.clone(),
            embedding: document.embedding.clone(),
            metadata: document.metadata.clone(),
            created_at: Datetime::from(Utc::now()),
        };

        let created: Option<CreatedRecord> = self.db.create("document").content(record).await?;
        let created = created.ok_or_else(|| anyhow::anyhow!("Document was not created."))?;

        Ok(created.id.id.to_raw())
    }

    #[instrument(skip_all)]
    async fn search_documents(&self, collection: DocumentCollection, embedding: &[f32], limit: usize) -> Res<Vec<ScoredDocument>> {
        if embedding.is_empty() || limit == 0 {
            return Ok(Vec::new());
        }

        let rows: Vec<ScoredRow> = self
            .db
            .query(
                "SELECT meta::id(id) AS id, collection, content, metadata, vector::similarity::cosine(embedding, $embedding) AS score \
                 FROM document WHERE collection = $collection AND array::len(embedding) = $dimensions \
                 ORDER BY score DESC LIMIT $limit",
            )
            .bind(("embedding", embedding.to_vec()))
            .bind(("collection", collection))
            .bind(("dimensions", embedding.len() as i64))
            .bind(("limit", limit as i64))
            .await?
            .take(0)?;

        Ok(rows
            .into_iter()
            .map(|row| ScoredDocument {
                id: row.id,
                collection: row.collection,
                content: row.content,
                metadata: row.metadata,
                score: row.score as f32,
            })
            .collect())
    }
}

// Tests.

#[cfg(test)]
mod tests {
    use chrono::{DateTime, TimeZone};
    use serde_json::json;

    use super::*;

    fn at(seconds: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(1_700_000_000 + seconds, 0).unwrap()
    }

    fn message(id: &str, user_id: &str, channel_id: &str, content: &str, created_at: DateTime<Utc>) -> StoredMessage {
        StoredMessage {
            id: id.to_string(),
            channel_id: channel_id.to_string(),
            user_id: user_id.to_string(),
            username: "alice".to_string(),
            content: content.to_string(),
            role: MessageRole::User,
            bot_name: None,
            created_at,
            metadata: json!({ "channelId": channel_id }),
        }
    }

    #[tokio::test]
    async fn test_add_message_is_idempotent() {
        let db = DbClient::surreal_memory().await.unwrap();
        let msg = message("1001", "U1", "C1", "hello", at(0));

        assert!(db.add_message(&msg).await.unwrap());
        assert!(!db.add_message(&msg).await.unwrap());

        let history = db.get_history("U1", "C1", 10).await.unwrap();
        assert_eq!(history.len(), 1);
        assert_eq!(history[0], msg);
    }

    #[tokio::test]
    async fn test_history_is_most_recent_first_and_scoped() {
        let db = DbClient::surreal_memory().await.unwrap();

        for i in 0..6 {
            db.add_message(&message(&format!("m{i}"), "U1", "C1", &format!("msg {i}"), at(i))).await.unwrap();
        }
        db.add_message(&message("other-user", "U2", "C1", "not mine", at(100))).await.unwrap();
        db.add_message(&message("other-channel", "U1", "C2", "elsewhere", at(100))).await.unwrap();

        let history = db.get_history("U1", "C1", 4).await.unwrap();

        let contents = history.iter().map(|m| m.content.as_str()).collect::<Vec<_>>();
        assert_eq!(contents, vec!["msg 5", "msg 4", "msg 3", "msg 2"]);
        assert!(db.get_history("U1", "C1", 0).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_history_orders_within_a_second() {
        let db = DbClient::surreal_memory().await.unwrap();
        let base = Utc.timestamp_millis_opt(1_700_000_000_000).unwrap();

        // Inserted newest first, all inside the same second.
        for i in (0..4).rev() {
            let created_at = base + chrono::Duration::milliseconds(100 * i);
            db.add_message(&message(&format!("s{i}"), "U1", "C1", &format!("burst {i}"), created_at)).await.unwrap();
        }

        let history = db.get_history("U1", "C1", 10).await.unwrap();

        let contents = history.iter().map(|m| m.content.as_str()).collect::<Vec<_>>();
        assert_eq!(contents, vec!["burst 3", "burst 2", "burst 1", "burst 0"]);
        assert_eq!(history[0].created_at, base + chrono::Duration::milliseconds(300));
    }

    #[tokio::test]
    async fn test_search_messages_and_stats() {
        let db = DbClient::surreal_memory().await.unwrap();

        db.upsert_user("U1", "alice").await.unwrap();
        db.upsert_user("U1", "alice2").await.unwrap();
        db.add_message(&message("1", "U1", "C1", "The Deploy failed", Utc::now())).await.unwrap();
        db.add_message(&message("2", "U1", "C2", "deploy again", Utc::now())).await.unwrap();
        db.add_message(&message("3", "U1", "C1", "unrelated", at(0))).await.unwrap();

        let found = db.search_messages("deploy", None, 10).await.unwrap();
        assert_eq!(found.len(), 2);

        let found = db.search_messages("DEPLOY", Some("C1"), 10).await.unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].id, "1");

        let stats = db.get_stats().await.unwrap();
        assert_eq!(stats.users, 1);
        assert_eq!(stats.total_messages, 3);
        assert_eq!(stats.messages_24h, 2);
        assert_eq!(stats.active_users_24h, 1);
    }

    #[tokio::test]
    async fn test_document_similarity_search() {
        let db = DbClient::surreal_memory().await.unwrap();

        let doc = |content: &str, embedding: Vec<f32>, collection| NewDocument {
            collection,
            content: content.to_string(),
            embedding,
            metadata: json!({}),
        };

        db.add_document(&doc("north", vec![0.0, 1.0], DocumentCollection::Documents)).await.unwrap();
        db.add_document(&doc("east", vec![1.0, 0.0], DocumentCollection::Documents)).await.unwrap();
        db.add_document(&doc("code east", vec![1.0, 0.0], DocumentCollection::Code)).await.unwrap();

        let results = db.search_documents(DocumentCollection::Documents, &[0.9, 0.1], 5).await.unwrap();

        assert_eq!(results.len(), 2);
        assert_eq!(results[0].content, "east");
        assert!(results[0].score > results[1].score);
        assert!(!results[0].id.is_empty());
    }
}

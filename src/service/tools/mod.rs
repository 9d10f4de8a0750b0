//! Tools the model can call during a round trip.
//!
//! Each executor advertises a set of [`ToolDescriptor`]s and executes calls by name. The
//! [`ToolRouter`] combines executors and dispatches a call to the one that owns the tool.

pub mod discord;
pub mod filesystem;
pub mod store;

use std::{ops::Deref, sync::Arc};

use anyhow::anyhow;
use async_trait::async_trait;
use serde_json::Value;
use tracing::debug;

use crate::{base::types::Res, service::llm::ToolDescriptor};

// Types.

/// Where a tool call originates from.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ToolCallContext {
    pub channel_id: Option<String>,
    pub guild_id: Option<String>,
    pub user_id: Option<String>,
}

// Traits.

/// Generic tool executor trait.
#[async_trait]
pub trait GenericToolExecutor: Send + Sync + 'static {
    /// The tools this executor can run.
    fn descriptors(&self) -> Vec<ToolDescriptor>;

    /// Executes the tool `name` and returns its JSON payload.
    async fn execute(&self, name: &str, arguments: &Value, context: &ToolCallContext) -> Res<Value>;
}

// Structs.

/// Tool executor for the application.
///
/// This is trivially cloneable and can be passed around without the need for `Arc` or `Mutex`.
#[derive(Clone)]
pub struct ToolExecutor {
    inner: Arc<dyn GenericToolExecutor>,
}

impl Deref for ToolExecutor {
    type Target = dyn GenericToolExecutor;

    fn deref(&self) -> &Self::Target {
        &*self.inner
    }
}

impl ToolExecutor {
    pub fn new(inner: Arc<dyn GenericToolExecutor>) -> Self {
        Self { inner }
    }

    pub fn has_tool(&self, name: &str) -> bool {
        self.descriptors().iter().any(|d| d.name == name)
    }
}

/// Dispatches tool calls to the first executor that advertises the tool.
pub struct ToolRouter {
    executors: Vec<ToolExecutor>,
}

impl ToolRouter {
    pub fn new(executors: Vec<ToolExecutor>) -> Self {
        Self { executors }
    }
}

impl From<ToolRouter> for ToolExecutor {
    fn from(router: ToolRouter) -> Self {
        Self::new(Arc::new(router))
    }
}

#[async_trait]
impl GenericToolExecutor for ToolRouter {
    fn descriptors(&self) -> Vec<ToolDescriptor> {
        let mut seen = std::collections::HashSet::new();

        self.executors
            .iter()
            .flat_map(|e| e.descriptors())
            .filter(|d| seen.insert(d.name.clone()))
            .collect()
    }

    async fn execute(&self, name: &str, arguments: &Value, context: &ToolCallContext) -> Res<Value> {
        let executor = self.executors.iter().find(|e| e.has_tool(name)).ok_or_else(|| anyhow!("Unknown tool: {name}"))?;

        debug!("Executing tool `{}`.", name);

        executor.execute(name, arguments, context).await
    }
}

// Helpers.

/// Reads a string argument, falling back to `fallback` when absent or blank.
pub fn arg_str<'a>(arguments: &'a Value, key: &str, fallback: Option<&'a str>) -> Option<&'a str> {
    arguments.get(key).and_then(Value::as_str).filter(|s| !s.trim().is_empty()).or(fallback)
}

/// Reads a string argument that must be present.
pub fn require_str<'a>(arguments: &'a Value, key: &str) -> Res<&'a str> {
    arg_str(arguments, key, None).ok_or_else(|| anyhow!("Missing required argument `{key}`."))
}

/// Reads a positive integer argument, clamped to `max`.
pub fn arg_limit(arguments: &Value, key: &str, default: usize, max: usize) -> usize {
    arguments
        .get(key)
        .and_then(|v| v.as_u64().or_else(|| v.as_str().and_then(|s| s.parse().ok())))
        .map(|n| n as usize)
        .unwrap_or(default)
        .clamp(1, max)
}

/// Builds a JSON schema object for a tool with the given properties.
pub fn object_schema(properties: Value, required: &[&str]) -> Value {
    serde_json::json!({
        "type": "object",
        "properties": properties,
        "required": required,
    })
}

// Tests.

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    struct Fixed(&'static str);

    #[async_trait]
    impl GenericToolExecutor for Fixed {
        fn descriptors(&self) -> Vec<ToolDescriptor> {
            vec![ToolDescriptor {
                name: self.0.to_string(),
                description: String::new(),
                parameters: object_schema(json!({}), &[]),
            }]
        }

        async fn execute(&self, name: &str, _arguments: &Value, _context: &ToolCallContext) -> Res<Value> {
            Ok(json!({ "from": self.0, "name": name }))
        }
    }

    #[tokio::test]
    async fn test_router_dispatches_by_name() {
        let router = ToolRouter::new(vec![ToolExecutor::new(Arc::new(Fixed("a"))), ToolExecutor::new(Arc::new(Fixed("b")))]);
        let ctx = ToolCallContext::default();

        assert_eq!(router.descriptors().len(), 2);
        assert_eq!(router.execute("b", &json!({}), &ctx).await.unwrap()["from"], "b");

        let err = router.execute("c", &json!({}), &ctx).await.unwrap_err();
        assert_eq!(err.to_string(), "Unknown tool: c");
    }

    #[test]
    fn test_argument_helpers() {
        let args = json!({ "limit": "500", "query": "  ", "channel_id": "42" });

        assert_eq!(arg_limit(&args, "limit", 10, 100), 100);
        assert_eq!(arg_limit(&args, "missing", 10, 100), 10);
        assert_eq!(arg_str(&args, "query", Some("fallback")), Some("fallback"));
        assert_eq!(require_str(&args, "channel_id").unwrap(), "42");
        assert!(require_str(&args, "query").is_err());
    }
}

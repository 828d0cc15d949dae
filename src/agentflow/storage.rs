//! Persistence seams.
//!
//! The engine consumes storage through three narrow traits — agents,
//! conversations, MCP servers — so any backing store can plug in. This
//! module also ships a path-rooted [`FileAgentRepository`] (used by the
//! `agentctl` CLI and tests) and in-memory repositories for the other two.
//!
//! Credentials never land in records: MCP records carry only a
//! `secret_ref` into the secret store.

use std::collections::HashMap;
use std::error::Error;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::agentflow::config::AgentConfig;
use crate::agentflow::mcp::{McpServerConfig, McpServerInstance, ServerStatus};

type BoxError = Box<dyn Error + Send + Sync>;

// ---------------------------------------------------------------------------
// Agents
// ---------------------------------------------------------------------------

/// Persisted agent record; `config_json` holds the full configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentRecord {
    pub id: String,
    pub user_id: String,
    pub agent_type: String,
    pub is_active: bool,
    #[serde(rename = "config_json")]
    pub config: AgentConfig,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Read/write access to stored agent configurations.
#[async_trait]
pub trait AgentRepository: Send + Sync {
    async fn get(&self, agent_id: &str) -> Result<Option<AgentConfig>, BoxError>;
    async fn put(&self, config: AgentConfig, user_id: &str) -> Result<(), BoxError>;
    async fn delete(&self, agent_id: &str) -> Result<bool, BoxError>;
    async fn list(&self) -> Result<Vec<AgentRecord>, BoxError>;
}

/// Path-rooted agent repository: one JSON file per agent under `root`.
pub struct FileAgentRepository {
    root: PathBuf,
}

impl FileAgentRepository {
    /// Open (and create if needed) a repository rooted at `root`.
    pub fn new(root: impl AsRef<Path>) -> std::io::Result<Self> {
        let root = root.as_ref().to_path_buf();
        std::fs::create_dir_all(&root)?;
        Ok(Self { root })
    }

    fn record_path(&self, agent_id: &str) -> PathBuf {
        // Agent ids double as file names; reject separators outright.
        let safe: String = agent_id
            .chars()
            .map(|c| if c == '/' || c == '\\' { '_' } else { c })
            .collect();
        self.root.join(format!("{}.json", safe))
    }
}

#[async_trait]
impl AgentRepository for FileAgentRepository {
    async fn get(&self, agent_id: &str) -> Result<Option<AgentConfig>, BoxError> {
        let path = self.record_path(agent_id);
        match tokio::fs::read_to_string(&path).await {
            Ok(text) => {
                let record: AgentRecord = serde_json::from_str(&text)?;
                Ok(Some(record.config))
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(Box::new(e)),
        }
    }

    async fn put(&self, config: AgentConfig, user_id: &str) -> Result<(), BoxError> {
        let record = AgentRecord {
            id: config.id.clone(),
            user_id: user_id.to_string(),
            agent_type: config.kind.as_str().to_string(),
            is_active: config.is_active,
            created_at: config.created_at,
            updated_at: Utc::now(),
            config,
        };
        let path = self.record_path(&record.id);
        let text = serde_json::to_string_pretty(&record)?;
        tokio::fs::write(&path, text).await?;
        Ok(())
    }

    async fn delete(&self, agent_id: &str) -> Result<bool, BoxError> {
        let path = self.record_path(agent_id);
        match tokio::fs::remove_file(&path).await {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(Box::new(e)),
        }
    }

    async fn list(&self) -> Result<Vec<AgentRecord>, BoxError> {
        let mut records = Vec::new();
        let mut entries = tokio::fs::read_dir(&self.root).await?;
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            let text = tokio::fs::read_to_string(&path).await?;
            match serde_json::from_str::<AgentRecord>(&text) {
                Ok(record) => records.push(record),
                Err(e) => log::warn!("skipping unreadable agent record {:?}: {}", path, e),
            }
        }
        records.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(records)
    }
}

// ---------------------------------------------------------------------------
// Conversations
// ---------------------------------------------------------------------------

/// Conversation header record.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConversationRecord {
    pub id: String,
    pub user_id: String,
    pub agent_id: String,
    pub title: String,
    pub is_auto_title: bool,
    pub is_archived: bool,
    pub message_count: usize,
    pub last_message_preview: Option<String>,
    pub last_message_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// One persisted message.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MessageRecord {
    pub id: String,
    pub conversation_id: String,
    pub role: String,
    pub content: String,
    #[serde(default)]
    pub workflow_id: Option<String>,
    #[serde(default)]
    pub execution_id: Option<String>,
    #[serde(default)]
    pub metadata: HashMap<String, serde_json::Value>,
    pub created_at: DateTime<Utc>,
}

/// Derive a conversation title from the first user message: up to 50
/// characters, broken at the last space after position 30, with an
/// ellipsis when truncated. Empty content falls back to the default.
pub fn derive_title(content: &str) -> String {
    let trimmed = content.trim();
    if trimmed.is_empty() {
        return "New Conversation".to_string();
    }

    let truncated: String = trimmed.chars().take(50).collect();
    if truncated.chars().count() < trimmed.chars().count() {
        let mut title = truncated;
        if let Some(last_space) = title.rfind(' ') {
            if last_space > 30 {
                title.truncate(last_space);
            }
        }
        format!("{}...", title.trim_end())
    } else {
        truncated
    }
}

/// Conversation persistence consumed by the engine.
#[async_trait]
pub trait ConversationRepository: Send + Sync {
    async fn create_conversation(
        &self,
        user_id: &str,
        agent_id: &str,
        title: Option<String>,
    ) -> Result<ConversationRecord, BoxError>;

    /// Append a message; bumps counters, preview, and (for the first user
    /// message of an auto-titled conversation) the derived title.
    async fn add_message(
        &self,
        conversation_id: &str,
        role: &str,
        content: &str,
        workflow_id: Option<String>,
        execution_id: Option<String>,
        metadata: HashMap<String, serde_json::Value>,
    ) -> Result<MessageRecord, BoxError>;

    /// Conversations for a user, newest-updated first, paged.
    async fn list_conversations(
        &self,
        user_id: &str,
        offset: usize,
        limit: usize,
    ) -> Result<Vec<ConversationRecord>, BoxError>;

    /// A conversation plus its most recent messages (up to `message_limit`).
    async fn get_conversation(
        &self,
        conversation_id: &str,
        message_limit: usize,
    ) -> Result<Option<(ConversationRecord, Vec<MessageRecord>)>, BoxError>;

    async fn update_title(&self, conversation_id: &str, title: &str) -> Result<bool, BoxError>;
    async fn archive_conversation(&self, conversation_id: &str) -> Result<bool, BoxError>;
    async fn delete_conversation(&self, conversation_id: &str) -> Result<bool, BoxError>;
}

#[derive(Default)]
struct ConversationStore {
    conversations: HashMap<String, ConversationRecord>,
    messages: HashMap<String, Vec<MessageRecord>>,
}

/// In-memory conversation repository used by tests and local tooling.
#[derive(Default)]
pub struct InMemoryConversationRepository {
    store: RwLock<ConversationStore>,
}

impl InMemoryConversationRepository {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ConversationRepository for InMemoryConversationRepository {
    async fn create_conversation(
        &self,
        user_id: &str,
        agent_id: &str,
        title: Option<String>,
    ) -> Result<ConversationRecord, BoxError> {
        let now = Utc::now();
        let record = ConversationRecord {
            id: format!("conv-{}", Uuid::new_v4().simple()),
            user_id: user_id.to_string(),
            agent_id: agent_id.to_string(),
            is_auto_title: title.is_none(),
            title: title.unwrap_or_else(|| "New Conversation".to_string()),
            is_archived: false,
            message_count: 0,
            last_message_preview: None,
            last_message_at: None,
            created_at: now,
            updated_at: now,
        };

        let mut store = self.store.write().await;
        store
            .conversations
            .insert(record.id.clone(), record.clone());
        store.messages.insert(record.id.clone(), Vec::new());
        Ok(record)
    }

    async fn add_message(
        &self,
        conversation_id: &str,
        role: &str,
        content: &str,
        workflow_id: Option<String>,
        execution_id: Option<String>,
        metadata: HashMap<String, serde_json::Value>,
    ) -> Result<MessageRecord, BoxError> {
        let mut store = self.store.write().await;
        let Some(conversation) = store.conversations.get_mut(conversation_id) else {
            return Err(format!("Conversation not found: {}", conversation_id).into());
        };

        let now = Utc::now();
        conversation.message_count += 1;
        conversation.last_message_preview = Some(derive_title(content));
        conversation.last_message_at = Some(now);
        conversation.updated_at = now;

        if conversation.is_auto_title && role == "user" && conversation.message_count == 1 {
            conversation.title = derive_title(content);
        }

        let record = MessageRecord {
            id: format!("msg-{}", Uuid::new_v4().simple()),
            conversation_id: conversation_id.to_string(),
            role: role.to_string(),
            content: content.to_string(),
            workflow_id,
            execution_id,
            metadata,
            created_at: now,
        };

        store
            .messages
            .get_mut(conversation_id)
            .expect("messages vec exists for every conversation")
            .push(record.clone());
        Ok(record)
    }

    async fn list_conversations(
        &self,
        user_id: &str,
        offset: usize,
        limit: usize,
    ) -> Result<Vec<ConversationRecord>, BoxError> {
        let store = self.store.read().await;
        let mut records: Vec<ConversationRecord> = store
            .conversations
            .values()
            .filter(|c| c.user_id == user_id && !c.is_archived)
            .cloned()
            .collect();
        records.sort_by(|a, b| b.updated_at.cmp(&a.updated_at));
        Ok(records.into_iter().skip(offset).take(limit).collect())
    }

    async fn get_conversation(
        &self,
        conversation_id: &str,
        message_limit: usize,
    ) -> Result<Option<(ConversationRecord, Vec<MessageRecord>)>, BoxError> {
        let store = self.store.read().await;
        let Some(conversation) = store.conversations.get(conversation_id).cloned() else {
            return Ok(None);
        };
        let messages = store
            .messages
            .get(conversation_id)
            .map(|msgs| {
                let start = msgs.len().saturating_sub(message_limit);
                msgs[start..].to_vec()
            })
            .unwrap_or_default();
        Ok(Some((conversation, messages)))
    }

    async fn update_title(&self, conversation_id: &str, title: &str) -> Result<bool, BoxError> {
        let mut store = self.store.write().await;
        match store.conversations.get_mut(conversation_id) {
            Some(conversation) => {
                conversation.title = title.to_string();
                conversation.is_auto_title = false;
                conversation.updated_at = Utc::now();
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn archive_conversation(&self, conversation_id: &str) -> Result<bool, BoxError> {
        let mut store = self.store.write().await;
        match store.conversations.get_mut(conversation_id) {
            Some(conversation) => {
                conversation.is_archived = true;
                conversation.updated_at = Utc::now();
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn delete_conversation(&self, conversation_id: &str) -> Result<bool, BoxError> {
        let mut store = self.store.write().await;
        store.messages.remove(conversation_id);
        Ok(store.conversations.remove(conversation_id).is_some())
    }
}

// ---------------------------------------------------------------------------
// MCP servers
// ---------------------------------------------------------------------------

/// Persistence for configured MCP servers, consumed by the manager's
/// reconnect sweep.
#[async_trait]
pub trait McpServerRepository: Send + Sync {
    async fn list_all(&self) -> Result<Vec<McpServerInstance>, BoxError>;
    /// Full connection config, with credential headers resolved from the
    /// secret store.
    async fn get_config(&self, server_id: &str) -> Result<Option<McpServerConfig>, BoxError>;
    async fn update_status(
        &self,
        server_id: &str,
        status: ServerStatus,
        error_message: Option<String>,
    ) -> Result<(), BoxError>;
}

/// In-memory MCP server repository for tests and local tooling.
#[derive(Default)]
pub struct InMemoryMcpServerRepository {
    servers: RwLock<HashMap<String, (McpServerInstance, McpServerConfig)>>,
}

impl InMemoryMcpServerRepository {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn insert(&self, instance: McpServerInstance, config: McpServerConfig) {
        self.servers
            .write()
            .await
            .insert(instance.id.clone(), (instance, config));
    }
}

#[async_trait]
impl McpServerRepository for InMemoryMcpServerRepository {
    async fn list_all(&self) -> Result<Vec<McpServerInstance>, BoxError> {
        let servers = self.servers.read().await;
        let mut instances: Vec<McpServerInstance> =
            servers.values().map(|(i, _)| i.clone()).collect();
        instances.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(instances)
    }

    async fn get_config(&self, server_id: &str) -> Result<Option<McpServerConfig>, BoxError> {
        Ok(self
            .servers
            .read()
            .await
            .get(server_id)
            .map(|(_, c)| c.clone()))
    }

    async fn update_status(
        &self,
        server_id: &str,
        status: ServerStatus,
        error_message: Option<String>,
    ) -> Result<(), BoxError> {
        if let Some((instance, _)) = self.servers.write().await.get_mut(server_id) {
            instance.status = status;
            instance.error_message = error_message;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agentflow::config::AgentKind;

    #[test]
    fn test_derive_title_short_passes_through() {
        assert_eq!(derive_title("Hello there"), "Hello there");
        assert_eq!(derive_title("   "), "New Conversation");
        assert_eq!(derive_title(""), "New Conversation");
    }

    #[test]
    fn test_derive_title_breaks_at_late_space() {
        let content =
            "Please summarize the quarterly revenue figures for the Northwest region office";
        let title = derive_title(content);
        assert!(title.ends_with("..."));
        let body = title.trim_end_matches("...");
        assert!(body.chars().count() <= 50);
        // Broke on a word boundary past position 30.
        assert!(!body.ends_with(' '));
        assert!(content.starts_with(body));
    }

    #[test]
    fn test_derive_title_no_space_truncates_hard() {
        let content = "a".repeat(80);
        let title = derive_title(&content);
        assert_eq!(title, format!("{}...", "a".repeat(50)));
    }

    #[tokio::test]
    async fn test_file_repository_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let repo = FileAgentRepository::new(dir.path()).unwrap();

        let config = AgentConfig::new("greeter", "Greeter", AgentKind::Simple)
            .with_example("hello", "hi there");
        repo.put(config, "user-1").await.unwrap();

        let loaded = repo.get("greeter").await.unwrap().unwrap();
        assert_eq!(loaded.name, "Greeter");
        assert_eq!(loaded.examples.len(), 1);

        let records = repo.list().await.unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].agent_type, "simple");
        assert_eq!(records[0].user_id, "user-1");

        assert!(repo.delete("greeter").await.unwrap());
        assert!(!repo.delete("greeter").await.unwrap());
        assert!(repo.get("greeter").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_conversation_auto_title_from_first_user_message() {
        let repo = InMemoryConversationRepository::new();
        let conversation = repo
            .create_conversation("user-1", "agent-1", None)
            .await
            .unwrap();
        assert_eq!(conversation.title, "New Conversation");
        assert!(conversation.is_auto_title);

        repo.add_message(
            &conversation.id,
            "user",
            "How do I reset my password?",
            None,
            None,
            HashMap::new(),
        )
        .await
        .unwrap();

        let (updated, messages) = repo
            .get_conversation(&conversation.id, 10)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(updated.title, "How do I reset my password?");
        assert_eq!(updated.message_count, 1);
        assert_eq!(messages.len(), 1);

        // A second user message does not re-title.
        repo.add_message(
            &conversation.id,
            "user",
            "Different question",
            None,
            None,
            HashMap::new(),
        )
        .await
        .unwrap();
        let (updated, _) = repo
            .get_conversation(&conversation.id, 10)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(updated.title, "How do I reset my password?");
    }

    #[tokio::test]
    async fn test_list_conversations_orders_and_pages() {
        let repo = InMemoryConversationRepository::new();
        let first = repo
            .create_conversation("user-1", "agent-1", Some("First".into()))
            .await
            .unwrap();
        let second = repo
            .create_conversation("user-1", "agent-1", Some("Second".into()))
            .await
            .unwrap();

        // Touch the first so it becomes most recently updated.
        repo.add_message(&first.id, "user", "ping", None, None, HashMap::new())
            .await
            .unwrap();

        let listed = repo.list_conversations("user-1", 0, 10).await.unwrap();
        assert_eq!(listed[0].id, first.id);
        assert_eq!(listed[1].id, second.id);

        let page = repo.list_conversations("user-1", 1, 10).await.unwrap();
        assert_eq!(page.len(), 1);

        // Archived conversations drop out of listings.
        repo.archive_conversation(&second.id).await.unwrap();
        let listed = repo.list_conversations("user-1", 0, 10).await.unwrap();
        assert_eq!(listed.len(), 1);
    }

    #[tokio::test]
    async fn test_update_title_disables_auto() {
        let repo = InMemoryConversationRepository::new();
        let conversation = repo
            .create_conversation("user-1", "agent-1", None)
            .await
            .unwrap();
        assert!(repo.update_title(&conversation.id, "Renamed").await.unwrap());

        repo.add_message(&conversation.id, "user", "hello", None, None, HashMap::new())
            .await
            .unwrap();
        let (updated, _) = repo
            .get_conversation(&conversation.id, 10)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(updated.title, "Renamed");
    }
}

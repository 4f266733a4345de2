//! Multi-turn conversation memory.
//!
//! Each conversation id maps to a bounded message history, a rolling
//! topic/entity set and a periodically regenerated summary. Mutation is
//! serialized per conversation id; different ids never contend. Stale
//! conversations are evicted by an explicitly started periodic sweep.

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, OnceLock};
use std::time::Duration;

use chrono::{DateTime, Utc};
use regex::Regex;
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tokio::task::JoinHandle;

use crate::context::assembler::estimate_tokens;
use crate::context::ContextConfig;
use crate::search::query::is_stop_word;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContextMessage {
    /// "user", "assistant" or "system".
    pub role: String,
    pub content: String,
    pub token_count: usize,
    pub timestamp: DateTime<Utc>,
}

impl ContextMessage {
    pub fn new(role: impl Into<String>, content: impl Into<String>) -> Self {
        let content = content.into();
        let token_count = estimate_tokens(&content);
        Self {
            role: role.into(),
            content,
            token_count,
            timestamp: Utc::now(),
        }
    }
}

/// Per-conversation state. Sole owner: the context optimizer.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConversationContext {
    pub conversation_id: String,
    /// Bounded ring of the last K messages.
    pub messages: VecDeque<ContextMessage>,
    pub summary: Option<String>,
    pub key_topics: Vec<String>,
    /// Entity -> mention count, capped; most frequent retained.
    pub entities: HashMap<String, u32>,
    pub last_updated: DateTime<Utc>,
    pub context_window: usize,
    pub compression_level: u8,
}

impl ConversationContext {
    fn new(conversation_id: &str, context_window: usize, compression_level: u8) -> Self {
        Self {
            conversation_id: conversation_id.to_string(),
            messages: VecDeque::new(),
            summary: None,
            key_topics: Vec::new(),
            entities: HashMap::new(),
            last_updated: Utc::now(),
            context_window,
            compression_level,
        }
    }
}

#[derive(Debug, Clone)]
struct MemoryLimits {
    memory_size: usize,
    max_topics: usize,
    max_entities: usize,
    summary_min_messages: usize,
    idle_timeout: Duration,
    context_window: usize,
    compression_level: u8,
}

pub struct ConversationMemory {
    conversations: Mutex<HashMap<String, Arc<Mutex<ConversationContext>>>>,
    limits: MemoryLimits,
}

impl ConversationMemory {
    pub fn new(config: &ContextConfig) -> Self {
        Self {
            conversations: Mutex::new(HashMap::new()),
            limits: MemoryLimits {
                memory_size: config.memory_size,
                max_topics: config.max_topics,
                max_entities: config.max_entities,
                summary_min_messages: config.summary_min_messages,
                idle_timeout: Duration::from_secs(config.idle_timeout_secs),
                context_window: config.max_context_tokens,
                compression_level: config.compression_level,
            },
        }
    }

    /// Append a message, refresh topics/entities and maybe the summary.
    /// Concurrent calls for the same conversation are serialized; distinct
    /// conversations proceed independently.
    pub async fn record_message(&self, conversation_id: &str, role: &str, content: &str) {
        let handle = self.handle(conversation_id).await;
        let mut conversation = handle.lock().await;

        conversation
            .messages
            .push_back(ContextMessage::new(role, content));
        while conversation.messages.len() > self.limits.memory_size {
            conversation.messages.pop_front();
        }

        self.refresh_topics(&mut conversation);
        self.refresh_entities(&mut conversation);
        if conversation.messages.len() >= self.limits.summary_min_messages {
            conversation.summary = Some(build_summary(&conversation));
        }
        conversation.last_updated = Utc::now();
    }

    /// Clone the current state of a conversation, if it exists.
    pub async fn snapshot(&self, conversation_id: &str) -> Option<ConversationContext> {
        let handle = {
            let conversations = self.conversations.lock().await;
            conversations.get(conversation_id).cloned()
        }?;
        let conversation = handle.lock().await;
        Some(conversation.clone())
    }

    pub async fn conversation_count(&self) -> usize {
        self.conversations.lock().await.len()
    }

    /// Drop conversations idle past the timeout. Returns the evicted count.
    pub async fn evict_idle(&self) -> usize {
        let cutoff = Utc::now()
            - chrono::Duration::from_std(self.limits.idle_timeout)
                .unwrap_or_else(|_| chrono::Duration::seconds(0));

        let mut conversations = self.conversations.lock().await;
        let mut stale = Vec::new();
        for (id, handle) in conversations.iter() {
            let conversation = handle.lock().await;
            if conversation.last_updated <= cutoff {
                stale.push(id.clone());
            }
        }
        for id in &stale {
            conversations.remove(id);
        }

        if !stale.is_empty() {
            tracing::debug!("Evicted {} idle conversations", stale.len());
        }
        stale.len()
    }

    /// Spawn the periodic idle eviction. The returned handle stops it.
    pub fn start_maintenance(self: &Arc<Self>, every: Duration) -> MemoryMaintenanceHandle {
        let memory = Arc::clone(self);
        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(every);
            ticker.tick().await;
            loop {
                ticker.tick().await;
                memory.evict_idle().await;
            }
        });
        MemoryMaintenanceHandle { handle }
    }

    async fn handle(&self, conversation_id: &str) -> Arc<Mutex<ConversationContext>> {
        let mut conversations = self.conversations.lock().await;
        conversations
            .entry(conversation_id.to_string())
            .or_insert_with(|| {
                Arc::new(Mutex::new(ConversationContext::new(
                    conversation_id,
                    self.limits.context_window,
                    self.limits.compression_level,
                )))
            })
            .clone()
    }

    fn refresh_topics(&self, conversation: &mut ConversationContext) {
        let mut counts: HashMap<String, usize> = HashMap::new();
        for message in &conversation.messages {
            for word in message
                .content
                .to_lowercase()
                .split(|c: char| !c.is_alphanumeric())
                .filter(|w| w.len() >= 3 && !is_stop_word(w))
            {
                *counts.entry(word.to_string()).or_insert(0) += 1;
            }
        }

        let mut ranked: Vec<(String, usize)> = counts.into_iter().collect();
        ranked.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
        conversation.key_topics = ranked
            .into_iter()
            .take(self.limits.max_topics)
            .map(|(w, _)| w)
            .collect();
    }

    fn refresh_entities(&self, conversation: &mut ConversationContext) {
        static ENTITY_PATTERN: OnceLock<Regex> = OnceLock::new();
        let pattern = ENTITY_PATTERN
            .get_or_init(|| Regex::new(r"\b[A-Z][A-Za-z0-9]{2,}\b").expect("static pattern"));

        let mut counts: HashMap<String, u32> = HashMap::new();
        for message in &conversation.messages {
            for capture in pattern.find_iter(&message.content) {
                let entity = capture.as_str();
                if !is_stop_word(&entity.to_lowercase()) {
                    *counts.entry(entity.to_string()).or_insert(0) += 1;
                }
            }
        }

        if counts.len() > self.limits.max_entities {
            let mut ranked: Vec<(String, u32)> = counts.into_iter().collect();
            ranked.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
            ranked.truncate(self.limits.max_entities);
            counts = ranked.into_iter().collect();
        }
        conversation.entities = counts;
    }
}

pub struct MemoryMaintenanceHandle {
    handle: JoinHandle<()>,
}

impl MemoryMaintenanceHandle {
    pub fn stop(self) {
        self.handle.abort();
    }
}

impl Drop for MemoryMaintenanceHandle {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

fn build_summary(conversation: &ConversationContext) -> String {
    let topics = if conversation.key_topics.is_empty() {
        "general discussion".to_string()
    } else {
        conversation
            .key_topics
            .iter()
            .take(3)
            .cloned()
            .collect::<Vec<_>>()
            .join(", ")
    };

    let last_user = conversation
        .messages
        .iter()
        .rev()
        .find(|m| m.role == "user")
        .map(|m| {
            let mut gist: String = m.content.chars().take(120).collect();
            if m.content.chars().count() > 120 {
                gist.push('…');
            }
            gist
        });

    match last_user {
        Some(gist) => format!(
            "Conversation about {} over {} messages. Most recently: {}",
            topics,
            conversation.messages.len(),
            gist
        ),
        None => format!(
            "Conversation about {} over {} messages.",
            topics,
            conversation.messages.len()
        ),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config_with(memory_size: usize) -> ContextConfig {
        ContextConfig {
            memory_size,
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn history_ring_keeps_last_k() {
        let memory = ConversationMemory::new(&config_with(10));
        for i in 0..15 {
            memory
                .record_message("conv", "user", &format!("message number {i}"))
                .await;
        }

        let snapshot = memory.snapshot("conv").await.unwrap();
        assert_eq!(snapshot.messages.len(), 10);
        assert_eq!(snapshot.messages[0].content, "message number 5");
        assert_eq!(snapshot.messages[9].content, "message number 14");
    }

    #[tokio::test]
    async fn topics_and_entities_are_capped() {
        let config = ContextConfig {
            memory_size: 50,
            max_topics: 3,
            max_entities: 2,
            ..Default::default()
        };
        let memory = ConversationMemory::new(&config);
        memory
            .record_message(
                "conv",
                "user",
                "Berlin and Paris and Tokyo and Madrid host conferences about \
                 databases databases databases indexing indexing caching \
                 sharding replication",
            )
            .await;

        let snapshot = memory.snapshot("conv").await.unwrap();
        assert!(snapshot.key_topics.len() <= 3);
        assert!(snapshot.entities.len() <= 2);
        assert_eq!(snapshot.key_topics[0], "databases");
    }

    #[tokio::test]
    async fn summary_appears_after_minimum_history() {
        let config = ContextConfig {
            summary_min_messages: 3,
            ..Default::default()
        };
        let memory = ConversationMemory::new(&config);

        memory.record_message("conv", "user", "first question about caching").await;
        memory.record_message("conv", "assistant", "an answer about caching").await;
        assert!(memory.snapshot("conv").await.unwrap().summary.is_none());

        memory.record_message("conv", "user", "a follow up about caching").await;
        let summary = memory.snapshot("conv").await.unwrap().summary.unwrap();
        assert!(summary.contains("caching"));
    }

    #[tokio::test]
    async fn concurrent_messages_to_same_conversation_are_not_lost() {
        let memory = Arc::new(ConversationMemory::new(&config_with(100)));
        let mut tasks = Vec::new();
        for i in 0..20 {
            let memory = Arc::clone(&memory);
            tasks.push(tokio::spawn(async move {
                memory
                    .record_message("shared", "user", &format!("concurrent {i}"))
                    .await;
            }));
        }
        for task in tasks {
            task.await.unwrap();
        }

        let snapshot = memory.snapshot("shared").await.unwrap();
        assert_eq!(snapshot.messages.len(), 20);
    }

    #[tokio::test]
    async fn idle_conversations_are_evicted() {
        let config = ContextConfig {
            idle_timeout_secs: 0,
            ..Default::default()
        };
        let memory = ConversationMemory::new(&config);
        memory.record_message("old", "user", "hello").await;

        let evicted = memory.evict_idle().await;
        assert_eq!(evicted, 1);
        assert!(memory.snapshot("old").await.is_none());
        assert_eq!(memory.conversation_count().await, 0);
    }

    #[tokio::test]
    async fn maintenance_task_evicts_in_background() {
        let config = ContextConfig {
            idle_timeout_secs: 0,
            ..Default::default()
        };
        let memory = Arc::new(ConversationMemory::new(&config));
        memory.record_message("stale", "user", "hello").await;

        let maintenance = memory.start_maintenance(Duration::from_millis(10));
        tokio::time::sleep(Duration::from_millis(80)).await;
        maintenance.stop();

        assert_eq!(memory.conversation_count().await, 0);
    }

    #[tokio::test]
    async fn unknown_conversation_has_no_snapshot() {
        let memory = ConversationMemory::new(&config_with(10));
        assert!(memory.snapshot("missing").await.is_none());
    }
}

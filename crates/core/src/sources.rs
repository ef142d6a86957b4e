//! Collaborator contracts the engine consumes. Implementations live in the connector crates;
//! tests substitute in-memory fakes.

use async_trait::async_trait;

use crate::domain::conversation::{Message, SearchResult, UserProfile};
use crate::domain::invocation::ConversationScope;
use crate::errors::ToolError;

#[async_trait]
pub trait ConversationSource: Send + Sync {
    /// Most recent `limit` messages of the conversation, oldest first.
    async fn fetch_history(
        &self,
        scope: &ConversationScope,
        limit: u32,
    ) -> Result<Vec<Message>, ToolError>;

    async fn user_info(&self, user_id: &str) -> Result<UserProfile, ToolError>;

    async fn channel_members(&self, scope: &ConversationScope) -> Result<Vec<String>, ToolError>;

    async fn list_users(&self) -> Result<Vec<UserProfile>, ToolError>;
}

#[async_trait]
pub trait SearchBackend: Send + Sync {
    async fn search(&self, query: &str, max_results: u32) -> Result<Vec<SearchResult>, ToolError>;
}

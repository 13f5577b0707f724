use std::collections::HashMap;

use async_trait::async_trait;
use tokio::sync::RwLock;

use filetide_core::{PipelineRequest, Result};

/// Single-use pipeline request lookup.
///
/// The production implementation lives with the auth collaborator: it fetches
/// an encrypted envelope from a key-value store, decrypts and verifies it,
/// and deletes the entry. Only the contract matters here: a token resolves at
/// most once.
#[async_trait]
pub trait TokenSource: Send + Sync {
    /// Resolve and consume a token; `None` when absent or already used.
    async fn take(&self, token_id: &str) -> Result<Option<PipelineRequest>>;
}

/// In-memory token store backing tests and local runs.
#[derive(Default)]
pub struct MemoryTokenSource {
    entries: RwLock<HashMap<String, PipelineRequest>>,
}

impl MemoryTokenSource {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn insert(&self, token_id: impl Into<String>, request: PipelineRequest) {
        self.entries.write().await.insert(token_id.into(), request);
    }
}

#[async_trait]
impl TokenSource for MemoryTokenSource {
    async fn take(&self, token_id: &str) -> Result<Option<PipelineRequest>> {
        Ok(self.entries.write().await.remove(token_id))
    }
}

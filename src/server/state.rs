//! Application state shared across all request handlers.

use std::sync::Arc;

use crate::dm::core::config::DmConfig;
use crate::dm::core::errors::DmResult;
use crate::dm::engine::ConversationEngine;
use crate::dm::identity::IdentityProvider;
use crate::dm::rate_limit::RateLimiter;
use crate::dm::storage::SqliteConversationStore;

/// Shared application state.
pub struct AppState {
    /// Conversation engine owning all lifecycle and permission rules.
    pub engine: ConversationEngine,
    /// Identity provider used to authenticate inbound requests.
    pub identity: Arc<dyn IdentityProvider>,
}

impl AppState {
    /// Create application state over a SQLite store.
    ///
    /// # Errors
    /// Returns an error if the configuration is invalid or the database
    /// cannot be opened.
    pub async fn new(
        config: &DmConfig,
        identity: Arc<dyn IdentityProvider>,
        rate_limiter: Arc<dyn RateLimiter>,
    ) -> DmResult<Arc<Self>> {
        config.validate()?;
        let store = Arc::new(SqliteConversationStore::new(&config.storage).await?);
        let engine = ConversationEngine::new(
            store,
            identity.clone(),
            rate_limiter,
            config.limits.clone(),
        );
        Ok(Arc::new(Self { engine, identity }))
    }
}

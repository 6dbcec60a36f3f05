//! Seam to the identity provider that owns party accounts.
//!
//! The messaging core never creates or deletes parties; it only needs to
//! turn a request credential into a stable [`PartyId`] and to check that a
//! referenced party actually exists. The real campus platform answers these
//! from its auth service; the bundled implementation answers them from an
//! in-process token map, which is enough for the standalone server and the
//! tests.

use async_trait::async_trait;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};

use crate::dm::core::errors::{DmError, DmResult};
use crate::dm::core::ids::PartyId;

/// A resolved user identity as known to the messaging core.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Party {
    /// Opaque profile identifier.
    pub id: PartyId,
    /// Whether the account has confirmed its campus email address.
    pub email_confirmed: bool,
}

impl Party {
    /// Whether this account may act at all. Unconfirmed accounts are
    /// resolvable (they exist) but blocked from every DM operation.
    #[must_use]
    pub const fn is_active(&self) -> bool {
        self.email_confirmed
    }
}

/// Identity provider trait.
#[async_trait]
pub trait IdentityProvider: Send + Sync {
    /// Resolve a bearer token to a party.
    ///
    /// # Errors
    /// Returns `Unauthenticated` for unknown tokens.
    async fn resolve_token(&self, token: &str) -> DmResult<Party>;

    /// Whether `party` refers to a real account.
    ///
    /// # Errors
    /// Returns an error if the identity backend cannot be reached.
    async fn party_exists(&self, party: PartyId) -> DmResult<bool>;
}

/// Token-map identity provider for the bundled server and tests.
#[derive(Default)]
pub struct StaticIdentityProvider {
    tokens: DashMap<String, PartyId>,
    parties: DashMap<PartyId, Party>,
}

impl StaticIdentityProvider {
    /// Create an empty provider.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a party reachable under `token`.
    pub fn register(&self, token: impl Into<String>, party: Party) {
        self.tokens.insert(token.into(), party.id);
        self.parties.insert(party.id, party);
    }

    /// Register a confirmed account and return its fresh id.
    pub fn register_confirmed(&self, token: impl Into<String>) -> PartyId {
        let party = Party {
            id: PartyId::new(),
            email_confirmed: true,
        };
        let id = party.id;
        self.register(token, party);
        id
    }
}

#[async_trait]
impl IdentityProvider for StaticIdentityProvider {
    async fn resolve_token(&self, token: &str) -> DmResult<Party> {
        let id = self
            .tokens
            .get(token)
            .map(|entry| *entry.value())
            .ok_or_else(|| DmError::Unauthenticated("unknown access token".to_string()))?;
        self.parties
            .get(&id)
            .map(|entry| entry.value().clone())
            .ok_or_else(|| DmError::Unauthenticated("unknown access token".to_string()))
    }

    async fn party_exists(&self, party: PartyId) -> DmResult<bool> {
        Ok(self.parties.contains_key(&party))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn resolves_registered_tokens_only() {
        let provider = StaticIdentityProvider::new();
        let id = provider.register_confirmed("token-a");

        let party = provider.resolve_token("token-a").await.expect("resolve");
        assert_eq!(party.id, id);
        assert!(party.is_active());

        let err = provider
            .resolve_token("token-b")
            .await
            .expect_err("unknown token");
        assert!(matches!(err, DmError::Unauthenticated(_)));
    }

    #[tokio::test]
    async fn knows_which_parties_exist() {
        let provider = StaticIdentityProvider::new();
        let id = provider.register_confirmed("token-a");
        assert!(provider.party_exists(id).await.expect("lookup"));
        assert!(!provider.party_exists(PartyId::new()).await.expect("lookup"));
    }
}

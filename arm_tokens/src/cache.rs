//! Persisting the current token into a session store

use std::{error, fmt, sync::Arc};

use arm_clock::Clock;

use crate::{
    error::{self as errors, TokenCacheError},
    stores::SessionStore,
    AccessToken,
};

/// A session store scoped to the single key holding the current access token
///
/// The cache is a secondary mirror of the token held in memory and may be
/// stale. Reads never fail: an unreadable or malformed entry is a miss.
pub struct TokenCache<C> {
    store: Arc<dyn SessionStore>,
    key: String,
    clock: C,
}

impl<C> TokenCache<C> {
    /// Constructs a token cache over `store`, using `key` for the entry
    pub fn new(store: Arc<dyn SessionStore>, key: impl Into<String>, clock: C) -> Self {
        Self {
            store,
            key: key.into(),
            clock,
        }
    }

    /// Loads the persisted token, if a well-formed one is present
    ///
    /// A malformed entry is removed from the store. The token is returned
    /// regardless of whether it has expired.
    pub async fn load(&self) -> Option<AccessToken> {
        let stored = match self.store.get(&self.key).await {
            Ok(Some(stored)) => stored,
            Ok(None) => {
                tracing::trace!(key = %self.key, "no token in session store");
                return None;
            }
            Err(error) => {
                tracing::warn!(key = %self.key, error = (&*error as &dyn error::Error), "session store unavailable, treating as empty");
                return None;
            }
        };

        match AccessToken::parse(&stored) {
            Ok(token) => Some(token),
            Err(error) => {
                tracing::warn!(key = %self.key, error = (&error as &dyn error::Error), "discarding malformed token from session store");
                if let Err(error) = self.store.remove(&self.key).await {
                    tracing::warn!(key = %self.key, error = (&*error as &dyn error::Error), "unable to remove malformed token");
                }
                None
            }
        }
    }

    /// Removes the persisted token
    ///
    /// Clearing an empty cache succeeds.
    pub async fn clear(&self) -> Result<(), TokenCacheError> {
        self.store
            .remove(&self.key)
            .await
            .map_err(TokenCacheError::Store)
    }
}

impl<C: Clock> TokenCache<C> {
    /// Persists `token`, replacing any previous entry
    ///
    /// # Errors
    ///
    /// Returns an error without writing anything if the token is already
    /// expired, or if the session store fails.
    pub async fn save(&self, token: &AccessToken) -> Result<(), TokenCacheError> {
        if token.is_expired_with_clock(&self.clock) {
            return Err(errors::expired_token(token.expires_at()).into());
        }

        self.store
            .set(&self.key, &token.to_string())
            .await
            .map_err(TokenCacheError::Store)
    }
}

impl<C: fmt::Debug> fmt::Debug for TokenCache<C> {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("TokenCache")
            .field("key", &self.key)
            .field("clock", &self.clock)
            .finish()
    }
}

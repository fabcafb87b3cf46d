//! Driving the identity provider to obtain a token

use std::{error, sync::Arc};

use arm_clock::Clock;
use async_trait::async_trait;

use crate::{
    error::{self as errors, AcquisitionError},
    AccessToken, Credential, Scope,
};

/// The response of an identity provider to a token request
#[derive(Clone, Debug, Default)]
pub struct TokenResponse {
    /// The issued credential, if the provider issued one
    pub access_token: Option<Credential>,
}

impl TokenResponse {
    /// A response carrying `access_token`
    pub fn new(access_token: Credential) -> Self {
        Self {
            access_token: Some(access_token),
        }
    }

    /// A response without any credential
    pub const fn empty() -> Self {
        Self { access_token: None }
    }
}

/// A client for the identity provider that issues management API tokens
///
/// Implementations own the provider session, including the client ID and
/// authority they were built with.
#[async_trait]
pub trait IdentityClient: Send + Sync {
    /// The error type returned when the provider fails a request
    type Error: error::Error + Send + Sync + 'static;

    /// Whether the provider knows of a previously authenticated account
    fn has_known_account(&self) -> bool;

    /// Redeems a token for the known account without user interaction
    async fn acquire_silently(&self, scopes: &[Scope]) -> Result<TokenResponse, Self::Error>;

    /// Prompts the user to authenticate and redeems a token
    ///
    /// This may wait indefinitely on the user.
    async fn acquire_interactively(&self, scopes: &[Scope]) -> Result<TokenResponse, Self::Error>;
}

#[async_trait]
impl<T: IdentityClient + ?Sized> IdentityClient for Arc<T> {
    type Error = T::Error;

    fn has_known_account(&self) -> bool {
        (**self).has_known_account()
    }

    async fn acquire_silently(&self, scopes: &[Scope]) -> Result<TokenResponse, Self::Error> {
        (**self).acquire_silently(scopes).await
    }

    async fn acquire_interactively(&self, scopes: &[Scope]) -> Result<TokenResponse, Self::Error> {
        (**self).acquire_interactively(scopes).await
    }
}

/// A token obtained from the identity provider, tagged with how it was obtained
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Acquisition {
    /// Redeemed for a known account without user interaction
    Silent(AccessToken),
    /// Obtained by prompting the user
    Interactive(AccessToken),
}

impl Acquisition {
    /// Whether the user was prompted
    #[inline]
    pub fn is_interactive(&self) -> bool {
        matches!(self, Self::Interactive(_))
    }

    /// The acquired token
    #[inline]
    pub fn token(&self) -> &AccessToken {
        match self {
            Self::Silent(token) | Self::Interactive(token) => token,
        }
    }

    /// Takes the acquired token
    #[inline]
    pub fn into_token(self) -> AccessToken {
        match self {
            Self::Silent(token) | Self::Interactive(token) => token,
        }
    }
}

/// Obtains tokens from an identity client, trying silent redemption before
/// prompting the user
///
/// This is the only component that may cause an interactive prompt. It makes
/// a single attempt per call and must not be run concurrently for one
/// subject; the token manager guarantees this.
#[derive(Debug)]
pub struct TokenAcquirer<I, C> {
    client: I,
    clock: C,
}

impl<I, C> TokenAcquirer<I, C> {
    /// Constructs a new acquirer over `client`
    pub fn new(client: I, clock: C) -> Self {
        Self { client, clock }
    }
}

impl<I: IdentityClient, C: Clock> TokenAcquirer<I, C> {
    /// Acquires a token for `scopes`
    ///
    /// A silent attempt is made only if the provider knows an account. A silent
    /// attempt that fails, yields no credential, or yields an expired token
    /// falls back to the interactive flow.
    ///
    /// # Errors
    ///
    /// Returns an error if the interactive flow fails or yields no credential.
    pub async fn acquire(&self, scopes: &[Scope]) -> Result<Acquisition, AcquisitionError> {
        if self.client.has_known_account() {
            if let Some(token) = self.try_silent(scopes).await {
                return Ok(Acquisition::Silent(token));
            }
        } else {
            tracing::debug!("no known account, prompting for sign-in");
        }

        let response = self
            .client
            .acquire_interactively(scopes)
            .await
            .map_err(|error| {
                tracing::warn!(error = (&error as &dyn error::Error), "interactive acquisition failed");
                errors::provider_failed(error)
            })?;

        let token = usable_token(response).ok_or_else(errors::no_credential)?;

        tracing::debug!(expires_at = ?token.expires_at(), "acquired token interactively");
        Ok(Acquisition::Interactive(token))
    }

    async fn try_silent(&self, scopes: &[Scope]) -> Option<AccessToken> {
        let response = match self.client.acquire_silently(scopes).await {
            Ok(response) => response,
            Err(error) => {
                tracing::debug!(error = (&error as &dyn error::Error), "silent acquisition failed, falling back to interactive");
                return None;
            }
        };

        let Some(token) = usable_token(response) else {
            tracing::debug!("silent acquisition returned no credential, falling back to interactive");
            return None;
        };

        if token.is_expired_with_clock(&self.clock) {
            tracing::debug!(expires_at = ?token.expires_at(), "silent acquisition returned an expired token, falling back to interactive");
            return None;
        }

        tracing::debug!(expires_at = ?token.expires_at(), "acquired token silently");
        Some(token)
    }
}

/// An empty credential is no credential at all
fn usable_token(response: TokenResponse) -> Option<AccessToken> {
    let credential = response.access_token?;
    AccessToken::bearer(&credential).ok()
}

//! Access-token lifecycle management for the Azure Resource Manager API
//!
//! This library keeps a bearer token for the management API available to a
//! client. It reconciles three places a usable token may live: the token held
//! in memory, a copy persisted in a session store, and the identity
//! provider's own session.
//!
//! Consumers hold a [`TokenLifecycleManager`] and ask it for a token whenever
//! they need to call the API. The manager returns the in-memory token while it
//! is valid, falls back to the persisted copy, and otherwise acquires a new
//! token through a [`TokenAcquirer`], which tries silent redemption for a
//! known account before prompting the user. Concurrent requests never cause
//! more than one acquisition, and thus never more than one sign-in prompt.
//!
//! Once a token has been acquired, the manager keeps acquiring a fresh one in
//! the background at a fixed interval.
//!
//! ```
//! use std::sync::Arc;
//!
//! use arm_tokens::{stores::InMemorySessionStore, AuthConfig, TokenLifecycleManager};
//!
//! # async fn example(identity_client: impl arm_tokens::IdentityClient + 'static) -> Result<(), arm_tokens::error::AcquisitionError> {
//! let manager = TokenLifecycleManager::new(
//!     identity_client,
//!     Arc::new(InMemorySessionStore::new()),
//!     AuthConfig::default(),
//! );
//!
//! let header_value = manager.get_access_token_as_string().await?;
//! tracing::debug!(authenticated = manager.is_authenticated().await, "signed in");
//! # drop(header_value);
//! # Ok(())
//! # }
//! ```
//!
//! # Features
//!
//! * `file` (default): Provides [`FileSessionStore`][stores::FileSessionStore], a
//!   session store backed by a local JSON file.

#![cfg_attr(docsrs, feature(doc_cfg))]
#![warn(
    missing_docs,
    unused_import_braces,
    unused_imports,
    unused_qualifications
)]
#![deny(
    missing_debug_implementations,
    trivial_numeric_casts,
    unsafe_code,
    unused_must_use
)]

mod acquirer;
mod braids;
mod cache;
mod config;
pub mod error;
mod manager;
pub mod stores;
mod token;

#[cfg(test)]
mod test_support;

pub use acquirer::{Acquisition, IdentityClient, TokenAcquirer, TokenResponse};
pub use braids::*;
pub use cache::TokenCache;
pub use config::{
    AuthConfig, DEFAULT_AUTHORITY, DEFAULT_CLIENT_ID, DEFAULT_REDIRECT_URI,
    DEFAULT_REFRESH_INTERVAL, DEFAULT_STORAGE_KEY, MANAGEMENT_API_SCOPE,
};
pub use manager::TokenLifecycleManager;
pub use token::{AccessToken, BEARER};

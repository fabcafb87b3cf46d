//! Common errors

use std::{borrow::Cow, error::Error as StdError, sync::Arc};

use arm_clock::UnixTime;
use thiserror::Error;

/// A boxed error as returned by a session store
pub type BoxError = Box<dyn StdError + Send + Sync + 'static>;

/// The serialized access token is not a `scheme credential` pair
#[derive(Clone, Copy, Debug, PartialEq, Eq, Error)]
#[error("malformed access token: {reason}")]
pub struct MalformedToken {
    reason: &'static str,
}

impl MalformedToken {
    /// A short description of what is missing from the serialized token
    pub fn reason(&self) -> &'static str {
        self.reason
    }
}

pub(crate) const fn missing_separator() -> MalformedToken {
    MalformedToken {
        reason: "expected a scheme and credential separated by whitespace",
    }
}

pub(crate) const fn empty_scheme() -> MalformedToken {
    MalformedToken {
        reason: "scheme is empty",
    }
}

pub(crate) const fn empty_credential() -> MalformedToken {
    MalformedToken {
        reason: "credential is empty",
    }
}

/// The access token is already expired and cannot be used
#[derive(Clone, Copy, Debug, PartialEq, Eq, Error)]
#[error("access token is expired")]
pub struct ExpiredToken {
    expired_at: Option<UnixTime>,
}

impl ExpiredToken {
    /// The time the token expired, if the token carried an expiry at all
    pub fn expired_at(&self) -> Option<UnixTime> {
        self.expired_at
    }
}

pub(crate) const fn expired_token(expired_at: Option<UnixTime>) -> ExpiredToken {
    ExpiredToken { expired_at }
}

/// An error raised by the token cache
#[derive(Debug, Error)]
pub enum TokenCacheError {
    /// The token was already expired, so nothing was written
    #[error("refusing to persist token")]
    Expired(#[from] ExpiredToken),
    /// The underlying session store failed
    #[error("session store failed")]
    Store(#[source] BoxError),
}

/// No usable access token could be obtained from the identity provider
///
/// This error is cheap to clone so that a single failed acquisition can be
/// reported to every caller that was waiting on it.
#[derive(Clone, Debug, Error)]
#[error("{message}")]
pub struct AcquisitionError {
    message: Cow<'static, str>,
    #[source]
    source: Option<Arc<dyn StdError + Send + Sync + 'static>>,
}

impl AcquisitionError {
    /// A description of what went wrong
    pub fn message(&self) -> &str {
        &self.message
    }
}

pub(crate) fn no_credential() -> AcquisitionError {
    AcquisitionError {
        message: Cow::Borrowed("Unable to acquire token"),
        source: None,
    }
}

pub(crate) fn provider_failed(
    source: impl StdError + Send + Sync + 'static,
) -> AcquisitionError {
    AcquisitionError {
        message: Cow::Borrowed("Unable to acquire token"),
        source: Some(Arc::new(source)),
    }
}

pub(crate) fn acquisition_abandoned() -> AcquisitionError {
    AcquisitionError {
        message: Cow::Borrowed("token acquisition ended without an outcome"),
        source: None,
    }
}

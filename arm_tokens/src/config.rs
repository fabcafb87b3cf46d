use std::time::Duration;

use crate::{ClientId, ClientIdRef, Scope};

/// The application registered with the identity provider
pub const DEFAULT_CLIENT_ID: &str = "73a510c3-9946-46dd-b5ae-a8f0ae68fd04";

/// The identity provider authority accepting accounts from any tenant
pub const DEFAULT_AUTHORITY: &str = "https://login.microsoftonline.com/common";

/// Where the identity provider returns after an interactive sign-in
pub const DEFAULT_REDIRECT_URI: &str =
    "https://apimanagement-cors-proxy-df.azure-api.net/portal/signin-aad";

/// The scope granting delegated access to the management API
pub const MANAGEMENT_API_SCOPE: &str = "https://management.azure.com/user_impersonation";

/// The session store key under which the current token is persisted
pub const DEFAULT_STORAGE_KEY: &str = "armAccessToken";

/// How often a new token is acquired in the background
pub const DEFAULT_REFRESH_INTERVAL: Duration = Duration::from_secs(30 * 60);

/// Static configuration for acquiring and keeping a management API token
///
/// The identity provider values are fixed at construction. They are exposed
/// so that whoever builds the identity client can read them, but the token
/// lifecycle itself only consumes the scopes, storage key and refresh interval.
#[derive(Clone, Debug)]
pub struct AuthConfig {
    client_id: ClientId,
    authority: String,
    redirect_uri: String,
    scopes: Vec<Scope>,
    storage_key: String,
    refresh_interval: Duration,
}

impl Default for AuthConfig {
    /// Default configuration
    ///
    /// Requests the management API impersonation scope, persists under
    /// `armAccessToken`, and refreshes every 30 minutes.
    fn default() -> Self {
        Self {
            client_id: ClientId::from_static(DEFAULT_CLIENT_ID),
            authority: DEFAULT_AUTHORITY.to_owned(),
            redirect_uri: DEFAULT_REDIRECT_URI.to_owned(),
            scopes: vec![Scope::from_static(MANAGEMENT_API_SCOPE)],
            storage_key: DEFAULT_STORAGE_KEY.to_owned(),
            refresh_interval: DEFAULT_REFRESH_INTERVAL,
        }
    }
}

impl AuthConfig {
    /// Sets how long after a successful acquisition the next one is attempted
    pub fn with_refresh_interval(mut self, refresh_interval: Duration) -> Self {
        self.refresh_interval = refresh_interval;
        self
    }

    /// Sets the session store key used to persist the token
    pub fn with_storage_key(mut self, storage_key: impl Into<String>) -> Self {
        self.storage_key = storage_key.into();
        self
    }

    /// The client ID registered with the identity provider
    #[inline]
    pub fn client_id(&self) -> &ClientIdRef {
        &self.client_id
    }

    /// The identity provider authority
    #[inline]
    pub fn authority(&self) -> &str {
        &self.authority
    }

    /// The redirect URI used by interactive sign-in
    #[inline]
    pub fn redirect_uri(&self) -> &str {
        &self.redirect_uri
    }

    /// The scopes requested with every acquisition
    #[inline]
    pub fn scopes(&self) -> &[Scope] {
        &self.scopes
    }

    /// The session store key used to persist the token
    #[inline]
    pub fn storage_key(&self) -> &str {
        &self.storage_key
    }

    /// The background refresh interval
    #[inline]
    pub fn refresh_interval(&self) -> Duration {
        self.refresh_interval
    }
}

use std::{fmt, str::FromStr};

use arm_clock::{Clock, DurationSecs, System, UnixTime};
use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine as _};
use serde::Deserialize;

use crate::{
    error::{self, MalformedToken},
    Credential, CredentialRef,
};

/// The authorization scheme used for credentials issued by the identity provider
pub const BEARER: &str = "Bearer";

/// An access token as presented in an `Authorization` header
///
/// A token is only ever constructed from a well-formed `scheme credential`
/// pair. Its expiry is read from the credential's own `exp` claim; a
/// credential without a decodable expiry is always considered expired.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AccessToken {
    scheme: String,
    credential: Credential,
    expires_at: Option<UnixTime>,
}

impl AccessToken {
    /// Parses a serialized `scheme credential` pair
    ///
    /// The value is split on its first whitespace character.
    ///
    /// # Errors
    ///
    /// Returns an error if there is no whitespace separator or if either
    /// side of it is empty.
    pub fn parse(serialized: &str) -> Result<Self, MalformedToken> {
        let (scheme, raw) = serialized
            .split_once(char::is_whitespace)
            .ok_or_else(error::missing_separator)?;

        if scheme.is_empty() {
            return Err(error::empty_scheme());
        }

        if raw.is_empty() {
            return Err(error::empty_credential());
        }

        Ok(Self {
            scheme: scheme.to_owned(),
            expires_at: decode_expiry(raw),
            credential: Credential::new(raw.to_owned()),
        })
    }

    /// Wraps a raw credential issued by the identity provider as a bearer token
    ///
    /// # Errors
    ///
    /// Returns an error if the credential is empty.
    pub fn bearer(credential: &CredentialRef) -> Result<Self, MalformedToken> {
        Self::parse(&format!("{} {}", BEARER, credential.as_str()))
    }

    /// The authorization scheme, e.g. `Bearer`
    #[inline]
    pub fn scheme(&self) -> &str {
        &self.scheme
    }

    /// The raw credential
    #[inline]
    pub fn credential(&self) -> &CredentialRef {
        &self.credential
    }

    /// The time the credential expires, if it declares one
    #[inline]
    pub fn expires_at(&self) -> Option<UnixTime> {
        self.expires_at
    }

    /// Whether the token is expired according to the system clock
    #[inline]
    pub fn is_expired(&self) -> bool {
        self.is_expired_with_clock(&System)
    }

    /// Whether the token is expired according to the provided clock
    #[inline]
    pub fn is_expired_with_clock<C: Clock>(&self, clock: &C) -> bool {
        self.is_expired_at(clock.now())
    }

    /// Whether the token is expired as of the provided time
    #[inline]
    pub fn is_expired_at(&self, time: UnixTime) -> bool {
        match self.expires_at {
            Some(expiry) => expiry <= time,
            None => true,
        }
    }

    /// Gets a duration for how much longer the token would be valid as of the
    /// provided time
    #[inline]
    pub fn until_expired_at(&self, time: UnixTime) -> DurationSecs {
        match self.expires_at {
            Some(expiry) => expiry - time,
            None => DurationSecs(0),
        }
    }
}

impl fmt::Display for AccessToken {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{} {}", self.scheme, self.credential.as_str())
    }
}

impl FromStr for AccessToken {
    type Err = MalformedToken;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

#[derive(Deserialize)]
struct ExpiryClaim {
    exp: Option<u64>,
}

/// Reads the `exp` claim out of a compact JWT without verifying it
fn decode_expiry(raw: &str) -> Option<UnixTime> {
    let mut segments = raw.split('.');
    let (_header, payload, _signature) = (segments.next()?, segments.next()?, segments.next()?);
    if segments.next().is_some() {
        return None;
    }

    let decoded = match URL_SAFE_NO_PAD.decode(payload.trim_end_matches('=')) {
        Ok(decoded) => decoded,
        Err(error) => {
            tracing::trace!(%error, "credential payload is not base64url");
            return None;
        }
    };

    match serde_json::from_slice::<ExpiryClaim>(&decoded) {
        Ok(claims) => claims.exp.map(UnixTime),
        Err(error) => {
            tracing::trace!(%error, "credential payload carries no readable claims");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use base64::Engine as _;
    use color_eyre::Result;

    use super::*;
    use crate::test_support::jwt_expiring_at;

    #[test]
    fn parses_scheme_and_credential() -> Result<()> {
        let token = AccessToken::parse("Bearer abc.def.ghi")?;

        assert_eq!(token.scheme(), "Bearer");
        assert_eq!(token.credential().as_str(), "abc.def.ghi");
        Ok(())
    }

    #[test]
    fn splits_on_first_whitespace_only() -> Result<()> {
        let token = AccessToken::parse("Bearer\tone two")?;

        assert_eq!(token.scheme(), "Bearer");
        assert_eq!(token.credential().as_str(), "one two");
        Ok(())
    }

    #[test]
    fn rejects_value_without_separator() {
        let err = AccessToken::parse("Bearerabc").unwrap_err();
        assert_eq!(err, error::missing_separator());
    }

    #[test]
    fn rejects_empty_scheme() {
        let err = AccessToken::parse(" abc").unwrap_err();
        assert_eq!(err, error::empty_scheme());
    }

    #[test]
    fn rejects_empty_credential() {
        let err = AccessToken::parse("Bearer ").unwrap_err();
        assert_eq!(err, error::empty_credential());
    }

    #[test]
    fn rejects_empty_string() {
        assert!(AccessToken::parse("").is_err());
    }

    #[test]
    fn display_is_inverse_of_parse() -> Result<()> {
        let jwt = jwt_expiring_at(UnixTime(2_000_000_000));
        let inputs = [
            "Bearer abc.def.ghi".to_owned(),
            format!("Bearer {}", jwt),
            "SharedKey a b c".to_owned(),
            "x  y".to_owned(),
        ];

        for input in &inputs {
            let token = AccessToken::parse(input)?;
            assert_eq!(AccessToken::parse(&token.to_string())?, token);
        }
        Ok(())
    }

    #[test]
    fn reads_expiry_from_credential() -> Result<()> {
        let token = AccessToken::parse(&format!("Bearer {}", jwt_expiring_at(UnixTime(1_000))))?;

        assert_eq!(token.expires_at(), Some(UnixTime(1_000)));
        assert!(!token.is_expired_at(UnixTime(999)));
        assert!(token.is_expired_at(UnixTime(1_000)));
        assert_eq!(token.until_expired_at(UnixTime(400)), DurationSecs(600));
        Ok(())
    }

    #[test]
    fn tolerates_padded_payload() -> Result<()> {
        let payload = base64::engine::general_purpose::URL_SAFE.encode(br#"{"exp":12}"#);
        let token = AccessToken::parse(&format!("Bearer e30.{}.sig", payload))?;

        assert_eq!(token.expires_at(), Some(UnixTime(12)));
        Ok(())
    }

    #[test]
    fn credential_without_expiry_is_expired() -> Result<()> {
        let opaque = AccessToken::parse("Bearer abc.def.ghi")?;
        let no_exp = AccessToken::parse(&format!(
            "Bearer e30.{}.sig",
            URL_SAFE_NO_PAD.encode(br#"{"sub":"someone"}"#)
        ))?;

        for token in [opaque, no_exp] {
            assert_eq!(token.expires_at(), None);
            assert!(token.is_expired_at(UnixTime(0)));
            assert_eq!(token.until_expired_at(UnixTime(0)), DurationSecs(0));
        }
        Ok(())
    }

    #[test]
    fn expiry_is_monotonic() -> Result<()> {
        let token = AccessToken::parse(&format!("Bearer {}", jwt_expiring_at(UnixTime(500))))?;

        let first_expired = (0..1_000)
            .map(UnixTime)
            .find(|t| token.is_expired_at(*t))
            .expect("token expires within the window");

        assert!((first_expired.0..2_000)
            .map(UnixTime)
            .all(|t| token.is_expired_at(t)));
        Ok(())
    }

    #[test]
    fn debug_output_hides_credential() -> Result<()> {
        let token = AccessToken::parse("Bearer super-secret-value")?;

        assert!(!format!("{:?}", token).contains("super-secret-value"));
        Ok(())
    }
}

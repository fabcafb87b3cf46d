//! Fakes shared by the unit tests

use std::{
    collections::HashMap,
    sync::{
        atomic::{AtomicBool, AtomicUsize, Ordering},
        Mutex,
    },
    time::Duration,
};

use arm_clock::{Clock, DurationSecs, TestClock, UnixTime};
use async_trait::async_trait;
use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine as _};
use thiserror::Error;
use tokio::sync::watch;

use crate::{
    error::BoxError, stores::SessionStore, Credential, IdentityClient, Scope, TokenResponse,
};

/// Builds an unsigned compact JWT whose `exp` claim is `exp`
pub(crate) fn jwt_expiring_at(exp: UnixTime) -> String {
    jwt_with_signature(exp, "sig")
}

/// Builds a serialized bearer token whose credential expires at `exp`
pub(crate) fn bearer_expiring_at(exp: UnixTime) -> String {
    format!("Bearer {}", jwt_expiring_at(exp))
}

fn jwt_with_signature(exp: UnixTime, signature: &str) -> String {
    let header = URL_SAFE_NO_PAD.encode(br#"{"alg":"none","typ":"JWT"}"#);
    let payload = URL_SAFE_NO_PAD.encode(format!(r#"{{"exp":{}}}"#, exp.0));
    format!("{}.{}.{}", header, payload, signature)
}

#[derive(Debug, Error)]
#[error("store offline")]
pub(crate) struct StoreOffline;

/// A session store that counts writes and can be switched off
#[derive(Debug, Default)]
pub(crate) struct RecordingStore {
    entries: Mutex<HashMap<String, String>>,
    writes: AtomicUsize,
    failing: AtomicBool,
    read_delay: Duration,
}

impl RecordingStore {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn with_entry(key: &str, value: &str) -> Self {
        let store = Self::new();
        store
            .entries
            .lock()
            .unwrap()
            .insert(key.to_owned(), value.to_owned());
        store
    }

    /// Makes every read take `delay` to return the value it saw
    pub(crate) fn with_read_delay(mut self, delay: Duration) -> Self {
        self.read_delay = delay;
        self
    }

    pub(crate) fn failing() -> Self {
        let store = Self::new();
        store.set_failing(true);
        store
    }

    pub(crate) fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    pub(crate) fn entry(&self, key: &str) -> Option<String> {
        self.entries.lock().unwrap().get(key).cloned()
    }

    pub(crate) fn writes(&self) -> usize {
        self.writes.load(Ordering::SeqCst)
    }

    fn check_online(&self) -> Result<(), BoxError> {
        if self.failing.load(Ordering::SeqCst) {
            Err(Box::new(StoreOffline))
        } else {
            Ok(())
        }
    }
}

#[async_trait]
impl SessionStore for RecordingStore {
    async fn get(&self, key: &str) -> Result<Option<String>, BoxError> {
        self.check_online()?;
        let entry = self.entry(key);
        if !self.read_delay.is_zero() {
            tokio::time::sleep(self.read_delay).await;
        }
        Ok(entry)
    }

    async fn set(&self, key: &str, value: &str) -> Result<(), BoxError> {
        self.check_online()?;
        self.writes.fetch_add(1, Ordering::SeqCst);
        self.entries
            .lock()
            .unwrap()
            .insert(key.to_owned(), value.to_owned());
        Ok(())
    }

    async fn remove(&self, key: &str) -> Result<(), BoxError> {
        self.check_online()?;
        self.entries.lock().unwrap().remove(key);
        Ok(())
    }
}

/// How the scripted identity client answers a request
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum Reply {
    /// A fresh credential valid for the configured lifetime
    Token,
    /// A credential whose expiry has already passed
    Expired,
    /// A response without any credential
    NoCredential,
    /// A response carrying an empty credential
    EmptyCredential,
    /// The request fails outright
    Fail,
}

#[derive(Debug, Error)]
#[error("user closed the sign-in window")]
pub(crate) struct ProviderFailure;

/// An identity client with scripted answers that counts its calls
#[derive(Debug)]
pub(crate) struct ScriptedIdentity {
    clock: TestClock,
    lifetime: DurationSecs,
    delay: Duration,
    known_account: AtomicBool,
    silent: Mutex<Reply>,
    interactive: Mutex<Reply>,
    silent_calls: AtomicUsize,
    interactive_calls: AtomicUsize,
    calls: watch::Sender<usize>,
}

impl ScriptedIdentity {
    pub(crate) fn new(clock: TestClock) -> Self {
        let (calls, _) = watch::channel(0);
        Self {
            clock,
            lifetime: DurationSecs(3_600),
            delay: Duration::ZERO,
            known_account: AtomicBool::new(false),
            silent: Mutex::new(Reply::Token),
            interactive: Mutex::new(Reply::Token),
            silent_calls: AtomicUsize::new(0),
            interactive_calls: AtomicUsize::new(0),
            calls,
        }
    }

    /// Makes every provider call take `delay` before answering
    pub(crate) fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub(crate) fn with_known_account(self) -> Self {
        self.known_account.store(true, Ordering::SeqCst);
        self
    }

    pub(crate) fn reply_silently_with(&self, reply: Reply) {
        *self.silent.lock().unwrap() = reply;
    }

    pub(crate) fn reply_interactively_with(&self, reply: Reply) {
        *self.interactive.lock().unwrap() = reply;
    }

    pub(crate) fn silent_calls(&self) -> usize {
        self.silent_calls.load(Ordering::SeqCst)
    }

    pub(crate) fn interactive_calls(&self) -> usize {
        self.interactive_calls.load(Ordering::SeqCst)
    }

    /// Total provider calls, silent and interactive
    pub(crate) fn calls(&self) -> usize {
        *self.calls.borrow()
    }

    /// Waits until at least `n` provider calls have been answered
    pub(crate) async fn wait_for_calls(&self, n: usize) {
        let mut rx = self.calls.subscribe();
        rx.wait_for(|calls| *calls >= n).await.unwrap();
    }

    async fn answer(&self, reply: Reply) -> Result<TokenResponse, ProviderFailure> {
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }

        let mut serial = 0;
        self.calls.send_modify(|calls| {
            *calls += 1;
            serial = *calls;
        });

        let now = self.clock.now();
        match reply {
            Reply::Token => Ok(TokenResponse::new(Credential::new(jwt_with_signature(
                now + self.lifetime,
                &format!("sig{}", serial),
            )))),
            Reply::Expired => Ok(TokenResponse::new(Credential::new(jwt_with_signature(
                now - DurationSecs(1),
                &format!("sig{}", serial),
            )))),
            Reply::NoCredential => Ok(TokenResponse::empty()),
            Reply::EmptyCredential => Ok(TokenResponse::new(Credential::new(String::new()))),
            Reply::Fail => Err(ProviderFailure),
        }
    }
}

#[async_trait]
impl IdentityClient for ScriptedIdentity {
    type Error = ProviderFailure;

    fn has_known_account(&self) -> bool {
        self.known_account.load(Ordering::SeqCst)
    }

    async fn acquire_silently(&self, _scopes: &[Scope]) -> Result<TokenResponse, Self::Error> {
        self.silent_calls.fetch_add(1, Ordering::SeqCst);
        let reply = *self.silent.lock().unwrap();
        self.answer(reply).await
    }

    async fn acquire_interactively(
        &self,
        _scopes: &[Scope],
    ) -> Result<TokenResponse, Self::Error> {
        self.interactive_calls.fetch_add(1, Ordering::SeqCst);
        let reply = *self.interactive.lock().unwrap();
        let response = self.answer(reply).await?;
        self.known_account.store(true, Ordering::SeqCst);
        Ok(response)
    }
}

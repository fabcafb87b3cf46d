use std::{
    path::PathBuf,
    sync::{
        atomic::{AtomicBool, AtomicU64, Ordering},
        Arc,
    },
    time::Duration,
};

use arm_clock::{Clock, System};
use arm_tokens::{
    stores::{FileSessionStore, InMemorySessionStore, SessionStore},
    AuthConfig, ClientId, Credential, IdentityClient, Scope, TokenLifecycleManager, TokenResponse,
};
use async_trait::async_trait;
use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine as _};
use clap::Parser;
use tokio::time;

#[derive(Debug, Parser)]
struct Opts {
    /// A local file used to persist the session; kept in memory if omitted
    #[arg(short = 'f', long, env)]
    session_file: Option<PathBuf>,

    /// Seconds between background token refreshes
    #[arg(short, long, env, default_value_t = 30 * 60)]
    refresh_secs: u64,

    /// Lifetime in seconds of the tokens issued by the simulated provider
    #[arg(short, long, env, default_value_t = 3600)]
    lifetime_secs: u64,

    /// Seconds the simulated user takes to complete the sign-in prompt
    #[arg(short, long, env, default_value_t = 2)]
    prompt_secs: u64,
}

/// Stands in for the identity provider, issuing unsigned tokens
#[derive(Debug)]
struct SimulatedIdentityClient {
    client_id: ClientId,
    authority: String,
    lifetime_secs: u64,
    prompt_delay: Duration,
    signed_in: AtomicBool,
    issued: AtomicU64,
}

#[derive(Debug, thiserror::Error)]
#[error("simulated provider failure")]
struct SimulatedFailure;

impl SimulatedIdentityClient {
    fn issue(&self) -> TokenResponse {
        let serial = self.issued.fetch_add(1, Ordering::SeqCst);
        let exp = System.now().0 + self.lifetime_secs;
        let header = URL_SAFE_NO_PAD.encode(br#"{"alg":"none","typ":"JWT"}"#);
        let payload = URL_SAFE_NO_PAD.encode(format!(
            r#"{{"aud":"https://management.azure.com","appid":"{}","exp":{}}}"#,
            self.client_id, exp
        ));
        let signature = URL_SAFE_NO_PAD.encode(serial.to_be_bytes());

        TokenResponse::new(Credential::new(format!(
            "{}.{}.{}",
            header, payload, signature
        )))
    }
}

#[async_trait]
impl IdentityClient for SimulatedIdentityClient {
    type Error = SimulatedFailure;

    fn has_known_account(&self) -> bool {
        self.signed_in.load(Ordering::SeqCst)
    }

    async fn acquire_silently(&self, scopes: &[Scope]) -> Result<TokenResponse, Self::Error> {
        tracing::info!(?scopes, "redeeming token for known account");
        Ok(self.issue())
    }

    async fn acquire_interactively(&self, scopes: &[Scope]) -> Result<TokenResponse, Self::Error> {
        tracing::info!(
            authority = %self.authority,
            client_id = %self.client_id,
            ?scopes,
            "opening sign-in prompt"
        );
        time::sleep(self.prompt_delay).await;
        self.signed_in.store(true, Ordering::SeqCst);
        Ok(self.issue())
    }
}

#[tokio::main]
async fn main() -> color_eyre::Result<()> {
    dotenvy::dotenv().ok();
    color_eyre::install()?;

    tracing_subscriber::fmt()
        .pretty()
        .with_env_filter(tracing_subscriber::filter::EnvFilter::from_default_env())
        .init();

    let opts = Opts::parse();

    let config = AuthConfig::default().with_refresh_interval(Duration::from_secs(opts.refresh_secs));

    let identity = SimulatedIdentityClient {
        client_id: config.client_id().to_owned(),
        authority: config.authority().to_owned(),
        lifetime_secs: opts.lifetime_secs,
        prompt_delay: Duration::from_secs(opts.prompt_secs),
        signed_in: AtomicBool::new(false),
        issued: AtomicU64::new(0),
    };

    let store: Arc<dyn SessionStore> = match opts.session_file {
        Some(path) => Arc::new(FileSessionStore::new(path)),
        None => Arc::new(InMemorySessionStore::new()),
    };

    let manager = TokenLifecycleManager::new(identity, store, config);

    // Both callers observe no token; only one sign-in prompt is opened.
    let (first, second) = tokio::join!(manager.get_access_token(), manager.get_access_token());
    let (first, second) = (first?, second?);
    tracing::info!(
        token = format_args!("{:?}", first),
        same = (first == second),
        "first access token"
    );

    let mut interval = time::interval(Duration::from_secs(5));
    loop {
        interval.tick().await;

        let token = manager.get_access_token().await?;
        let remaining = token.until_expired_at(System.now());
        if manager.is_authenticated().await {
            tracing::debug!(
                remaining_secs = remaining.0,
                credential = format_args!("{:#20?}", token.credential()),
                "pulled token"
            );
        } else {
            tracing::error!(remaining_secs = remaining.0, "not authenticated");
        }
    }
}

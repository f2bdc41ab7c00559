use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::{Context, Result, bail};
use reqwest::blocking::Client;
use reqwest::redirect::Policy;
use serde::Deserialize;
use serde_json::Value;
use tracing::debug;

use crate::config::{BotCredentials, RemoteWikiConfig};
use crate::endpoint::endpoint_key;

const MAX_REDIRECTS: usize = 10;

/// The two siteinfo properties this crate reads.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SiteInfoProp {
    General,
    Extensions,
}

impl SiteInfoProp {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::General => "general",
            Self::Extensions => "extensions",
        }
    }
}

/// Read-only view of a remote wiki's action API.
pub trait SiteInfoApi: Send + Sync {
    /// The API URL this client was created for, as given by the caller.
    fn api_url(&self) -> &str;

    /// Issues `action=query&meta=siteinfo&siprop=<prop>` and returns the raw payload.
    fn site_info(&self, prop: SiteInfoProp) -> Result<Value>;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientSettings {
    pub api_url: String,
    pub timeout: Duration,
    pub user_agent: String,
    pub credentials: Option<BotCredentials>,
}

pub struct MediaWikiClient {
    settings: ClientSettings,
    state: Mutex<ClientState>,
}

#[derive(Default)]
struct ClientState {
    http: Option<Client>,
    logged_in: bool,
}

impl MediaWikiClient {
    /// Does no I/O; the HTTP client is built on the first request.
    pub fn new(settings: ClientSettings) -> Self {
        Self {
            settings,
            state: Mutex::new(ClientState::default()),
        }
    }

    pub fn settings(&self) -> &ClientSettings {
        &self.settings
    }

    fn build_http(&self) -> Result<Client> {
        let timeout = request_timeout(self.settings.timeout);
        Client::builder()
            .timeout(timeout)
            .connect_timeout(timeout)
            .cookie_store(true)
            .redirect(Policy::limited(MAX_REDIRECTS))
            .build()
            .context("failed to build MediaWiki HTTP client")
    }

    fn request_json_get(&self, http: &Client, params: &[(&str, String)]) -> Result<Value> {
        let pairs = with_format_params(params);
        let response = http
            .get(&self.settings.api_url)
            .header("User-Agent", self.settings.user_agent.clone())
            .query(&pairs)
            .send()
            .context("failed to call MediaWiki API")?;
        decode_api_response(response)
    }

    fn request_json_post(&self, http: &Client, params: &[(&str, String)]) -> Result<Value> {
        let pairs = with_format_params(params);
        let response = http
            .post(&self.settings.api_url)
            .header("User-Agent", self.settings.user_agent.clone())
            .form(&pairs)
            .send()
            .context("failed to call MediaWiki API")?;
        decode_api_response(response)
    }

    fn login(&self, http: &Client, credentials: &BotCredentials) -> Result<()> {
        let token_response = self.request_json_get(
            http,
            &[
                ("action", "query".to_string()),
                ("meta", "tokens".to_string()),
                ("type", "login".to_string()),
            ],
        )?;
        let token_payload: TokenQueryResponse = serde_json::from_value(token_response)
            .context("failed to decode login token response")?;
        let login_token = token_payload
            .query
            .tokens
            .and_then(|tokens| tokens.logintoken)
            .ok_or_else(|| anyhow::anyhow!("failed to get MediaWiki login token"))?;

        let login_response = self.request_json_post(
            http,
            &[
                ("action", "login".to_string()),
                ("lgname", credentials.username.clone()),
                ("lgpassword", credentials.password.clone()),
                ("lgtoken", login_token),
            ],
        )?;
        let login_payload: LoginResponse =
            serde_json::from_value(login_response).context("failed to decode login response")?;
        match login_payload.login.result.as_deref() {
            Some("Success") => Ok(()),
            other => bail!(
                "MediaWiki login failed: {}",
                login_payload
                    .login
                    .reason
                    .or_else(|| other.map(ToString::to_string))
                    .unwrap_or_else(|| "unknown error".to_string())
            ),
        }
    }
}

impl SiteInfoApi for MediaWikiClient {
    fn api_url(&self) -> &str {
        &self.settings.api_url
    }

    fn site_info(&self, prop: SiteInfoProp) -> Result<Value> {
        let mut state = self
            .state
            .lock()
            .map_err(|_| anyhow::anyhow!("MediaWiki client state poisoned"))?;
        let http = match state.http.clone() {
            Some(http) => http,
            None => {
                let http = self.build_http()?;
                state.http = Some(http.clone());
                http
            }
        };
        if let Some(credentials) = &self.settings.credentials
            && !state.logged_in
        {
            self.login(&http, credentials)?;
            state.logged_in = true;
            debug!(api_url = %self.settings.api_url, "logged in with bot credentials");
        }
        drop(state);

        self.request_json_get(
            &http,
            &[
                ("action", "query".to_string()),
                ("meta", "siteinfo".to_string()),
                ("siprop", prop.as_str().to_string()),
            ],
        )
    }
}

/// A zero timeout means wait indefinitely.
fn request_timeout(timeout: Duration) -> Option<Duration> {
    (!timeout.is_zero()).then_some(timeout)
}

fn with_format_params(params: &[(&str, String)]) -> Vec<(String, String)> {
    let mut pairs = Vec::with_capacity(params.len() + 2);
    pairs.push(("format".to_string(), "json".to_string()));
    pairs.push(("formatversion".to_string(), "2".to_string()));
    for (key, value) in params {
        if !value.is_empty() {
            pairs.push(((*key).to_string(), value.clone()));
        }
    }
    pairs
}

fn decode_api_response(response: reqwest::blocking::Response) -> Result<Value> {
    let status = response.status();
    if !status.is_success() {
        bail!("MediaWiki API request failed with HTTP {status}");
    }
    let payload: Value = response
        .json()
        .context("failed to decode MediaWiki API JSON response")?;
    if let Some(error) = payload.get("error") {
        let code = error
            .get("code")
            .and_then(Value::as_str)
            .unwrap_or("unknown_error");
        let info = error
            .get("info")
            .and_then(Value::as_str)
            .unwrap_or("unknown info");
        bail!("MediaWiki API error [{code}]: {info}");
    }
    Ok(payload)
}

pub type ClientFactory = Box<dyn Fn(ClientSettings) -> Arc<dyn SiteInfoApi> + Send + Sync>;

/// One client per normalized endpoint, kept for the life of the registry.
pub struct ClientRegistry {
    clients: HashMap<String, Arc<dyn SiteInfoApi>>,
    bot_passwords: BTreeMap<String, BotCredentials>,
    timeout: Duration,
    user_agent: String,
    factory: ClientFactory,
}

impl ClientRegistry {
    pub fn new(config: &RemoteWikiConfig) -> Self {
        Self::with_factory(
            config,
            Box::new(|settings: ClientSettings| -> Arc<dyn SiteInfoApi> {
                Arc::new(MediaWikiClient::new(settings))
            }),
        )
    }

    pub fn with_factory(config: &RemoteWikiConfig, factory: ClientFactory) -> Self {
        Self {
            clients: HashMap::new(),
            bot_passwords: config.remote_wiki.bot_passwords.clone(),
            timeout: config.timeout(),
            user_agent: config.user_agent(),
            factory,
        }
    }

    /// Returns the client for `endpoint`, creating it on first use.
    /// Endpoints differing only by scheme or trailing slash share a client.
    pub fn get_client(&mut self, endpoint: &str) -> Arc<dyn SiteInfoApi> {
        let key = registry_key(endpoint);
        if let Some(client) = self.clients.get(&key) {
            return Arc::clone(client);
        }

        let credentials = self.bot_passwords.get(&key).cloned();
        debug!(
            endpoint_key = %key,
            authenticated = credentials.is_some(),
            "creating remote wiki client"
        );
        let client = (self.factory)(ClientSettings {
            api_url: endpoint.to_string(),
            timeout: self.timeout,
            user_agent: self.user_agent.clone(),
            credentials,
        });
        self.clients.insert(key, Arc::clone(&client));
        client
    }

    /// Registers a preconfigured client, replacing whatever `endpoint` mapped to.
    pub fn install(&mut self, endpoint: &str, client: Arc<dyn SiteInfoApi>) {
        self.clients.insert(registry_key(endpoint), client);
    }

    pub fn len(&self) -> usize {
        self.clients.len()
    }

    pub fn is_empty(&self) -> bool {
        self.clients.is_empty()
    }
}

fn registry_key(endpoint: &str) -> String {
    endpoint_key(endpoint).unwrap_or_else(|| endpoint.trim_end_matches('/').to_string())
}

#[derive(Debug, Deserialize, Default)]
struct TokenQueryResponse {
    #[serde(default)]
    query: TokenQueryPayload,
}

#[derive(Debug, Deserialize, Default)]
struct TokenQueryPayload {
    tokens: Option<TokenPayload>,
}

#[derive(Debug, Deserialize, Default)]
struct TokenPayload {
    logintoken: Option<String>,
}

#[derive(Debug, Deserialize, Default)]
struct LoginResponse {
    #[serde(default)]
    login: LoginPayload,
}

#[derive(Debug, Deserialize, Default)]
struct LoginPayload {
    result: Option<String>,
    reason: Option<String>,
}

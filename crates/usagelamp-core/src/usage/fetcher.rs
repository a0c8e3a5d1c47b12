//! Remote usage adapters.
//!
//! Each adapter turns credentials into a usage snapshot or fails. Calls are
//! blocking (`ureq`) and are driven from async code through
//! [`fetch_in_background`].

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use serde::Deserialize;
use serde_json::Value;
use tracing::debug;

use super::parser::parse_usage_document;
use super::types::{FetchError, UsageSnapshot, UsageSource};
use crate::config::Settings;

const OAUTH_USAGE_URL: &str = "https://api.anthropic.com/api/oauth/usage";
const OAUTH_BETA_HEADER: &str = "oauth-2025-04-20";
const WEB_API_BASE: &str = "https://claude.ai/api";
const USER_AGENT: &str = concat!("usagelamp/", env!("CARGO_PKG_VERSION"));

/// Environment variable that overrides the credentials file
pub const OAUTH_TOKEN_ENV: &str = "CLAUDE_CODE_OAUTH_TOKEN";

/// A remote source that can produce a usage snapshot
pub trait UsageAdapter: Send + Sync {
    /// Provenance tag for snapshots from this adapter
    fn source(&self) -> UsageSource;

    /// Whether credentials are present at all (no network involved)
    fn is_configured(&self) -> bool;

    /// Fetch and parse current usage. Blocking.
    fn fetch(&self) -> Result<UsageSnapshot, FetchError>;
}

/// Run a blocking adapter fetch on the blocking thread pool
pub async fn fetch_in_background(
    adapter: Arc<dyn UsageAdapter>,
) -> Result<UsageSnapshot, FetchError> {
    let source_name = adapter.source().as_str();
    tokio::task::spawn_blocking(move || adapter.fetch())
        .await
        .map_err(|e| FetchError::Worker {
            source_name,
            message: e.to_string(),
        })?
}

/// Build an HTTP agent with a global timeout that does not treat 4xx/5xx as
/// transport errors
pub fn http_agent(timeout: Duration) -> ureq::Agent {
    let config = ureq::Agent::config_builder()
        .timeout_global(Some(timeout))
        .http_status_as_error(false)
        .build();
    ureq::Agent::new_with_config(config)
}

/// Issue a GET and decode the JSON body, mapping failures to [`FetchError`]
fn get_json(
    request: ureq::RequestBuilder<ureq::typestate::WithoutBody>,
    source_name: &'static str,
) -> Result<Value, FetchError> {
    let mut response = request.call().map_err(|e| FetchError::Transport {
        source_name,
        message: e.to_string(),
    })?;

    let status = response.status().as_u16();
    if !response.status().is_success() {
        return Err(FetchError::Status {
            source_name,
            status,
        });
    }

    response
        .body_mut()
        .read_json::<Value>()
        .map_err(|e| FetchError::Transport {
            source_name,
            message: format!("invalid JSON body: {}", e),
        })
}

// =========================================================
// OAuth token adapter
// =========================================================

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CredentialsFile {
    claude_ai_oauth: Option<OauthCredentials>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct OauthCredentials {
    access_token: String,
    /// Unix millis
    expires_at: Option<i64>,
}

/// Read the OAuth access token from the environment or credentials file
pub fn read_oauth_token(credentials_path: &Path) -> Result<String, FetchError> {
    const NAME: &str = "oauth";

    if let Ok(token) = std::env::var(OAUTH_TOKEN_ENV) {
        if !token.trim().is_empty() {
            return Ok(token.trim().to_string());
        }
    }

    let content =
        std::fs::read_to_string(credentials_path).map_err(|e| FetchError::NotConfigured {
            source_name: NAME,
            reason: format!("cannot read {}: {}", credentials_path.display(), e),
        })?;
    let file: CredentialsFile =
        serde_json::from_str(&content).map_err(|e| FetchError::NotConfigured {
            source_name: NAME,
            reason: format!("malformed credentials file: {}", e),
        })?;
    let creds = file.claude_ai_oauth.ok_or_else(|| FetchError::NotConfigured {
        source_name: NAME,
        reason: "no OAuth entry in credentials file".to_string(),
    })?;

    if let Some(expires_at) = creds.expires_at {
        if expires_at <= chrono::Utc::now().timestamp_millis() {
            return Err(FetchError::NotConfigured {
                source_name: NAME,
                reason: "OAuth token has expired".to_string(),
            });
        }
    }

    Ok(creds.access_token)
}

/// Fetches usage from the OAuth usage endpoint using the local login token
pub struct OauthAdapter {
    enabled: bool,
    credentials_path: PathBuf,
    agent: ureq::Agent,
}

impl OauthAdapter {
    pub fn new(settings: &Settings) -> Self {
        Self {
            enabled: settings.sources.oauth_enabled,
            credentials_path: settings.sources.credentials_path.clone(),
            agent: http_agent(settings.request_timeout()),
        }
    }
}

impl UsageAdapter for OauthAdapter {
    fn source(&self) -> UsageSource {
        UsageSource::Oauth
    }

    fn is_configured(&self) -> bool {
        self.enabled
    }

    fn fetch(&self) -> Result<UsageSnapshot, FetchError> {
        const NAME: &str = "oauth";
        if !self.enabled {
            return Err(FetchError::NotConfigured {
                source_name: NAME,
                reason: "disabled in settings".to_string(),
            });
        }

        let token = read_oauth_token(&self.credentials_path)?;
        let request = self
            .agent
            .get(OAUTH_USAGE_URL)
            .header("Authorization", &format!("Bearer {}", token))
            .header("anthropic-beta", OAUTH_BETA_HEADER)
            .header("User-Agent", USER_AGENT);

        let doc = get_json(request, NAME)?;
        debug!("OAuth usage response: {}", doc);
        parse_usage_document(&doc, UsageSource::Oauth).ok_or(FetchError::NoData { source_name: NAME })
    }
}

// =========================================================
// Cookie/session adapter
// =========================================================

/// Fetches usage from the web API with a session cookie
pub struct CookieAdapter {
    session_key: Option<String>,
    organization_id: Option<String>,
    agent: ureq::Agent,
}

impl CookieAdapter {
    pub fn new(settings: &Settings) -> Self {
        Self {
            session_key: settings
                .has_cookie_credentials()
                .then(|| settings.sources.session_key.clone())
                .flatten(),
            organization_id: settings.sources.organization_id.clone(),
            agent: http_agent(settings.request_timeout()),
        }
    }

    fn cookie(&self, session_key: &str) -> String {
        format!("sessionKey={}", session_key.trim())
    }

    /// Look up the first organization the session belongs to
    fn discover_organization(&self, session_key: &str) -> Result<String, FetchError> {
        const NAME: &str = "cookie-api";
        let request = self
            .agent
            .get(&format!("{}/organizations", WEB_API_BASE))
            .header("Cookie", &self.cookie(session_key))
            .header("User-Agent", USER_AGENT);

        let doc = get_json(request, NAME)?;
        first_organization_id(&doc).ok_or(FetchError::NoData { source_name: NAME })
    }
}

/// Pull the first organization uuid out of an organizations listing
fn first_organization_id(doc: &Value) -> Option<String> {
    doc.as_array()?
        .iter()
        .find_map(|org| org.get("uuid").and_then(Value::as_str))
        .map(str::to_string)
}

impl UsageAdapter for CookieAdapter {
    fn source(&self) -> UsageSource {
        UsageSource::CookieApi
    }

    fn is_configured(&self) -> bool {
        self.session_key.is_some()
    }

    fn fetch(&self) -> Result<UsageSnapshot, FetchError> {
        const NAME: &str = "cookie-api";
        let session_key = self
            .session_key
            .as_deref()
            .ok_or_else(|| FetchError::NotConfigured {
                source_name: NAME,
                reason: "no session key".to_string(),
            })?;

        let org_id = match &self.organization_id {
            Some(id) => id.clone(),
            None => self.discover_organization(session_key)?,
        };

        let request = self
            .agent
            .get(&format!("{}/organizations/{}/usage", WEB_API_BASE, org_id))
            .header("Cookie", &self.cookie(session_key))
            .header("User-Agent", USER_AGENT);

        let doc = get_json(request, NAME)?;
        debug!("Cookie usage response: {}", doc);
        parse_usage_document(&doc, UsageSource::CookieApi)
            .ok_or(FetchError::NoData { source_name: NAME })
    }
}

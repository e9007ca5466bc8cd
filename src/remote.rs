//! Client for the story backend: session cookies, identity and the member
//! visit ledger.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{info, warn};

use crate::config::HttpSettings;
use crate::http::{HttpFailure, HttpReply, Method, send_with_retries};
use crate::story::{Account, Actor, EpisodeId, VisitLedger};

const CSRF_PATH: &str = "/api/accounts/csrf/";
const LOGIN_PATH: &str = "/api/accounts/login/";
const ME_PATH: &str = "/api/accounts/me/";
const LOGOUT_PATH: &str = "/api/accounts/logout/";
const HISTORY_PATH: &str = "/library/api/history/";
const VIEW_PATH: &str = "/library/api/episodes/{id}/view/";
const BOOKMARK_PATH: &str = "/library/api/episodes/{id}/bookmark/";

#[derive(Debug, Error)]
pub(crate) enum RemoteError {
    #[error(transparent)]
    Http(#[from] HttpFailure),
    #[error("unexpected response from {endpoint}: {reason}")]
    Decode {
        endpoint: &'static str,
        reason: String,
    },
    #[error("not signed in")]
    NotAuthenticated,
    #[error("sign in rejected: {0}")]
    Rejected(String),
}

pub(crate) trait IdentityProvider {
    /// Never fails: anything but a confirmed session is `Actor::Anonymous`.
    fn current_actor(&self) -> Actor;
}

/// Server-side ledger of the signed-in account.
pub(crate) trait RemoteLedger {
    fn fetch_ledger(&self) -> Result<VisitLedger, RemoteError>;

    /// Viewed ids alone. Each call is a full history read; callers that
    /// need both sets use `fetch_ledger` once.
    fn get_viewed(&self) -> Result<Vec<EpisodeId>, RemoteError> {
        Ok(self.fetch_ledger()?.viewed().to_vec())
    }

    fn get_saved(&self) -> Result<Vec<EpisodeId>, RemoteError> {
        Ok(self.fetch_ledger()?.saved().to_vec())
    }

    fn mark_viewed(&self, episode: &EpisodeId) -> Result<(), RemoteError>;

    /// Returns the saved state the server settled on.
    fn toggle_saved(&self, episode: &EpisodeId) -> Result<bool, RemoteError>;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct Credentials {
    pub(crate) session_id: String,
    pub(crate) csrf_token: String,
}

#[derive(Debug, Clone)]
pub(crate) struct ApiClient {
    base_url: String,
    http: HttpSettings,
    credentials: Option<Credentials>,
}

#[derive(Debug, Serialize)]
struct LoginRequest<'a> {
    username: &'a str,
    email: &'a str,
    password: &'a str,
}

#[derive(Debug, Deserialize)]
struct LoginReply {
    #[serde(default)]
    success: Option<bool>,
    #[serde(default)]
    message: Option<String>,
}

#[derive(Debug, Deserialize)]
struct MeReply {
    success: bool,
    #[serde(default)]
    id: Option<u64>,
    #[serde(default)]
    username: Option<String>,
    #[serde(default)]
    email: Option<String>,
}

/// The backend has served both numeric and string ids.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum WireId {
    Number(u64),
    Text(String),
}

impl WireId {
    fn into_episode_id(self) -> Option<EpisodeId> {
        match self {
            Self::Number(id) => Some(EpisodeId::new(id.to_string())),
            Self::Text(id) => {
                let id = id.trim();
                (!id.is_empty()).then(|| EpisodeId::from(id))
            }
        }
    }
}

#[derive(Debug, Deserialize)]
struct EpisodeSummary {
    id: WireId,
}

#[derive(Debug, Deserialize)]
struct HistoryReply {
    recent: Vec<EpisodeSummary>,
    saved: Vec<EpisodeSummary>,
}

#[derive(Debug, Deserialize)]
struct BookmarkReply {
    saved: bool,
}

fn decode<T: DeserializeOwned>(endpoint: &'static str, body: &str) -> Result<T, RemoteError> {
    serde_json::from_str(body).map_err(|err| RemoteError::Decode {
        endpoint,
        reason: err.to_string(),
    })
}

fn summary_ids(
    endpoint: &'static str,
    summaries: Vec<EpisodeSummary>,
) -> Result<Vec<EpisodeId>, RemoteError> {
    summaries
        .into_iter()
        .map(|summary| {
            summary
                .id
                .into_episode_id()
                .ok_or_else(|| RemoteError::Decode {
                    endpoint,
                    reason: "empty episode id".to_string(),
                })
        })
        .collect()
}

fn episode_path(template: &str, episode: &EpisodeId) -> String {
    template.replace("{id}", &path_segment(episode.as_str()))
}

/// Keep unreserved characters, percent-encode the rest.
fn path_segment(raw: &str) -> String {
    let mut encoded = String::with_capacity(raw.len());
    for byte in raw.bytes() {
        if byte.is_ascii_alphanumeric() || matches!(byte, b'-' | b'_' | b'.' | b'~') {
            encoded.push(char::from(byte));
        } else {
            encoded.push_str(&format!("%{byte:02X}"));
        }
    }
    encoded
}

impl ApiClient {
    pub(crate) fn new(base_url: &str, http: HttpSettings) -> Self {
        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            http,
            credentials: None,
        }
    }

    pub(crate) fn with_credentials(mut self, credentials: Credentials) -> Self {
        self.credentials = Some(credentials);
        self
    }

    fn url(&self, path: &str) -> String {
        format!("{}{path}", self.base_url)
    }

    fn session_headers(&self) -> Result<Vec<(&'static str, String)>, RemoteError> {
        let credentials = self
            .credentials
            .as_ref()
            .ok_or(RemoteError::NotAuthenticated)?;
        Ok(vec![
            (
                "Cookie",
                format!(
                    "sessionid={}; csrftoken={}",
                    credentials.session_id, credentials.csrf_token
                ),
            ),
            ("X-CSRFToken", credentials.csrf_token.clone()),
        ])
    }

    fn authed(&self, method: Method, path: &str) -> Result<HttpReply, RemoteError> {
        let headers = self.session_headers()?;
        let body = matches!(method, Method::Post).then_some("{}");
        send_with_retries(method, &self.url(path), &headers, body, &self.http).map_err(|err| {
            if err.is_unauthorized() {
                RemoteError::NotAuthenticated
            } else {
                RemoteError::Http(err)
            }
        })
    }

    /// Sign in and return the session cookies together with the account.
    pub(crate) fn login(
        &self,
        username: &str,
        password: &str,
    ) -> Result<(Credentials, Account), RemoteError> {
        let csrf_reply =
            send_with_retries(Method::Get, &self.url(CSRF_PATH), &[], None, &self.http)?;
        let csrf_token = csrf_reply
            .cookie("csrftoken")
            .ok_or_else(|| RemoteError::Decode {
                endpoint: CSRF_PATH,
                reason: "no csrftoken cookie".to_string(),
            })?;

        let payload = serde_json::to_string(&LoginRequest {
            username,
            email: username,
            password,
        })
        .map_err(|err| RemoteError::Decode {
            endpoint: LOGIN_PATH,
            reason: err.to_string(),
        })?;
        let headers = [
            ("Cookie", format!("csrftoken={csrf_token}")),
            ("X-CSRFToken", csrf_token.clone()),
        ];
        let reply = match send_with_retries(
            Method::Post,
            &self.url(LOGIN_PATH),
            &headers,
            Some(&payload),
            &self.http,
        ) {
            Ok(reply) => reply,
            Err(err) if matches!(err.status, Some(400 | 401 | 403)) => {
                return Err(RemoteError::Rejected(err.message));
            }
            Err(err) => return Err(err.into()),
        };

        let outcome: LoginReply = decode(LOGIN_PATH, &reply.body)?;
        if outcome.success == Some(false) {
            return Err(RemoteError::Rejected(
                outcome
                    .message
                    .unwrap_or_else(|| "invalid credentials".to_string()),
            ));
        }
        let session_id = reply
            .cookie("sessionid")
            .ok_or_else(|| RemoteError::Decode {
                endpoint: LOGIN_PATH,
                reason: "no sessionid cookie".to_string(),
            })?;
        let credentials = Credentials {
            session_id,
            csrf_token: reply.cookie("csrftoken").unwrap_or(csrf_token),
        };

        let account = self.clone().with_credentials(credentials.clone()).me()?;
        info!(username = %account.username, "signed in");
        Ok((credentials, account))
    }

    pub(crate) fn me(&self) -> Result<Account, RemoteError> {
        let reply = self.authed(Method::Get, ME_PATH)?;
        let me: MeReply = decode(ME_PATH, &reply.body)?;
        if !me.success {
            return Err(RemoteError::NotAuthenticated);
        }
        match (me.id, me.username) {
            (Some(id), Some(username)) if !username.trim().is_empty() => Ok(Account {
                id,
                username,
                email: me.email.unwrap_or_default(),
            }),
            _ => Err(RemoteError::Decode {
                endpoint: ME_PATH,
                reason: "account without id or username".to_string(),
            }),
        }
    }

    pub(crate) fn logout(&self) -> Result<(), RemoteError> {
        self.authed(Method::Post, LOGOUT_PATH)?;
        Ok(())
    }
}

impl IdentityProvider for ApiClient {
    fn current_actor(&self) -> Actor {
        if self.credentials.is_none() {
            return Actor::Anonymous;
        }
        match self.me() {
            Ok(account) => Actor::Account(account),
            Err(RemoteError::NotAuthenticated) => {
                info!("stored session is no longer valid");
                Actor::Anonymous
            }
            Err(err) => {
                warn!("identity check failed, continuing as guest: {err}");
                Actor::Anonymous
            }
        }
    }
}

impl RemoteLedger for ApiClient {
    fn fetch_ledger(&self) -> Result<VisitLedger, RemoteError> {
        let reply = self.authed(Method::Get, HISTORY_PATH)?;
        let history: HistoryReply = decode(HISTORY_PATH, &reply.body)?;
        Ok(VisitLedger::from_parts(
            summary_ids(HISTORY_PATH, history.recent)?,
            summary_ids(HISTORY_PATH, history.saved)?,
        ))
    }

    fn mark_viewed(&self, episode: &EpisodeId) -> Result<(), RemoteError> {
        self.authed(Method::Post, &episode_path(VIEW_PATH, episode))?;
        Ok(())
    }

    fn toggle_saved(&self, episode: &EpisodeId) -> Result<bool, RemoteError> {
        let reply = self.authed(Method::Post, &episode_path(BOOKMARK_PATH, episode))?;
        let bookmark: BookmarkReply = decode(BOOKMARK_PATH, &reply.body)?;
        Ok(bookmark.saved)
    }
}

//! Email/password identity provider.
//!
//! The hosted backend exposes a GoTrue-compatible REST API under
//! `{SUPABASE_URL}/auth/v1`. Sessions are cached on disk so consecutive
//! invocations of the CLI share one sign-in.

use std::path::{Path, PathBuf};
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};
use uuid::Uuid;

use crate::error::{AppError, Result};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthUser {
    pub id: Uuid,
    #[serde(default)]
    pub email: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Session {
    pub access_token: String,
    pub refresh_token: String,
    /// Unix seconds.
    pub expires_at: i64,
    pub user: AuthUser,
}

impl Session {
    pub fn is_expired(&self) -> bool {
        // Treat tokens within a minute of expiry as already stale.
        self.expires_at - 60 <= Utc::now().timestamp()
    }
}

#[async_trait]
pub trait IdentityProvider: Send + Sync {
    async fn sign_in(&self, email: &str, password: &str) -> Result<Session>;

    /// Creates an account. Depending on the provider's confirmation settings
    /// the user may still need to confirm their email before signing in.
    async fn sign_up(&self, email: &str, password: &str) -> Result<AuthUser>;

    async fn sign_out(&self, session: &Session) -> Result<()>;

    async fn refresh(&self, session: &Session) -> Result<Session>;

    async fn user(&self, access_token: &str) -> Result<AuthUser>;
}

#[derive(Serialize)]
struct Credentials<'a> {
    email: &'a str,
    password: &'a str,
}

#[derive(Serialize)]
struct RefreshRequest<'a> {
    refresh_token: &'a str,
}

#[derive(Deserialize)]
struct TokenResponse {
    access_token: String,
    refresh_token: String,
    #[serde(default)]
    expires_at: Option<i64>,
    #[serde(default)]
    expires_in: Option<i64>,
    user: AuthUser,
}

impl TokenResponse {
    fn into_session(self) -> Session {
        let expires_at = self
            .expires_at
            .unwrap_or_else(|| Utc::now().timestamp() + self.expires_in.unwrap_or(3600));
        Session {
            access_token: self.access_token,
            refresh_token: self.refresh_token,
            expires_at,
            user: self.user,
        }
    }
}

/// Sign-up answers with either a bare user or a full session, depending on
/// whether email confirmation is required.
#[derive(Deserialize)]
#[serde(untagged)]
enum SignUpResponse {
    Session { user: AuthUser },
    User(AuthUser),
}

pub struct GoTrueClient {
    base_url: String,
    anon_key: String,
    http: reqwest::Client,
}

impl GoTrueClient {
    pub fn new(project_url: &str, anon_key: String) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .connect_timeout(Duration::from_secs(10))
            .build()?;

        Ok(Self {
            base_url: format!("{}/auth/v1", project_url.trim_end_matches('/')),
            anon_key,
            http,
        })
    }

    fn request(&self, method: reqwest::Method, path: &str) -> reqwest::RequestBuilder {
        self.http
            .request(method, format!("{}{}", self.base_url, path))
            .header("apikey", &self.anon_key)
    }

    async fn send(&self, request: reqwest::RequestBuilder) -> Result<reqwest::Response> {
        let response = request.send().await?;
        if response.status().is_success() {
            return Ok(response);
        }

        let status = response.status();
        let body = response.text().await.unwrap_or_default();
        Err(AppError::Remote(provider_message(status, &body)))
    }
}

/// Pulls the provider's own message out of an error body, falling back to
/// the raw body.
fn provider_message(status: reqwest::StatusCode, body: &str) -> String {
    let parsed: Option<serde_json::Value> = serde_json::from_str(body).ok();
    let message = parsed.as_ref().and_then(|value| {
        ["error_description", "msg", "message", "error"]
            .iter()
            .find_map(|key| value.get(*key).and_then(|v| v.as_str()))
    });

    match message {
        Some(message) => message.to_string(),
        None if body.is_empty() => format!("identity provider returned {status}"),
        None => body.to_string(),
    }
}

#[async_trait]
impl IdentityProvider for GoTrueClient {
    async fn sign_in(&self, email: &str, password: &str) -> Result<Session> {
        let request = self
            .request(reqwest::Method::POST, "/token?grant_type=password")
            .json(&Credentials { email, password });
        let token: TokenResponse = self.send(request).await?.json().await?;
        debug!(user = %token.user.id, "signed in");
        Ok(token.into_session())
    }

    async fn sign_up(&self, email: &str, password: &str) -> Result<AuthUser> {
        let request = self
            .request(reqwest::Method::POST, "/signup")
            .json(&Credentials { email, password });
        let user = match self.send(request).await?.json::<SignUpResponse>().await? {
            SignUpResponse::Session { user } => user,
            SignUpResponse::User(user) => user,
        };
        debug!(user = %user.id, "signed up");
        Ok(user)
    }

    async fn sign_out(&self, session: &Session) -> Result<()> {
        let request = self
            .request(reqwest::Method::POST, "/logout")
            .bearer_auth(&session.access_token);
        self.send(request).await?;
        Ok(())
    }

    async fn refresh(&self, session: &Session) -> Result<Session> {
        let request = self
            .request(reqwest::Method::POST, "/token?grant_type=refresh_token")
            .json(&RefreshRequest {
                refresh_token: &session.refresh_token,
            });
        let token: TokenResponse = self.send(request).await?.json().await?;
        Ok(token.into_session())
    }

    async fn user(&self, access_token: &str) -> Result<AuthUser> {
        let request = self
            .request(reqwest::Method::GET, "/user")
            .bearer_auth(access_token);
        Ok(self.send(request).await?.json().await?)
    }
}

/// JSON file holding the current session between runs.
#[derive(Debug, Clone)]
pub struct SessionStore {
    path: PathBuf,
}

impl SessionStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// A missing or unreadable file means no session.
    pub fn load(&self) -> Option<Session> {
        let contents = std::fs::read_to_string(&self.path).ok()?;
        match serde_json::from_str(&contents) {
            Ok(session) => Some(session),
            Err(err) => {
                warn!(path = %self.path.display(), error = %err, "ignoring unreadable session file");
                None
            }
        }
    }

    pub fn save(&self, session: &Session) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let contents = serde_json::to_string_pretty(session)
            .map_err(|err| AppError::validation(err.to_string()))?;
        std::fs::write(&self.path, contents)?;
        Ok(())
    }

    pub fn clear(&self) -> Result<()> {
        match std::fs::remove_file(&self.path) {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(err) => Err(err.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn session(expires_at: i64) -> Session {
        Session {
            access_token: "access".to_string(),
            refresh_token: "refresh".to_string(),
            expires_at,
            user: AuthUser {
                id: Uuid::new_v4(),
                email: Some("admin@example.com".to_string()),
            },
        }
    }

    #[test]
    fn store_round_trips_and_clears() {
        let dir = tempfile::tempdir().unwrap();
        let store = SessionStore::new(dir.path().join("nested").join("session.json"));
        assert!(store.load().is_none());

        let saved = session(Utc::now().timestamp() + 3600);
        store.save(&saved).unwrap();
        assert_eq!(store.load(), Some(saved));

        store.clear().unwrap();
        assert!(store.load().is_none());
        store.clear().unwrap();
    }

    #[test]
    fn corrupt_session_file_is_ignored() {
        let dir = tempfile::tempdir().unwrap();
        let store = SessionStore::new(dir.path().join("session.json"));
        std::fs::write(store.path(), "{not json").unwrap();
        assert!(store.load().is_none());
    }

    #[test]
    fn expiry_has_a_margin() {
        let now = Utc::now().timestamp();
        assert!(session(now - 10).is_expired());
        assert!(session(now + 30).is_expired());
        assert!(!session(now + 3600).is_expired());
    }

    #[test]
    fn provider_errors_are_passed_through() {
        let status = reqwest::StatusCode::BAD_REQUEST;
        assert_eq!(
            provider_message(
                status,
                r#"{"error":"invalid_grant","error_description":"Invalid login credentials"}"#
            ),
            "Invalid login credentials"
        );
        assert_eq!(
            provider_message(status, r#"{"msg":"User already registered"}"#),
            "User already registered"
        );
        assert_eq!(provider_message(status, "upstream down"), "upstream down");
        assert!(provider_message(status, "").contains("400"));
    }

    #[test]
    fn sign_up_accepts_both_response_shapes() {
        let id = Uuid::new_v4();
        let bare = format!(r#"{{"id":"{id}","email":"a@b.c","aud":"authenticated"}}"#);
        let wrapped = format!(
            r#"{{"access_token":"t","refresh_token":"r","user":{{"id":"{id}","email":"a@b.c"}}}}"#
        );
        for body in [bare, wrapped] {
            let user = match serde_json::from_str::<SignUpResponse>(&body).unwrap() {
                SignUpResponse::Session { user } => user,
                SignUpResponse::User(user) => user,
            };
            assert_eq!(user.id, id);
        }
    }
}

//! Creates a valid Google session (access token) that we can use to call the Calendar API.
//!
//! Sessions are created out of band. This module only loads them and refreshes
//! the access token when it has expired.

use std::path::PathBuf;

use anyhow::{Context, Result};
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use crate::app_config::{self, Credentials, base_dir};

pub const TOKEN_URL: &str = "https://oauth2.googleapis.com/token";

/// Access tokens are refreshed this long before they actually expire.
const EXPIRY_MARGIN_SECS: i64 = 60;

pub struct Session {
    path: PathBuf,
    data: SessionData,
}

#[derive(Serialize, Deserialize, Clone)]
pub struct SessionData {
    access_token: String,
    refresh_token: String,
    expires_at: DateTime<Utc>,
}

#[derive(Deserialize)]
struct RefreshResponse {
    access_token: String,
    expires_in: i64,
    #[serde(default)]
    refresh_token: Option<String>,
}

impl Session {
    fn path_for_account_email(account_email: &str) -> Result<PathBuf> {
        let email_slug = account_email.replace(['/', '\\', ':'], "_");

        Ok(base_dir()?
            .join("session")
            .join(format!("{}.toml", email_slug)))
    }

    /// Load the session of a domain account, refreshing it if expired.
    pub async fn load_valid(account_email: &str) -> Result<Self> {
        let path = Self::path_for_account_email(account_email)?;
        if !path.exists() {
            anyhow::bail!(
                "Google OAuth session for {} not found at {}",
                account_email,
                path.display()
            );
        }

        let mut session = Self::load(path)?;
        if session.is_expired() {
            let creds = app_config::load()?;
            session.refresh(TOKEN_URL, &creds).await?;
        }
        Ok(session)
    }

    fn load(path: PathBuf) -> Result<Self> {
        let contents = std::fs::read_to_string(&path).with_context(|| {
            format!(
                "Failed to read Google OAuth session from {}",
                path.display()
            )
        })?;

        let data: SessionData = toml::from_str(&contents).with_context(|| {
            format!(
                "Failed to parse Google OAuth session from {}",
                path.display()
            )
        })?;

        Ok(Session { path, data })
    }

    pub fn access_token(&self) -> &str {
        &self.data.access_token
    }

    pub fn save(&self) -> Result<()> {
        let contents = toml::to_string_pretty(&self.data).context("Failed to serialize session")?;

        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create directory {}", parent.display()))?;
        }

        std::fs::write(&self.path, contents)
            .with_context(|| format!("Failed to write session to {}", self.path.display()))?;

        // Set to owner-only (0600) since file contains OAuth tokens:
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            std::fs::set_permissions(&self.path, std::fs::Permissions::from_mode(0o600))
                .with_context(|| format!("Failed to set permissions on {}", self.path.display()))?;
        }

        Ok(())
    }

    fn is_expired(&self) -> bool {
        Utc::now() + Duration::seconds(EXPIRY_MARGIN_SECS) >= self.data.expires_at
    }

    async fn refresh(&mut self, token_url: &str, creds: &Credentials) -> Result<()> {
        let response = reqwest::Client::new()
            .post(token_url)
            .form(&[
                ("grant_type", "refresh_token"),
                ("client_id", creds.client_id.as_str()),
                ("client_secret", creds.client_secret.as_str()),
                ("refresh_token", self.data.refresh_token.as_str()),
            ])
            .send()
            .await
            .context("Failed to send token refresh request")?;

        if !response.status().is_success() {
            let status = response.status();
            let error_text = response.text().await.unwrap_or_default();
            anyhow::bail!("Failed to refresh Google token ({}): {}", status, error_text);
        }

        let refreshed: RefreshResponse = response
            .json()
            .await
            .context("Failed to parse token refresh response")?;

        self.data.access_token = refreshed.access_token;
        self.data.expires_at = Utc::now() + Duration::seconds(refreshed.expires_in);
        // Google typically doesn't return a new refresh_token on refresh
        if let Some(refresh_token) = refreshed.refresh_token.filter(|t| !t.is_empty()) {
            self.data.refresh_token = refresh_token;
        }
        tracing::debug!(path = %self.path.display(), "refreshed Google access token");

        self.save()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{body_string_contains, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn write_session(dir: &std::path::Path, expires_at: DateTime<Utc>) -> PathBuf {
        let path = dir.join("session").join("admin@foo.com.toml");
        let session = Session {
            path: path.clone(),
            data: SessionData {
                access_token: "old-access".into(),
                refresh_token: "refresh-1".into(),
                expires_at,
            },
        };
        session.save().unwrap();
        path
    }

    fn creds() -> Credentials {
        Credentials {
            client_id: "client".into(),
            client_secret: "secret".into(),
        }
    }

    #[test]
    fn test_expiry_includes_margin() {
        let dir = tempfile::tempdir().unwrap();

        let path = write_session(dir.path(), Utc::now() + Duration::seconds(30));
        assert!(Session::load(path).unwrap().is_expired());

        let path = write_session(dir.path(), Utc::now() + Duration::hours(1));
        assert!(!Session::load(path).unwrap().is_expired());
    }

    #[cfg(unix)]
    #[test]
    fn test_session_file_is_owner_only() {
        use std::os::unix::fs::PermissionsExt;

        let dir = tempfile::tempdir().unwrap();
        let path = write_session(dir.path(), Utc::now());

        let mode = std::fs::metadata(&path).unwrap().permissions().mode();
        assert_eq!(mode & 0o777, 0o600);
    }

    #[tokio::test]
    async fn test_refresh_updates_and_persists_access_token() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/token"))
            .and(body_string_contains("grant_type=refresh_token"))
            .and(body_string_contains("refresh_token=refresh-1"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "access_token": "new-access",
                "expires_in": 3599,
                "token_type": "Bearer"
            })))
            .expect(1)
            .mount(&server)
            .await;

        let dir = tempfile::tempdir().unwrap();
        let path = write_session(dir.path(), Utc::now());
        let mut session = Session::load(path.clone()).unwrap();

        session
            .refresh(&format!("{}/token", server.uri()), &creds())
            .await
            .unwrap();
        assert_eq!(session.access_token(), "new-access");
        assert!(!session.is_expired());

        let reloaded = Session::load(path).unwrap();
        assert_eq!(reloaded.access_token(), "new-access");
        assert_eq!(reloaded.data.refresh_token, "refresh-1");
    }

    #[tokio::test]
    async fn test_refresh_rejection_is_an_error() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/token"))
            .respond_with(
                ResponseTemplate::new(400)
                    .set_body_json(serde_json::json!({"error": "invalid_grant"})),
            )
            .mount(&server)
            .await;

        let dir = tempfile::tempdir().unwrap();
        let path = write_session(dir.path(), Utc::now());
        let mut session = Session::load(path).unwrap();

        let err = session
            .refresh(&format!("{}/token", server.uri()), &creds())
            .await
            .unwrap_err();
        assert!(format!("{err:#}").contains("invalid_grant"));
        assert_eq!(session.access_token(), "old-access");
    }
}

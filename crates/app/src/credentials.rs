use sonos_scrobbler_core::LastFmConfig;
use sonos_scrobbler_lastfm::{CredentialError, LastFmClient};
use tracing::info;

#[derive(Clone)]
pub struct Credentials {
    pub api_key: String,
    pub api_secret: String,
    pub session_key: String,
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credentials")
            .field("api_key", &self.api_key)
            .field("api_secret", &"<redacted>")
            .field("session_key", &"<redacted>")
            .finish()
    }
}

fn blank(value: &str) -> bool {
    value.trim().is_empty()
}

/// Fields that keep the daemon from submitting anything.
pub fn missing_fields(cfg: &LastFmConfig) -> Vec<&'static str> {
    let mut missing = Vec::new();
    if blank(&cfg.api_key) {
        missing.push("api_key");
    }
    if blank(&cfg.api_secret) {
        missing.push("api_secret");
    }
    if blank(&cfg.session_key) && (blank(&cfg.username) || blank(&cfg.password)) {
        missing.push("session_key (or username and password)");
    }
    missing
}

/// Resolves the credentials from the merged config. Without a stored session
/// key, logs in once with username and password.
pub async fn load_credentials(cfg: &LastFmConfig) -> Result<Credentials, CredentialError> {
    let missing = missing_fields(cfg);
    if !missing.is_empty() {
        return Err(CredentialError::Missing(missing));
    }

    let session_key = if blank(&cfg.session_key) {
        let client = LastFmClient::new(&cfg.api_url, cfg.api_key.trim(), cfg.api_secret.trim())
            .map_err(|err| CredentialError::Unavailable(format!("{err:#}")))?;
        let key = client
            .mobile_session(cfg.username.trim(), &cfg.password)
            .await?;
        info!(username = %cfg.username.trim(), "obtained Last.fm session key");
        key
    } else {
        cfg.session_key.trim().to_string()
    };

    Ok(Credentials {
        api_key: cfg.api_key.trim().to_string(),
        api_secret: cfg.api_secret.trim().to_string(),
        session_key,
    })
}

#[cfg(test)]
mod tests {
    use super::{load_credentials, missing_fields};
    use sonos_scrobbler_core::LastFmConfig;
    use sonos_scrobbler_lastfm::CredentialError;

    fn with_keys() -> LastFmConfig {
        LastFmConfig {
            api_key: "key".to_string(),
            api_secret: "secret".to_string(),
            ..LastFmConfig::default()
        }
    }

    #[test]
    fn empty_config_lists_every_field() {
        assert_eq!(
            missing_fields(&LastFmConfig::default()),
            vec!["api_key", "api_secret", "session_key (or username and password)"]
        );
    }

    #[test]
    fn username_and_password_stand_in_for_session_key() {
        let cfg = LastFmConfig {
            username: "someone".to_string(),
            password: "hunter2".to_string(),
            ..with_keys()
        };
        assert!(missing_fields(&cfg).is_empty());

        let half = LastFmConfig {
            username: "someone".to_string(),
            ..with_keys()
        };
        assert_eq!(missing_fields(&half).len(), 1);
    }

    #[tokio::test]
    async fn stored_session_key_is_used_as_is() {
        let cfg = LastFmConfig {
            session_key: " sk123 ".to_string(),
            ..with_keys()
        };
        let creds = load_credentials(&cfg).await.expect("credentials");
        assert_eq!(creds.session_key, "sk123");
        assert!(!format!("{creds:?}").contains("sk123"));
    }

    #[tokio::test]
    async fn missing_credentials_are_fatal() {
        let err = load_credentials(&LastFmConfig::default())
            .await
            .expect_err("missing");
        assert!(matches!(err, CredentialError::Missing(fields) if fields.len() == 3));
    }
}

use crate::error::{
    check_scrobble_accepted, classify_response, classify_transport, CredentialError,
};
use anyhow::{Context, Result};
use async_trait::async_trait;
use serde_json::Value;
use sonos_scrobbler_core::{Listen, ScrobbleApi, SubmitError};
use std::collections::BTreeMap;
use std::time::Duration;
use tracing::debug;
use url::Url;

const HTTP_TIMEOUT: Duration = Duration::from_secs(15);
const USER_AGENT: &str = concat!("sonos-scrobbler/", env!("CARGO_PKG_VERSION"));

type Params = BTreeMap<&'static str, String>;

/// `api_sig` for a parameter set: md5 over the key/value pairs in key order,
/// followed by the shared secret. `format` and `callback` are not signed.
pub fn api_signature(params: &BTreeMap<&str, String>, secret: &str) -> String {
    let mut raw = String::new();
    for (key, value) in params {
        if matches!(*key, "format" | "callback") {
            continue;
        }
        raw.push_str(key);
        raw.push_str(value);
    }
    raw.push_str(secret);
    format!("{:x}", md5::compute(raw.as_bytes()))
}

pub struct LastFmClient {
    http: reqwest::Client,
    api_url: Url,
    api_key: String,
    api_secret: String,
    session_key: Option<String>,
}

impl LastFmClient {
    pub fn new(api_url: &str, api_key: &str, api_secret: &str) -> Result<Self> {
        let api_url = Url::parse(api_url).with_context(|| format!("invalid api url {api_url}"))?;
        let http = reqwest::Client::builder()
            .timeout(HTTP_TIMEOUT)
            .user_agent(USER_AGENT)
            .build()
            .context("failed to build Last.fm http client")?;

        Ok(Self {
            http,
            api_url,
            api_key: api_key.to_string(),
            api_secret: api_secret.to_string(),
            session_key: None,
        })
    }

    pub fn with_session(mut self, session_key: &str) -> Self {
        self.session_key = Some(session_key.to_string());
        self
    }

    /// Exchanges a username and password for a session key.
    pub async fn mobile_session(
        &self,
        username: &str,
        password: &str,
    ) -> Result<String, CredentialError> {
        let mut params = Params::new();
        params.insert("username", username.to_string());
        params.insert("password", password.to_string());

        let payload = self.call("auth.getMobileSession", params, false).await?;
        payload
            .pointer("/session/key")
            .and_then(Value::as_str)
            .map(str::to_string)
            .ok_or_else(|| {
                CredentialError::AuthRejected("response carried no session key".to_string())
            })
    }

    async fn call(
        &self,
        method: &'static str,
        mut params: Params,
        with_session: bool,
    ) -> Result<Value, SubmitError> {
        params.insert("method", method.to_string());
        params.insert("api_key", self.api_key.clone());
        if with_session {
            let session_key = self
                .session_key
                .as_ref()
                .ok_or_else(|| SubmitError::Permanent("no Last.fm session key".to_string()))?;
            params.insert("sk", session_key.clone());
        }
        let signature = api_signature(&params, &self.api_secret);
        params.insert("api_sig", signature);
        params.insert("format", "json".to_string());

        let response = self
            .http
            .post(self.api_url.clone())
            .form(&params)
            .send()
            .await
            .map_err(classify_transport)?;
        let status = response.status().as_u16();
        let body = response.text().await.map_err(classify_transport)?;
        debug!(method, status, "Last.fm response");

        classify_response(status, &body)
    }
}

fn track_params(listen: &Listen) -> Params {
    let mut params = Params::new();
    params.insert("artist", listen.track.artist.clone());
    params.insert("track", listen.track.title.clone());
    if let Some(album) = &listen.track.album {
        params.insert("album", album.clone());
    }
    if let Some(duration) = listen.duration {
        params.insert("duration", duration.as_secs().to_string());
    }
    params
}

#[async_trait]
impl ScrobbleApi for LastFmClient {
    fn name(&self) -> &'static str {
        "lastfm"
    }

    async fn submit_now_playing(&self, listen: &Listen) -> Result<(), SubmitError> {
        self.call("track.updateNowPlaying", track_params(listen), true)
            .await
            .map(|_| ())
    }

    async fn submit_scrobble(&self, listen: &Listen) -> Result<(), SubmitError> {
        let mut params = track_params(listen);
        params.insert("timestamp", listen.started_at_unix().to_string());
        let payload = self.call("track.scrobble", params, true).await?;
        check_scrobble_accepted(&payload)
    }
}

#[cfg(test)]
mod tests {
    use super::{api_signature, LastFmClient};
    use crate::CredentialError;
    use sonos_scrobbler_core::{DedupKey, Listen, ScrobbleApi, TrackInfo};
    use std::collections::BTreeMap;
    use std::time::{Duration, SystemTime};
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;
    use tokio::task::JoinHandle;

    /// Answers exactly one HTTP request and hands back the raw request text.
    async fn serve_once(status: u16, body: &'static str) -> (String, JoinHandle<String>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
        let url = format!("http://{}/2.0/", listener.local_addr().expect("addr"));

        let handle = tokio::spawn(async move {
            let (mut stream, _) = listener.accept().await.expect("accept");
            let mut buf = Vec::new();
            let mut chunk = [0u8; 4096];
            loop {
                let n = stream.read(&mut chunk).await.expect("read");
                if n == 0 {
                    break;
                }
                buf.extend_from_slice(&chunk[..n]);
                let text = String::from_utf8_lossy(&buf).to_string();
                if let Some(end) = text.find("\r\n\r\n") {
                    let len = text[..end]
                        .lines()
                        .find_map(|line| {
                            line.to_ascii_lowercase()
                                .strip_prefix("content-length:")
                                .map(|v| v.trim().to_string())
                        })
                        .and_then(|v| v.parse::<usize>().ok())
                        .unwrap_or(0);
                    if buf.len() >= end + 4 + len {
                        break;
                    }
                }
            }

            let response = format!(
                "HTTP/1.1 {status} Reply\r\ncontent-type: application/json\r\ncontent-length: {}\r\nconnection: close\r\n\r\n{body}",
                body.len()
            );
            stream.write_all(response.as_bytes()).await.expect("write");
            stream.shutdown().await.ok();
            String::from_utf8_lossy(&buf).to_string()
        });

        (url, handle)
    }

    fn listen() -> Listen {
        let track = TrackInfo {
            artist: "Daft Punk".to_string(),
            title: "Veridis Quo".to_string(),
            album: Some("Discovery".to_string()),
        };
        let started_at = SystemTime::UNIX_EPOCH + Duration::from_secs(1_700_000_000);
        Listen {
            dedup_key: DedupKey::new("kitchen", &track.key(), started_at),
            device_id: "kitchen".to_string(),
            track,
            duration: Some(Duration::from_secs(345)),
            started_at,
            played: Duration::from_secs(180),
        }
    }

    #[test]
    fn signature_sorts_params_and_skips_format() {
        let mut params = BTreeMap::new();
        params.insert("method", "auth.getMobileSession".to_string());
        params.insert("api_key", "key".to_string());
        params.insert("username", "user".to_string());
        params.insert("password", "pass".to_string());
        let expected = format!(
            "{:x}",
            md5::compute("api_keykeymethodauth.getMobileSessionpasswordpassusernameusersecret")
        );
        assert_eq!(api_signature(&params, "secret"), expected);

        params.insert("format", "json".to_string());
        assert_eq!(api_signature(&params, "secret"), expected);
    }

    #[tokio::test]
    async fn scrobble_posts_signed_form() {
        let (url, server) = serve_once(
            200,
            r#"{"scrobbles":{"@attr":{"accepted":1,"ignored":0},"scrobble":{}}}"#,
        )
        .await;
        let client = LastFmClient::new(&url, "key", "secret")
            .expect("client")
            .with_session("sk123");

        client.submit_scrobble(&listen()).await.expect("scrobble");

        let request = server.await.expect("server");
        assert!(request.starts_with("POST /2.0/"));
        assert!(request.contains("method=track.scrobble"));
        assert!(request.contains("timestamp=1700000000"));
        assert!(request.contains("artist=Daft+Punk"));
        assert!(request.contains("sk=sk123"));
        assert!(request.contains("api_sig="));
        assert!(request.contains("format=json"));
    }

    #[tokio::test]
    async fn invalid_session_is_permanent() {
        let (url, _server) =
            serve_once(403, r#"{"error":9,"message":"Invalid session key"}"#).await;
        let client = LastFmClient::new(&url, "key", "secret")
            .expect("client")
            .with_session("stale");

        let err = client.submit_now_playing(&listen()).await.expect_err("rejected");
        assert!(!err.is_transient());
    }

    #[tokio::test]
    async fn unreachable_service_is_transient() {
        let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
        let url = format!("http://{}/2.0/", listener.local_addr().expect("addr"));
        drop(listener);

        let client = LastFmClient::new(&url, "key", "secret")
            .expect("client")
            .with_session("sk");
        let err = client.submit_scrobble(&listen()).await.expect_err("offline");
        assert!(err.is_transient());
    }

    #[tokio::test]
    async fn submissions_without_session_fail_permanently() {
        let client = LastFmClient::new("http://127.0.0.1:9/2.0/", "key", "secret").expect("client");
        let err = client.submit_scrobble(&listen()).await.expect_err("no session");
        assert!(!err.is_transient());
    }

    #[tokio::test]
    async fn mobile_session_returns_key() {
        let (url, server) = serve_once(
            200,
            concat!(
                r#"{"session":{"name":"someone","#,
                r#""key":"d580d57f32848f5dcf574d1ce18d78b2","subscriber":0}}"#
            ),
        )
        .await;
        let client = LastFmClient::new(&url, "key", "secret").expect("client");

        let key = client.mobile_session("someone", "hunter2").await.expect("session");
        assert_eq!(key, "d580d57f32848f5dcf574d1ce18d78b2");

        let request = server.await.expect("server");
        assert!(request.contains("method=auth.getMobileSession"));
        assert!(!request.contains("sk="));
    }

    #[tokio::test]
    async fn mobile_session_surfaces_bad_password() {
        let (url, _server) = serve_once(
            403,
            r#"{"error":4,"message":"Authentication Failed"}"#,
        )
        .await;
        let client = LastFmClient::new(&url, "key", "secret").expect("client");

        let err = client.mobile_session("someone", "wrong").await.expect_err("rejected");
        assert!(matches!(
            err,
            CredentialError::AuthRejected(msg) if msg.contains("Authentication Failed")
        ));
    }
}

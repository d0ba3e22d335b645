use crate::error::{Result, SpeechError};
use secrecy::{ExposeSecret, SecretBox};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// Tokens expire server-side after roughly ten minutes; renew one minute early.
pub const TOKEN_RENEW_INTERVAL: Duration = Duration::from_secs(9 * 60);

struct AuthInner {
    key: SecretBox<String>,
    token_url: String,
    http: reqwest::Client,
    token: Mutex<Option<String>>,
    enabled: AtomicBool,
    cancel: CancellationToken,
    renew_interval: Duration,
}

/// Fetches and silently renews the bearer token for one subscription key.
///
/// Cloning is cheap and shares the token store, so the renewal task and the
/// session observe the same token.
#[derive(Clone)]
pub struct Authenticator {
    inner: Arc<AuthInner>,
}

impl Authenticator {
    pub fn new(key: &str, token_url: &str) -> Self {
        Self::with_renew_interval(key, token_url, TOKEN_RENEW_INTERVAL)
    }

    fn with_renew_interval(key: &str, token_url: &str, renew_interval: Duration) -> Self {
        Self {
            inner: Arc::new(AuthInner {
                key: SecretBox::new(Box::new(key.to_string())),
                token_url: token_url.to_string(),
                http: reqwest::Client::new(),
                token: Mutex::new(None),
                enabled: AtomicBool::new(true),
                cancel: CancellationToken::new(),
                renew_interval,
            }),
        }
    }

    /// Fetch a fresh bearer token, replacing any stored one.
    ///
    /// The endpoint answers a keyed POST with the token as plain text.
    pub async fn fetch(&self) -> Result<()> {
        let response = self
            .inner
            .http
            .post(&self.inner.token_url)
            .header("Ocp-Apim-Subscription-Key", self.inner.key.expose_secret())
            .send()
            .await?;

        let status = response.status();
        let body = response.text().await?;
        if !status.is_success() {
            return Err(SpeechError::Auth {
                status: status.as_u16(),
                body,
            });
        }

        *self.inner.token.lock().unwrap() = Some(body);
        Ok(())
    }

    /// Current bearer token, if one has been fetched.
    pub fn token(&self) -> Option<String> {
        self.inner.token.lock().unwrap().clone()
    }

    /// True while a token is held and renewal has not been stopped.
    pub fn is_valid(&self) -> bool {
        self.inner.enabled.load(Ordering::SeqCst) && self.inner.token.lock().unwrap().is_some()
    }

    /// Keep the token fresh in the background.
    ///
    /// The renewal task re-fetches on a fixed interval and only replaces the
    /// stored token. It never touches session state and emits no events, so
    /// callers cannot observe a renewal. Failures are logged and retried on
    /// the next interval.
    pub fn start_renewal(&self) {
        let auth = self.clone();
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = tokio::time::sleep(auth.inner.renew_interval) => {}
                    _ = auth.inner.cancel.cancelled() => break,
                }
                if !auth.inner.enabled.load(Ordering::SeqCst) {
                    break;
                }
                match auth.fetch().await {
                    Ok(()) => log::debug!("Auth: Renewed bearer token"),
                    Err(e) => log::warn!("Auth: Token renewal failed: {}", e),
                }
            }
        });
    }

    /// Cancel the renewal task and invalidate the held token.
    pub fn stop_renewal(&self) {
        self.inner.enabled.store(false, Ordering::SeqCst);
        self.inner.cancel.cancel();
        *self.inner.token.lock().unwrap() = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::{Read, Write};
    use std::net::TcpListener;
    use std::sync::atomic::AtomicUsize;

    // Minimal one-request-per-connection token endpoint. Counts hits and
    // hands out "tok<n>" bodies so renewals are distinguishable.
    fn spawn_token_server(status: u16) -> (String, Arc<AtomicUsize>) {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        let hits = Arc::new(AtomicUsize::new(0));
        let server_hits = Arc::clone(&hits);

        std::thread::spawn(move || {
            for stream in listener.incoming() {
                let Ok(mut stream) = stream else { break };

                let mut buf = [0u8; 1024];
                let mut request = Vec::new();
                loop {
                    let n = stream.read(&mut buf).unwrap_or(0);
                    if n == 0 {
                        break;
                    }
                    request.extend_from_slice(&buf[..n]);
                    if request.windows(4).any(|w| w == b"\r\n\r\n") {
                        break;
                    }
                }

                let count = server_hits.fetch_add(1, Ordering::SeqCst) + 1;
                let (reason, body) = if status == 200 {
                    ("OK", format!("tok{}", count))
                } else {
                    ("Forbidden", "denied".to_string())
                };
                let response = format!(
                    "HTTP/1.1 {} {}\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
                    status,
                    reason,
                    body.len(),
                    body
                );
                let _ = stream.write_all(response.as_bytes());
            }
        });

        (format!("http://{}", addr), hits)
    }

    #[tokio::test]
    async fn test_fetch_stores_token() {
        let (url, hits) = spawn_token_server(200);
        let auth = Authenticator::new("1234567890abcdef", &url);

        assert!(!auth.is_valid());
        auth.fetch().await.unwrap();

        assert_eq!(auth.token().as_deref(), Some("tok1"));
        assert!(auth.is_valid());
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_fetch_rejects_non_success() {
        let (url, _hits) = spawn_token_server(403);
        let auth = Authenticator::new("1234567890abcdef", &url);

        match auth.fetch().await {
            Err(SpeechError::Auth { status, body }) => {
                assert_eq!(status, 403);
                assert_eq!(body, "denied");
            }
            other => panic!("expected auth rejection, got {:?}", other),
        }
        assert!(auth.token().is_none());
        assert!(!auth.is_valid());
    }

    #[tokio::test]
    #[serial_test::serial]
    async fn test_renewal_refetches_silently() {
        let (url, hits) = spawn_token_server(200);
        let auth = Authenticator::with_renew_interval(
            "1234567890abcdef",
            &url,
            Duration::from_millis(50),
        );

        auth.fetch().await.unwrap();
        assert_eq!(auth.token().as_deref(), Some("tok1"));

        auth.start_renewal();
        tokio::time::sleep(Duration::from_millis(180)).await;

        let renewed = hits.load(Ordering::SeqCst);
        assert!(renewed >= 2, "expected at least one renewal, saw {}", renewed);
        assert_ne!(auth.token().as_deref(), Some("tok1"));
        assert!(auth.is_valid());

        auth.stop_renewal();
        assert!(!auth.is_valid());
        assert!(auth.token().is_none());

        let after_stop = hits.load(Ordering::SeqCst);
        tokio::time::sleep(Duration::from_millis(150)).await;
        assert_eq!(hits.load(Ordering::SeqCst), after_stop);
    }
}

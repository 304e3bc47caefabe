use crate::error::{Error, Result};
use async_trait::async_trait;
use reqwest::Client;
use std::sync::OnceLock;
use std::time::Duration;
use tokio::time::{sleep, Instant};

/// Global shared HTTP client for liveness and validation requests.
///
/// Individual requests set their own timeout; the client-level timeout is
/// only a fallback.
static SHARED_HTTP_CLIENT: OnceLock<Client> = OnceLock::new();

pub(crate) fn shared_client() -> &'static Client {
    SHARED_HTTP_CLIENT.get_or_init(|| {
        Client::builder()
            .timeout(Duration::from_secs(30))
            .pool_max_idle_per_host(4)
            // Loopback only
            .no_proxy()
            .build()
            .expect("Failed to create shared HTTP client")
    })
}

/// Answers whether a freshly launched backend is reachable.
#[async_trait]
pub trait LivenessProbe: Send + Sync {
    async fn is_live(&self, base_url: &str) -> bool;
}

/// GET `{base_url}{path}`, live on any 2xx.
pub struct HttpLivenessProbe {
    path: String,
    request_timeout: Duration,
}

impl HttpLivenessProbe {
    pub fn new(path: impl Into<String>, request_timeout: Duration) -> Self {
        Self {
            path: path.into(),
            request_timeout,
        }
    }

    fn url(&self, base_url: &str) -> Result<String> {
        let url = format!("{}{}", base_url.trim_end_matches('/'), self.path);
        match url::Url::parse(&url) {
            Ok(parsed) if parsed.scheme() == "http" || parsed.scheme() == "https" => Ok(url),
            Ok(parsed) => Err(Error::Config(format!(
                "Invalid liveness URL '{}': scheme must be http or https, got '{}'",
                url,
                parsed.scheme()
            ))),
            Err(e) => Err(Error::Config(format!("Invalid liveness URL '{}': {}", url, e))),
        }
    }
}

#[async_trait]
impl LivenessProbe for HttpLivenessProbe {
    async fn is_live(&self, base_url: &str) -> bool {
        let url = match self.url(base_url) {
            Ok(url) => url,
            Err(e) => {
                tracing::warn!("{}", e);
                return false;
            }
        };
        match shared_client()
            .get(&url)
            .timeout(self.request_timeout)
            .send()
            .await
        {
            Ok(response) => response.status().is_success(),
            Err(_) => false,
        }
    }
}

/// Poll `probe` every `interval` until it answers or `timeout` elapses.
///
/// Returns the time waited on success.
pub async fn wait_until_live<P: LivenessProbe + ?Sized>(
    probe: &P,
    base_url: &str,
    interval: Duration,
    timeout: Duration,
) -> std::result::Result<Duration, Duration> {
    let started = Instant::now();
    loop {
        if probe.is_live(base_url).await {
            return Ok(started.elapsed());
        }
        let waited = started.elapsed();
        if waited >= timeout {
            return Err(waited);
        }
        sleep(interval.min(timeout - waited)).await;
    }
}

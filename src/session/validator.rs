use crate::config::ValidationPolicy;
use crate::error::Error;
use crate::service::shared_client;
use async_trait::async_trait;
use reqwest::StatusCode;
use std::time::Duration;

/// What the backend said about a token.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ValidationOutcome {
    Valid,
    /// Explicitly rejected (401, or a success response carrying `code: 401`).
    Invalid,
    /// The backend answered, but with an error status or an unreadable body.
    Rejected(String),
    TimedOut,
    /// The request never got an answer (connection refused, reset, DNS).
    Unavailable(String),
}

impl ValidationOutcome {
    /// Collapse to valid/invalid under `policy`.
    pub fn is_valid(&self, policy: ValidationPolicy) -> bool {
        match self {
            ValidationOutcome::Valid => true,
            ValidationOutcome::Invalid | ValidationOutcome::Rejected(_) => false,
            ValidationOutcome::TimedOut | ValidationOutcome::Unavailable(_) => {
                policy == ValidationPolicy::Optimistic
            }
        }
    }

    /// The failure this outcome represents, for reporting.
    pub fn error(&self) -> Option<Error> {
        match self {
            ValidationOutcome::Valid => None,
            ValidationOutcome::Invalid => Some(Error::ValidationUnauthorized),
            ValidationOutcome::TimedOut => Some(Error::ValidationTimeout),
            ValidationOutcome::Rejected(reason) | ValidationOutcome::Unavailable(reason) => {
                Some(Error::Backend(format!("Token validation failed: {}", reason)))
            }
        }
    }
}

#[async_trait]
pub trait TokenValidator: Send + Sync {
    async fn validate(&self, base_url: &str, token: &str) -> ValidationOutcome;
}

/// GET `{base_url}{path}` with a bearer header.
pub struct HttpTokenValidator {
    path: String,
    timeout: Duration,
}

impl HttpTokenValidator {
    pub fn new(path: impl Into<String>, timeout: Duration) -> Self {
        Self {
            path: path.into(),
            timeout,
        }
    }
}

#[async_trait]
impl TokenValidator for HttpTokenValidator {
    async fn validate(&self, base_url: &str, token: &str) -> ValidationOutcome {
        let url = format!("{}{}", base_url.trim_end_matches('/'), self.path);
        let response = match shared_client()
            .get(&url)
            .bearer_auth(token)
            .timeout(self.timeout)
            .send()
            .await
        {
            Ok(response) => response,
            Err(e) if e.is_timeout() => return ValidationOutcome::TimedOut,
            Err(e) => return ValidationOutcome::Unavailable(e.to_string()),
        };

        let status = response.status();
        if status == StatusCode::UNAUTHORIZED {
            return ValidationOutcome::Invalid;
        }
        if !status.is_success() {
            return ValidationOutcome::Rejected(format!("HTTP {}", status));
        }

        // Some backends answer 200 with an error envelope
        match response.json::<serde_json::Value>().await {
            Ok(body) if body.get("code").and_then(|c| c.as_i64()) == Some(401) => {
                ValidationOutcome::Invalid
            }
            Ok(_) => ValidationOutcome::Valid,
            Err(e) if e.is_timeout() => ValidationOutcome::TimedOut,
            Err(e) => ValidationOutcome::Rejected(format!("unreadable response body: {}", e)),
        }
    }
}

//! Client side of the challenge/response protocol.
//!
//! [`LicenseClient`] signs and sends `POST /check-license` requests.
//! [`spawn_revalidation`] runs it on an interval and reports the first
//! failure, after which the dependent application is expected to stop.
//!
//! ```rust,ignore
//! use keycheck::client::{spawn_revalidation, LicenseClient};
//!
//! let client = LicenseClient::new("https://license.example.com", "L1", secret);
//! let handle = spawn_revalidation(client, Duration::from_secs(3600), |failure| {
//!     eprintln!("license check failed: {failure}");
//!     std::process::exit(1);
//! });
//! ```

use std::fmt;
use std::time::Duration as StdDuration;

use chrono::{DateTime, SecondsFormat, Utc};
use reqwest::Client;
use serde::Deserialize;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::challenge::compute_client_hash;
use crate::errors::{LicenseError, LicenseResult};
use crate::validation::{CheckLicenseRequest, ValidationResult};

/// Result of one validation round trip.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CheckOutcome {
    Active {
        valid_until: DateTime<Utc>,
        checks_remaining: u32,
    },
    /// The server answered with an error status.
    Rejected {
        status: u16,
        /// Machine-readable code from the error body, when present.
        code: Option<String>,
    },
}

impl CheckOutcome {
    pub fn is_active(&self) -> bool {
        matches!(self, CheckOutcome::Active { .. })
    }

    /// Decode a `/check-license` response.
    pub fn from_response(status: u16, body: &[u8]) -> LicenseResult<Self> {
        if (200..300).contains(&status) {
            let result: ValidationResult = serde_json::from_slice(body).map_err(|e| {
                LicenseError::NetworkError(format!("malformed validation response: {e}"))
            })?;
            if result.status != "active" {
                return Ok(CheckOutcome::Rejected { status, code: None });
            }
            return Ok(CheckOutcome::Active {
                valid_until: result.valid_until,
                checks_remaining: result.checks_remaining,
            });
        }

        let code = serde_json::from_slice::<ErrorEnvelope>(body)
            .ok()
            .map(|envelope| envelope.error.code);
        Ok(CheckOutcome::Rejected { status, code })
    }
}

#[derive(Deserialize)]
struct ErrorEnvelope {
    error: ErrorCodeOnly,
}

#[derive(Deserialize)]
struct ErrorCodeOnly {
    code: String,
}

/// Sends signed validation requests for one license.
#[derive(Clone)]
pub struct LicenseClient {
    http: Client,
    base_url: String,
    license_key: String,
    secret: String,
}

impl fmt::Debug for LicenseClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LicenseClient")
            .field("base_url", &self.base_url)
            .field("license_key", &self.license_key)
            .finish_non_exhaustive()
    }
}

impl LicenseClient {
    pub fn new(
        base_url: impl Into<String>,
        license_key: impl Into<String>,
        secret: impl Into<String>,
    ) -> Self {
        Self::with_http_client(Client::new(), base_url, license_key, secret)
    }

    pub fn with_http_client(
        http: Client,
        base_url: impl Into<String>,
        license_key: impl Into<String>,
        secret: impl Into<String>,
    ) -> Self {
        let base_url: String = base_url.into();
        Self {
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
            license_key: license_key.into(),
            secret: secret.into(),
        }
    }

    pub fn license_key(&self) -> &str {
        &self.license_key
    }

    /// Build a signed request for `now`.
    pub fn signed_request(&self, now: DateTime<Utc>) -> CheckLicenseRequest {
        let timestamp = now.to_rfc3339_opts(SecondsFormat::Secs, true);
        let client_hash = compute_client_hash(&self.license_key, &timestamp, &self.secret);
        CheckLicenseRequest {
            key: Some(self.license_key.clone()),
            timestamp: Some(timestamp),
            client_hash: Some(client_hash),
        }
    }

    /// Validate once using the system clock.
    pub async fn check(&self) -> LicenseResult<CheckOutcome> {
        self.check_at(Utc::now()).await
    }

    pub async fn check_at(&self, now: DateTime<Utc>) -> LicenseResult<CheckOutcome> {
        let request = self.signed_request(now);
        let response = self
            .http
            .post(format!("{}/check-license", self.base_url))
            .json(&request)
            .send()
            .await?;

        let status = response.status().as_u16();
        let body = response.bytes().await?;
        CheckOutcome::from_response(status, &body)
    }
}

/// Why a revalidation loop stopped.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RevalidationFailure {
    Rejected { status: u16, code: Option<String> },
    Transport(LicenseError),
}

impl fmt::Display for RevalidationFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RevalidationFailure::Rejected { status, code } => match code {
                Some(code) => write!(f, "license rejected ({status} {code})"),
                None => write!(f, "license rejected ({status})"),
            },
            RevalidationFailure::Transport(e) => write!(f, "license server unreachable: {e}"),
        }
    }
}

/// Validate every `interval`, starting immediately.
///
/// The task ends after calling `on_failure` once, on the first rejection or
/// transport error. Abort the returned handle to stop it earlier.
pub fn spawn_revalidation<F>(
    client: LicenseClient,
    interval: StdDuration,
    on_failure: F,
) -> JoinHandle<()>
where
    F: FnOnce(RevalidationFailure) + Send + 'static,
{
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        loop {
            ticker.tick().await;
            let failure = match client.check().await {
                Ok(CheckOutcome::Active {
                    checks_remaining, ..
                }) => {
                    debug!(
                        license_key = %client.license_key(),
                        checks_remaining, "License revalidated"
                    );
                    continue;
                }
                Ok(CheckOutcome::Rejected { status, code }) => {
                    RevalidationFailure::Rejected { status, code }
                }
                Err(e) => RevalidationFailure::Transport(e),
            };

            warn!(license_key = %client.license_key(), "Revalidation failed: {failure}");
            on_failure(failure);
            return;
        }
    })
}

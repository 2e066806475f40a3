//! HTTP client for the facilitator's `/verify` endpoint.
//!
//! The gate never settles payments itself; it asks the configured
//! facilitator whether the buyer's authorization satisfies the selected
//! requirement. Verification is bounded at five seconds so a slow
//! facilitator degrades into a 402, not a hung request.
//!
//! Cheap to clone: the underlying `reqwest::Client` shares its connection
//! pool across clones.

use reqwest::Client;
use std::time::Duration;
use url::Url;

use apitoll_types::proto::{VerifyOutcome, VerifyRequest};

const VERIFY_TIMEOUT: Duration = Duration::from_secs(5);

/// Client for a remote facilitator.
#[derive(Clone, Debug)]
pub struct FacilitatorClient {
    base_url: Url,
    verify_url: Url,
    client: Client,
    timeout: Duration,
}

/// Errors talking to the facilitator.
#[derive(Debug, thiserror::Error)]
pub enum FacilitatorClientError {
    #[error("URL parse error: {context}: {source}")]
    UrlParse {
        context: &'static str,
        #[source]
        source: url::ParseError,
    },
    #[error("HTTP error: {context}: {source}")]
    Http {
        context: &'static str,
        #[source]
        source: reqwest::Error,
    },
    #[error("failed to deserialize JSON: {context}: {source}")]
    JsonDeserialization {
        context: &'static str,
        #[source]
        source: reqwest::Error,
    },
    #[error("unexpected HTTP status {status}: {body}")]
    HttpStatus {
        status: reqwest::StatusCode,
        body: String,
    },
}

impl FacilitatorClient {
    pub fn try_new(base_url: Url) -> Result<Self, FacilitatorClientError> {
        let verify_url =
            base_url
                .join("./verify")
                .map_err(|e| FacilitatorClientError::UrlParse {
                    context: "failed to construct ./verify URL",
                    source: e,
                })?;
        Ok(Self {
            base_url,
            verify_url,
            client: Client::new(),
            timeout: VERIFY_TIMEOUT,
        })
    }

    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    pub fn with_timeout(&self, timeout: Duration) -> Self {
        let mut this = self.clone();
        this.timeout = timeout;
        this
    }

    /// Sends a `POST /verify` and returns the facilitator's verdict.
    ///
    /// A non-2xx answer whose body parses as a [`VerifyOutcome`] is returned
    /// as that outcome (the facilitator rejected the payment); anything else
    /// is a transport error.
    pub async fn verify(
        &self,
        request: &VerifyRequest,
    ) -> Result<VerifyOutcome, FacilitatorClientError> {
        let response = self
            .client
            .post(self.verify_url.clone())
            .timeout(self.timeout)
            .json(request)
            .send()
            .await
            .map_err(|e| FacilitatorClientError::Http {
                context: "POST /verify",
                source: e,
            })?;
        let status = response.status();
        if status.is_success() {
            response
                .json::<VerifyOutcome>()
                .await
                .map_err(|e| FacilitatorClientError::JsonDeserialization {
                    context: "POST /verify",
                    source: e,
                })
        } else {
            let body = response.text().await.unwrap_or_default();
            if let Ok(mut outcome) = serde_json::from_str::<VerifyOutcome>(&body) {
                // Acceptance requires a 2xx answer; a parseable rejection
                // body is still a rejection.
                outcome.valid = Some(false);
                outcome.success = None;
                return Ok(outcome);
            }
            Err(FacilitatorClientError::HttpStatus { status, body })
        }
    }
}

impl TryFrom<&str> for FacilitatorClient {
    type Error = FacilitatorClientError;

    fn try_from(value: &str) -> Result<Self, Self::Error> {
        // Normalize to a single trailing slash so ./verify joins correctly.
        let mut normalized = value.trim_end_matches('/').to_string();
        normalized.push('/');
        let url = Url::parse(&normalized).map_err(|e| FacilitatorClientError::UrlParse {
            context: "failed to parse base url",
            source: e,
        })?;
        FacilitatorClient::try_new(url)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn joins_verify_url() {
        let client = FacilitatorClient::try_from("https://facilitator.apitoll.dev").unwrap();
        assert_eq!(
            client.verify_url.as_str(),
            "https://facilitator.apitoll.dev/verify"
        );
    }
}

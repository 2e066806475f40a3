//! HTTP client for the facilitator's payment API.

use reqwest::Client;
use std::time::Duration;
use url::Url;

use apitoll_types::facilitator::{PayAccepted, PayRequest, PaymentView};

const PAY_TIMEOUT: Duration = Duration::from_secs(10);
/// The forward call relays the origin's latency on top of facilitator
/// overhead, so it gets a generous bound.
const FORWARD_TIMEOUT: Duration = Duration::from_secs(60);

/// Client for a facilitator's `/pay`, `/pay/{id}` and `/forward/{id}`.
#[derive(Clone, Debug)]
pub struct FacilitatorApi {
    base_url: Url,
    client: Client,
}

#[derive(Debug, thiserror::Error)]
pub enum FacilitatorApiError {
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
    #[error("unexpected HTTP status {status}: {context}: {body}")]
    HttpStatus {
        context: &'static str,
        status: reqwest::StatusCode,
        body: String,
    },
}

impl FacilitatorApi {
    pub fn try_new(base_url: Url) -> Result<Self, FacilitatorApiError> {
        Ok(FacilitatorApi {
            base_url,
            client: Client::new(),
        })
    }

    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    fn join(&self, path: &str) -> Result<Url, FacilitatorApiError> {
        self.base_url
            .join(path)
            .map_err(|e| FacilitatorApiError::UrlParse {
                context: "failed to construct endpoint URL",
                source: e,
            })
    }

    /// `POST /pay`. Returns 202 with the payment id; execution is
    /// asynchronous on the facilitator side.
    pub async fn pay(&self, request: &PayRequest) -> Result<PayAccepted, FacilitatorApiError> {
        let url = self.join("./pay")?;
        let response = self
            .client
            .post(url)
            .timeout(PAY_TIMEOUT)
            .json(request)
            .send()
            .await
            .map_err(|e| FacilitatorApiError::Http {
                context: "POST /pay",
                source: e,
            })?;
        Self::json_or_status(response, "POST /pay").await
    }

    /// `GET /pay/{id}`.
    pub async fn status(&self, payment_id: &str) -> Result<PaymentView, FacilitatorApiError> {
        let url = self.join(&format!("./pay/{payment_id}"))?;
        let response = self
            .client
            .get(url)
            .timeout(PAY_TIMEOUT)
            .send()
            .await
            .map_err(|e| FacilitatorApiError::Http {
                context: "GET /pay/{id}",
                source: e,
            })?;
        Self::json_or_status(response, "GET /pay/{id}").await
    }

    /// `POST /forward/{id}`: replays the original request through the
    /// facilitator and returns the origin's response as-is.
    pub async fn forward(
        &self,
        payment_id: &str,
    ) -> Result<reqwest::Response, FacilitatorApiError> {
        let url = self.join(&format!("./forward/{payment_id}"))?;
        self.client
            .post(url)
            .timeout(FORWARD_TIMEOUT)
            .send()
            .await
            .map_err(|e| FacilitatorApiError::Http {
                context: "POST /forward/{id}",
                source: e,
            })
    }

    async fn json_or_status<R: serde::de::DeserializeOwned>(
        response: reqwest::Response,
        context: &'static str,
    ) -> Result<R, FacilitatorApiError> {
        let status = response.status();
        if status.is_success() {
            response
                .json::<R>()
                .await
                .map_err(|e| FacilitatorApiError::JsonDeserialization { context, source: e })
        } else {
            let body = response.text().await.unwrap_or_default();
            Err(FacilitatorApiError::HttpStatus {
                context,
                status,
                body,
            })
        }
    }
}

impl TryFrom<&str> for FacilitatorApi {
    type Error = FacilitatorApiError;

    fn try_from(value: &str) -> Result<Self, Self::Error> {
        let mut normalized = value.trim_end_matches('/').to_string();
        normalized.push('/');
        let url = Url::parse(&normalized).map_err(|e| FacilitatorApiError::UrlParse {
            context: "failed to parse base url",
            source: e,
        })?;
        FacilitatorApi::try_new(url)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn joins_endpoint_urls() {
        let api = FacilitatorApi::try_from("https://facilitator.apitoll.dev").unwrap();
        assert_eq!(
            api.join("./pay/pay_123").unwrap().as_str(),
            "https://facilitator.apitoll.dev/pay/pay_123"
        );
    }
}

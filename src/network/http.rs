//! HTTP External Bank Network client
//!
//! `GET {base_url}/institutions/{code}/accounts/{number}`
//! - 200 + `{account_name, institution_name}` → found
//! - 404 → account does not exist
//! - 408/429/5xx, connect errors → unavailable (retryable)

use std::time::Duration;

use async_trait::async_trait;
use reqwest::StatusCode;
use tracing::{debug, warn};

use super::{BankNetwork, ExternalIdentity, NetworkError};

pub struct HttpBankNetwork {
    base_url: String,
    client: reqwest::Client,
}

impl HttpBankNetwork {
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> Result<Self, NetworkError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| {
                NetworkError::Unavailable(format!("Failed to create HTTP client: {}", e))
            })?;

        Ok(Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            client,
        })
    }

    fn lookup_url(&self, institution_code: &str, account_number: &str) -> String {
        format!(
            "{}/institutions/{}/accounts/{}",
            self.base_url, institution_code, account_number
        )
    }
}

/// What a response status means for a lookup
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum StatusClass {
    Found,
    NotFound,
    Retryable,
    Invalid,
}

fn classify_status(status: StatusCode) -> StatusClass {
    match status {
        StatusCode::OK => StatusClass::Found,
        StatusCode::NOT_FOUND => StatusClass::NotFound,
        StatusCode::REQUEST_TIMEOUT | StatusCode::TOO_MANY_REQUESTS => StatusClass::Retryable,
        s if s.is_server_error() => StatusClass::Retryable,
        _ => StatusClass::Invalid,
    }
}

#[async_trait]
impl BankNetwork for HttpBankNetwork {
    fn name(&self) -> &'static str {
        "http"
    }

    async fn lookup(
        &self,
        institution_code: &str,
        account_number: &str,
    ) -> Result<Option<ExternalIdentity>, NetworkError> {
        let url = self.lookup_url(institution_code, account_number);
        let response = self.client.get(&url).send().await.map_err(|e| {
            if e.is_timeout() {
                NetworkError::Timeout
            } else {
                NetworkError::Unavailable(e.to_string())
            }
        })?;

        let status = response.status();
        debug!(institution_code, status = status.as_u16(), "Bank network lookup");

        match classify_status(status) {
            StatusClass::Found => response
                .json::<ExternalIdentity>()
                .await
                .map(Some)
                .map_err(|e| NetworkError::InvalidResponse(e.to_string())),
            StatusClass::NotFound => Ok(None),
            StatusClass::Retryable => {
                warn!(institution_code, status = status.as_u16(), "Bank network busy");
                Err(NetworkError::Unavailable(format!("status {}", status)))
            }
            StatusClass::Invalid => Err(NetworkError::InvalidResponse(format!(
                "unexpected status {}",
                status
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classify_status() {
        assert_eq!(classify_status(StatusCode::OK), StatusClass::Found);
        assert_eq!(classify_status(StatusCode::NOT_FOUND), StatusClass::NotFound);
        assert_eq!(
            classify_status(StatusCode::SERVICE_UNAVAILABLE),
            StatusClass::Retryable
        );
        assert_eq!(
            classify_status(StatusCode::TOO_MANY_REQUESTS),
            StatusClass::Retryable
        );
        assert_eq!(classify_status(StatusCode::BAD_REQUEST), StatusClass::Invalid);
    }

    #[test]
    fn test_lookup_url_trims_trailing_slash() {
        let network =
            HttpBankNetwork::new("http://partners.local/", Duration::from_secs(5)).unwrap();
        assert_eq!(
            network.lookup_url("058", "2000000001"),
            "http://partners.local/institutions/058/accounts/2000000001"
        );
    }
}

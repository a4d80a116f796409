// src/checks/http.rs
use crate::health::{Check, CheckError};
use async_trait::async_trait;
use reqwest::Client;
use std::time::Duration;
use url::Url;

/// Passes when `GET url` answers with exactly `expected_status` within `timeout`.
#[derive(Debug, Clone)]
pub struct HttpCheck {
    client: Client,
    url: Url,
    timeout: Duration,
    expected_status: u16,
}

impl HttpCheck {
    pub fn new(
        url: &str,
        timeout: Duration,
        expected_status: u16,
    ) -> Result<Self, url::ParseError> {
        Ok(Self {
            client: Client::new(),
            url: Url::parse(url)?,
            timeout,
            expected_status,
        })
    }

    /// Reuse a client (and its connection pool) across checks.
    pub fn with_client(mut self, client: Client) -> Self {
        self.client = client;
        self
    }
}

#[async_trait]
impl Check for HttpCheck {
    async fn check(&self) -> Result<(), CheckError> {
        let response = self
            .client
            .get(self.url.clone())
            .timeout(self.timeout)
            .send()
            .await
            .map_err(|source| CheckError::Request {
                url: self.url.to_string(),
                source,
            })?;

        let actual = response.status().as_u16();
        if actual != self.expected_status {
            return Err(CheckError::UnexpectedStatus {
                url: self.url.to_string(),
                actual,
                expected: self.expected_status,
            });
        }

        Ok(())
    }
}
